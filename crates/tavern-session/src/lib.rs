//! Session records and the stores that own them.
//!
//! A [`Session`] is the shared state of one collaborative story: roster,
//! character bios, transcript, generator history and the single-flight
//! processing flag. A [`SessionStore`] is the only writer of session records.

pub mod session;
pub mod store;

pub use session::{Admission, Session};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
