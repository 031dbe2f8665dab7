use serde::{Deserialize, Serialize};

/// Events emitted while a generator run is streaming.
///
/// Text deltas carry no guarantee about chunk boundaries: a word may be split
/// across two events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of generated text.
    TextDelta { text: String },

    /// The run has finished.
    Done,

    /// The generator reported a failure mid-stream.
    Error { message: String },
}
