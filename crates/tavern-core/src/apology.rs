use rand::seq::SliceRandom;

/// Response body returned when an action arrives while a generation for the
/// same session is still running.
pub const WAIT_MESSAGE: &str =
    "Wait a moment, I'm still divining what happened with the last action.";

/// In-character messages shown instead of internal errors.
pub const APOLOGIES: [&str; 10] = [
    "A dark mist clouds my vision, obscuring the outcome of your action. Please try again.",
    "The threads of fate tangle before my eyes, hiding the result. Let's attempt that once more.",
    "An arcane disturbance interferes with my sight of the consequences. Shall we give it another go?",
    "The spirits are restless, blocking my view of what transpires. Try again, brave adventurer.",
    "A momentary rift in reality disrupts my perception of the outcome. Please repeat your action.",
    "The whispers of ancient magic muddle my mind, concealing the result. Let's try that again.",
    "A shadow passes over my scrying pool, obscuring the consequences of your deed. Another attempt, perhaps?",
    "The cosmic balance shifts, causing my vision of the outcome to blur. Pray, try once more.",
    "An otherworldly force intervenes, preventing me from seeing the result. Shall we defy it with another try?",
    "The veil between worlds thickens, hiding the consequences from my sight. Please restate your intention.",
];

/// Picks one apology at random.
pub fn random_apology() -> &'static str {
    APOLOGIES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(APOLOGIES[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_apology_is_from_pool() {
        for _ in 0..50 {
            assert!(APOLOGIES.contains(&random_apology()));
        }
    }
}
