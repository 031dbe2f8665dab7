#![allow(clippy::unwrap_used, clippy::expect_used)]

use tavern_core::*;

// ---------------------------------------------------------------------------
// 1. Inbound action parsing from a push frame
// ---------------------------------------------------------------------------

#[test]
fn frame_with_roster_and_message() {
    let frame = r#"{
        "users": [
            {"name": "Seth", "role": "Wizard"},
            {"name": "Hank", "role": "Warrior"}
        ],
        "user": "Seth",
        "msg": "I cast a fireball at the orc."
    }"#;

    let action = Action::from_frame(frame);
    let users = action.participants().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[1], Participant::new("Hank", "Warrior"));
    assert_eq!(
        action.speaker_and_text(),
        Some(("Seth", "I cast a fireball at the orc."))
    );
    assert!(!action.is_empty());
}

#[test]
fn empty_object_frame_is_empty_action() {
    let action = Action::from_frame("{}");
    assert!(action.is_empty());
    assert!(action.echo_text().is_none());
}

// ---------------------------------------------------------------------------
// 2. Echo payload encoding
// ---------------------------------------------------------------------------

#[test]
fn echo_text_encodes_as_utf8_payload() {
    let action = Action {
        user: Some("Hank".into()),
        msg: Some("I charge — axe raised".into()),
        ..Action::default()
    };
    let payload = Payload::from(action.echo_text().unwrap());
    let bytes = payload.to_bytes();
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        "\n\n Hank: I charge — axe raised \n\n"
    );
}

#[test]
fn record_payload_from_transcript_entry() {
    let entry = DialogueEntry::new("Dungeon Master", "Seth rolls a 3.");
    let payload = Payload::from(serde_json::to_value(&entry).unwrap());
    let decoded: serde_json::Value = serde_json::from_slice(&payload.to_bytes()).unwrap();
    assert_eq!(decoded["user"], "Dungeon Master");
    assert_eq!(decoded["msg"], "Seth rolls a 3.");
}

// ---------------------------------------------------------------------------
// 3. Fixed response strings
// ---------------------------------------------------------------------------

#[test]
fn apology_pool_and_wait_message() {
    assert_eq!(APOLOGIES.len(), 10);
    assert!(APOLOGIES.iter().all(|a| !a.is_empty()));
    assert!(WAIT_MESSAGE.starts_with("Wait a moment"));
}
