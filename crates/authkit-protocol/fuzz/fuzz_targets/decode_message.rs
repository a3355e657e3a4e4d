#![no_main]
use authkit_protocol::{ActionReply, HelperMessage};
use libfuzzer_sys::fuzz_target;

/// Arbitrary frames arriving at a client from a helper.
fuzz_target!(|data: &[u8]| {
    let Ok(message) = HelperMessage::decode(data) else {
        return;
    };
    if let HelperMessage::Reply { reply, .. } = &message {
        let _ = ActionReply::decode(reply);
    }
    let encoded = message.encode().expect("decoded message re-encodes");
    assert!(HelperMessage::decode(&encoded).is_ok());
});
