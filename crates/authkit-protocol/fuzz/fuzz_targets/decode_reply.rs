#![no_main]
use authkit_protocol::ActionReply;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(reply) = ActionReply::decode(data) else {
        return;
    };
    // Accessors must cope with any decoded code.
    let _ = reply.authkit_error();
    let _ = reply.error_description();
    let _ = reply.to_string();

    let encoded = reply.encode().expect("decoded reply re-encodes");
    let again = ActionReply::decode(&encoded).expect("re-encoded reply decodes");
    assert_eq!(again.encode().expect("stable encoding"), encoded);
});
