#![no_main]
use authkit_protocol::Request;
use authkit_protocol::messages::decode_batch;
use authkit_protocol::wire::decode_map;
use libfuzzer_sys::fuzz_target;

/// Arbitrary frames arriving at a helper socket.
///
/// Decoding must never panic, and anything that decodes must encode back
/// to a frame that decodes to the same bytes again.
fuzz_target!(|data: &[u8]| {
    let Ok(request) = Request::decode(data) else {
        return;
    };
    let encoded = request.encode().expect("decoded request re-encodes");
    let again = Request::decode(&encoded).expect("re-encoded request decodes");
    assert_eq!(again.encode().expect("stable encoding"), encoded);

    // The dispatcher decodes the nested blobs separately.
    match request.body {
        authkit_protocol::RequestBody::PerformAction { args, .. } => {
            let _ = decode_map(&args);
        }
        authkit_protocol::RequestBody::PerformActions { batch, .. } => {
            let _ = decode_batch(&batch);
        }
        _ => {}
    }
});
