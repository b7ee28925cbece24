#![no_main]

use czrpc_proto::{Frame, frame::DEFAULT_MAX_FRAME_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic. Anything that decodes must
    // re-encode to a frame that decodes to the same value.
    if let Ok(frame) = Frame::decode(data, DEFAULT_MAX_FRAME_SIZE) {
        let encoded = frame.encode().unwrap();
        let again = Frame::decode(&encoded, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(again, frame);
    }
});
