#![no_main]

use czrpc_proto::FrameAccumulator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };

    let mut whole = FrameAccumulator::new(1 << 16);
    let mut chunked = FrameAccumulator::new(1 << 16);

    let expected = whole.feed(rest);
    let mut frames = Vec::new();
    let mut failed = false;
    for chunk in rest.chunks(usize::from(split).max(1)) {
        match chunked.feed(chunk) {
            Ok(mut more) => frames.append(&mut more),
            Err(_) => {
                failed = true;
                break;
            },
        }
    }

    match expected {
        Ok(all) => {
            assert!(!failed);
            assert_eq!(all, frames);
        },
        Err(_) => assert!(failed),
    }
});
