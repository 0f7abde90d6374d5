//! Fuzz target for checkpoint decoding
//!
//! Arbitrary bytes on disk must be rejected cleanly, never panic, and
//! anything accepted must survive a re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use stratus_core::Checkpoint;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut checkpoint) = Checkpoint::decode(data) {
        let _ = checkpoint.done_count();
        let _ = checkpoint.bytes_done();
        let _ = checkpoint.completed_parts();

        let encoded = checkpoint.encode().expect("decoded checkpoint re-encodes");
        let again = Checkpoint::decode(&encoded).expect("re-encoded checkpoint decodes");
        assert_eq!(again, checkpoint);
    }
});
