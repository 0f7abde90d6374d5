//! Fuzz target for CRC64 combine
//!
//! Combining the CRCs of two halves must equal the CRC of the whole buffer
//! for every split point.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stratus_files::Crc64;
use stratus_files::crc64::{calc, combine};

#[derive(Debug, Arbitrary)]
struct CombineInput {
    data: Vec<u8>,
    split: usize,
    seed: u64,
}

fuzz_target!(|input: CombineInput| {
    let at = input.split % (input.data.len() + 1);
    let (a, b) = input.data.split_at(at);

    let whole = calc(input.seed, &input.data);
    assert_eq!(combine(calc(input.seed, a), calc(0, b), b.len() as u64), whole);

    let mut folded = Crc64::with_seed(calc(input.seed, a), a.len() as u64);
    folded.append(calc(0, b), b.len() as u64);
    assert_eq!(folded.finalize(), whole);
});
