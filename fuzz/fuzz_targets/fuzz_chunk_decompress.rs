#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parallel_blockzip::Codec;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    codec_id: u8,
    data: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    if input.data.is_empty() || input.data.len() > 1_000_000 {
        return;
    }
    // Corrupt chunks must be reported as errors, never panic.
    let codec = Codec::ALL[input.codec_id as usize % Codec::ALL.len()];
    let _ = codec.decompress(&input.data);
});
