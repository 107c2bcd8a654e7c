#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parallel_blockzip::Codec;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    codec_id: u8,
    level: u8,
    data: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    if input.data.len() > 1_000_000 {
        return;
    }
    let codec = Codec::ALL[input.codec_id as usize % Codec::ALL.len()];
    let (min, max) = codec.level_range();
    let level = min + (input.level as i32 % (max - min + 1));

    let packed = codec.compress(&input.data, level).unwrap();
    let restored = codec.decompress(&packed).unwrap();
    assert_eq!(restored, input.data);
});
