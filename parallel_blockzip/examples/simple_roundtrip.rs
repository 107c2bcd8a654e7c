use anyhow::{bail, Result};
use parallel_blockzip::{compress_file, decompress_file, ArchiveConfig, Outcome};
use std::env;
use std::fs;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input> [workers]", args[0]);
        return Ok(());
    }

    let input = &args[1];
    let mut config = ArchiveConfig::default();
    if let Some(workers) = args.get(2) {
        config = config.with_workers(workers.parse()?);
    }

    let archive = format!("{input}.bzp");
    let restored = format!("{input}.restored");

    let Outcome::Completed(packed) = compress_file(input, &archive, config.clone())? else {
        bail!("compression was aborted");
    };
    println!(
        "compressed {} -> {} bytes in {} chunks ({:.2?})",
        packed.bytes_in, packed.bytes_out, packed.chunks, packed.elapsed
    );

    let Outcome::Completed(unpacked) = decompress_file(&archive, &restored, config)? else {
        bail!("decompression was aborted");
    };
    println!(
        "restored {} bytes ({:.2?})",
        unpacked.bytes_out, unpacked.elapsed
    );

    if fs::read(input)? != fs::read(&restored)? {
        bail!("restored file differs from {input}");
    }
    println!("round trip ok");
    Ok(())
}
