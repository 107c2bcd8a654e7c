use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use parallel_blockzip::{
    compress_file, decompress_file, inspect_archive, ArchiveConfig, ArchiveError, ArchiveIndex,
    Archiver, Codec, IndexEntry, Outcome, RunState,
};

const BLOCK: u64 = 4096;

/// Deterministic test data: a noisy half and a repetitive half so every
/// codec has something to do.
fn generate_data(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        if (data.len() / 1000) % 2 == 0 {
            data.push(state as u8);
        } else {
            data.push(b'a' + (data.len() % 7) as u8);
        }
    }
    data
}

fn small_config(codec: Codec) -> ArchiveConfig {
    ArchiveConfig::default()
        .with_codec(codec)
        .with_block_size(BLOCK)
        .with_max_buffer_size(16 * BLOCK)
        .with_workers(4)
        .with_poll_interval(Duration::from_millis(2))
}

fn completed(outcome: Outcome) -> parallel_blockzip::RunSummary {
    match outcome {
        Outcome::Completed(summary) => summary,
        Outcome::Aborted => panic!("run was aborted"),
    }
}

fn round_trip(dir: &Path, data: &[u8], config: ArchiveConfig) -> Vec<u8> {
    let src = dir.join("input.bin");
    let archive = dir.join("input.bin.bzp");
    let restored = dir.join("restored.bin");
    fs::write(&src, data).unwrap();

    completed(compress_file(&src, &archive, config.clone()).unwrap());
    completed(decompress_file(&archive, &restored, config).unwrap());
    fs::read(&restored).unwrap()
}

#[test]
fn test_round_trip_sizes_and_codecs() {
    let sizes = [0usize, 1, 4095, 3 * BLOCK as usize + 17, 300 * 1024];
    for codec in Codec::ALL {
        for &size in &sizes {
            let dir = tempfile::tempdir().unwrap();
            let data = generate_data(size, size as u64 + 7);
            let restored = round_trip(dir.path(), &data, small_config(codec));
            assert_eq!(restored, data, "{codec} round trip of {size} bytes");
        }
    }
}

#[test]
fn test_empty_file_archive_is_just_a_trailer() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("empty.bin");
    let archive = dir.path().join("empty.bzp");
    fs::write(&src, b"").unwrap();

    let summary = completed(compress_file(&src, &archive, small_config(Codec::Gzip)).unwrap());
    assert_eq!(summary.chunks, 0);
    assert_eq!(fs::metadata(&archive).unwrap().len(), 20);
    assert!(inspect_archive(&archive).unwrap().is_empty());
}

#[test]
fn test_index_covers_every_chunk_once() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("input.bin");
    let archive = dir.path().join("input.bzp");
    fs::write(&src, generate_data(512 * 1024, 3)).unwrap();

    let summary = completed(compress_file(&src, &archive, small_config(Codec::Zstd)).unwrap());
    assert!(summary.chunks > 1);
    assert_eq!(summary.bytes_in, 512 * 1024);
    assert_eq!(summary.per_worker_chunks.iter().sum::<u64>(), summary.chunks);

    let bytes = fs::read(&archive).unwrap();
    let (index, data_end) = ArchiveIndex::locate(&bytes).unwrap();
    assert_eq!(index.len() as u64, summary.chunks);
    assert_eq!(index.codec(), Codec::Zstd);

    let mut indices: Vec<u64> = index.entries().iter().map(|e| e.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..summary.chunks).collect::<Vec<_>>());

    // Write order packs the chunks back to back.
    let mut expected_offset = 0;
    for entry in index.entries() {
        assert_eq!(entry.offset, expected_offset);
        expected_offset += entry.length;
    }
    assert_eq!(expected_offset, data_end);
}

#[test]
fn test_worker_count_does_not_change_output() {
    let data = generate_data(400 * 1024, 11);
    let single = {
        let dir = tempfile::tempdir().unwrap();
        round_trip(dir.path(), &data, small_config(Codec::Gzip).with_workers(1))
    };
    let many = {
        let dir = tempfile::tempdir().unwrap();
        round_trip(dir.path(), &data, small_config(Codec::Gzip).with_workers(8))
    };
    assert_eq!(single, data);
    assert_eq!(many, data);
}

#[test]
fn test_out_of_order_storage_is_restored() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("shuffled.bzp");
    let restored = dir.path().join("restored.bin");

    let original = generate_data(10 * 1000, 5);
    let pieces: Vec<&[u8]> = original.chunks(1000).collect();

    // Store chunk 9 first and chunk 0 last.
    let mut bytes = Vec::new();
    let mut index = ArchiveIndex::new(Codec::Bzip2);
    for (i, piece) in pieces.iter().enumerate().rev() {
        let packed = Codec::Bzip2.compress(piece, 9).unwrap();
        index.push(IndexEntry::new(i as u64, bytes.len() as u64, packed.len() as u64));
        bytes.extend_from_slice(&packed);
    }
    bytes.extend_from_slice(&index.encode_trailer().unwrap());
    fs::write(&archive, &bytes).unwrap();

    for workers in [1, 3, 8] {
        let config = small_config(Codec::Gzip).with_workers(workers);
        completed(decompress_file(&archive, &restored, config).unwrap());
        assert_eq!(fs::read(&restored).unwrap(), original, "{workers} workers");
    }
}

#[test]
fn test_tight_memory_budget_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let data = generate_data(256 * 1024, 17);
    let config = small_config(Codec::Gzip)
        .with_workers(4)
        .with_memory_limit(8 * 2 * BLOCK);
    assert_eq!(round_trip(dir.path(), &data, config), data);
}

#[test]
fn test_bad_format_is_rejected_before_output() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("not-an-archive.txt");
    let dst = dir.path().join("out.bin");
    fs::write(&src, b"this is a plain text file, not an archive\n").unwrap();

    let archiver = Archiver::decompress(&src, &dst, small_config(Codec::Gzip));
    let err = archiver.run().unwrap_err();
    assert!(matches!(err, ArchiveError::Format(_)), "{err}");
    assert_eq!(archiver.state(), RunState::Failed);
    assert!(!dst.exists());
}

#[test]
fn test_corrupt_chunk_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("input.bin");
    let archive = dir.path().join("input.bzp");
    fs::write(&src, generate_data(64 * 1024, 23)).unwrap();
    completed(compress_file(&src, &archive, small_config(Codec::Gzip)).unwrap());

    // Flip bytes inside the first stored chunk, leaving the index intact.
    let mut bytes = fs::read(&archive).unwrap();
    for b in &mut bytes[0..16] {
        *b ^= 0xFF;
    }
    fs::write(&archive, &bytes).unwrap();

    let err = decompress_file(&archive, dir.path().join("out.bin"), small_config(Codec::Gzip))
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Codec { .. }), "{err}");
}

#[test]
fn test_missing_source_reports_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let dst = dir.path().join("out.bzp");
    let archiver = Archiver::compress(dir.path().join("missing.bin"), &dst, small_config(Codec::Gzip));

    assert!(matches!(archiver.run(), Err(ArchiveError::Io { .. })));
    assert_eq!(archiver.state(), RunState::Failed);
    assert!(!dst.exists());
}

#[test]
fn test_unwritable_destination_reports_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("input.bin");
    fs::write(&src, generate_data(10_000, 1)).unwrap();
    let dst = dir.path().join("no-such-dir").join("out.bzp");

    let result = compress_file(&src, &dst, small_config(Codec::Gzip));
    assert!(matches!(result, Err(ArchiveError::Io { .. })));
}

#[test]
fn test_invalid_config_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("input.bin");
    fs::write(&src, b"abc").unwrap();
    let config = small_config(Codec::Gzip).with_level(42);

    let result = compress_file(&src, dir.path().join("out.bzp"), config);
    assert!(matches!(result, Err(ArchiveError::InvalidConfig(_))));
}

#[test]
fn test_run_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("input.bin");
    fs::write(&src, b"hello").unwrap();

    let archiver = Archiver::compress(&src, dir.path().join("out.bzp"), small_config(Codec::Gzip));
    assert!(archiver.run().unwrap().is_completed());
    assert!(matches!(archiver.run(), Err(ArchiveError::AlreadyStarted)));
    assert_eq!(archiver.state(), RunState::Completed);
}

#[test]
fn test_abort_before_run() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("input.bin");
    let dst = dir.path().join("out.bzp");
    fs::write(&src, b"hello").unwrap();

    let archiver = Archiver::compress(&src, &dst, small_config(Codec::Gzip));
    assert!(archiver.abort_handle().abort());
    assert_eq!(archiver.run().unwrap(), Outcome::Aborted);
    assert_eq!(archiver.state(), RunState::Aborted);
    assert!(!dst.exists());
}

#[test]
fn test_abort_mid_run_stops_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("noise.bin");
    let dst = dir.path().join("noise.bzp");
    let noise: Vec<u8> = {
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        (0..16 * 1024 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    };
    fs::write(&src, &noise).unwrap();

    let config = ArchiveConfig::default()
        .with_codec(Codec::Bzip2)
        .with_level(9)
        .with_block_size(64 * 1024)
        .with_max_buffer_size(64 * 1024)
        .with_workers(1)
        .with_poll_interval(Duration::from_millis(2));
    let archiver = Archiver::compress(&src, &dst, config);
    let handle = archiver.abort_handle();

    thread::scope(|s| {
        let run = s.spawn(|| archiver.run());

        let start = Instant::now();
        while archiver.progress().chunks == 0 {
            assert!(start.elapsed() < Duration::from_secs(60), "no chunk was ever written");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.abort());
        let aborted_at = Instant::now();

        let outcome = run.join().unwrap().unwrap();
        assert_eq!(outcome, Outcome::Aborted);
        assert!(aborted_at.elapsed() < Duration::from_secs(10));
    });

    assert_eq!(archiver.state(), RunState::Aborted);
    assert!(archiver.progress().consumed < noise.len() as u64);
}
