#![no_main]

use libfuzzer_sys::fuzz_target;
use parallel_blockzip::ArchiveIndex;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }

    // Anything accepted must describe a layout that fits inside the input.
    if let Ok((index, data_end)) = ArchiveIndex::locate(data) {
        assert!(data_end <= data.len() as u64);
        assert_eq!(index.data_len(), data_end);
        for entry in index.entries() {
            assert!(entry.offset + entry.length <= data_end);
        }
        let trailer = index.encode_trailer().unwrap();
        assert_eq!(data_end as usize + trailer.len(), data.len());
    }
});
