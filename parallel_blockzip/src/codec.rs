//! Per-chunk block codecs.
//!
//! Every chunk is compressed into one self-delimiting member of its codec
//! (a gzip member, a zstd frame or a bzip2 stream), so any chunk can be
//! decoded on its own without touching its neighbours.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

/// Block compressor used for every chunk of an archive.
///
/// The codec is recorded in the archive index, so decompression always uses
/// the codec the archive was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Deflate in gzip framing (`flate2`).
    #[default]
    Gzip,
    /// Zstandard frames.
    Zstd,
    /// bzip2 streams.
    Bzip2,
}

impl Codec {
    pub const ALL: [Codec; 3] = [Codec::Gzip, Codec::Zstd, Codec::Bzip2];

    /// Identifier stored in the archive index header.
    pub fn id(self) -> u8 {
        match self {
            Codec::Gzip => 1,
            Codec::Zstd => 2,
            Codec::Bzip2 => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Codec> {
        Codec::ALL.into_iter().find(|c| c.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Zstd => "zstd",
            Codec::Bzip2 => "bzip2",
        }
    }

    pub fn default_level(self) -> i32 {
        match self {
            Codec::Gzip => 6,
            Codec::Zstd => 3,
            Codec::Bzip2 => 9,
        }
    }

    /// Inclusive range of accepted compression levels.
    pub fn level_range(self) -> (i32, i32) {
        match self {
            Codec::Gzip => (0, 9),
            Codec::Zstd => (1, 22),
            Codec::Bzip2 => (1, 9),
        }
    }

    /// Compresses `data` into a single self-contained member.
    pub fn compress(self, data: &[u8], level: i32) -> io::Result<Vec<u8>> {
        match self {
            Codec::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::new(level as u32),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
            Codec::Zstd => zstd::bulk::compress(data, level),
            Codec::Bzip2 => {
                let mut encoder = bzip2::write::BzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    bzip2::Compression::new(level as u32),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }

    /// Decompresses one member produced by [`Codec::compress`].
    pub fn decompress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        match self {
            Codec::Gzip => {
                flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
            }
            Codec::Zstd => {
                zstd::stream::read::Decoder::new(data)?.read_to_end(&mut out)?;
            }
            Codec::Bzip2 => {
                bzip2::read::BzDecoder::new(data).read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" | "gz" | "deflate" => Ok(Codec::Gzip),
            "zstd" | "zst" => Ok(Codec::Zstd),
            "bzip2" | "bz2" => Ok(Codec::Bzip2),
            other => Err(format!("unknown codec '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..20_000u32 {
            data.extend_from_slice(format!("line {} {}\n", i, i % 17).as_bytes());
        }
        data
    }

    #[test]
    fn test_round_trip_all_codecs() {
        let data = sample();
        for codec in Codec::ALL {
            let packed = codec.compress(&data, codec.default_level()).unwrap();
            assert!(packed.len() < data.len(), "{codec} did not compress");
            assert_eq!(codec.decompress(&packed).unwrap(), data, "{codec}");
        }
    }

    #[test]
    fn test_ids_are_stable() {
        assert_eq!(Codec::Gzip.id(), 1);
        assert_eq!(Codec::Zstd.id(), 2);
        assert_eq!(Codec::Bzip2.id(), 3);
        for codec in Codec::ALL {
            assert_eq!(Codec::from_id(codec.id()), Some(codec));
        }
        assert_eq!(Codec::from_id(0), None);
        assert_eq!(Codec::from_id(4), None);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let garbage = b"definitely not a compressed member";
        for codec in Codec::ALL {
            assert!(codec.decompress(garbage).is_err(), "{codec}");
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("GZ".parse::<Codec>(), Ok(Codec::Gzip));
        assert_eq!("zst".parse::<Codec>(), Ok(Codec::Zstd));
        assert_eq!("bzip2".parse::<Codec>(), Ok(Codec::Bzip2));
        assert!("lzma".parse::<Codec>().is_err());
    }
}
