//! Compression strategies for persisted log data.
//!
//! Each call to [`LogCompress::compress`] turns one staging-buffer flush
//! into a self-contained unit (a gzip member or a zstd frame) so files
//! stay decodable even if the daemon dies between flushes.  Concatenated
//! gzip members are read back with `MultiGzDecoder`; concatenated zstd
//! frames decode natively.

use crate::error::LogError;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

/// Input is fed to the encoders in slices of at most this size.
pub const COMPRESS_CHUNK_SIZE: usize = 16 * 1024;

const ZSTD_LEVEL: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressAlg {
    None = 0,
    Zlib = 1,
    Zstd = 2,
}

impl CompressAlg {
    pub fn from_u8(v: u8) -> Option<CompressAlg> {
        match v {
            0 => Some(CompressAlg::None),
            1 => Some(CompressAlg::Zlib),
            2 => Some(CompressAlg::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressAlg::None => "none",
            CompressAlg::Zlib => "zlib",
            CompressAlg::Zstd => "zstd",
        }
    }

    /// File suffix of rotated output written with this algorithm.
    pub fn suffix(self) -> &'static str {
        match self {
            CompressAlg::None => ".log",
            CompressAlg::Zlib => ".gz",
            CompressAlg::Zstd => ".zst",
        }
    }

    pub fn compressor(self) -> Box<dyn LogCompress> {
        match self {
            CompressAlg::None => Box::new(NoneCompress),
            CompressAlg::Zlib => Box::new(ZlibCompress::default()),
            CompressAlg::Zstd => Box::new(ZstdCompress::default()),
        }
    }
}

impl TryFrom<u8> for CompressAlg {
    type Error = LogError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        CompressAlg::from_u8(v).ok_or(LogError::PersistCompressInitFailed)
    }
}

pub trait LogCompress: Send {
    /// Compress `input` and append the result to `out`.
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), LogError>;
}

fn write_chunked<W: Write>(w: &mut W, input: &[u8]) -> Result<(), LogError> {
    for chunk in input.chunks(COMPRESS_CHUNK_SIZE) {
        w.write_all(chunk).map_err(|e| {
            log::error!("Compression failed: {}", e);
            LogError::PersistCompressBufferException
        })?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

pub struct NoneCompress;

impl LogCompress for NoneCompress {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), LogError> {
        out.extend_from_slice(input);
        Ok(())
    }
}

pub struct ZlibCompress {
    level: Compression,
}

impl Default for ZlibCompress {
    fn default() -> Self {
        ZlibCompress {
            level: Compression::default(),
        }
    }
}

impl LogCompress for ZlibCompress {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), LogError> {
        let mut encoder = GzEncoder::new(std::mem::take(out), self.level);
        write_chunked(&mut encoder, input)?;
        *out = encoder
            .finish()
            .map_err(|_| LogError::PersistCompressBufferException)?;
        Ok(())
    }
}

pub struct ZstdCompress {
    level: i32,
}

impl Default for ZstdCompress {
    fn default() -> Self {
        ZstdCompress { level: ZSTD_LEVEL }
    }
}

impl LogCompress for ZstdCompress {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), LogError> {
        let mut encoder = zstd::stream::write::Encoder::new(std::mem::take(out), self.level)
            .map_err(|e| {
                log::error!("Failed to initialize zstd encoder: {}", e);
                LogError::PersistCompressInitFailed
            })?;
        write_chunked(&mut encoder, input)?;
        *out = encoder
            .finish()
            .map_err(|_| LogError::PersistCompressBufferException)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn sample() -> Vec<u8> {
        (0..3000)
            .flat_map(|i| format!("01-01 00:00:00.000  {:>4} line\n", i).into_bytes())
            .collect()
    }

    #[test]
    fn test_alg_ids() {
        assert_eq!(CompressAlg::try_from(2), Ok(CompressAlg::Zstd));
        assert_eq!(
            CompressAlg::try_from(9),
            Err(LogError::PersistCompressInitFailed)
        );
        assert_eq!(CompressAlg::Zlib.suffix(), ".gz");
    }

    #[test]
    fn test_none_passthrough() {
        let mut out = b"prev".to_vec();
        NoneCompress.compress(b"data", &mut out).unwrap();
        assert_eq!(out, b"prevdata");
    }

    #[test]
    fn test_zlib_members_concatenate() {
        let data = sample();
        assert!(data.len() > COMPRESS_CHUNK_SIZE);
        let mut c = CompressAlg::Zlib.compressor();
        let mut out = Vec::new();
        c.compress(&data, &mut out).unwrap();
        c.compress(b"tail\n", &mut out).unwrap();

        let mut decoded = Vec::new();
        MultiGzDecoder::new(&out[..])
            .read_to_end(&mut decoded)
            .unwrap();
        let mut expected = data.clone();
        expected.extend_from_slice(b"tail\n");
        assert_eq!(decoded, expected);
        assert!(out.len() < data.len());
    }

    #[test]
    fn test_zstd_frames_concatenate() {
        let data = sample();
        let mut c = CompressAlg::Zstd.compressor();
        let mut out = Vec::new();
        c.compress(&data, &mut out).unwrap();
        c.compress(b"tail\n", &mut out).unwrap();

        let decoded = zstd::stream::decode_all(&out[..]).unwrap();
        let mut expected = data;
        expected.extend_from_slice(b"tail\n");
        assert_eq!(decoded, expected);
    }
}
