//! Crash-recovery metadata for persist jobs.
//!
//! After every rotation a job writes its parameters and current file
//! index to `<meta>/.persisterInfo_<id>.info`.  The file is a fixed
//! layout followed by an FNV-1a 64 checksum over those bytes; a file
//! whose checksum does not match is rejected so a job never resumes with
//! half-written parameters.
//!
//! ```text
//! 0   index:u32
//! 4   job_id:u32
//! 8   file_size:u32
//! 12  file_num:u32
//! 16  types:u16
//! 18  levels:u8
//! 19  compress_alg:u8
//! 20  file_path:[u8; 256]   NUL padded
//! 276 checksum:u64
//! ```

use crate::error::LogError;
use crate::protocol::control::PersistStartMsg;
use fnv::FnvHasher;
use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

pub const MAX_PATH_LEN: usize = 256;
const INFO_BODY_LEN: usize = 20 + MAX_PATH_LEN;
pub const INFO_FILE_LEN: usize = INFO_BODY_LEN + 8;

pub const INFO_FILE_PREFIX: &str = ".persisterInfo_";
pub const INFO_FILE_SUFFIX: &str = ".info";
pub const BUFFER_FILE_PREFIX: &str = ".persisterBuffer_";

pub fn info_path(meta_dir: &Path, job_id: u32) -> PathBuf {
    meta_dir.join(format!("{}{}{}", INFO_FILE_PREFIX, job_id, INFO_FILE_SUFFIX))
}

pub fn buffer_path(meta_dir: &Path, job_id: u32) -> PathBuf {
    meta_dir.join(format!("{}{}", BUFFER_FILE_PREFIX, job_id))
}

/// FNV-1a 64 over `bytes`.
pub fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistRecoveryInfo {
    /// Index of the file currently being written.
    pub index: u32,
    /// The request the job was started with.
    pub msg: PersistStartMsg,
}

impl PersistRecoveryInfo {
    pub fn serialize(&self) -> Result<[u8; INFO_FILE_LEN], LogError> {
        let path = self.msg.file_path.as_bytes();
        if path.len() >= MAX_PATH_LEN {
            return Err(LogError::PersistFilePathInvalid);
        }
        let mut buf = [0u8; INFO_FILE_LEN];
        buf[0..4].copy_from_slice(&self.index.to_le_bytes());
        buf[4..8].copy_from_slice(&self.msg.job_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.msg.file_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.msg.file_num.to_le_bytes());
        buf[16..18].copy_from_slice(&self.msg.types.to_le_bytes());
        buf[18] = self.msg.levels;
        buf[19] = self.msg.compress_alg;
        buf[20..20 + path.len()].copy_from_slice(path);
        let sum = checksum(&buf[..INFO_BODY_LEN]);
        buf[INFO_BODY_LEN..].copy_from_slice(&sum.to_le_bytes());
        Ok(buf)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, LogError> {
        if buf.len() != INFO_FILE_LEN {
            return Err(LogError::InvalidMessageLength);
        }
        let mut stored = [0u8; 8];
        stored.copy_from_slice(&buf[INFO_BODY_LEN..]);
        if u64::from_le_bytes(stored) != checksum(&buf[..INFO_BODY_LEN]) {
            return Err(LogError::Failed);
        }

        let u32_at = |off: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&buf[off..off + 4]);
            u32::from_le_bytes(b)
        };
        let path = crate::protocol::until_nul(&buf[20..INFO_BODY_LEN]);
        Ok(PersistRecoveryInfo {
            index: u32_at(0),
            msg: PersistStartMsg {
                job_id: u32_at(4),
                file_size: u32_at(8),
                file_num: u32_at(12),
                types: u16::from_le_bytes([buf[16], buf[17]]),
                levels: buf[18],
                compress_alg: buf[19],
                file_path: String::from_utf8_lossy(path).into_owned(),
            },
        })
    }

    /// Write through a temporary file and rename over the target.
    pub fn write_to(&self, path: &Path) -> Result<(), LogError> {
        let data = self.serialize()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, LogError> {
        let data = fs::read(path)?;
        Self::deserialize(&data).inspect_err(|_| {
            log::warn!("Rejecting corrupt recovery file {}", path.display());
        })
    }
}

/// Every info file in `meta_dir`, sorted by name.
pub fn scan_info_files(meta_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(meta_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(INFO_FILE_PREFIX) && n.ends_with(INFO_FILE_SUFFIX))
        })
        .collect();
    files.sort();
    files
}
