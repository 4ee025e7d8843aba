//! Memory-mapped staging buffer.
//!
//! Formatted text collects here until a full buffer is compressed and
//! handed to the rotator.  Because the buffer is a shared file mapping,
//! whatever was staged survives a daemon crash and is flushed when the
//! job is recovered.  The first four bytes hold the fill offset.

use crate::error::LogError;
use memmap2::MmapMut;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub const MAX_PERSISTER_BUFFER_SIZE: usize = 64 * 1024;
const OFFSET_LEN: usize = 4;

pub struct StagingBuffer {
    path: PathBuf,
    map: MmapMut,
}

impl StagingBuffer {
    /// Map the staging file at `path`.  With `recover` the existing
    /// contents are kept; otherwise the buffer starts empty.
    pub fn open(path: &Path, recover: bool) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(!recover)
            .open(path)
            .map_err(|e| {
                log::error!("Failed to open staging file {}: {}", path.display(), e);
                LogError::PersistFileOpenFailed
            })?;
        let len = file.metadata()?.len();
        if len != MAX_PERSISTER_BUFFER_SIZE as u64 {
            file.set_len(MAX_PERSISTER_BUFFER_SIZE as u64)?;
        }

        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            log::error!("Failed to map staging file {}: {}", path.display(), e);
            LogError::PersistMmapFailed
        })?;
        let mut staging = StagingBuffer {
            path: path.to_path_buf(),
            map,
        };

        if !recover {
            staging.set_offset(0);
        } else if staging.offset() > Self::capacity() {
            log::warn!(
                "Staging file {} has invalid offset {}, discarding contents",
                path.display(),
                staging.offset()
            );
            staging.set_offset(0);
        }
        Ok(staging)
    }

    /// Usable bytes, excluding the offset header.
    pub fn capacity() -> usize {
        MAX_PERSISTER_BUFFER_SIZE - OFFSET_LEN
    }

    pub fn offset(&self) -> usize {
        let mut b = [0u8; OFFSET_LEN];
        b.copy_from_slice(&self.map[..OFFSET_LEN]);
        u32::from_le_bytes(b) as usize
    }

    fn set_offset(&mut self, offset: usize) {
        self.map[..OFFSET_LEN].copy_from_slice(&(offset as u32).to_le_bytes());
    }

    pub fn remaining(&self) -> usize {
        Self::capacity() - self.offset()
    }

    pub fn is_empty(&self) -> bool {
        self.offset() == 0
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Copy as much of `data` as fits.  Returns the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let offset = self.offset();
        let n = data.len().min(self.remaining());
        let start = OFFSET_LEN + offset;
        self.map[start..start + n].copy_from_slice(&data[..n]);
        self.set_offset(offset + n);
        n
    }

    /// Staged bytes.
    pub fn data(&self) -> &[u8] {
        &self.map[OFFSET_LEN..OFFSET_LEN + self.offset()]
    }

    pub fn clear(&mut self) {
        self.set_offset(0);
    }

    pub fn sync(&self) -> Result<(), LogError> {
        self.map.flush().map_err(|e| {
            log::warn!("Failed to sync staging file {}: {}", self.path.display(), e);
            LogError::PersistMmapFailed
        })
    }

    /// Unmap and delete the backing file.
    pub fn remove(self) {
        let path = self.path.clone();
        drop(self.map);
        if let Err(e) = fs::remove_file(&path) {
            log::debug!("Failed to remove staging file {}: {}", path.display(), e);
        }
    }
}
