//! Size-bounded rotating output files.
//!
//! Output goes to `<prefix>.<NNN>.<YYYYmmdd-HHMMSS><suffix>` where `NNN`
//! is the file index modulo 1000.  A file is opened lazily on the first
//! write after construction or after the previous file was finished, and
//! finished once it reaches the configured size.  Before opening index
//! `i >= max_file_num` the file with index `i - max_file_num` is deleted,
//! so at most `max_file_num` files exist for a job.

use super::recovery::PersistRecoveryInfo;
use crate::error::LogError;
use crate::protocol::control::PersistStartMsg;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const INDEX_MODULUS: u32 = 1000;

pub struct LogPersisterRotator {
    prefix: PathBuf,
    suffix: &'static str,
    max_file_size: u64,
    max_file_num: u32,
    /// Index the next opened file gets.
    next_index: u32,
    current: Option<File>,
    current_size: u64,
    info_path: PathBuf,
    msg: PersistStartMsg,
}

impl LogPersisterRotator {
    pub fn new(msg: &PersistStartMsg, suffix: &'static str, info_path: PathBuf, next_index: u32) -> Self {
        LogPersisterRotator {
            prefix: PathBuf::from(&msg.file_path),
            suffix,
            max_file_size: msg.file_size as u64,
            max_file_num: msg.file_num,
            next_index,
            current: None,
            current_size: 0,
            info_path,
            msg: msg.clone(),
        }
    }

    /// Index the next opened file will get.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn input(&mut self, data: &[u8]) -> Result<(), LogError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.current.is_none() {
            self.open_next()?;
        }
        let Some(file) = self.current.as_mut() else {
            return Err(LogError::PersistFileOpenFailed);
        };
        file.write_all(data).map_err(|e| {
            log::error!("Failed to write {}: {}", self.prefix.display(), e);
            LogError::PersistFileOpenFailed
        })?;
        self.current_size += data.len() as u64;
        if self.current_size >= self.max_file_size {
            self.finish_input();
        }
        Ok(())
    }

    /// Close the current file; the next [`input`](Self::input) opens a new one.
    pub fn finish_input(&mut self) {
        if let Some(mut file) = self.current.take() {
            if let Err(e) = file.flush().and_then(|_| file.sync_data()) {
                log::warn!("Failed to sync {}: {}", self.prefix.display(), e);
            }
        }
        self.current_size = 0;
    }

    fn file_stem(&self, index: u32) -> String {
        let base = self
            .prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}.{:03}.", base, index % INDEX_MODULUS)
    }

    fn dir(&self) -> &Path {
        match self.prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    fn remove_index(&self, index: u32) {
        let stem = self.file_stem(index);
        let Ok(entries) = fs::read_dir(self.dir()) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if entry.file_name().to_string_lossy().starts_with(&stem) {
                log::debug!("Rotating out {}", entry.path().display());
                if let Err(e) = fs::remove_file(entry.path()) {
                    log::warn!("Failed to remove {}: {}", entry.path().display(), e);
                }
            }
        }
    }

    fn open_next(&mut self) -> Result<(), LogError> {
        let index = self.next_index;
        if index >= self.max_file_num {
            self.remove_index(index - self.max_file_num);
        }

        let name = format!(
            "{}{}{}",
            self.file_stem(index),
            Local::now().format("%Y%m%d-%H%M%S"),
            self.suffix
        );
        let path = self.dir().join(name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                log::error!("Failed to open {}: {}", path.display(), e);
                LogError::PersistFileOpenFailed
            })?;
        log::debug!("Persisting to {}", path.display());

        self.current = Some(file);
        self.current_size = 0;
        self.next_index = index.wrapping_add(1);

        let info = PersistRecoveryInfo {
            index,
            msg: self.msg.clone(),
        };
        if let Err(e) = info.write_to(&self.info_path) {
            log::warn!(
                "Failed to write recovery info {}: {}",
                self.info_path.display(),
                e
            );
        }
        Ok(())
    }
}

impl Drop for LogPersisterRotator {
    fn drop(&mut self) {
        self.finish_input();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(dir: &Path, size: u32, num: u32) -> PersistStartMsg {
        PersistStartMsg {
            job_id: 1,
            compress_alg: 0,
            types: 0b1000,
            levels: 0xF8,
            file_size: size,
            file_num: num,
            file_path: dir.join("hilog").to_string_lossy().into_owned(),
        }
    }

    fn outputs(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("hilog."))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_lazy_open_and_naming() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("info");
        let mut r = LogPersisterRotator::new(&msg(dir.path(), 100, 3), ".log", info.clone(), 0);
        assert!(outputs(dir.path()).is_empty());
        r.input(b"abc").unwrap();
        let files = outputs(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("hilog.000."));
        assert!(files[0].ends_with(".log"));
        assert_eq!(PersistRecoveryInfo::read_from(&info).unwrap().index, 0);
    }

    #[test]
    fn test_rotates_at_size_and_caps_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut r =
            LogPersisterRotator::new(&msg(dir.path(), 10, 3), ".log", dir.path().join("info"), 0);
        for _ in 0..5 {
            r.input(&[b'x'; 10]).unwrap();
        }
        let files = outputs(dir.path());
        assert_eq!(files.len(), 3);
        assert!(files[0].starts_with("hilog.002."));
        assert!(files[1].starts_with("hilog.003."));
        assert!(files[2].starts_with("hilog.004."));
        assert_eq!(r.next_index(), 5);
    }

    #[test]
    fn test_finish_input_forces_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = LogPersisterRotator::new(
            &msg(dir.path(), 1 << 20, 10),
            ".gz",
            dir.path().join("info"),
            7,
        );
        r.input(b"a").unwrap();
        r.finish_input();
        r.input(b"b").unwrap();
        let files = outputs(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with("hilog.007."));
        assert!(files[1].starts_with("hilog.008."));
    }

    #[test]
    fn test_index_wraps_at_modulus() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = LogPersisterRotator::new(
            &msg(dir.path(), 1, 2),
            ".log",
            dir.path().join("info"),
            999,
        );
        r.input(b"a").unwrap();
        r.input(b"b").unwrap();
        let files = outputs(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with("hilog.000."));
        assert!(files[1].starts_with("hilog.999."));
    }
}
