//! Persistence: draining the buffer into compressed rotating files.
//!
//! - [`compress`]: none/zlib/zstd strategies behind [`compress::LogCompress`]
//! - [`staging`]: the memory-mapped staging buffer
//! - [`rotator`]: numbered output files and count limit
//! - [`recovery`]: checksummed sidecar metadata
//! - [`persister`]: one job and its drain thread
//!
//! [`PersistRegistry`] tracks all jobs of the daemon.

pub mod compress;
pub mod persister;
pub mod recovery;
pub mod rotator;
pub mod staging;

use crate::buffer::LogBuffer;
use crate::error::{LogError, result_code};
use crate::protocol::control::{JobResult, PersistStartMsg};
use parking_lot::ReentrantMutex;
use persister::{LogPersister, PersisterState};
use recovery::PersistRecoveryInfo;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// All persist jobs of the daemon.
///
/// The lock is reentrant: a control request may stop jobs while it is
/// itself running under the registry lock.  The `RefCell` borrow is never
/// held across calls into a job.
pub struct PersistRegistry {
    meta_dir: PathBuf,
    buffer: Arc<LogBuffer>,
    jobs: ReentrantMutex<RefCell<Vec<Arc<LogPersister>>>>,
}

impl PersistRegistry {
    pub fn new(meta_dir: &Path, buffer: Arc<LogBuffer>) -> Self {
        PersistRegistry {
            meta_dir: meta_dir.to_path_buf(),
            buffer,
            jobs: ReentrantMutex::new(RefCell::new(Vec::new())),
        }
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    fn conflicts(&self, msg: &PersistStartMsg) -> bool {
        let jobs = self.jobs.lock();
        let found = jobs
            .borrow()
            .iter()
            .any(|j| j.job_id() == msg.job_id || j.msg().file_path == msg.file_path);
        found
    }

    /// Validate, initialize and start a new job.
    pub fn start(&self, msg: &PersistStartMsg) -> Result<(), LogError> {
        self.launch(msg, None)
    }

    fn launch(
        &self,
        msg: &PersistStartMsg,
        recovery: Option<&PersistRecoveryInfo>,
    ) -> Result<(), LogError> {
        let guard = self.jobs.lock();
        self.reap_failed();
        if self.conflicts(msg) {
            log::warn!(
                "Persist job {} conflicts with a running job ({})",
                msg.job_id,
                msg.file_path
            );
            return Err(LogError::PersistTaskExists);
        }
        let job = LogPersister::init(msg, recovery, &self.meta_dir, Arc::clone(&self.buffer))?;
        if let Err(e) = job.start() {
            if let Err(de) = job.deinit(true) {
                log::warn!("Persist job {} cleanup after failed start: {}", msg.job_id, de);
            }
            return Err(e);
        }
        guard.borrow_mut().push(job);
        Ok(())
    }

    /// Stop and forget a job, deleting its recovery files.  Job id `0`
    /// stops every job.
    pub fn kill(&self, job_id: u32) -> Result<Vec<JobResult>, LogError> {
        self.reap_failed();
        let victims: Vec<Arc<LogPersister>> = {
            let guard = self.jobs.lock();
            let mut jobs = guard.borrow_mut();
            let (kill, keep): (Vec<_>, Vec<_>) = jobs
                .drain(..)
                .partition(|j| job_id == 0 || j.job_id() == job_id);
            *jobs = keep;
            kill
        };
        if victims.is_empty() {
            return Err(LogError::JobNotFound);
        }
        Ok(victims
            .iter()
            .map(|j| JobResult {
                job_id: j.job_id(),
                result: result_code(&j.deinit(true)),
            })
            .collect())
    }

    /// Parameters of every running job.
    pub fn query(&self) -> Vec<PersistStartMsg> {
        self.reap_failed();
        let guard = self.jobs.lock();
        let msgs = guard.borrow().iter().map(|j| j.msg().clone()).collect();
        msgs
    }

    pub fn len(&self) -> usize {
        self.reap_failed();
        let guard = self.jobs.lock();
        let n = guard.borrow().len();
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop jobs whose drain thread died on an I/O error, deleting their
    /// recovery files.  Returns the number of jobs dropped.
    pub fn reap_failed(&self) -> usize {
        let failed: Vec<Arc<LogPersister>> = {
            let guard = self.jobs.lock();
            let mut jobs = guard.borrow_mut();
            let (failed, keep): (Vec<_>, Vec<_>) = jobs
                .drain(..)
                .partition(|j| j.state() == PersisterState::Failed);
            *jobs = keep;
            failed
        };
        for job in &failed {
            log::warn!("Removing failed persist job {} ({})", job.job_id(), job.msg().file_path);
            if let Err(e) = job.deinit(true) {
                log::debug!("Persist job {} cleanup: {}", job.job_id(), e);
            }
        }
        failed.len()
    }

    /// Resume every job with a valid recovery file in the meta directory.
    /// Corrupt files are removed together with their staging buffer.
    /// Returns the number of resumed jobs.
    pub fn recover_all(&self) -> usize {
        let mut resumed = 0;
        for path in recovery::scan_info_files(&self.meta_dir) {
            let info = match PersistRecoveryInfo::read_from(&path) {
                Ok(info) => info,
                Err(e) => {
                    log::warn!("Skipping recovery file {}: {}", path.display(), e);
                    discard_job_files(&self.meta_dir, &path);
                    continue;
                }
            };
            match self.launch(&info.msg, Some(&info)) {
                Ok(()) => {
                    log::info!("Recovered persist job {}", info.msg.job_id);
                    resumed += 1;
                }
                Err(e) => log::warn!("Failed to recover persist job {}: {}", info.msg.job_id, e),
            }
        }
        resumed
    }

    /// Stop every job, keeping recovery files so they resume on restart.
    pub fn stop_all(&self) {
        let jobs: Vec<Arc<LogPersister>> = {
            let guard = self.jobs.lock();
            let drained = guard.borrow_mut().drain(..).collect();
            drained
        };
        for job in jobs {
            if let Err(e) = job.deinit(false) {
                log::warn!("Persist job {} did not stop cleanly: {}", job.job_id(), e);
            }
        }
    }
}

fn discard_job_files(meta_dir: &Path, info: &Path) {
    remove_quietly(info);
    let id = info
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(recovery::INFO_FILE_PREFIX))
        .and_then(|n| n.strip_suffix(recovery::INFO_FILE_SUFFIX))
        .and_then(|n| n.parse::<u32>().ok());
    if let Some(id) = id {
        remove_quietly(&recovery::buffer_path(meta_dir, id));
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::debug!("Failed to remove {}: {}", path.display(), e);
    }
}
