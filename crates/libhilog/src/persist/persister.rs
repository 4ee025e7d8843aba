//! One persistence job.
//!
//! A job owns a buffer reader and a drain thread.  The thread pulls
//! matching records, formats them to text and appends the text to the
//! staging buffer; each time the staging buffer fills up its contents are
//! compressed and handed to the rotator.  When the reader runs dry the
//! thread sleeps on the reader's [`DataSignal`] for up to
//! [`PERSIST_WAIT`], so a stop request is noticed within that bound even
//! without new data.

use super::compress::{CompressAlg, LogCompress};
use super::recovery::{self, PersistRecoveryInfo, MAX_PATH_LEN};
use super::rotator::LogPersisterRotator;
use super::staging::StagingBuffer;
use crate::buffer::{DataSignal, LogBuffer, ReaderId};
use crate::error::LogError;
use crate::filter::QueryCondition;
use crate::lock_ext::MutexExt;
use crate::log_entry::{LogType, all_levels_mask, all_types_mask};
use crate::protocol::control::PersistStartMsg;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const PERSIST_WAIT: Duration = Duration::from_secs(5);

pub const MIN_PERSIST_FILE_SIZE: u32 = 64 * 1024;
pub const MAX_PERSIST_FILE_SIZE: u32 = 512 * 1024 * 1024;
pub const MIN_PERSIST_FILE_NUM: u32 = 2;
pub const MAX_PERSIST_FILE_NUM: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersisterState {
    Initialized,
    Running,
    Stopped,
    /// The drain thread hit an I/O error and exited.
    Failed,
}

/// Check a start request and fill in defaults for empty masks.
pub fn validate_start_msg(msg: &PersistStartMsg) -> Result<PersistStartMsg, LogError> {
    if msg.job_id == 0 {
        return Err(LogError::PersistJobIdInvalid);
    }
    if !(MIN_PERSIST_FILE_SIZE..=MAX_PERSIST_FILE_SIZE).contains(&msg.file_size) {
        return Err(LogError::PersistFileSizeInvalid);
    }
    if !(MIN_PERSIST_FILE_NUM..=MAX_PERSIST_FILE_NUM).contains(&msg.file_num) {
        return Err(LogError::PersistFileNumInvalid);
    }
    CompressAlg::try_from(msg.compress_alg)?;

    let path = Path::new(&msg.file_path);
    if msg.file_path.is_empty() || msg.file_path.ends_with('/') || path.file_name().is_none() {
        return Err(LogError::PersistFileNameInvalid);
    }
    if msg.file_path.len() >= MAX_PATH_LEN {
        return Err(LogError::PersistFilePathInvalid);
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(LogError::PersistFilePathInvalid);
    }

    let mut out = msg.clone();
    if out.types == 0 {
        out.types = all_types_mask() & !LogType::Kmsg.mask();
    } else if out.types & !all_types_mask() != 0 {
        return Err(LogError::InvalidLogType);
    }
    if out.levels == 0 {
        out.levels = all_levels_mask();
    } else if out.levels & !all_levels_mask() != 0 {
        return Err(LogError::InvalidLogLevel);
    }
    Ok(out)
}

/// Staging, compression and rotation for one job.
struct Sink {
    staging: StagingBuffer,
    compressor: Box<dyn LogCompress>,
    rotator: LogPersisterRotator,
    out: Vec<u8>,
}

impl Sink {
    fn write(&mut self, mut text: &[u8]) -> Result<(), LogError> {
        while !text.is_empty() {
            let n = self.staging.append(text);
            text = &text[n..];
            if self.staging.is_full() {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Compress whatever is staged and hand it to the rotator.
    fn flush(&mut self) -> Result<(), LogError> {
        if self.staging.is_empty() {
            return Ok(());
        }
        self.out.clear();
        self.compressor.compress(self.staging.data(), &mut self.out)?;
        self.rotator.input(&self.out)?;
        self.staging.clear();
        Ok(())
    }
}

pub struct LogPersister {
    msg: PersistStartMsg,
    filter: QueryCondition,
    meta_dir: PathBuf,
    buffer: Arc<LogBuffer>,
    reader_id: ReaderId,
    signal: Arc<DataSignal>,
    stop: AtomicBool,
    state: Mutex<PersisterState>,
    sink: Mutex<Option<Sink>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogPersister {
    /// Prepare a job from a start request, or resume one from its
    /// recovery info.  On recovery, bytes left in the staging file are
    /// flushed before anything new is written.
    pub fn init(
        msg: &PersistStartMsg,
        recovery: Option<&PersistRecoveryInfo>,
        meta_dir: &Path,
        buffer: Arc<LogBuffer>,
    ) -> Result<Arc<LogPersister>, LogError> {
        let msg = validate_start_msg(msg)?;
        let alg = CompressAlg::try_from(msg.compress_alg)?;
        if !meta_dir.is_dir() {
            log::error!("Persist meta directory {} missing", meta_dir.display());
            return Err(LogError::PersistDirOpenFailed);
        }

        let info_path = recovery::info_path(meta_dir, msg.job_id);
        let staging = StagingBuffer::open(
            &recovery::buffer_path(meta_dir, msg.job_id),
            recovery.is_some(),
        )?;
        let next_index = recovery.map(|r| r.index.wrapping_add(1)).unwrap_or(0);
        let rotator = LogPersisterRotator::new(&msg, alg.suffix(), info_path.clone(), next_index);

        let mut sink = Sink {
            staging,
            compressor: alg.compressor(),
            rotator,
            out: Vec::new(),
        };
        if recovery.is_some() && !sink.staging.is_empty() {
            log::info!(
                "Job {}: flushing {} staged bytes left from a previous run",
                msg.job_id,
                sink.staging.offset()
            );
            sink.flush()?;
        }
        PersistRecoveryInfo {
            index: next_index,
            msg: msg.clone(),
        }
        .write_to(&info_path)?;

        let signal = Arc::new(DataSignal::default());
        let reader_id = buffer.create_buf_reader(Some(signal.callback()));
        let filter = QueryCondition::with_types(msg.types, msg.levels);

        log::info!(
            "Persist job {} initialized: {} ({}, {} x {} bytes)",
            msg.job_id,
            msg.file_path,
            alg.name(),
            msg.file_num,
            msg.file_size
        );
        Ok(Arc::new(LogPersister {
            msg,
            filter,
            meta_dir: meta_dir.to_path_buf(),
            buffer,
            reader_id,
            signal,
            stop: AtomicBool::new(false),
            state: Mutex::new(PersisterState::Initialized),
            sink: Mutex::new(Some(sink)),
            thread: Mutex::new(None),
        }))
    }

    pub fn job_id(&self) -> u32 {
        self.msg.job_id
    }

    pub fn msg(&self) -> &PersistStartMsg {
        &self.msg
    }

    pub fn state(&self) -> PersisterState {
        *self.state.lock_poisoned()
    }

    /// Spawn the drain thread.  Starting a running job is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), LogError> {
        let mut state = self.state.lock_poisoned();
        match *state {
            PersisterState::Running => {
                log::info!("Persist job {} already running", self.msg.job_id);
                return Ok(());
            }
            PersisterState::Initialized => {}
            other => {
                log::warn!("Persist job {} cannot start from {:?}", self.msg.job_id, other);
                return Err(LogError::Failed);
            }
        }

        let job = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("persist-{}", self.msg.job_id))
            .spawn(move || job.drain_loop())
            .map_err(|e| {
                log::error!("Failed to spawn persist thread: {}", e);
                LogError::Failed
            })?;
        *self.thread.lock_poisoned() = Some(handle);
        *state = PersisterState::Running;
        Ok(())
    }

    fn drain_loop(&self) {
        log::debug!("Persist job {} draining", self.msg.job_id);
        if let Err(e) = self.drain() {
            log::error!("Persist job {} aborted: {}", self.msg.job_id, e);
            *self.state.lock_poisoned() = PersisterState::Failed;
            if let Err(e) = self.buffer.remove_buf_reader(self.reader_id) {
                log::debug!("Persist job {} reader already gone: {}", self.msg.job_id, e);
            }
        }
        log::debug!("Persist job {} drain loop exited", self.msg.job_id);
    }

    fn drain(&self) -> Result<(), LogError> {
        while !self.stop.load(Ordering::Acquire) {
            let mut text = None;
            let found = self
                .buffer
                .query(&self.filter, self.reader_id, |e| text = Some(e.format_lines()))?;
            if !found {
                self.signal.wait(PERSIST_WAIT);
                continue;
            }
            let Some(text) = text else { continue };
            let mut sink = self.sink.lock_poisoned();
            let Some(sink) = sink.as_mut() else {
                return Ok(());
            };
            sink.write(text.as_bytes())?;
        }
        Ok(())
    }

    /// Stop the drain thread, write out records it had not reached yet
    /// and push everything staged to disk.
    pub fn stop(&self) -> Result<(), LogError> {
        self.stop.store(true, Ordering::Release);
        self.signal.notify();
        if let Some(handle) = self.thread.lock_poisoned().take()
            && handle.join().is_err()
        {
            log::error!("Persist job {} thread panicked", self.msg.job_id);
        }

        let mut state = self.state.lock_poisoned();
        let was_running = *state == PersisterState::Running;
        *state = PersisterState::Stopped;
        let mut sink = self.sink.lock_poisoned();
        let Some(sink) = sink.as_mut() else {
            return Ok(());
        };
        let res = if was_running {
            self.catch_up(sink).and_then(|()| sink.flush())
        } else {
            sink.flush()
        };
        sink.rotator.finish_input();
        res
    }

    fn catch_up(&self, sink: &mut Sink) -> Result<(), LogError> {
        loop {
            let mut text = None;
            let found = self
                .buffer
                .query(&self.filter, self.reader_id, |e| text = Some(e.format_lines()))?;
            match text {
                Some(text) => sink.write(text.as_bytes())?,
                None if found => continue,
                None => return Ok(()),
            }
        }
    }

    /// Stop the job and release its reader.  With `remove_meta` the
    /// staging and recovery files are deleted so the job does not come
    /// back on restart; otherwise they are kept for recovery.
    pub fn deinit(&self, remove_meta: bool) -> Result<(), LogError> {
        let res = self.stop();
        if let Err(e) = self.buffer.remove_buf_reader(self.reader_id) {
            log::debug!("Persist job {} reader already gone: {}", self.msg.job_id, e);
        }
        let sink = self.sink.lock_poisoned().take();
        if remove_meta {
            if let Some(sink) = sink {
                sink.staging.remove();
            }
            let info = recovery::info_path(&self.meta_dir, self.msg.job_id);
            if let Err(e) = fs::remove_file(&info) {
                log::debug!("Failed to remove {}: {}", info.display(), e);
            }
        } else if let Some(sink) = sink
            && let Err(e) = sink.staging.sync()
        {
            log::warn!("Persist job {}: {}", self.msg.job_id, e);
        }
        log::info!("Persist job {} deinitialized", self.msg.job_id);
        res
    }
}
