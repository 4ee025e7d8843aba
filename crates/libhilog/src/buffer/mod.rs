//! In-memory log buffer shared by the collector and every reader.
//!
//! Records live in two queues: one for app/init/core/prerelease records
//! and one dedicated to kernel messages.  Each record gets a sequence
//! number from a buffer-wide counter, and queues are ordered maps keyed by
//! that number.  A reader's cursor is simply "the next sequence number to
//! look at" in one queue, so a cursor can never dangle: evicting the
//! record it points at leaves the cursor addressing the eviction's
//! successor.
//!
//! Per-type capacity is enforced on insert.  When appending would exceed
//! a type's cap, the oldest records of that same type are evicted until
//! its usage drops to `(1 - DROP_RATIO) * cap`.
//!
//! ## Locking
//!
//! - `state` (RwLock): queues and size counters.  Shared for queries,
//!   exclusive for insert/delete/resize.
//! - `readers` (RwLock): reader registry.  Insert only touches it when a
//!   cursor needs fixing after eviction, or to collect notification
//!   callbacks once the state lock has been released.
//! - each reader's cursor (Mutex): only its owner and eviction fixups
//!   touch it.
//! - `stats` (Mutex): counters, decoupled from `state` so readers under the
//!   shared lock can still update them.
//!
//! Lock order is always `state` → `readers` → cursor → `stats`.

pub mod stats;

use crate::error::LogError;
use crate::filter::{QueryCondition, log_match_filter};
use crate::lock_ext::{CondvarExt, MutexExt, RwLockExt};
use crate::log_entry::{LOG_TYPE_MAX, LogEntry, LogType};
use stats::{Statistics, StatsInfo};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

pub const MIN_BUFFER_SIZE: usize = 64 * 1024;
pub const MAX_BUFFER_SIZE: usize = 1 << 30;
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;
pub const DROP_RATIO: f64 = 0.05;

pub type ReaderId = u64;

/// Invoked on every insert into the reader's queue.  Must not block and
/// must not call back into the buffer.
pub type NewDataCallback = Box<dyn Fn() + Send + Sync>;

/// Wakeup flag set by a reader's callback and awaited by its consumer.
#[derive(Debug, Default)]
pub struct DataSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl DataSignal {
    pub fn notify(&self) {
        *self.pending.lock_poisoned() = true;
        self.cond.notify_all();
    }

    /// Block until notified or `timeout` elapses.  Returns whether a
    /// notification was pending, and clears it.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock_poisoned();
        if !*pending {
            pending = self.cond.wait_timeout_poisoned(pending, timeout);
        }
        std::mem::take(&mut *pending)
    }

    /// A buffer callback that notifies this signal.
    pub fn callback(self: &Arc<Self>) -> NewDataCallback {
        let signal = Arc::clone(self);
        Box::new(move || signal.notify())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Hilog = 0,
    Kmsg = 1,
}

impl QueueKind {
    pub fn of(t: LogType) -> QueueKind {
        if t == LogType::Kmsg {
            QueueKind::Kmsg
        } else {
            QueueKind::Hilog
        }
    }

    fn for_filter(filter: &QueryCondition) -> QueueKind {
        if filter.wants_kmsg_queue() {
            QueueKind::Kmsg
        } else {
            QueueKind::Hilog
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LogQueue {
    entries: BTreeMap<u64, LogEntry>,
    /// Sequence numbers per type, oldest first.
    by_type: [VecDeque<u64>; LOG_TYPE_MAX],
}

struct BufferState {
    queues: [LogQueue; 2],
    next_seq: u64,
    size_by_type: [usize; LOG_TYPE_MAX],
    max_size_by_type: [usize; LOG_TYPE_MAX],
    total_size: usize,
}

/// Records removed from a queue, kept for statistics and cursor fixups.
#[derive(Default)]
struct Evicted {
    seqs: Vec<u64>,
    records: Vec<(LogType, u32, usize)>,
    bytes: usize,
}

impl BufferState {
    fn queue(&self, kind: QueueKind) -> &LogQueue {
        &self.queues[kind as usize]
    }

    /// Evict the oldest records of `t` until its usage is at most `target`.
    fn evict_type_until(&mut self, t: LogType, target: usize, out: &mut Evicted) {
        let queue = &mut self.queues[QueueKind::of(t) as usize];
        while self.size_by_type[t.index()] > target {
            let Some(seq) = queue.by_type[t.index()].pop_front() else {
                break;
            };
            if let Some(entry) = queue.entries.remove(&seq) {
                let len = entry.len();
                self.size_by_type[t.index()] -= len;
                self.total_size -= len;
                out.seqs.push(seq);
                out.records.push((t, entry.domain, len));
                out.bytes += len;
            }
        }
    }

    /// First sequence number at or after `seq` still present in `kind`.
    fn successor(&self, kind: QueueKind, seq: u64) -> u64 {
        self.queue(kind)
            .entries
            .range(seq..)
            .next()
            .map(|(s, _)| *s)
            .unwrap_or(self.next_seq)
    }
}

fn drop_target(cap: usize) -> usize {
    (cap as f64 * (1.0 - DROP_RATIO)) as usize
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct Cursor {
    queue: QueueKind,
    next: u64,
}

struct BufferReader {
    /// `None` until the first query binds the reader to a queue.
    cursor: Mutex<Option<Cursor>>,
    on_new_data: Option<NewDataCallback>,
}

// ---------------------------------------------------------------------------
// LogBuffer
// ---------------------------------------------------------------------------

pub struct LogBuffer {
    state: RwLock<BufferState>,
    readers: RwLock<HashMap<ReaderId, Arc<BufferReader>>>,
    next_reader_id: AtomicU64,
    stats: Mutex<Statistics>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        LogBuffer {
            state: RwLock::new(BufferState {
                queues: [LogQueue::default(), LogQueue::default()],
                next_seq: 0,
                size_by_type: [0; LOG_TYPE_MAX],
                max_size_by_type: [DEFAULT_BUFFER_SIZE; LOG_TYPE_MAX],
                total_size: 0,
            }),
            readers: RwLock::new(HashMap::new()),
            next_reader_id: AtomicU64::new(1),
            stats: Mutex::new(Statistics::default()),
        }
    }

    /// Store a record.  Returns the number of bytes accounted for it, or
    /// `0` if the record violates the tag/length limits.
    pub fn insert(&self, entry: LogEntry) -> usize {
        if !entry.is_valid() {
            log::debug!(
                "Rejecting record with tag length {} and total length {}",
                entry.tag.len(),
                entry.len()
            );
            return 0;
        }
        let len = entry.len();
        let t = entry.log_type;
        let domain = entry.domain;
        let kind = QueueKind::of(t);
        let mut evicted = Evicted::default();

        {
            let mut state = self.state.write_poisoned();
            let cap = state.max_size_by_type[t.index()];
            if state.size_by_type[t.index()] + len > cap {
                state.evict_type_until(t, drop_target(cap), &mut evicted);
                self.fix_cursors(&state, kind, &evicted.seqs);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let queue = &mut state.queues[kind as usize];
            queue.entries.insert(seq, entry);
            queue.by_type[t.index()].push_back(seq);
            state.size_by_type[t.index()] += len;
            state.total_size += len;
        }

        {
            let mut stats = self.stats.lock_poisoned();
            for &(et, ed, elen) in &evicted.records {
                stats.on_evict(et, ed, elen);
            }
            stats.on_insert(t, domain, len);
        }

        self.notify(kind);
        len
    }

    /// Advance `reader_id`'s cursor to the next record matching `filter`
    /// and hand it to `on_found`.  Returns `Ok(false)` once the cursor
    /// reaches the end of its queue without a match.
    ///
    /// The reference passed to `on_found` is only valid for the duration of
    /// the call; the shared lock is held meanwhile.
    pub fn query<F>(
        &self,
        filter: &QueryCondition,
        reader_id: ReaderId,
        on_found: F,
    ) -> Result<bool, LogError>
    where
        F: FnOnce(&LogEntry),
    {
        let state = self.state.read_poisoned();
        let reader = self.reader(reader_id)?;
        let mut slot = reader.cursor.lock_poisoned();
        let queue = QueueKind::for_filter(filter);
        if let Some(c) = slot.as_ref()
            && c.queue != queue
        {
            log::debug!("Reader {} moves from {:?} to {:?} queue", reader_id, c.queue, queue);
            *slot = None;
        }
        let cursor = slot.get_or_insert(Cursor { queue, next: 0 });

        let mut observed = Vec::new();
        let mut found = None;
        for (&seq, entry) in state.queue(cursor.queue).entries.range(cursor.next..) {
            cursor.next = seq + 1;
            observed.push((entry.log_type, entry.domain, entry.len()));
            if log_match_filter(filter, entry) {
                found = Some(entry);
                break;
            }
        }
        drop(slot);

        {
            let mut stats = self.stats.lock_poisoned();
            for (t, d, len) in observed {
                stats.on_observe(t, d, len);
            }
        }

        match found {
            Some(entry) => {
                on_found(entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Register a reader.  Its cursor binds lazily on the first query and
    /// restarts from the head of the other queue when a later filter
    /// selects a different one.
    pub fn create_buf_reader(&self, on_new_data: Option<NewDataCallback>) -> ReaderId {
        let id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
        let reader = Arc::new(BufferReader {
            cursor: Mutex::new(None),
            on_new_data,
        });
        self.readers.write_poisoned().insert(id, reader);
        log::debug!("Created buffer reader {}", id);
        id
    }

    pub fn remove_buf_reader(&self, reader_id: ReaderId) -> Result<(), LogError> {
        match self.readers.write_poisoned().remove(&reader_id) {
            Some(_) => {
                log::debug!("Removed buffer reader {}", reader_id);
                Ok(())
            }
            None => Err(LogError::ReaderNotFound),
        }
    }

    /// Drop every record of `t`.  Returns the bytes removed.
    pub fn delete(&self, t: LogType) -> usize {
        let mut evicted = Evicted::default();
        {
            let mut state = self.state.write_poisoned();
            state.evict_type_until(t, 0, &mut evicted);
            self.fix_cursors(&state, QueueKind::of(t), &evicted.seqs);
        }
        let mut stats = self.stats.lock_poisoned();
        for &(et, ed, elen) in &evicted.records {
            stats.on_evict(et, ed, elen);
        }
        evicted.bytes
    }

    pub fn set_buff_len(&self, t: LogType, size: usize) -> Result<(), LogError> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&size) {
            return Err(LogError::InvalidBufferSize);
        }
        let mut evicted = Evicted::default();
        {
            let mut state = self.state.write_poisoned();
            state.max_size_by_type[t.index()] = size;
            if state.size_by_type[t.index()] > size {
                state.evict_type_until(t, drop_target(size), &mut evicted);
                self.fix_cursors(&state, QueueKind::of(t), &evicted.seqs);
            }
        }
        let mut stats = self.stats.lock_poisoned();
        for &(et, ed, elen) in &evicted.records {
            stats.on_evict(et, ed, elen);
        }
        log::info!("Buffer size of {} set to {}", t.name(), size);
        Ok(())
    }

    pub fn get_buff_len(&self, t: LogType) -> usize {
        self.state.read_poisoned().max_size_by_type[t.index()]
    }

    /// Bytes currently held for `t`.
    pub fn size_by_type(&self, t: LogType) -> usize {
        self.state.read_poisoned().size_by_type[t.index()]
    }

    pub fn total_size(&self) -> usize {
        self.state.read_poisoned().total_size
    }

    /// Count lines rejected before reaching the buffer.
    pub fn count_dropped(&self, t: LogType, domain: u32, lines: u64) {
        self.stats.lock_poisoned().on_dropped(t, domain, lines);
    }

    pub fn get_statistic_info_by_log(&self, t: LogType) -> StatsInfo {
        self.stats.lock_poisoned().by_type(t)
    }

    pub fn get_statistic_info_by_domain(&self, domain: u32) -> StatsInfo {
        self.stats.lock_poisoned().by_domain(domain)
    }

    pub fn clear_statistic_info_by_log(&self, t: LogType) {
        self.stats.lock_poisoned().clear_type(t);
    }

    pub fn clear_statistic_info_by_domain(&self, domain: u32) {
        self.stats.lock_poisoned().clear_domain(domain);
    }

    // ---------------------------------------------------------------
    // Internal helpers
    // ---------------------------------------------------------------

    fn reader(&self, reader_id: ReaderId) -> Result<Arc<BufferReader>, LogError> {
        self.readers
            .read_poisoned()
            .get(&reader_id)
            .cloned()
            .ok_or(LogError::ReaderNotFound)
    }

    /// Move cursors that addressed an evicted record onto its successor.
    /// Called with the state write lock held.
    fn fix_cursors(&self, state: &BufferState, kind: QueueKind, evicted: &[u64]) {
        if evicted.is_empty() {
            return;
        }
        let readers = self.readers.read_poisoned();
        for reader in readers.values() {
            let mut slot = reader.cursor.lock_poisoned();
            if let Some(cursor) = slot.as_mut()
                && cursor.queue == kind
                && evicted.binary_search(&cursor.next).is_ok()
            {
                cursor.next = state.successor(kind, cursor.next);
            }
        }
    }

    fn notify(&self, kind: QueueKind) {
        let targets: Vec<Arc<BufferReader>> = {
            let readers = self.readers.read_poisoned();
            readers
                .values()
                .filter(|r| r.on_new_data.is_some())
                .filter(|r| match *r.cursor.lock_poisoned() {
                    Some(c) => c.queue == kind,
                    None => true,
                })
                .cloned()
                .collect()
        };
        for reader in targets {
            if let Some(cb) = &reader.on_new_data {
                cb();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_entry::LogLevel;
    use std::sync::atomic::AtomicUsize;

    fn record(t: LogType, content: &str) -> LogEntry {
        LogEntry::new(t, LogLevel::Info, 0xD001100, "T", content)
    }

    fn next_content(buf: &LogBuffer, filter: &QueryCondition, id: ReaderId) -> Option<String> {
        let mut out = None;
        let found = buf
            .query(filter, id, |e| out = Some(e.content.clone()))
            .unwrap();
        assert_eq!(found, out.is_some());
        out
    }

    #[test]
    fn test_insert_rejects_invalid() {
        let buf = LogBuffer::new();
        let mut e = record(LogType::Core, "x");
        e.tag = "t".repeat(40);
        assert_eq!(buf.insert(e), 0);
        assert_eq!(buf.insert(record(LogType::Core, &"x".repeat(2000))), 0);
        assert_eq!(buf.total_size(), 0);
    }

    #[test]
    fn test_insert_returns_len() {
        let buf = LogBuffer::new();
        let e = record(LogType::Core, "hello");
        let len = e.len();
        assert_eq!(buf.insert(e), len);
        assert_eq!(buf.size_by_type(LogType::Core), len);
        assert_eq!(buf.get_statistic_info_by_log(LogType::Core).lines, 1);
    }

    #[test]
    fn test_capacity_invariant() {
        let buf = LogBuffer::new();
        buf.set_buff_len(LogType::Core, MIN_BUFFER_SIZE).unwrap();
        let payload = "p".repeat(500);
        let one = record(LogType::Core, &payload).len();
        let mut evicted_once = false;
        for _ in 0..1000 {
            let before = buf.size_by_type(LogType::Core);
            buf.insert(record(LogType::Core, &payload));
            let after = buf.size_by_type(LogType::Core);
            assert!(after <= MIN_BUFFER_SIZE);
            if after < before {
                evicted_once = true;
                assert!(after <= drop_target(MIN_BUFFER_SIZE) + one);
            }
        }
        assert!(evicted_once);
    }

    #[test]
    fn test_eviction_only_touches_same_type() {
        let buf = LogBuffer::new();
        buf.set_buff_len(LogType::Core, MIN_BUFFER_SIZE).unwrap();
        buf.insert(record(LogType::App, "keep"));
        let app_size = buf.size_by_type(LogType::App);
        for _ in 0..500 {
            buf.insert(record(LogType::Core, &"c".repeat(500)));
        }
        assert_eq!(buf.size_by_type(LogType::App), app_size);

        let id = buf.create_buf_reader(None);
        let filter = QueryCondition::with_types(LogType::App.mask(), 0xFF);
        assert_eq!(next_content(&buf, &filter, id), Some("keep".to_string()));
    }

    #[test]
    fn test_cursor_moves_to_successor_after_eviction() {
        let buf = LogBuffer::new();
        buf.set_buff_len(LogType::Core, MIN_BUFFER_SIZE).unwrap();
        let filter = QueryCondition::all();
        let id = buf.create_buf_reader(None);

        let payload = "z".repeat(900);
        for i in 0..10 {
            buf.insert(record(LogType::Core, &format!("{}-{}", i, payload)));
        }
        // Bind and consume the first record; the cursor now sits on #1.
        let first = next_content(&buf, &filter, id).unwrap();
        assert!(first.starts_with("0-"));

        // Overflow the queue so #1 and many after it are evicted.
        let mut i = 10;
        while buf.get_statistic_info_by_log(LogType::Core).cache_len
            == buf.get_statistic_info_by_log(LogType::Core).len
        {
            buf.insert(record(LogType::Core, &format!("{}-{}", i, payload)));
            i += 1;
        }

        let next = next_content(&buf, &filter, id).unwrap();
        let n: usize = next.split('-').next().unwrap().parse().unwrap();
        assert!(n > 1, "reader should resume after the evicted range, got {}", n);

        // Everything that follows is in strict insertion order.
        let mut last = n;
        while let Some(c) = next_content(&buf, &filter, id) {
            let k: usize = c.split('-').next().unwrap().parse().unwrap();
            assert_eq!(k, last + 1);
            last = k;
        }
        assert_eq!(last, i - 1);
    }

    #[test]
    fn test_query_unknown_reader() {
        let buf = LogBuffer::new();
        let res = buf.query(&QueryCondition::all(), 99, |_| {});
        assert_eq!(res, Err(LogError::ReaderNotFound));
        assert_eq!(buf.remove_buf_reader(99), Err(LogError::ReaderNotFound));
    }

    #[test]
    fn test_query_skips_non_matching() {
        let buf = LogBuffer::new();
        let id = buf.create_buf_reader(None);
        buf.insert(record(LogType::Core, "a"));
        let mut warn = record(LogType::Core, "b");
        warn.level = LogLevel::Warn;
        buf.insert(warn);
        buf.insert(record(LogType::Core, "c"));

        let filter = QueryCondition::with_types(LogType::Core.mask(), LogLevel::Warn.mask());
        assert_eq!(next_content(&buf, &filter, id), Some("b".to_string()));
        assert_eq!(next_content(&buf, &filter, id), None);
        // Non-matching records were still observed.
        assert!(buf.get_statistic_info_by_log(LogType::Core).print_len > 0);
    }

    #[test]
    fn test_kmsg_queue_is_separate() {
        let buf = LogBuffer::new();
        buf.insert(record(LogType::Kmsg, "kernel"));
        buf.insert(record(LogType::Core, "user"));

        let k = buf.create_buf_reader(None);
        let kfilter = QueryCondition::with_types(LogType::Kmsg.mask(), 0xF8);
        assert_eq!(next_content(&buf, &kfilter, k), Some("kernel".to_string()));
        assert_eq!(next_content(&buf, &kfilter, k), None);

        let h = buf.create_buf_reader(None);
        assert_eq!(
            next_content(&buf, &QueryCondition::all(), h),
            Some("user".to_string())
        );
        assert_eq!(next_content(&buf, &QueryCondition::all(), h), None);
    }

    #[test]
    fn test_reader_follows_filter_to_other_queue() {
        let buf = LogBuffer::new();
        buf.insert(record(LogType::Core, "user"));
        buf.insert(record(LogType::Kmsg, "kernel"));

        let id = buf.create_buf_reader(None);
        let hfilter = QueryCondition::with_types(LogType::Core.mask(), 0xF8);
        let kfilter = QueryCondition::with_types(LogType::Kmsg.mask(), 0xF8);
        assert_eq!(next_content(&buf, &hfilter, id), Some("user".to_string()));
        assert_eq!(next_content(&buf, &kfilter, id), Some("kernel".to_string()));
        assert_eq!(next_content(&buf, &kfilter, id), None);

        buf.insert(record(LogType::Core, "later"));
        assert_eq!(next_content(&buf, &hfilter, id), Some("user".to_string()));
        assert_eq!(next_content(&buf, &hfilter, id), Some("later".to_string()));
    }

    #[test]
    fn test_delete() {
        let buf = LogBuffer::new();
        let id = buf.create_buf_reader(None);
        let a = record(LogType::App, "a");
        let alen = a.len();
        buf.insert(a);
        buf.insert(record(LogType::Core, "c"));
        assert_eq!(buf.delete(LogType::App), alen);
        assert_eq!(buf.size_by_type(LogType::App), 0);
        assert_eq!(buf.get_statistic_info_by_log(LogType::App).cache_len, 0);
        assert_eq!(
            next_content(&buf, &QueryCondition::all(), id),
            Some("c".to_string())
        );
        assert_eq!(buf.delete(LogType::App), 0);
        assert_eq!(LogType::try_from(2), Err(LogError::InvalidLogType));
    }

    #[test]
    fn test_buff_len_bounds() {
        let buf = LogBuffer::new();
        assert_eq!(buf.get_buff_len(LogType::App), DEFAULT_BUFFER_SIZE);
        assert_eq!(
            buf.set_buff_len(LogType::App, MIN_BUFFER_SIZE - 1),
            Err(LogError::InvalidBufferSize)
        );
        assert_eq!(
            buf.set_buff_len(LogType::App, MAX_BUFFER_SIZE + 1),
            Err(LogError::InvalidBufferSize)
        );
        buf.set_buff_len(LogType::App, MAX_BUFFER_SIZE).unwrap();
        assert_eq!(buf.get_buff_len(LogType::App), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_shrink_evicts() {
        let buf = LogBuffer::new();
        for _ in 0..400 {
            buf.insert(record(LogType::Init, &"i".repeat(500)));
        }
        assert!(buf.size_by_type(LogType::Init) > MIN_BUFFER_SIZE);
        buf.set_buff_len(LogType::Init, MIN_BUFFER_SIZE).unwrap();
        assert!(buf.size_by_type(LogType::Init) <= drop_target(MIN_BUFFER_SIZE));
    }

    #[test]
    fn test_notification_targets_matching_queue() {
        let buf = LogBuffer::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = buf.create_buf_reader(Some(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        })));
        // Unbound readers hear about everything.
        buf.insert(record(LogType::Kmsg, "k"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Once bound to the hilog queue, kernel inserts no longer notify.
        buf.query(&QueryCondition::all(), id, |_| {}).unwrap();
        buf.insert(record(LogType::Kmsg, "k2"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        buf.insert(record(LogType::Core, "c"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_data_signal() {
        let signal = Arc::new(DataSignal::default());
        assert!(!signal.wait(Duration::from_millis(10)));
        let buf = LogBuffer::new();
        buf.create_buf_reader(Some(signal.callback()));
        buf.insert(record(LogType::Core, "x"));
        assert!(signal.wait(Duration::from_millis(10)));
        assert!(!signal.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_domain_statistics() {
        let buf = LogBuffer::new();
        let mut e = record(LogType::Core, "x");
        e.domain = 0xD00ABCD;
        let len = e.len() as u64;
        buf.insert(e);
        buf.count_dropped(LogType::Core, 0xD00ABCD, 2);
        let s = buf.get_statistic_info_by_domain(0xD00ABCD);
        assert_eq!(s.len, len);
        assert_eq!(s.dropped, 2);
        buf.clear_statistic_info_by_domain(0xD00ABCD);
        let s = buf.get_statistic_info_by_domain(0xD00ABCD);
        assert_eq!(s.dropped, 0);
        assert_eq!(s.cache_len, len);
        buf.clear_statistic_info_by_log(LogType::Core);
        assert_eq!(buf.get_statistic_info_by_log(LogType::Core).lines, 0);
    }

    #[test]
    fn test_concurrent_insert_and_query() {
        let buf = Arc::new(LogBuffer::new());
        buf.set_buff_len(LogType::Core, MIN_BUFFER_SIZE).unwrap();
        let id = buf.create_buf_reader(None);
        let filter = QueryCondition::all();

        let writer = {
            let buf = Arc::clone(&buf);
            std::thread::spawn(move || {
                for i in 0..5000u32 {
                    buf.insert(record(LogType::Core, &format!("{:08}{}", i, "w".repeat(200))));
                }
            })
        };

        let mut last: Option<u32> = None;
        let mut seen = 0;
        loop {
            let done = writer.is_finished();
            let mut got = None;
            let found = buf
                .query(&filter, id, |e| got = Some(e.content[..8].parse::<u32>().unwrap()))
                .unwrap();
            if found {
                let n = got.unwrap();
                if let Some(prev) = last {
                    assert!(n > prev, "order violated: {} after {}", n, prev);
                }
                last = Some(n);
                seen += 1;
            } else if done {
                break;
            }
        }
        writer.join().unwrap();
        assert!(seen > 0);
        assert_eq!(last, Some(4999));
    }
}
