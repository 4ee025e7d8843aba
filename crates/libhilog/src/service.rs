//! Control-socket sessions.
//!
//! Each accepted connection gets a [`ServiceController`] running on its
//! own thread.  The controller owns one buffer reader for `NextRequest`
//! tailing; `LogQueryRequest` dumps use a temporary reader so they always
//! replay the whole buffer.

use crate::buffer::{DataSignal, LogBuffer, ReaderId};
use crate::error::{LogError, RET_SUCCESS, result_code};
use crate::filter::QueryCondition;
use crate::log_entry::{LogEntry, LogType, all_types_mask};
use crate::persist::PersistRegistry;
use crate::properties::Properties;
use crate::protocol::control::{
    ControlMessage, JobResult, MAX_MSG_LEN, QueryResponse, StatsTarget, TypeSize,
};
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Granularity at which a waiting `NextRequest` rechecks the stop flag.
pub const NEXT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one receive attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Data(usize),
    Timeout,
    Closed,
}

/// A packet-preserving, bidirectional channel to one client.
pub trait Connection: Send {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Received, LogError>;
    fn send(&mut self, data: &[u8]) -> Result<(), LogError>;
}

impl Connection for UnixDatagram {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Received, LogError> {
        match UnixDatagram::recv(self, buf) {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => Ok(Received::Data(n)),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(Received::Timeout)
            }
            Err(_) => Ok(Received::Closed),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LogError> {
        UnixDatagram::send(self, data)
            .map(|_| ())
            .map_err(|_| LogError::Failed)
    }
}

/// Daemon components a session needs.
pub struct ServiceContext {
    pub buffer: Arc<LogBuffer>,
    pub persist: Arc<PersistRegistry>,
    pub props: Arc<Properties>,
}

pub struct ServiceController<C: Connection> {
    conn: C,
    ctx: Arc<ServiceContext>,
    reader_id: ReaderId,
    signal: Arc<DataSignal>,
    stop: Arc<AtomicBool>,
}

fn types_in(mask: u16) -> Result<Vec<LogType>, LogError> {
    if mask & !all_types_mask() != 0 {
        return Err(LogError::InvalidLogType);
    }
    let mask = if mask == 0 { all_types_mask() } else { mask };
    Ok(LogType::from_mask(mask))
}

impl<C: Connection> ServiceController<C> {
    pub fn new(conn: C, ctx: Arc<ServiceContext>, stop: Arc<AtomicBool>) -> Self {
        let signal = Arc::new(DataSignal::default());
        let reader_id = ctx.buffer.create_buf_reader(Some(signal.callback()));
        ServiceController {
            conn,
            ctx,
            reader_id,
            signal,
            stop,
        }
    }

    /// Serve requests until the client disconnects or the daemon stops.
    pub fn communication_loop(&mut self) {
        let mut buf = vec![0u8; MAX_MSG_LEN];
        while !self.stop.load(Ordering::Acquire) {
            let n = match self.conn.recv(&mut buf) {
                Ok(Received::Data(n)) => n,
                Ok(Received::Timeout) => continue,
                Ok(Received::Closed) => break,
                Err(e) => {
                    log::debug!("Session receive failed: {}", e);
                    break;
                }
            };
            let res = match ControlMessage::decode(&buf[..n]) {
                Ok(msg) => self.handle(msg),
                Err(e) => {
                    log::debug!("Malformed control message: {}", e);
                    self.reply(ControlMessage::ErrorResponse { result: e.code() })
                }
            };
            if let Err(e) = res {
                log::debug!("Session send failed, closing: {}", e);
                break;
            }
        }
        log::debug!("Session for reader {} finished", self.reader_id);
    }

    fn reply(&mut self, msg: ControlMessage) -> Result<(), LogError> {
        self.conn.send(&msg.encode()?)
    }

    /// Dispatch one request.  Errors are I/O errors on the connection;
    /// request failures are reported to the client as result codes.
    pub fn handle(&mut self, msg: ControlMessage) -> Result<(), LogError> {
        use ControlMessage as M;
        match msg {
            M::LogQueryRequest(filter) => self.handle_query(filter),
            M::NextRequest(filter) => self.handle_next(filter),
            M::PersistStartRequest(start) => {
                let result = result_code(&self.ctx.persist.start(&start));
                self.reply(M::PersistStartResponse {
                    job_id: start.job_id,
                    result,
                })
            }
            M::PersistStopRequest { job_id } => {
                let results = match self.ctx.persist.kill(job_id) {
                    Ok(results) => results,
                    Err(e) => vec![JobResult {
                        job_id,
                        result: e.code(),
                    }],
                };
                self.reply(M::PersistStopResponse { results })
            }
            M::PersistQueryRequest => {
                let jobs = self.ctx.persist.query();
                self.reply(M::PersistQueryResponse {
                    result: RET_SUCCESS,
                    jobs,
                })
            }
            M::BufferSizeRequest { types } => {
                let reply = match types_in(types) {
                    Ok(types) => M::BufferSizeResponse {
                        result: RET_SUCCESS,
                        sizes: self.sizes(&types),
                    },
                    Err(e) => M::BufferSizeResponse {
                        result: e.code(),
                        sizes: Vec::new(),
                    },
                };
                self.reply(reply)
            }
            M::BufferResizeRequest { types, size } => {
                let reply = self.resize(types, size);
                self.reply(reply)
            }
            M::StatisticInfoQueryRequest(target) => {
                let reply = match target {
                    StatsTarget::Type(t) => match LogType::try_from(t) {
                        Ok(t) => M::StatisticInfoQueryResponse {
                            result: RET_SUCCESS,
                            info: self.ctx.buffer.get_statistic_info_by_log(t),
                        },
                        Err(e) => M::StatisticInfoQueryResponse {
                            result: e.code(),
                            info: Default::default(),
                        },
                    },
                    StatsTarget::Domain(d) => M::StatisticInfoQueryResponse {
                        result: RET_SUCCESS,
                        info: self.ctx.buffer.get_statistic_info_by_domain(d),
                    },
                };
                self.reply(reply)
            }
            M::StatisticInfoClearRequest(target) => {
                let res = match target {
                    StatsTarget::Type(t) => LogType::try_from(t)
                        .map(|t| self.ctx.buffer.clear_statistic_info_by_log(t)),
                    StatsTarget::Domain(d) => {
                        self.ctx.buffer.clear_statistic_info_by_domain(d);
                        Ok(())
                    }
                };
                self.reply(M::StatisticInfoClearResponse {
                    result: result_code(&res),
                })
            }
            M::LogClearRequest { types } => {
                let res = types_in(types).map(|types| {
                    for t in types {
                        let removed = self.ctx.buffer.delete(t);
                        log::debug!("Cleared {} bytes of {}", removed, t.name());
                    }
                });
                self.reply(M::LogClearResponse {
                    result: result_code(&res),
                })
            }
            other => {
                log::debug!("Unexpected control message {:?}", other.msg_type());
                self.reply(M::ErrorResponse {
                    result: LogError::InvalidRequestCommand.code(),
                })
            }
        }
    }

    fn sizes(&self, types: &[LogType]) -> Vec<TypeSize> {
        types
            .iter()
            .map(|&t| TypeSize {
                log_type: t as u8,
                size: self.ctx.buffer.get_buff_len(t) as u64,
            })
            .collect()
    }

    fn resize(&self, types: u16, size: u64) -> ControlMessage {
        let result = types_in(types).and_then(|types| {
            let size = usize::try_from(size).map_err(|_| LogError::InvalidBufferSize)?;
            for &t in &types {
                self.ctx.buffer.set_buff_len(t, size)?;
                if let Err(e) = self.ctx.props.set_buffer_size(t, size) {
                    log::warn!("Failed to store buffer size of {}: {}", t.name(), e);
                }
            }
            Ok(types)
        });
        match result {
            Ok(types) => ControlMessage::BufferResizeResponse {
                result: RET_SUCCESS,
                sizes: self.sizes(&types),
            },
            Err(e) => ControlMessage::BufferResizeResponse {
                result: e.code(),
                sizes: Vec::new(),
            },
        }
    }

    /// Stream every matching record currently buffered, then an end marker.
    fn handle_query(&mut self, filter: QueryCondition) -> Result<(), LogError> {
        if let Err(e) = filter.validate() {
            return self.reply(ControlMessage::ErrorResponse { result: e.code() });
        }
        let buffer = Arc::clone(&self.ctx.buffer);
        let reader = buffer.create_buf_reader(None);
        let res = loop {
            match next_match(&buffer, &filter, reader) {
                Ok(Some(entry)) => {
                    let msg = ControlMessage::LogQueryResponse(QueryResponse::attached(entry));
                    if let Err(e) = self.reply(msg) {
                        break Err(e);
                    }
                }
                Ok(None) => {
                    break self.reply(ControlMessage::LogQueryResponse(QueryResponse::none()));
                }
                Err(e) => break self.reply(ControlMessage::ErrorResponse { result: e.code() }),
            }
        };
        if let Err(e) = buffer.remove_buf_reader(reader) {
            log::warn!("Query reader {} already gone: {}", reader, e);
        }
        res
    }

    /// Send the next matching record, waiting for one if necessary.
    fn handle_next(&mut self, filter: QueryCondition) -> Result<(), LogError> {
        if let Err(e) = filter.validate() {
            return self.reply(ControlMessage::ErrorResponse { result: e.code() });
        }
        let mut waited = false;
        loop {
            match next_match(&self.ctx.buffer, &filter, self.reader_id) {
                Ok(Some(entry)) => {
                    if waited {
                        self.reply(ControlMessage::NewDataNotify)?;
                    }
                    return self.reply(ControlMessage::NextResponse(QueryResponse::attached(
                        entry,
                    )));
                }
                Ok(None) => {}
                Err(e) => return self.reply(ControlMessage::ErrorResponse { result: e.code() }),
            }
            if self.stop.load(Ordering::Acquire) {
                return self.reply(ControlMessage::NextResponse(QueryResponse::none()));
            }
            waited = true;
            self.signal.wait(NEXT_POLL_INTERVAL);
        }
    }
}

impl<C: Connection> Drop for ServiceController<C> {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.buffer.remove_buf_reader(self.reader_id) {
            log::debug!("Session reader {} already gone: {}", self.reader_id, e);
        }
    }
}

fn next_match(
    buffer: &LogBuffer,
    filter: &QueryCondition,
    reader: ReaderId,
) -> Result<Option<LogEntry>, LogError> {
    let mut found = None;
    buffer.query(filter, reader, |e| found = Some(e.clone()))?;
    Ok(found)
}
