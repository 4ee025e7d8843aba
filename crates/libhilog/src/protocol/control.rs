//! Control socket messages.
//!
//! Every message starts with a 4-byte header `{version:u8, msg_type:u8,
//! msg_len:u16}` where `msg_len` counts the payload bytes that follow.
//! Requests and responses are paired; unknown or malformed requests are
//! answered with [`ControlMessage::ErrorResponse`].

use super::{ByteReader, put_string, record};
use crate::buffer::stats::StatsInfo;
use crate::error::LogError;
use crate::filter::QueryCondition;
use crate::log_entry::LogEntry;

pub const CONTROL_VERSION: u8 = 0;
pub const MSG_HEADER_LEN: usize = 4;
pub const MAX_MSG_LEN: usize = MSG_HEADER_LEN + u16::MAX as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    LogQueryRequest = 1,
    LogQueryResponse = 2,
    NextRequest = 3,
    NextResponse = 4,
    NewDataNotify = 5,
    PersistStartRequest = 6,
    PersistStartResponse = 7,
    PersistStopRequest = 8,
    PersistStopResponse = 9,
    PersistQueryRequest = 10,
    PersistQueryResponse = 11,
    BufferSizeRequest = 12,
    BufferSizeResponse = 13,
    BufferResizeRequest = 14,
    BufferResizeResponse = 15,
    StatisticInfoQueryRequest = 16,
    StatisticInfoQueryResponse = 17,
    StatisticInfoClearRequest = 18,
    StatisticInfoClearResponse = 19,
    LogClearRequest = 20,
    LogClearResponse = 21,
    ErrorResponse = 22,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<MsgType> {
        use MsgType::*;
        Some(match v {
            1 => LogQueryRequest,
            2 => LogQueryResponse,
            3 => NextRequest,
            4 => NextResponse,
            5 => NewDataNotify,
            6 => PersistStartRequest,
            7 => PersistStartResponse,
            8 => PersistStopRequest,
            9 => PersistStopResponse,
            10 => PersistQueryRequest,
            11 => PersistQueryResponse,
            12 => BufferSizeRequest,
            13 => BufferSizeResponse,
            14 => BufferResizeRequest,
            15 => BufferResizeResponse,
            16 => StatisticInfoQueryRequest,
            17 => StatisticInfoQueryResponse,
            18 => StatisticInfoClearRequest,
            19 => StatisticInfoClearResponse,
            20 => LogClearRequest,
            21 => LogClearResponse,
            22 => ErrorResponse,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgHeader {
    pub version: u8,
    pub msg_type: u8,
    pub msg_len: u16,
}

impl MsgHeader {
    pub fn serialize(&self) -> [u8; MSG_HEADER_LEN] {
        let mut buf = [0u8; MSG_HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.msg_type;
        buf[2..4].copy_from_slice(&self.msg_len.to_le_bytes());
        buf
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, LogError> {
        let mut r = ByteReader::new(buf);
        Ok(MsgHeader {
            version: r.u8()?,
            msg_type: r.u8()?,
            msg_len: r.u16()?,
        })
    }
}

/// Discriminator on query responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SendId {
    /// No more data right now.
    None = 0,
    /// A record is attached.
    Attached = 1,
    /// Server-initiated: new data became available.
    NewData = 2,
}

impl SendId {
    fn from_u8(v: u8) -> Result<SendId, LogError> {
        match v {
            0 => Ok(SendId::None),
            1 => Ok(SendId::Attached),
            2 => Ok(SendId::NewData),
            _ => Err(LogError::InvalidMessageLength),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResponse {
    pub send_id: SendId,
    /// Present exactly when `send_id` is [`SendId::Attached`].
    pub entry: Option<LogEntry>,
}

impl QueryResponse {
    pub fn attached(entry: LogEntry) -> Self {
        QueryResponse {
            send_id: SendId::Attached,
            entry: Some(entry),
        }
    }

    pub fn none() -> Self {
        QueryResponse {
            send_id: SendId::None,
            entry: None,
        }
    }

    pub fn new_data() -> Self {
        QueryResponse {
            send_id: SendId::NewData,
            entry: None,
        }
    }
}

/// Parameters of a persist job, as requested and as reported back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistStartMsg {
    pub job_id: u32,
    /// Compression algorithm id (0 none, 1 zlib, 2 zstd).
    pub compress_alg: u8,
    pub types: u16,
    pub levels: u8,
    pub file_size: u32,
    pub file_num: u32,
    /// Output path prefix; rotated files get an index and timestamp appended.
    pub file_path: String,
}

/// Per-type buffer capacity entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeSize {
    pub log_type: u8,
    pub size: u64,
}

/// Outcome for one job in a stop response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: u32,
    pub result: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsTarget {
    Type(u8),
    Domain(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    LogQueryRequest(QueryCondition),
    LogQueryResponse(QueryResponse),
    NextRequest(QueryCondition),
    NextResponse(QueryResponse),
    /// Pushed while a client waits on a `NextRequest`; carries `SendId::NewData`.
    NewDataNotify,
    PersistStartRequest(PersistStartMsg),
    PersistStartResponse { job_id: u32, result: i32 },
    /// Job id 0 stops every job.
    PersistStopRequest { job_id: u32 },
    PersistStopResponse { results: Vec<JobResult> },
    PersistQueryRequest,
    PersistQueryResponse { result: i32, jobs: Vec<PersistStartMsg> },
    BufferSizeRequest { types: u16 },
    BufferSizeResponse { result: i32, sizes: Vec<TypeSize> },
    BufferResizeRequest { types: u16, size: u64 },
    BufferResizeResponse { result: i32, sizes: Vec<TypeSize> },
    StatisticInfoQueryRequest(StatsTarget),
    StatisticInfoQueryResponse { result: i32, info: StatsInfo },
    StatisticInfoClearRequest(StatsTarget),
    StatisticInfoClearResponse { result: i32 },
    LogClearRequest { types: u16 },
    LogClearResponse { result: i32 },
    ErrorResponse { result: i32 },
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

fn put_u32_list(buf: &mut Vec<u8>, list: &[u32]) {
    buf.push(list.len().min(u8::MAX as usize) as u8);
    for v in list.iter().take(u8::MAX as usize) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn get_u32_list(r: &mut ByteReader<'_>) -> Result<Vec<u32>, LogError> {
    let n = r.u8()? as usize;
    (0..n).map(|_| r.u32()).collect()
}

fn put_str_list(buf: &mut Vec<u8>, list: &[String]) {
    buf.push(list.len().min(u8::MAX as usize) as u8);
    for s in list.iter().take(u8::MAX as usize) {
        put_string(buf, s);
    }
}

fn get_str_list(r: &mut ByteReader<'_>) -> Result<Vec<String>, LogError> {
    let n = r.u8()? as usize;
    (0..n).map(|_| r.string()).collect()
}

fn put_condition(buf: &mut Vec<u8>, c: &QueryCondition) {
    buf.extend_from_slice(&c.types.to_le_bytes());
    buf.push(c.levels);
    put_u32_list(buf, &c.pids);
    put_u32_list(buf, &c.domains);
    put_str_list(buf, &c.tags);
    buf.extend_from_slice(&c.no_types.to_le_bytes());
    buf.push(c.no_levels);
    put_u32_list(buf, &c.no_pids);
    put_u32_list(buf, &c.no_domains);
    put_str_list(buf, &c.no_tags);
}

fn get_condition(r: &mut ByteReader<'_>) -> Result<QueryCondition, LogError> {
    Ok(QueryCondition {
        types: r.u16()?,
        levels: r.u8()?,
        pids: get_u32_list(r)?,
        domains: get_u32_list(r)?,
        tags: get_str_list(r)?,
        no_types: r.u16()?,
        no_levels: r.u8()?,
        no_pids: get_u32_list(r)?,
        no_domains: get_u32_list(r)?,
        no_tags: get_str_list(r)?,
    })
}

fn put_query_response(buf: &mut Vec<u8>, resp: &QueryResponse) {
    buf.push(resp.send_id as u8);
    if let (SendId::Attached, Some(entry)) = (resp.send_id, &resp.entry) {
        buf.extend_from_slice(&record::encode(entry));
    }
}

fn get_query_response(r: &mut ByteReader<'_>) -> Result<QueryResponse, LogError> {
    let send_id = SendId::from_u8(r.u8()?)?;
    let entry = match send_id {
        SendId::Attached => Some(record::decode(r.rest())?),
        _ => None,
    };
    Ok(QueryResponse { send_id, entry })
}

fn put_persist(buf: &mut Vec<u8>, m: &PersistStartMsg) {
    buf.extend_from_slice(&m.job_id.to_le_bytes());
    buf.push(m.compress_alg);
    buf.extend_from_slice(&m.types.to_le_bytes());
    buf.push(m.levels);
    buf.extend_from_slice(&m.file_size.to_le_bytes());
    buf.extend_from_slice(&m.file_num.to_le_bytes());
    put_string(buf, &m.file_path);
}

fn get_persist(r: &mut ByteReader<'_>) -> Result<PersistStartMsg, LogError> {
    Ok(PersistStartMsg {
        job_id: r.u32()?,
        compress_alg: r.u8()?,
        types: r.u16()?,
        levels: r.u8()?,
        file_size: r.u32()?,
        file_num: r.u32()?,
        file_path: r.string()?,
    })
}

fn put_sizes(buf: &mut Vec<u8>, sizes: &[TypeSize]) {
    buf.push(sizes.len() as u8);
    for s in sizes {
        buf.push(s.log_type);
        buf.extend_from_slice(&s.size.to_le_bytes());
    }
}

fn get_sizes(r: &mut ByteReader<'_>) -> Result<Vec<TypeSize>, LogError> {
    let n = r.u8()? as usize;
    (0..n)
        .map(|_| -> Result<TypeSize, LogError> {
            Ok(TypeSize {
                log_type: r.u8()?,
                size: r.u64()?,
            })
        })
        .collect()
}

fn put_target(buf: &mut Vec<u8>, t: &StatsTarget) {
    match *t {
        StatsTarget::Type(v) => {
            buf.push(0);
            buf.extend_from_slice(&(v as u32).to_le_bytes());
        }
        StatsTarget::Domain(d) => {
            buf.push(1);
            buf.extend_from_slice(&d.to_le_bytes());
        }
    }
}

fn get_target(r: &mut ByteReader<'_>) -> Result<StatsTarget, LogError> {
    let kind = r.u8()?;
    let value = r.u32()?;
    match kind {
        0 => Ok(StatsTarget::Type(value as u8)),
        1 => Ok(StatsTarget::Domain(value)),
        _ => Err(LogError::InvalidQueryCondition),
    }
}

fn put_stats(buf: &mut Vec<u8>, s: &StatsInfo) {
    for v in [s.lines, s.len, s.print_len, s.cache_len, s.dropped] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn get_stats(r: &mut ByteReader<'_>) -> Result<StatsInfo, LogError> {
    Ok(StatsInfo {
        lines: r.u64()?,
        len: r.u64()?,
        print_len: r.u64()?,
        cache_len: r.u64()?,
        dropped: r.u64()?,
    })
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

impl ControlMessage {
    pub fn msg_type(&self) -> MsgType {
        use ControlMessage as M;
        match self {
            M::LogQueryRequest(_) => MsgType::LogQueryRequest,
            M::LogQueryResponse(_) => MsgType::LogQueryResponse,
            M::NextRequest(_) => MsgType::NextRequest,
            M::NextResponse(_) => MsgType::NextResponse,
            M::NewDataNotify => MsgType::NewDataNotify,
            M::PersistStartRequest(_) => MsgType::PersistStartRequest,
            M::PersistStartResponse { .. } => MsgType::PersistStartResponse,
            M::PersistStopRequest { .. } => MsgType::PersistStopRequest,
            M::PersistStopResponse { .. } => MsgType::PersistStopResponse,
            M::PersistQueryRequest => MsgType::PersistQueryRequest,
            M::PersistQueryResponse { .. } => MsgType::PersistQueryResponse,
            M::BufferSizeRequest { .. } => MsgType::BufferSizeRequest,
            M::BufferSizeResponse { .. } => MsgType::BufferSizeResponse,
            M::BufferResizeRequest { .. } => MsgType::BufferResizeRequest,
            M::BufferResizeResponse { .. } => MsgType::BufferResizeResponse,
            M::StatisticInfoQueryRequest(_) => MsgType::StatisticInfoQueryRequest,
            M::StatisticInfoQueryResponse { .. } => MsgType::StatisticInfoQueryResponse,
            M::StatisticInfoClearRequest(_) => MsgType::StatisticInfoClearRequest,
            M::StatisticInfoClearResponse { .. } => MsgType::StatisticInfoClearResponse,
            M::LogClearRequest { .. } => MsgType::LogClearRequest,
            M::LogClearResponse { .. } => MsgType::LogClearResponse,
            M::ErrorResponse { .. } => MsgType::ErrorResponse,
        }
    }

    /// Header plus payload, ready for a single packet send.
    pub fn encode(&self) -> Result<Vec<u8>, LogError> {
        use ControlMessage as M;
        let mut p = Vec::new();
        match self {
            M::LogQueryRequest(c) | M::NextRequest(c) => put_condition(&mut p, c),
            M::LogQueryResponse(r) | M::NextResponse(r) => put_query_response(&mut p, r),
            M::NewDataNotify => p.push(SendId::NewData as u8),
            M::PersistQueryRequest => {}
            M::PersistStartRequest(m) => put_persist(&mut p, m),
            M::PersistStartResponse { job_id, result } => {
                p.extend_from_slice(&job_id.to_le_bytes());
                p.extend_from_slice(&result.to_le_bytes());
            }
            M::PersistStopRequest { job_id } => p.extend_from_slice(&job_id.to_le_bytes()),
            M::PersistStopResponse { results } => {
                p.extend_from_slice(&(results.len() as u16).to_le_bytes());
                for r in results {
                    p.extend_from_slice(&r.job_id.to_le_bytes());
                    p.extend_from_slice(&r.result.to_le_bytes());
                }
            }
            M::PersistQueryResponse { result, jobs } => {
                p.extend_from_slice(&result.to_le_bytes());
                p.extend_from_slice(&(jobs.len() as u16).to_le_bytes());
                for j in jobs {
                    put_persist(&mut p, j);
                }
            }
            M::BufferSizeRequest { types } | M::LogClearRequest { types } => {
                p.extend_from_slice(&types.to_le_bytes())
            }
            M::BufferResizeRequest { types, size } => {
                p.extend_from_slice(&types.to_le_bytes());
                p.extend_from_slice(&size.to_le_bytes());
            }
            M::BufferSizeResponse { result, sizes } | M::BufferResizeResponse { result, sizes } => {
                p.extend_from_slice(&result.to_le_bytes());
                put_sizes(&mut p, sizes);
            }
            M::StatisticInfoQueryRequest(t) | M::StatisticInfoClearRequest(t) => {
                put_target(&mut p, t)
            }
            M::StatisticInfoQueryResponse { result, info } => {
                p.extend_from_slice(&result.to_le_bytes());
                put_stats(&mut p, info);
            }
            M::StatisticInfoClearResponse { result }
            | M::LogClearResponse { result }
            | M::ErrorResponse { result } => p.extend_from_slice(&result.to_le_bytes()),
        }

        if p.len() > u16::MAX as usize {
            return Err(LogError::InvalidMessageLength);
        }
        let header = MsgHeader {
            version: CONTROL_VERSION,
            msg_type: self.msg_type() as u8,
            msg_len: p.len() as u16,
        };
        let mut out = Vec::with_capacity(MSG_HEADER_LEN + p.len());
        out.extend_from_slice(&header.serialize());
        out.extend_from_slice(&p);
        Ok(out)
    }

    /// Parse one packet.  Unknown message types yield
    /// [`LogError::CommandNotFound`]; short or inconsistent payloads yield
    /// [`LogError::InvalidMessageLength`].
    pub fn decode(buf: &[u8]) -> Result<ControlMessage, LogError> {
        use ControlMessage as M;
        let header = MsgHeader::deserialize(buf)?;
        if header.version != CONTROL_VERSION {
            return Err(LogError::InvalidCommand);
        }
        let payload = &buf[MSG_HEADER_LEN..];
        if payload.len() != header.msg_len as usize {
            return Err(LogError::InvalidMessageLength);
        }
        let msg_type = MsgType::from_u8(header.msg_type).ok_or(LogError::CommandNotFound)?;
        let mut r = ByteReader::new(payload);

        let msg = match msg_type {
            MsgType::LogQueryRequest => M::LogQueryRequest(get_condition(&mut r)?),
            MsgType::NextRequest => M::NextRequest(get_condition(&mut r)?),
            MsgType::LogQueryResponse => M::LogQueryResponse(get_query_response(&mut r)?),
            MsgType::NextResponse => M::NextResponse(get_query_response(&mut r)?),
            MsgType::NewDataNotify => match SendId::from_u8(r.u8()?)? {
                SendId::NewData => M::NewDataNotify,
                _ => return Err(LogError::InvalidMessageLength),
            },
            MsgType::PersistStartRequest => M::PersistStartRequest(get_persist(&mut r)?),
            MsgType::PersistStartResponse => M::PersistStartResponse {
                job_id: r.u32()?,
                result: r.i32()?,
            },
            MsgType::PersistStopRequest => M::PersistStopRequest { job_id: r.u32()? },
            MsgType::PersistStopResponse => {
                let n = r.u16()? as usize;
                let results = (0..n)
                    .map(|_| -> Result<JobResult, LogError> {
                        Ok(JobResult {
                            job_id: r.u32()?,
                            result: r.i32()?,
                        })
                    })
                    .collect::<Result<Vec<_>, LogError>>()?;
                M::PersistStopResponse { results }
            }
            MsgType::PersistQueryRequest => M::PersistQueryRequest,
            MsgType::PersistQueryResponse => {
                let result = r.i32()?;
                let n = r.u16()? as usize;
                let jobs = (0..n)
                    .map(|_| get_persist(&mut r))
                    .collect::<Result<Vec<_>, LogError>>()?;
                M::PersistQueryResponse { result, jobs }
            }
            MsgType::BufferSizeRequest => M::BufferSizeRequest { types: r.u16()? },
            MsgType::BufferSizeResponse => M::BufferSizeResponse {
                result: r.i32()?,
                sizes: get_sizes(&mut r)?,
            },
            MsgType::BufferResizeRequest => M::BufferResizeRequest {
                types: r.u16()?,
                size: r.u64()?,
            },
            MsgType::BufferResizeResponse => M::BufferResizeResponse {
                result: r.i32()?,
                sizes: get_sizes(&mut r)?,
            },
            MsgType::StatisticInfoQueryRequest => {
                M::StatisticInfoQueryRequest(get_target(&mut r)?)
            }
            MsgType::StatisticInfoQueryResponse => M::StatisticInfoQueryResponse {
                result: r.i32()?,
                info: get_stats(&mut r)?,
            },
            MsgType::StatisticInfoClearRequest => {
                M::StatisticInfoClearRequest(get_target(&mut r)?)
            }
            MsgType::StatisticInfoClearResponse => M::StatisticInfoClearResponse { result: r.i32()? },
            MsgType::LogClearRequest => M::LogClearRequest { types: r.u16()? },
            MsgType::LogClearResponse => M::LogClearResponse { result: r.i32()? },
            MsgType::ErrorResponse => M::ErrorResponse { result: r.i32()? },
        };

        if r.remaining() != 0 {
            return Err(LogError::InvalidMessageLength);
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_entry::{LogLevel, LogType};

    #[test]
    fn test_header_layout() {
        let buf = ControlMessage::PersistStopRequest { job_id: 7 }
            .encode()
            .unwrap();
        assert_eq!(buf.len(), MSG_HEADER_LEN + 4);
        assert_eq!(buf[0], CONTROL_VERSION);
        assert_eq!(buf[1], MsgType::PersistStopRequest as u8);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 4);
    }

    #[test]
    fn test_query_request_with_condition() {
        let mut c = QueryCondition::all();
        c.pids = vec![1, 2];
        c.domains = vec![0xD002D00];
        c.tags = vec!["net".into()];
        c.no_tags = vec!["spam".into(), "noise".into()];
        c.no_levels = LogLevel::Debug.mask();
        let msg = ControlMessage::NextRequest(c);
        assert_eq!(ControlMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_query_response_carries_record() {
        let mut e = LogEntry::new(LogType::Init, LogLevel::Info, 1, "T", "line");
        e.tid = 9;
        let msg = ControlMessage::LogQueryResponse(QueryResponse::attached(e));
        assert_eq!(ControlMessage::decode(&msg.encode().unwrap()).unwrap(), msg);

        let end = ControlMessage::LogQueryResponse(QueryResponse::none());
        let buf = end.encode().unwrap();
        assert_eq!(buf.len(), MSG_HEADER_LEN + 1);
        assert_eq!(ControlMessage::decode(&buf).unwrap(), end);
    }

    #[test]
    fn test_persist_messages() {
        let start = PersistStartMsg {
            job_id: 3,
            compress_alg: 2,
            types: LogType::Core.mask(),
            levels: 0xF8,
            file_size: 1 << 20,
            file_num: 10,
            file_path: "/data/log/hilog/hilog".into(),
        };
        let msg = ControlMessage::PersistQueryResponse {
            result: 0,
            jobs: vec![start.clone(), start],
        };
        assert_eq!(ControlMessage::decode(&msg.encode().unwrap()).unwrap(), msg);

        let stop = ControlMessage::PersistStopResponse {
            results: vec![JobResult { job_id: 1, result: -32 }],
        };
        assert_eq!(ControlMessage::decode(&stop.encode().unwrap()).unwrap(), stop);
    }

    #[test]
    fn test_new_data_notify_payload() {
        let buf = ControlMessage::NewDataNotify.encode().unwrap();
        assert_eq!(&buf[MSG_HEADER_LEN..], &[SendId::NewData as u8]);
        assert_eq!(
            ControlMessage::decode(&buf).unwrap(),
            ControlMessage::NewDataNotify
        );
        assert_eq!(
            ControlMessage::decode(&[0, 5, 1, 0, 1]),
            Err(LogError::InvalidMessageLength)
        );
    }

    #[test]
    fn test_stats_messages() {
        let msg = ControlMessage::StatisticInfoQueryResponse {
            result: 0,
            info: StatsInfo {
                lines: 1,
                len: 2,
                print_len: 3,
                cache_len: 4,
                dropped: 5,
            },
        };
        assert_eq!(ControlMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
        let req = ControlMessage::StatisticInfoClearRequest(StatsTarget::Domain(0xD001100));
        assert_eq!(ControlMessage::decode(&req.encode().unwrap()).unwrap(), req);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            ControlMessage::decode(&[0, 1]),
            Err(LogError::InvalidMessageLength)
        );
        assert_eq!(
            ControlMessage::decode(&[0, 200, 0, 0]),
            Err(LogError::CommandNotFound)
        );
        assert_eq!(
            ControlMessage::decode(&[9, 10, 0, 0]),
            Err(LogError::InvalidCommand)
        );
        // msg_len disagrees with the received payload.
        assert_eq!(
            ControlMessage::decode(&[0, 8, 4, 0, 1, 0]),
            Err(LogError::InvalidMessageLength)
        );
        // Payload too short for its type.
        assert_eq!(
            ControlMessage::decode(&[0, 8, 2, 0, 1, 0]),
            Err(LogError::InvalidMessageLength)
        );
        // Trailing garbage.
        assert_eq!(
            ControlMessage::decode(&[0, 10, 1, 0, 0]),
            Err(LogError::InvalidMessageLength)
        );
    }
}
