//! Producer record datagram.
//!
//! ```text
//! 0   len:u16        total datagram length
//! 2   bits:u16       version:3 | type:4 | level:3 | tag_len:6
//! 4   tv_sec:u32
//! 8   tv_nsec:u32
//! 12  mono_sec:u32
//! 16  pid:u32
//! 20  tid:u32
//! 24  domain:u32
//! 28  tag[tag_len]   NUL-terminated
//! ..  content        NUL-terminated
//! ```

use super::{ByteReader, until_nul};
use crate::error::LogError;
use crate::log_entry::{LogEntry, LogLevel, LogType, MAX_LOG_LEN, MAX_TAG_LEN, RECORD_HEADER_LEN};

pub const RECORD_VERSION: u16 = 0;

const VERSION_BITS: u16 = 0x7;
const TYPE_SHIFT: u16 = 3;
const TYPE_BITS: u16 = 0xF;
const LEVEL_SHIFT: u16 = 7;
const LEVEL_BITS: u16 = 0x7;
const TAG_LEN_SHIFT: u16 = 10;
const TAG_LEN_BITS: u16 = 0x3F;

/// Serialize an entry.  Tags and content longer than the protocol allows
/// are truncated.
pub fn encode(entry: &LogEntry) -> Vec<u8> {
    let tag = &entry.tag.as_bytes()[..entry.tag.len().min(MAX_TAG_LEN - 1)];
    let tag_len = tag.len() + 1;
    let max_content = MAX_LOG_LEN - RECORD_HEADER_LEN - tag_len - 1;
    let content = &entry.content.as_bytes()[..entry.content.len().min(max_content)];
    let len = RECORD_HEADER_LEN + tag_len + content.len() + 1;

    let bits = (RECORD_VERSION & VERSION_BITS)
        | ((entry.log_type as u16 & TYPE_BITS) << TYPE_SHIFT)
        | ((entry.level as u16 & LEVEL_BITS) << LEVEL_SHIFT)
        | ((tag_len as u16 & TAG_LEN_BITS) << TAG_LEN_SHIFT);

    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&bits.to_le_bytes());
    buf.extend_from_slice(&entry.tv_sec.to_le_bytes());
    buf.extend_from_slice(&entry.tv_nsec.to_le_bytes());
    buf.extend_from_slice(&entry.mono_sec.to_le_bytes());
    buf.extend_from_slice(&entry.pid.to_le_bytes());
    buf.extend_from_slice(&entry.tid.to_le_bytes());
    buf.extend_from_slice(&entry.domain.to_le_bytes());
    buf.extend_from_slice(tag);
    buf.push(0);
    buf.extend_from_slice(content);
    buf.push(0);
    buf
}

/// Parse one datagram.  Every length is checked against the received size
/// before the corresponding bytes are touched.
pub fn decode(buf: &[u8]) -> Result<LogEntry, LogError> {
    if buf.len() < RECORD_HEADER_LEN || buf.len() > MAX_LOG_LEN {
        return Err(LogError::InvalidMessageLength);
    }
    let mut r = ByteReader::new(buf);
    let len = r.u16()? as usize;
    if len < RECORD_HEADER_LEN || len > buf.len() {
        return Err(LogError::InvalidMessageLength);
    }
    let bits = r.u16()?;
    if bits & VERSION_BITS != RECORD_VERSION {
        return Err(LogError::InvalidCommand);
    }
    let log_type = LogType::try_from(((bits >> TYPE_SHIFT) & TYPE_BITS) as u8)?;
    let level = LogLevel::from_u8(((bits >> LEVEL_SHIFT) & LEVEL_BITS) as u8)
        .ok_or(LogError::InvalidLogLevel)?;
    let tag_len = ((bits >> TAG_LEN_SHIFT) & TAG_LEN_BITS) as usize;
    if tag_len == 0 || tag_len > MAX_TAG_LEN {
        return Err(LogError::InvalidTag);
    }

    let tv_sec = r.u32()?;
    let tv_nsec = r.u32()?;
    let mono_sec = r.u32()?;
    let pid = r.u32()?;
    let tid = r.u32()?;
    let domain = r.u32()?;

    if RECORD_HEADER_LEN + tag_len > len {
        return Err(LogError::InvalidMessageLength);
    }
    let tag = until_nul(r.bytes(tag_len)?);
    let content = until_nul(r.bytes(len - RECORD_HEADER_LEN - tag_len)?);

    Ok(LogEntry {
        log_type,
        level,
        pid,
        tid,
        domain,
        tv_sec,
        tv_nsec,
        mono_sec,
        tag: String::from_utf8_lossy(tag).into_owned(),
        content: String::from_utf8_lossy(content).into_owned(),
    })
}
