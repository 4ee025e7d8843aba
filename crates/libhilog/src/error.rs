//! Error taxonomy shared by the daemon and its clients.
//!
//! Every variant has a stable negative integer code that travels in
//! control-socket response payloads.  The CLI maps the code back with
//! [`LogError::from_code`] and prints the `Display` text, so both the
//! numbers and the strings below are part of the protocol.

use std::io;

/// Result code for a successful operation.
pub const RET_SUCCESS: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("Unknown failure")]
    Failed,
    #[error("Invalid log level, the valid log levels include D/I/W/E/F")]
    InvalidLogLevel,
    #[error("Invalid log type, the valid log types include app/core/init/kmsg/only_prerelease")]
    InvalidLogType,
    #[error("Invalid request command")]
    InvalidRequestCommand,
    #[error("Invalid query condition")]
    InvalidQueryCondition,
    #[error("Invalid domain string")]
    InvalidDomainString,
    #[error("Invalid persist file size, file size should be within 64KiB and 512MiB")]
    PersistFileSizeInvalid,
    #[error("Invalid persist file name")]
    PersistFileNameInvalid,
    #[error("Persist compression buffer exception")]
    PersistCompressBufferException,
    #[error("Unable to open persist directory")]
    PersistDirOpenFailed,
    #[error("Failed to initialize the compression algorithm")]
    PersistCompressInitFailed,
    #[error("Unable to open persist file")]
    PersistFileOpenFailed,
    #[error("Unable to map persist staging buffer")]
    PersistMmapFailed,
    #[error("Persist job id conflicts with a running job")]
    PersistJobIdFailed,
    #[error("Persist task already exists")]
    PersistTaskExists,
    #[error("Invalid domain, domain should be within 0x0 and 0xDFFFFFF")]
    InvalidDomain,
    #[error("Memory allocation failed")]
    MemoryAllocationFailed,
    #[error("Invalid message length")]
    InvalidMessageLength,
    #[error("Invalid switch value, the valid values are on/off")]
    InvalidSwitchValue,
    #[error("Invalid buffer size, buffer size should be within 64KiB and 1GiB")]
    InvalidBufferSize,
    #[error("Command not found")]
    CommandNotFound,
    #[error("Invalid command")]
    InvalidCommand,
    #[error("Invalid persist file path")]
    PersistFilePathInvalid,
    #[error("Invalid persist job id")]
    PersistJobIdInvalid,
    #[error("Invalid persist file number, file number should be within 2 and 1000")]
    PersistFileNumInvalid,
    #[error("Persist job not found")]
    JobNotFound,
    #[error("Buffer reader not found")]
    ReaderNotFound,
    #[error("Invalid tag")]
    InvalidTag,
    #[error("Invalid pid")]
    InvalidPid,
    #[error("Unable to open flow control configuration")]
    FlowControlConfigOpenFailed,
}

/// Code table.  Order is irrelevant; the numbers are what clients see.
const CODES: &[(LogError, i32)] = &[
    (LogError::Failed, -1),
    (LogError::InvalidLogLevel, -2),
    (LogError::InvalidLogType, -3),
    (LogError::InvalidRequestCommand, -4),
    (LogError::InvalidQueryCondition, -5),
    (LogError::InvalidDomainString, -6),
    (LogError::PersistFileSizeInvalid, -7),
    (LogError::PersistFileNameInvalid, -8),
    (LogError::PersistCompressBufferException, -9),
    (LogError::PersistDirOpenFailed, -10),
    (LogError::PersistCompressInitFailed, -11),
    (LogError::PersistFileOpenFailed, -12),
    (LogError::PersistMmapFailed, -13),
    (LogError::PersistJobIdFailed, -14),
    (LogError::PersistTaskExists, -15),
    (LogError::InvalidDomain, -16),
    (LogError::MemoryAllocationFailed, -17),
    (LogError::InvalidMessageLength, -18),
    (LogError::InvalidSwitchValue, -19),
    (LogError::InvalidBufferSize, -21),
    (LogError::CommandNotFound, -22),
    (LogError::InvalidCommand, -25),
    (LogError::PersistFilePathInvalid, -28),
    (LogError::PersistJobIdInvalid, -30),
    (LogError::PersistFileNumInvalid, -31),
    (LogError::JobNotFound, -32),
    (LogError::ReaderNotFound, -33),
    (LogError::InvalidTag, -34),
    (LogError::InvalidPid, -35),
    (LogError::FlowControlConfigOpenFailed, -36),
];

impl LogError {
    /// The stable wire code of this error.
    pub fn code(self) -> i32 {
        CODES
            .iter()
            .find(|(e, _)| *e == self)
            .map(|(_, c)| *c)
            .unwrap_or(-1)
    }

    /// Map a wire code back to an error.  `0` and unknown codes yield `None`.
    pub fn from_code(code: i32) -> Option<LogError> {
        CODES.iter().find(|(_, c)| *c == code).map(|(e, _)| *e)
    }
}

/// Convert an operation result into the code placed in response payloads.
pub fn result_code<T>(result: &Result<T, LogError>) -> i32 {
    match result {
        Ok(_) => RET_SUCCESS,
        Err(e) => e.code(),
    }
}

/// Human-readable text for a wire code, as printed by the CLI.
pub fn code_to_str(code: i32) -> String {
    if code == RET_SUCCESS {
        return "Success".to_string();
    }
    match LogError::from_code(code) {
        Some(e) => e.to_string(),
        None => format!("Unknown error code {}", code),
    }
}

impl From<io::Error> for LogError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => LogError::PersistFilePathInvalid,
            io::ErrorKind::OutOfMemory => LogError::MemoryAllocationFailed,
            _ => LogError::PersistFileOpenFailed,
        }
    }
}
