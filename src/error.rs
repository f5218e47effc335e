use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::pdu::{ErrorCode, MsgType, PduError};

/// Everything that can end a session early.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The file to send could not be opened; nothing went on the wire.
    #[error("cannot open local file {path:?}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0:?} is not a sendable file name")]
    InvalidName(String),
    #[error("peer reported error: {0}")]
    Rejected(ErrorCode),
    #[error("connection closed by peer")]
    ClosedByPeer,
    #[error("unexpected {0:?} reply")]
    UnexpectedReply(MsgType),
    #[error("no pdu received within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Pdu(#[from] PduError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(windows)]
const DISK_FULL_OS_ERRORS: &[i32] = &[39, 112];
#[cfg(not(windows))]
const DISK_FULL_OS_ERRORS: &[i32] = &[28, 122];

/// Wire code to report for a local filesystem failure.
pub fn error_code_for(err: &io::Error) -> ErrorCode {
    if err.raw_os_error().is_some_and(|c| DISK_FULL_OS_ERRORS.contains(&c)) {
        return ErrorCode::DiskFull;
    }
    match err.kind() {
        io::ErrorKind::NotFound => ErrorCode::FileNotFound,
        io::ErrorKind::PermissionDenied => ErrorCode::Permission,
        _ => ErrorCode::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_wire_codes() {
        assert_eq!(error_code_for(&io::Error::from(io::ErrorKind::NotFound)), ErrorCode::FileNotFound);
        assert_eq!(error_code_for(&io::Error::from(io::ErrorKind::PermissionDenied)), ErrorCode::Permission);
        assert_eq!(error_code_for(&io::Error::from(io::ErrorKind::Other)), ErrorCode::Unknown);
        assert_eq!(error_code_for(&io::Error::from_raw_os_error(DISK_FULL_OS_ERRORS[0])), ErrorCode::DiskFull);
    }
}
