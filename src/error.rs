//! Error contract shared by every component
//!
//! Callers branch on `(domain, code)` pairs. The numeric codes are stable and
//! must never be renumbered.

use std::fmt;
use std::io;

/// Domain string carried by every error produced by this crate
pub const ERROR_DOMAIN: &str = "dev.playcast";

/// Closed set of stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// The user declined or abandoned the login flow
    LoginCanceled = 100,
    /// The recording was canceled before it became a finished file
    MovieExportCanceled = 101,
    /// The upload failed after retries or was rejected
    FileUploadError = 102,
    /// A session is already recording or uploading
    AlreadyActive = 103,
    /// The operation is not valid in the current lifecycle state
    InvalidState = 104,
    /// The host cannot run the capture path
    Unsupported = 105,
    /// The encoder hit a corrupt or unsupported sample
    EncoderFailure = 106,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Errors surfaced by the capture, encode and upload pipeline
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("login canceled")]
    LoginCanceled,

    #[error("recording canceled")]
    ExportCanceled,

    #[error("storage exhausted: {0}")]
    StorageExhausted(String),

    #[error("a session is already active ({0})")]
    AlreadyActive(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("capture is not supported on this host")]
    Unsupported,

    #[error("unsupported sample: {0}")]
    UnsupportedSample(String),

    #[error("encoder failure: {0}")]
    Encoder(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("upload rejected: {0}")]
    Unauthorized(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    pub fn domain(&self) -> &'static str {
        ERROR_DOMAIN
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CaptureError::LoginCanceled => ErrorCode::LoginCanceled,
            CaptureError::ExportCanceled | CaptureError::StorageExhausted(_) => {
                ErrorCode::MovieExportCanceled
            }
            CaptureError::AlreadyActive(_) => ErrorCode::AlreadyActive,
            CaptureError::InvalidState(_) => ErrorCode::InvalidState,
            CaptureError::Unsupported => ErrorCode::Unsupported,
            CaptureError::UnsupportedSample(_) | CaptureError::Encoder(_) => {
                ErrorCode::EncoderFailure
            }
            CaptureError::Upload(_) | CaptureError::Unauthorized(_) => ErrorCode::FileUploadError,
            CaptureError::Io(e) if is_storage_full(e) => ErrorCode::MovieExportCanceled,
            CaptureError::Io(_) => ErrorCode::EncoderFailure,
        }
    }

    /// True for the login-cancel code, matching the classic "canceled" check
    pub fn is_canceled(&self) -> bool {
        self.domain() == ERROR_DOMAIN && self.code() == ErrorCode::LoginCanceled
    }

    /// True when the user asked for this outcome (login or export cancel)
    ///
    /// Storage exhaustion shares the export-cancel code but is a fault.
    pub fn is_user_cancellation(&self) -> bool {
        matches!(self, CaptureError::LoginCanceled | CaptureError::ExportCanceled)
    }
}

/// Whether an IO error means the disk is full
pub(crate) fn is_storage_full(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::StorageFull {
        return true;
    }

    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(libc::ENOSPC) {
            return true;
        }
    }

    false
}
