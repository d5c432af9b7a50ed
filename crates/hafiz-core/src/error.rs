//! Error types for Hafiz

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error codes the service uses to ask clients to slow down.
const THROTTLE_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottledException",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "TransactionInProgressException",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
    "LimitExceededException",
    "RequestThrottled",
    "SlowDown",
    "PriorRequestNotComplete",
    "EC2ThrottledException",
];

/// Error codes that are safe to retry even though they are not 5xx.
const RETRYABLE_CODES: &[&str] = &[
    "RequestError",
    "RequestTimeout",
    "ResponseTimeout",
    "RequestTimeoutException",
];

#[derive(Error, Debug)]
pub enum Error {
    // Bucket Errors
    #[error("The specified bucket does not exist: {0}")]
    NoSuchBucket(String),

    // Object Errors
    #[error("The specified key does not exist: {0}")]
    NoSuchKey(String),

    #[error("The specified multipart upload does not exist: {0}")]
    NoSuchUpload(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Your proposed upload is smaller than the minimum allowed size: {0}")]
    EntityTooSmall(String),

    #[error("Object is too large")]
    EntityTooLarge,

    // Access Errors
    #[error("Access Denied")]
    AccessDenied,

    #[error("At least one of the preconditions you specified did not hold")]
    PreconditionFailed,

    // Validation Errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    // Remote Errors
    #[error("Request throttled ({code}, status {status})")]
    Throttled {
        status: u16,
        code: String,
        retry_after: Option<Duration>,
    },

    #[error("Service error {status} {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map a service error response onto the closest typed variant.
    pub fn from_service(
        status: u16,
        code: &str,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = message.into();
        match code {
            "NoSuchBucket" => Error::NoSuchBucket(message),
            "NoSuchKey" | "NotFound" => Error::NoSuchKey(message),
            "NoSuchUpload" => Error::NoSuchUpload(message),
            "InvalidPart" | "InvalidPartOrder" => Error::InvalidPart(message),
            "EntityTooSmall" => Error::EntityTooSmall(message),
            "EntityTooLarge" => Error::EntityTooLarge,
            "AccessDenied" => Error::AccessDenied,
            "PreconditionFailed" => Error::PreconditionFailed,
            "InvalidArgument" => Error::InvalidArgument(message),
            "InvalidRequest" => Error::InvalidRequest(message),
            "InvalidRange" => Error::InvalidRange(message),
            _ if status == 429 || THROTTLE_CODES.contains(&code) => Error::Throttled {
                status,
                code: code.to_string(),
                retry_after,
            },
            _ => Error::Service {
                status,
                code: code.to_string(),
                message,
            },
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Error::NoSuchBucket(_) => "NoSuchBucket",
            Error::NoSuchKey(_) => "NoSuchKey",
            Error::NoSuchUpload(_) => "NoSuchUpload",
            Error::InvalidPart(_) => "InvalidPart",
            Error::EntityTooSmall(_) => "EntityTooSmall",
            Error::EntityTooLarge => "EntityTooLarge",
            Error::AccessDenied => "AccessDenied",
            Error::PreconditionFailed => "PreconditionFailed",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::InvalidRange(_) => "InvalidRange",
            Error::Throttled { code, .. } => code,
            Error::Service { code, .. } => code,
            Error::Transport(_) => "RequestError",
            Error::InternalError(_) => "InternalError",
            Error::Io(_) => "InternalError",
            Error::Other(_) => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidArgument(_)
            | Error::InvalidRequest(_)
            | Error::InvalidPart(_)
            | Error::EntityTooSmall(_)
            | Error::EntityTooLarge => 400,

            Error::AccessDenied => 403,

            Error::NoSuchBucket(_) | Error::NoSuchKey(_) | Error::NoSuchUpload(_) => 404,

            Error::PreconditionFailed => 412,

            Error::InvalidRange(_) => 416,

            Error::Throttled { status, .. } | Error::Service { status, .. } => *status,

            Error::Transport(_) => 0,

            _ => 500,
        }
    }

    /// Whether the service asked us to back off.
    pub fn is_throttle(&self) -> bool {
        matches!(self, Error::Throttled { .. })
    }

    /// Whether another attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Throttled { .. } | Error::Transport(_) => true,
            Error::Service { status, code, .. } => {
                (*status >= 500 && *status != 501) || RETRYABLE_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }

    /// Server supplied `Retry-After` hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.http_status() == 404
    }
}
