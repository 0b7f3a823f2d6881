use std::io;

use thiserror::Error;

/// Command parameters that cannot be framed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidParameter {
    #[error("parameter {tag} is {len} bytes, a value holds at most 255")]
    ValueTooLong { tag: u8, len: usize },

    #[error("parameters take {body} bytes, a frame body holds at most 252")]
    BodyTooLong { body: usize },
}

/// Failure to bring the session into the connected state.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("device not found among paired devices: {0}")]
    DeviceNotFound(String),

    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("request cancelled before it started")]
    Cancelled,
}

/// Failure to deliver a frame.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    InvalidParameter(#[from] InvalidParameter),

    #[error("device not found among paired devices: {0}")]
    DeviceNotFound(String),

    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("send failed after {attempts} attempt(s)")]
    SendFailed {
        attempts: u32,
        #[source]
        source: Option<io::Error>,
    },

    #[error("request cancelled before it started")]
    Cancelled,
}

impl From<ConnectError> for SendError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::DeviceNotFound(id) => Self::DeviceNotFound(id),
            ConnectError::AdapterUnavailable(why) => Self::AdapterUnavailable(why),
            ConnectError::ConnectFailed(e) => Self::SendFailed {
                attempts: 0,
                source: Some(e),
            },
            ConnectError::Cancelled => Self::Cancelled,
        }
    }
}

impl SendError {
    /// Short label for status output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::AdapterUnavailable(_) => "adapter_unavailable",
            Self::SendFailed { .. } => "send_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_maps_to_send_error() {
        let err: SendError = ConnectError::DeviceNotFound("buds".into()).into();
        assert!(matches!(err, SendError::DeviceNotFound(ref id) if id == "buds"));

        let err: SendError = ConnectError::AdapterUnavailable("off".into()).into();
        assert_eq!(err.kind(), "adapter_unavailable");

        let err: SendError = ConnectError::Cancelled.into();
        assert!(matches!(err, SendError::Cancelled));
    }

    #[test]
    fn test_invalid_parameter_message() {
        let err = InvalidParameter::ValueTooLong { tag: 1, len: 300 };
        assert_eq!(
            err.to_string(),
            "parameter 1 is 300 bytes, a value holds at most 255"
        );

        let err: SendError = InvalidParameter::BodyTooLong { body: 260 }.into();
        assert_eq!(err.kind(), "invalid_parameter");
    }
}
