use thiserror::Error;

/// Header block transcoding failures.
///
/// All of these are detected before anything is handed to the protocol
/// engine; a failed transcode never opens a request stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderTranscodeError {
    #[error("header block contains fewer than two CRLF-terminated lines")]
    TooFewLines,

    #[error("request line is missing its CRLF terminator")]
    MissingRequestLine,

    #[error("malformed request line: {0}")]
    MalformedRequestLine(&'static str),

    #[error("header line is truncated or empty")]
    TruncatedLine,

    #[error("header continuation lines are not supported")]
    ContinuationLine,

    #[error("header line has no colon separator")]
    MissingColon,

    #[error("header line has an empty field name")]
    EmptyFieldName,
}

/// Adapter-level error taxonomy.
///
/// Failures from the socket or the engine are wrapped and returned to the
/// caller immediately; there is no retry logic at this layer. `Retry` is the
/// one non-failure variant: the engine has no data yet and the caller must
/// re-invoke after the next readiness notification.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("receive failed: {0}")]
    Recv(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("no data available yet")]
    Retry,

    #[error("header transcode failed: {0}")]
    HeaderTranscode(#[from] HeaderTranscodeError),
}

impl TransportError {
    /// True for the retryable "no data yet" signal, false for hard failures.
    pub fn is_retry(&self) -> bool {
        matches!(self, TransportError::Retry)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_is_not_a_hard_failure() {
        assert!(TransportError::Retry.is_retry());
        assert!(!TransportError::Recv("socket closed".into()).is_retry());
        assert!(!TransportError::from(HeaderTranscodeError::TooFewLines).is_retry());
    }

    #[test]
    fn transcode_errors_convert() {
        let err: TransportError = HeaderTranscodeError::MissingColon.into();
        assert!(matches!(
            err,
            TransportError::HeaderTranscode(HeaderTranscodeError::MissingColon)
        ));
    }
}
