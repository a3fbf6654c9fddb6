use thiserror::Error;

/// Errors surfaced by the NSQ client and the publish/subscribe flows.
#[derive(Debug, Error)]
pub enum Error {
    /// A command-line flag was missing or malformed.
    #[error("invalid flag: {0}")]
    Flag(String),

    /// Topic, channel or client settings were rejected.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The producer/consumer could not be built or could not reach its peer.
    #[error("connection error: {0}")]
    Connection(String),

    /// Reading standard input (or a socket) failed. End of input lands here.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("client is stopped")]
    Stopped,
}

impl Error {
    /// True when the error is the end of standard input.
    pub fn is_end_of_input(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_cause_is_reported_once() {
        let err = Error::from(io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"));
        assert!(err.is_end_of_input());

        let report = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(report, "end of input");
    }

    #[test]
    fn other_errors_are_not_end_of_input() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert!(!err.is_end_of_input());
        assert!(!Error::Stopped.is_end_of_input());
    }
}
