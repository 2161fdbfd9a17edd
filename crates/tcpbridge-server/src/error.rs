//! Proxy errors

use thiserror::Error;

/// Failure categories, used to decide how an error is reported.
///
/// Read and write failures on a running bridge are not errors here; they end
/// a pump and are reported through its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration, bind or listen failure. Terminates the process.
    Startup,
    /// The listening socket failed to accept.
    Accept,
    /// A bridge could not reach the upstream server. Only that bridge is affected.
    Dial,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid IPv4 address '{0}' (expected a dotted-quad literal such as 127.0.0.1)")]
    InvalidAddress(String),

    #[error("Invalid port '{0}' (expected an integer between 1 and 65535)")]
    InvalidPort(String),

    #[error("Invalid buffer size {0} (must be between 1 byte and 16MB)")]
    InvalidBufferSize(usize),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to listen on {address}: {source}")]
    ListenError {
        address: String,
        source: std::io::Error,
    },

    #[error("No async runtime available to drive the acceptor")]
    RuntimeUnavailable,

    #[error("Failed to accept connection: {0}")]
    AcceptError(std::io::Error),

    #[error("Failed to connect to upstream {address}: {source}")]
    DialError {
        address: String,
        source: std::io::Error,
    },
}

impl ProxyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::InvalidAddress(_)
            | ProxyError::InvalidPort(_)
            | ProxyError::InvalidBufferSize(_)
            | ProxyError::BindError { .. }
            | ProxyError::ListenError { .. }
            | ProxyError::RuntimeUnavailable
            | ProxyError::IoError(_) => ErrorKind::Startup,
            ProxyError::AcceptError(_) => ErrorKind::Accept,
            ProxyError::DialError { .. } => ErrorKind::Dial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ProxyError::InvalidAddress("::1".to_string()).kind(),
            ErrorKind::Startup
        );
        assert_eq!(
            ProxyError::BindError {
                address: "127.0.0.1".to_string(),
                port: 80,
                reason: "denied".to_string(),
            }
            .kind(),
            ErrorKind::Startup
        );
        assert_eq!(
            ProxyError::DialError {
                address: "127.0.0.1:1".to_string(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            }
            .kind(),
            ErrorKind::Dial
        );
        assert_eq!(
            ProxyError::AcceptError(std::io::ErrorKind::OutOfMemory.into()).kind(),
            ErrorKind::Accept
        );
        // listener registration and address lookups are the only bare io errors
        assert_eq!(
            ProxyError::from(std::io::Error::from(std::io::ErrorKind::AddrNotAvailable)).kind(),
            ErrorKind::Startup
        );
    }

    #[test]
    fn test_bind_error_message_names_port() {
        let err = ProxyError::BindError {
            address: "127.0.0.1".to_string(),
            port: 9100,
            reason: "Address already in use".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1"));
        assert!(msg.contains("lsof -i :9100"));
    }
}
