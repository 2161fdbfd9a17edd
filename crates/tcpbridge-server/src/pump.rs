//! One direction of a bridge
//!
//! A pump reads up to one buffer from its source socket, writes exactly those
//! bytes to its sink, and only then issues the next read. The buffer is never
//! refilled while a write of its previous contents is outstanding.
//!
//! Sockets are borrowed as `&TcpStream` so that the teardown path can shut
//! them down while a read or write is parked on the reactor.

use crate::teardown::TeardownCoordinator;
use std::fmt;
use std::io;
use tokio::net::TcpStream;

/// Flow direction, named from the client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client -> proxy -> upstream server
    Upstream,
    /// Upstream server -> proxy -> client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => write!(f, "upstream"),
            Direction::Downstream => write!(f, "downstream"),
        }
    }
}

/// Why a pump stopped
#[derive(Debug)]
pub enum PumpEnd {
    /// Source closed its write half
    Eof,
    /// The sibling pump (or dial path) closed the bridge first
    Cancelled,
    ReadError(io::Error),
    WriteError(io::Error),
}

impl PumpEnd {
    /// EOF and cancellation are normal terminations
    pub fn is_abnormal(&self) -> bool {
        matches!(self, PumpEnd::ReadError(_) | PumpEnd::WriteError(_))
    }
}

impl fmt::Display for PumpEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpEnd::Eof => write!(f, "Peer closed connection"),
            PumpEnd::Cancelled => write!(f, "Stopped by bridge close"),
            PumpEnd::ReadError(e) => write!(f, "Read error: {}", e),
            PumpEnd::WriteError(e) => write!(f, "Write error: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct PumpOutcome {
    pub direction: Direction,
    pub bytes: u64,
    pub end: PumpEnd,
}

/// Move bytes from `source` to `sink` until EOF, error, or teardown
pub async fn pump(
    direction: Direction,
    source: &TcpStream,
    sink: &TcpStream,
    buf: &mut [u8],
    teardown: &TeardownCoordinator,
) -> PumpOutcome {
    let mut bytes = 0u64;

    let end = loop {
        let read = tokio::select! {
            biased;
            _ = teardown.closing() => break PumpEnd::Cancelled,
            read = read_some(source, buf) => read,
        };

        let n = match read {
            Ok(0) => break PumpEnd::Eof,
            Ok(n) => n,
            Err(e) => break PumpEnd::ReadError(e),
        };

        let written = tokio::select! {
            biased;
            _ = teardown.closing() => break PumpEnd::Cancelled,
            written = write_all(sink, &buf[..n]) => written,
        };

        if let Err(e) = written {
            break PumpEnd::WriteError(e);
        }
        bytes += n as u64;
    };

    PumpOutcome {
        direction,
        bytes,
        end,
    }
}

/// Read whatever is available, up to `buf.len()` bytes
pub async fn read_some(stream: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        stream.readable().await?;
        match stream.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Write all of `buf`, completing only once every byte is handed to the kernel
pub async fn write_all(stream: &TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        stream.writable().await?;
        match stream.try_write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Connected (local, remote) socket pair over loopback
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Upstream.to_string(), "upstream");
        assert_eq!(Direction::Downstream.to_string(), "downstream");
    }

    #[test]
    fn test_pump_end_classification() {
        assert!(!PumpEnd::Eof.is_abnormal());
        assert!(!PumpEnd::Cancelled.is_abnormal());
        assert!(PumpEnd::ReadError(io::ErrorKind::ConnectionReset.into()).is_abnormal());
        assert!(PumpEnd::WriteError(io::ErrorKind::BrokenPipe.into()).is_abnormal());
    }

    #[test]
    fn test_pump_end_messages() {
        assert_eq!(PumpEnd::Eof.to_string(), "Peer closed connection");
        let reset = PumpEnd::ReadError(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(reset.to_string(), "Read error: reset");
    }

    #[tokio::test]
    async fn test_read_some_and_write_all() {
        let (a, mut b) = socket_pair().await;

        write_all(&a, b"hello").await.unwrap();
        let mut received = [0u8; 5];
        b.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello");

        b.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        while got.len() < 5 {
            let n = read_some(&a, &mut buf).await.unwrap();
            assert!(n > 0);
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"world");
    }

    #[tokio::test]
    async fn test_pump_forwards_until_eof() {
        let (source_local, mut source_peer) = socket_pair().await;
        let (sink_local, mut sink_peer) = socket_pair().await;
        let teardown = TeardownCoordinator::new();
        teardown.mark_running();

        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            source_peer.write_all(&payload).await.unwrap();
            source_peer.shutdown().await.unwrap();
            source_peer
        });

        // small buffer forces many read/write turns
        let mut buf = vec![0u8; 1000];
        let outcome = pump(
            Direction::Upstream,
            &source_local,
            &sink_local,
            &mut buf,
            &teardown,
        )
        .await;

        assert!(matches!(outcome.end, PumpEnd::Eof));
        assert_eq!(outcome.bytes, expected.len() as u64);
        assert_eq!(outcome.direction, Direction::Upstream);

        drop(sink_local);
        let mut received = Vec::new();
        sink_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, expected);

        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_pump_stops_on_teardown() {
        let (source_local, _source_peer) = socket_pair().await;
        let (sink_local, _sink_peer) = socket_pair().await;
        let teardown = TeardownCoordinator::new();
        teardown.mark_running();

        let mut buf = vec![0u8; 64];
        let pumping = pump(
            Direction::Downstream,
            &source_local,
            &sink_local,
            &mut buf,
            &teardown,
        );
        let closer = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            teardown.close(|| {});
        };

        let (outcome, _) = tokio::join!(pumping, closer);
        assert!(matches!(outcome.end, PumpEnd::Cancelled));
        assert_eq!(outcome.bytes, 0);
    }
}
