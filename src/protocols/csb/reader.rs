//! Exact-length reads with end-of-stream classification.

use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

/// Stand-in deadline when `now + timeout` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How an exact read ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// Exactly the requested number of bytes.
    Complete(Bytes),
    /// The peer closed before sending a single byte of this read.
    CleanEof,
    /// The peer closed after sending part of the requested bytes.
    TruncatedEof { received: usize },
    /// The deadline passed before the requested bytes arrived.
    Timeout { received: usize },
}

/// Read exactly `n` bytes from `source` within `timeout`.
///
/// The timeout covers the whole call, not each underlying read. Transport
/// errors other than `Interrupted` are returned as `Err`.
pub async fn read_exact<R>(source: &mut R, n: usize, timeout: Duration) -> io::Result<ReadStatus>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if n == 0 {
        return Ok(ReadStatus::Complete(Bytes::new()));
    }

    let now = Instant::now();
    let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
    let mut buf = vec![0u8; n];
    let mut filled = 0;

    while filled < n {
        match timeout_at(deadline, source.read(&mut buf[filled..])).await {
            Err(_) => return Ok(ReadStatus::Timeout { received: filled }),
            Ok(Ok(0)) if filled == 0 => return Ok(ReadStatus::CleanEof),
            Ok(Ok(0)) => return Ok(ReadStatus::TruncatedEof { received: filled }),
            Ok(Ok(read)) => filled += read,
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => return Err(e),
        }
    }

    Ok(ReadStatus::Complete(Bytes::from(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio_test::assert_ok;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// A source that yields `data` and then closes.
    fn closed_after(data: &[u8]) -> tokio::io::DuplexStream {
        let (client, mut server) = tokio::io::duplex(1024);
        let data = data.to_vec();
        tokio::spawn(async move {
            let _ = server.write_all(&data).await;
        });
        client
    }

    #[tokio::test]
    async fn test_complete() {
        let mut source = closed_after(b"0123456789ab");
        let status = assert_ok!(read_exact(&mut source, 12, TIMEOUT).await);
        assert_eq!(status, ReadStatus::Complete(Bytes::from_static(b"0123456789ab")));
    }

    #[tokio::test]
    async fn test_complete_leaves_rest_unread() {
        let mut source = closed_after(b"abcdef");
        let first = assert_ok!(read_exact(&mut source, 4, TIMEOUT).await);
        assert_eq!(first, ReadStatus::Complete(Bytes::from_static(b"abcd")));

        let second = assert_ok!(read_exact(&mut source, 2, TIMEOUT).await);
        assert_eq!(second, ReadStatus::Complete(Bytes::from_static(b"ef")));
    }

    #[tokio::test]
    async fn test_eof_classification() {
        for available in 0..=12usize {
            let data = vec![7u8; available];

            let mut source = closed_after(&data);
            let status = assert_ok!(read_exact(&mut source, 12, TIMEOUT).await);
            let expected = match available {
                0 => ReadStatus::CleanEof,
                12 => ReadStatus::Complete(Bytes::from(data.clone())),
                received => ReadStatus::TruncatedEof { received },
            };
            assert_eq!(status, expected, "available = {available}");
        }
    }

    #[tokio::test]
    async fn test_zero_length_completes_without_reading() {
        let (mut client, _server) = tokio::io::duplex(64);
        let status = assert_ok!(read_exact(&mut client, 0, TIMEOUT).await);
        assert_eq!(status, ReadStatus::Complete(Bytes::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_eof() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"abc").await.unwrap();

        let status = assert_ok!(read_exact(&mut client, 12, Duration::from_millis(500)).await);
        assert_eq!(status, ReadStatus::Timeout { received: 3 });
        drop(server);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_nothing_sent() {
        let (mut client, _server) = tokio::io::duplex(64);
        let status = assert_ok!(read_exact(&mut client, 12, Duration::from_secs(1)).await);
        assert_eq!(status, ReadStatus::Timeout { received: 0 });
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let mut source = closed_after(b"abcd");
        let status = assert_ok!(read_exact(&mut source, 4, Duration::from_secs_f64(1e19)).await);
        assert_eq!(status, ReadStatus::Complete(Bytes::from_static(b"abcd")));

        let mut source = closed_after(b"");
        let status = assert_ok!(read_exact(&mut source, 4, Duration::MAX).await);
        assert_eq!(status, ReadStatus::CleanEof);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mut source = tokio_test::io::Builder::new()
            .read(b"ab")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let err = read_exact(&mut source, 12, TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
