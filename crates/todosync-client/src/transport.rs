//! Framed reads and writes over a byte stream.
//!
//! Shared by the client and the server drivers. Every operation is bounded by
//! a timeout; a timeout or I/O failure ends the session, never the process.

use std::{future::Future, io, time::Duration};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use todosync_core::SyncError;
use todosync_proto::{FRAME_HEADER_SIZE, FrameHeader};

async fn bounded<T>(
    timeout: Duration,
    waiting_for: &'static str,
    op: impl Future<Output = io::Result<T>>,
) -> Result<T, SyncError> {
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SyncError::Timeout { waiting_for }),
    }
}

/// Read one frame and return its body.
pub async fn read_frame<R>(reader: &mut R, timeout: Duration) -> Result<Vec<u8>, SyncError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    bounded(timeout, "frame header", reader.read_exact(&mut header)).await?;
    let header = FrameHeader::from_bytes(header)?;

    let mut body = vec![0u8; header.body_len()];
    bounded(timeout, "frame body", reader.read_exact(&mut body)).await?;
    Ok(body)
}

/// Read up to `len` raw bytes in windows of `chunk_size`.
///
/// Stops early at end of stream; the caller compares the length with what
/// was announced.
pub async fn read_payload<R>(
    reader: &mut R,
    len: usize,
    chunk_size: usize,
    timeout: Duration,
) -> Result<Vec<u8>, SyncError>
where
    R: AsyncRead + Unpin,
{
    let chunk_size = chunk_size.max(1);
    let mut payload = Vec::with_capacity(len);
    let mut chunk = vec![0u8; chunk_size.min(len.max(1))];

    while payload.len() < len {
        let want = chunk.len().min(len - payload.len());
        let n = bounded(timeout, "payload", reader.read(&mut chunk[..want])).await?;
        if n == 0 {
            tracing::debug!(expected = len, received = payload.len(), "payload ended early");
            break;
        }
        payload.extend_from_slice(&chunk[..n]);
    }
    Ok(payload)
}

/// Write `bytes` and flush.
pub async fn write_all<W>(writer: &mut W, bytes: &[u8], timeout: Duration) -> Result<(), SyncError>
where
    W: AsyncWrite + Unpin,
{
    bounded(timeout, "write", async {
        writer.write_all(bytes).await?;
        writer.flush().await
    })
    .await
}

#[cfg(test)]
mod tests {
    use todosync_proto::encode_frame;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let frame = encode_frame(b"hello frame").unwrap();

        let writer = tokio::spawn(async move { write_all(&mut a, &frame, TIMEOUT).await });
        let body = read_frame(&mut b, TIMEOUT).await.unwrap();
        writer.await.unwrap().unwrap();

        assert_eq!(body, b"hello frame");
    }

    #[tokio::test]
    async fn oversized_frame_header_is_refused() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert!(matches!(read_frame(&mut b, TIMEOUT).await, Err(SyncError::Proto(_))));
    }

    #[tokio::test]
    async fn closed_stream_mid_frame_is_io_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        assert!(matches!(read_frame(&mut b, TIMEOUT).await, Err(SyncError::Io(_))));
    }

    #[tokio::test]
    async fn payload_is_read_across_many_chunks() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();

        tokio::spawn(async move { write_all(&mut a, &data, TIMEOUT).await });
        let payload = read_payload(&mut b, expected.len(), 4096, TIMEOUT).await.unwrap();
        assert_eq!(payload, expected);
    }

    #[tokio::test]
    async fn payload_stops_at_eof() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&[7u8; 100]).await.unwrap();
        drop(a);
        let payload = read_payload(&mut b, 500, 64, TIMEOUT).await.unwrap();
        assert_eq!(payload.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (_a, mut b) = tokio::io::duplex(64);
        let err = read_frame(&mut b, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout { waiting_for: "frame header" }));
    }
}
