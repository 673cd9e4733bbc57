use std::io;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Bytes kept in memory from one stream, plus whether more was dropped.
pub(super) struct Captured {
    pub(super) bytes: Vec<u8>,
    pub(super) truncated: bool,
}

/// Copies the stream to `sink` and keeps the first `limit` bytes. Stops at
/// EOF or when `stop` fires, keeping what was read so far.
pub(super) async fn capture_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
    mut sink: File,
    stop: CancellationToken,
) -> io::Result<Captured> {
    let mut captured = Captured {
        bytes: Vec::new(),
        truncated: false,
    };
    let mut chunk = [0u8; 4096];
    loop {
        let n = tokio::select! {
            read = reader.read(&mut chunk) => read?,
            _ = stop.cancelled() => break,
        };
        if n == 0 {
            break;
        }
        sink.write_all(&chunk[..n]).await?;
        let room = limit.saturating_sub(captured.bytes.len());
        let keep = room.min(n);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        if keep < n {
            captured.truncated = true;
        }
    }
    sink.flush().await?;
    Ok(captured)
}
