//! Bounded capture of a child's output stream.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const READ_CHUNK: usize = 8192;

/// Text kept from one stream.
#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub text: String,
    pub truncated: bool,
}

/// Marker appended to a stream that exceeded the capture limit.
pub fn truncation_marker(omitted_bytes: u64) -> String {
    format!(
        "\n[... output truncated: {} bytes omitted ...]\n",
        omitted_bytes
    )
}

/// Marker appended when capture stopped before the stream closed.
pub const ABANDONED_MARKER: &str =
    "\n[... output capture stopped: stream still open after process exit ...]\n";

/// Read `reader` to EOF or until `stop` fires, keeping at most `limit` bytes.
///
/// Reading continues past the limit so the child never blocks on a full pipe;
/// the excess is counted and discarded. Whatever was read before `stop` is
/// kept.
pub(crate) async fn capture<R>(mut reader: R, limit: usize, stop: CancellationToken) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut kept: Vec<u8> = Vec::with_capacity(limit.min(64 * 1024));
    let mut total: u64 = 0;
    let mut buf = [0u8; READ_CHUNK];
    let mut abandoned = false;

    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            _ = stop.cancelled() => {
                abandoned = true;
                break;
            }
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                warn!(error = %e, "Error reading process output");
                break;
            }
        }
    }

    let omitted = total - kept.len() as u64;
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if omitted > 0 {
        text.push_str(&truncation_marker(omitted));
    }
    if abandoned {
        text.push_str(ABANDONED_MARKER);
    }

    Captured {
        text,
        truncated: omitted > 0 || abandoned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_within_limit() {
        let captured = capture(&b"hello\nworld\n"[..], 1024, CancellationToken::new()).await;
        assert_eq!(captured.text, "hello\nworld\n");
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn test_capture_truncates_with_marker() {
        let data = vec![b'a'; 20_000];
        let captured = capture(&data[..], 100, CancellationToken::new()).await;
        assert!(captured.truncated);
        assert!(captured.text.starts_with(&"a".repeat(100)));
        assert!(captured.text.ends_with(&truncation_marker(19_900)));
    }

    #[tokio::test]
    async fn test_capture_invalid_utf8_is_lossy() {
        let bytes = [0x66, 0x6f, 0xff, 0x6f];
        let captured = capture(&bytes[..], 16, CancellationToken::new()).await;
        assert_eq!(captured.text, "fo\u{fffd}o");
    }

    #[tokio::test]
    async fn test_stop_keeps_partial_output() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = tokio::io::duplex(1024);
        let stop = CancellationToken::new();
        let task = tokio::spawn(capture(reader, 1024, stop.clone()));

        writer.write_all(b"partial line\n").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop.cancel();

        let captured = task.await.unwrap();
        assert!(captured.truncated);
        assert_eq!(captured.text, format!("partial line\n{}", ABANDONED_MARKER));
        drop(writer);
    }
}
