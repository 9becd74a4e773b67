use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Bounded capture of everything the kernel writes to stderr.
///
/// A background reader appends to the buffer; the request path waits on
/// [`StderrBuffer::notified`] and drains the text with [`StderrBuffer::take`].
#[derive(Clone)]
pub struct StderrBuffer {
    inner: Arc<StderrInner>,
}

struct StderrInner {
    bytes: Mutex<Vec<u8>>,
    activity: Notify,
    limit: usize,
}

impl StderrBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(StderrInner {
                bytes: Mutex::new(Vec::new()),
                activity: Notify::new(),
                limit: limit.max(1),
            }),
        }
    }

    /// Append a chunk, dropping the oldest bytes beyond the limit
    pub async fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        let mut bytes = self.inner.bytes.lock().await;
        bytes.extend_from_slice(chunk);
        if bytes.len() > self.inner.limit {
            let excess = bytes.len() - self.inner.limit;
            bytes.drain(..excess);
        }
        drop(bytes);

        self.inner.activity.notify_one();
    }

    /// Drain the captured text. Trailing whitespace is removed.
    pub async fn take(&self) -> String {
        let mut bytes = self.inner.bytes.lock().await;
        let text = String::from_utf8_lossy(&bytes).trim_end().to_string();
        bytes.clear();
        text
    }

    /// Discard anything captured so far, logging it first
    pub async fn clear(&self) {
        let stale = self.take().await;
        if !stale.is_empty() {
            debug!("Discarding stale kernel stderr: {}", stale);
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.bytes.lock().await.is_empty()
    }

    /// Resolves after stderr activity. May wake for output that was already drained.
    pub async fn notified(&self) {
        self.inner.activity.notified().await
    }

    /// Copy a stream into the buffer until it closes
    pub async fn capture<R>(self, mut reader: R, label: String)
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!("[{}] stderr closed", label);
                    break;
                }
                Ok(n) => {
                    for line in String::from_utf8_lossy(&chunk[..n]).lines() {
                        if !line.trim().is_empty() {
                            debug!("[{}] stderr: {}", label, line);
                        }
                    }
                    self.append(&chunk[..n]).await;
                }
                Err(e) => {
                    warn!("[{}] Failed to read kernel stderr: {}", label, e);
                    break;
                }
            }
        }
        // Wake any waiter so it can notice the stream is gone
        self.inner.activity.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_take_drains_and_trims() {
        let buffer = StderrBuffer::new(1024);
        buffer.append(b"boom\n").await;

        assert_eq!(buffer.take().await, "boom");
        assert!(buffer.is_empty().await);
        assert_eq!(buffer.take().await, "");
    }

    #[tokio::test]
    async fn test_limit_keeps_newest_bytes() {
        let buffer = StderrBuffer::new(4);
        buffer.append(b"abcdef").await;
        assert_eq!(buffer.take().await, "cdef");
    }

    #[tokio::test]
    async fn test_append_wakes_waiter() {
        let buffer = StderrBuffer::new(64);
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                buffer.notified().await;
                buffer.take().await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.append(b"late").await;

        let text = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "late");
    }

    #[tokio::test]
    async fn test_capture_reads_until_eof() {
        let buffer = StderrBuffer::new(64);
        let input: &[u8] = b"line one\nline two\n";
        buffer.clone().capture(input, "test".to_string()).await;

        assert_eq!(buffer.take().await, "line one\nline two");
    }

    #[tokio::test]
    async fn test_clear_discards_stale_output() {
        let buffer = StderrBuffer::new(64);
        buffer.append(b"old warning").await;
        buffer.clear().await;
        assert!(buffer.is_empty().await);
    }
}
