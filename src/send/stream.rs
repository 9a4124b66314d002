//! Response body that credits the progress counter as hyper consumes chunks.

use axum::http::Method;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::config::SEND_CHUNK_SIZE;
use crate::server::handshake::PendingGuard;
use crate::server::lifecycle::{ShutdownReason, ShutdownSignal};
use crate::server::progress::{ProgressReporter, TransferCounter};

/// What finishing (or abandoning) a send body releases.
pub struct Completion {
    guard: Option<PendingGuard>,
    on_success: Option<ShutdownSignal>,
}

impl Completion {
    /// A browser request counted in the pending group.
    pub fn counted(guard: PendingGuard) -> Self {
        Self {
            guard: Some(guard),
            on_success: None,
        }
    }

    /// A direct client: a full download ends the session unless kept alive.
    /// HEAD requests never do.
    pub fn direct(shutdown: ShutdownSignal, keep_alive: bool, method: &Method) -> Self {
        Self {
            guard: None,
            on_success: (!keep_alive && *method != Method::HEAD).then_some(shutdown),
        }
    }

    fn release(&mut self, success: bool) {
        if let Some(shutdown) = self.on_success.take() {
            if success {
                shutdown.trigger(ShutdownReason::DirectDownloadComplete);
            }
        }
        self.guard.take();
    }
}

pub struct TrackedStream {
    inner: ReaderStream<File>,
    expected: u64,
    yielded: u64,
    uncredited: Option<u64>,
    counter: Arc<TransferCounter>,
    reporter: Option<ProgressReporter>,
    completion: Completion,
    done: bool,
}

impl TrackedStream {
    pub fn new(
        file: File,
        expected: u64,
        counter: Arc<TransferCounter>,
        reporter: ProgressReporter,
        completion: Completion,
    ) -> Self {
        Self {
            inner: ReaderStream::with_capacity(file, SEND_CHUNK_SIZE),
            expected,
            yielded: 0,
            uncredited: None,
            counter,
            reporter: Some(reporter),
            completion,
            done: false,
        }
    }

    fn credit(&mut self) {
        if let Some(bytes) = self.uncredited.take() {
            self.counter.add(bytes);
        }
    }

    fn finish(&mut self, success: bool) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(reporter) = self.reporter.take() {
            reporter.stop();
        }
        if success {
            tracing::info!(bytes = self.counter.transferred(), "Send finished");
        } else {
            tracing::warn!(
                sent = self.counter.transferred(),
                expected = self.expected,
                "Send aborted before the whole file was delivered"
            );
        }
        self.completion.release(success);
    }
}

impl Stream for TrackedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        // The previous chunk has been taken by hyper
        this.credit();

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.yielded += chunk.len() as u64;
                this.uncredited = Some(chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                tracing::error!("Failed to read payload: {err}");
                this.finish(false);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish(this.yielded >= this.expected);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // hyper stops polling once Content-Length bytes are out, so the
        // final chunk may never see a follow-up poll
        let complete = self.yielded >= self.expected;
        if complete {
            self.credit();
        }
        self.finish(complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::progress::{Direction, LogRenderer, ProgressTracker};
    use futures::StreamExt;

    async fn tracked(
        content: &[u8],
        completion: Completion,
    ) -> (TrackedStream, Arc<TransferCounter>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, content).await.unwrap();

        let tracker = ProgressTracker::new(Arc::new(LogRenderer));
        let counter = tracker.begin(Direction::Send, "payload.bin", Some(content.len() as u64));
        let reporter = tracker.spawn_reporter(counter.clone());
        let file = File::open(&path).await.unwrap();
        let stream = TrackedStream::new(
            file,
            content.len() as u64,
            counter.clone(),
            reporter,
            completion,
        );
        (stream, counter, dir)
    }

    #[tokio::test]
    async fn credits_every_byte_by_eof() {
        let content = vec![7u8; SEND_CHUNK_SIZE * 3 + 123];
        let shutdown = ShutdownSignal::new();
        let (mut stream, counter, _dir) =
            tracked(&content, Completion::direct(shutdown.clone(), false, &Method::GET)).await;

        let mut received = 0usize;
        let first = stream.next().await.unwrap().unwrap();
        received += first.len();
        // Not credited until the next poll
        assert_eq!(counter.transferred(), 0);

        while let Some(chunk) = stream.next().await {
            received += chunk.unwrap().len();
        }
        assert_eq!(received, content.len());
        assert_eq!(counter.transferred(), content.len() as u64);
        assert_eq!(shutdown.reason(), Some(ShutdownReason::DirectDownloadComplete));
    }

    #[tokio::test]
    async fn dropped_after_last_chunk_counts_as_complete() {
        let content = b"small file".to_vec();
        let shutdown = ShutdownSignal::new();
        let (mut stream, counter, _dir) =
            tracked(&content, Completion::direct(shutdown.clone(), false, &Method::GET)).await;

        stream.next().await.unwrap().unwrap();
        drop(stream);
        assert_eq!(counter.transferred(), content.len() as u64);
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn early_drop_does_not_end_direct_session() {
        let content = vec![1u8; SEND_CHUNK_SIZE * 4];
        let shutdown = ShutdownSignal::new();
        let (mut stream, counter, _dir) =
            tracked(&content, Completion::direct(shutdown.clone(), false, &Method::GET)).await;

        stream.next().await.unwrap().unwrap();
        drop(stream);
        assert_eq!(counter.transferred(), 0);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn keep_alive_direct_download_keeps_serving() {
        let shutdown = ShutdownSignal::new();
        let (stream, _counter, _dir) =
            tracked(b"abc", Completion::direct(shutdown.clone(), true, &Method::GET)).await;
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn head_of_empty_file_is_not_a_download() {
        let shutdown = ShutdownSignal::new();
        let (stream, _counter, _dir) =
            tracked(b"", Completion::direct(shutdown.clone(), false, &Method::HEAD)).await;
        drop(stream);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn empty_file_completes_immediately() {
        let shutdown = ShutdownSignal::new();
        let (stream, counter, _dir) =
            tracked(b"", Completion::direct(shutdown.clone(), false, &Method::GET)).await;
        drop(stream);
        assert_eq!(counter.transferred(), 0);
        assert!(shutdown.is_triggered());
    }
}
