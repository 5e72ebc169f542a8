use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::process::ChildStdout;
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::process::{ProcessHandle, TerminalEvent};

/// Response body fed directly from ffmpeg's stdout.
///
/// Dropping the body ends the stream: ffmpeg is killed if still running and
/// the concurrency slot is released.
pub struct TranscodeBody {
    first: Option<Bytes>,
    inner: ReaderStream<ChildStdout>,
    handle: ProcessHandle,
    finished: bool,
}

impl TranscodeBody {
    pub(crate) fn new(
        first: Option<Bytes>,
        inner: ReaderStream<ChildStdout>,
        handle: ProcessHandle,
    ) -> Self {
        Self {
            first,
            inner,
            handle,
            finished: false,
        }
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }
}

impl Stream for TranscodeBody {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if let Some(chunk) = this.first.take() {
            this.handle.record_sent(chunk.len());
            return Poll::Ready(Some(Ok(chunk)));
        }
        if this.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.handle.record_sent(chunk.len());
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(stream_id = %this.handle.stream_id(), error = %e, "reading ffmpeg output failed");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TranscodeBody {
    fn drop(&mut self) {
        let event = if self.finished {
            TerminalEvent::ResponseFinished
        } else {
            TerminalEvent::ResponseClosed
        };
        self.handle.terminate(event);
    }
}
