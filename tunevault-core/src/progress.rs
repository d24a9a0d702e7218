use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::fetch::ByteStream;

/// A point-in-time view of a transfer.
///
/// `percentage` is `None` when the expected length was not declared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    pub transferred_bytes: u64,
    pub elapsed_ms: u64,
    pub bytes_per_second: f64,
    pub percentage: Option<f64>,
}

/// Wraps a byte stream and reports transfer statistics as data flows.
///
/// Samples are emitted at most once per interval plus a final sample when
/// the stream ends. Emission goes through an unbounded channel, so the meter
/// never blocks or buffers the transfer itself.
pub struct ProgressMeter {
    inner: ByteStream,
    expected: Option<u64>,
    interval: Duration,
    transferred: u64,
    started: Instant,
    last_emit: Instant,
    finished: bool,
    samples: mpsc::UnboundedSender<ProgressSample>,
}

impl ProgressMeter {
    pub fn wrap(
        inner: ByteStream,
        expected_length: Option<u64>,
        sample_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ProgressSample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let meter = Self {
            inner,
            expected: expected_length.filter(|len| *len > 0),
            interval: sample_interval,
            transferred: 0,
            started: now,
            last_emit: now,
            finished: false,
            samples: tx,
        };
        (meter, rx)
    }

    fn sample(&self, terminal: bool) -> ProgressSample {
        let elapsed = self.started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let bytes_per_second = if elapsed.as_secs_f64() > 0.0 {
            self.transferred as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let percentage = self.expected.map(|expected| {
            if terminal {
                100.0
            } else {
                (self.transferred as f64 / expected as f64 * 100.0).min(100.0)
            }
        });
        ProgressSample {
            transferred_bytes: self.transferred,
            elapsed_ms,
            bytes_per_second,
            percentage,
        }
    }
}

impl Stream for ProgressMeter {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.transferred += chunk.len() as u64;
                if this.last_emit.elapsed() >= this.interval {
                    let _ = this.samples.send(this.sample(false));
                    this.last_emit = Instant::now();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    let _ = this.samples.send(this.sample(true));
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
