//! Chunked streaming with per-chunk bookkeeping.
//!
//! A producer task reads the backend's NDJSON body and forwards raw chunks
//! onto a bounded channel; the caller consumes them at its own pace. The
//! producer owns the clocks: first chunk stamps TTFT, every chunk resets
//! the activity timer, the `done` chunk stamps the streaming duration and
//! yields the trailing token counts.

use crate::error::ProxyError;
use crate::types::StreamChunkMeta;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use herd_core::ErrorKind;
use std::io;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// A single NDJSON line can carry a full context array; cap it generously.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Final accounting for one stream.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub ttft: Option<Duration>,
    pub streaming_duration: Option<Duration>,
    pub tokens_prompt: Option<u64>,
    pub tokens_generated: Option<u64>,
    pub chunks: u64,
    /// Set when the stream terminated abnormally.
    pub error: Option<ProxyError>,
}

/// The caller's half of a streaming exchange.
///
/// Read chunks with [`next_chunk`] until `None`, then call [`finish`] for
/// the accounting. Dropping the handle cancels the producer.
///
/// [`next_chunk`]: StreamHandle::next_chunk
/// [`finish`]: StreamHandle::finish
pub struct StreamHandle {
    pub(crate) receiver: mpsc::Receiver<Bytes>,
    pub(crate) outcome: oneshot::Receiver<StreamOutcome>,
    pub(crate) cancel_guard: tokio_util::sync::DropGuard,
    pub(crate) _permit: Option<OwnedSemaphorePermit>,
}

impl StreamHandle {
    /// The next raw chunk (one NDJSON line, newline included), or `None`
    /// when the stream ended.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Waits for the producer's final accounting.
    pub async fn finish(mut self) -> StreamOutcome {
        // Drain anything the caller did not consume so the producer can
        // reach its accounting send.
        self.receiver.close();
        while self.receiver.recv().await.is_some() {}
        // Finishing is not cancelling.
        drop(self.cancel_guard.disarm());
        self.outcome.await.unwrap_or_else(|_| StreamOutcome {
            error: Some(ProxyError::new(
                ErrorKind::InternalState,
                "stream producer vanished without accounting",
            )),
            ..StreamOutcome::default()
        })
    }
}

pub(crate) struct StreamTask {
    pub response: reqwest::Response,
    pub buffer_size: usize,
    pub activity_timeout: Duration,
    pub overall_timeout: Duration,
    pub cancel: CancellationToken,
    /// Stamped when the request was sent; TTFT is measured from here.
    pub started: tokio::time::Instant,
}

impl StreamTask {
    /// Spawns the producer; returns the channel/outcome pair for the
    /// handle.
    pub fn spawn(self) -> (mpsc::Receiver<Bytes>, oneshot::Receiver<StreamOutcome>) {
        let (tx, rx) = mpsc::channel(self.buffer_size.max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.run(tx).await;
            let _ = outcome_tx.send(outcome);
        });
        (rx, outcome_rx)
    }

    async fn run(self, tx: mpsc::Sender<Bytes>) -> StreamOutcome {
        let StreamTask {
            response,
            buffer_size: _,
            activity_timeout,
            overall_timeout,
            cancel,
            started,
        } = self;
        let mut outcome = StreamOutcome::default();
        let overall_deadline = started + overall_timeout;

        let byte_stream = response.bytes_stream().map_err(io::Error::other);
        let reader = StreamReader::new(byte_stream);
        let mut lines = FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        );

        let mut first_chunk_at: Option<tokio::time::Instant> = None;
        let mut last_chunk_at = started;

        // One reusable timer covers both the overall deadline and the
        // per-chunk activity window.
        let deadline_sleep = tokio::time::sleep_until(overall_deadline);
        tokio::pin!(deadline_sleep);

        loop {
            let effective = overall_deadline.min(last_chunk_at + activity_timeout);
            deadline_sleep.as_mut().reset(effective);

            tokio::select! {
                _ = cancel.cancelled() => {
                    outcome.error = Some(ProxyError::new(ErrorKind::Cancelled, "stream cancelled"));
                    break;
                }
                _ = &mut deadline_sleep => {
                    outcome.error = Some(ProxyError::timeout(if first_chunk_at.is_some() {
                        "streaming activity timeout"
                    } else {
                        "no first chunk before deadline"
                    }));
                    break;
                }
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        let now = tokio::time::Instant::now();
                        if first_chunk_at.is_none() {
                            first_chunk_at = Some(now);
                            outcome.ttft = Some(now.duration_since(started));
                        }
                        last_chunk_at = now;
                        outcome.chunks += 1;

                        let meta = StreamChunkMeta::parse(&line);
                        let mut payload = line.into_bytes();
                        payload.push(b'\n');
                        if tx.send(Bytes::from(payload)).await.is_err() {
                            // Caller stopped reading without cancelling;
                            // treat like cancellation.
                            outcome.error =
                                Some(ProxyError::new(ErrorKind::Cancelled, "consumer gone"));
                            break;
                        }
                        if meta.done {
                            outcome.tokens_generated = meta.eval_count;
                            outcome.tokens_prompt = meta.prompt_eval_count;
                            if let Some(first) = first_chunk_at {
                                outcome.streaming_duration = Some(now.duration_since(first));
                            }
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        outcome.error = Some(match e {
                            LinesCodecError::MaxLineLengthExceeded => ProxyError::new(
                                ErrorKind::BadRequest,
                                "streaming chunk exceeded line limit",
                            ),
                            LinesCodecError::Io(io_err) => ProxyError::new(
                                ErrorKind::ConnectionReset,
                                format!("stream read failed: {io_err}"),
                            ),
                        });
                        break;
                    }
                    None => {
                        // Ended without a done marker.
                        outcome.error = Some(ProxyError::new(
                            ErrorKind::ConnectionReset,
                            "stream ended before completion marker",
                        ));
                        break;
                    }
                },
            }
        }

        if outcome.streaming_duration.is_none() {
            if let Some(first) = first_chunk_at {
                outcome.streaming_duration =
                    Some(last_chunk_at.duration_since(first));
            }
        }
        outcome
    }
}
