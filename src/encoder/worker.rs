//! Dedicated encoder thread for one session
//!
//! The capture pump hands samples over with a non-blocking `try_send`; the
//! thread drains them with `blocking_recv`. Finalize is a barrier: once it
//! begins, every further submission is rejected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::data::{DeveloperMetadata, MediaArtifact, MediaSample};
use crate::error::CaptureError;

use super::{Encoder, EncoderSettings};

enum EncoderCommand {
    Sample(MediaSample),
    Finalize(DeveloperMetadata),
}

/// Why a sample was not accepted; the sample is handed back
#[derive(Debug)]
pub enum SubmitError {
    /// Finalize has begun
    Finalizing(MediaSample),
    /// Queue is full, try again later
    Full(MediaSample),
    /// The encoder stopped, usually after a fatal error
    Closed(MediaSample),
}

/// Cloneable submission side of an encoder
#[derive(Clone)]
pub struct EncoderInput {
    tx: mpsc::Sender<EncoderCommand>,
    accepting: Arc<AtomicBool>,
}

impl EncoderInput {
    pub fn submit(&self, sample: MediaSample) -> Result<(), SubmitError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError::Finalizing(sample));
        }
        self.tx
            .try_send(EncoderCommand::Sample(sample))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(EncoderCommand::Sample(s)) => SubmitError::Full(s),
                mpsc::error::TrySendError::Closed(EncoderCommand::Sample(s)) => {
                    SubmitError::Closed(s)
                }
                _ => unreachable!("only samples are submitted"),
            })
    }

    /// Wait for queue space instead of failing when full
    pub async fn send(&self, sample: MediaSample) -> Result<(), SubmitError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError::Finalizing(sample));
        }
        self.tx
            .send(EncoderCommand::Sample(sample))
            .await
            .map_err(|e| match e.0 {
                EncoderCommand::Sample(s) => SubmitError::Closed(s),
                EncoderCommand::Finalize(_) => unreachable!("only samples are submitted"),
            })
    }

    /// Free slots in the queue
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Fraction of the queue in use, 0.0 to 1.0
    pub fn fill(&self) -> f64 {
        let max = self.tx.max_capacity().max(1);
        1.0 - self.tx.capacity() as f64 / max as f64
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner of a running encoder thread
pub struct EncoderHandle {
    input: EncoderInput,
    result_rx: oneshot::Receiver<Result<MediaArtifact, CaptureError>>,
}

impl EncoderHandle {
    /// Create the output file, then start the encoder thread
    pub fn spawn(settings: EncoderSettings) -> Result<Self, CaptureError> {
        let (tx, rx) = mpsc::channel(settings.queue_depth.max(1));
        let (result_tx, result_rx) = oneshot::channel();
        let encoder = Encoder::create(settings)?;

        std::thread::Builder::new()
            .name("playcast-encoder".to_string())
            .spawn(move || run_encoder(encoder, rx, result_tx))?;

        Ok(Self {
            input: EncoderInput {
                tx,
                accepting: Arc::new(AtomicBool::new(true)),
            },
            result_rx,
        })
    }

    pub fn input(&self) -> EncoderInput {
        self.input.clone()
    }

    pub fn submit(&self, sample: MediaSample) -> Result<(), SubmitError> {
        self.input.submit(sample)
    }

    /// Stop accepting samples and wait (bounded) for the finished file
    ///
    /// If the encoder already died, its error is returned instead. On timeout
    /// the thread keeps going and deletes whatever it eventually finishes.
    pub async fn finalize(
        self,
        metadata: DeveloperMetadata,
        timeout: Duration,
    ) -> Result<MediaArtifact, CaptureError> {
        self.input.accepting.store(false, Ordering::SeqCst);

        let finalize = async {
            // Closed means the thread already exited with a result
            let _ = self.input.tx.send(EncoderCommand::Finalize(metadata)).await;
            self.result_rx.await
        };

        match tokio::time::timeout(timeout, finalize).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CaptureError::Encoder("encoder exited without a result".into())),
            Err(_) => Err(CaptureError::Encoder(format!(
                "finalize did not complete within {:?}",
                timeout
            ))),
        }
    }

    /// Discard the recording; the thread removes the partial file
    pub fn abort(self) {
        self.input.accepting.store(false, Ordering::SeqCst);
        // Dropping the last sender ends the thread's receive loop
    }
}

fn run_encoder(
    mut encoder: Encoder,
    mut rx: mpsc::Receiver<EncoderCommand>,
    result_tx: oneshot::Sender<Result<MediaArtifact, CaptureError>>,
) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            EncoderCommand::Sample(sample) => {
                if let Err(e) = encoder.push(sample) {
                    error!("Encoder failed, ending session: {}", e);
                    encoder.abort();
                    let _ = result_tx.send(Err(e));
                    return;
                }
            }
            EncoderCommand::Finalize(metadata) => {
                // Anything queued behind the barrier raced the flag and is dropped
                let result = encoder.finish(metadata);
                if let Err(ref e) = result {
                    error!("Failed to finalize recording: {}", e);
                }
                if let Err(Ok(artifact)) = result_tx.send(result) {
                    warn!("Finalize was abandoned, removing {:?}", artifact.path);
                    if let Err(e) = std::fs::remove_file(&artifact.path) {
                        warn!("Failed to remove abandoned recording: {}", e);
                    }
                }
                return;
            }
        }
    }

    info!("Encoder input closed without finalize, discarding recording");
    encoder.abort();
    if result_tx.send(Err(CaptureError::ExportCanceled)).is_err() {
        warn!("Nobody waiting on aborted encoder");
    }
}
