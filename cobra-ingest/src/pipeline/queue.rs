//! Bounded work queue and the enrichment worker pool
//!
//! A video id is claimed when it is enqueued and released when its worker
//! finishes, so a video that is queued or running is never enqueued twice and
//! never processed by two workers at once.

use super::{Pipeline, ProcessOutcome};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Claims = Arc<Mutex<HashSet<i64>>>;

/// Producer side of the work queue
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<i64>,
    claims: Claims,
}

/// Consumer side, handed to [`run_workers`]
pub struct WorkReceiver {
    rx: mpsc::Receiver<i64>,
    claims: Claims,
}

pub fn work_queue(capacity: usize) -> (WorkQueue, WorkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let claims: Claims = Arc::new(Mutex::new(HashSet::new()));
    (
        WorkQueue {
            tx,
            claims: Arc::clone(&claims),
        },
        WorkReceiver { rx, claims },
    )
}

fn lock_claims(claims: &Claims) -> std::sync::MutexGuard<'_, HashSet<i64>> {
    claims.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkQueue {
    /// Queue a video for enrichment
    ///
    /// Returns `false` when the video is already queued or running, or when
    /// the workers have stopped. Waits while the queue is full.
    pub async fn enqueue(&self, video_id: i64) -> bool {
        if !lock_claims(&self.claims).insert(video_id) {
            debug!(video_id, "Video already queued or in flight");
            return false;
        }

        if self.tx.send(video_id).await.is_err() {
            lock_claims(&self.claims).remove(&video_id);
            warn!(video_id, "Work queue closed, video not enqueued");
            return false;
        }
        true
    }

    /// Queue several videos; returns how many were newly queued
    pub async fn enqueue_all(&self, video_ids: impl IntoIterator<Item = i64>) -> usize {
        let mut queued = 0;
        for video_id in video_ids {
            if self.enqueue(video_id).await {
                queued += 1;
            }
        }
        queued
    }

    /// Videos queued or being processed
    pub fn in_flight(&self) -> usize {
        lock_claims(&self.claims).len()
    }

    pub fn is_claimed(&self, video_id: i64) -> bool {
        lock_claims(&self.claims).contains(&video_id)
    }
}

/// Releases a claim when processing of the video ends (including on panic)
struct ClaimGuard {
    claims: Claims,
    video_id: i64,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        lock_claims(&self.claims).remove(&self.video_id);
    }
}

/// Tally of what the worker pool did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: usize,
    pub enriched: usize,
    pub notified: usize,
    pub already_complete: usize,
    pub stalled: usize,
    pub cancelled: usize,
    pub errors: usize,
    /// Shutdown grace period ran out and in-flight stages were aborted
    pub aborted: bool,
}

impl WorkerReport {
    fn record(&mut self, outcome: &Result<ProcessOutcome, cobra_common::Error>) {
        self.processed += 1;
        match outcome {
            Ok(ProcessOutcome::Enriched { notified }) => {
                self.enriched += 1;
                if *notified {
                    self.notified += 1;
                }
            }
            Ok(ProcessOutcome::AlreadyComplete) | Ok(ProcessOutcome::Missing) => {
                self.already_complete += 1
            }
            Ok(ProcessOutcome::Stalled { .. }) => self.stalled += 1,
            Ok(ProcessOutcome::Cancelled) => self.cancelled += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// Drain the queue with up to `workers` videos in flight
///
/// Returns when every [`WorkQueue`] handle has been dropped and the queue is
/// empty, or when `shutdown` fires. On shutdown no new videos are started;
/// in-flight videos get `grace` to finish, after which their stages are
/// cancelled. Cancelled stages leave no partial writes.
pub async fn run_workers(
    receiver: WorkReceiver,
    pipeline: Arc<Pipeline>,
    workers: usize,
    shutdown: CancellationToken,
    grace: Duration,
) -> WorkerReport {
    let WorkReceiver { rx, claims } = receiver;
    let abort = CancellationToken::new();
    let report = Arc::new(Mutex::new(WorkerReport::default()));

    let stop_intake = {
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    };

    info!(workers, "Enrichment workers started");

    let processing = ReceiverStream::new(rx)
        .take_until(stop_intake)
        .for_each_concurrent(workers.max(1), |video_id| {
            let pipeline = Arc::clone(&pipeline);
            let abort = abort.clone();
            let report = Arc::clone(&report);
            let claim = ClaimGuard {
                claims: Arc::clone(&claims),
                video_id,
            };

            async move {
                let _claim = claim;
                let outcome = pipeline.process_video(video_id, &abort).await;
                match &outcome {
                    Ok(ProcessOutcome::Stalled { stage, error }) => {
                        debug!(video_id, stage = %stage, error = %error, "Video stalled, moving on")
                    }
                    Err(e) => error!(video_id, error = %e, "Video processing failed"),
                    Ok(_) => {}
                }
                report
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&outcome);
            }
        });
    tokio::pin!(processing);

    let mut aborted = false;
    tokio::select! {
        _ = &mut processing => {}
        _ = shutdown.cancelled() => {
            info!(grace_secs = grace.as_secs(), "Shutdown requested, waiting for in-flight videos");
            if tokio::time::timeout(grace, &mut processing).await.is_err() {
                warn!("Grace period elapsed, cancelling in-flight stages");
                aborted = true;
                abort.cancel();
                processing.await;
            }
        }
    }

    let mut final_report = report
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    final_report.aborted = aborted;

    info!(
        processed = final_report.processed,
        enriched = final_report.enriched,
        stalled = final_report.stalled,
        cancelled = final_report.cancelled,
        errors = final_report.errors,
        "Enrichment workers stopped"
    );
    final_report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let (queue, _receiver) = work_queue(8);
        assert!(queue.enqueue(1).await);
        assert!(!queue.enqueue(1).await);
        assert!(queue.enqueue(2).await);
        assert_eq!(queue.in_flight(), 2);
        assert!(queue.is_claimed(1));
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped() {
        let (queue, receiver) = work_queue(8);
        drop(receiver);
        assert!(!queue.enqueue(5).await);
        assert!(!queue.is_claimed(5));
    }

    #[test]
    fn test_claim_guard_releases() {
        let (queue, receiver) = work_queue(1);
        lock_claims(&receiver.claims).insert(3);
        assert!(queue.is_claimed(3));
        drop(ClaimGuard {
            claims: Arc::clone(&receiver.claims),
            video_id: 3,
        });
        assert!(!queue.is_claimed(3));
    }
}
