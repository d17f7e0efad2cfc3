//! Size- and time-triggered batching
//!
//! Rows are buffered and handed to a [`BatchCommit`] when either the buffer
//! reaches the high-water mark or the flush interval passes without a flush,
//! whichever happens first. Both triggers race in one `select!`, so a slow
//! trickle of rows is still committed within one interval of arriving.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use cpe_common::NormalizedRow;

use super::WriteSummary;
use crate::config::IngestConfig;
use crate::error::Result;

/// Upper bound on rows reserved ahead of time; larger batches grow on demand
const MAX_PREALLOCATED_ROWS: usize = 10_000;

/// Commits one batch of rows to storage
#[async_trait]
pub trait BatchCommit: Send {
    async fn commit(&mut self, batch: &[NormalizedRow]) -> Result<()>;
}

/// When buffered rows are flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub high_water_mark: usize,
    pub interval: Duration,
}

impl From<&IngestConfig> for FlushPolicy {
    fn from(config: &IngestConfig) -> Self {
        Self {
            high_water_mark: config.high_water_mark,
            interval: config.flush_interval,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    HighWater,
    Timer,
    Drain,
}

/// Buffer rows from `rows` and commit them according to `policy`
///
/// Returns once the queue is closed and the remainder is committed. The
/// first failed commit ends the call with that error; nothing is retried.
pub async fn drain_batched<C>(
    rows: &mut mpsc::Receiver<NormalizedRow>,
    policy: FlushPolicy,
    committer: &mut C,
) -> Result<WriteSummary>
where
    C: BatchCommit + ?Sized,
{
    let mut ticker = interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut batch: Vec<NormalizedRow> = Vec::with_capacity(preallocated_rows(policy));
    let mut summary = WriteSummary::default();

    loop {
        tokio::select! {
            received = rows.recv() => {
                let Some(row) = received else {
                    break;
                };
                batch.push(row);
                summary.peak_buffered = summary.peak_buffered.max(batch.len());

                if batch.len() >= policy.high_water_mark {
                    flush(committer, &mut batch, &mut summary, FlushTrigger::HighWater).await?;
                    ticker.reset();
                }
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(committer, &mut batch, &mut summary, FlushTrigger::Timer).await?;
                }
            },
        }
    }

    if !batch.is_empty() {
        flush(committer, &mut batch, &mut summary, FlushTrigger::Drain).await?;
    }

    Ok(summary)
}

fn preallocated_rows(policy: FlushPolicy) -> usize {
    policy.high_water_mark.min(MAX_PREALLOCATED_ROWS)
}

async fn flush<C>(
    committer: &mut C,
    batch: &mut Vec<NormalizedRow>,
    summary: &mut WriteSummary,
    trigger: FlushTrigger,
) -> Result<()>
where
    C: BatchCommit + ?Sized,
{
    // The committed batch is dropped, not cleared for reuse
    let capacity = batch.len().min(MAX_PREALLOCATED_ROWS);
    let pending = std::mem::replace(batch, Vec::with_capacity(capacity));
    committer.commit(&pending).await?;

    summary.rows_written += pending.len() as u64;
    summary.flushes += 1;

    match trigger {
        FlushTrigger::Timer => debug!(
            rows = pending.len(),
            total = summary.rows_written,
            "Flushed batch on timer"
        ),
        _ => info!(
            rows = pending.len(),
            total = summary.rows_written,
            trigger = ?trigger,
            "Inserted batch"
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use cpe_common::cpe::WellFormedName;

    /// Records the size of every committed batch
    #[derive(Default)]
    struct RecordingCommit {
        batches: Vec<Vec<String>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl BatchCommit for RecordingCommit {
        async fn commit(&mut self, batch: &[NormalizedRow]) -> Result<()> {
            if self.fail_on == Some(self.batches.len()) {
                return Err(IngestError::Stage("disk full".to_string()));
            }
            self.batches
                .push(batch.iter().map(|row| row.title.clone()).collect());
            Ok(())
        }
    }

    fn row(i: usize) -> NormalizedRow {
        let name: WellFormedName = format!("cpe:2.3:a:vendor:product{i}").parse().unwrap();
        NormalizedRow::new(format!("row {i}"), &name, Vec::new())
    }

    fn policy(high_water_mark: usize, secs: u64) -> FlushPolicy {
        FlushPolicy {
            high_water_mark,
            interval: Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_water_mark_splits_instant_input() {
        let (tx, mut rx) = mpsc::channel(16);
        for i in 0..7 {
            tx.send(row(i)).await.unwrap();
        }
        drop(tx);

        let mut committer = RecordingCommit::default();
        let summary = drain_batched(&mut rx, policy(3, 15), &mut committer).await.unwrap();

        let sizes: Vec<usize> = committer.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(summary.flushes, 3);
        assert_eq!(summary.rows_written, 7);
        assert_eq!(summary.peak_buffered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_slow_trickle() {
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for i in 0..4 {
                tx.send(row(i)).await.unwrap();
                tokio::time::sleep(Duration::from_secs(40)).await;
            }
        });

        let mut committer = RecordingCommit::default();
        let summary = drain_batched(&mut rx, policy(1000, 15), &mut committer).await.unwrap();

        // Every row sits alone in the buffer until the timer picks it up
        assert_eq!(summary.flushes, 4);
        assert_eq!(summary.peak_buffered, 1);
        assert!(committer.batches.iter().all(|b| b.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticks_do_not_count_as_flushes() {
        let (tx, mut rx) = mpsc::channel::<NormalizedRow>(1);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(120)).await;
            drop(tx);
        });

        let mut committer = RecordingCommit::default();
        let summary = drain_batched(&mut rx, policy(10, 15), &mut committer).await.unwrap();

        assert_eq!(summary, WriteSummary::default());
        assert!(committer.batches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_never_exceeds_high_water_mark() {
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for i in 0..103 {
                tx.send(row(i)).await.unwrap();
            }
        });

        let mut committer = RecordingCommit::default();
        let summary = drain_batched(&mut rx, policy(10, 15), &mut committer).await.unwrap();

        assert!(summary.peak_buffered <= 10);
        assert!(committer.batches.iter().all(|b| b.len() <= 10));
        assert_eq!(summary.rows_written, 103);

        let order: Vec<String> = committer.batches.concat();
        let expected: Vec<String> = (0..103).map(|i| format!("row {i}")).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_high_water_mark_does_not_preallocate() {
        let (tx, mut rx) = mpsc::channel(4);
        for i in 0..3 {
            tx.send(row(i)).await.unwrap();
        }
        drop(tx);

        let mut committer = RecordingCommit::default();
        let summary = drain_batched(&mut rx, policy(usize::MAX, 15), &mut committer)
            .await
            .unwrap();

        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.flushes, 1);
        assert_eq!(preallocated_rows(policy(usize::MAX, 15)), MAX_PREALLOCATED_ROWS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_commit_aborts() {
        let (tx, mut rx) = mpsc::channel(16);
        for i in 0..9 {
            tx.send(row(i)).await.unwrap();
        }
        drop(tx);

        let mut committer = RecordingCommit {
            fail_on: Some(1),
            ..Default::default()
        };
        let err = drain_batched(&mut rx, policy(3, 15), &mut committer)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Stage(_)));
        assert_eq!(committer.batches.len(), 1);
    }
}
