//! Outgoing record batching.
//!
//! Records published through [`PublishQueue::publish_record`] accumulate in
//! memory and leave as one `topicDataRecordList` frame per flush.  The
//! flush timer is a spawned task that can be replaced or stopped at any
//! time; a flush already in progress always completes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tn_domain::error::{Error, Result};
use tn_protocol::{Record, TopicData};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::transport::FrameSender;

struct FlushTimer {
    period: Duration,
    cancel: CancellationToken,
}

struct QueueInner {
    pending: Mutex<Vec<Record>>,
    sender: Arc<dyn FrameSender>,
    /// Serializes flushes so batches leave in flush-invocation order.
    flush_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<FlushTimer>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.cancel.cancel();
        }
    }
}

#[derive(Clone)]
pub struct PublishQueue {
    inner: Arc<QueueInner>,
}

impl PublishQueue {
    pub fn new(sender: Arc<dyn FrameSender>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(Vec::new()),
                sender,
                flush_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn publish_record(&self, record: Record) {
        self.inner.pending.lock().push(record);
    }

    pub fn publish_record_list(&self, records: impl IntoIterator<Item = Record>) {
        self.inner.pending.lock().extend(records);
    }

    /// Send `record` as its own frame, bypassing the batch.
    pub async fn publish_record_immediately(&self, record: Record) -> Result<()> {
        self.inner.sender.send_frame(TopicData::record(record)).await
    }

    /// Send everything queued so far as a single batch.
    ///
    /// Returns the number of records sent.  A failed batch is logged and
    /// dropped; it is never re-queued.
    pub async fn flush(&self) -> Result<usize> {
        let _ordered = self.inner.flush_lock.lock().await;

        let batch = std::mem::take(&mut *self.inner.pending.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        match self.inner.sender.send_frame(TopicData::record_list(batch)).await {
            Ok(()) => {
                tracing::trace!(records = count, "publish batch flushed");
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(records = count, error = %e, "publish batch dropped");
                Err(e)
            }
        }
    }

    /// Install a flush timer with the given period, cancelling the
    /// previous one first.  The first tick fires one `period` from now.
    pub fn set_publish_interval(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(Error::Validation("publish interval must be non-zero".into()));
        }

        let mut slot = self.inner.timer.lock();
        if let Some(old) = slot.take() {
            old.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(run_timer(weak, period, cancel.clone()));

        tracing::debug!(period_ms = period.as_millis() as u64, "publish timer installed");
        *slot = Some(FlushTimer { period, cancel });
        Ok(())
    }

    pub fn publish_interval(&self) -> Option<Duration> {
        self.inner.timer.lock().as_ref().map(|t| t.period)
    }

    /// Cancel the flush timer.  Queued records stay queued.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn run_timer(queue: Weak<QueueInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = queue.upgrade() else { break };
        // Failures are already logged inside flush.
        let _ = PublishQueue { inner }.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSender;
    use serde_json::json;

    fn rec(topic: &str, n: i64) -> Record {
        Record::new(topic, json!(n))
    }

    #[tokio::test(start_paused = true)]
    async fn one_tick_sends_one_ordered_batch() {
        let sender = Arc::new(RecordingSender::default());
        let queue = PublishQueue::new(sender.clone());
        queue.set_publish_interval(Duration::from_millis(15)).unwrap();

        for n in 0..5 {
            queue.publish_record(rec("/a", n));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frames = sender.frames();
        assert_eq!(frames.len(), 1);
        let payloads: Vec<_> = frames[0]
            .clone()
            .into_records()
            .into_iter()
            .map(|r| r.payload)
            .collect();
        assert_eq!(payloads, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_ticks_send_nothing() {
        let sender = Arc::new(RecordingSender::default());
        let queue = PublishQueue::new(sender.clone());
        queue.set_publish_interval(Duration::from_millis(15)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sender.frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_records_never_join_a_batch() {
        let sender = Arc::new(RecordingSender::default());
        let queue = PublishQueue::new(sender.clone());
        queue.set_publish_interval(Duration::from_millis(15)).unwrap();

        queue.publish_record(rec("/batched", 1));
        queue
            .publish_record_immediately(rec("/now", 2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frames = sender.frames();
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], TopicData::TopicDataRecord(r) if r.topic == "/now"));
        let batch = frames[1].clone().into_records();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].topic, "/batched");
    }

    #[tokio::test(start_paused = true)]
    async fn resetting_interval_replaces_timer() {
        let sender = Arc::new(RecordingSender::default());
        let queue = PublishQueue::new(sender.clone());
        queue.set_publish_interval(Duration::from_millis(15)).unwrap();
        queue.set_publish_interval(Duration::from_millis(50)).unwrap();
        assert_eq!(queue.publish_interval(), Some(Duration::from_millis(50)));

        queue.publish_record(rec("/a", 1));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sender.frames().is_empty(), "old timer must be gone");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sender.frames().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_keeps_records_queued() {
        let sender = Arc::new(RecordingSender::default());
        let queue = PublishQueue::new(sender.clone());
        queue.set_publish_interval(Duration::from_millis(15)).unwrap();
        queue.stop();

        queue.publish_record(rec("/a", 1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sender.frames().is_empty());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.flush().await.unwrap(), 1);
        assert_eq!(sender.frames().len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_is_not_requeued() {
        let sender = Arc::new(RecordingSender::failing());
        let queue = PublishQueue::new(sender.clone());
        queue.publish_record_list(vec![rec("/a", 1), rec("/a", 2)]);

        assert!(queue.flush().await.is_err());
        assert!(queue.is_empty());
        assert_eq!(queue.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_interval_rejected() {
        let queue = PublishQueue::new(Arc::new(RecordingSender::default()));
        let err = queue.set_publish_interval(Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
