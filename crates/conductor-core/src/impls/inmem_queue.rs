//! In-memory job queue.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::domain::envelope::JobMessage;
use crate::ports::job_queue::{Delivery, JobQueue, QueueError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub in_flight: usize,
    pub acked: usize,
    pub requeued: usize,
    pub dead: usize,
}

struct Entry {
    message: JobMessage,
    deliveries: u32,
}

#[derive(Default)]
struct InMemoryJobQueueState {
    ready: VecDeque<Entry>,
    counts: QueueCounts,
    closed: bool,
}

/// FIFO queue with immediate redelivery on requeue.
///
/// A closed queue refuses new messages but keeps redelivering requeued ones
/// until nothing is queued or in flight. With `max_deliveries` set, a message requeued that many times is dropped
/// and counted as dead instead of being handed out again.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<InMemoryJobQueueState>>,
    notify: Arc<Notify>,
    max_deliveries: Option<u32>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryJobQueueState::default())),
            notify: Arc::new(Notify::new()),
            max_deliveries: None,
        }
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    /// Refuse new messages. Receivers get `None` once nothing is queued or in
    /// flight.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn counts(&self) -> QueueCounts {
        self.state.lock().await.counts
    }

    async fn push(&self, entry: Entry) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.ready.push_back(entry);
            state.counts.queued += 1;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Settle one in-flight delivery. Waiting receivers re-check for drain.
    async fn settle(&self, entry: Option<Entry>, outcome: Settled) {
        {
            let mut state = self.state.lock().await;
            state.counts.in_flight -= 1;
            match outcome {
                Settled::Acked => state.counts.acked += 1,
                Settled::Requeued => state.counts.requeued += 1,
                Settled::Dead => state.counts.dead += 1,
            }
            if let Some(entry) = entry {
                state.ready.push_back(entry);
                state.counts.queued += 1;
            }
        }
        self.notify.notify_waiters();
    }
}

enum Settled {
    Acked,
    Requeued,
    Dead,
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn publish(&self, message: JobMessage) -> Result<(), QueueError> {
        self.push(Entry {
            message,
            deliveries: 0,
        })
        .await
    }

    async fn receive(&self) -> Option<Box<dyn Delivery>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(mut entry) = state.ready.pop_front() {
                    entry.deliveries += 1;
                    state.counts.queued -= 1;
                    state.counts.in_flight += 1;
                    return Some(Box::new(InMemoryDelivery {
                        entry,
                        queue: self.clone(),
                    }));
                }
                if state.closed && state.counts.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }
}

struct InMemoryDelivery {
    entry: Entry,
    queue: InMemoryJobQueue,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &JobMessage {
        &self.entry.message
    }

    fn attempt(&self) -> u32 {
        self.entry.deliveries
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.queue.settle(None, Settled::Acked).await;
        Ok(())
    }

    async fn requeue(self: Box<Self>, reason: String) -> Result<(), QueueError> {
        let InMemoryDelivery { entry, queue } = *self;
        let dead = queue
            .max_deliveries
            .is_some_and(|max| entry.deliveries >= max);
        if dead {
            warn!(
                job_id = %entry.message.id,
                deliveries = entry.deliveries,
                reason = %reason,
                "message exceeded its delivery limit; dropping"
            );
            queue.settle(None, Settled::Dead).await;
        } else {
            queue.settle(Some(entry), Settled::Requeued).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_receive_ack() {
        let queue = InMemoryJobQueue::new();
        queue.publish(JobMessage::new("job-1", "Sample")).await.unwrap();
        assert_eq!(queue.counts().await.queued, 1);

        let delivery = queue.receive().await.unwrap();
        assert_eq!(delivery.message().id, "job-1");
        assert_eq!(delivery.attempt(), 1);
        assert_eq!(queue.counts().await.in_flight, 1);

        delivery.ack().await.unwrap();
        let counts = queue.counts().await;
        assert_eq!(counts.acked, 1);
        assert_eq!(counts.in_flight, 0);
    }

    #[tokio::test]
    async fn requeue_redelivers_with_attempt_count() {
        let queue = InMemoryJobQueue::new();
        queue.publish(JobMessage::new("job-1", "Sample")).await.unwrap();

        let first = queue.receive().await.unwrap();
        first.requeue("retry".into()).await.unwrap();

        let second = queue.receive().await.unwrap();
        assert_eq!(second.attempt(), 2);
        assert_eq!(queue.counts().await.requeued, 1);
    }

    #[tokio::test]
    async fn delivery_limit_drops_messages() {
        let queue = InMemoryJobQueue::new().with_max_deliveries(1);
        queue.publish(JobMessage::new("job-1", "Sample")).await.unwrap();

        let first = queue.receive().await.unwrap();
        first.requeue("retry".into()).await.unwrap();

        let counts = queue.counts().await;
        assert_eq!(counts.dead, 1);
        assert_eq!(counts.queued, 0);
    }

    #[tokio::test]
    async fn receive_waits_for_publish() {
        let queue = InMemoryJobQueue::new();
        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive().await.map(|d| d.message().id.clone()) })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.publish(JobMessage::new("job-2", "Sample")).await.unwrap();

        let id = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id.as_deref(), Some("job-2"));
    }

    #[tokio::test]
    async fn close_releases_waiting_receivers() {
        let queue = InMemoryJobQueue::new();
        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive().await.is_none() })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close().await;

        assert!(tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap());
        assert!(queue.publish(JobMessage::new("job-3", "Sample")).await.is_err());
    }

    #[tokio::test]
    async fn closed_queue_still_redelivers_in_flight_requeues() {
        let queue = InMemoryJobQueue::new();
        queue.publish(JobMessage::new("job-1", "Sample")).await.unwrap();
        let first = queue.receive().await.unwrap();

        queue.close().await;
        first.requeue("retry scheduled".into()).await.unwrap();

        let second = tokio::time::timeout(Duration::from_secs(1), queue.receive())
            .await
            .unwrap()
            .expect("requeued message was dropped");
        assert_eq!(second.message().id, "job-1");
        assert_eq!(second.attempt(), 2);

        second.ack().await.unwrap();
        assert!(queue.receive().await.is_none());
        let counts = queue.counts().await;
        assert_eq!((counts.requeued, counts.acked, counts.dead), (1, 1, 0));
    }

    #[tokio::test]
    async fn closed_queue_waits_for_in_flight_before_ending() {
        let queue = InMemoryJobQueue::new();
        queue.publish(JobMessage::new("job-1", "Sample")).await.unwrap();
        let delivery = queue.receive().await.unwrap();
        queue.close().await;

        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive().await.map(|d| d.message().id.clone()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!receiver.is_finished());

        delivery.ack().await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, None);
    }
}
