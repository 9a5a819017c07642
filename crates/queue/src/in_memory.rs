//! In-memory queue transport for tests/dev.
//!
//! Implements the full visibility-timeout contract on top of `tokio::time`, so
//! tests can drive redelivery with a paused clock.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::transport::{QueueError, QueueId, QueueTransport, ReceiptHandle, ReceiveOptions, ReceivedMessage};

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    receive_count: u32,
    invisible_until: Option<Instant>,
    receipt: Option<ReceiptHandle>,
}

impl Entry {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

/// In-memory point-to-point queues keyed by [`QueueId`].
///
/// - Queues are created on first send
/// - Long polling wakes on new sends and on visibility expiry
/// - Lock is never held across an await
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<QueueId, VecDeque<Entry>>>,
    arrivals: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages in `queue`, visible or in flight.
    pub fn depth(&self, queue: &QueueId) -> usize {
        self.queues
            .lock()
            .map(|q| q.get(queue).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Number of messages in `queue` that a receive would return right now.
    pub fn visible_depth(&self, queue: &QueueId) -> usize {
        let now = Instant::now();
        self.queues
            .lock()
            .map(|q| {
                q.get(queue)
                    .map_or(0, |entries| entries.iter().filter(|e| e.is_visible(now)).count())
            })
            .unwrap_or(0)
    }

    /// Bodies currently in `queue`, oldest first, without receiving them.
    pub fn peek_bodies(&self, queue: &QueueId) -> Vec<String> {
        self.queues
            .lock()
            .map(|q| {
                q.get(queue)
                    .map(|entries| entries.iter().map(|e| e.body.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Take up to `max` visible messages, marking them in flight.
    ///
    /// Also returns the earliest instant at which a hidden message reappears,
    /// so an empty long poll knows when to look again.
    fn take_visible(
        &self,
        queue: &QueueId,
        options: &ReceiveOptions,
        now: Instant,
    ) -> Result<(Vec<ReceivedMessage>, Option<Instant>), QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::Poisoned)?;
        let Some(entries) = queues.get_mut(queue) else {
            return Ok((Vec::new(), None));
        };

        let max = options.max_messages.max(1);
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for entry in entries.iter_mut() {
            if batch.len() >= max {
                break;
            }
            if !entry.is_visible(now) {
                if let Some(until) = entry.invisible_until {
                    next_visible = Some(next_visible.map_or(until, |n| n.min(until)));
                }
                continue;
            }

            let receipt = ReceiptHandle::new(Uuid::now_v7().to_string());
            entry.receive_count += 1;
            entry.invisible_until = Some(now + options.visibility_timeout);
            entry.receipt = Some(receipt.clone());

            batch.push(ReceivedMessage {
                message_id: entry.message_id.clone(),
                receipt,
                body: entry.body.clone(),
                receive_count: entry.receive_count,
            });
        }

        Ok((batch, next_visible))
    }
}

#[async_trait::async_trait]
impl QueueTransport for InMemoryQueue {
    async fn send(&self, queue: &QueueId, body: String) -> Result<String, QueueError> {
        let message_id = Uuid::now_v7().to_string();
        {
            let mut queues = self.queues.lock().map_err(|_| QueueError::Poisoned)?;
            queues.entry(queue.clone()).or_default().push_back(Entry {
                message_id: message_id.clone(),
                body,
                receive_count: 0,
                invisible_until: None,
                receipt: None,
            });
        }
        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn receive_batch(
        &self,
        queue: &QueueId,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + options.wait;

        loop {
            // Register for wakeups before looking, so a send racing with the
            // check below is not missed.
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let now = Instant::now();
            let (batch, next_visible) = self.take_visible(queue, options, now)?;
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }

            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = &mut arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, queue: &QueueId, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::Poisoned)?;
        let entries = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;

        let position = entries
            .iter()
            .position(|e| e.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;

        entries.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn opts() -> ReceiveOptions {
        ReceiveOptions::default()
            .with_max_messages(10)
            .with_wait(Duration::from_secs(1))
            .with_visibility_timeout(Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn send_receive_delete() {
        let q = InMemoryQueue::new();
        let id = QueueId::new("work");

        q.send(&id, "a".to_string()).await.unwrap();
        let batch = q.receive_batch(&id, &opts()).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "a");
        assert_eq!(batch[0].receive_count, 1);

        q.delete(&id, &batch[0].receipt).await.unwrap();
        assert_eq!(q.depth(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn received_message_is_hidden_then_redelivered() {
        let q = InMemoryQueue::new();
        let id = QueueId::new("work");
        q.send(&id, "a".to_string()).await.unwrap();

        let first = q.receive_batch(&id, &opts()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(q.visible_depth(&id), 0);

        // Still hidden: the long poll returns empty after the wait window.
        assert!(q.receive_batch(&id, &opts()).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;
        let second = q.receive_batch(&id, &opts()).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].receipt, first[0].receipt);

        // The stale receipt no longer deletes the message.
        assert!(matches!(
            q.delete(&id, &first[0].receipt).await,
            Err(QueueError::UnknownReceipt(_))
        ));
        q.delete(&id, &second[0].receipt).await.unwrap();
        assert_eq!(q.depth(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_reappears_within_wait_window() {
        let q = InMemoryQueue::new();
        let id = QueueId::new("work");
        q.send(&id, "a".to_string()).await.unwrap();

        let short = opts().with_visibility_timeout(Duration::from_millis(200));
        q.receive_batch(&id, &short).await.unwrap();

        let started = Instant::now();
        let again = q.receive_batch(&id, &short).await.unwrap();
        assert_eq!(again.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_receive_waits_for_the_window() {
        let q = InMemoryQueue::new();
        let started = Instant::now();

        let batch = q.receive_batch(&QueueId::new("empty"), &opts()).await.unwrap();

        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn long_poll_wakes_on_send() {
        let q = Arc::new(InMemoryQueue::new());
        let id = QueueId::new("work");
        let wait = opts().with_wait(Duration::from_secs(10));

        let receiver = {
            let q = q.clone();
            let id = id.clone();
            tokio::spawn(async move { q.receive_batch(&id, &wait).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.send(&id, "late".to_string()).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), receiver)
            .await
            .expect("receiver should wake before its wait window")
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn batch_size_is_capped() {
        let q = InMemoryQueue::new();
        let id = QueueId::new("work");
        for i in 0..5 {
            q.send(&id, i.to_string()).await.unwrap();
        }

        let batch = q.receive_batch(&id, &opts().with_max_messages(2)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(q.visible_depth(&id), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn queues_are_isolated() {
        let q = InMemoryQueue::new();
        q.send(&QueueId::new("a"), "x".to_string()).await.unwrap();

        assert!(q.receive_batch(&QueueId::new("b"), &opts()).await.unwrap().is_empty());
        assert_eq!(q.depth(&QueueId::new("a")), 1);
    }
}
