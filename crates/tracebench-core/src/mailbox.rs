//! Stage inbound mailbox.
//!
//! A FIFO queue with a single consumer and any number of producers. The
//! default is unbounded: producers never wait and the queue grows with
//! backlog. A capacity turns on one of the admission policies.
//!
//! Closing a mailbox refuses further pushes but lets the consumer drain
//! whatever is already queued; `recv` returns `None` only once the mailbox is
//! both closed and empty.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tokio::sync::Notify;

use crate::emit;
use crate::error::{ClosedSnafu, ConfigError, FullSnafu, MailboxError, ValidationSnafu};
use crate::metrics::events::{DropReason, MessagesDropped};

/// What a bounded mailbox does when a push finds it full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Wait until the consumer makes room.
    #[default]
    Block,
    /// Discard the incoming message.
    DropNewest,
    /// Evict the oldest queued message to make room.
    DropOldest,
    /// Refuse the message with `MailboxError::Full`.
    Reject,
}

/// Capacity and admission policy shared by every stage mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Maximum queued messages; `None` is unbounded.
    pub capacity: Option<usize>,
    /// Only consulted when `capacity` is set.
    pub admission: AdmissionPolicy,
}

impl MailboxConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize, admission: AdmissionPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            admission,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.capacity != Some(0),
            ValidationSnafu {
                field: "mailbox.capacity",
                reason: "must be at least 1",
            }
        );
        Ok(())
    }
}

/// How a push was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queued without loss.
    Accepted,
    /// Queued after evicting the oldest message.
    EvictedOldest,
    /// Not queued; the mailbox was full under `DropNewest`.
    DiscardedNewest,
}

impl Admission {
    /// True when a message was lost to make this admission.
    pub fn dropped(&self) -> bool {
        !matches!(self, Admission::Accepted)
    }
}

struct MailboxState<T> {
    queue: VecDeque<T>,
    closed: bool,
}

enum TryAdmit<T> {
    Done(Admission),
    Full(T),
}

/// FIFO queue feeding one stage worker.
pub struct Mailbox<T> {
    name: String,
    config: MailboxConfig,
    state: Mutex<MailboxState<T>>,
    item_available: Notify,
    space_available: Notify,
    depth: metrics::Gauge,
}

impl<T> Mailbox<T> {
    pub fn new(name: impl Into<String>, config: MailboxConfig) -> Self {
        let name = name.into();
        let depth = metrics::gauge!("tracebench_mailbox_depth", "mailbox" => name.clone());
        Self {
            name,
            config,
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                closed: false,
            }),
            item_available: Notify::new(),
            space_available: Notify::new(),
            depth,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> MailboxConfig {
        self.config
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Enqueue without waiting.
    ///
    /// Under `Block` a full mailbox returns `Full`, same as `Reject`.
    pub fn try_push(&self, item: T) -> Result<Admission, MailboxError> {
        match self.try_admit(item)? {
            TryAdmit::Done(admission) => Ok(admission),
            TryAdmit::Full(_) => {
                self.record_drop(DropReason::Rejected);
                self.full_error()
            }
        }
    }

    /// Enqueue, waiting for room when the mailbox is full under `Block`.
    pub async fn push(&self, item: T) -> Result<Admission, MailboxError> {
        let mut item = item;
        loop {
            let space = self.space_available.notified();
            tokio::pin!(space);
            // register before checking so a concurrent recv cannot slip by
            space.as_mut().enable();

            match self.try_admit(item)? {
                TryAdmit::Done(admission) => return Ok(admission),
                TryAdmit::Full(returned) => {
                    if self.config.admission != AdmissionPolicy::Block {
                        self.record_drop(DropReason::Rejected);
                        return self.full_error();
                    }
                    item = returned;
                }
            }

            space.await;
        }
    }

    /// Dequeue the oldest message.
    ///
    /// Returns `None` once the mailbox is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let available = self.item_available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    self.depth.set(state.queue.len() as f64);
                    drop(state);
                    self.space_available.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            available.await;
        }
    }

    /// Refuse further pushes and wake every waiter.
    ///
    /// Queued messages stay available to `recv`. Closing twice is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.item_available.notify_waiters();
        self.space_available.notify_waiters();
    }

    fn try_admit(&self, item: T) -> Result<TryAdmit<T>, MailboxError> {
        let mut state = self.lock();
        ensure!(
            !state.closed,
            ClosedSnafu {
                mailbox: self.name.as_str(),
            }
        );

        let full = self
            .config
            .capacity
            .is_some_and(|capacity| state.queue.len() >= capacity);

        let admission = if !full {
            state.queue.push_back(item);
            Admission::Accepted
        } else {
            match self.config.admission {
                AdmissionPolicy::Block | AdmissionPolicy::Reject => {
                    return Ok(TryAdmit::Full(item));
                }
                AdmissionPolicy::DropNewest => Admission::DiscardedNewest,
                AdmissionPolicy::DropOldest => {
                    state.queue.pop_front();
                    state.queue.push_back(item);
                    Admission::EvictedOldest
                }
            }
        };

        self.depth.set(state.queue.len() as f64);
        drop(state);

        match admission {
            Admission::Accepted => self.item_available.notify_one(),
            Admission::EvictedOldest => {
                self.record_drop(DropReason::EvictedOldest);
                self.item_available.notify_one();
            }
            Admission::DiscardedNewest => self.record_drop(DropReason::DiscardedNewest),
        }
        Ok(TryAdmit::Done(admission))
    }

    fn full_error<A>(&self) -> Result<A, MailboxError> {
        FullSnafu {
            mailbox: self.name.as_str(),
            capacity: self.config.capacity.unwrap_or_default(),
        }
        .fail()
    }

    fn record_drop(&self, reason: DropReason) {
        emit!(MessagesDropped {
            mailbox: self.name.clone(),
            reason,
        });
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("len", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let mailbox = Mailbox::new("test", MailboxConfig::unbounded());
        for i in 0..5 {
            mailbox.push(i).await.unwrap();
        }
        assert_eq!(mailbox.len(), 5);
        for i in 0..5 {
            assert_eq!(mailbox.recv().await, Some(i));
        }
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let mailbox = Mailbox::new("test", MailboxConfig::unbounded());
        mailbox.push("a").await.unwrap();
        mailbox.push("b").await.unwrap();
        mailbox.close();

        assert!(mailbox.is_closed());
        assert_eq!(mailbox.recv().await, Some("a"));
        assert_eq!(mailbox.recv().await, Some("b"));
        assert_eq!(mailbox.recv().await, None);
    }

    #[tokio::test]
    async fn test_push_after_close_fails() {
        let mailbox = Mailbox::new("stage2", MailboxConfig::unbounded());
        mailbox.close();
        let err = mailbox.push(1).await.unwrap_err();
        assert!(err.is_closed());
        assert!(err.to_string().contains("stage2"));
        assert!(mailbox.try_push(1).unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_receiver() {
        let mailbox = Arc::new(Mailbox::<u32>::new("test", MailboxConfig::unbounded()));
        let receiver = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.recv().await })
        };
        tokio::task::yield_now().await;
        mailbox.close();
        assert_eq!(receiver.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let mailbox = Arc::new(Mailbox::new("test", MailboxConfig::unbounded()));
        let receiver = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.recv().await })
        };
        tokio::task::yield_now().await;
        mailbox.push(7u32).await.unwrap();
        assert_eq!(receiver.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_reject_when_full() {
        let mailbox = Mailbox::new("test", MailboxConfig::bounded(2, AdmissionPolicy::Reject));
        mailbox.push(1).await.unwrap();
        mailbox.push(2).await.unwrap();

        let err = mailbox.push(3).await.unwrap_err();
        assert!(err.is_full());
        assert!(mailbox.try_push(3).unwrap_err().is_full());
        assert_eq!(mailbox.len(), 2);
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_queue() {
        let mailbox = Mailbox::new("test", MailboxConfig::bounded(2, AdmissionPolicy::DropNewest));
        mailbox.push(1).await.unwrap();
        mailbox.push(2).await.unwrap();
        let admission = mailbox.push(3).await.unwrap();

        assert_eq!(admission, Admission::DiscardedNewest);
        assert!(admission.dropped());
        assert_eq!(mailbox.recv().await, Some(1));
        assert_eq!(mailbox.recv().await, Some(2));
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_head() {
        let mailbox = Mailbox::new("test", MailboxConfig::bounded(2, AdmissionPolicy::DropOldest));
        mailbox.push(1).await.unwrap();
        mailbox.push(2).await.unwrap();
        assert_eq!(mailbox.push(3).await.unwrap(), Admission::EvictedOldest);

        assert_eq!(mailbox.recv().await, Some(2));
        assert_eq!(mailbox.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_block_waits_for_space() {
        let mailbox = Arc::new(Mailbox::new("test", MailboxConfig::bounded(1, AdmissionPolicy::Block)));
        mailbox.push(1u32).await.unwrap();
        assert!(mailbox.try_push(2).unwrap_err().is_full());

        let producer = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.push(2).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());

        assert_eq!(mailbox.recv().await, Some(1));
        assert_eq!(producer.await.unwrap().unwrap(), Admission::Accepted);
        assert_eq!(mailbox.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_close_fails_blocked_producer() {
        let mailbox = Arc::new(Mailbox::new("test", MailboxConfig::bounded(1, AdmissionPolicy::Block)));
        mailbox.push(1u32).await.unwrap();

        let producer = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.push(2).await })
        };
        tokio::task::yield_now().await;
        mailbox.close();

        assert!(producer.await.unwrap().unwrap_err().is_closed());
        assert_eq!(mailbox.recv().await, Some(1));
        assert_eq!(mailbox.recv().await, None);
    }

    #[test]
    fn test_config_serde() {
        let config: MailboxConfig =
            serde_json::from_str(r#"{"capacity": 64, "admission": "drop_oldest"}"#).unwrap();
        assert_eq!(config, MailboxConfig::bounded(64, AdmissionPolicy::DropOldest));

        let config: MailboxConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MailboxConfig::unbounded());
    }

    #[test]
    fn test_zero_capacity_invalid() {
        assert!(MailboxConfig::bounded(0, AdmissionPolicy::Block).validate().is_err());
        assert!(MailboxConfig::bounded(1, AdmissionPolicy::Block).validate().is_ok());
        assert!(MailboxConfig::unbounded().validate().is_ok());
    }
}
