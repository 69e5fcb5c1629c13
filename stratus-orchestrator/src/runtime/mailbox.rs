//! Redeploy mailbox
//!
//! Holds redeploy requests for one pipeline instance until the saga parks
//! and takes the next one. Requests that arrive while a cycle is running are
//! kept for the next park.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use stratus_core::domain::deploy::DeployInput;
use thiserror::Error;
use tokio::sync::Notify;

/// What happens to a request that arrives while another one is unconsumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedeployPolicy {
    /// Single slot; a newer request replaces an unconsumed older one
    #[default]
    LatestWins,

    /// FIFO with a fixed capacity; requests beyond it are rejected
    Queue { capacity: usize },
}

impl RedeployPolicy {
    /// Parses `latest-wins` or `queue`
    pub fn parse(name: &str, queue_capacity: usize) -> Result<Self, String> {
        match name.trim() {
            "latest-wins" | "latest_wins" => Ok(RedeployPolicy::LatestWins),
            "queue" => Ok(RedeployPolicy::Queue {
                capacity: queue_capacity.max(1),
            }),
            other => Err(format!(
                "unknown redeploy policy '{}' (expected latest-wins or queue)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("redeploy queue is full ({capacity} pending)")]
pub struct MailboxFull {
    pub capacity: usize,
}

/// Single-consumer mailbox of redeploy requests
pub struct RedeployMailbox {
    policy: RedeployPolicy,
    pending: Mutex<VecDeque<DeployInput>>,
    notify: Notify,
    closed: AtomicBool,
}

impl RedeployMailbox {
    pub fn new(policy: RedeployPolicy) -> Self {
        Self {
            policy,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<DeployInput>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers a request; returns how many requests are now waiting
    pub fn push(&self, input: DeployInput) -> Result<usize, MailboxFull> {
        let waiting = {
            let mut pending = self.pending();
            match self.policy {
                RedeployPolicy::LatestWins => {
                    pending.clear();
                    pending.push_back(input);
                }
                RedeployPolicy::Queue { capacity } => {
                    if pending.len() >= capacity {
                        return Err(MailboxFull { capacity });
                    }
                    pending.push_back(input);
                }
            }
            pending.len()
        };

        self.notify.notify_one();
        Ok(waiting)
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for the next request
    ///
    /// Returns `None` once the mailbox is closed and drained.
    pub async fn recv(&self) -> Option<DeployInput> {
        loop {
            if let Some(input) = self.pending().pop_front() {
                return Some(input);
            }

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            // notify_one stores a permit when nobody waits yet
            self.notify.notified().await;
        }
    }

    /// Stops the consumer once pending requests are drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}
