//! Listener messages waiting to be read on air.
//!
//! FIFO of listener-submitted text. The Director drains at most one item per
//! generation cycle through [`MailQueue::get_next`], which claims the item in
//! the same critical section that finds it, so no two callers can consume
//! the same message.

use crate::listeners::{Listeners, Subscription};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MailId(pub u64);

impl fmt::Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mail-{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MailItem {
    pub id: MailId,
    pub content: String,
    pub timestamp: DateTime<Local>,
    pub processed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MailStatus {
    pub total: usize,
    pub pending: usize,
    pub processed: usize,
}

struct Inbox {
    next_id: u64,
    items: Vec<MailItem>,
}

pub struct MailQueue {
    inbox: Mutex<Inbox>,
    listeners: Listeners<MailItem>,
}

impl MailQueue {
    pub fn new() -> Self {
        MailQueue {
            inbox: Mutex::new(Inbox {
                next_id: 1,
                items: Vec::new(),
            }),
            listeners: Listeners::new("mail"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a listener message. Returns `None` when the trimmed content is empty.
    pub fn push(&self, content: &str) -> Option<MailItem> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let mail = {
            let mut inbox = self.lock();
            let mail = MailItem {
                id: MailId(inbox.next_id),
                content: content.to_string(),
                timestamp: Local::now(),
                processed: false,
            };
            inbox.next_id += 1;
            inbox.items.push(mail.clone());
            mail
        };
        info!(mail = %mail.id, "new mail added");
        self.listeners.emit(&mail);
        Some(mail)
    }

    /// Claim the oldest unprocessed item. The returned copy already has
    /// `processed = true`.
    pub fn get_next(&self) -> Option<MailItem> {
        let mut inbox = self.lock();
        let mail = inbox.items.iter_mut().find(|m| !m.processed)?;
        mail.processed = true;
        debug!(mail = %mail.id, "mail consumed");
        Some(mail.clone())
    }

    pub fn get(&self, id: MailId) -> Option<MailItem> {
        self.lock().items.iter().find(|m| m.id == id).cloned()
    }

    pub fn get_pending(&self) -> Vec<MailItem> {
        self.lock()
            .items
            .iter()
            .filter(|m| !m.processed)
            .cloned()
            .collect()
    }

    pub fn get_status(&self) -> MailStatus {
        let inbox = self.lock();
        let pending = inbox.items.iter().filter(|m| !m.processed).count();
        MailStatus {
            total: inbox.items.len(),
            pending,
            processed: inbox.items.len() - pending,
        }
    }

    /// Notify `handler` about every new mail.
    pub fn on_mail<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&MailItem) + Send + Sync + 'static,
    {
        self.listeners.add(handler)
    }

    /// Discard all items, processed or not.
    pub fn clear(&self) {
        self.lock().items.clear();
    }
}

impl Default for MailQueue {
    fn default() -> Self {
        Self::new()
    }
}
