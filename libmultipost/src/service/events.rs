//! Event system for progress tracking
//!
//! In-process broadcast bus carrying posting progress and login results to
//! any number of subscribers (CLI output, a UI, logs). Emitting never blocks:
//! without subscribers events are dropped, and a lagging subscriber misses
//! the oldest events rather than slowing the emitter.
//!
//! # Example
//!
//! ```no_run
//! use libmultipost::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::PostingStarted {
//!     submission_id: "abc123".to_string(),
//!     accounts: vec!["fa-main".to_string()],
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::WebsiteId;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before the oldest drop
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PostingStarted {
        submission_id: String,
        accounts: Vec<String>,
    },

    /// Progress for one account ("Waiting", "Uploading" ...)
    PostingProgress {
        submission_id: String,
        account_id: String,
        status: String,
    },

    PostingCompleted {
        submission_id: String,
        results: Vec<AccountResult>,
    },

    PostingCancelled {
        submission_id: String,
    },

    LoginChecked {
        account_id: String,
        website: WebsiteId,
        logged_in: bool,
        username: Option<String>,
    },
}

/// Serializable summary of one account's post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountResult {
    pub account_id: String,
    pub website: Option<WebsiteId>,
    pub success: bool,
    pub cancelled: bool,
    /// URL of the published submission
    pub source: Option<String>,
    pub message: Option<String>,
}
