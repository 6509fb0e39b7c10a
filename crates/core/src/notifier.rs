//! Wake-up signals for deferred keyword generation.
//!
//! The keyword service calls back when keywords for a tag are ready. Tasks
//! waiting on that tag subscribe here and re-check immediately instead of
//! waiting for their next poll.
//!
//! The registry also remembers which tags already have a generation request
//! outstanding, so tasks that miss on the same tag share one request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

/// Registry of per-tag readiness signals. Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct KeywordNotifier {
    channels: Arc<Mutex<HashMap<String, TagSignal>>>,
}

#[derive(Debug)]
struct TagSignal {
    tx: watch::Sender<u64>,
    /// A generation request is outstanding for this tag.
    requested: bool,
}

impl TagSignal {
    fn new() -> Self {
        Self {
            tx: watch::channel(0).0,
            requested: false,
        }
    }

    fn waiters(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A subscription to one tag's readiness signal.
#[derive(Debug)]
pub struct KeywordSubscription {
    tag: String,
    rx: watch::Receiver<u64>,
}

impl KeywordSubscription {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Resolves on the next notification for this tag.
    ///
    /// Returns `false` if the registry dropped the channel, in which case no
    /// notification will ever arrive.
    pub async fn notified(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl KeywordNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to notifications for `tag`. Only notifications sent after
    /// this call wake the subscription.
    pub fn subscribe(&self, tag: &str) -> KeywordSubscription {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.retain(|_, signal| signal.waiters() > 0);
        let rx = channels
            .entry(tag.to_string())
            .or_insert_with(TagSignal::new)
            .tx
            .subscribe();
        KeywordSubscription {
            tag: tag.to_string(),
            rx,
        }
    }

    /// Claim the generation request for the subscription's tag.
    ///
    /// Returns true for the first claimant; everyone else subscribed to the
    /// tag waits on that request. The claim lapses when the tag is notified,
    /// when it is released, or once no task waits on the tag any more.
    pub fn begin_request(&self, subscription: &KeywordSubscription) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let signal = channels
            .entry(subscription.tag.clone())
            .or_insert_with(TagSignal::new);
        !std::mem::replace(&mut signal.requested, true)
    }

    /// Drop an outstanding claim, e.g. after the request itself failed.
    pub fn release_request(&self, tag: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(signal) = channels.get_mut(tag) {
            signal.requested = false;
        }
    }

    /// Signal that keywords for `tag` are ready.
    ///
    /// Returns true if at least one task was waiting on the tag.
    pub fn notify(&self, tag: &str) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        match channels.get_mut(tag) {
            Some(signal) if signal.waiters() > 0 => {
                signal.requested = false;
                signal.tx.send_modify(|generation| *generation += 1);
                debug!(
                    "Keyword notification for {:?} woke {} waiter(s)",
                    tag,
                    signal.waiters()
                );
                true
            }
            _ => {
                debug!("Keyword notification for {:?} had no waiters", tag);
                false
            }
        }
    }

    /// Tags that currently have at least one waiter.
    pub fn waiting_tags(&self) -> Vec<String> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let mut tags: Vec<String> = channels
            .iter()
            .filter(|(_, signal)| signal.waiters() > 0)
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }
}
