//! Change notifications for the registrations collection.
//!
//! Writers publish one [`Change`] per mutated row; subscribers use them only
//! as a trigger to re-read, never as a source of field values.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub table: &'static str,
    pub kind: ChangeKind,
    pub record_id: String,
}

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Change>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish a change; having no subscribers is not an error.
    pub fn publish(&self, change: Change) {
        debug!(
            "Change on {}: {:?} {}",
            change.table, change.kind, change.record_id
        );
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_changes() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();

        feed.publish(Change {
            table: "registrations",
            kind: ChangeKind::Update,
            record_id: "r-1".to_string(),
        });

        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.record_id, "r-1");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        ChangeFeed::new().publish(Change {
            table: "registrations",
            kind: ChangeKind::Insert,
            record_id: "r-2".to_string(),
        });
    }
}
