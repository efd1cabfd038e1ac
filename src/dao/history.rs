use std::sync::Arc;

use futures::future::BoxFuture;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::RwLock;
use tracing::warn;

use crate::{dao::storage::StorageResult, dto::game::HistoryEntry};

/// Sink for completed games.
pub trait HistoryStore: Send + Sync {
    /// Append a completed game.
    fn add_history(&self, entry: HistoryEntry) -> BoxFuture<'static, StorageResult<()>>;
    /// Every recorded game, oldest first.
    fn list_history(&self) -> BoxFuture<'static, StorageResult<Vec<HistoryEntry>>>;
}

/// [`HistoryStore`] kept in memory for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    entries: Arc<RwLock<Vec<HistoryEntry>>>,
}

impl InMemoryHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistory {
    fn add_history(&self, entry: HistoryEntry) -> BoxFuture<'static, StorageResult<()>> {
        let entries = Arc::clone(&self.entries);
        Box::pin(async move {
            entries.write().await.push(entry);
            Ok(())
        })
    }

    fn list_history(&self) -> BoxFuture<'static, StorageResult<Vec<HistoryEntry>>> {
        let entries = Arc::clone(&self.entries);
        Box::pin(async move { Ok(entries.read().await.clone()) })
    }
}

/// Current UTC time formatted as RFC 3339, used as the completion date of a game.
pub fn completion_date() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|err| {
            warn!(error = %err, "failed to format completion date");
            String::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_are_listed_in_insertion_order() {
        let history = InMemoryHistory::new();
        for name in ["Capitals", "Rivers"] {
            history
                .add_history(HistoryEntry {
                    name: name.into(),
                    date: completion_date(),
                    number_players: 2,
                    best_score: 48.0,
                })
                .await
                .unwrap();
        }

        let names: Vec<String> = history
            .list_history()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["Capitals", "Rivers"]);
    }

    #[test]
    fn completion_date_is_rfc3339() {
        let date = completion_date();
        assert!(OffsetDateTime::parse(&date, &Rfc3339).is_ok());
    }
}
