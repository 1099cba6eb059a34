//! Session history with self-compacting memory
//!
//! Each session keeps an ordered list of turns. When the serialized history
//! outgrows the configured bound, the whole list is replaced by one
//! oracle-written summary entry. Compaction is lossy and monotonic: once it
//! fires, verbatim turns are gone. Concurrent calls for the same session
//! serialize on a per-session lock; different sessions are independent.

use crate::models::{HistoryEntry, HistoryRole};
use crate::oracle::Oracle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum serialized length before compaction fires.
    pub max_length: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_length: 4000 }
    }
}

pub struct HistoryManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Vec<HistoryEntry>>>>>,
    summarizer: Arc<dyn Oracle>,
    config: HistoryConfig,
}

impl HistoryManager {
    pub fn new(summarizer: Arc<dyn Oracle>) -> Self {
        Self::with_config(summarizer, HistoryConfig::default())
    }

    pub fn with_config(summarizer: Arc<dyn Oracle>, config: HistoryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            summarizer,
            config,
        }
    }

    async fn session(&self, session_id: &str) -> Arc<Mutex<Vec<HistoryEntry>>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(entries) = sessions.get(session_id) {
                return entries.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    fn serialize(entries: &[HistoryEntry]) -> String {
        entries
            .iter()
            .map(|e| match e.role {
                // A summary entry IS the history; no role prefix.
                HistoryRole::Summary => e.message.clone(),
                role => format!("{}: {}", role, e.message),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Append one turn, compacting synchronously when the serialized
    /// history exceeds the bound.
    pub async fn append(&self, session_id: &str, role: HistoryRole, message: &str) {
        let session = self.session(session_id).await;
        let mut entries = session.lock().await;

        entries.push(HistoryEntry {
            role,
            message: message.to_string(),
        });

        let serialized = Self::serialize(&entries);
        if serialized.len() <= self.config.max_length {
            return;
        }

        info!(
            session_id,
            length = serialized.len(),
            max_length = self.config.max_length,
            "History over bound, compacting"
        );

        let summary = match self.summarize(&serialized).await {
            Ok(summary) => summary,
            Err(e) => {
                // Summarizer down: keep the bound anyway with a plain
                // truncated tail.
                warn!(session_id, "History summarization failed: {}", e);
                tail_chars(&serialized, self.config.max_length)
            }
        };

        entries.clear();
        entries.push(HistoryEntry {
            role: HistoryRole::Summary,
            message: summary,
        });
    }

    /// Serialized text of whatever entries remain for the session.
    pub async fn read(&self, session_id: &str) -> String {
        let session = self.session(session_id).await;
        let entries = session.lock().await;
        Self::serialize(&entries)
    }

    async fn summarize(&self, conversation: &str) -> crate::Result<String> {
        let prompt = format!(
            r#"Summarize the conversation below for a pharmacy assistant's memory.
Keep the questions asked, the answers given, and any drug names, doses or
warnings mentioned. Be concise; plain text only.

CONVERSATION:
---
{}
---

SUMMARY:"#,
            conversation
        );

        self.summarizer.generate(&prompt).await
    }
}

/// Last `n` characters of a string, on char boundaries.
fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        return s.to_string();
    }
    s.chars().skip(count - n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FailingOracle, MockOracle};

    #[tokio::test]
    async fn test_append_and_read() {
        let manager = HistoryManager::new(Arc::new(FailingOracle));

        manager.append("s1", HistoryRole::User, "What is ibuprofen?").await;
        manager
            .append("s1", HistoryRole::Assistant, "An anti-inflammatory drug.")
            .await;

        let text = manager.read("s1").await;
        assert_eq!(
            text,
            "user: What is ibuprofen?\nassistant: An anti-inflammatory drug."
        );
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let manager = HistoryManager::new(Arc::new(FailingOracle));

        manager.append("s1", HistoryRole::User, "first session").await;
        manager.append("s2", HistoryRole::User, "second session").await;

        assert!(manager.read("s1").await.contains("first"));
        assert!(manager.read("s2").await.contains("second"));
        assert_eq!(manager.read("unknown").await, "");
    }

    #[tokio::test]
    async fn test_compaction_replaces_history_with_summary_alone() {
        let oracle = Arc::new(MockOracle::new(vec![
            "Earlier: user asked about paracetamol dosage.",
        ]));
        let manager = HistoryManager::with_config(oracle, HistoryConfig { max_length: 60 });

        manager
            .append("s1", HistoryRole::User, "What is the dosage of paracetamol?")
            .await;
        manager
            .append("s1", HistoryRole::Assistant, "500mg every six hours, at most 4g per day.")
            .await;

        let text = manager.read("s1").await;
        assert_eq!(text, "Earlier: user asked about paracetamol dosage.");
        assert!(!text.contains("500mg"));
    }

    #[tokio::test]
    async fn test_exactly_one_compaction_per_threshold_crossing() {
        // One scripted summary: a second compaction attempt would fail the
        // oracle and fall back to truncation instead of this text.
        let oracle = Arc::new(MockOracle::new(vec!["summary one"]));
        let manager = HistoryManager::with_config(oracle, HistoryConfig { max_length: 50 });

        manager.append("s1", HistoryRole::User, "a question that is long enough").await;
        manager.append("s1", HistoryRole::Assistant, "short").await;

        assert_eq!(manager.read("s1").await, "summary one");

        // Under the bound again: no further compaction.
        manager.append("s1", HistoryRole::User, "ok").await;
        assert_eq!(manager.read("s1").await, "summary one\nuser: ok");
    }

    #[tokio::test]
    async fn test_compaction_bound_holds_when_summarizer_fails() {
        let manager =
            HistoryManager::with_config(Arc::new(FailingOracle), HistoryConfig { max_length: 40 });

        manager
            .append("s1", HistoryRole::User, "a very long question about drug interactions and dosing")
            .await;

        let text = manager.read("s1").await;
        assert!(text.len() <= 40);
        assert!(!text.is_empty());
    }
}
