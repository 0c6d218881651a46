//! Conversation store
//!
//! Owns the ordered message list and the current user identity, and
//! coordinates sending, retrying and persistence.
//!
//! All methods take `&self`. The conversation lock is never held across an
//! `.await`, so several `send` calls may be in flight at once; each assigns
//! its message ID when it resumes. Two overlapping sends therefore get IDs
//! in resume order, not call order.

use crate::chat::delivery::{DeliveryOutcome, Transport};
use crate::chat::models::{validate_text, Message, MessageRecord, UserInfo};
use crate::chat::validation::validate_non_empty;
use crate::error::AppError;
use crate::logging::LogSink;
use crate::storage::StorageService;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Storage key (before namespacing) holding delivered messages
pub const HISTORY_KEY: &str = "history";

/// Message counts derived from the current conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChatStats {
    /// All messages
    pub total: usize,
    /// Delivered messages
    pub sent: usize,
    /// Undelivered messages
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Conversation {
    messages: Vec<Message>,
    user: UserInfo,
}

impl Conversation {
    /// One past the highest ID in use
    ///
    /// Deleting the newest message frees its ID for reuse. Past
    /// [`MAX_MESSAGE_ID`](crate::chat::models::MAX_MESSAGE_ID) the result is
    /// out of range and `Message::new` rejects it.
    fn next_id(&self) -> u64 {
        self.messages
            .iter()
            .map(Message::id)
            .max()
            .map_or(1, |max| max.saturating_add(1))
    }
}

/// The chat conversation and everything that acts on it
pub struct ChatStore {
    conversation: Mutex<Conversation>,
    storage: StorageService,
    transport: Arc<dyn Transport>,
    log: Arc<dyn LogSink>,
}

impl ChatStore {
    /// Create an empty store
    ///
    /// Nothing is read from storage until [`ChatStore::restore`] is called.
    pub fn new(
        storage: StorageService,
        transport: Arc<dyn Transport>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            conversation: Mutex::new(Conversation::default()),
            storage,
            transport,
            log,
        }
    }

    fn conversation(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current identity
    ///
    /// Must be called before sending; messages are stamped with whatever
    /// identity is current when they are added. The name is trimmed, and
    /// blank names or IDs are rejected.
    pub fn set_identity(&self, name: &str, id: &str) -> Result<(), AppError> {
        let name = validate_non_empty(name, "Name")?;
        validate_non_empty(id, "User ID")?;

        self.conversation().user = UserInfo::new(name.clone(), id);
        self.log
            .info("Identity set", Some(json!({ "name": name, "id": id })));
        Ok(())
    }

    /// Current identity
    pub fn identity(&self) -> UserInfo {
        self.conversation().user.clone()
    }

    /// ID the next added message will receive
    pub fn next_id(&self) -> u64 {
        self.conversation().next_id()
    }

    /// Append a message authored by the current identity
    ///
    /// # Returns
    /// * `Ok(Message)` - The message as stored
    /// * `Err(AppError::Validation)` - If the text is blank or too long, or
    ///   no message ID is left
    pub fn add(&self, text: &str, delivered: bool) -> Result<Message, AppError> {
        self.append(text, delivered, 0)
    }

    fn append(&self, text: &str, delivered: bool, retry_count: u32) -> Result<Message, AppError> {
        let mut conversation = self.conversation();
        let message = Message::new(
            conversation.next_id(),
            text,
            conversation.user.clone(),
            delivered,
            None,
            retry_count,
        )?;
        conversation.messages.push(message.clone());
        Ok(message)
    }

    /// Remove the message with the given ID
    ///
    /// Returns true if a message was removed; a missing ID is not an error.
    pub fn delete(&self, id: u64) -> bool {
        {
            let mut conversation = self.conversation();
            let Some(index) = conversation.messages.iter().position(|m| m.id() == id) else {
                return false;
            };
            conversation.messages.remove(index);
        }
        self.log
            .info("Message deleted", Some(json!({ "messageId": id })));
        true
    }

    /// Look up a message by ID
    pub fn get(&self, id: u64) -> Option<Message> {
        self.conversation()
            .messages
            .iter()
            .find(|m| m.id() == id)
            .cloned()
    }

    /// Send a message through the transport
    ///
    /// A delivered message is appended and the history persisted. A failed
    /// delivery still resolves successfully: the returned message simply has
    /// `delivered() == false` and is not persisted.
    ///
    /// # Returns
    /// * `Ok(Message)` - The appended message, delivered or not
    /// * `Err(AppError::Validation)` - If the text is blank or too long
    pub async fn send(&self, text: &str) -> Result<Message, AppError> {
        self.transmit(text, 0).await
    }

    async fn transmit(&self, text: &str, retry_count: u32) -> Result<Message, AppError> {
        // Reject bad input before paying for the round-trip
        validate_text(text)?;

        match self.transport.deliver(text).await {
            DeliveryOutcome::Delivered => {
                let message = self.append(text, true, retry_count)?;
                self.persist();
                self.log
                    .info("Message sent", Some(json!({ "messageId": message.id() })));
                Ok(message)
            }
            DeliveryOutcome::Failed => {
                let message = self.append(text, false, retry_count)?;
                self.log.warn(
                    "Message delivery failed",
                    Some(json!({
                        "messageId": message.id(),
                        "retryCount": message.retry_count(),
                    })),
                );
                Ok(message)
            }
        }
    }

    /// Re-send a failed message
    ///
    /// The failed message is removed and its text sent again. The resulting
    /// message has a fresh ID and records one more retry than the original,
    /// so a message that keeps failing stops being retryable after
    /// [`MAX_RETRIES`](crate::chat::models::MAX_RETRIES) attempts.
    ///
    /// # Returns
    /// * `Ok(Message)` - The new message, delivered or not
    /// * `Err(AppError::Validation)` - If no retryable message has this ID
    pub async fn retry(&self, id: u64) -> Result<Message, AppError> {
        let failed = self
            .get(id)
            .ok_or_else(|| AppError::Validation(format!("Message {} not found", id)))?;
        if !failed.can_retry() {
            return Err(AppError::Validation(format!(
                "Message {} cannot be retried",
                id
            )));
        }

        self.delete(id);
        let attempt = failed.with_retry_increment();
        let result = self.transmit(attempt.text(), attempt.retry_count()).await;

        match &result {
            Ok(message) if message.delivered() => self.log.info(
                "Message retry successful",
                Some(json!({ "messageId": id, "newId": message.id() })),
            ),
            Ok(_) => {}
            Err(e) => self.log.error(
                "Failed to retry message",
                Some(json!({ "messageId": id, "error": e.to_string() })),
            ),
        }
        result
    }

    /// Write delivered messages to storage
    ///
    /// With nothing delivered the history key is removed instead of holding
    /// an empty array. Storage failures are logged, never returned.
    pub fn persist(&self) {
        let records: Vec<MessageRecord> = self
            .conversation()
            .messages
            .iter()
            .filter(|m| m.delivered())
            .map(Message::to_record)
            .collect();

        let result = if records.is_empty() {
            self.storage.remove(HISTORY_KEY).map_err(AppError::from)
        } else {
            serde_json::to_string(&records)
                .map_err(AppError::from)
                .and_then(|json| {
                    self.storage
                        .set(HISTORY_KEY, &json)
                        .map_err(AppError::from)
                })
        };

        match result {
            Ok(()) => self.log.debug(
                "Chat history saved",
                Some(json!({ "count": records.len() })),
            ),
            Err(e) => self.log.error(
                "Failed to save chat history",
                Some(json!({ "error": e.to_string(), "kind": e.kind().as_str() })),
            ),
        }
    }

    /// Load history from storage, replacing the in-memory messages
    ///
    /// A missing key leaves the conversation untouched. Entries that do not
    /// form valid messages are dropped. If the history cannot be read or
    /// parsed the conversation is emptied; nothing is returned to the caller
    /// either way.
    pub fn restore(&self) {
        let raw = match self.storage.get(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                self.log.error(
                    "Failed to load chat history",
                    Some(json!({ "error": e.to_string() })),
                );
                self.conversation().messages.clear();
                return;
            }
        };

        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(values) => {
                let messages: Vec<Message> = values.iter().filter_map(Message::from_json).collect();
                let dropped = values.len() - messages.len();
                if dropped > 0 {
                    self.log.warn(
                        "Dropped invalid history entries",
                        Some(json!({ "dropped": dropped })),
                    );
                }
                let count = messages.len();
                self.conversation().messages = messages;
                self.log
                    .info("Chat history loaded", Some(json!({ "count": count })));
            }
            Err(e) => {
                self.log.error(
                    "Failed to load chat history",
                    Some(json!({ "error": e.to_string() })),
                );
                self.conversation().messages.clear();
            }
        }
    }

    /// Forget all messages, in memory and in storage
    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(HISTORY_KEY) {
            self.log.error(
                "Failed to clear chat history",
                Some(json!({ "error": e.to_string() })),
            );
        }
        self.conversation().messages.clear();
        self.log.info("All messages cleared", None);
    }

    /// Accept a message from outside this store (another session, a push
    /// channel)
    ///
    /// Returns true if the payload was a valid message with an unused ID
    /// and was appended.
    pub fn ingest_external(&self, value: &Value) -> bool {
        let Some(message) = Message::from_json(value) else {
            self.log.debug("Ignored invalid external message", None);
            return false;
        };

        let mut conversation = self.conversation();
        if conversation.messages.iter().any(|m| m.id() == message.id()) {
            drop(conversation);
            self.log.debug(
                "Ignored duplicate external message",
                Some(json!({ "messageId": message.id() })),
            );
            return false;
        }
        conversation.messages.push(message);
        true
    }

    /// Messages in chronological order
    pub fn messages(&self) -> Vec<Message> {
        self.conversation().messages.clone()
    }

    /// Messages newest first
    pub fn reversed_messages(&self) -> Vec<Message> {
        self.conversation().messages.iter().rev().cloned().collect()
    }

    /// Messages whose delivery failed
    pub fn failed_messages(&self) -> Vec<Message> {
        self.conversation()
            .messages
            .iter()
            .filter(|m| m.is_failed())
            .cloned()
            .collect()
    }

    /// Counts over the current conversation
    pub fn stats(&self) -> ChatStats {
        let conversation = self.conversation();
        let sent = conversation
            .messages
            .iter()
            .filter(|m| m.delivered())
            .count();
        ChatStats {
            total: conversation.messages.len(),
            sent,
            failed: conversation.messages.len() - sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::delivery::{AlwaysFail, NeverFail, SimulatedTransport};
    use crate::chat::models::MAX_MESSAGE_ID;
    use crate::logging::{LogLevel, RingBufferLog};
    use crate::storage::{BackendError, BackendErrorKind, KeyValueStore, MemoryStore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Returns queued outcomes in order, then delivers
    struct ScriptedTransport(Mutex<VecDeque<DeliveryOutcome>>);

    impl ScriptedTransport {
        fn new(outcomes: &[DeliveryOutcome]) -> Self {
            Self(Mutex::new(outcomes.iter().copied().collect()))
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(&self, _text: &str) -> DeliveryOutcome {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(DeliveryOutcome::Delivered)
        }
    }

    struct Harness {
        store: ChatStore,
        backend: Arc<MemoryStore>,
        log: Arc<RingBufferLog>,
    }

    fn harness_with(transport: Arc<dyn Transport>, backend: Arc<MemoryStore>) -> Harness {
        let log = Arc::new(RingBufferLog::new(0));
        let store = ChatStore::new(StorageService::new(backend.clone()), transport, log.clone());
        store.set_identity("Alice", "u1").unwrap();
        Harness { store, backend, log }
    }

    fn harness(transport: impl Transport + 'static) -> Harness {
        harness_with(Arc::new(transport), Arc::new(MemoryStore::new()))
    }

    fn instant(policy: impl crate::chat::delivery::FailurePolicy + 'static) -> SimulatedTransport {
        SimulatedTransport::new(Duration::ZERO, Arc::new(policy))
    }

    fn history(backend: &MemoryStore) -> Option<Vec<Value>> {
        backend
            .get("chat_history")
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    #[test]
    fn test_next_id_reuses_freed_highest_id() {
        let h = harness(instant(NeverFail));
        assert_eq!(h.store.next_id(), 1);

        for text in ["a", "b", "c"] {
            h.store.add(text, true).unwrap();
        }
        assert_eq!(h.store.next_id(), 4);

        assert!(h.store.delete(3));
        assert_eq!(h.store.next_id(), 3);

        // A gap below the maximum is not filled
        assert!(h.store.delete(1));
        assert_eq!(h.store.next_id(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_ids_are_rejected_not_wrapped() {
        let h = harness(instant(NeverFail));
        // Out-of-range IDs never enter the conversation
        assert!(!h.store.ingest_external(&json!({"id": u64::MAX, "text": "hi", "status": true})));

        assert!(h.store.ingest_external(&json!({
            "id": MAX_MESSAGE_ID,
            "text": "last",
            "status": true
        })));
        assert_eq!(h.store.next_id(), MAX_MESSAGE_ID + 1);

        assert!(matches!(h.store.add("next", true), Err(AppError::Validation(_))));
        assert!(matches!(h.store.send("next").await, Err(AppError::Validation(_))));
        assert_eq!(h.store.messages().len(), 1);

        // Freeing the top ID makes room again
        assert!(h.store.delete(MAX_MESSAGE_ID));
        assert_eq!(h.store.add("fresh", true).unwrap().id(), 1);
    }

    #[test]
    fn test_add_validates_text() {
        let h = harness(instant(NeverFail));
        assert!(matches!(h.store.add("", true), Err(AppError::Validation(_))));
        assert!(matches!(h.store.add(" ", true), Err(AppError::Validation(_))));
        assert!(h.store.messages().is_empty());

        let msg = h.store.add("hello", true).unwrap();
        assert!(msg.delivered());
        assert_eq!(msg.id(), 1);
        assert_eq!(msg.author(), &UserInfo::new("Alice", "u1"));
    }

    #[test]
    fn test_add_stamps_current_identity() {
        let h = harness(instant(NeverFail));
        let first = h.store.add("one", true).unwrap();
        h.store.set_identity("  Bob ", "u2").unwrap();
        let second = h.store.add("two", true).unwrap();

        assert_eq!(first.author(), &UserInfo::new("Alice", "u1"));
        assert_eq!(second.author(), &UserInfo::new("Bob", "u2"));
        assert_eq!(h.store.messages()[0].author().name, "Alice");
    }

    #[test]
    fn test_set_identity_rejects_blank() {
        let h = harness(instant(NeverFail));
        assert!(h.store.set_identity("   ", "u9").is_err());
        assert!(h.store.set_identity("Carol", "").is_err());
        assert_eq!(h.store.identity(), UserInfo::new("Alice", "u1"));
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let h = harness(instant(NeverFail));
        h.store.add("keep", true).unwrap();
        assert!(!h.store.delete(42));
        assert_eq!(h.store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_success_persists() {
        let h = harness(instant(NeverFail));

        let msg = h.store.send("  hi there ").await.unwrap();

        assert!(msg.delivered());
        assert_eq!(msg.text(), "hi there");
        let saved = history(&h.backend).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["text"], "hi there");
        assert_eq!(saved[0]["status"], true);
    }

    #[tokio::test]
    async fn test_send_failure_is_not_an_error() {
        let h = harness(instant(AlwaysFail));

        let msg = h.store.send("hi").await.unwrap();

        assert!(!msg.delivered());
        assert_eq!(msg.retry_count(), 0);
        assert_eq!(msg.author(), &UserInfo::new("Alice", "u1"));
        assert!(msg.can_retry());
        assert_eq!(h.store.failed_messages(), vec![msg]);
        assert!(history(&h.backend).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_invalid_text_fails_fast() {
        let h = harness(SimulatedTransport::new(
            Duration::from_millis(800),
            Arc::new(NeverFail),
        ));
        let start = tokio::time::Instant::now();

        let err = h.store.send("   ").await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(h.store.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_waits_for_latency() {
        let h = harness(SimulatedTransport::new(
            Duration::from_millis(800),
            Arc::new(NeverFail),
        ));
        let start = tokio::time::Instant::now();

        h.store.send("hi").await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_sends_get_distinct_ids() {
        let h = harness(SimulatedTransport::new(
            Duration::from_millis(800),
            Arc::new(NeverFail),
        ));

        let (a, b) = tokio::join!(h.store.send("first"), h.store.send("second"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.id(), b.id());
        let mut ids = vec![a.id(), b.id()];
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(history(&h.backend).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_increments_count_until_exhausted() {
        let h = harness(instant(AlwaysFail));
        let mut current = h.store.send("flaky").await.unwrap();

        for expected in 1..=3 {
            let next = h.store.retry(current.id()).await.unwrap();
            assert!(!next.delivered());
            assert_eq!(next.retry_count(), expected);
            assert_eq!(next.text(), "flaky");
            assert_eq!(h.store.messages().len(), 1);
            current = next;
        }

        assert!(!current.can_retry());
        let err = h.store.retry(current.id()).await.unwrap_err();
        assert!(err.to_string().contains("cannot be retried"));
        assert_eq!(h.store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_success_replaces_failed_message() {
        let h = harness(ScriptedTransport::new(&[
            DeliveryOutcome::Delivered,
            DeliveryOutcome::Failed,
            DeliveryOutcome::Delivered,
        ]));
        h.store.send("one").await.unwrap();
        let failed = h.store.send("two").await.unwrap();
        assert!(!failed.delivered());

        let retried = h.store.retry(failed.id()).await.unwrap();

        assert!(retried.delivered());
        assert_eq!(retried.retry_count(), 1);
        // Deleting the newest message frees its ID, so the resend reuses it
        assert_eq!(retried.id(), failed.id());
        assert_eq!(h.store.stats(), ChatStats { total: 2, sent: 2, failed: 0 });
        assert_eq!(history(&h.backend).unwrap().len(), 2);
        assert!(h
            .log
            .entries()
            .iter()
            .any(|e| e.message == "Message retry successful"));
    }

    #[tokio::test]
    async fn test_retry_rejects_delivered_and_missing() {
        let h = harness(instant(NeverFail));
        let sent = h.store.send("fine").await.unwrap();

        assert!(matches!(
            h.store.retry(sent.id()).await,
            Err(AppError::Validation(_))
        ));
        let err = h.store.retry(99).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(h.store.messages(), vec![sent]);
    }

    #[test]
    fn test_persist_then_restore_keeps_delivered_in_order() {
        let backend = Arc::new(MemoryStore::new());
        let h = harness_with(Arc::new(instant(NeverFail)), backend.clone());
        h.store.add("first", true).unwrap();
        h.store.add("lost", false).unwrap();
        h.store.add("second", true).unwrap();
        h.store.persist();

        let fresh = harness_with(Arc::new(instant(NeverFail)), backend);
        fresh.store.restore();

        let texts: Vec<String> = fresh
            .store
            .messages()
            .iter()
            .map(|m| m.text().to_string())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(
            fresh.store.messages().iter().map(Message::id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(fresh.store.messages(), {
            let mut original = h.store.messages();
            original.retain(|m| m.delivered());
            original
        });
    }

    #[test]
    fn test_persist_without_delivered_removes_key() {
        let h = harness(instant(NeverFail));
        h.store.add("sent", true).unwrap();
        h.store.persist();
        assert!(history(&h.backend).is_some());

        h.store.delete(1);
        h.store.add("failed", false).unwrap();
        h.store.persist();

        assert_eq!(h.backend.get("chat_history").unwrap(), None);
    }

    #[test]
    fn test_persist_failure_is_logged_not_raised() {
        let h = harness_with(
            Arc::new(instant(NeverFail)),
            Arc::new(MemoryStore::with_quota(8)),
        );
        h.store.add("this will not fit in eight bytes", true).unwrap();

        h.store.persist();

        assert_eq!(h.store.messages().len(), 1);
        let errors: Vec<_> = h
            .log
            .entries()
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Failed to save chat history");
        assert_eq!(errors[0].data.as_ref().unwrap()["kind"], "STORAGE");
    }

    #[test]
    fn test_restore_without_key_keeps_memory() {
        let h = harness(instant(NeverFail));
        h.store.add("unsaved", false).unwrap();

        h.store.restore();

        assert_eq!(h.store.messages().len(), 1);
    }

    #[test]
    fn test_restore_corrupt_history_empties_conversation() {
        let h = harness(instant(NeverFail));
        h.store.add("in memory", true).unwrap();
        h.backend.set("chat_history", "{ not json").unwrap();

        h.store.restore();

        assert!(h.store.messages().is_empty());
        assert!(h
            .log
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message == "Failed to load chat history"));
    }

    #[test]
    fn test_restore_non_array_empties_conversation() {
        let h = harness(instant(NeverFail));
        h.store.add("in memory", true).unwrap();
        h.backend.set("chat_history", r#"{"id": 1}"#).unwrap();

        h.store.restore();

        assert!(h.store.messages().is_empty());
    }

    #[test]
    fn test_restore_read_failure_empties_conversation() {
        struct UnreadableStore;

        impl KeyValueStore for UnreadableStore {
            fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
                Err(BackendError::new(BackendErrorKind::Io, "permission denied"))
            }
            fn set(&self, _key: &str, _value: &str) -> Result<(), BackendError> {
                Ok(())
            }
            fn remove(&self, _key: &str) -> Result<(), BackendError> {
                Ok(())
            }
            fn keys(&self) -> Result<Vec<String>, BackendError> {
                Ok(Vec::new())
            }
        }

        let log = Arc::new(RingBufferLog::new(0));
        let store = ChatStore::new(
            StorageService::new(Arc::new(UnreadableStore)),
            Arc::new(instant(NeverFail)),
            log.clone(),
        );
        store.add("in memory", true).unwrap();

        store.restore();

        assert!(store.messages().is_empty());
        let entry = log
            .entries()
            .into_iter()
            .find(|e| e.level == LogLevel::Error)
            .unwrap();
        assert!(entry.data.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("permission denied"));
    }

    #[test]
    fn test_restore_drops_invalid_entries() {
        let h = harness(instant(NeverFail));
        let raw = json!([
            {"id": 1, "text": "ok", "userInfo": {"name": "A", "id": "a"}, "status": true},
            {"id": "abc", "text": "bad id"},
            {"id": 2, "text": "   "},
            "junk",
            {"id": "3", "text": "coerced", "status": true}
        ]);
        h.backend.set("chat_history", &raw.to_string()).unwrap();

        h.store.restore();

        let ids: Vec<u64> = h.store.messages().iter().map(Message::id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(h
            .log
            .entries()
            .iter()
            .any(|e| e.message == "Dropped invalid history entries"
                && e.data == Some(json!({ "dropped": 3 }))));
    }

    #[test]
    fn test_clear_removes_key_and_messages() {
        let h = harness(instant(NeverFail));
        h.backend.set("unrelated", "stay").unwrap();
        h.store.add("a", true).unwrap();
        h.store.persist();

        h.store.clear();

        assert!(h.store.messages().is_empty());
        assert_eq!(h.backend.get("chat_history").unwrap(), None);
        assert_eq!(h.backend.get("unrelated").unwrap(), Some("stay".to_string()));
    }

    #[test]
    fn test_ingest_external() {
        let h = harness(instant(NeverFail));
        h.store.add("mine", true).unwrap();

        assert!(h.store.ingest_external(&json!({
            "id": 10,
            "text": "from another tab",
            "userInfo": {"name": "Bob", "id": "u2"},
            "status": true
        })));
        // Duplicate ID
        assert!(!h.store.ingest_external(&json!({"id": 1, "text": "dup"})));
        // Invalid payloads
        assert!(!h.store.ingest_external(&json!({"id": "x", "text": "bad"})));
        assert!(!h.store.ingest_external(&Value::Null));

        let messages = h.store.messages();
        assert_eq!(messages.len(), 2);
        assert!(!messages[1].is_own_message("u1"));
        assert_eq!(h.store.next_id(), 11);
    }

    #[test]
    fn test_stats_and_views_track_mutations() {
        let h = harness(instant(NeverFail));
        assert_eq!(h.store.stats(), ChatStats::default());

        h.store.add("a", true).unwrap();
        h.store.add("b", false).unwrap();
        h.store.add("c", true).unwrap();
        assert_eq!(h.store.stats(), ChatStats { total: 3, sent: 2, failed: 1 });

        h.store.delete(2);
        assert_eq!(h.store.stats(), ChatStats { total: 2, sent: 2, failed: 0 });

        let reversed: Vec<u64> = h.store.reversed_messages().iter().map(Message::id).collect();
        assert_eq!(reversed, vec![3, 1]);

        h.store.clear();
        assert_eq!(h.store.stats(), ChatStats::default());
    }
}
