use super::models::{ChatConversation, ChatConversationSummary, ChatMessage};
use super::{MetadataStore, CHAT_CONVERSATIONS_TABLE};
use anyhow::Result;
use chrono::Utc;
use tracing::error;

impl MetadataStore {
    /// Return the stored history for a conversation.
    ///
    /// Beyond the predicate layer, a stored user_id or app_id that fails to
    /// match the caller's context hides the conversation entirely.
    pub fn get_chat_history(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        app_id: Option<&str>,
    ) -> Result<Option<Vec<ChatMessage>>> {
        let Some(convo) = self.get::<ChatConversation>(CHAT_CONVERSATIONS_TABLE, conversation_id)?
        else {
            return Ok(None);
        };
        if let (Some(stored), Some(caller)) = (convo.user_id.as_deref(), user_id) {
            if stored != caller {
                return Ok(None);
            }
        }
        if let (Some(stored), Some(caller)) = (convo.app_id.as_deref(), app_id) {
            if stored != caller {
                return Ok(None);
            }
        }
        Ok(Some(convo.history))
    }

    /// Replace the stored history atomically, creating the conversation on
    /// first write.
    pub fn upsert_chat_history(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        app_id: Option<&str>,
        history: &[ChatMessage],
    ) -> bool {
        let result = (|| -> Result<()> {
            let now = Utc::now();
            let existing =
                self.get::<ChatConversation>(CHAT_CONVERSATIONS_TABLE, conversation_id)?;
            let convo = ChatConversation {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.map(String::from),
                app_id: app_id.map(String::from),
                title: existing.as_ref().and_then(|c| c.title.clone()),
                history: history.to_vec(),
                created_at: existing.as_ref().map(|c| c.created_at).unwrap_or(now),
                updated_at: now,
            };
            self.put(CHAT_CONVERSATIONS_TABLE, conversation_id, &convo)
        })();
        if let Err(e) = result {
            error!("Error upserting chat history: {}", e);
            return false;
        }
        true
    }

    pub fn list_chat_conversations(
        &self,
        user_id: Option<&str>,
        app_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatConversationSummary>> {
        let mut convos: Vec<ChatConversation> = self
            .scan::<ChatConversation>(CHAT_CONVERSATIONS_TABLE)?
            .into_iter()
            .filter(|c| {
                if let Some(uid) = user_id {
                    if c.user_id.as_deref() != Some(uid) {
                        return false;
                    }
                }
                if let Some(aid) = app_id {
                    if c.app_id.as_deref() != Some(aid) {
                        return false;
                    }
                }
                true
            })
            .collect();
        convos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(convos
            .into_iter()
            .take(limit)
            .map(|c| ChatConversationSummary {
                chat_id: c.conversation_id,
                title: c.title,
                created_at: c.created_at,
                updated_at: c.updated_at,
                last_message: c.history.last().cloned(),
            })
            .collect())
    }

    pub fn update_chat_title(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        app_id: Option<&str>,
        title: &str,
    ) -> Result<bool> {
        if self
            .get_chat_history(conversation_id, user_id, app_id)?
            .is_none()
        {
            return Ok(false);
        }
        self.update_row::<ChatConversation, _>(CHAT_CONVERSATIONS_TABLE, conversation_id, |mut c| {
            c.title = Some(title.to_string());
            c.updated_at = Utc::now().max(c.updated_at);
            Some(c)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_store;

    #[test]
    fn history_upsert_replaces_and_get_roundtrips() {
        let (_dir, store) = open_store(false);
        let history = vec![ChatMessage::user("hello")];
        assert!(store.upsert_chat_history("c1", Some("u1"), None, &history));

        let mut extended = history.clone();
        extended.push(ChatMessage::assistant("hi there"));
        assert!(store.upsert_chat_history("c1", Some("u1"), None, &extended));

        let stored = store.get_chat_history("c1", Some("u1"), None).unwrap().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, "user");
        assert_eq!(stored[1].role, "assistant");
    }

    // Persisted history only ever grows by appending: each upsert in the
    // query/agent pipelines extends the previously stored prefix.
    #[test]
    fn successive_upserts_are_prefix_extensions() {
        let (_dir, store) = open_store(false);
        let mut history: Vec<ChatMessage> = Vec::new();
        let mut previous_len = 0;
        for turn in 0..4 {
            history.push(ChatMessage::user(format!("question {turn}")));
            history.push(ChatMessage::assistant(format!("answer {turn}")));
            assert!(store.upsert_chat_history("c1", None, None, &history));

            let stored = store.get_chat_history("c1", None, None).unwrap().unwrap();
            assert_eq!(stored.len(), history.len());
            assert!(stored.len() > previous_len);
            for (stored_msg, expected) in stored.iter().zip(history.iter()) {
                assert_eq!(stored_msg.content, expected.content);
            }
            previous_len = stored.len();
        }
    }

    #[test]
    fn mismatched_scope_hides_conversation() {
        let (_dir, store) = open_store(false);
        let history = vec![ChatMessage::user("hello")];
        store.upsert_chat_history("c1", Some("u1"), Some("app_a"), &history);

        assert!(store.get_chat_history("c1", Some("u2"), None).unwrap().is_none());
        assert!(store
            .get_chat_history("c1", Some("u1"), Some("app_b"))
            .unwrap()
            .is_none());
        assert!(store
            .get_chat_history("c1", Some("u1"), Some("app_a"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn listing_is_scoped_and_ordered_by_recency() {
        let (_dir, store) = open_store(false);
        store.upsert_chat_history("c1", Some("u1"), None, &[ChatMessage::user("a")]);
        store.upsert_chat_history("c2", Some("u1"), None, &[ChatMessage::user("b")]);
        store.upsert_chat_history("c3", Some("u2"), None, &[ChatMessage::user("c")]);

        let convos = store.list_chat_conversations(Some("u1"), None, 10).unwrap();
        assert_eq!(convos.len(), 2);
        assert_eq!(convos[0].chat_id, "c2", "latest first");
        assert!(convos[0].last_message.is_some());
    }

    #[test]
    fn title_update_respects_scope() {
        let (_dir, store) = open_store(false);
        store.upsert_chat_history("c1", Some("u1"), None, &[ChatMessage::user("a")]);
        assert!(!store.update_chat_title("c1", Some("u2"), None, "nope").unwrap());
        assert!(store.update_chat_title("c1", Some("u1"), None, "Contracts Q&A").unwrap());
        let convos = store.list_chat_conversations(Some("u1"), None, 10).unwrap();
        assert_eq!(convos[0].title.as_deref(), Some("Contracts Q&A"));
    }
}
