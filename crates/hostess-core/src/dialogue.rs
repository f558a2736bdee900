use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{domain::ChatId, model::types::ChatMessage};

struct ChatHistory {
    turns: VecDeque<(String, String)>,
    last_active: Instant,
}

/// Recent user/assistant exchanges per chat, so follow-ups ("да, бронируйте")
/// keep their context.
pub struct DialogueStore {
    max_turns: usize,
    chats: Mutex<HashMap<ChatId, ChatHistory>>,
}

impl DialogueStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            chats: Mutex::new(HashMap::new()),
        }
    }

    /// History as chat messages, oldest first.
    pub async fn history(&self, chat_id: ChatId) -> Vec<ChatMessage> {
        let chats = self.chats.lock().await;
        chats
            .get(&chat_id)
            .map(|chat| {
                chat.turns
                    .iter()
                    .flat_map(|(user, assistant)| {
                        [ChatMessage::user(user), ChatMessage::assistant(assistant)]
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn record(&self, chat_id: ChatId, user: &str, assistant: &str) {
        if self.max_turns == 0 {
            return;
        }
        let now = Instant::now();
        let mut chats = self.chats.lock().await;
        let chat = chats.entry(chat_id).or_insert_with(|| ChatHistory {
            turns: VecDeque::new(),
            last_active: now,
        });
        chat.last_active = now;
        chat.turns.push_back((user.to_string(), assistant.to_string()));
        while chat.turns.len() > self.max_turns {
            chat.turns.pop_front();
        }
    }

    pub async fn reset(&self, chat_id: ChatId) -> bool {
        self.chats.lock().await.remove(&chat_id).is_some()
    }

    /// Forget chats with no exchange for `max_idle`. Returns how many were dropped.
    pub async fn prune_idle(&self, max_idle: Duration, now: Instant) -> usize {
        let mut chats = self.chats.lock().await;
        let before = chats.len();
        chats.retain(|_, chat| now.saturating_duration_since(chat.last_active) < max_idle);
        before - chats.len()
    }

    pub async fn tracked(&self) -> usize {
        self.chats.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::Role;

    #[tokio::test]
    async fn keeps_only_the_latest_turns_per_chat() {
        let store = DialogueStore::new(2);
        let chat = ChatId(7);
        store.record(chat, "u1", "a1").await;
        store.record(chat, "u2", "a2").await;
        store.record(chat, "u3", "a3").await;
        store.record(ChatId(8), "other", "chat").await;

        let h = store.history(chat).await;
        assert_eq!(h.len(), 4);
        assert_eq!(h[0].role, Role::User);
        assert_eq!(h[0].text(), "u2");
        assert_eq!(h[3].text(), "a3");

        assert!(store.reset(chat).await);
        assert!(store.history(chat).await.is_empty());
        assert_eq!(store.history(ChatId(8)).await.len(), 2);
    }

    #[tokio::test]
    async fn idle_chats_are_forgotten() {
        let store = DialogueStore::new(3);
        store.record(ChatId(1), "u", "a").await;
        store.record(ChatId(2), "u", "a").await;
        let now = Instant::now();

        assert_eq!(store.prune_idle(Duration::from_secs(3600), now).await, 0);
        assert_eq!(store.tracked().await, 2);

        let later = now + Duration::from_secs(2 * 3600);
        assert_eq!(store.prune_idle(Duration::from_secs(3600), later).await, 2);
        assert!(store.history(ChatId(1)).await.is_empty());
        assert_eq!(store.tracked().await, 0);
    }

    #[tokio::test]
    async fn zero_turns_disables_memory() {
        let store = DialogueStore::new(0);
        store.record(ChatId(1), "u", "a").await;
        assert!(store.history(ChatId(1)).await.is_empty());
    }
}
