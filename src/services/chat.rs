//! Chat registry — create, delete, and post with membership checks.
//!
//! DESIGN
//! ======
//! All chat state lives in one `ChatRegistry` owned by `AppState`. The
//! top-level map is guarded by a readers-writer lock; each chat's message log
//! has its own mutex so posts to different chats never contend.
//!
//! LOCKING
//! =======
//! - Create and delete take the map lock exclusively.
//! - Post holds the map lock shared for the entire lookup → membership →
//!   append sequence, then the chat's message mutex for the append only.
//!   A delete therefore cannot slip between the check and the append: it
//!   waits for in-flight posts, and later posts observe the chat as gone.
//! - No lock is held across anything but O(1) map and vector operations.
//!
//! ERROR HANDLING
//! ==============
//! Validation runs before any lock is taken. Every operation either applies
//! fully or not at all. Id generation is the only retry loop and it is
//! bounded; exhaustion is reported as `Internal` rather than overwriting a
//! live chat.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

// =============================================================================
// TYPES
// =============================================================================

/// Chat identifier. Always positive; zero means "unset".
pub type ChatId = i64;

/// Participant identifier. Zero means "unset".
pub type UserId = i64;

/// Default bound on id-generation attempts per create.
pub const DEFAULT_MAX_ID_ATTEMPTS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("chat not found: {0}")]
    NotFound(ChatId),
    #[error("user {sender_id} is not a member of chat {chat_id}")]
    NotAMember { chat_id: ChatId, sender_id: UserId },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }
}

impl crate::frame::ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::NotFound(_) => "E_CHAT_NOT_FOUND",
            Self::NotAMember { .. } => "E_NOT_A_MEMBER",
            Self::Internal(_) => "E_INTERNAL",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// One appended message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_id: UserId,
    pub text: String,
    pub created_at: OffsetDateTime,
}

/// Point-in-time copy of a chat.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub id: ChatId,
    /// Participants in ascending order.
    pub participants: Vec<UserId>,
    pub messages: Vec<Message>,
}

struct Chat {
    participants: HashSet<UserId>,
    messages: Mutex<Vec<Message>>,
}

impl Chat {
    fn has_member(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }
}

// =============================================================================
// ID SOURCE
// =============================================================================

/// Supplies candidate chat identifiers. Uniqueness is checked by the registry.
pub trait ChatIdSource: Send + Sync {
    fn next_id(&self) -> ChatId;
}

/// Uniform random ids over the positive 63-bit range.
pub struct RandomChatIds;

impl ChatIdSource for RandomChatIds {
    fn next_id(&self) -> ChatId {
        rand::rng().random_range(1..=ChatId::MAX)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

pub struct ChatRegistry {
    chats: RwLock<HashMap<ChatId, Chat>>,
    ids: Box<dyn ChatIdSource>,
    max_id_attempts: usize,
}

impl ChatRegistry {
    /// Registry with random ids.
    #[must_use]
    pub fn new(max_id_attempts: usize) -> Self {
        Self::with_id_source(RandomChatIds, max_id_attempts)
    }

    #[must_use]
    pub fn with_id_source(ids: impl ChatIdSource + 'static, max_id_attempts: usize) -> Self {
        Self { chats: RwLock::new(HashMap::new()), ids: Box::new(ids), max_id_attempts: max_id_attempts.max(1) }
    }

    /// Create a chat for a fixed participant set and return its id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty set or a zero participant id, and
    /// `Internal` if no unused id was found within the attempt bound.
    pub async fn create_chat(&self, participant_ids: &[UserId]) -> Result<ChatId, ChatError> {
        if participant_ids.is_empty() {
            return Err(ChatError::invalid("user_ids must be not empty"));
        }
        if participant_ids.contains(&0) {
            return Err(ChatError::invalid("user_ids must not contain 0"));
        }
        let participants: HashSet<UserId> = participant_ids.iter().copied().collect();

        let mut chats = self.chats.write().await;
        for attempt in 1..=self.max_id_attempts {
            let chat_id = self.ids.next_id();
            if chat_id <= 0 || chats.contains_key(&chat_id) {
                warn!(chat_id, attempt, "chat id unusable, retrying");
                continue;
            }

            let count = participants.len();
            chats.insert(chat_id, Chat { participants, messages: Mutex::new(Vec::new()) });
            info!(chat_id, participants = count, "chat created");
            return Ok(chat_id);
        }

        Err(ChatError::Internal(format!("no unused chat id after {} attempts", self.max_id_attempts)))
    }

    /// Delete a chat together with all its messages.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is zero or not live.
    pub async fn delete_chat(&self, chat_id: ChatId) -> Result<(), ChatError> {
        if chat_id == 0 {
            return Err(ChatError::NotFound(chat_id));
        }

        let mut chats = self.chats.write().await;
        let Some(chat) = chats.remove(&chat_id) else {
            return Err(ChatError::NotFound(chat_id));
        };
        drop(chats);

        info!(chat_id, messages = chat.messages.into_inner().len(), "chat deleted");
        Ok(())
    }

    /// Append a message from a participant.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an unset chat id, unset sender, empty text, or
    /// missing timestamp; `NotFound` if the chat is not live; `NotAMember`
    /// if the sender is not a participant.
    pub async fn post_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        text: &str,
        created_at: Option<OffsetDateTime>,
    ) -> Result<(), ChatError> {
        if chat_id == 0 {
            return Err(ChatError::invalid("chat_id required"));
        }
        if sender_id == 0 {
            return Err(ChatError::invalid("from_user_id required"));
        }
        if text.is_empty() {
            return Err(ChatError::invalid("text required"));
        }
        let Some(created_at) = created_at else {
            return Err(ChatError::invalid("created_at required"));
        };

        let chats = self.chats.read().await;
        let chat = chats.get(&chat_id).ok_or(ChatError::NotFound(chat_id))?;
        if !chat.has_member(sender_id) {
            return Err(ChatError::NotAMember { chat_id, sender_id });
        }

        let mut messages = chat.messages.lock().await;
        messages.push(Message { sender_id, text: text.to_owned(), created_at });
        debug!(chat_id, sender_id, seq = messages.len(), "message posted");
        Ok(())
    }

    /// Number of live chats.
    pub async fn chat_count(&self) -> usize {
        self.chats.read().await.len()
    }
}

// =============================================================================
// INSPECTION
// =============================================================================

#[cfg(test)]
impl ChatRegistry {
    pub async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ChatError> {
        let chats = self.chats.read().await;
        let chat = chats.get(&chat_id).ok_or(ChatError::NotFound(chat_id))?;
        Ok(chat.has_member(user_id))
    }

    pub async fn message_count(&self, chat_id: ChatId) -> Result<usize, ChatError> {
        let chats = self.chats.read().await;
        let chat = chats.get(&chat_id).ok_or(ChatError::NotFound(chat_id))?;
        let count = chat.messages.lock().await.len();
        Ok(count)
    }

    /// Participants come back sorted.
    pub async fn snapshot(&self, chat_id: ChatId) -> Result<ChatSnapshot, ChatError> {
        let chats = self.chats.read().await;
        let chat = chats.get(&chat_id).ok_or(ChatError::NotFound(chat_id))?;

        let mut participants: Vec<UserId> = chat.participants.iter().copied().collect();
        participants.sort_unstable();
        let messages = chat.messages.lock().await.clone();

        Ok(ChatSnapshot { id: chat_id, participants, messages })
    }
}

impl Default for ChatRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ID_ATTEMPTS)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Parse an RFC 3339 timestamp supplied by a caller.
///
/// # Errors
///
/// Returns `InvalidInput` if the value is not RFC 3339.
pub fn parse_created_at(raw: &str) -> Result<OffsetDateTime, ChatError> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|e| ChatError::invalid(format!("created_at must be an RFC 3339 timestamp: {e}")))
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
