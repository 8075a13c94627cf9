use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RoomId;

/// Longest key the shell-side store is required to accept.
pub const MAX_KEY_LENGTH: usize = 512;

/// Largest value the core will hand to the store. Snapshots above this are
/// dropped with a warning rather than written.
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

const ROOM_KEY_PREFIX: &str = "cache";

/// A validated store key. Construction is the only way to obtain one, so
/// every key that reaches the shell has passed the checks below.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Result<Self, CacheError> {
        let key = key.into();

        if key.trim().is_empty() {
            return Err(CacheError::invalid_key(&key, "key is empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::invalid_key(&key, "key exceeds maximum length"));
        }
        if key.contains('\0') {
            return Err(CacheError::invalid_key(&key, "key contains a null byte"));
        }
        if key.contains("..") || key.starts_with('/') {
            return Err(CacheError::invalid_key(&key, "key looks like a path"));
        }
        if key.chars().any(char::is_control) {
            return Err(CacheError::invalid_key(
                &key,
                "key contains control characters",
            ));
        }

        Ok(Self(key))
    }

    /// Key under which a room's message snapshot is stored.
    pub fn for_room(room: &RoomId) -> Result<Self, CacheError> {
        Self::new(format!("{ROOM_KEY_PREFIX}:{}", room.as_str()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", content = "data")]
pub enum CacheOperation {
    Read { key: CacheKey },
    Write { key: CacheKey, bytes: Vec<u8> },
}

impl Operation for CacheOperation {
    type Output = CacheResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum CacheOutput {
    /// `bytes` is `None` when the key has never been written.
    Read { bytes: Option<Vec<u8>> },
    Written,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value of {size} bytes exceeds the {max} byte limit")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl CacheError {
    fn invalid_key(key: &str, reason: &str) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type CacheResult = Result<CacheOutput, CacheError>;

#[derive(Clone)]
pub struct Cache<Ev> {
    context: CapabilityContext<CacheOperation, Ev>,
}

impl<Ev> Capability<Ev> for Cache<Ev> {
    type Operation = CacheOperation;
    type MappedSelf<MappedEv> = Cache<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Cache::new(self.context.map_event(f))
    }
}

impl<Ev> Cache<Ev>
where
    Ev: Send + 'static,
{
    pub fn new(context: CapabilityContext<CacheOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn read<F>(&self, key: CacheKey, make_event: F)
    where
        F: FnOnce(CacheResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx.request_from_shell(CacheOperation::Read { key }).await;
            ctx.update_app(make_event(result));
        });
    }

    /// Oversized values are rejected locally; the shell never sees them.
    pub fn write<F>(&self, key: CacheKey, bytes: Vec<u8>, make_event: F)
    where
        F: FnOnce(CacheResult) -> Ev + Send + 'static,
    {
        if bytes.len() > MAX_VALUE_SIZE {
            self.context.update_app(make_event(Err(CacheError::ValueTooLarge {
                size: bytes.len(),
                max: MAX_VALUE_SIZE,
            })));
            return;
        }

        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx
                .request_from_shell(CacheOperation::Write { key, bytes })
                .await;
            ctx.update_app(make_event(result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_keys() {
        assert!(CacheKey::new("cache:messages").is_ok());
        assert!(CacheKey::new("session").is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace_keys() {
        assert!(CacheKey::new("").is_err());
        assert!(CacheKey::new("   ").is_err());
    }

    #[test]
    fn rejects_path_like_keys() {
        assert!(CacheKey::new("../etc/passwd").is_err());
        assert!(CacheKey::new("/absolute").is_err());
    }

    #[test]
    fn rejects_null_bytes_and_control_characters() {
        assert!(CacheKey::new("bad\0key").is_err());
        assert!(CacheKey::new("bad\nkey").is_err());
    }

    #[test]
    fn rejects_overlong_keys() {
        let long = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(CacheKey::new(long).is_err());
    }

    #[test]
    fn room_key_is_namespaced() {
        let key = CacheKey::for_room(&RoomId::new("messages")).unwrap();
        assert_eq!(key.as_str(), "cache:messages");
    }

    #[test]
    fn operation_round_trips_through_serde() {
        let key = CacheKey::new("cache:messages").unwrap();
        let op = CacheOperation::Write {
            key,
            bytes: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: CacheOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
