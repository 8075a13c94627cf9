use crux_core::capability::{Capability, CapabilityContext, Operation};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{Message, MessageId, OutgoingMessage, RoomId, UnixTimeMs};

/// Identifies one live subscription instance. A fresh id is minted for every
/// `Subscribe` so that snapshots from a detached subscription can be told
/// apart from snapshots belonging to the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", content = "data")]
pub enum FeedOperation {
    /// Open a live query against the room's message collection, ordered
    /// newest-first. The shell responds with a `Snapshot` carrying the
    /// complete list on every change until the subscription is detached.
    Subscribe {
        room: RoomId,
        subscription: SubscriptionId,
    },
    /// Tear down a subscription. Fire-and-forget; the shell must emit no
    /// further snapshots for this id.
    Detach { subscription: SubscriptionId },
    /// Insert one record. The backend assigns the id and the timestamp.
    Append {
        room: RoomId,
        record: OutgoingMessage,
    },
}

impl Operation for FeedOperation {
    type Output = FeedResult;
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedError {
    #[error("permission denied by the backend")]
    PermissionDenied,

    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("record rejected: {message}")]
    Rejected { message: String },

    #[error("operation timed out")]
    Timeout,

    #[error("feed error: {message}")]
    Unknown { message: String },
}

impl FeedError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum FeedOutput {
    /// The complete message list as of one subscription event, descending
    /// by creation time. Always a full replacement, never a delta.
    Snapshot { messages: Vec<Message> },
    /// Durable acceptance of an `Append`, echoing the server-assigned fields.
    Appended {
        id: MessageId,
        created_at: UnixTimeMs,
    },
    Detached,
}

impl FeedOutput {
    #[must_use]
    pub fn snapshot(&self) -> Option<&[Message]> {
        match self {
            Self::Snapshot { messages } => Some(messages),
            _ => None,
        }
    }

    #[must_use]
    pub fn appended_id(&self) -> Option<&MessageId> {
        match self {
            Self::Appended { id, .. } => Some(id),
            _ => None,
        }
    }
}

pub type FeedResult = Result<FeedOutput, FeedError>;

#[derive(Clone)]
pub struct Feed<Ev> {
    context: CapabilityContext<FeedOperation, Ev>,
}

impl<Ev> Capability<Ev> for Feed<Ev> {
    type Operation = FeedOperation;
    type MappedSelf<MappedEv> = Feed<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Feed::new(self.context.map_event(f))
    }
}

impl<Ev> Feed<Ev>
where
    Ev: Send + 'static,
{
    pub fn new(context: CapabilityContext<FeedOperation, Ev>) -> Self {
        Self { context }
    }

    /// Opens a live subscription. `make_event` fires once per emitted
    /// snapshot, and once more with the terminal error if the backend ends
    /// the subscription.
    pub fn subscribe<F>(&self, room: RoomId, subscription: SubscriptionId, make_event: F)
    where
        F: Fn(FeedResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let mut snapshots =
                ctx.stream_from_shell(FeedOperation::Subscribe { room, subscription });

            while let Some(result) = snapshots.next().await {
                ctx.update_app(make_event(result));
            }
        });
    }

    /// Detaches a subscription. Synchronous from the caller's perspective;
    /// the shell emits no further callbacks for this id.
    pub fn detach(&self, subscription: SubscriptionId) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(FeedOperation::Detach { subscription }).await;
        });
    }

    /// Appends one record to the room's collection. Resolves on durable
    /// acceptance with the server-assigned id and timestamp.
    pub fn append<F>(&self, room: RoomId, record: OutgoingMessage, make_event: F)
    where
        F: FnOnce(FeedResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx
                .request_from_shell(FeedOperation::Append { room, record })
                .await;
            ctx.update_app(make_event(result));
        });
    }
}
