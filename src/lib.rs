#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use app::App;
pub use capabilities::{
    upload_reference, CacheError, CacheKey, CacheOperation, CacheOutput, CacheResult,
    Capabilities, Effect, FeedError, FeedOperation, FeedOutput, FeedResult, MediaError,
    MediaOperation, MediaOutput, MediaResult, SubscriptionId, MAX_UPLOAD_BYTES, MAX_VALUE_SIZE,
};

pub const DEFAULT_ROOM: &str = "messages";
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";
pub const DEFAULT_BACKGROUND_COLOR: &str = "#090C08";
pub const DEFAULT_AUTHOR_ID: &str = "unknown";
pub const MAX_MESSAGE_CHARS: usize = 4096;
pub const CACHE_SCHEMA_VERSION: u32 = 1;

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Permission,
    Validation,
    Backend,
    Upload,
    ImageTooLarge,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Permission => "PERMISSION_DENIED",
            Self::Validation => "VALIDATION_ERROR",
            Self::Backend => "BACKEND_ERROR",
            Self::Upload => "UPLOAD_ERROR",
            Self::ImageTooLarge => "IMAGE_TOO_LARGE",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Backend | Self::Upload => {
                ErrorSeverity::Transient
            }
            Self::Permission | Self::Validation | Self::ImageTooLarge | Self::Unknown => {
                ErrorSeverity::Permanent
            }
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Backend | Self::Upload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Permission => {
                "You don't have permission to perform this action.".into()
            }
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::Backend => {
                "The message could not be delivered. Please try again.".into()
            }
            ErrorKind::Upload => {
                "The image could not be uploaded. Please try again.".into()
            }
            ErrorKind::ImageTooLarge => {
                format!(
                    "The image is too large. Please use an image smaller than {} MB.",
                    MAX_UPLOAD_BYTES / 1_000_000
                )
            }
            ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }
}

impl From<FeedError> for AppError {
    fn from(e: FeedError) -> Self {
        let kind = match &e {
            FeedError::PermissionDenied => ErrorKind::Permission,
            FeedError::Unavailable { .. } => ErrorKind::Network,
            FeedError::Rejected { .. } => ErrorKind::Backend,
            FeedError::Timeout => ErrorKind::Timeout,
            FeedError::Unknown { .. } => ErrorKind::Unknown,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<MediaError> for AppError {
    fn from(e: MediaError) -> Self {
        let kind = match &e {
            MediaError::PermissionDenied => ErrorKind::Permission,
            MediaError::TooLarge { .. } => ErrorKind::ImageTooLarge,
            MediaError::Network { .. } => ErrorKind::Network,
            MediaError::Failed { .. } => ErrorKind::Upload,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<GeoPointError> for AppError {
    fn from(e: GeoPointError) -> Self {
        Self::new(ErrorKind::Validation, e.to_string())
    }
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    #[must_use]
    pub fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }

    #[must_use]
    pub fn is_after(self, other: Self) -> bool {
        self.0 > other.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
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

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self(DEFAULT_ROOM.to_string())
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Error, Serialize, Deserialize, PartialEq)]
pub enum GeoPointError {
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("coordinates must be finite numbers")]
    NonFinite,
}

/// A coordinate pair as stored on message documents.
///
/// Deserialization is unchecked (backend data is taken as-is);
/// [`GeoPoint::validated`] is the gate for locally produced coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn validated(latitude: f64, longitude: f64) -> Result<Self, GeoPointError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(GeoPointError::NonFinite);
        }
        if !(MIN_LATITUDE..=MAX_LATITUDE).contains(&latitude) {
            return Err(GeoPointError::LatitudeOutOfRange(latitude));
        }
        if !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&longitude) {
            return Err(GeoPointError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

// Bit-exact equality so types embedding a GeoPoint can stay Eq.
impl PartialEq for GeoPoint {
    fn eq(&self, other: &Self) -> bool {
        self.latitude.to_bits() == other.latitude.to_bits()
            && self.longitude.to_bits() == other.longitude.to_bits()
    }
}

impl Eq for GeoPoint {}

/// Identity snapshot captured at send time. Later profile changes do not
/// rewrite existing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// One message document in the backend's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: UnixTimeMs,
    #[serde(rename = "user")]
    pub author: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

/// A draft record. The backend assigns `_id` and `createdAt` on append, so
/// neither field exists here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "user")]
    pub author: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl OutgoingMessage {
    #[must_use]
    pub fn text(text: impl Into<String>, author: Author) -> Self {
        Self {
            text: text.into(),
            author,
            image: None,
            location: None,
        }
    }

    #[must_use]
    pub fn image(url: impl Into<String>, author: Author) -> Self {
        Self {
            text: String::new(),
            author,
            image: Some(url.into()),
            location: None,
        }
    }

    #[must_use]
    pub fn location(point: GeoPoint, author: Author) -> Self {
        Self {
            text: String::new(),
            author,
            image: None,
            location: Some(point),
        }
    }
}

/// Envelope written to the local store. A schema version mismatch on load is
/// treated the same as a miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMessages {
    pub schema_version: u32,
    pub saved_at_ms: u64,
    pub messages: Vec<Message>,
}

impl CachedMessages {
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            saved_at_ms: get_current_time_ms(),
            messages,
        }
    }

    /// Best-effort decode. Any failure yields the empty list; a corrupt or
    /// stale cache never takes the screen down.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Vec<Message> {
        match serde_json::from_slice::<Self>(bytes) {
            Ok(envelope) if envelope.schema_version == CACHE_SCHEMA_VERSION => envelope.messages,
            Ok(envelope) => {
                tracing::warn!(
                    found = envelope.schema_version,
                    expected = CACHE_SCHEMA_VERSION,
                    "cached snapshot has a different schema version, treating as a miss"
                );
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "cached snapshot is undecodable, treating as a miss");
                Vec::new()
            }
        }
    }
}

/// Canonical order: newest first, id as the tiebreak so equal timestamps
/// still sort deterministically.
pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.0.cmp(&b.id.0))
    });
}

/// "HH:MM" in UTC. The raw millisecond timestamp travels alongside this in
/// the view model so shells can render local time instead.
#[must_use]
pub fn format_clock_time(at: UnixTimeMs) -> String {
    let minutes_of_day = (at.as_millis() / 60_000) % (24 * 60);
    format!("{:02}:{:02}", minutes_of_day / 60, minutes_of_day % 60)
}

/// Entry parameters for the chat screen, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    pub color: String,
}

impl Session {
    #[must_use]
    pub fn from_entry(name: String, color: Option<String>, user_id: Option<String>) -> Self {
        let display_name = {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                DEFAULT_DISPLAY_NAME.to_string()
            } else {
                trimmed.to_string()
            }
        };

        let color = color
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BACKGROUND_COLOR.to_string());

        let user_id = UserId::new(
            user_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AUTHOR_ID.to_string()),
        );

        Self {
            user_id,
            display_name,
            color,
        }
    }

    #[must_use]
    pub fn author(&self) -> Author {
        Author {
            id: self.user_id.clone(),
            name: self.display_name.clone(),
            color: Some(self.color.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No subscription and no cached list published.
    #[default]
    Unsubscribed,
    /// A live subscription is active; the published list tracks snapshots.
    Subscribed,
    /// Offline; the published list came from the local store.
    Cached,
}

impl SyncState {
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

#[derive(Debug)]
pub struct Model {
    pub session: Option<Session>,
    pub room: RoomId,
    pub sync_state: SyncState,
    pub network_online: bool,
    pub messages: Vec<Message>,
    pub active_subscription: Option<SubscriptionId>,
    pub active_alert: Option<AppError>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            session: None,
            room: RoomId::default(),
            sync_state: SyncState::Unsubscribed,
            // Assume reachability until the shell reports otherwise.
            network_online: true,
            messages: Vec::new(),
            active_subscription: None,
            active_alert: None,
        }
    }
}

impl Model {
    /// Replaces the published list wholesale. Last write wins; there is no
    /// merging of deltas.
    pub fn publish(&mut self, mut messages: Vec<Message>) {
        sort_newest_first(&mut messages);
        self.messages = messages;
    }

    pub fn set_alert(&mut self, error: AppError) {
        tracing::warn!(code = error.code(), message = %error.message, "raising alert");
        self.active_alert = Some(error);
    }

    pub fn clear_alert(&mut self) {
        self.active_alert = None;
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    Noop,

    /// The user entered the chat screen with their start-screen choices.
    /// `room` defaults to the shared room collection when absent.
    ChatOpened {
        name: String,
        color: Option<String>,
        user_id: Option<String>,
        room: Option<String>,
    },
    ChatClosed,

    /// Pushed by the shell's reachability observer on every flip.
    NetworkStatusChanged {
        online: bool,
    },

    SendTextRequested {
        text: String,
    },
    SendImageRequested {
        data: Vec<u8>,
        mime_type: String,
        file_name: String,
    },
    SendLocationRequested {
        latitude: f64,
        longitude: f64,
    },

    SnapshotReceived {
        subscription: SubscriptionId,
        result: Box<FeedResult>,
    },
    AppendCompleted {
        result: Box<FeedResult>,
    },
    ImageUploaded {
        result: Box<MediaResult>,
    },
    CacheLoaded {
        result: Box<CacheResult>,
    },
    CacheWritten {
        result: Box<CacheResult>,
    },

    AlertDismissed,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::ChatOpened { .. } => "chat_opened",
            Self::ChatClosed => "chat_closed",
            Self::NetworkStatusChanged { .. } => "network_status_changed",
            Self::SendTextRequested { .. } => "send_text_requested",
            Self::SendImageRequested { .. } => "send_image_requested",
            Self::SendLocationRequested { .. } => "send_location_requested",
            Self::SnapshotReceived { .. } => "snapshot_received",
            Self::AppendCompleted { .. } => "append_completed",
            Self::ImageUploaded { .. } => "image_uploaded",
            Self::CacheLoaded { .. } => "cache_loaded",
            Self::CacheWritten { .. } => "cache_written",
            Self::AlertDismissed => "alert_dismissed",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::ChatOpened { .. }
                | Self::ChatClosed
                | Self::SendTextRequested { .. }
                | Self::SendImageRequested { .. }
                | Self::SendLocationRequested { .. }
                | Self::AlertDismissed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    pub id: String,
    pub text: String,
    pub author_name: String,
    pub author_color: Option<String>,
    pub is_mine: bool,
    /// "HH:MM" in UTC; `sent_at_ms` carries the raw timestamp for shells
    /// that render local time.
    pub clock_time: String,
    pub sent_at_ms: u64,
    pub image_url: Option<String>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertView {
    pub message: String,
    pub code: String,
    pub is_transient: bool,
}

impl From<&AppError> for AlertView {
    fn from(error: &AppError) -> Self {
        Self {
            message: error.user_facing_message(),
            code: error.code().to_string(),
            is_transient: matches!(error.severity, ErrorSeverity::Transient),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ViewModel {
    /// Newest first.
    pub messages: Vec<MessageView>,
    pub online: bool,
    /// The composer is hidden while offline; reads still work from cache.
    pub composer_enabled: bool,
    pub display_name: String,
    pub background_color: String,
    pub alert: Option<AlertView>,
}

pub mod app {
    use super::*;
    use crate::capabilities::Capabilities;

    #[derive(Default)]
    pub struct App;

    impl App {
        /// Detach whatever subscription is active, then either open a fresh
        /// one (online) or fall back to the cached snapshot (offline).
        fn sync_messages(model: &mut Model, caps: &Capabilities) {
            if let Some(subscription) = model.active_subscription.take() {
                caps.feed.detach(subscription);
            }

            if model.network_online {
                let subscription = SubscriptionId::generate();
                model.active_subscription = Some(subscription.clone());
                model.sync_state = SyncState::Subscribed;

                caps.feed
                    .subscribe(model.room.clone(), subscription.clone(), move |result| {
                        Event::SnapshotReceived {
                            subscription: subscription.clone(),
                            result: Box::new(result),
                        }
                    });
            } else {
                model.sync_state = SyncState::Cached;

                match CacheKey::for_room(&model.room) {
                    Ok(key) => caps.cache.read(key, |result| Event::CacheLoaded {
                        result: Box::new(result),
                    }),
                    Err(e) => {
                        tracing::error!(error = %e, room = %model.room, "cannot derive cache key");
                        model.messages.clear();
                    }
                }
            }
        }

        /// Best effort. A failed write is logged and otherwise invisible;
        /// the live list is already on screen.
        fn persist_snapshot(model: &Model, caps: &Capabilities) {
            let key = match CacheKey::for_room(&model.room) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(error = %e, room = %model.room, "cannot derive cache key");
                    return;
                }
            };

            let envelope = CachedMessages::new(model.messages.clone());
            let bytes = match serde_json::to_vec(&envelope) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "snapshot serialization failed, skipping cache write");
                    return;
                }
            };

            caps.cache.write(key, bytes, |result| Event::CacheWritten {
                result: Box::new(result),
            });
        }

        fn append_record(model: &Model, caps: &Capabilities, record: OutgoingMessage) {
            caps.feed
                .append(model.room.clone(), record, |result| Event::AppendCompleted {
                    result: Box::new(result),
                });
        }

        /// Sends require a mounted session and reachability. Without a
        /// session the request is ignored outright; offline it raises the
        /// alert and renders.
        fn can_send(model: &mut Model, caps: &Capabilities) -> bool {
            if model.session.is_none() {
                tracing::warn!("send requested without an active session, ignoring");
                return false;
            }
            if !model.network_online {
                model.set_alert(AppError::new(
                    ErrorKind::Network,
                    "cannot send while offline",
                ));
                caps.render.render();
                return false;
            }
            true
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            let event_name = event.name();
            if event.is_user_initiated() {
                tracing::info!(event = event_name, "user action");
            } else {
                tracing::debug!(event = event_name, "event");
            }

            match event {
                Event::Noop => {}

                Event::ChatOpened {
                    name,
                    color,
                    user_id,
                    room,
                } => {
                    model.session = Some(Session::from_entry(name, color, user_id));
                    model.room = room.map(RoomId::new).unwrap_or_default();
                    model.clear_alert();

                    Self::sync_messages(model, caps);
                    caps.render.render();
                }

                Event::ChatClosed => {
                    if let Some(subscription) = model.active_subscription.take() {
                        caps.feed.detach(subscription);
                    }
                    model.sync_state = SyncState::Unsubscribed;
                    model.session = None;
                    caps.render.render();
                }

                Event::NetworkStatusChanged { online } => {
                    let was_online = model.network_online;
                    model.network_online = online;

                    // React on actual flips only; repeated observations of
                    // the same status must not churn the subscription.
                    if !model.is_mounted() || online == was_online {
                        return;
                    }

                    if online {
                        model.clear_alert();
                    } else {
                        model.set_alert(AppError::new(ErrorKind::Network, "connection lost"));
                    }

                    Self::sync_messages(model, caps);
                    caps.render.render();
                }

                Event::SendTextRequested { text } => {
                    let trimmed = text.trim().to_string();
                    if trimmed.is_empty() {
                        return;
                    }

                    if !Self::can_send(model, caps) {
                        return;
                    }

                    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
                        model.set_alert(
                            AppError::new(ErrorKind::Validation, "Message is too long.")
                                .with_context("chars", trimmed.chars().count().to_string()),
                        );
                        caps.render.render();
                        return;
                    }

                    if let Some(session) = &model.session {
                        let record = OutgoingMessage::text(trimmed, session.author());
                        Self::append_record(model, caps, record);
                    }
                }

                Event::SendLocationRequested {
                    latitude,
                    longitude,
                } => {
                    if !Self::can_send(model, caps) {
                        return;
                    }

                    match GeoPoint::validated(latitude, longitude) {
                        Ok(point) => {
                            if let Some(session) = &model.session {
                                let record =
                                    OutgoingMessage::location(point, session.author());
                                Self::append_record(model, caps, record);
                            }
                        }
                        Err(e) => {
                            model.set_alert(AppError::from(e));
                            caps.render.render();
                        }
                    }
                }

                Event::SendImageRequested {
                    data,
                    mime_type,
                    file_name,
                } => {
                    if !Self::can_send(model, caps) {
                        return;
                    }

                    if data.len() > MAX_UPLOAD_BYTES {
                        model.set_alert(
                            AppError::new(ErrorKind::ImageTooLarge, "image exceeds upload limit")
                                .with_context("bytes", data.len().to_string()),
                        );
                        caps.render.render();
                        return;
                    }

                    if let Some(session) = &model.session {
                        let reference =
                            upload_reference(&session.user_id, UnixTimeMs::now(), &file_name);
                        caps.media
                            .upload(reference, mime_type, data, |result| Event::ImageUploaded {
                                result: Box::new(result),
                            });
                    }
                }

                Event::ImageUploaded { result } => {
                    if !model.is_mounted() {
                        tracing::debug!("upload completed after the session ended, dropping");
                        return;
                    }

                    match *result {
                        Ok(MediaOutput::Uploaded { url }) => {
                            if url::Url::parse(&url).is_err() {
                                model.set_alert(
                                    AppError::new(ErrorKind::Upload, "upload returned an invalid URL")
                                        .with_context("url", url),
                                );
                                caps.render.render();
                                return;
                            }

                            if let Some(session) = &model.session {
                                let record = OutgoingMessage::image(url, session.author());
                                Self::append_record(model, caps, record);
                            }
                        }
                        Err(e) => {
                            model.set_alert(AppError::from(e));
                            caps.render.render();
                        }
                    }
                }

                Event::SnapshotReceived {
                    subscription,
                    result,
                } => {
                    if !model.is_mounted() {
                        tracing::debug!("snapshot arrived after the session ended, dropping");
                        return;
                    }
                    if model.active_subscription.as_ref() != Some(&subscription) {
                        tracing::debug!(
                            subscription = %subscription,
                            "snapshot from a detached subscription, dropping"
                        );
                        return;
                    }

                    match *result {
                        Ok(FeedOutput::Snapshot { messages }) => {
                            model.publish(messages);
                            Self::persist_snapshot(model, caps);
                            caps.render.render();
                        }
                        Ok(other) => {
                            tracing::warn!(?other, "unexpected feed output on a subscription");
                        }
                        Err(e) => {
                            // Terminal for this subscription. Keep the last
                            // good list visible; a reconnect or reopen
                            // starts a fresh subscription.
                            tracing::error!(error = %e, "subscription ended with an error");
                            model.active_subscription = None;
                            model.sync_state = SyncState::Unsubscribed;
                            model.set_alert(AppError::from(e));
                            caps.render.render();
                        }
                    }
                }

                Event::AppendCompleted { result } => match *result {
                    Ok(FeedOutput::Appended { id, created_at }) => {
                        // No local insert; the sender sees their message via
                        // the next snapshot.
                        tracing::debug!(
                            id = %id,
                            created_at = created_at.as_millis(),
                            "append accepted"
                        );
                    }
                    Ok(other) => {
                        tracing::warn!(?other, "unexpected feed output on append");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "append failed");
                        model.set_alert(AppError::from(e));
                        caps.render.render();
                    }
                },

                Event::CacheLoaded { result } => {
                    if model.sync_state != SyncState::Cached {
                        tracing::debug!("cache read finished after a live subscription took over, dropping");
                        return;
                    }

                    let messages = match *result {
                        Ok(CacheOutput::Read { bytes: Some(bytes) }) => {
                            CachedMessages::decode(&bytes)
                        }
                        Ok(CacheOutput::Read { bytes: None }) => Vec::new(),
                        Ok(CacheOutput::Written) => {
                            tracing::warn!("unexpected cache output on read");
                            Vec::new()
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "cache read failed, publishing empty list");
                            Vec::new()
                        }
                    };

                    model.publish(messages);
                    caps.render.render();
                }

                Event::CacheWritten { result } => {
                    if let Err(e) = *result {
                        tracing::warn!(error = %e, "cache write failed");
                    }
                }

                Event::AlertDismissed => {
                    model.clear_alert();
                    caps.render.render();
                }
            }
        }

        fn view(&self, model: &Model) -> ViewModel {
            let my_id = model.session.as_ref().map(|s| &s.user_id);

            let messages = model
                .messages
                .iter()
                .map(|m| MessageView {
                    id: m.id.as_str().to_string(),
                    text: m.text.clone(),
                    author_name: m.author.name.clone(),
                    author_color: m.author.color.clone(),
                    is_mine: my_id == Some(&m.author.id),
                    clock_time: format_clock_time(m.created_at),
                    sent_at_ms: m.created_at.as_millis(),
                    image_url: m.image.clone(),
                    location: m.location,
                })
                .collect();

            ViewModel {
                messages,
                online: model.network_online,
                composer_enabled: model.network_online && model.is_mounted(),
                display_name: model
                    .session
                    .as_ref()
                    .map_or_else(|| DEFAULT_DISPLAY_NAME.to_string(), |s| s.display_name.clone()),
                background_color: model
                    .session
                    .as_ref()
                    .map_or_else(|| DEFAULT_BACKGROUND_COLOR.to_string(), |s| s.color.clone()),
                alert: model.active_alert.as_ref().map(AlertView::from),
            }
        }
    }
}
