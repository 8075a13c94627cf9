mod cache;
mod feed;
mod media;

pub use self::cache::{
    Cache, CacheError, CacheKey, CacheOperation, CacheOutput, CacheResult, MAX_VALUE_SIZE,
};
pub use self::feed::{Feed, FeedError, FeedOperation, FeedOutput, FeedResult, SubscriptionId};
pub use self::media::{
    upload_reference, Media, MediaError, MediaOperation, MediaOutput, MediaResult,
    MAX_UPLOAD_BYTES,
};

// Crux's built-in Render capability is used directly; it provides all
// necessary functionality for triggering view updates.
pub use crux_core::render::Render;

use crate::app::App;
use crate::Event;

pub type AppFeed = Feed<Event>;
pub type AppCache = Cache<Event>;
pub type AppMedia = Media<Event>;
pub type AppRender = Render<Event>;

// The Effect derive needs the event parameter spelled out on each field;
// the `App*` aliases above are for external use only.
#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub feed: Feed<Event>,
    pub cache: Cache<Event>,
    pub media: Media<Event>,
    pub render: Render<Event>,
}
