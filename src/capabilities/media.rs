use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{UnixTimeMs, UserId};

/// Largest image payload accepted for upload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const FALLBACK_FILE_NAME: &str = "upload";

/// Storage reference for an uploaded blob: `{user_id}-{timestamp}-{file_name}`.
/// Only the final path segment of `file_name` is used.
#[must_use]
pub fn upload_reference(user_id: &UserId, now: UnixTimeMs, file_name: &str) -> String {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(FALLBACK_FILE_NAME);

    format!("{}-{}-{name}", user_id.as_str(), now.as_millis())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", content = "data")]
pub enum MediaOperation {
    Upload {
        reference: String,
        mime_type: String,
        data: Vec<u8>,
    },
}

impl Operation for MediaOperation {
    type Output = MediaResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum MediaOutput {
    /// Publicly resolvable download URL for the stored blob.
    Uploaded { url: String },
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied by blob storage")]
    PermissionDenied,

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("network failure during upload: {message}")]
    Network { message: String },

    #[error("upload failed: {message}")]
    Failed { message: String },
}

impl MediaError {
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

pub type MediaResult = Result<MediaOutput, MediaError>;

#[derive(Clone)]
pub struct Media<Ev> {
    context: CapabilityContext<MediaOperation, Ev>,
}

impl<Ev> Capability<Ev> for Media<Ev> {
    type Operation = MediaOperation;
    type MappedSelf<MappedEv> = Media<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Media::new(self.context.map_event(f))
    }
}

impl<Ev> Media<Ev>
where
    Ev: Send + 'static,
{
    pub fn new(context: CapabilityContext<MediaOperation, Ev>) -> Self {
        Self { context }
    }

    /// Oversized payloads are rejected locally; the shell never sees them.
    pub fn upload<F>(&self, reference: String, mime_type: String, data: Vec<u8>, make_event: F)
    where
        F: FnOnce(MediaResult) -> Ev + Send + 'static,
    {
        if data.len() > MAX_UPLOAD_BYTES {
            self.context.update_app(make_event(Err(MediaError::TooLarge {
                size: data.len(),
                max: MAX_UPLOAD_BYTES,
            })));
            return;
        }

        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx
                .request_from_shell(MediaOperation::Upload {
                    reference,
                    mime_type,
                    data,
                })
                .await;
            ctx.update_app(make_event(result));
        });
    }
}
