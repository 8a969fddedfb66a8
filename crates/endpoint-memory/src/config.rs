use std::collections::HashMap;

use rxp_name::ResourceName;
use serde::{Deserialize, Serialize};

/// What a change event does to a subscription whose credentials are
/// checked again at delivery time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialRecheck {
    /// Drop the subscription with `FORBIDDEN` once it can no longer read its
    /// pattern. The event is not delivered to it.
    #[default]
    EvictOnDenied,
    /// Drop the subscription on a created event when it *can* read its
    /// pattern, still delivering the event. Kept for deployments relying on
    /// the older behaviour.
    EvictOnGranted,
}

/// Settings for [`MemoryEndpoint`](crate::MemoryEndpoint).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MemoryEndpointConfig {
    /// Behaviour of the change feed when re-checking credentials.
    pub credential_recheck: CredentialRecheck,

    /// Mime types by lowercase file extension, used when a write carries an
    /// empty mime type.
    pub mime_types: HashMap<String, String>,
}

impl Default for MemoryEndpointConfig {
    fn default() -> Self {
        let mime_types = [
            ("txt", "text/plain"),
            ("html", "text/html"),
            ("htm", "text/html"),
            ("json", "application/json"),
            ("css", "text/css"),
            ("js", "application/javascript"),
            ("png", "image/png"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
        ]
        .into_iter()
        .map(|(extension, mime)| (extension.to_owned(), mime.to_owned()))
        .collect();

        Self {
            credential_recheck: CredentialRecheck::default(),
            mime_types,
        }
    }
}

impl MemoryEndpointConfig {
    /// Mime type for the extension of `resource`'s last level, if known.
    #[must_use]
    pub fn mime_type_for(&self, resource: &ResourceName) -> Option<&str> {
        let (_, extension) = resource.last_level().rsplit_once('.')?;
        self.mime_types
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }
}
