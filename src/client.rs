//! Caller identity.
//!
//! Every sample carries the `(name, version)` of the client that issued the
//! request. How that pair is found depends on the host framework, so it is
//! supplied through the [`ClientExtractor`] capability.

use axum::http::{Extensions, HeaderMap};

pub const CLIENT_NAME_HEADER: &str = "apollographql-client-name";
pub const CLIENT_VERSION_HEADER: &str = "apollographql-client-version";

/// Identity of the calling client. Empty strings when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClientDetails {
    pub name: String,
    pub version: String,
}

impl ClientDetails {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Maps a request-scoped context to a [`ClientDetails`].
pub trait ClientExtractor<Ctx: ?Sized>: Send + Sync {
    fn extract(&self, ctx: &Ctx) -> ClientDetails;
}

impl<Ctx, F> ClientExtractor<Ctx> for F
where
    Ctx: ?Sized,
    F: Fn(&Ctx) -> ClientDetails + Send + Sync,
{
    fn extract(&self, ctx: &Ctx) -> ClientDetails {
        self(ctx)
    }
}

/// Extractor that always answers with empty details.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousExtractor;

impl<Ctx: ?Sized> ClientExtractor<Ctx> for AnonymousExtractor {
    fn extract(&self, _ctx: &Ctx) -> ClientDetails {
        ClientDetails::default()
    }
}

/// Reads client details straight from request headers.
#[derive(Debug, Clone)]
pub struct HeaderExtractor {
    name_header: String,
    version_header: String,
}

impl Default for HeaderExtractor {
    fn default() -> Self {
        Self::new(CLIENT_NAME_HEADER, CLIENT_VERSION_HEADER)
    }
}

impl HeaderExtractor {
    pub fn new(name_header: impl Into<String>, version_header: impl Into<String>) -> Self {
        Self {
            name_header: name_header.into(),
            version_header: version_header.into(),
        }
    }
}

impl ClientExtractor<HeaderMap> for HeaderExtractor {
    fn extract(&self, headers: &HeaderMap) -> ClientDetails {
        ClientDetails {
            name: header_value(headers, &self.name_header),
            version: header_value(headers, &self.version_header),
        }
    }
}

/// Reads the [`ClientDetails`] stored by
/// [`client_details_middleware`](crate::middleware::client_details_middleware).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionsExtractor;

impl ClientExtractor<Extensions> for ExtensionsExtractor {
    fn extract(&self, extensions: &Extensions) -> ClientDetails {
        extensions.get::<ClientDetails>().cloned().unwrap_or_default()
    }
}

pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}
