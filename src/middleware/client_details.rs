use axum::{extract::Request, middleware::Next, response::Response};

use crate::client::{header_value, ClientDetails, CLIENT_NAME_HEADER, CLIENT_VERSION_HEADER};

/// Tower-compatible middleware that reads the two client identity headers
///
///   apollographql-client-name     caller name
///   apollographql-client-version  caller version
///
/// and stores them as a [`ClientDetails`] request extension, where
/// [`ExtensionsExtractor`](crate::client::ExtensionsExtractor) picks them up.
/// Missing headers become empty strings.
pub async fn client_details_middleware(mut req: Request, next: Next) -> Response {
    let details = ClientDetails {
        name: header_value(req.headers(), CLIENT_NAME_HEADER),
        version: header_value(req.headers(), CLIENT_VERSION_HEADER),
    };
    req.extensions_mut().insert(details);

    next.run(req).await
}
