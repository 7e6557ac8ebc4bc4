//! Body types shared by the gateway, the forwarder and the response relay.

use crate::error::ProxyError;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};

/// Body type of every response the gateway produces.
///
/// Buffered responses (`Full`, `Empty`) and streamed upstream bodies are both
/// boxed into this one type.
pub type UnifiedBody = http_body_util::combinators::BoxBody<Bytes, ProxyError>;

/// Body type handed to the upstream client.
pub type ClientBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// A buffered body from anything convertible to `Bytes`.
pub fn full_body(data: impl Into<Bytes>) -> UnifiedBody {
    // Full<Bytes> has Infallible error - convert using absurd pattern
    Full::new(data.into()).map_err(|e| match e {}).boxed()
}

/// A body with no content.
pub fn empty_body() -> UnifiedBody {
    Empty::<Bytes>::new().map_err(|e| match e {}).boxed()
}

/// Box an arbitrary inbound body for the upstream client.
pub fn client_body<B>(body: B) -> ClientBody
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    body.map_err(Into::into).boxed()
}
