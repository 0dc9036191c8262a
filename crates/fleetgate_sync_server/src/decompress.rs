//! Request body decompression for the sync routes.

use crate::error::ServerError;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use fleetgate_protocol::{FrameDecoder, Framing};

/// Settings for [`decompress_body`].
#[derive(Debug, Clone, Copy)]
pub struct BodyDecoding {
    /// The decoder applied to every body.
    pub decoder: FrameDecoder,
    /// Largest wire body read into memory.
    pub max_body_bytes: usize,
}

/// Replaces the request body with its decoded payload.
///
/// `Content-Encoding` is removed once the body has been decoded, so
/// handlers always see plain bytes. A declared encoding that cannot be
/// reversed is answered with 400 before the handler runs.
pub async fn decompress_body(
    State(settings): State<BodyDecoding>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let raw = match to_bytes(body, settings.max_body_bytes).await {
        Ok(raw) => raw,
        Err(e) => {
            return ServerError::InvalidRequest(format!("unreadable body: {e}")).into_response()
        }
    };

    let encoding = parts
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let wire_len = raw.len();
    let decoded = match settings.decoder.decode(raw, encoding, content_type) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(path = %parts.uri.path(), encoding, error = %e, "undecodable body");
            return ServerError::Decode(e).into_response();
        }
    };
    tracing::trace!(
        path = %parts.uri.path(),
        framing = ?decoded.framing,
        compressed = decoded.was_compressed(),
        wire_len,
        decoded_len = decoded.body.len(),
        "decoded body"
    );

    if decoded.framing != Framing::Unsupported {
        parts.headers.remove(CONTENT_ENCODING);
    }
    parts.headers.insert(CONTENT_LENGTH, decoded.body.len().into());
    next.run(Request::from_parts(parts, Body::from(decoded.body))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Request as HttpRequest, StatusCode};
    use axum::routing::post;
    use axum::{middleware, Router};
    use fleetgate_testkit::bodies;
    use tower::ServiceExt;

    async fn echo(headers: HeaderMap, body: axum::body::Bytes) -> (StatusCode, Vec<u8>) {
        assert!(!headers.contains_key(CONTENT_ENCODING));
        (StatusCode::OK, body.to_vec())
    }

    fn app() -> Router {
        let settings = BodyDecoding {
            decoder: FrameDecoder::new(),
            max_body_bytes: 1024 * 1024,
        };
        Router::new()
            .route("/echo", post(echo))
            .layer(middleware::from_fn_with_state(settings, decompress_body))
    }

    async fn send(body: Vec<u8>, encoding: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut request = HttpRequest::post("/echo").header(CONTENT_TYPE, "application/json");
        if let Some(encoding) = encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        let response = app()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn handlers_see_plain_bodies() {
        let json = br#"{"serial_num":"X1"}"#.to_vec();
        for (body, encoding) in [
            (json.clone(), None),
            (bodies::gzip(&json), None),
            (bodies::gzip(&json), Some("gzip")),
            (bodies::zlib(&json), Some("deflate")),
            (bodies::raw_deflate(&json), None),
        ] {
            let (status, echoed) = send(body, encoding).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(echoed, json);
        }
    }

    #[tokio::test]
    async fn declared_garbage_is_rejected() {
        let (status, body) = send(b"definitely not gzip".to_vec(), Some("gzip")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(error["error"].is_string());
    }
}
