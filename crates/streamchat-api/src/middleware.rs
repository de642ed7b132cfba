use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

pub const REQUEST_ID: &str = "x-request-id";

/// Tags every request and its response with an `x-request-id`.
///
/// A well-formed id supplied by the client is kept; otherwise a fresh
/// uuid v4 is assigned.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID)
        .filter(|v| !v.is_empty() && v.to_str().is_ok())
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
        });
    debug!(request_id = ?request_id, method = %req.method(), path = %req.uri().path(), "Request received");

    req.headers_mut().insert(REQUEST_ID, request_id.clone());
    let mut response = next.run(req).await;
    response.headers_mut().insert(REQUEST_ID, request_id);
    response
}
