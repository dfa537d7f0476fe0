//! Responses the router generates itself

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{Response, StatusCode};

fn text_response(status: StatusCode, body: String) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("X-Content-Type-Options", "nosniff")
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .unwrap()
}

/// 404 for hosts with no route
pub fn not_found_response() -> Response<BoxBody<Bytes, hyper::Error>> {
    text_response(StatusCode::NOT_FOUND, "Host not found\n".to_string())
}

/// Create an HTTP 502 Bad Gateway error response
pub fn bad_gateway_response(message: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    text_response(
        StatusCode::BAD_GATEWAY,
        format!("Bad gateway: {}\n", message),
    )
}
