use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;

pub type RespBody = BoxBody<Bytes, hyper::Error>;

/// Build an empty-bodied response with the given status
pub fn synthetic_error_response(status_code: StatusCode) -> Response<RespBody> {
    let mut res = Response::new(empty_body());
    *res.status_mut() = status_code;
    res
}

/// Plain-text response, used by the health endpoints
pub fn text_response(status_code: StatusCode, text: &'static str) -> Response<RespBody> {
    let body = Full::new(Bytes::from_static(text.as_bytes()))
        .map_err(|never| match never {})
        .boxed();
    let mut res = Response::new(body);
    *res.status_mut() = status_code;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    res
}

pub fn empty_body() -> RespBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}
