//! HTTP utility functions

use hyper::header::{HeaderValue, ALLOW, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Body, Method, Response, StatusCode};

/// Build a plain-text response that caches must not keep.
///
/// `HEAD` requests get the same status and headers with an empty body.
pub fn text_response(method: &Method, status: StatusCode, body: impl Into<String>) -> Response<Body> {
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(body.into())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// 405 response advertising the methods the health endpoint answers.
pub fn method_not_allowed(method: &Method) -> Response<Body> {
    let mut response = text_response(method, StatusCode::METHOD_NOT_ALLOWED, "METHOD NOT ALLOWED\n");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
    response
}

/// Read a whole response body as UTF-8 text.
pub async fn body_to_string(body: Body) -> hyper::Result<String> {
    let bytes = hyper::body::to_bytes(body).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_response() {
        let response = text_response(&Method::GET, StatusCode::GONE, "ERROR\n");
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        assert_eq!(body_to_string(response.into_body()).await.unwrap(), "ERROR\n");
    }

    #[tokio::test]
    async fn test_head_has_empty_body() {
        let response = text_response(&Method::HEAD, StatusCode::OK, "OK\n");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_to_string(response.into_body()).await.unwrap(), "");
    }

    #[test]
    fn test_method_not_allowed() {
        let response = method_not_allowed(&Method::POST);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET, HEAD");
    }
}
