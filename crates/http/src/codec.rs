//! Request decoding, response encoding and error encoding
//!
//! Codecs are plain functions supplied through server options. Decoders
//! produce a [`serde_json::Value`] that is then deserialized into the
//! caller's type; encoders receive the serialized value. This keeps the
//! function types object-safe while callers stay fully typed.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use ferrule_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::info::RequestHead;
use crate::{Request, Response};

/// Largest request body the server will buffer for decoding
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Decode a buffered request body into a JSON value
pub type DecodeRequestFn = Arc<dyn Fn(&RequestHead, Bytes) -> Result<Value> + Send + Sync>;

/// Encode a reply value into a response
pub type EncodeResponseFn = Arc<dyn Fn(&RequestHead, Value) -> Result<Response> + Send + Sync>;

/// Encode an error into a response
pub type EncodeErrorFn = Arc<dyn Fn(&RequestHead, Error) -> Response + Send + Sync>;

/// The decoder/encoder triple a server was configured with
#[derive(Clone)]
pub struct Codec {
    pub(crate) decoder: DecodeRequestFn,
    pub(crate) encoder: EncodeResponseFn,
    pub(crate) error_encoder: EncodeErrorFn,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            decoder: Arc::new(default_request_decoder),
            encoder: Arc::new(default_response_encoder),
            error_encoder: Arc::new(default_error_encoder),
        }
    }
}

impl Codec {
    /// Buffer the body of `req` and decode it into `T`
    pub async fn decode<T: DeserializeOwned>(&self, req: Request) -> Result<T> {
        let (head, body) = read_request(req).await?;
        self.decode_bytes(&head, body)
    }

    /// Decode an already buffered body into `T`
    pub fn decode_bytes<T: DeserializeOwned>(&self, head: &RequestHead, body: Bytes) -> Result<T> {
        let value = (self.decoder)(head, body)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Encode `value`, falling back to the error encoder if anything fails
    pub fn encode<T: Serialize + ?Sized>(&self, head: &RequestHead, value: &T) -> Response {
        let encoded = serde_json::to_value(value)
            .map_err(|err| Error::Encode {
                reason: err.to_string(),
            })
            .and_then(|value| (self.encoder)(head, value));
        match encoded {
            Ok(response) => response,
            Err(err) => self.error(head, err),
        }
    }

    pub fn error(&self, head: &RequestHead, err: Error) -> Response {
        (self.error_encoder)(head, err)
    }
}

/// Split `req` into its head and fully buffered body
pub async fn read_request(req: Request) -> Result<(RequestHead, Bytes)> {
    let (parts, body) = req.into_parts();
    let head = RequestHead::from_parts(&parts);
    Ok((head, read_body(body).await?))
}

/// Buffer a request body, up to [`MAX_BODY_BYTES`]
pub async fn read_body(body: Body) -> Result<Bytes> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| Error::bad_request(format!("failed to read request body: {err}")))
}

/// Decode JSON or form bodies; an empty body decodes the query string
pub fn default_request_decoder(head: &RequestHead, body: Bytes) -> Result<Value> {
    if body.is_empty() {
        return Ok(match head.uri.query() {
            Some(query) if !query.is_empty() => form_to_value(query.as_bytes()),
            _ => Value::Null,
        });
    }

    match content_type(head)?.as_deref() {
        None | Some("application/json") => Ok(serde_json::from_slice(&body)?),
        Some(ct) if ct.ends_with("+json") => Ok(serde_json::from_slice(&body)?),
        Some("application/x-www-form-urlencoded") => Ok(form_to_value(&body)),
        Some(other) => Err(Error::UnsupportedMediaType {
            content_type: other.to_string(),
        }),
    }
}

/// Encode the value as a `200 OK` JSON body
pub fn default_response_encoder(_head: &RequestHead, value: Value) -> Result<Response> {
    Ok(Json(value).into_response())
}

/// Encode the error as JSON with a status code derived from its kind
pub fn default_error_encoder(_head: &RequestHead, err: Error) -> Response {
    let status = status_for(&err);
    let body = json!({
        "code": status.as_u16(),
        "reason": err.reason(),
        "message": err.to_string(),
    });
    (status, Json(body)).into_response()
}

/// HTTP status the default error encoder uses for `err`
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        Error::BadRequest { .. } | Error::Decode { .. } => StatusCode::BAD_REQUEST,
        Error::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        // 499: client closed request
        Error::Canceled => StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn content_type(head: &RequestHead) -> Result<Option<String>> {
    let Some(value) = head.headers.get(header::CONTENT_TYPE) else {
        return Ok(None);
    };
    let raw = value.to_str().map_err(|_| Error::UnsupportedMediaType {
        content_type: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })?;
    let essence = raw.split(';').next().unwrap_or_default().trim();
    Ok(Some(essence.to_ascii_lowercase()))
}

// Repeated keys collect into an array in order of appearance.
fn form_to_value(input: &[u8]) -> Value {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(input) {
        let value = Value::String(value.into_owned());
        match map.get_mut(&*key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Method};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn head(uri: &str, content_type: Option<&'static str>) -> RequestHead {
        let mut builder = axum::http::Request::builder().method(Method::POST).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        RequestHead::from_request(&builder.body(Body::empty()).unwrap())
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Greeting {
        name: String,
    }

    #[test]
    fn test_decodes_json_into_type() {
        let codec = Codec::default();
        let head = head("/greet", Some("application/json; charset=utf-8"));
        let greeting: Greeting = codec
            .decode_bytes(&head, Bytes::from_static(br#"{"name":"ada"}"#))
            .unwrap();
        assert_eq!(greeting, Greeting { name: "ada".into() });
    }

    #[test]
    fn test_decodes_form_and_repeated_keys() {
        let head = head("/greet", Some("application/x-www-form-urlencoded"));
        let value = default_request_decoder(&head, Bytes::from_static(b"name=ada&tag=a&tag=b")).unwrap();
        assert_eq!(value, json!({"name": "ada", "tag": ["a", "b"]}));
    }

    #[test]
    fn test_empty_body_uses_query() {
        let value = default_request_decoder(&head("/greet?name=bob", None), Bytes::new()).unwrap();
        assert_eq!(value, json!({"name": "bob"}));

        let value = default_request_decoder(&head("/greet", None), Bytes::new()).unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_rejects_unknown_media_type() {
        let err = default_request_decoder(&head("/x", Some("text/csv")), Bytes::from_static(b"a,b"))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType { ref content_type } if content_type == "text/csv"));
    }

    #[test]
    fn test_non_utf8_content_type_is_rejected() {
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/x")
            .header(header::CONTENT_TYPE, HeaderValue::from_bytes(b"application/\xffjson").unwrap())
            .body(Body::empty())
            .unwrap();
        let head = RequestHead::from_request(&req);

        let err = default_request_decoder(&head, Bytes::from_static(br#"{"a":1}"#)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType { .. }));
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let err = default_request_decoder(&head("/x", None), Bytes::from_static(b"{oops")).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[tokio::test]
    async fn test_encode_success_skips_error_encoder() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let codec = Codec {
            error_encoder: Arc::new(move |head: &RequestHead, err: Error| {
                seen.fetch_add(1, Ordering::SeqCst);
                default_error_encoder(head, err)
            }),
            ..Codec::default()
        };

        let response = codec.encode(&head("/ping", None), "pong");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!("pong"));
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_encoder_failure_goes_to_error_encoder_once() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let codec = Codec {
            encoder: Arc::new(|_head: &RequestHead, _value: Value| {
                Err(Error::Encode {
                    reason: "no wire format".into(),
                })
            }),
            error_encoder: Arc::new(move |head: &RequestHead, err: Error| {
                seen.fetch_add(1, Ordering::SeqCst);
                default_error_encoder(head, err)
            }),
            ..Codec::default()
        };

        let response = codec.encode(&head("/ping", None), "pong");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "ENCODE_ERROR");
        assert_eq!(body["message"], "Encode error: no wire format");
    }

    #[tokio::test]
    async fn test_default_error_encoder_shape() {
        let response = default_error_encoder(&head("/missing", None), Error::NotFound { path: "/missing".into() });
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({"code": 404, "reason": "NOT_FOUND", "message": "Route not found: /missing"})
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::DeadlineExceeded), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(&Error::Canceled).as_u16(), 499);
        assert_eq!(status_for(&Error::internal("x")), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
