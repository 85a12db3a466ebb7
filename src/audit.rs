//! Audit interceptor.
//!
//! Wraps every API route. The request body is buffered once into immutable `Bytes`;
//! the handler gets a fresh body built from that buffer while the interceptor keeps its
//! own handle for the record. After the handler (or any earlier layer) has produced a
//! response, the response body is buffered the same way, and one `AuditRecord` is
//! written with the status and body that actually go back to the client.

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{
    config::AppConfig,
    error::ApiError,
    models::NewAuditRecord,
    repository::RepositoryState,
};

const REDACTED: &str = "[redacted]";

pub async fn audit_exchange(
    State(repo): State<RepositoryState>,
    State(config): State<AppConfig>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let headers = headers_to_json(&parts.headers);
    let is_json = is_json_content(&parts.headers);

    let (captured, response) = match to_bytes(body, config.max_body_bytes).await {
        Ok(captured) => {
            let request = Request::from_parts(parts, Body::from(captured.clone()));
            (captured, next.run(request).await)
        }
        Err(e) => {
            tracing::warn!(error = %e, %method, %path, "request body could not be buffered");
            (Bytes::new(), ApiError::PayloadTooLarge.into_response())
        }
    };

    let (res_parts, res_body) = response.into_parts();
    let (res_parts, res_bytes) = match to_bytes(res_body, usize::MAX).await {
        Ok(bytes) => (res_parts, bytes),
        Err(e) => {
            let fallback = ApiError::internal(format!("response body: {e}")).into_response();
            let (parts, body) = fallback.into_parts();
            (parts, to_bytes(body, usize::MAX).await.unwrap_or_default())
        }
    };

    let record = NewAuditRecord {
        method,
        path,
        headers,
        request_body: redact_body(&captured, is_json),
        response_body: String::from_utf8_lossy(&res_bytes).into_owned(),
        status_code: i32::from(res_parts.status.as_u16()),
    };
    persist(repo, record).await;

    Response::from_parts(res_parts, Body::from(res_bytes))
}

/// Writes the record on its own task. Awaiting the handle keeps the normal path
/// synchronous, while a dropped connection cannot cancel the write halfway.
async fn persist(repo: RepositoryState, record: NewAuditRecord) {
    let (method, path, status) = (record.method.clone(), record.path.clone(), record.status_code);
    let write = tokio::spawn(async move { repo.insert_audit_record(record).await });
    match write.await {
        Ok(Ok(())) => tracing::debug!(%method, %path, status, "audit record stored"),
        Ok(Err(e)) => tracing::error!(error = %e, %method, %path, status, "failed to store audit record"),
        Err(e) => tracing::error!(error = %e, %method, %path, status, "audit task failed"),
    }
}

/// Serializes headers as `{ name: [values...] }`, masking credential values.
pub fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let value = if is_credential_header(name) {
            mask_credential(value.as_bytes())
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        map.entry(name.as_str().to_string()).or_default().push(value);
    }
    serde_json::to_value(map).unwrap_or(Value::Null)
}

/// Headers whose values are credentials and are not written to the audit table.
fn is_credential_header(name: &HeaderName) -> bool {
    *name == header::AUTHORIZATION || *name == header::COOKIE || *name == header::SET_COOKIE
}

/// Keeps the auth scheme so the record still shows how the caller authenticated.
fn mask_credential(raw: &[u8]) -> String {
    match String::from_utf8_lossy(raw).split_once(' ') {
        Some((scheme, _)) => format!("{scheme} {REDACTED}"),
        None => REDACTED.to_string(),
    }
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Returns the body as captured, except that `password` fields of a JSON body are masked.
pub fn redact_body(body: &Bytes, is_json: bool) -> Vec<u8> {
    if !is_json {
        return body.to_vec();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            mask_passwords(&mut value);
            serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec())
        }
        Err(_) => body.to_vec(),
    }
}

fn mask_passwords(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if key.eq_ignore_ascii_case("password") {
                    *field = Value::String(REDACTED.to_string());
                } else {
                    mask_passwords(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_passwords),
        _ => {}
    }
}
