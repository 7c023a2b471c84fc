use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as AxumPath, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::error_handling::HandleErrorLayer;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::index::MetasQuery;
use crate::store::CatalogStore;

/// Requests that haven't produced a response within this window are failed
/// with a 408-equivalent error, so a stuck read never pins a connection open
/// indefinitely.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Build the catalog HTTP API router, rooted at `/catalogs/:name/api/v1/`.
/// Any other path returns 404 via axum's default unmatched-route behavior.
/// Every request is logged through a `tower-http` trace layer and bounded by
/// a request timeout rather than hand-rolled middleware.
pub fn router(store: Arc<CatalogStore>) -> Router {
    Router::new()
        .route(
            "/catalogs/:name/api/v1/all",
            get(get_all).head(get_all),
        )
        .route(
            "/catalogs/:name/api/v1/metas",
            get(get_metas).head(get_metas),
        )
        .with_state(store)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(|_: tower::BoxError| async {
                    StatusCode::REQUEST_TIMEOUT
                }))
                .timeout(REQUEST_TIMEOUT),
        )
}

const CONTENT_TYPE_JSONL: &str = "application/jsonl";

async fn get_all(
    method: Method,
    AxumPath(name): AxumPath<String>,
    headers: HeaderMap,
    State(store): State<Arc<CatalogStore>>,
) -> Response {
    let Some(entry_lock) = store.snapshot(&name).await else {
        return not_found();
    };
    let entry = entry_lock.read().await;

    if let Some(resp) = not_modified(&headers, entry.last_modified) {
        return resp;
    }

    let last_modified = entry.last_modified;
    if method == Method::HEAD {
        return with_cache_headers(Response::builder(), last_modified)
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, CONTENT_TYPE_JSONL)
            .body(Body::empty())
            .expect("valid response");
    }

    let Ok(file) = tokio::fs::File::open(&entry.data_path).await else {
        return internal_error();
    };
    let stream = tokio_util::io::ReaderStream::new(file);
    with_cache_headers(Response::builder(), last_modified)
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE_JSONL)
        .body(Body::from_stream(stream))
        .expect("valid response")
}

async fn get_metas(
    method: Method,
    AxumPath(name): AxumPath<String>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    State(store): State<Arc<CatalogStore>>,
) -> Response {
    let query = match parse_metas_query(raw_query.as_deref()) {
        Ok(q) => q,
        Err(msg) => return bad_request(&msg),
    };

    let Some(entry_lock) = store.snapshot(&name).await else {
        return not_found();
    };
    let entry = entry_lock.read().await;

    if let Some(resp) = not_modified(&headers, entry.last_modified) {
        return resp;
    }

    let last_modified = entry.last_modified;
    if method == Method::HEAD {
        return with_cache_headers(Response::builder(), last_modified)
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, CONTENT_TYPE_JSONL)
            .body(Body::empty())
            .expect("valid response");
    }

    let ranges: Vec<(u64, u64)> = entry
        .index
        .matching(&query)
        .into_iter()
        .map(|e| (e.offset, e.length))
        .collect();
    let data_path = entry.data_path.clone();
    drop(entry);

    let body = match read_ranges(&data_path, &ranges).await {
        Ok(bytes) => bytes,
        Err(_) => return internal_error(),
    };

    with_cache_headers(Response::builder(), last_modified)
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE_JSONL)
        .body(Body::from(body))
        .expect("valid response")
}

/// Only `schema`, `package`, and `name` are permitted query keys; duplicate
/// values for the same key are allowed (OR'd together).
fn parse_metas_query(raw: Option<&str>) -> Result<MetasQuery, String> {
    let mut query = MetasQuery::default();
    let Some(raw) = raw else {
        return Ok(query);
    };
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "schema" => query.schema.push(value.into_owned()),
            "package" => query.package.push(value.into_owned()),
            "name" => query.name.push(value.into_owned()),
            other => return Err(format!("unsupported query parameter {other:?}")),
        }
    }
    Ok(query)
}

async fn read_ranges(path: &std::path::Path, ranges: &[(u64, u64)]) -> std::io::Result<Vec<u8>> {
    use tokio::io::{AsyncSeekExt, SeekFrom};

    let mut file = tokio::fs::File::open(path).await?;
    let mut out = Vec::new();
    for &(offset, length) in ranges {
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        out.extend_from_slice(&buf);
    }
    Ok(out)
}

fn with_cache_headers(builder: axum::http::response::Builder, last_modified: DateTime<Utc>) -> axum::http::response::Builder {
    builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(last_modified.into()))
}

fn not_modified(headers: &HeaderMap, last_modified: DateTime<Utc>) -> Option<Response> {
    let since = headers.get(header::IF_MODIFIED_SINCE)?.to_str().ok()?;
    let since = httpdate::parse_http_date(since).ok()?;
    let since: DateTime<Utc> = since.into();
    if last_modified <= since {
        Some(
            with_cache_headers(Response::builder(), last_modified)
                .status(StatusCode::NOT_MODIFIED)
                .body(Body::empty())
                .expect("valid response"),
        )
    } else {
        None
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "catalog not found").into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_query_key() {
        assert!(parse_metas_query(Some("schema=olm.bundle&bogus=1")).is_err());
    }

    #[test]
    fn accepts_duplicate_values_for_same_key() {
        let q = parse_metas_query(Some("schema=olm.bundle&schema=olm.package")).unwrap();
        assert_eq!(q.schema, vec!["olm.bundle", "olm.package"]);
    }

    #[test]
    fn no_query_is_empty() {
        let q = parse_metas_query(None).unwrap();
        assert!(q.is_empty());
    }
}
