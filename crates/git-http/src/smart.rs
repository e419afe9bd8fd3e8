//! Smart-HTTP endpoints: ref advertisement and the stateless-RPC exchange.

use std::future::Future;
use std::io::Read;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use metrics::{counter, histogram};
use tokio::sync::OwnedSemaphorePermit;

use crate::errors::GitHttpError;
use crate::pkt::build_advertisement;
use crate::process::{ProcessOutput, ServiceProcessRunner, require_success};
use crate::repo::RepositoryProvider;
use crate::service::Service;
use crate::state::GitHttpState;

const GIT_PROTOCOL_HEADER: &str = "git-protocol";

/// `GET /{name}.git/info/refs?service=...`
pub async fn advertise_refs<S: GitHttpState>(
    state: &S,
    name: &str,
    service: Service,
    headers: &HeaderMap,
) -> Result<Response, GitHttpError> {
    let start = Instant::now();
    let repo_dir = state.storage().ensure_repository(name).await?;

    let _permit = acquire_permit(state).await?;
    let output = bounded(
        state,
        service,
        state
            .runner()
            .advertise(service, &repo_dir, git_protocol(headers)),
    )
    .await?;
    let output = require_success(service, output)?;

    let body = build_advertisement(service, &output.stdout)
        .map_err(|err| GitHttpError::Internal(err.into()))?;
    counter!("git_http.info_refs", "service" => service.as_str()).increment(1);
    histogram!("git_http.info_refs_ms", "service" => service.as_str())
        .record(start.elapsed().as_millis() as f64);
    Ok(smart_response(service.advertisement_content_type(), body))
}

/// `POST /{name}.git/{service}`
pub async fn execute_service<S: GitHttpState>(
    state: &S,
    name: &str,
    service: Service,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, GitHttpError> {
    let start = Instant::now();
    let repo_dir = state.storage().ensure_repository(name).await?;

    let max = state.git_max_body();
    let raw = read_body(body, max).await?;
    let request = match content_encoding(headers)? {
        ContentEncoding::Identity => raw,
        ContentEncoding::Gzip => inflate(raw, max).await?,
    };
    tracing::debug!(%service, bytes = request.len(), "request body received");

    let _permit = acquire_permit(state).await?;
    let output = bounded(
        state,
        service,
        state
            .runner()
            .execute(service, &repo_dir, request, git_protocol(headers)),
    )
    .await?;
    let output = require_success(service, output)?;

    counter!("git_http.service", "service" => service.as_str()).increment(1);
    histogram!("git_http.service_ms", "service" => service.as_str())
        .record(start.elapsed().as_millis() as f64);
    Ok(smart_response(service.result_content_type(), output.stdout))
}

fn smart_response(content_type: &'static str, body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

fn git_protocol(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(GIT_PROTOCOL_HEADER)
        .and_then(|value| value.to_str().ok())
}

async fn acquire_permit<S: GitHttpState>(state: &S) -> Result<OwnedSemaphorePermit, GitHttpError> {
    state
        .git_semaphore()
        .clone()
        .acquire_owned()
        .await
        .map_err(|err| GitHttpError::Internal(anyhow::anyhow!(err)))
}

/// Applies the configured timeout. Dropping the future on expiry drops the
/// child, which kills it.
async fn bounded<S, F>(state: &S, service: Service, fut: F) -> Result<ProcessOutput, GitHttpError>
where
    S: GitHttpState,
    F: Future<Output = anyhow::Result<ProcessOutput>>,
{
    match tokio::time::timeout(state.git_timeout(), fut).await {
        Ok(result) => result.map_err(GitHttpError::Internal),
        Err(_) => {
            counter!("git_http.timeouts", "service" => service.as_str()).increment(1);
            Err(GitHttpError::Timeout(service))
        }
    }
}

/// Reads the whole body, whether sent chunked or with a content length.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, GitHttpError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| {
            GitHttpError::BadRequest(format!("failed to read request body: {err}"))
        })?;
        if buf.len() + chunk.len() > limit {
            return Err(GitHttpError::PayloadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

#[derive(Debug, PartialEq, Eq)]
enum ContentEncoding {
    Identity,
    Gzip,
}

fn content_encoding(headers: &HeaderMap) -> Result<ContentEncoding, GitHttpError> {
    let Some(value) = headers.get(header::CONTENT_ENCODING) else {
        return Ok(ContentEncoding::Identity);
    };
    let value = value
        .to_str()
        .map_err(|_| GitHttpError::BadRequest("invalid content-encoding header".into()))?;
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "identity" => Ok(ContentEncoding::Identity),
        "gzip" | "x-gzip" => Ok(ContentEncoding::Gzip),
        other => Err(GitHttpError::BadRequest(format!(
            "unsupported content-encoding `{other}`"
        ))),
    }
}

async fn inflate(compressed: Bytes, limit: usize) -> Result<Bytes, GitHttpError> {
    tokio::task::spawn_blocking(move || {
        let mut out = Vec::with_capacity(compressed.len().saturating_mul(4).min(limit));
        flate2::read::GzDecoder::new(compressed.as_ref())
            .take(limit as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|err| GitHttpError::BadRequest(format!("invalid gzip body: {err}")))?;
        if out.len() > limit {
            return Err(GitHttpError::PayloadTooLarge(limit));
        }
        Ok(Bytes::from(out))
    })
    .await
    .map_err(|err| GitHttpError::Internal(anyhow::anyhow!(err)))?
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use axum::http::HeaderValue;

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn detects_content_encoding() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_encoding(&headers).unwrap(), ContentEncoding::Identity);

        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        assert_eq!(content_encoding(&headers).unwrap(), ContentEncoding::Gzip);

        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
        assert!(matches!(
            content_encoding(&headers),
            Err(GitHttpError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn inflates_gzip_bodies() {
        let payload = b"0032want 0123456789abcdef0123456789abcdef01234567\n00000009done\n";
        let inflated = inflate(Bytes::from(gzip(payload)), 1024).await.unwrap();
        assert_eq!(inflated.as_ref(), payload);
    }

    #[tokio::test]
    async fn inflated_size_is_capped() {
        let payload = vec![b'a'; 4096];
        let err = inflate(Bytes::from(gzip(&payload)), 1024).await.unwrap_err();
        assert!(matches!(err, GitHttpError::PayloadTooLarge(1024)));
    }

    #[tokio::test]
    async fn corrupt_gzip_is_rejected() {
        let err = inflate(Bytes::from_static(b"not gzip"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, GitHttpError::BadRequest(_)));
    }

    #[tokio::test]
    async fn body_limit_is_enforced() {
        let body = Body::from(vec![0u8; 16]);
        assert!(matches!(
            read_body(body, 8).await,
            Err(GitHttpError::PayloadTooLarge(8))
        ));

        let body = Body::from(vec![7u8; 8]);
        assert_eq!(read_body(body, 8).await.unwrap().len(), 8);
    }
}
