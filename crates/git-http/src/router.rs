//! Routes for the gateway. Repository names may contain `/`, so a single
//! catch-all route is matched and the tail of the path picks the endpoint.

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;

use crate::errors::GitHttpError;
use crate::files::read_file;
use crate::service::Service;
use crate::smart::{advertise_refs, execute_service};
use crate::state::GitHttpState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRoute<'a> {
    /// `GET {name}.git/info/refs`
    InfoRefs { name: &'a str },
    /// `POST {name}.git/{service}`
    Rpc { name: &'a str, service: &'a str },
    /// `GET {name}/files`
    Files { name: &'a str },
}

pub fn parse_get_route(path: &str) -> Option<GitRoute<'_>> {
    let path = path.trim_start_matches('/');
    if let Some(name) = path.strip_suffix(".git/info/refs") {
        return non_empty(name).map(|name| GitRoute::InfoRefs { name });
    }
    if let Some(name) = path.strip_suffix("/files") {
        return non_empty(name).map(|name| GitRoute::Files { name });
    }
    None
}

pub fn parse_post_route(path: &str) -> Option<GitRoute<'_>> {
    let path = path.trim_start_matches('/');
    let (repo, service) = path.rsplit_once('/')?;
    let name = repo.strip_suffix(".git")?;
    if service.is_empty() {
        return None;
    }
    non_empty(name).map(|name| GitRoute::Rpc { name, service })
}

/// Query parameters accepted by the GET endpoints; unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct GitQuery {
    pub service: Option<String>,
    pub path: Option<String>,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
}

fn non_empty(name: &str) -> Option<&str> {
    let name = name.trim_matches('/');
    (!name.is_empty()).then_some(name)
}

pub fn git_router<S: GitHttpState>(state: S) -> Router {
    Router::new()
        .route("/{*path}", get(handle_get::<S>).post(handle_post::<S>))
        .with_state(state)
}

async fn handle_get<S: GitHttpState>(
    State(state): State<S>,
    Path(path): Path<String>,
    Query(query): Query<GitQuery>,
    headers: HeaderMap,
) -> Response {
    let result = match parse_get_route(&path) {
        Some(GitRoute::InfoRefs { name }) => match required(query.service.as_deref(), "service")
            .and_then(parse_service)
        {
            Ok(service) => advertise_refs(&state, name, service, &headers).await,
            Err(err) => Err(err),
        },
        Some(GitRoute::Files { name }) => match required(query.path.as_deref(), "path") {
            Ok(file_path) => {
                read_file(&state, name, file_path, query.reference.as_deref()).await
            }
            Err(err) => Err(err),
        },
        _ => return not_found(),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn handle_post<S: GitHttpState>(
    State(state): State<S>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Some(GitRoute::Rpc { name, service }) = parse_post_route(&path) else {
        return not_found();
    };
    let result = match parse_service(service) {
        Ok(service) => execute_service(&state, name, service, &headers, body).await,
        Err(err) => Err(err),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

fn required<'q>(value: Option<&'q str>, key: &str) -> Result<&'q str, GitHttpError> {
    value.ok_or_else(|| GitHttpError::BadRequest(format!("missing `{key}` query parameter")))
}

fn parse_service(raw: &str) -> Result<Service, GitHttpError> {
    raw.parse::<Service>()
        .map_err(|err| GitHttpError::BadRequest(err.to_string()))
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_refs_with_nested_name() {
        assert_eq!(
            parse_get_route("acme/widgets.git/info/refs"),
            Some(GitRoute::InfoRefs {
                name: "acme/widgets"
            })
        );
        assert_eq!(parse_get_route(".git/info/refs"), None);
    }

    #[test]
    fn parses_files_route() {
        assert_eq!(
            parse_get_route("/acme/widgets/files"),
            Some(GitRoute::Files {
                name: "acme/widgets"
            })
        );
        assert_eq!(parse_get_route("files"), None);
        assert_eq!(parse_get_route("acme/widgets.git/HEAD"), None);
    }

    #[test]
    fn parses_rpc_route() {
        assert_eq!(
            parse_post_route("acme/widgets.git/git-receive-pack"),
            Some(GitRoute::Rpc {
                name: "acme/widgets",
                service: "git-receive-pack"
            })
        );
        assert_eq!(parse_post_route("acme/widgets/git-upload-pack"), None);
        assert_eq!(parse_post_route("acme.git/"), None);
        assert_eq!(parse_post_route("git-upload-pack"), None);
    }
}
