use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::service::Service;

#[derive(Debug, thiserror::Error)]
pub enum GitHttpError {
    #[error("{0}")]
    BadRequest(String),

    #[error("ref `{0}` not found")]
    RefNotFound(String),

    #[error("path `{0}` not found")]
    FileNotFound(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("failed to initialize repository: {0:#}")]
    RepositoryInit(anyhow::Error),

    #[error("git {service} exited with {status}")]
    Process {
        service: Service,
        status: String,
        stderr: String,
    },

    #[error("git {0} timed out")]
    Timeout(Service),

    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl GitHttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            GitHttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GitHttpError::RefNotFound(_) | GitHttpError::FileNotFound(_) => StatusCode::NOT_FOUND,
            GitHttpError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GitHttpError::RepositoryInit(_)
            | GitHttpError::Process { .. }
            | GitHttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GitHttpError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Message sent to the client. Server-side details (stderr, io errors)
    /// stay in the logs.
    fn public_message(&self) -> String {
        match self {
            GitHttpError::RefNotFound(_) => "ref not found".to_string(),
            GitHttpError::FileNotFound(_) => "file not found".to_string(),
            GitHttpError::RepositoryInit(_) => "failed to initialize repository".to_string(),
            GitHttpError::Process { service, .. } => format!("{service} failed"),
            GitHttpError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GitHttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            GitHttpError::Process { stderr, .. } => {
                tracing::error!(stderr = %stderr.trim_end(), "{self}");
            }
            GitHttpError::RefNotFound(_) | GitHttpError::FileNotFound(_) => {
                tracing::debug!("{self}");
            }
            _ if status.is_server_error() => tracing::error!("{self}"),
            _ => tracing::warn!("{self}"),
        }
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.public_message(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_kinds_share_status_but_not_message() {
        let missing_ref = GitHttpError::RefNotFound("does-not-exist".into());
        let missing_file = GitHttpError::FileNotFound("missing/file.txt".into());
        assert_eq!(missing_ref.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);
        assert_ne!(missing_ref.public_message(), missing_file.public_message());
    }

    #[test]
    fn process_error_hides_stderr_from_client() {
        let err = GitHttpError::Process {
            service: Service::ReceivePack,
            status: "exit status: 128".into(),
            stderr: "fatal: secret path /srv/repos".into(),
        };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "git-receive-pack failed");
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        assert_eq!(
            GitHttpError::Timeout(Service::UploadPack).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
