use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

/// Route-layer view of repository failures.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("{0}")] Conflict(String),
    #[error("{0}")] Unprocessable(String),
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Uniqueness(m) | RepoError::ReferentialIntegrity(m) => ApiError::Conflict(m),
            RepoError::Validation(m) => ApiError::Unprocessable(m),
            RepoError::Internal(m) => {
                error!(error = %m, "repository failure");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn repo_errors_map_to_statuses() {
        let cases = [
            (RepoError::NotFound, StatusCode::NOT_FOUND),
            (RepoError::Uniqueness("tag".into()), StatusCode::CONFLICT),
            (RepoError::ReferentialIntegrity("novel 9".into()), StatusCode::CONFLICT),
            (RepoError::Validation("score".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (RepoError::Internal("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).error_response().status(), status);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        assert_eq!(ApiError::from(RepoError::Internal("password=hunter2".into())).to_string(), "internal error");
    }
}
