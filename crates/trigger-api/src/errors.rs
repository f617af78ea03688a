use actions::{Revision, TriggerError};
use reqwest::StatusCode;
use thiserror::Error;

/// Errors constructing a [`crate::HttpTriggerClient`].
#[derive(Debug, Error)]
pub enum TriggerApiError {
    /// The configured base URL is not an absolute URL that can carry path segments.
    #[error("Invalid trigger service URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    /// `reqwest` could not build its client (TLS backend initialisation).
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Maps a transport-level `reqwest` failure onto the trigger taxonomy.
///
/// Only failures to reach the service are transient. Anything else, such as
/// a request that could not be built, is a local fault and stays unclassified.
pub(crate) fn request_error(err: reqwest::Error) -> TriggerError {
    if err.is_connect() || err.is_timeout() {
        TriggerError::Connection {
            message: err.to_string(),
        }
    } else {
        TriggerError::Unexpected {
            message: err.to_string(),
        }
    }
}

/// Maps a non-success HTTP status onto the trigger taxonomy.
///
/// `revision` is set only for revision lookups, where a 404 means the
/// pushlog does not know the revision.
pub(crate) fn status_error(
    status: StatusCode,
    revision: Option<&Revision>,
    body: &str,
) -> TriggerError {
    match (status, revision) {
        (StatusCode::NOT_FOUND, Some(revision)) => TriggerError::RevisionNotFound {
            revision: revision.clone(),
            message: format!(
                "Unable to retrieve pushlog data. Please check repo_url and revision specified. ({})",
                body.trim()
            ),
        },
        (
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT,
            _,
        ) => TriggerError::Connection {
            message: format!("trigger service unavailable ({status})"),
        },
        _ => TriggerError::Unexpected {
            message: format!("trigger service returned {status}: {}", body.trim()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actions::FailureClass;

    #[test]
    fn unknown_revision_is_a_domain_error() {
        let revision = Revision::new("abc123").unwrap();
        let err = status_error(StatusCode::NOT_FOUND, Some(&revision), "no such changeset");
        assert_eq!(err.class(), FailureClass::Domain);
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn gateway_failures_are_transient() {
        for status in [
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert_eq!(status_error(status, None, "").class(), FailureClass::Transient);
        }
    }

    #[test]
    fn other_statuses_are_unclassified() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, None, "").class(),
            FailureClass::Unclassified
        );
        assert_eq!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, None, "boom").class(),
            FailureClass::Unclassified
        );
    }

    #[test]
    fn request_build_failures_are_not_transient() {
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert_eq!(request_error(err).class(), FailureClass::Unclassified);
    }
}
