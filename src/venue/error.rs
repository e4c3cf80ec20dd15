//! Error taxonomy for upstream venue calls. Retry classification lives on
//! the error itself so the client and its callers agree on it.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VenueError {
    /// DNS, TCP, TLS or read timeout.
    #[error("transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// HTTP 429 from upstream.
    #[error("rate limited by {endpoint}")]
    RateLimited { endpoint: String },

    /// HTTP 5xx.
    #[error("server fault {status} from {endpoint}: {reason}")]
    ServerFault {
        status: u16,
        endpoint: String,
        reason: String,
    },

    /// HTTP 4xx other than 401/403/429.
    #[error("bad request ({status}) at {endpoint}: {reason}")]
    BadRequest {
        status: u16,
        endpoint: String,
        reason: String,
    },

    /// 401/403, or credentials missing entirely.
    #[error("authentication failed at {endpoint}: {reason}")]
    Auth { endpoint: String, reason: String },

    /// Local deadline expired (rate-limit acquire, overall budget).
    #[error("timed out: {0}")]
    Timeout(String),
}

impl VenueError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            VenueError::Transport { .. }
                | VenueError::RateLimited { .. }
                | VenueError::ServerFault { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            VenueError::RateLimited { .. } => Some(429),
            VenueError::ServerFault { status, .. } | VenueError::BadRequest { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, endpoint: &str, reason: String) -> Self {
        match status {
            429 => VenueError::RateLimited {
                endpoint: endpoint.to_string(),
            },
            401 | 403 => VenueError::Auth {
                endpoint: endpoint.to_string(),
                reason,
            },
            s if s >= 500 => VenueError::ServerFault {
                status: s,
                endpoint: endpoint.to_string(),
                reason,
            },
            s => VenueError::BadRequest {
                status: s,
                endpoint: endpoint.to_string(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_retry_policy() {
        let e = VenueError::from_status(429, "/book", String::new());
        assert!(matches!(e, VenueError::RateLimited { .. }));
        assert!(e.retryable());

        let e = VenueError::from_status(503, "/book", "unavailable".into());
        assert!(e.retryable());
        assert_eq!(e.status(), Some(503));

        let e = VenueError::from_status(404, "/book", "missing".into());
        assert!(!e.retryable());

        let e = VenueError::from_status(401, "/order", "no creds".into());
        assert!(matches!(e, VenueError::Auth { .. }));
        assert!(!e.retryable());

        assert!(VenueError::Transport {
            endpoint: "/time".into(),
            message: "reset".into()
        }
        .retryable());
    }
}
