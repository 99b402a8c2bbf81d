use reqwest::StatusCode;
use std::fmt;

/// The external collaborator an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    MarketData,
    Ranking,
    Search,
    Storage,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::MarketData => "market_data",
            Service::Ranking => "ranking",
            Service::Search => "search",
            Service::Storage => "storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rate limited or overloaded upstream.
    Throttled,
    /// Timeout, refused connection, pool exhaustion.
    Connection,
    NotFound,
    /// Upstream answered with a non-retryable error status.
    Rejected,
    /// Upstream answered but the body could not be decoded.
    Malformed,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{service} error ({kind:?}): {detail}")]
pub struct ServiceError {
    pub service: Service,
    pub kind: ErrorKind,
    pub detail: String,
    pub raw_output: Option<String>,
}

impl ServiceError {
    pub fn new(service: Service, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            service,
            kind,
            detail: detail.into(),
            raw_output: None,
        }
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Throttled | ErrorKind::Connection)
    }

    pub fn from_status(service: Service, status: StatusCode, body: &str) -> Self {
        let kind = match status.as_u16() {
            429 | 503 | 529 => ErrorKind::Throttled,
            404 => ErrorKind::NotFound,
            _ => ErrorKind::Rejected,
        };
        Self::new(service, kind, format!("status={status}")).with_raw_output(body)
    }

    pub fn from_reqwest(service: Service, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ErrorKind::Connection
        } else if err.is_decode() {
            ErrorKind::Malformed
        } else {
            match err.status() {
                Some(status) => return Self::from_status(service, status, ""),
                None => ErrorKind::Connection,
            }
        };
        Self::new(service, kind, err.to_string())
    }
}

/// True when any error in the chain is a transient [`ServiceError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ServiceError>())
        .any(ServiceError::is_transient)
}

/// Upstream body carried by the first [`ServiceError`] in the chain that has one.
pub fn raw_output(err: &anyhow::Error) -> Option<&str> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ServiceError>())
        .find_map(|service_err| service_err.raw_output.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_throttling_statuses() {
        for code in [429u16, 503, 529] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = ServiceError::from_status(Service::Ranking, status, "slow down");
            assert_eq!(err.kind, ErrorKind::Throttled);
            assert!(err.is_transient());
        }

        let err = ServiceError::from_status(Service::MarketData, StatusCode::NOT_FOUND, "");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(!err.is_transient());
    }

    #[test]
    fn finds_transient_error_behind_context() {
        let err = anyhow::Error::new(ServiceError::new(
            Service::Storage,
            ErrorKind::Connection,
            "pool timed out",
        ))
        .context("save failed")
        .context("industry run failed");
        assert!(is_transient(&err));

        let plain = anyhow::anyhow!("ThrottlingException in message text only");
        assert!(!is_transient(&plain));
    }

    #[test]
    fn raw_output_is_found_behind_context() {
        let status = StatusCode::from_u16(529).unwrap();
        let err = anyhow::Error::new(ServiceError::from_status(
            Service::Ranking,
            status,
            r#"{"type":"error","error":{"type":"overloaded_error"}}"#,
        ))
        .context("ranking request failed for industry Banks");
        assert_eq!(
            raw_output(&err),
            Some(r#"{"type":"error","error":{"type":"overloaded_error"}}"#)
        );
        assert_eq!(raw_output(&anyhow::anyhow!("no body")), None);
    }
}
