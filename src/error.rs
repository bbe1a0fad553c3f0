//! Error types for definition loading, resolution, forwarding and import.

use crate::request::{MockReply, Outcome};
use thiserror::Error;

/// A definition failed validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} id cannot be empty")]
    EmptyId { kind: &'static str },

    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("mock response '{id}': invalid status code {code}")]
    InvalidStatusCode { id: String, code: u16 },

    #[error("operation '{operation}': network delay min_ms {min_ms} exceeds max_ms {max_ms}")]
    InvalidDelayRange {
        operation: String,
        min_ms: u64,
        max_ms: u64,
    },

    #[error("operation '{operation}': default mock response '{response}' does not exist")]
    UnknownDefaultResponse { operation: String, response: String },

    #[error("operation '{operation}': status {status} requires a forwarded endpoint")]
    MissingForwardedEndpoint { operation: String, status: String },

    #[error("operation '{operation}': invalid HTTP method '{method}'")]
    InvalidMethod { operation: String, method: String },

    #[error("operation '{operation}' must use a {expected} binding")]
    BindingMismatch {
        operation: String,
        expected: &'static str,
    },

    #[error("mock response '{response}': invalid query regex '{pattern}': {message}")]
    InvalidQueryRegex {
        response: String,
        pattern: String,
        message: String,
    },
}

/// Outcome of a resolution that did not produce a reply of its own.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no operation matches {method} {path}")]
    NoOperationMatch { method: String, path: String },

    #[error("operation '{operation_id}' has no eligible mock response")]
    NoEligibleResponse { operation_id: String },

    #[error("operation '{operation_id}' is disabled")]
    OperationDisabled { operation_id: String },

    #[error("forwarding to '{endpoint}' failed: {source}")]
    ForwardingFailure {
        endpoint: String,
        #[source]
        source: ForwardError,
    },

    #[error("invalid SOAP envelope: {0}")]
    InvalidEnvelope(String),
}

impl ResolveError {
    /// HTTP status code reported to the caller for this outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            ResolveError::NoOperationMatch { .. } | ResolveError::NoEligibleResponse { .. } => 404,
            ResolveError::OperationDisabled { .. } => 503,
            ResolveError::ForwardingFailure { .. } => 502,
            ResolveError::InvalidEnvelope(_) => 400,
        }
    }

    /// Short machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::NoOperationMatch { .. } => "no_operation_match",
            ResolveError::NoEligibleResponse { .. } => "no_eligible_response",
            ResolveError::OperationDisabled { .. } => "operation_disabled",
            ResolveError::ForwardingFailure { .. } => "forwarding_failure",
            ResolveError::InvalidEnvelope(_) => "invalid_envelope",
        }
    }

    /// Operation the error belongs to, when one was identified.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            ResolveError::NoEligibleResponse { operation_id }
            | ResolveError::OperationDisabled { operation_id } => Some(operation_id),
            _ => None,
        }
    }

    /// Deterministic JSON reply for the transport.
    pub fn to_reply(&self) -> MockReply {
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });

        MockReply {
            status: self.status_code(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
            operation_id: self.operation_id().map(str::to_string),
            outcome: Outcome::Rejected { code: self.code() },
        }
    }
}

/// A predicate expression could not be evaluated.
#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("invalid XPath expression '{expression}': {message}")]
    InvalidXPath { expression: String, message: String },

    #[error("invalid JSONPath expression '{expression}': {message}")]
    InvalidJsonPath { expression: String, message: String },

    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("request body is not well-formed XML: {0}")]
    MalformedXml(String),

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

/// Relaying a request upstream failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no forwarded endpoint configured")]
    NoEndpoint,

    #[error("invalid upstream url '{0}'")]
    InvalidUrl(String),

    #[error("upstream timed out after {0} ms")]
    Timeout(u64),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),
}

/// An API description could not be turned into mock definitions.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unable to parse the API definition: {0}")]
    Parse(String),

    #[error("the API definition contains no paths")]
    NoPaths,

    #[error("path #{index} has an empty uri")]
    EmptyPath { index: usize },

    #[error("path '{path}': unsupported HTTP method '{method}'")]
    UnsupportedMethod { path: String, method: String },

    #[error("path '{path}' {method}: invalid response code '{code}'")]
    InvalidStatusCode {
        path: String,
        method: String,
        code: String,
    },

    #[error("failed to read API definition: {0}")]
    Io(#[from] std::io::Error),
}

/// An edit against the definition repository was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("operation '{operation}' has no mock response '{response}'")]
    UnknownMockResponse { operation: String, response: String },

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_status_mapping() {
        let cases = [
            (
                ResolveError::NoOperationMatch {
                    method: "GET".to_string(),
                    path: "/x".to_string(),
                },
                404,
            ),
            (
                ResolveError::NoEligibleResponse {
                    operation_id: "op".to_string(),
                },
                404,
            ),
            (
                ResolveError::OperationDisabled {
                    operation_id: "op".to_string(),
                },
                503,
            ),
            (
                ResolveError::ForwardingFailure {
                    endpoint: "http://up".to_string(),
                    source: ForwardError::Timeout(100),
                },
                502,
            ),
            (ResolveError::InvalidEnvelope("bad".to_string()), 400),
        ];

        for (error, status) in cases {
            let reply = error.to_reply();
            assert_eq!(reply.status, status);
            assert_eq!(reply.header("content-type"), Some("application/json"));

            let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
            assert_eq!(body["error"], error.code());
        }
    }

    #[test]
    fn test_reply_carries_operation() {
        let reply = ResolveError::OperationDisabled {
            operation_id: "get-pet".to_string(),
        }
        .to_reply();
        assert_eq!(reply.operation_id.as_deref(), Some("get-pet"));
        assert_eq!(
            reply.outcome,
            Outcome::Rejected {
                code: "operation_disabled"
            }
        );
    }
}
