//! Mock definitions: projects, resources, ports, operations and responses.
//!
//! These are the records the resolution engine reads. Everything except the
//! sequence cursor is owned by whoever loads the definitions.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default name given to responses without a description.
pub const AUTO_GENERATED_RESPONSE_NAME: &str = "Auto-generated mocked response";

/// A project groups REST applications and SOAP ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub applications: Vec<Application>,

    #[serde(default)]
    pub ports: Vec<Port>,
}

impl Project {
    /// Validate every definition owned by the project.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::EmptyId { kind: "project" });
        }

        let mut ids = IdSet::default();
        for application in &self.applications {
            ids.insert("application", &application.id)?;
            for resource in &application.resources {
                ids.insert("resource", &resource.id)?;
                for operation in &resource.operations {
                    ids.insert("operation", &operation.id)?;
                    operation.validate()?;
                    if !matches!(operation.binding, Binding::Rest { .. }) {
                        return Err(ConfigError::BindingMismatch {
                            operation: operation.id.clone(),
                            expected: "rest",
                        });
                    }
                }
            }
        }
        for port in &self.ports {
            ids.insert("port", &port.id)?;
            for operation in &port.operations {
                ids.insert("operation", &operation.id)?;
                operation.validate()?;
                if !matches!(operation.binding, Binding::Soap { .. }) {
                    return Err(ConfigError::BindingMismatch {
                        operation: operation.id.clone(),
                        expected: "soap",
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct IdSet(HashSet<String>);

impl IdSet {
    fn insert(&mut self, kind: &'static str, id: &str) -> Result<(), ConfigError> {
        if id.is_empty() {
            return Err(ConfigError::EmptyId { kind });
        }
        if !self.0.insert(format!("{kind}:{id}")) {
            return Err(ConfigError::DuplicateId {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

/// A REST application: a named set of resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Application {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A REST resource addressed by a (possibly templated) uri, e.g. `/pet/{petId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub uri: String,

    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// A SOAP port: the endpoint a set of SOAP operations is served on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Port {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub uri: String,

    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// A REST method or SOAP operation definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Operation {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// How requests are bound to this operation
    pub binding: Binding,

    #[serde(default)]
    pub status: OperationStatus,

    #[serde(default)]
    pub response_strategy: ResponseStrategy,

    /// Only consulted for SOAP operations
    #[serde(default)]
    pub identify_strategy: IdentifyStrategy,

    /// Starting position of the SEQUENCE cursor
    #[serde(default)]
    pub current_response_sequence_index: usize,

    #[serde(default)]
    pub forwarded_endpoint: Option<String>,

    #[serde(default)]
    pub simulate_network_delay: bool,

    #[serde(default)]
    pub network_delay: NetworkDelay,

    #[serde(default)]
    pub default_mock_response_id: Option<String>,

    #[serde(default)]
    pub mock_on_failure: bool,

    #[serde(default)]
    pub automatic_forward: bool,

    /// Candidate responses in definition order
    #[serde(default)]
    pub mock_responses: Vec<MockResponse>,
}

impl Operation {
    /// Create a mocked REST operation with no responses.
    pub fn rest(id: impl Into<String>, method: impl Into<String>) -> Self {
        Self::with_binding(
            id.into(),
            Binding::Rest {
                method: method.into(),
            },
        )
    }

    /// Create a mocked SOAP operation identified by its request element.
    pub fn soap(id: impl Into<String>, element: impl Into<String>) -> Self {
        Self::with_binding(
            id.into(),
            Binding::Soap {
                identifier: OperationIdentifier {
                    name: element.into(),
                    namespace: None,
                },
                soap_action: None,
                version: None,
            },
        )
    }

    fn with_binding(id: String, binding: Binding) -> Self {
        Self {
            id,
            name: None,
            binding,
            status: OperationStatus::default(),
            response_strategy: ResponseStrategy::default(),
            identify_strategy: IdentifyStrategy::default(),
            current_response_sequence_index: 0,
            forwarded_endpoint: None,
            simulate_network_delay: false,
            network_delay: NetworkDelay::default(),
            default_mock_response_id: None,
            mock_on_failure: false,
            automatic_forward: false,
            mock_responses: Vec::new(),
        }
    }

    /// Validate the operation and its responses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::EmptyId { kind: "operation" });
        }

        if let Binding::Rest { method } = &self.binding {
            if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError::InvalidMethod {
                    operation: self.id.clone(),
                    method: method.clone(),
                });
            }
        }

        if self.network_delay.fixed_ms == 0 && self.network_delay.min_ms > self.network_delay.max_ms
        {
            return Err(ConfigError::InvalidDelayRange {
                operation: self.id.clone(),
                min_ms: self.network_delay.min_ms,
                max_ms: self.network_delay.max_ms,
            });
        }

        if self.status.forwards() && self.forwarded_endpoint.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingForwardedEndpoint {
                operation: self.id.clone(),
                status: format!("{:?}", self.status),
            });
        }

        let mut ids = IdSet::default();
        for response in &self.mock_responses {
            ids.insert("mock response", &response.id)?;
            response.validate()?;
        }

        if let Some(default_id) = &self.default_mock_response_id {
            if self.mock_response(default_id).is_none() {
                return Err(ConfigError::UnknownDefaultResponse {
                    operation: self.id.clone(),
                    response: default_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Look up a response by id.
    pub fn mock_response(&self, id: &str) -> Option<&MockResponse> {
        self.mock_responses.iter().find(|r| r.id == id)
    }

    /// Enabled responses in definition order.
    pub fn enabled_responses(&self) -> Vec<&MockResponse> {
        self.mock_responses.iter().filter(|r| r.is_enabled()).collect()
    }

    /// The configured default response, if it exists and is enabled.
    pub fn default_response(&self) -> Option<&MockResponse> {
        self.default_mock_response_id
            .as_deref()
            .and_then(|id| self.mock_response(id))
            .filter(|r| r.is_enabled())
    }

    /// Display name used in logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Binds requests to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Binding {
    /// REST method on the owning resource
    Rest { method: String },
    /// SOAP operation on the owning port
    Soap {
        identifier: OperationIdentifier,
        #[serde(default)]
        soap_action: Option<String>,
        #[serde(default)]
        version: Option<SoapVersion>,
    },
}

/// Qualified name of the element a SOAP operation expects in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationIdentifier {
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

impl SoapVersion {
    /// Envelope namespace for this version.
    pub fn envelope_namespace(self) -> &'static str {
        match self {
            SoapVersion::Soap11 => "http://schemas.xmlsoap.org/soap/envelope/",
            SoapVersion::Soap12 => "http://www.w3.org/2003/05/soap-envelope",
        }
    }

    /// Version for an envelope namespace.
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        [SoapVersion::Soap11, SoapVersion::Soap12]
            .into_iter()
            .find(|v| v.envelope_namespace() == namespace)
    }

    /// Content type used when replying with this version.
    pub fn content_type(self) -> &'static str {
        match self {
            SoapVersion::Soap11 => "text/xml; charset=utf-8",
            SoapVersion::Soap12 => "application/soap+xml; charset=utf-8",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    #[default]
    Mocked,
    Forwarded,
    Recording,
    RecordOnce,
    Disabled,
}

impl OperationStatus {
    /// Whether requests are relayed upstream instead of mocked.
    pub fn forwards(self) -> bool {
        matches!(
            self,
            OperationStatus::Forwarded | OperationStatus::Recording | OperationStatus::RecordOnce
        )
    }

    /// Whether upstream replies are stored as new mock responses.
    pub fn records(self) -> bool {
        matches!(self, OperationStatus::Recording | OperationStatus::RecordOnce)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStrategy {
    Random,
    #[default]
    Sequence,
    XpathInput,
    JsonPathInput,
    HeaderQueryMatch,
    QueryMatch,
    Echo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentifyStrategy {
    #[default]
    Element,
    ElementNamespace,
    SoapAction,
}

/// Latency simulation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkDelay {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl NetworkDelay {
    /// A fixed delay.
    pub fn fixed(ms: u64) -> Self {
        Self {
            fixed_ms: ms,
            ..Self::default()
        }
    }

    /// A delay sampled uniformly from `[min_ms, max_ms]`.
    pub fn range(min_ms: u64, max_ms: u64) -> Self {
        Self {
            fixed_ms: 0,
            min_ms,
            max_ms,
        }
    }

    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            return rng.gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }
}

/// One candidate canned response of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockResponse {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub body: Option<String>,

    /// Render the body as a template against the request
    #[serde(default)]
    pub using_expressions: bool,

    #[serde(default = "default_status")]
    pub http_status_code: u16,

    #[serde(default)]
    pub status: MockResponseStatus,

    #[serde(default)]
    pub http_headers: Vec<HttpHeader>,

    #[serde(default)]
    pub content_encodings: Vec<ContentEncoding>,

    #[serde(default)]
    pub xpath_expressions: Vec<String>,

    #[serde(default)]
    pub json_path_expressions: Vec<String>,

    #[serde(default)]
    pub parameter_queries: Vec<QueryPredicate>,

    #[serde(default)]
    pub header_queries: Vec<QueryPredicate>,
}

fn default_status() -> u16 {
    200
}

impl MockResponse {
    /// Create an enabled response with no body or predicates.
    pub fn try_new(
        id: impl Into<String>,
        name: impl Into<String>,
        http_status_code: u16,
    ) -> Result<Self, ConfigError> {
        let response = Self {
            id: id.into(),
            name: name.into(),
            body: None,
            using_expressions: false,
            http_status_code,
            status: MockResponseStatus::Enabled,
            http_headers: Vec::new(),
            content_encodings: Vec::new(),
            xpath_expressions: Vec::new(),
            json_path_expressions: Vec::new(),
            parameter_queries: Vec::new(),
            header_queries: Vec::new(),
        };
        response.validate()?;
        Ok(response)
    }

    /// Validate the response definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::EmptyId {
                kind: "mock response",
            });
        }
        if !(100..=599).contains(&self.http_status_code) {
            return Err(ConfigError::InvalidStatusCode {
                id: self.id.clone(),
                code: self.http_status_code,
            });
        }
        for query in self.parameter_queries.iter().chain(&self.header_queries) {
            if query.match_regex {
                regex::Regex::new(&query.query).map_err(|e| ConfigError::InvalidQueryRegex {
                    response: self.id.clone(),
                    pattern: query.query.clone(),
                    message: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.status == MockResponseStatus::Enabled
    }

    /// Look up a configured header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.http_headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MockResponseStatus {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Identity,
}

impl ContentEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Identity => "identity",
        }
    }
}

/// Header or query parameter predicate.
///
/// `match_any` only requires the value to be present, `match_regex` treats
/// `query` as a regular expression, otherwise the value must equal `query`
/// (ignoring case unless `match_case` is set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryPredicate {
    /// Header or parameter name
    #[serde(alias = "header", alias = "parameter")]
    pub name: String,

    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub match_case: bool,

    #[serde(default)]
    pub match_any: bool,

    #[serde(default)]
    pub match_regex: bool,
}

impl QueryPredicate {
    /// Equality predicate, case-insensitive.
    pub fn equals(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            match_case: false,
            match_any: false,
            match_regex: false,
        }
    }
}

/// Generate a random identifier in UUID v4 layout.
pub fn generate_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffffffffffff,
    )
}
