//! Turning API descriptions into mock definitions.
//!
//! [`synthesize`] works on an [`ApiDefinition`], a format neutral view of an
//! API description. [`load_definition`] reads one from disk, either in that
//! native layout or as an OpenAPI 3 / Swagger 2 document.

use crate::error::ImportError;
use crate::model::{
    generate_id, Application, HttpHeader, MockResponse, MockResponseStatus, Operation, Resource,
    AUTO_GENERATED_RESPONSE_NAME,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const SUPPORTED_METHODS: &[&str] = &[
    "GET", "PUT", "POST", "DELETE", "OPTIONS", "HEAD", "PATCH", "TRACE",
];

/// A parsed API description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiDefinition {
    #[serde(default)]
    pub title: Option<String>,

    /// Base URL of the real service
    #[serde(default)]
    pub server_url: Option<String>,

    /// Paths in definition order
    #[serde(default)]
    pub paths: Vec<PathDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathDefinition {
    pub uri: String,

    #[serde(default)]
    pub operations: Vec<OperationDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDefinition {
    pub method: String,

    #[serde(default)]
    pub operation_id: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    /// Documented responses keyed by status code (`"200"`, `"404"`, `"default"`)
    #[serde(default)]
    pub responses: BTreeMap<String, ResponseDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    #[serde(default)]
    pub description: Option<String>,

    /// Example body
    #[serde(default)]
    pub example: Option<String>,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub headers: Vec<HttpHeader>,
}

/// Build a REST application from an API description.
///
/// Either the whole description converts or an error names the first
/// problem; no partial application is ever returned.
pub fn synthesize(
    definition: &ApiDefinition,
    project_id: &str,
    generate_responses: bool,
) -> Result<Application, ImportError> {
    if definition.paths.is_empty() {
        return Err(ImportError::NoPaths);
    }

    let forwarded_endpoint = definition
        .server_url
        .clone()
        .filter(|url| !url.is_empty());

    let mut resources = Vec::with_capacity(definition.paths.len());
    for (index, path) in definition.paths.iter().enumerate() {
        if path.uri.trim().is_empty() {
            return Err(ImportError::EmptyPath { index });
        }

        let operations = path
            .operations
            .iter()
            .map(|op| {
                synthesize_operation(&path.uri, op, forwarded_endpoint.clone(), generate_responses)
            })
            .collect::<Result<Vec<_>, _>>()?;

        resources.push(Resource {
            id: generate_id(),
            name: Some(path.uri.clone()),
            uri: path.uri.clone(),
            operations,
        });
    }

    let name = definition
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .or(forwarded_endpoint)
        .unwrap_or_else(|| project_id.to_string());

    info!(
        project_id,
        application = %name,
        resources = resources.len(),
        generate_responses,
        "Synthesized application"
    );

    Ok(Application {
        id: generate_id(),
        name: Some(name),
        resources,
    })
}

fn synthesize_operation(
    uri: &str,
    definition: &OperationDefinition,
    forwarded_endpoint: Option<String>,
    generate_responses: bool,
) -> Result<Operation, ImportError> {
    let method = definition.method.to_ascii_uppercase();
    if !SUPPORTED_METHODS.contains(&method.as_str()) {
        return Err(ImportError::UnsupportedMethod {
            path: uri.to_string(),
            method: definition.method.clone(),
        });
    }

    let name = definition
        .operation_id
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| definition.summary.clone().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| format!("{method} {uri}"));

    let mut operation = Operation::rest(generate_id(), method.clone());
    operation.name = Some(name);
    operation.forwarded_endpoint = forwarded_endpoint;

    for (code, response) in &definition.responses {
        let status = parse_status_code(code).ok_or_else(|| ImportError::InvalidStatusCode {
            path: uri.to_string(),
            method: method.clone(),
            code: code.clone(),
        })?;

        if generate_responses {
            operation.mock_responses.push(synthesize_response(status, response));
        }
    }

    debug!(
        uri,
        method = %method,
        responses = operation.mock_responses.len(),
        "Synthesized operation"
    );
    Ok(operation)
}

fn synthesize_response(status: u16, definition: &ResponseDefinition) -> MockResponse {
    let success = (200..300).contains(&status);

    let mut http_headers = Vec::new();
    let body = if success { definition.example.clone() } else { None };
    if body.is_some() {
        if let Some(content_type) = &definition.content_type {
            http_headers.push(HttpHeader::new("Content-Type", content_type.clone()));
        }
        http_headers.extend(definition.headers.iter().cloned());
    }

    MockResponse {
        id: generate_id(),
        name: definition
            .description
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| AUTO_GENERATED_RESPONSE_NAME.to_string()),
        body,
        using_expressions: true,
        http_status_code: status,
        status: if success {
            MockResponseStatus::Enabled
        } else {
            MockResponseStatus::Disabled
        },
        http_headers,
        content_encodings: Vec::new(),
        xpath_expressions: Vec::new(),
        json_path_expressions: Vec::new(),
        parameter_queries: Vec::new(),
        header_queries: Vec::new(),
    }
}

/// `"default"` maps to 200, anything else must be a valid HTTP status.
fn parse_status_code(code: &str) -> Option<u16> {
    if code.eq_ignore_ascii_case("default") {
        return Some(200);
    }
    code.parse::<u16>()
        .ok()
        .filter(|c| (100..=599).contains(c))
}

/// Read an API description from a JSON or YAML file.
pub fn load_definition(path: &Path) -> Result<ApiDefinition, ImportError> {
    let content = std::fs::read_to_string(path)?;
    parse_definition(&content)
}

/// Parse an API description from JSON or YAML text.
pub fn parse_definition(content: &str) -> Result<ApiDefinition, ImportError> {
    // YAML is a superset of JSON. Going through serde_yaml::Value turns
    // unquoted status code keys into strings.
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| ImportError::Parse(e.to_string()))?;
    let document = serde_json::to_value(yaml).map_err(|e| ImportError::Parse(e.to_string()))?;

    if document.get("openapi").is_some() || document.get("swagger").is_some() {
        from_openapi(&document)
    } else {
        serde_json::from_value(document).map_err(|e| ImportError::Parse(e.to_string()))
    }
}

/// Convert an OpenAPI 3 or Swagger 2 document.
fn from_openapi(document: &Value) -> Result<ApiDefinition, ImportError> {
    let paths = document
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| ImportError::Parse("document has no 'paths' object".to_string()))?;

    let paths = paths
        .iter()
        .map(|(uri, item)| PathDefinition {
            uri: uri.clone(),
            operations: item
                .as_object()
                .map(|methods| {
                    methods
                        .iter()
                        .filter(|(method, _)| {
                            SUPPORTED_METHODS.contains(&method.to_ascii_uppercase().as_str())
                        })
                        .map(|(method, op)| openapi_operation(method, op))
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    Ok(ApiDefinition {
        title: document
            .pointer("/info/title")
            .and_then(Value::as_str)
            .map(str::to_string),
        server_url: openapi_server_url(document),
        paths,
    })
}

fn openapi_server_url(document: &Value) -> Option<String> {
    if let Some(url) = document.pointer("/servers/0/url").and_then(Value::as_str) {
        return Some(url.to_string());
    }

    // Swagger 2: scheme://host/basePath
    let base_path = document.get("basePath").and_then(Value::as_str).unwrap_or("");
    match document.get("host").and_then(Value::as_str) {
        Some(host) => {
            let scheme = document
                .pointer("/schemes/0")
                .and_then(Value::as_str)
                .unwrap_or("http");
            Some(format!("{scheme}://{host}{base_path}"))
        }
        None if !base_path.is_empty() => Some(base_path.to_string()),
        None => None,
    }
}

fn openapi_operation(method: &str, operation: &Value) -> OperationDefinition {
    let text = |key: &str| operation.get(key).and_then(Value::as_str).map(str::to_string);

    let responses = operation
        .get("responses")
        .and_then(Value::as_object)
        .map(|responses| {
            responses
                .iter()
                .map(|(code, response)| (code.clone(), openapi_response(response)))
                .collect()
        })
        .unwrap_or_default();

    OperationDefinition {
        method: method.to_ascii_uppercase(),
        operation_id: text("operationId"),
        summary: text("summary"),
        responses,
    }
}

fn openapi_response(response: &Value) -> ResponseDefinition {
    let description = response
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    // OpenAPI 3: content.{media type}.example(s)
    if let Some((media_type, content)) = response
        .get("content")
        .and_then(Value::as_object)
        .and_then(|c| c.iter().next())
    {
        let example = content.get("example").cloned().or_else(|| {
            content
                .get("examples")
                .and_then(Value::as_object)
                .and_then(|e| e.values().next())
                .and_then(|e| e.get("value"))
                .cloned()
        });
        return ResponseDefinition {
            description,
            example: example.map(example_body),
            content_type: Some(media_type.clone()),
            headers: Vec::new(),
        };
    }

    // Swagger 2: examples.{media type}
    let example = response
        .get("examples")
        .and_then(Value::as_object)
        .and_then(|e| e.iter().next());
    ResponseDefinition {
        description,
        example: example.map(|(_, body)| example_body(body.clone())),
        content_type: example.map(|(media_type, _)| media_type.clone()),
        headers: Vec::new(),
    }
}

fn example_body(example: Value) -> String {
    match example {
        Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OperationStatus, ResponseStrategy};
    use std::io::Write;

    fn definition(yaml: &str) -> ApiDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    const UPDATE_PET: &str = r#"
title: Swagger Petstore
server_url: /api/v3
paths:
  - uri: /pet
    operations:
      - method: put
        operation_id: updatePet
        responses:
          "200":
            description: Successful operation
            example: '{"id": 10}'
            content_type: application/json
          "400":
            description: Invalid ID supplied
            example: '{"error": true}'
          "404":
            description: Pet not found
"#;

    #[test]
    fn test_generated_responses() {
        let app = synthesize(&definition(UPDATE_PET), "1", true).unwrap();
        assert_eq!(app.name.as_deref(), Some("Swagger Petstore"));
        assert_eq!(app.resources.len(), 1);

        let resource = &app.resources[0];
        assert_eq!(resource.uri, "/pet");
        assert_eq!(resource.name.as_deref(), Some("/pet"));

        let op = &resource.operations[0];
        assert_eq!(op.name.as_deref(), Some("updatePet"));
        assert_eq!(op.forwarded_endpoint.as_deref(), Some("/api/v3"));
        assert_eq!(op.status, OperationStatus::Mocked);
        assert_eq!(op.response_strategy, ResponseStrategy::Sequence);
        assert_eq!(op.current_response_sequence_index, 0);
        assert!(!op.simulate_network_delay);
        assert_eq!(op.network_delay.calculate(), 0);

        assert_eq!(op.mock_responses.len(), 3);
        let ok = &op.mock_responses[0];
        assert_eq!(ok.http_status_code, 200);
        assert_eq!(ok.name, "Successful operation");
        assert!(ok.is_enabled());
        assert!(ok.using_expressions);
        assert_eq!(ok.body.as_deref(), Some(r#"{"id": 10}"#));
        assert_eq!(ok.header("content-type"), Some("application/json"));

        for (response, code) in op.mock_responses[1..].iter().zip([400, 404]) {
            assert_eq!(response.http_status_code, code);
            assert_eq!(response.status, MockResponseStatus::Disabled);
            assert!(response.body.is_none());
            assert!(response.http_headers.is_empty());
            assert!(response.using_expressions);
        }

        assert_eq!(op.enabled_responses().len(), 1);
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_without_generated_responses() {
        let app = synthesize(&definition(UPDATE_PET), "1", false).unwrap();
        assert!(app.resources[0].operations[0].mock_responses.is_empty());
    }

    #[test]
    fn test_operation_name_fallbacks() {
        let def = definition(
            r#"
paths:
  - uri: /pet/{petId}
    operations:
      - method: GET
        summary: Find pet by ID
      - method: DELETE
"#,
        );
        let app = synthesize(&def, "project-1", false).unwrap();
        let ops = &app.resources[0].operations;
        assert_eq!(ops[0].name.as_deref(), Some("Find pet by ID"));
        assert_eq!(ops[1].name.as_deref(), Some("DELETE /pet/{petId}"));
        assert_eq!(ops[0].forwarded_endpoint, None);
        assert_eq!(app.name.as_deref(), Some("project-1"));
    }

    #[test]
    fn test_application_named_after_server_url() {
        let def = definition("server_url: http://petstore\npaths:\n  - uri: /pet\n");
        let app = synthesize(&def, "1", false).unwrap();
        assert_eq!(app.name.as_deref(), Some("http://petstore"));
    }

    #[test]
    fn test_default_code_maps_to_ok() {
        let def = definition(
            r#"
paths:
  - uri: /pet
    operations:
      - method: GET
        responses:
          default:
            description: Anything
"#,
        );
        let app = synthesize(&def, "1", true).unwrap();
        let response = &app.resources[0].operations[0].mock_responses[0];
        assert_eq!(response.http_status_code, 200);
        assert!(response.is_enabled());
    }

    #[test]
    fn test_malformed_definitions() {
        assert!(matches!(
            synthesize(&ApiDefinition::default(), "1", true),
            Err(ImportError::NoPaths)
        ));

        let empty_path = definition("paths:\n  - uri: /ok\n  - uri: ''\n");
        assert!(matches!(
            synthesize(&empty_path, "1", true),
            Err(ImportError::EmptyPath { index: 1 })
        ));

        let bad_method = definition("paths:\n  - uri: /pet\n    operations:\n      - method: FETCH\n");
        assert!(matches!(
            synthesize(&bad_method, "1", true),
            Err(ImportError::UnsupportedMethod { .. })
        ));

        let bad_code = definition(
            "paths:\n  - uri: /pet\n    operations:\n      - method: GET\n        responses:\n          2XX: {}\n",
        );
        match synthesize(&bad_code, "1", false) {
            Err(ImportError::InvalidStatusCode { code, .. }) => assert_eq!(code, "2XX"),
            other => panic!("expected InvalidStatusCode, got {other:?}"),
        }
    }

    #[test]
    fn test_openapi_document() {
        let doc = r#"
openapi: 3.0.2
info:
  title: Swagger Petstore - OpenAPI 3.0
servers:
  - url: /api/v3
paths:
  /pet:
    put:
      operationId: updatePet
      responses:
        "200":
          description: Successful operation
          content:
            application/json:
              example:
                id: 10
        400:
          description: Invalid ID supplied
    post:
      summary: Add a new pet
      responses:
        "200":
          description: Successful operation
    parameters: []
"#;
        let def = parse_definition(doc).unwrap();
        assert_eq!(def.title.as_deref(), Some("Swagger Petstore - OpenAPI 3.0"));
        assert_eq!(def.server_url.as_deref(), Some("/api/v3"));
        assert_eq!(def.paths.len(), 1);
        assert_eq!(def.paths[0].operations.len(), 2);

        let app = synthesize(&def, "1", true).unwrap();
        let put = app.resources[0]
            .operations
            .iter()
            .find(|op| op.name.as_deref() == Some("updatePet"))
            .unwrap();
        assert_eq!(put.mock_responses.len(), 2);
        let body: Value = serde_json::from_str(put.mock_responses[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body["id"], 10);
        assert_eq!(
            put.mock_responses[0].header("Content-Type"),
            Some("application/json")
        );
    }

    #[test]
    fn test_swagger_server_url() {
        let doc = r#"{"swagger": "2.0", "host": "petstore.io", "basePath": "/v2", "schemes": ["https"], "paths": {"/pet": {}}}"#;
        let def = parse_definition(doc).unwrap();
        assert_eq!(def.server_url.as_deref(), Some("https://petstore.io/v2"));
    }

    #[test]
    fn test_unparsable_definition() {
        assert!(matches!(
            parse_definition("openapi: 3.0.0\ninfo: {}\n"),
            Err(ImportError::Parse(_))
        ));
        assert!(matches!(
            parse_definition("unexpected: field"),
            Err(ImportError::Parse(_))
        ));
    }

    #[test]
    fn test_load_definition_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(UPDATE_PET.as_bytes()).unwrap();

        let def = load_definition(file.path()).unwrap();
        assert_eq!(def.paths[0].operations[0].operation_id.as_deref(), Some("updatePet"));

        assert!(matches!(
            load_definition(Path::new("/nonexistent/api.yaml")),
            Err(ImportError::Io(_))
        ));
    }
}
