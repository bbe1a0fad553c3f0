//! Configuration for the mock server.
//!
//! A single YAML document holds global settings and every project definition.

use crate::model::Project;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockConfig {
    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Project definitions
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl MockConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.settings.validate()?;

        let mut project_ids = HashSet::new();
        let mut operation_ids = HashSet::new();
        for (i, project) in self.projects.iter().enumerate() {
            project
                .validate()
                .map_err(|e| anyhow::anyhow!("Project {} ({}): {}", i, project.id, e))?;

            if !project_ids.insert(project.id.as_str()) {
                anyhow::bail!("Duplicate project id '{}'", project.id);
            }

            // Sequence cursors are keyed by operation id across all projects
            let operations = project
                .applications
                .iter()
                .flat_map(|a| &a.resources)
                .flat_map(|r| &r.operations)
                .chain(project.ports.iter().flat_map(|p| &p.operations));
            for operation in operations {
                if !operation_ids.insert(operation.id.as_str()) {
                    anyhow::bail!(
                        "Operation id '{}' is used in more than one project",
                        operation.id
                    );
                }
            }
        }
        Ok(())
    }

    /// Number of operations across all projects.
    pub fn operation_count(&self) -> usize {
        self.projects
            .iter()
            .map(|p| {
                p.applications
                    .iter()
                    .flat_map(|a| &a.resources)
                    .map(|r| r.operations.len())
                    .sum::<usize>()
                    + p.ports.iter().map(|port| port.operations.len()).sum::<usize>()
            })
            .sum()
    }
}

/// Global settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Upper bound for a forwarded request, connect included (ms)
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,

    /// Upper bound for establishing an upstream connection (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Relay requests that match no operation to this endpoint
    #[serde(default)]
    pub unmatched_forward_endpoint: Option<String>,

    /// Log every matched operation
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Content type for REST responses that set none
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl GlobalSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.forward_timeout_ms == 0 {
            anyhow::bail!("forward_timeout_ms must be greater than 0");
        }
        if self.connect_timeout_ms == 0 {
            anyhow::bail!("connect_timeout_ms must be greater than 0");
        }
        if self
            .unmatched_forward_endpoint
            .as_deref()
            .is_some_and(str::is_empty)
        {
            anyhow::bail!("unmatched_forward_endpoint cannot be empty");
        }
        Ok(())
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            forward_timeout_ms: default_forward_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            unmatched_forward_endpoint: None,
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_forward_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Binding, IdentifyStrategy, OperationStatus, ResponseStrategy};
    use std::io::Write;

    const PETSTORE: &str = r#"
settings:
  forward_timeout_ms: 5000
  log_matches: false
projects:
  - id: petstore
    name: Pet store
    applications:
      - id: api
        resources:
          - id: pet-by-id
            uri: /pet/{petId}
            operations:
              - id: get-pet
                binding:
                  type: rest
                  method: GET
                response_strategy: QUERY_MATCH
                default_mock_response_id: found
                mock_responses:
                  - id: found
                    name: Found
                    body: '{"id": {{path.petId}}}'
                    using_expressions: true
                    http_headers:
                      - name: Content-Type
                        value: application/json
                  - id: missing
                    name: Missing
                    http_status_code: 404
                    parameter_queries:
                      - parameter: petId
                        query: "0"
    ports:
      - id: pet-port
        uri: /ws/pets
        operations:
          - id: soap-get-pet
            binding:
              type: soap
              identifier:
                name: GetPet
                namespace: urn:petstore
              version: SOAP12
            identify_strategy: ELEMENT_NAMESPACE
            status: FORWARDED
            forwarded_endpoint: http://backend/ws
            mock_on_failure: true
"#;

    #[test]
    fn test_parse_full_config() {
        let config = MockConfig::from_yaml(PETSTORE).unwrap();
        assert_eq!(config.settings.forward_timeout_ms, 5000);
        assert_eq!(config.settings.connect_timeout_ms, 2000);
        assert!(!config.settings.log_matches);
        assert!(config.settings.log_unmatched);
        assert_eq!(config.operation_count(), 2);

        let project = &config.projects[0];
        let op = &project.applications[0].resources[0].operations[0];
        assert_eq!(op.response_strategy, ResponseStrategy::QueryMatch);
        assert_eq!(op.mock_responses[1].http_status_code, 404);

        let soap = &project.ports[0].operations[0];
        assert_eq!(soap.status, OperationStatus::Forwarded);
        assert_eq!(soap.identify_strategy, IdentifyStrategy::ElementNamespace);
        assert!(matches!(soap.binding, Binding::Soap { .. }));
    }

    #[test]
    fn test_default_settings() {
        let config: MockConfig = serde_yaml::from_str("projects: []").unwrap();
        assert_eq!(config.settings, GlobalSettings::default());
        assert_eq!(config.settings.default_content_type, "application/json");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(MockConfig::from_yaml("settings:\n  passthrough_unmatched: true").is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = MockConfig::from_yaml("settings:\n  forward_timeout_ms: 0").unwrap_err();
        assert!(err.to_string().contains("forward_timeout_ms"));
    }

    #[test]
    fn test_operation_ids_unique_across_projects() {
        let yaml = r#"
projects:
  - id: one
    ports:
      - id: port-a
        uri: /a
        operations:
          - id: shared
            binding:
              type: soap
              identifier:
                name: A
  - id: two
    ports:
      - id: port-b
        uri: /b
        operations:
          - id: shared
            binding:
              type: soap
              identifier:
                name: B
"#;
        let err = MockConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("shared"));
    }

    #[test]
    fn test_invalid_project_reported() {
        let yaml = r#"
projects:
  - id: broken
    applications:
      - id: api
        resources:
          - id: r
            uri: /r
            operations:
              - id: op
                binding:
                  type: rest
                  method: GET
                status: FORWARDED
"#;
        let err = MockConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PETSTORE.as_bytes()).unwrap();

        let config = MockConfig::from_file(file.path()).unwrap();
        assert_eq!(config.projects[0].id, "petstore");

        assert!(MockConfig::from_file(Path::new("/nonexistent/mock.yaml")).is_err());
    }

    #[test]
    fn test_default_config_parses() {
        let config = MockConfig::from_yaml(include_str!("../config/default-config.yaml")).unwrap();
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.operation_count(), 5);
        assert!(config.settings.unmatched_forward_endpoint.is_none());
    }
}
