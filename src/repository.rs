//! Definition repository.
//!
//! The engine reads definitions through the [`Repository`] trait and only ever
//! sees snapshot clones, so edits made while a request is in flight never tear
//! the view that request resolves against.

use crate::error::RepositoryError;
use crate::model::{MockResponse, MockResponseStatus, Operation, OperationStatus, Port, Project, Resource};
use crate::sequence::SequenceStore;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Read access to mock definitions plus the few edits resolution needs.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Resources of a REST application in definition order.
    async fn list_resources(&self, project_id: &str, application_id: &str) -> Vec<Resource>;

    /// SOAP ports of a project in definition order.
    async fn list_ports(&self, project_id: &str) -> Vec<Port>;

    /// Operations of a resource or port of one project in definition order.
    async fn list_operations(&self, project_id: &str, parent: OperationParent<'_>) -> Vec<Operation>;

    /// Mock responses of an operation in definition order.
    async fn mock_responses(&self, operation_id: &str) -> Vec<MockResponse>;

    /// Claim the next SEQUENCE position among `observed_count` responses.
    async fn advance_sequence(&self, operation_id: &str, observed_count: usize) -> Option<usize>;

    async fn add_mock_response(
        &self,
        operation_id: &str,
        response: MockResponse,
    ) -> Result<(), RepositoryError>;

    async fn set_operation_status(
        &self,
        operation_id: &str,
        status: OperationStatus,
    ) -> Result<(), RepositoryError>;

    async fn set_mock_response_status(
        &self,
        operation_id: &str,
        response_id: &str,
        status: MockResponseStatus,
    ) -> Result<(), RepositoryError>;
}

/// Owner of a list of operations.
///
/// Resource and port ids are only unique within their own kind and project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationParent<'a> {
    Resource(&'a str),
    Port(&'a str),
}

/// Repository holding every project in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    projects: RwLock<Vec<Project>>,
    sequences: SequenceStore,
}

impl InMemoryRepository {
    /// Create a repository seeded with already validated projects.
    pub fn new(projects: Vec<Project>) -> Self {
        let sequences = SequenceStore::new();
        for op in projects.iter().flat_map(operations) {
            sequences.register(&op.id, op.current_response_sequence_index);
        }

        info!(
            projects = projects.len(),
            operations = projects.iter().flat_map(operations).count(),
            "Repository loaded"
        );

        Self {
            projects: RwLock::new(projects),
            sequences,
        }
    }

    /// Clone of every project, sequence cursors included.
    pub async fn snapshot(&self) -> Vec<Project> {
        let mut projects = self.projects.read().await.clone();
        for op in projects.iter_mut().flat_map(operations_mut) {
            self.apply_cursor(op);
        }
        projects
    }

    fn apply_cursor(&self, operation: &mut Operation) {
        operation.current_response_sequence_index = self.sequences.current(&operation.id);
    }

    fn snapshot_operations<'a>(&self, ops: impl Iterator<Item = &'a Operation>) -> Vec<Operation> {
        ops.map(|op| {
            let mut op = op.clone();
            self.apply_cursor(&mut op);
            op
        })
        .collect()
    }

    async fn edit_operation<F>(&self, operation_id: &str, edit: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut Operation) -> Result<(), RepositoryError> + Send,
    {
        let mut projects = self.projects.write().await;
        let operation = projects
            .iter_mut()
            .flat_map(operations_mut)
            .find(|op| op.id == operation_id)
            .ok_or_else(|| RepositoryError::UnknownOperation(operation_id.to_string()))?;

        let mut edited = operation.clone();
        edit(&mut edited)?;
        edited.validate()?;
        *operation = edited;
        Ok(())
    }
}

fn operations(project: &Project) -> impl Iterator<Item = &Operation> + '_ {
    let rest = project
        .applications
        .iter()
        .flat_map(|a| a.resources.iter())
        .flat_map(|r| r.operations.iter());
    let soap = project.ports.iter().flat_map(|p| p.operations.iter());
    rest.chain(soap)
}

fn operations_mut(project: &mut Project) -> impl Iterator<Item = &mut Operation> + '_ {
    let Project {
        applications,
        ports,
        ..
    } = project;
    let rest = applications
        .iter_mut()
        .flat_map(|a| a.resources.iter_mut())
        .flat_map(|r| r.operations.iter_mut());
    let soap = ports.iter_mut().flat_map(|p| p.operations.iter_mut());
    rest.chain(soap)
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_resources(&self, project_id: &str, application_id: &str) -> Vec<Resource> {
        let projects = self.projects.read().await;
        let Some(application) = projects
            .iter()
            .filter(|p| p.id == project_id)
            .flat_map(|p| p.applications.iter())
            .find(|a| a.id == application_id)
        else {
            return Vec::new();
        };

        application
            .resources
            .iter()
            .map(|r| Resource {
                operations: self.snapshot_operations(r.operations.iter()),
                ..r.clone()
            })
            .collect()
    }

    async fn list_ports(&self, project_id: &str) -> Vec<Port> {
        let projects = self.projects.read().await;
        projects
            .iter()
            .filter(|p| p.id == project_id)
            .flat_map(|p| p.ports.iter())
            .map(|port| Port {
                operations: self.snapshot_operations(port.operations.iter()),
                ..port.clone()
            })
            .collect()
    }

    async fn list_operations(&self, project_id: &str, parent: OperationParent<'_>) -> Vec<Operation> {
        let projects = self.projects.read().await;
        let Some(project) = projects.iter().find(|p| p.id == project_id) else {
            return Vec::new();
        };

        let operations = match parent {
            OperationParent::Resource(resource_id) => project
                .applications
                .iter()
                .flat_map(|a| a.resources.iter())
                .find(|r| r.id == resource_id)
                .map(|r| &r.operations),
            OperationParent::Port(port_id) => project
                .ports
                .iter()
                .find(|p| p.id == port_id)
                .map(|p| &p.operations),
        };
        operations
            .map(|ops| self.snapshot_operations(ops.iter()))
            .unwrap_or_default()
    }

    async fn mock_responses(&self, operation_id: &str) -> Vec<MockResponse> {
        let projects = self.projects.read().await;
        let responses = projects
            .iter()
            .flat_map(operations)
            .find(|op| op.id == operation_id)
            .map(|op| op.mock_responses.clone())
            .unwrap_or_default();
        responses
    }

    async fn advance_sequence(&self, operation_id: &str, observed_count: usize) -> Option<usize> {
        self.sequences.next(operation_id, observed_count)
    }

    async fn add_mock_response(
        &self,
        operation_id: &str,
        response: MockResponse,
    ) -> Result<(), RepositoryError> {
        let response_id = response.id.clone();
        self.edit_operation(operation_id, move |op| {
            op.mock_responses.push(response);
            Ok(())
        })
        .await?;

        debug!(operation_id, response_id = %response_id, "Mock response added");
        Ok(())
    }

    async fn set_operation_status(
        &self,
        operation_id: &str,
        status: OperationStatus,
    ) -> Result<(), RepositoryError> {
        self.edit_operation(operation_id, |op| {
            op.status = status;
            Ok(())
        })
        .await?;

        info!(operation_id, status = ?status, "Operation status changed");
        Ok(())
    }

    async fn set_mock_response_status(
        &self,
        operation_id: &str,
        response_id: &str,
        status: MockResponseStatus,
    ) -> Result<(), RepositoryError> {
        self.edit_operation(operation_id, |op| {
            let response = op
                .mock_responses
                .iter_mut()
                .find(|r| r.id == response_id)
                .ok_or_else(|| RepositoryError::UnknownMockResponse {
                    operation: operation_id.to_string(),
                    response: response_id.to_string(),
                })?;
            response.status = status;
            Ok(())
        })
        .await?;

        debug!(operation_id, response_id, status = ?status, "Mock response status changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    fn test_projects() -> Vec<Project> {
        let yaml = r#"
- id: petstore
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
              current_response_sequence_index: 1
              mock_responses:
                - id: first
                  name: First
                - id: second
                  name: Second
  ports:
    - id: pet-port
      uri: /ws/pets
      operations:
        - id: soap-get-pet
          binding:
            type: soap
            identifier:
              name: GetPet
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_lists_definitions() {
        let repo = InMemoryRepository::new(test_projects());

        let resources = repo.list_resources("petstore", "api").await;
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].operations[0].id, "get-pet");

        assert!(repo.list_resources("petstore", "missing").await.is_empty());
        assert!(repo.list_resources("other", "api").await.is_empty());

        let ports = repo.list_ports("petstore").await;
        assert_eq!(ports[0].operations[0].id, "soap-get-pet");

        let by_resource = repo
            .list_operations("petstore", OperationParent::Resource("pet-by-id"))
            .await;
        assert_eq!(by_resource[0].id, "get-pet");
        let by_port = repo
            .list_operations("petstore", OperationParent::Port("pet-port"))
            .await;
        assert_eq!(by_port[0].id, "soap-get-pet");
        assert!(repo
            .list_operations("petstore", OperationParent::Port("pet-by-id"))
            .await
            .is_empty());
        assert!(repo
            .list_operations("other", OperationParent::Resource("pet-by-id"))
            .await
            .is_empty());

        let responses = repo.mock_responses("get-pet").await;
        assert_eq!(responses.len(), 2);
    }

    #[tokio::test]
    async fn test_cursor_seeded_and_reported() {
        let repo = InMemoryRepository::new(test_projects());

        assert_eq!(repo.advance_sequence("get-pet", 2).await, Some(1));
        let ops = repo
            .list_operations("petstore", OperationParent::Resource("pet-by-id"))
            .await;
        assert_eq!(ops[0].current_response_sequence_index, 0);

        assert_eq!(repo.advance_sequence("get-pet", 2).await, Some(0));
        let snapshot = repo.snapshot().await;
        let op = &snapshot[0].applications[0].resources[0].operations[0];
        assert_eq!(op.current_response_sequence_index, 1);
    }

    #[tokio::test]
    async fn test_disable_response() {
        let repo = InMemoryRepository::new(test_projects());
        repo.set_mock_response_status("get-pet", "first", MockResponseStatus::Disabled)
            .await
            .unwrap();

        let responses = repo.mock_responses("get-pet").await;
        assert!(!responses[0].is_enabled());
        assert!(responses[1].is_enabled());

        let err = repo
            .set_mock_response_status("get-pet", "nope", MockResponseStatus::Disabled)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UnknownMockResponse { .. }));
    }

    #[tokio::test]
    async fn test_add_response_is_validated() {
        let repo = InMemoryRepository::new(test_projects());
        let added = MockResponse::try_new("third", "Third", 201).unwrap();
        repo.add_mock_response("get-pet", added).await.unwrap();
        assert_eq!(repo.mock_responses("get-pet").await.len(), 3);

        let duplicate = MockResponse::try_new("third", "Again", 200).unwrap();
        let err = repo.add_mock_response("get-pet", duplicate).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Invalid(ConfigError::DuplicateId { .. })
        ));
        assert_eq!(repo.mock_responses("get-pet").await.len(), 3);
    }

    #[tokio::test]
    async fn test_status_change_requires_endpoint() {
        let repo = InMemoryRepository::new(test_projects());

        let err = repo
            .set_operation_status("get-pet", OperationStatus::Forwarded)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Invalid(ConfigError::MissingForwardedEndpoint { .. })
        ));

        repo.set_operation_status("get-pet", OperationStatus::Disabled)
            .await
            .unwrap();
        let ops = repo
            .list_operations("petstore", OperationParent::Resource("pet-by-id"))
            .await;
        assert_eq!(ops[0].status, OperationStatus::Disabled);

        assert_eq!(
            repo.set_operation_status("missing", OperationStatus::Mocked).await,
            Err(RepositoryError::UnknownOperation("missing".to_string()))
        );
    }
}
