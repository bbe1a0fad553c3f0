//! Mock resolver
//!
//! A REST and SOAP mock server. Incoming requests are matched to a configured
//! operation, and the operation decides how they are answered: one of its
//! canned responses, the request echoed back, or a relay to the real backend.
//!
//! # Features
//!
//! - **Identification**: REST by resource uri and method, SOAP by body
//!   element, element namespace or SOAP action
//! - **Response Strategies**: sequence, random, XPath, JSONPath, header and
//!   query parameter matching, echo
//! - **Dynamic Bodies**: Handlebars templates rendered against the request
//! - **Latency Simulation**: Add fixed or random delays
//! - **Forwarding**: Relay to the real service, record its replies, or fall
//!   back to a mock when it fails
//! - **Import**: Synthesize mock definitions from OpenAPI descriptions
//!
//! # Example Configuration
//!
//! ```yaml
//! projects:
//!   - id: petstore
//!     applications:
//!       - id: api
//!         resources:
//!           - id: pet-by-id
//!             uri: /pet/{petId}
//!             operations:
//!               - id: get-pet
//!                 binding:
//!                   type: rest
//!                   method: GET
//!                 response_strategy: SEQUENCE
//!                 mock_responses:
//!                   - id: found
//!                     name: Found
//!                     body: '{"id": {{path.petId}}}'
//!                     using_expressions: true
//! ```

pub mod config;
pub mod delay;
pub mod engine;
pub mod error;
pub mod expression;
pub mod forward;
pub mod import;
pub mod matcher;
pub mod model;
pub mod repository;
pub mod request;
pub mod sequence;
pub mod server;
pub mod strategy;
pub mod template;

pub use config::{GlobalSettings, MockConfig};
pub use delay::{Clock, TokioClock};
pub use engine::MockEngine;
pub use error::{ConfigError, ExpressionError, ForwardError, ImportError, RepositoryError, ResolveError};
pub use forward::{Forwarder, HttpForwarder};
pub use model::{MockResponse, Operation, OperationStatus, Project, ResponseStrategy};
pub use repository::{InMemoryRepository, OperationParent, Repository};
pub use request::{MockReply, MockRequest, Outcome};
pub use server::MockServer;
