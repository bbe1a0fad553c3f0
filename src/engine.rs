//! Mock resolution engine.
//!
//! Ties identification, response strategies, latency simulation and
//! forwarding together into one `resolve` call per protocol.

use crate::config::GlobalSettings;
use crate::delay::{self, Clock};
use crate::error::{ForwardError, ResolveError};
use crate::forward::{is_hop_by_hop, join_url, ForwardRequest, Forwarder, UpstreamReply};
use crate::matcher::{identify_rest, identify_soap, match_resource, parse_envelope, soap_action};
use crate::model::{generate_id, HttpHeader, MockResponse, Operation, OperationStatus, SoapVersion};
use crate::repository::Repository;
use crate::request::{MockReply, MockRequest, Outcome, ResolutionContext};
use crate::strategy::{select_response, Selection};
use crate::template::TemplateEngine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name given to responses captured while recording.
pub const RECORDED_RESPONSE_NAME: &str = "Recorded response";

/// Which protocol a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Rest,
    Soap(SoapVersion),
}

/// Mock resolution engine.
///
/// Holds no per-request state besides counters; every resolution works on
/// snapshots taken from the repository.
pub struct MockEngine {
    repository: Arc<dyn Repository>,
    forwarder: Arc<dyn Forwarder>,
    clock: Arc<dyn Clock>,
    template_engine: TemplateEngine,
    settings: GlobalSettings,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Total requests matched to an operation.
    requests_matched: AtomicU64,
    /// Total requests matching no operation.
    requests_unmatched: AtomicU64,
    /// Total requests answered by an upstream.
    requests_forwarded: AtomicU64,
}

impl MockEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        forwarder: Arc<dyn Forwarder>,
        clock: Arc<dyn Clock>,
        settings: GlobalSettings,
    ) -> Self {
        info!(
            unmatched_forward = settings.unmatched_forward_endpoint.is_some(),
            forward_timeout_ms = settings.forward_timeout_ms,
            "Mock engine initialized"
        );

        Self {
            repository,
            forwarder,
            clock,
            template_engine: TemplateEngine::new(),
            settings,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            requests_forwarded: AtomicU64::new(0),
        }
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests matched.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests unmatched.
    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    /// Get total requests answered by an upstream.
    pub fn total_forwarded(&self) -> u64 {
        self.requests_forwarded.load(Ordering::Relaxed)
    }

    /// Resolve a request addressed to a REST application.
    ///
    /// `request.path` is relative to the application.
    pub async fn resolve_rest(
        &self,
        project_id: &str,
        application_id: &str,
        request: &MockRequest,
    ) -> Result<MockReply, ResolveError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let resources = self
            .repository
            .list_resources(project_id, application_id)
            .await;
        let Some((resource, path_params)) = match_resource(&resources, &request.path) else {
            return self.unmatched(request).await;
        };

        let Some(operation) = identify_rest(&resource.operations, &request.method) else {
            return self.unmatched(request).await;
        };

        let mut ctx = ResolutionContext::new(request);
        ctx.path_params = path_params;
        self.resolve_operation(operation, &ctx, Protocol::Rest).await
    }

    /// Resolve a request addressed to a SOAP port.
    ///
    /// `port_id` is a port id or, failing that, a port uri.
    pub async fn resolve_soap(
        &self,
        project_id: &str,
        port_id: &str,
        request: &MockRequest,
    ) -> Result<MockReply, ResolveError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let ports = self.repository.list_ports(project_id).await;
        let port = ports
            .iter()
            .find(|p| p.id == port_id)
            .or_else(|| ports.iter().find(|p| same_path(&p.uri, port_id)));
        let Some(port) = port else {
            return self.unmatched(request).await;
        };

        let envelope = request
            .body_str()
            .ok_or_else(|| ResolveError::InvalidEnvelope("body is not valid UTF-8".to_string()))
            .and_then(parse_envelope);
        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(e) if self.settings.unmatched_forward_endpoint.is_some() => {
                debug!(port_id, error = %e, "Unidentifiable SOAP request");
                return self.unmatched(request).await;
            }
            Err(e) => return Err(e),
        };
        let action = soap_action(request);

        let Some(operation) = identify_soap(&port.operations, &envelope, action.as_deref()) else {
            return self.unmatched(request).await;
        };

        let ctx = ResolutionContext::new(request);
        self.resolve_operation(operation, &ctx, Protocol::Soap(envelope.version))
            .await
    }

    async fn unmatched(&self, request: &MockRequest) -> Result<MockReply, ResolveError> {
        self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_unmatched {
            warn!(
                method = %request.method,
                path = %request.path,
                "No matching operation found"
            );
        }

        let Some(endpoint) = self.settings.unmatched_forward_endpoint.as_deref() else {
            return Err(ResolveError::NoOperationMatch {
                method: request.method.clone(),
                path: request.path.clone(),
            });
        };

        let url = join_url(endpoint, &request.path_and_query());
        let upstream = self
            .forward(url, request)
            .await
            .map_err(|source| ResolveError::ForwardingFailure {
                endpoint: endpoint.to_string(),
                source,
            })?;

        self.requests_forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(relay(
            upstream,
            None,
            Outcome::Forwarded {
                endpoint: endpoint.to_string(),
            },
        ))
    }

    async fn resolve_operation(
        &self,
        operation: &Operation,
        ctx: &ResolutionContext<'_>,
        protocol: Protocol,
    ) -> Result<MockReply, ResolveError> {
        self.requests_matched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_matches {
            info!(
                operation_id = %operation.id,
                operation = %operation.display_name(),
                method = %ctx.request.method,
                path = %ctx.request.path,
                status = ?operation.status,
                "Request matched operation"
            );
        }

        match operation.status {
            OperationStatus::Disabled => Err(ResolveError::OperationDisabled {
                operation_id: operation.id.clone(),
            }),
            OperationStatus::Forwarded
            | OperationStatus::Recording
            | OperationStatus::RecordOnce => self.forward_operation(operation, ctx, protocol).await,
            OperationStatus::Mocked => match self.mock(operation, ctx, protocol).await {
                Err(ResolveError::NoEligibleResponse { .. })
                    if operation.automatic_forward && operation.forwarded_endpoint.is_some() =>
                {
                    debug!(operation_id = %operation.id, "No eligible response, forwarding automatically");
                    self.forward_operation(operation, ctx, protocol).await
                }
                result => result,
            },
        }
    }

    /// Answer from the operation's own mock responses.
    async fn mock(
        &self,
        operation: &Operation,
        ctx: &ResolutionContext<'_>,
        protocol: Protocol,
    ) -> Result<MockReply, ResolveError> {
        let selection = select_response(operation, ctx, self.repository.as_ref()).await?;
        Ok(self.respond(operation, selection, ctx, protocol).await)
    }

    /// Fallback after a failed forward: the default response, else the strategy.
    async fn mock_fallback(
        &self,
        operation: &Operation,
        ctx: &ResolutionContext<'_>,
        protocol: Protocol,
    ) -> Result<MockReply, ResolveError> {
        match operation.default_response() {
            Some(response) => Ok(self
                .respond(operation, Selection::Response(response), ctx, protocol)
                .await),
            None => self.mock(operation, ctx, protocol).await,
        }
    }

    async fn respond(
        &self,
        operation: &Operation,
        selection: Selection<'_>,
        ctx: &ResolutionContext<'_>,
        protocol: Protocol,
    ) -> MockReply {
        let reply = match selection {
            Selection::Response(response) => self.build_response(operation, response, ctx, protocol),
            Selection::Echo => echo(operation, ctx.request),
        };
        delay::simulate(operation, self.clock.as_ref()).await;
        reply
    }

    async fn forward_operation(
        &self,
        operation: &Operation,
        ctx: &ResolutionContext<'_>,
        protocol: Protocol,
    ) -> Result<MockReply, ResolveError> {
        let endpoint = operation
            .forwarded_endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or_default();

        let result = if endpoint.is_empty() {
            Err(ForwardError::NoEndpoint)
        } else {
            let url = match protocol {
                Protocol::Rest => join_url(endpoint, &ctx.request.path_and_query()),
                Protocol::Soap(_) => endpoint.to_string(),
            };
            self.forward(url, ctx.request).await
        };

        match result {
            Ok(upstream) if upstream.is_success() || !operation.mock_on_failure => {
                self.requests_forwarded.fetch_add(1, Ordering::Relaxed);

                let recorded = if operation.status.records() && upstream.is_success() {
                    self.record(operation, &upstream).await
                } else {
                    None
                };
                let outcome = match recorded {
                    Some(response_id) => Outcome::Recorded {
                        endpoint: endpoint.to_string(),
                        response_id,
                    },
                    None => Outcome::Forwarded {
                        endpoint: endpoint.to_string(),
                    },
                };
                Ok(relay(upstream, Some(operation.id.clone()), outcome))
            }
            Ok(upstream) => {
                warn!(
                    operation_id = %operation.id,
                    endpoint = %endpoint,
                    status = upstream.status,
                    "Upstream replied with an error, using mock response"
                );
                self.mock_fallback(operation, ctx, protocol).await
            }
            Err(e) if operation.mock_on_failure => {
                warn!(
                    operation_id = %operation.id,
                    endpoint = %endpoint,
                    error = %e,
                    "Forwarding failed, using mock response"
                );
                self.mock_fallback(operation, ctx, protocol).await
            }
            Err(e) => {
                warn!(
                    operation_id = %operation.id,
                    endpoint = %endpoint,
                    error = %e,
                    "Forwarding failed"
                );
                Err(ResolveError::ForwardingFailure {
                    endpoint: endpoint.to_string(),
                    source: e,
                })
            }
        }
    }

    async fn forward(
        &self,
        url: String,
        request: &MockRequest,
    ) -> Result<UpstreamReply, ForwardError> {
        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();

        self.forwarder
            .forward(ForwardRequest {
                url,
                method: request.method.clone(),
                headers,
                body: request.body.clone(),
            })
            .await
    }

    /// Store a successful upstream reply as a new mock response.
    async fn record(&self, operation: &Operation, upstream: &UpstreamReply) -> Option<String> {
        let mut response =
            match MockResponse::try_new(generate_id(), RECORDED_RESPONSE_NAME, upstream.status) {
                Ok(response) => response,
                Err(e) => {
                    warn!(operation_id = %operation.id, error = %e, "Unable to record upstream reply");
                    return None;
                }
            };
        response.body = Some(String::from_utf8_lossy(&upstream.body).to_string());
        response.http_headers = upstream
            .headers
            .iter()
            .map(|(k, v)| HttpHeader::new(k.clone(), v.clone()))
            .collect();

        let response_id = response.id.clone();
        if let Err(e) = self
            .repository
            .add_mock_response(&operation.id, response)
            .await
        {
            warn!(operation_id = %operation.id, error = %e, "Unable to record upstream reply");
            return None;
        }
        info!(operation_id = %operation.id, response_id = %response_id, "Recorded upstream reply");

        if operation.status == OperationStatus::RecordOnce {
            if let Err(e) = self
                .repository
                .set_operation_status(&operation.id, OperationStatus::Mocked)
                .await
            {
                warn!(operation_id = %operation.id, error = %e, "Unable to switch operation to mocked");
            }
        }
        Some(response_id)
    }

    /// Build a reply from a mock response definition.
    fn build_response(
        &self,
        operation: &Operation,
        response: &MockResponse,
        ctx: &ResolutionContext<'_>,
        protocol: Protocol,
    ) -> MockReply {
        let body = match response.body.as_deref() {
            Some(body) if response.using_expressions => {
                self.template_engine.render(body, ctx).unwrap_or_else(|e| {
                    warn!(
                        operation_id = %operation.id,
                        response_id = %response.id,
                        error = %e,
                        "Failed to render response body, returning it unrendered"
                    );
                    body.to_string()
                })
            }
            Some(body) => body.to_string(),
            None => String::new(),
        };

        let content_type = response
            .header("Content-Type")
            .map(str::to_string)
            .unwrap_or_else(|| match protocol {
                Protocol::Soap(version) => version.content_type().to_string(),
                Protocol::Rest => self.settings.default_content_type.clone(),
            });

        let mut headers = vec![("Content-Type".to_string(), content_type)];
        headers.extend(
            response
                .http_headers
                .iter()
                .filter(|h| !h.name.eq_ignore_ascii_case("content-type"))
                .map(|h| (h.name.clone(), h.value.clone())),
        );
        if !response.content_encodings.is_empty() && response.header("Content-Encoding").is_none() {
            let encodings: Vec<&str> = response
                .content_encodings
                .iter()
                .map(|e| e.as_str())
                .collect();
            headers.push(("Content-Encoding".to_string(), encodings.join(", ")));
        }

        MockReply {
            status: response.http_status_code,
            headers,
            body: body.into_bytes(),
            operation_id: Some(operation.id.clone()),
            outcome: Outcome::Mocked {
                response_id: response.id.clone(),
            },
        }
    }
}

/// Mirror the request back with status 200.
fn echo(operation: &Operation, request: &MockRequest) -> MockReply {
    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .filter(|(k, _)| !is_hop_by_hop(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    headers.sort();

    MockReply {
        status: 200,
        headers,
        body: request.body.clone(),
        operation_id: Some(operation.id.clone()),
        outcome: Outcome::Echoed,
    }
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_matches('/') == b.trim_matches('/')
}

fn relay(upstream: UpstreamReply, operation_id: Option<String>, outcome: Outcome) -> MockReply {
    MockReply {
        status: upstream.status,
        headers: upstream.headers,
        body: upstream.body,
        operation_id,
        outcome,
    }
}
