//! HTTP front end.
//!
//! Routes:
//! - `/mock/rest/{project}/{application}/{path..}` resolves a REST request
//! - `/mock/soap/{project}/{port}` resolves a SOAP request, the port given by
//!   id or by its uri
//! - `GET /mock/status` reports request counters

use crate::engine::MockEngine;
use crate::request::{MockReply, MockRequest};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// HTTP server in front of a [`MockEngine`].
pub struct MockServer {
    engine: Arc<MockEngine>,
}

impl MockServer {
    pub fn new(engine: Arc<MockEngine>) -> Self {
        Self { engine }
    }

    /// Bind `addr` and serve until ctrl-c.
    pub async fn run(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "Mock server listening");

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve connections from `listener` until `shutdown` completes.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let engine = Arc::clone(&self.engine);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let engine = Arc::clone(&engine);
                                    async move { handle_request(req, engine).await }
                                });
                                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                    debug!(remote_addr = %remote_addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Mock server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Where a request is addressed.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Rest {
        project: String,
        application: String,
        path: String,
    },
    Soap {
        project: String,
        port: String,
    },
    Status,
}

fn route(path: &str) -> Option<Route> {
    let rest = path.strip_prefix("/mock/")?;
    let mut parts = rest.splitn(4, '/');

    let route = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("status"), None, None, None) => Route::Status,
        (Some("rest"), Some(project), Some(application), tail) => Route::Rest {
            project: project.to_string(),
            application: application.to_string(),
            path: format!("/{}", tail.unwrap_or("")),
        },
        (Some("soap"), Some(project), Some(port), tail) => Route::Soap {
            project: project.to_string(),
            port: match tail {
                Some(tail) => format!("{port}/{tail}"),
                None => port.to_string(),
            },
        },
        _ => return None,
    };

    match &route {
        Route::Rest {
            project,
            application,
            ..
        } if project.is_empty() || application.is_empty() => None,
        Route::Soap { project, port } if project.is_empty() || port.is_empty() => None,
        _ => Some(route),
    }
}

/// Handle one HTTP request.
pub async fn handle_request(
    req: Request<Incoming>,
    engine: Arc<MockEngine>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let Some(route) = route(parts.uri.path()) else {
        return Ok(json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({
                "error": "not_found",
                "message": format!("no mock route for {}", parts.uri.path()),
            }),
        ));
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return Ok(json_response(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({"error": "bad_request", "message": "unreadable body"}),
            ));
        }
    };

    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in &parts.headers {
        let value = String::from_utf8_lossy(value.as_bytes()).to_string();
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let mut request = MockRequest {
        method: parts.method.as_str().to_string(),
        path: String::new(),
        query_string: parts.uri.query().map(str::to_string),
        headers,
        body,
    };

    let result = match route {
        Route::Rest {
            project,
            application,
            path,
        } => {
            request.path = path;
            engine.resolve_rest(&project, &application, &request).await
        }
        Route::Soap { project, port } => {
            request.path = "/".to_string();
            engine.resolve_soap(&project, &port, &request).await
        }
        Route::Status => return Ok(status_response(&engine)),
    };

    let reply = result.unwrap_or_else(|e| {
        debug!(error = %e, status = e.status_code(), "Resolution failed");
        e.to_reply()
    });
    Ok(to_response(reply))
}

fn status_response(engine: &MockEngine) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "requests_total": engine.total_requests(),
            "requests_matched": engine.total_matched(),
            "requests_unmatched": engine.total_unmatched(),
            "requests_forwarded": engine.total_forwarded(),
        }),
    )
}

fn to_response(reply: MockReply) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &reply.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(Bytes::from(reply.body)))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build response");
            let mut response = Response::new(Full::new(Bytes::from("Internal Server Error")));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}
