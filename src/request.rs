//! Inbound requests, outbound replies and the per-request resolution context.

use std::collections::HashMap;

/// An inbound request as seen by the resolution engine.
///
/// `path` is relative to the REST application or SOAP port the request was
/// addressed to.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub query_string: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = Some(query_string.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text, if it is text.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Path plus query string, as relayed upstream.
    pub fn path_and_query(&self) -> String {
        match self.query_string.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

/// Everything known about a request while it is being resolved.
#[derive(Debug)]
pub struct ResolutionContext<'a> {
    pub request: &'a MockRequest,
    /// Parameters captured from templated resource uris
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(request: &'a MockRequest) -> Self {
        Self {
            request,
            path_params: HashMap::new(),
            query_params: parse_query_string(request.query_string.as_deref().unwrap_or("")),
        }
    }

    /// Query parameter, falling back to a path parameter of the same name.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.query_params
            .get(name)
            .or_else(|| self.path_params.get(name))
            .map(String::as_str)
    }
}

/// How a reply was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A configured mock response was returned
    Mocked { response_id: String },
    /// The request was mirrored back
    Echoed,
    /// The upstream reply was relayed
    Forwarded { endpoint: String },
    /// The upstream reply was relayed and stored as a new mock response
    Recorded { endpoint: String, response_id: String },
    /// Resolution failed and an error reply was produced
    Rejected { code: &'static str },
}

/// Reply handed back to the transport.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub operation_id: Option<String>,
    pub outcome: Outcome,
}

impl MockReply {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            params.insert(urlencoding_decode(key), urlencoding_decode(value));
        } else {
            params.insert(urlencoding_decode(part), String::new());
        }
    }

    params
}

/// Percent-decoding that keeps multi-byte UTF-8 sequences intact.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
