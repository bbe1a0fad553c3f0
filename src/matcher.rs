//! Operation identification.
//!
//! Picks the operation an inbound request targets: REST requests by resource
//! uri and HTTP method, SOAP requests by the body element, its namespace or
//! the SOAP action.

use crate::error::ResolveError;
use crate::model::{Binding, IdentifyStrategy, Operation, Resource, SoapVersion};
use crate::request::MockRequest;
use std::collections::HashMap;

/// A compiled resource uri such as `/pet/{petId}/photos`.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    segments: Vec<TemplateSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl UriTemplate {
    pub fn parse(template: &str) -> Self {
        let segments = split_path(template)
            .map(|segment| {
                match segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                {
                    Some(name) if !name.is_empty() => TemplateSegment::Param(name.to_string()),
                    _ => TemplateSegment::Literal(segment.to_string()),
                }
            })
            .collect();
        Self { segments }
    }

    /// Whether the template has no parameters.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, TemplateSegment::Literal(_)))
    }

    /// Match a request path, capturing path parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                TemplateSegment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                TemplateSegment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.split('/').filter(|s| !s.is_empty())
}

/// Find the resource addressed by `path`.
///
/// A literal uri wins over a templated one; otherwise the first matching
/// resource in definition order is used.
pub fn match_resource<'a>(
    resources: &'a [Resource],
    path: &str,
) -> Option<(&'a Resource, HashMap<String, String>)> {
    let compiled: Vec<(&Resource, UriTemplate)> = resources
        .iter()
        .map(|r| (r, UriTemplate::parse(&r.uri)))
        .collect();

    let literal = compiled
        .iter()
        .filter(|(_, t)| t.is_literal())
        .find_map(|(r, t)| t.matches(path).map(|p| (*r, p)));

    literal.or_else(|| {
        compiled
            .iter()
            .find_map(|(r, t)| t.matches(path).map(|p| (*r, p)))
    })
}

/// Pick the first REST operation bound to `method`.
pub fn identify_rest<'a>(operations: &'a [Operation], method: &str) -> Option<&'a Operation> {
    operations.iter().find(|op| match &op.binding {
        Binding::Rest { method: m } => m.eq_ignore_ascii_case(method),
        Binding::Soap { .. } => false,
    })
}

/// The parts of a SOAP envelope used for identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapEnvelope {
    pub version: SoapVersion,
    /// Local name of the first element in the body
    pub element_name: String,
    pub element_namespace: Option<String>,
}

/// Parse a SOAP 1.1 or 1.2 envelope.
pub fn parse_envelope(body: &str) -> Result<SoapEnvelope, ResolveError> {
    use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
    use sxd_document::parser;

    let package = parser::parse(body)
        .map_err(|e| ResolveError::InvalidEnvelope(format!("malformed XML: {e:?}")))?;
    let document = package.as_document();

    let envelope = document
        .root()
        .children()
        .into_iter()
        .find_map(|child| match child {
            ChildOfRoot::Element(e) => Some(e),
            _ => None,
        })
        .ok_or_else(|| ResolveError::InvalidEnvelope("missing root element".to_string()))?;

    let envelope_name = envelope.name();
    if envelope_name.local_part() != "Envelope" {
        return Err(ResolveError::InvalidEnvelope(format!(
            "root element is '{}', expected 'Envelope'",
            envelope_name.local_part()
        )));
    }
    let version = envelope_name
        .namespace_uri()
        .and_then(SoapVersion::from_namespace)
        .ok_or_else(|| ResolveError::InvalidEnvelope("unknown envelope namespace".to_string()))?;

    fn child_elements<'d>(parent: Element<'d>) -> Vec<Element<'d>> {
        parent
            .children()
            .into_iter()
            .filter_map(|child| match child {
                ChildOfElement::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    let soap_body = child_elements(envelope)
        .into_iter()
        .find(|e| e.name().local_part() == "Body")
        .ok_or_else(|| ResolveError::InvalidEnvelope("missing Body element".to_string()))?;

    let operation_element = child_elements(soap_body)
        .into_iter()
        .next()
        .ok_or_else(|| ResolveError::InvalidEnvelope("empty Body element".to_string()))?;

    let name = operation_element.name();
    Ok(SoapEnvelope {
        version,
        element_name: name.local_part().to_string(),
        element_namespace: name.namespace_uri().map(str::to_string),
    })
}

/// SOAP action from the `SOAPAction` header or a SOAP 1.2 content type.
pub fn soap_action(request: &MockRequest) -> Option<String> {
    if let Some(action) = request.header("SOAPAction") {
        let action = action.trim().trim_matches('"');
        if !action.is_empty() {
            return Some(action.to_string());
        }
    }

    request.header("Content-Type").and_then(|ct| {
        ct.split(';')
            .filter_map(|part| part.trim().split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("action"))
            .map(|(_, value)| value.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Pick the SOAP operation targeted by an envelope.
///
/// Operations are tried in definition order with their own identify
/// strategy. If none matches and the port has exactly one SOAP operation,
/// that operation is used.
pub fn identify_soap<'a>(
    operations: &'a [Operation],
    envelope: &SoapEnvelope,
    action: Option<&str>,
) -> Option<&'a Operation> {
    let found = operations.iter().find(|op| {
        let Binding::Soap {
            identifier,
            soap_action,
            version,
        } = &op.binding
        else {
            return false;
        };

        if version.is_some_and(|v| v != envelope.version) {
            return false;
        }

        match op.identify_strategy {
            IdentifyStrategy::Element => identifier.name == envelope.element_name,
            IdentifyStrategy::ElementNamespace => {
                identifier.name == envelope.element_name
                    && identifier.namespace.as_deref() == envelope.element_namespace.as_deref()
            }
            IdentifyStrategy::SoapAction => {
                matches!((soap_action.as_deref(), action), (Some(a), Some(b)) if a == b)
            }
        }
    });

    found.or_else(|| match operations {
        [only] if matches!(only.binding, Binding::Soap { .. }) => Some(only),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationIdentifier;

    fn resource(id: &str, uri: &str) -> Resource {
        Resource {
            id: id.to_string(),
            name: None,
            uri: uri.to_string(),
            operations: vec![],
        }
    }

    fn soap_op(id: &str, name: &str, namespace: Option<&str>, strategy: IdentifyStrategy) -> Operation {
        let mut op = Operation::soap(id, name);
        op.identify_strategy = strategy;
        if let Binding::Soap { identifier, .. } = &mut op.binding {
            *identifier = OperationIdentifier {
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
            };
        }
        op
    }

    const SOAP11: &str = r#"<?xml version="1.0"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:pet="urn:petstore">
  <soapenv:Header/>
  <soapenv:Body>
    <pet:GetPet><pet:id>7</pet:id></pet:GetPet>
  </soapenv:Body>
</soapenv:Envelope>"#;

    const SOAP12: &str = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Body><AddPet xmlns="urn:petstore"/></env:Body>
</env:Envelope>"#;

    #[test]
    fn test_template_matching() {
        let template = UriTemplate::parse("/pet/{petId}");
        let params = template.matches("/pet/123").unwrap();
        assert_eq!(params.get("petId"), Some(&"123".to_string()));

        assert!(template.matches("/pet/").is_none());
        assert!(template.matches("/pet/1/photos").is_none());
        assert!(template.matches("/pet/7/").is_some());
        assert!(!template.is_literal());
    }

    #[test]
    fn test_literal_resource_preferred() {
        let resources = vec![resource("by-id", "/pet/{petId}"), resource("find", "/pet/findByStatus")];

        let (r, params) = match_resource(&resources, "/pet/findByStatus").unwrap();
        assert_eq!(r.id, "find");
        assert!(params.is_empty());

        let (r, params) = match_resource(&resources, "/pet/9").unwrap();
        assert_eq!(r.id, "by-id");
        assert_eq!(params.get("petId"), Some(&"9".to_string()));

        assert!(match_resource(&resources, "/store").is_none());
    }

    #[test]
    fn test_templated_resources_in_definition_order() {
        let resources = vec![resource("first", "/{a}/{b}"), resource("second", "/pet/{id}")];
        let (r, _) = match_resource(&resources, "/pet/1").unwrap();
        assert_eq!(r.id, "first");
    }

    #[test]
    fn test_identify_rest_first_wins() {
        let mut first = Operation::rest("first", "GET");
        first.name = Some("first".to_string());
        let ops = vec![Operation::rest("post", "POST"), first, Operation::rest("second", "get")];

        assert_eq!(identify_rest(&ops, "get").unwrap().id, "first");
        assert_eq!(identify_rest(&ops, "POST").unwrap().id, "post");
        assert!(identify_rest(&ops, "DELETE").is_none());
    }

    #[test]
    fn test_parse_soap11_envelope() {
        let env = parse_envelope(SOAP11).unwrap();
        assert_eq!(env.version, SoapVersion::Soap11);
        assert_eq!(env.element_name, "GetPet");
        assert_eq!(env.element_namespace.as_deref(), Some("urn:petstore"));
    }

    #[test]
    fn test_parse_soap12_envelope() {
        let env = parse_envelope(SOAP12).unwrap();
        assert_eq!(env.version, SoapVersion::Soap12);
        assert_eq!(env.element_name, "AddPet");
        assert_eq!(env.element_namespace.as_deref(), Some("urn:petstore"));
    }

    #[test]
    fn test_invalid_envelopes() {
        assert!(parse_envelope("<broken").is_err());
        assert!(parse_envelope("<Envelope/>").is_err());
        assert!(parse_envelope(
            r#"<e:Envelope xmlns:e="http://schemas.xmlsoap.org/soap/envelope/"><e:Body/></e:Envelope>"#
        )
        .is_err());
    }

    #[test]
    fn test_identify_by_element() {
        let env = parse_envelope(SOAP11).unwrap();
        let ops = vec![
            soap_op("add", "AddPet", None, IdentifyStrategy::Element),
            soap_op("get", "GetPet", None, IdentifyStrategy::Element),
        ];
        assert_eq!(identify_soap(&ops, &env, None).unwrap().id, "get");
    }

    #[test]
    fn test_identify_by_element_namespace() {
        let env = parse_envelope(SOAP11).unwrap();
        let ops = vec![
            soap_op("other-ns", "GetPet", Some("urn:other"), IdentifyStrategy::ElementNamespace),
            soap_op("right-ns", "GetPet", Some("urn:petstore"), IdentifyStrategy::ElementNamespace),
        ];
        assert_eq!(identify_soap(&ops, &env, None).unwrap().id, "right-ns");
    }

    #[test]
    fn test_identify_by_soap_action() {
        let env = parse_envelope(SOAP11).unwrap();
        let mut by_action = soap_op("action", "Unrelated", None, IdentifyStrategy::SoapAction);
        if let Binding::Soap { soap_action, .. } = &mut by_action.binding {
            *soap_action = Some("urn:petstore/GetPet".to_string());
        }
        let ops = vec![soap_op("add", "AddPet", None, IdentifyStrategy::Element), by_action];

        assert_eq!(
            identify_soap(&ops, &env, Some("urn:petstore/GetPet")).unwrap().id,
            "action"
        );
        assert!(identify_soap(&ops, &env, Some("urn:other")).is_none());
    }

    #[test]
    fn test_single_operation_fallback() {
        let env = parse_envelope(SOAP11).unwrap();
        let ops = vec![soap_op("only", "Different", None, IdentifyStrategy::Element)];
        assert_eq!(identify_soap(&ops, &env, None).unwrap().id, "only");
    }

    #[test]
    fn test_single_rest_operation_is_not_a_fallback() {
        let env = parse_envelope(SOAP11).unwrap();
        let ops = vec![Operation::rest("rest-get", "GET")];
        assert!(identify_soap(&ops, &env, None).is_none());
    }

    #[test]
    fn test_version_must_match() {
        let env = parse_envelope(SOAP12).unwrap();
        let mut op = soap_op("v11", "AddPet", None, IdentifyStrategy::Element);
        if let Binding::Soap { version, .. } = &mut op.binding {
            *version = Some(SoapVersion::Soap11);
        }
        let ops = vec![op, soap_op("any", "Other", None, IdentifyStrategy::Element)];
        assert!(identify_soap(&ops, &env, None).is_none());
    }

    #[test]
    fn test_soap_action_sources() {
        let quoted = MockRequest::new("POST", "/").with_header("SOAPAction", "\"urn:a\"");
        assert_eq!(soap_action(&quoted).as_deref(), Some("urn:a"));

        let soap12 = MockRequest::new("POST", "/").with_header(
            "Content-Type",
            "application/soap+xml; charset=utf-8; action=\"urn:b\"",
        );
        assert_eq!(soap_action(&soap12).as_deref(), Some("urn:b"));

        let empty = MockRequest::new("POST", "/").with_header("SOAPAction", "\"\"");
        assert_eq!(soap_action(&empty), None);
    }
}
