//! Predicate evaluation against request content.
//!
//! Each evaluator is a pure function. Callers that need "invalid means not
//! satisfied" semantics go through [`response_matches`], which logs and
//! swallows [`ExpressionError`]s per predicate.

use crate::error::ExpressionError;
use crate::model::{MockResponse, QueryPredicate, ResponseStrategy};
use crate::request::ResolutionContext;
use regex::RegexBuilder;
use serde_json::Value;
use tracing::warn;

/// Evaluate an XPath expression against an XML body.
///
/// Node-sets match when non-empty, booleans when true, strings when
/// non-empty and numbers when non-zero.
pub fn xpath_matches(body: &str, expression: &str) -> Result<bool, ExpressionError> {
    use sxd_document::parser;
    use sxd_xpath::{Context, Factory};

    let package = parser::parse(body).map_err(|e| ExpressionError::MalformedXml(format!("{e:?}")))?;
    let document = package.as_document();

    let xpath = Factory::new()
        .build(expression)
        .map_err(|e| ExpressionError::InvalidXPath {
            expression: expression.to_string(),
            message: format!("{e:?}"),
        })?
        .ok_or_else(|| ExpressionError::InvalidXPath {
            expression: expression.to_string(),
            message: "empty expression".to_string(),
        })?;

    let context = Context::new();
    let value = xpath
        .evaluate(&context, document.root())
        .map_err(|e| ExpressionError::InvalidXPath {
            expression: expression.to_string(),
            message: format!("{e:?}"),
        })?;

    Ok(match value {
        sxd_xpath::Value::Nodeset(nodes) => nodes.size() > 0,
        sxd_xpath::Value::Boolean(b) => b,
        sxd_xpath::Value::String(s) => !s.is_empty(),
        sxd_xpath::Value::Number(n) => n != 0.0 && !n.is_nan(),
    })
}

/// Evaluate a JSONPath expression against a JSON body.
///
/// Matches when the expression selects at least one non-null value.
pub fn json_path_matches(body: &str, expression: &str) -> Result<bool, ExpressionError> {
    use jsonpath_rust::JsonPath;

    let json: Value = serde_json::from_str(body)?;
    let path = JsonPath::try_from(expression).map_err(|e| ExpressionError::InvalidJsonPath {
        expression: expression.to_string(),
        message: e.to_string(),
    })?;

    Ok(match path.find(&json) {
        Value::Null => false,
        Value::Array(found) => found.iter().any(|v| !v.is_null()),
        _ => true,
    })
}

/// Evaluate a header or parameter predicate against the value found in the request.
pub fn query_matches(value: Option<&str>, predicate: &QueryPredicate) -> Result<bool, ExpressionError> {
    let Some(value) = value else {
        return Ok(false);
    };

    if predicate.match_any {
        return Ok(true);
    }

    if predicate.match_regex {
        let regex = RegexBuilder::new(&predicate.query)
            .case_insensitive(!predicate.match_case)
            .build()
            .map_err(|source| ExpressionError::InvalidRegex {
                pattern: predicate.query.clone(),
                source,
            })?;
        return Ok(regex.is_match(value));
    }

    if predicate.match_case {
        Ok(value == predicate.query)
    } else {
        Ok(value.to_lowercase() == predicate.query.to_lowercase())
    }
}

/// Whether `response` satisfies every predicate the strategy consults.
///
/// An empty predicate list matches any request. Predicates that fail to
/// evaluate are logged and count as not satisfied.
pub fn response_matches(
    strategy: ResponseStrategy,
    response: &MockResponse,
    ctx: &ResolutionContext<'_>,
) -> bool {
    let body = ctx.request.body_str().unwrap_or("");

    let results: Vec<(String, Result<bool, ExpressionError>)> = match strategy {
        ResponseStrategy::XpathInput => response
            .xpath_expressions
            .iter()
            .map(|e| (e.clone(), xpath_matches(body, e)))
            .collect(),
        ResponseStrategy::JsonPathInput => response
            .json_path_expressions
            .iter()
            .map(|e| (e.clone(), json_path_matches(body, e)))
            .collect(),
        ResponseStrategy::HeaderQueryMatch => response
            .header_queries
            .iter()
            .map(|q| (q.name.clone(), query_matches(ctx.request.header(&q.name), q)))
            .collect(),
        ResponseStrategy::QueryMatch => response
            .parameter_queries
            .iter()
            .map(|q| (q.name.clone(), query_matches(ctx.parameter(&q.name), q)))
            .collect(),
        ResponseStrategy::Random | ResponseStrategy::Sequence | ResponseStrategy::Echo => {
            return true;
        }
    };

    results.into_iter().all(|(predicate, result)| match result {
        Ok(matched) => matched,
        Err(e) => {
            warn!(
                response_id = %response.id,
                predicate = %predicate,
                error = %e,
                "Predicate could not be evaluated, treating as not satisfied"
            );
            false
        }
    })
}
