//! Response strategy resolution.
//!
//! Given an identified operation, pick which of its mock responses answers
//! the request.

use crate::error::ResolveError;
use crate::expression::response_matches;
use crate::model::{MockResponse, Operation, ResponseStrategy};
use crate::repository::Repository;
use crate::request::ResolutionContext;
use rand::seq::SliceRandom;
use tracing::debug;

/// What the strategy chose.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    Response(&'a MockResponse),
    /// Mirror the request back
    Echo,
}

/// Select the response for `operation` according to its strategy.
///
/// Only ENABLED responses are ever candidates. SEQUENCE advances the
/// operation's cursor through `repository`.
pub async fn select_response<'a>(
    operation: &'a Operation,
    ctx: &ResolutionContext<'_>,
    repository: &dyn Repository,
) -> Result<Selection<'a>, ResolveError> {
    let no_eligible = || ResolveError::NoEligibleResponse {
        operation_id: operation.id.clone(),
    };

    let strategy = operation.response_strategy;
    let enabled = operation.enabled_responses();

    let selected = match strategy {
        ResponseStrategy::Echo => return Ok(Selection::Echo),

        ResponseStrategy::Random => enabled
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(no_eligible)?,

        ResponseStrategy::Sequence => {
            let index = repository
                .advance_sequence(&operation.id, enabled.len())
                .await
                .ok_or_else(no_eligible)?;
            enabled.get(index).copied().ok_or_else(no_eligible)?
        }

        ResponseStrategy::XpathInput
        | ResponseStrategy::JsonPathInput
        | ResponseStrategy::HeaderQueryMatch
        | ResponseStrategy::QueryMatch => enabled
            .iter()
            .copied()
            .find(|r| response_matches(strategy, r, ctx))
            .or_else(|| {
                let fallback = operation.default_response();
                if let Some(response) = fallback {
                    debug!(
                        operation_id = %operation.id,
                        response_id = %response.id,
                        "No response matched, using default"
                    );
                }
                fallback
            })
            .ok_or_else(no_eligible)?,
    };

    debug!(
        operation_id = %operation.id,
        response_id = %selected.id,
        strategy = ?strategy,
        "Response selected"
    );
    Ok(Selection::Response(selected))
}
