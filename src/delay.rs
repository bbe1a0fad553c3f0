//! Network latency simulation.

use crate::model::Operation;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Source of delays, injectable for tests.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Stall the current request according to the operation's delay settings.
///
/// Returns the applied delay in milliseconds. Only the calling task waits.
pub async fn simulate(operation: &Operation, clock: &dyn Clock) -> u64 {
    if !operation.simulate_network_delay {
        return 0;
    }

    let delay_ms = operation.network_delay.calculate();
    if delay_ms > 0 {
        debug!(operation_id = %operation.id, delay_ms, "Applying delay");
        clock.sleep(Duration::from_millis(delay_ms)).await;
    }
    delay_ms
}
