//! Boiler gateway adapters
//!
//! The control loop hands each completed cycle's setpoint to a
//! [`GatewayAdapter`] exactly once. Delivery, retries and acknowledgement
//! are the adapter's business.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::Result;

/// Setpoints kept by [`LogGateway`]
const HISTORY_LIMIT: usize = 64;

/// Sink for computed boiler setpoints
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Adapter name, for logs
    fn name(&self) -> &'static str;

    /// Deliver a boiler water temperature setpoint (°C)
    async fn deliver_setpoint(&self, setpoint: f64) -> Result<()>;
}

/// Adapter that only records setpoints
///
/// Used when no boiler transport is attached, and by the one-shot CLI commands.
#[derive(Debug, Clone, Default)]
pub struct LogGateway {
    delivered: Arc<Mutex<Vec<f64>>>,
}

impl LogGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently delivered setpoint
    pub async fn last(&self) -> Option<f64> {
        self.delivered.lock().await.last().copied()
    }

    /// Number of deliveries so far
    pub async fn count(&self) -> usize {
        self.delivered.lock().await.len()
    }
}

#[async_trait]
impl GatewayAdapter for LogGateway {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver_setpoint(&self, setpoint: f64) -> Result<()> {
        tracing::info!(setpoint, "boiler setpoint");
        let mut delivered = self.delivered.lock().await;
        if delivered.len() >= HISTORY_LIMIT {
            delivered.remove(0);
        }
        delivered.push(setpoint);
        Ok(())
    }
}
