//! Fire-and-forget side effects triggered by content changes.
//!
//! Failures here are logged and swallowed; they never fail the operation
//! that triggered them.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

/// Recomputes derived strategy scores after content or the signal picture
/// changes. `trigger` names what prompted the run ("content-change",
/// "signal-escalation"). The default implementation does nothing;
/// deployments that maintain scoring plug in here.
#[async_trait]
pub trait ScoreRecalculator: Send + Sync {
    async fn recalculate(&self, strategy_id: &str, trigger: &str) -> Result<()>;
}

pub struct NoopRecalculator;

#[async_trait]
impl ScoreRecalculator for NoopRecalculator {
    async fn recalculate(&self, _strategy_id: &str, _trigger: &str) -> Result<()> {
        Ok(())
    }
}

pub type SharedRecalculator = Arc<dyn ScoreRecalculator>;

/// Spawn a side-effect task whose failure is logged, not propagated.
pub fn spawn_logged<F>(task: &'static str, fut: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!(task, "background task failed: {:#}", e);
        }
    });
}
