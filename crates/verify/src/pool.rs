//! Bounded parallel verification

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use stepwright_compiler::{CompiledJourney, Emitter, PromotionPlan, VerifyConfig};

use crate::error::{VerifyError, VerifyResult};
use crate::executor::TestExecutor;
use crate::session::{VerifyOutcome, VerifySession};

/// Result for one journey; a hard error stops only that journey
pub type JourneyVerification = (String, VerifyResult<VerifyOutcome>);

/// Verify journeys with at most `config.concurrency` runs at once. Results
/// come back ordered by journey id.
pub async fn verify_all<E>(
    executor: Arc<E>,
    emitter: Arc<Emitter>,
    config: &VerifyConfig,
    plan: &PromotionPlan,
    journeys: Vec<CompiledJourney>,
    cancel: CancellationToken,
) -> Vec<JourneyVerification>
where
    E: TestExecutor + ?Sized + 'static,
{
    let session = Arc::new(VerifySession::new(executor, emitter, config.clone()));
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for compiled in journeys {
        let session = session.clone();
        let semaphore = semaphore.clone();
        let plan = plan.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let id = compiled.journey.id.clone();
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (id, Err(VerifyError::Join(e.to_string()))),
            };
            debug!("Acquired verify slot for {}", id);
            let result = session.run(&compiled, plan, cancel).await;
            (id, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => {
                error!("Verification task panicked: {}", e);
                results.push((String::new(), Err(VerifyError::Join(e.to_string()))));
            }
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}
