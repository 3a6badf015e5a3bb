//! Startup recovery supervisor.
//!
//! Runs once before traffic is served. A row observed as `generating` after
//! a restart cannot truthfully still be in flight -- the process that was
//! generating it is gone -- so it is demoted to `pending`; pending rows are
//! left as-is. Every affected curriculum is then re-driven through
//! `generate_all` as an independent background task. `failed` rows are
//! deliberately not resurrected.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;

use tutor_db::queries::content_cache;

use crate::completion::CompletionClient;
use crate::curriculum::CurriculumStore;
use crate::orchestrator::{self, GenerationConfig};

/// What one recovery pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Curricula that had rows in `generating` or `pending`.
    pub stuck_curricula: usize,
    /// Rows demoted from `generating` back to `pending`.
    pub reset_rows: u64,
    /// Curricula whose background generation was relaunched.
    pub relaunched: usize,
    /// Curricula that could not be relaunched (reload failed or curriculum
    /// gone); logged and skipped, never fatal.
    pub restart_failures: usize,
}

/// Run one recovery pass. Call at startup, before accepting requests.
pub async fn run_recovery(
    pool: &PgPool,
    store: &Arc<dyn CurriculumStore>,
    client: &Arc<CompletionClient>,
    config: &GenerationConfig,
) -> Result<RecoveryReport> {
    let stuck = content_cache::find_stuck(pool).await?;
    if stuck.is_empty() {
        tracing::info!("no curricula with unfinished generation");
        return Ok(RecoveryReport::default());
    }

    let reset_rows = content_cache::reset_stuck_to_pending(pool).await?;
    tracing::info!(
        curricula = stuck.len(),
        reset_rows,
        "reset interrupted generation rows"
    );

    let mut report = RecoveryReport {
        stuck_curricula: stuck.len(),
        reset_rows,
        ..RecoveryReport::default()
    };

    for curriculum_id in stuck {
        match store.load(curriculum_id).await {
            Ok(Some(curriculum)) => {
                orchestrator::trigger_generate_all(
                    pool.clone(),
                    Arc::clone(client),
                    curriculum_id,
                    curriculum.nodes,
                    curriculum.context,
                    config.clone(),
                );
                tracing::info!(%curriculum_id, "relaunched background generation");
                report.relaunched += 1;
            }
            Ok(None) => {
                tracing::warn!(%curriculum_id, "curriculum no longer exists, skipping restart");
                report.restart_failures += 1;
            }
            Err(e) => {
                tracing::error!(
                    %curriculum_id,
                    error = %e,
                    "failed to reload curriculum, skipping restart"
                );
                report.restart_failures += 1;
            }
        }
    }

    Ok(report)
}
