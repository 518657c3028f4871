//! Sync workflow: an explicit state machine driven by a single loop.
//!
//! One run is one linear pass: normalize the change event, mark RUNNING,
//! build, fetch outputs, persist them, run ingestion, mark SUCCEEDED. Every
//! step's failure routes through one funnel, a FAILED status write with the
//! best-available reason and execution id, before the run terminates. The
//! transitions live in [`on_success`]/[`failure_edge`] so the control flow
//! is data, not nesting.

mod context;

pub use context::WorkflowContext;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::bot::{SyncStatus, decompose_bot_key};
use crate::core::builder::{BuildError, BuildRequest};
use crate::core::engine::SyncDeps;
use crate::core::ingestion::{IngestionError, run_ingestion};
use crate::core::outputs::{OutputError, StackOutputSet, fetch_outputs};
use crate::core::store::StoreError;
use crate::core::stream::ChangeRecord;
use crate::core::updater::StatusUpdatePayload;

pub const SUCCEEDED_REASON: &str = "Knowledge base sync succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    ExtractEvent,
    MarkRunning,
    RunBuild,
    FetchOutputs,
    StoreKnowledgeBase,
    StoreGuardrail,
    RunIngestion,
    MarkSucceeded,
    Succeeded,
    Failed,
}

pub fn on_success(state: SyncState) -> SyncState {
    match state {
        SyncState::ExtractEvent => SyncState::MarkRunning,
        SyncState::MarkRunning => SyncState::RunBuild,
        SyncState::RunBuild => SyncState::FetchOutputs,
        SyncState::FetchOutputs => SyncState::StoreKnowledgeBase,
        SyncState::StoreKnowledgeBase => SyncState::StoreGuardrail,
        SyncState::StoreGuardrail => SyncState::RunIngestion,
        SyncState::RunIngestion => SyncState::MarkSucceeded,
        SyncState::MarkSucceeded => SyncState::Succeeded,
        SyncState::Succeeded => SyncState::Succeeded,
        SyncState::Failed => SyncState::Failed,
    }
}

/// Where a failed step lands. `ExtractEvent` has no edge: the record's key
/// is unknown before normalization, so there is nothing to mark FAILED.
pub fn failure_edge(state: SyncState) -> Option<SyncState> {
    match state {
        SyncState::ExtractEvent | SyncState::Succeeded | SyncState::Failed => None,
        _ => Some(SyncState::Failed),
    }
}

pub fn is_terminal(state: SyncState) -> bool {
    matches!(state, SyncState::Succeeded | SyncState::Failed)
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("malformed change event: {0}")]
    Event(String),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Status(#[from] anyhow::Error),
}

/// Run one sync workflow to a terminal state. Returns the terminal state;
/// the durable outcome lives in the record's sync status.
///
/// Concurrent runs for the same record are not guarded: a re-queue while a
/// run is in flight races last-write-wins on the final status write.
pub async fn run_sync(deps: Arc<SyncDeps>, change: ChangeRecord) -> SyncState {
    let mut ctx = WorkflowContext::new(change);
    let mut state = SyncState::ExtractEvent;

    while !is_terminal(state) {
        match execute_step(state, &deps, &mut ctx).await {
            Ok(()) => state = on_success(state),
            Err(err) => match failure_edge(state) {
                Some(next) => {
                    warn!(bot_key = %ctx.sk, state = ?state, "sync step failed: {}", err);
                    record_failure(&deps, &ctx, err).await;
                    state = next;
                }
                None => {
                    error!(state = ?state, "sync run aborted before normalization: {}", err);
                    return SyncState::Failed;
                }
            },
        }
    }

    info!(bot_key = %ctx.sk, terminal = ?state, "sync run finished");
    state
}

async fn execute_step(
    state: SyncState,
    deps: &SyncDeps,
    ctx: &mut WorkflowContext,
) -> Result<(), StepError> {
    match state {
        SyncState::ExtractEvent => {
            let pk = ctx.change.pk().to_string();
            let sk = ctx.change.sk().to_string();
            if pk.is_empty() || sk.is_empty() {
                return Err(StepError::Event("change image has empty keys".to_string()));
            }
            decompose_bot_key(&sk).map_err(|e| StepError::Event(e.to_string()))?;
            ctx.pk = pk;
            ctx.sk = sk;
            Ok(())
        }
        SyncState::MarkRunning => {
            deps.updater
                .update(&ctx.pk, &ctx.sk, SyncStatus::Running, "", "")
                .await?;
            Ok(())
        }
        SyncState::RunBuild => {
            let request = BuildRequest::from_change(
                &ctx.change,
                &deps.document_bucket,
                deps.use_standby_replicas,
            );
            let completion = deps.builder.run_build(&request).await?;
            ctx.build_arn = completion.build_arn;
            Ok(())
        }
        SyncState::FetchOutputs => {
            let outputs = fetch_outputs(deps.outputs.as_ref(), &ctx.sk).await?;
            ctx.outputs = Some(outputs);
            Ok(())
        }
        SyncState::StoreKnowledgeBase => {
            let outputs = resolved_outputs(ctx)?;
            deps.store
                .update_knowledge_base(
                    &ctx.pk,
                    &ctx.sk,
                    &outputs.knowledge_base_id,
                    &outputs.data_source_ids,
                )
                .await?;
            Ok(())
        }
        SyncState::StoreGuardrail => {
            let outputs = resolved_outputs(ctx)?;
            deps.store
                .update_guardrail(
                    &ctx.pk,
                    &ctx.sk,
                    &outputs.guardrail_arn,
                    &outputs.guardrail_version,
                )
                .await?;
            Ok(())
        }
        SyncState::RunIngestion => {
            let outputs = resolved_outputs(ctx)?;
            run_ingestion(
                deps.ingestion.as_ref(),
                &deps.poll,
                &outputs.knowledge_base_id,
                &outputs.data_source_ids,
            )
            .await?;
            Ok(())
        }
        SyncState::MarkSucceeded => {
            deps.updater
                .update(&ctx.pk, &ctx.sk, SyncStatus::Succeeded, SUCCEEDED_REASON, "")
                .await?;
            Ok(())
        }
        SyncState::Succeeded | SyncState::Failed => Ok(()),
    }
}

// Persistence and ingestion run strictly after FetchOutputs; a missing set
// here means the transition table was edited inconsistently.
fn resolved_outputs(ctx: &WorkflowContext) -> Result<&StackOutputSet, StepError> {
    ctx.outputs
        .as_ref()
        .ok_or_else(|| StepError::Status(anyhow::anyhow!("stack outputs not resolved")))
}

/// The shared failure funnel: exactly one FAILED status write with the best
/// reason and execution id available, then the run terminates. A failure of
/// the write itself is logged and the run still ends in `Failed`; the
/// durable record then keeps its previous status for external re-queueing.
async fn record_failure(deps: &SyncDeps, ctx: &WorkflowContext, err: StepError) {
    let result = match err {
        StepError::Build(BuildError::Failed { cause }) => {
            deps.updater
                .apply(StatusUpdatePayload::BuildFailure { cause })
                .await
        }
        StepError::Ingestion(IngestionError::JobFailed { job_id, reasons }) => {
            deps.updater
                .update(
                    &ctx.pk,
                    &ctx.sk,
                    SyncStatus::Failed,
                    &format!("{:?}", reasons),
                    &job_id,
                )
                .await
        }
        other => {
            deps.updater
                .update(&ctx.pk, &ctx.sk, SyncStatus::Failed, &other.to_string(), "")
                .await
        }
    };
    if let Err(e) = result {
        error!(bot_key = %ctx.sk, "failed to record FAILED status: {}", e);
    }
}

#[cfg(test)]
mod tests;
