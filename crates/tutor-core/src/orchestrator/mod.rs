//! Generation orchestrator: fills a curriculum with generated material,
//! layer by layer, under a bounded concurrency limit.
//!
//! The creating request path calls [`initialize_all`] synchronously and then
//! fires [`trigger_generate_all`], which returns immediately; all model
//! calls happen on detached tasks. Per-node failures are persisted and
//! swallowed at the node level so one bad node never aborts its layer, its
//! curriculum, or a sibling task.

pub mod prompt;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use tutor_db::models::{ContentCacheEntry, ContentKind, GenerationStatus, NodeKind};
use tutor_db::queries::content_cache;

use crate::completion::CompletionClient;
use crate::curriculum::{CourseContext, CurriculumNodeDescriptor};
use crate::validator::ExpectedShape;

/// Prompt template name for node-level knowledge cards.
pub const KNOWLEDGE_CARD_PROMPT: &str = "knowledge_card";
/// Prompt template name for question-scoped clarifications.
pub const CLARIFICATION_PROMPT: &str = "clarification";

/// Configuration for curriculum generation.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Maximum simultaneously running generation tasks per curriculum.
    pub max_concurrent: usize,
    /// Retry budget handed to the completion client per node.
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 2,
        }
    }
}

/// Per-run outcome counts for one `generate_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub completed: usize,
    pub failed: usize,
    /// Nodes left untouched: already satisfied, or in a terminal state this
    /// pass may not leave.
    pub skipped: usize,
}

/// Terminal outcome of one node's generation task.
enum NodeOutcome {
    Completed,
    Skipped,
    Failed(String),
}

/// Message sent from a spawned node task back to the layer join point.
struct NodeDone {
    node_id: Uuid,
    title: String,
    outcome: NodeOutcome,
}

/// Seed one cache row per node. Synchronous, idempotent.
///
/// Quiz nodes are seeded as `quiz_pending` and never touched by generation;
/// study nodes start `pending`.
pub async fn initialize_all(
    pool: &PgPool,
    curriculum_id: Uuid,
    nodes: &[CurriculumNodeDescriptor],
) -> Result<()> {
    for node in nodes {
        let initial_status = match node.kind {
            NodeKind::Quiz => GenerationStatus::QuizPending,
            NodeKind::Study => GenerationStatus::Pending,
        };
        content_cache::initialize(
            pool,
            curriculum_id,
            node.id,
            ContentKind::KnowledgeCard,
            node.kind,
            initial_status,
        )
        .await
        .with_context(|| format!("failed to seed cache row for node {}", node.id))?;
    }

    tracing::info!(%curriculum_id, nodes = nodes.len(), "seeded content cache rows");
    Ok(())
}

/// Generate material for every study node of a curriculum.
///
/// Nodes are grouped by layer and layers run strictly in ascending order; a
/// layer settles (every node at a terminal outcome) before the next starts.
/// Within a layer at most `config.max_concurrent` tasks run at once. Safe to
/// re-invoke on a partially generated curriculum: satisfied nodes are
/// skipped without side effects.
pub async fn generate_all(
    pool: &PgPool,
    client: &Arc<CompletionClient>,
    curriculum_id: Uuid,
    nodes: &[CurriculumNodeDescriptor],
    context: &CourseContext,
    config: &GenerationConfig,
) -> Result<GenerationReport> {
    let mut layers: BTreeMap<i32, Vec<CurriculumNodeDescriptor>> = BTreeMap::new();
    for node in nodes {
        if node.kind == NodeKind::Study {
            layers.entry(node.layer).or_default().push(node.clone());
        }
    }

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
    let mut report = GenerationReport::default();

    for (layer, layer_nodes) in layers {
        let node_count = layer_nodes.len();
        let (tx, mut rx) = mpsc::channel::<NodeDone>(node_count);

        for node in layer_nodes {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("concurrency limiter closed")?;
            let pool = pool.clone();
            let client = Arc::clone(client);
            let context = context.clone();
            let tx = tx.clone();
            let max_retries = config.max_retries;

            tokio::spawn(async move {
                let outcome =
                    generate_node(&pool, &client, curriculum_id, &node, &context, max_retries)
                        .await;
                drop(permit);
                let _ = tx
                    .send(NodeDone {
                        node_id: node.id,
                        title: node.title,
                        outcome,
                    })
                    .await;
            });
        }
        drop(tx);

        // Join point: the layer is done once every node reports, successes
        // and failures alike.
        while let Some(done) = rx.recv().await {
            match done.outcome {
                NodeOutcome::Completed => report.completed += 1,
                NodeOutcome::Skipped => report.skipped += 1,
                NodeOutcome::Failed(reason) => {
                    report.failed += 1;
                    tracing::warn!(
                        %curriculum_id,
                        node_id = %done.node_id,
                        node = %done.title,
                        error = %reason,
                        "node generation failed"
                    );
                }
            }
        }

        tracing::info!(%curriculum_id, layer, nodes = node_count, "layer settled");
    }

    Ok(report)
}

/// Spawn [`generate_all`] as a detached background task.
///
/// The fire-and-forget entry point the request path calls right after
/// [`initialize_all`]; curriculum creation returns without waiting on any
/// model call. The handle is returned for supervision, not for awaiting on
/// the request path.
pub fn trigger_generate_all(
    pool: PgPool,
    client: Arc<CompletionClient>,
    curriculum_id: Uuid,
    nodes: Vec<CurriculumNodeDescriptor>,
    context: CourseContext,
    config: GenerationConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match generate_all(&pool, &client, curriculum_id, &nodes, &context, &config).await {
            Ok(report) => tracing::info!(
                %curriculum_id,
                completed = report.completed,
                failed = report.failed,
                skipped = report.skipped,
                "background generation finished"
            ),
            Err(e) => tracing::error!(
                %curriculum_id,
                error = %e,
                "background generation aborted"
            ),
        }
    })
}

/// Generate one piece of content now, synchronously.
///
/// The on-demand path for single-node requests: same lookup -> generate ->
/// upsert sequence and the same caching semantics as one orchestrator task.
/// With `question` set, the generated piece is a question-scoped
/// clarification keyed by the question's fingerprint; otherwise it is the
/// node-level knowledge card.
///
/// Rows already in a terminal state are returned as-is, including `failed`
/// ones -- presentation surfaces those as "not yet available".
pub async fn generate_now(
    pool: &PgPool,
    client: &CompletionClient,
    curriculum_id: Uuid,
    node: &CurriculumNodeDescriptor,
    context: &CourseContext,
    question: Option<&str>,
    config: &GenerationConfig,
) -> Result<ContentCacheEntry> {
    let (kind, fingerprint, prompt_name, prompt_text, shape) = match question {
        Some(q) => (
            ContentKind::Clarification,
            Some(prompt::question_fingerprint(q)),
            CLARIFICATION_PROMPT,
            prompt::clarification_prompt(node, context, q),
            ExpectedShape::formatted_text(),
        ),
        None => (
            ContentKind::KnowledgeCard,
            None,
            KNOWLEDGE_CARD_PROMPT,
            prompt::knowledge_card_prompt(node, context),
            ExpectedShape::StructuredObject,
        ),
    };
    let fingerprint = fingerprint.as_deref();

    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for on-demand generation")?;

    if let Some(entry) =
        content_cache::find(&mut *conn, curriculum_id, node.id, kind, fingerprint).await?
    {
        if entry.is_satisfied() {
            return Ok(entry);
        }
        // Terminal but unusable rows are returned as-is; presentation shows
        // them as "not yet available".
        if matches!(
            entry.generation_status,
            GenerationStatus::Failed | GenerationStatus::QuizPending
        ) {
            return Ok(entry);
        }
    }

    content_cache::update_status(
        &mut *conn,
        curriculum_id,
        node.id,
        kind,
        fingerprint,
        GenerationStatus::Generating,
        Some(Utc::now()),
        None,
        None,
    )
    .await?;

    match client
        .complete(prompt_name, &prompt_text, &shape, config.max_retries)
        .await
    {
        Ok(response) => {
            let entry = content_cache::upsert(
                &mut conn,
                curriculum_id,
                node.id,
                kind,
                fingerprint,
                node.kind,
                &response.raw_text,
                GenerationStatus::Completed,
                Some(Utc::now()),
            )
            .await?;
            tracing::debug!(
                %curriculum_id,
                node_id = %node.id,
                content_kind = %kind,
                retries = response.retries,
                "on-demand content generated"
            );
            Ok(entry)
        }
        Err(e) => {
            let reason = e.to_string();
            content_cache::update_status(
                &mut *conn,
                curriculum_id,
                node.id,
                kind,
                fingerprint,
                GenerationStatus::Failed,
                None,
                Some(Utc::now()),
                Some(&reason),
            )
            .await?;
            Err(anyhow::Error::new(e).context("on-demand generation failed"))
        }
    }
}

/// One node's generation task. Never propagates: every error ends up as a
/// persisted `failed` status and a [`NodeOutcome::Failed`].
async fn generate_node(
    pool: &PgPool,
    client: &CompletionClient,
    curriculum_id: Uuid,
    node: &CurriculumNodeDescriptor,
    context: &CourseContext,
    max_retries: u32,
) -> NodeOutcome {
    match try_generate_node(pool, client, curriculum_id, node, context, max_retries).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let reason = format!("{e:#}");
            // Best-effort failure record; the outcome carries the cause
            // regardless.
            if let Err(db_err) = content_cache::update_status(
                pool,
                curriculum_id,
                node.id,
                ContentKind::KnowledgeCard,
                None,
                GenerationStatus::Failed,
                None,
                Some(Utc::now()),
                Some(&reason),
            )
            .await
            {
                tracing::error!(
                    %curriculum_id,
                    node_id = %node.id,
                    error = %db_err,
                    "failed to record node failure"
                );
            }
            NodeOutcome::Failed(reason)
        }
    }
}

async fn try_generate_node(
    pool: &PgPool,
    client: &CompletionClient,
    curriculum_id: Uuid,
    node: &CurriculumNodeDescriptor,
    context: &CourseContext,
    max_retries: u32,
) -> Result<NodeOutcome> {
    // Private connection for this task's whole lifetime; never shared with
    // sibling tasks, so one slow node cannot block another's writes.
    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for generation task")?;

    if let Some(entry) = content_cache::find(
        &mut *conn,
        curriculum_id,
        node.id,
        ContentKind::KnowledgeCard,
        None,
    )
    .await?
    {
        if entry.is_satisfied() {
            return Ok(NodeOutcome::Skipped);
        }
        // failed and quiz_pending rows stay where they are; a completed row
        // with an empty payload is the one terminal case worth redoing.
        if matches!(
            entry.generation_status,
            GenerationStatus::Failed | GenerationStatus::QuizPending
        ) {
            return Ok(NodeOutcome::Skipped);
        }
    }

    content_cache::update_status(
        &mut *conn,
        curriculum_id,
        node.id,
        ContentKind::KnowledgeCard,
        None,
        GenerationStatus::Generating,
        Some(Utc::now()),
        None,
        None,
    )
    .await?;

    let prompt_text = prompt::knowledge_card_prompt(node, context);
    match client
        .complete(
            KNOWLEDGE_CARD_PROMPT,
            &prompt_text,
            &ExpectedShape::StructuredObject,
            max_retries,
        )
        .await
    {
        Ok(response) => {
            content_cache::upsert(
                &mut conn,
                curriculum_id,
                node.id,
                ContentKind::KnowledgeCard,
                None,
                node.kind,
                &response.raw_text,
                GenerationStatus::Completed,
                Some(Utc::now()),
            )
            .await?;
            tracing::debug!(
                %curriculum_id,
                node_id = %node.id,
                retries = response.retries,
                latency_ms = response.latency_ms,
                "node content generated"
            );
            Ok(NodeOutcome::Completed)
        }
        Err(e) => {
            let reason = e.to_string();
            content_cache::update_status(
                &mut *conn,
                curriculum_id,
                node.id,
                ContentKind::KnowledgeCard,
                None,
                GenerationStatus::Failed,
                None,
                Some(Utc::now()),
                Some(&reason),
            )
            .await?;
            Ok(NodeOutcome::Failed(reason))
        }
    }
}
