//! Integration tests for the generation orchestrator: idempotent
//! initialization and generation, layer ordering, bounded concurrency, and
//! per-node failure isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use tutor_db::models::{ContentKind, GenerationStatus, NodeKind};
use tutor_db::queries::content_cache;
use tutor_test_utils::{create_test_db, drop_test_db};

use tutor_core::completion::{CompletionClient, CompletionConfig, ModelProvider};
use tutor_core::curriculum::{CourseContext, CurriculumNodeDescriptor};
use tutor_core::orchestrator::{
    GenerationConfig, generate_all, generate_now, initialize_all, trigger_generate_all,
};

// ===========================================================================
// Test harness
// ===========================================================================

struct TestHarness {
    pool: PgPool,
    db_name: String,
}

impl TestHarness {
    async fn new() -> Self {
        tutor_test_utils::init_tracing();
        let (pool, db_name) = create_test_db().await;
        Self { pool, db_name }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn teardown(self) {
        self.pool.close().await;
        drop_test_db(&self.db_name).await;
    }
}

fn course_context() -> CourseContext {
    CourseContext {
        name: "Intro to CS".to_owned(),
        rationale: "Career change".to_owned(),
        level: "beginner".to_owned(),
        mode: "self-paced".to_owned(),
        language: "English".to_owned(),
    }
}

fn study_node(title: &str, layer: i32) -> CurriculumNodeDescriptor {
    CurriculumNodeDescriptor {
        id: Uuid::new_v4(),
        title: title.to_owned(),
        description: format!("All about {title}"),
        kind: NodeKind::Study,
        layer,
        estimated_minutes: 20,
    }
}

fn quiz_node(title: &str, layer: i32) -> CurriculumNodeDescriptor {
    CurriculumNodeDescriptor {
        kind: NodeKind::Quiz,
        ..study_node(title, layer)
    }
}

fn test_client(provider: Arc<dyn ModelProvider>) -> Arc<CompletionClient> {
    Arc::new(CompletionClient::new(
        provider,
        CompletionConfig {
            base_backoff: Duration::from_millis(1),
            request_timeout: Duration::from_secs(10),
        },
    ))
}

fn test_config() -> GenerationConfig {
    GenerationConfig {
        max_concurrent: 3,
        max_retries: 0,
    }
}

/// The node title a knowledge-card prompt was built for.
fn title_from_prompt(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Unit: "))
        .unwrap_or("<unknown>")
        .to_owned()
}

// ===========================================================================
// Providers
// ===========================================================================

/// Records the node title of every invocation, in order, then returns a
/// valid card.
struct RecordingProvider {
    invocations: Mutex<Vec<String>>,
}

impl RecordingProvider {
    fn new() -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
        }
    }

    fn titles(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for RecordingProvider {
    fn model_id(&self) -> &str {
        "recording"
    }

    async fn invoke(&self, _prompt_name: &str, prompt: &str) -> Result<String> {
        self.invocations
            .lock()
            .unwrap()
            .push(title_from_prompt(prompt));
        Ok("{\"front\": \"Q\", \"back\": \"A\"}".to_owned())
    }
}

/// Fails every invocation whose prompt mentions one doomed node title.
struct SelectiveFailProvider {
    doomed_title: String,
}

#[async_trait]
impl ModelProvider for SelectiveFailProvider {
    fn model_id(&self) -> &str {
        "selective"
    }

    async fn invoke(&self, _prompt_name: &str, prompt: &str) -> Result<String> {
        if title_from_prompt(prompt) == self.doomed_title {
            bail!("model unavailable for this request");
        }
        Ok("{\"front\": \"Q\", \"back\": \"A\"}".to_owned())
    }
}

/// Counts invocations and returns formatted text (for clarification flows)
/// or a card object depending on the prompt name.
struct CountingProvider {
    calls: AtomicUsize,
}

impl CountingProvider {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelProvider for CountingProvider {
    fn model_id(&self) -> &str {
        "counting"
    }

    async fn invoke(&self, prompt_name: &str, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match prompt_name {
            "clarification" => Ok("Because the base case stops the recursion.".to_owned()),
            _ => Ok("{\"front\": \"Q\", \"back\": \"A\"}".to_owned()),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn initialize_all_is_idempotent_and_seeds_quiz_rows() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();

    let nodes = vec![
        study_node("Recursion", 1),
        study_node("Iteration", 1),
        quiz_node("Checkpoint", 2),
    ];

    initialize_all(pool, curriculum_id, &nodes).await.unwrap();
    initialize_all(pool, curriculum_id, &nodes).await.unwrap();

    let entries = content_cache::list_for_curriculum(pool, curriculum_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 3, "repeat initialize must not duplicate rows");

    let quiz_entry = entries
        .iter()
        .find(|e| e.node_id == nodes[2].id)
        .expect("quiz row seeded");
    assert_eq!(quiz_entry.generation_status, GenerationStatus::QuizPending);
    assert_eq!(quiz_entry.node_kind, NodeKind::Quiz);

    for study_entry in entries.iter().filter(|e| e.node_id != nodes[2].id) {
        assert_eq!(study_entry.generation_status, GenerationStatus::Pending);
        assert_eq!(study_entry.question_fingerprint, None);
    }

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn generate_all_completes_study_nodes_and_skips_quizzes() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();

    let nodes = vec![
        study_node("Recursion", 1),
        study_node("Iteration", 1),
        quiz_node("Checkpoint", 2),
    ];
    initialize_all(pool, curriculum_id, &nodes).await.unwrap();

    let client = test_client(Arc::new(RecordingProvider::new()));
    let report = generate_all(
        pool,
        &client,
        curriculum_id,
        &nodes,
        &course_context(),
        &test_config(),
    )
    .await
    .unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 0);

    let entries = content_cache::list_for_curriculum(pool, curriculum_id)
        .await
        .unwrap();
    for entry in &entries {
        match entry.node_kind {
            NodeKind::Study => {
                assert_eq!(entry.generation_status, GenerationStatus::Completed);
                assert!(!entry.payload.is_empty());
                assert!(entry.started_at.is_some());
                assert!(entry.completed_at.is_some());
            }
            NodeKind::Quiz => {
                assert_eq!(entry.generation_status, GenerationStatus::QuizPending);
                assert!(entry.payload.is_empty());
            }
        }
    }

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completed_nodes_are_not_resubmitted() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();

    let nodes = vec![study_node("Recursion", 1), study_node("Iteration", 1)];
    initialize_all(pool, curriculum_id, &nodes).await.unwrap();

    let provider = Arc::new(CountingProvider::new());
    let client = test_client(provider.clone());

    let first = generate_all(
        pool,
        &client,
        curriculum_id,
        &nodes,
        &course_context(),
        &test_config(),
    )
    .await
    .unwrap();
    assert_eq!(first.completed, 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

    let second = generate_all(
        pool,
        &client,
        curriculum_id,
        &nodes,
        &course_context(),
        &test_config(),
    )
    .await
    .unwrap();
    assert_eq!(second.skipped, 2, "repeat run skips satisfied nodes");
    assert_eq!(second.completed, 0);
    assert_eq!(
        provider.calls.load(Ordering::SeqCst),
        2,
        "no model call for already-completed nodes"
    );

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn layers_generate_in_ascending_order() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();

    // Layers [1, 2, 2, 3] with concurrency 3: the single layer-1 node must
    // settle before either layer-2 node is submitted.
    let nodes = vec![
        study_node("Basics", 1),
        study_node("Branching", 2),
        study_node("Loops", 2),
        study_node("Functions", 3),
    ];
    let layer_of: HashMap<String, i32> = nodes
        .iter()
        .map(|n| (n.title.clone(), n.layer))
        .collect();

    initialize_all(pool, curriculum_id, &nodes).await.unwrap();

    let provider = Arc::new(RecordingProvider::new());
    let client = test_client(provider.clone());
    generate_all(
        pool,
        &client,
        curriculum_id,
        &nodes,
        &course_context(),
        &test_config(),
    )
    .await
    .unwrap();

    let layers_in_order: Vec<i32> = provider
        .titles()
        .iter()
        .map(|title| layer_of[title])
        .collect();
    assert_eq!(layers_in_order.len(), 4);
    let mut sorted = layers_in_order.clone();
    sorted.sort_unstable();
    assert_eq!(
        layers_in_order, sorted,
        "a later layer must never be submitted before an earlier one settles"
    );

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_failing_node_does_not_poison_its_layer() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();

    let nodes = vec![
        study_node("Recursion", 1),
        study_node("Iteration", 1),
        study_node("Memoization", 1),
    ];
    initialize_all(pool, curriculum_id, &nodes).await.unwrap();

    let client = test_client(Arc::new(SelectiveFailProvider {
        doomed_title: "Iteration".to_owned(),
    }));
    let report = generate_all(
        pool,
        &client,
        curriculum_id,
        &nodes,
        &course_context(),
        &test_config(),
    )
    .await
    .unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);

    let entries = content_cache::list_for_curriculum(pool, curriculum_id)
        .await
        .unwrap();
    let failed: Vec<_> = entries
        .iter()
        .filter(|e| e.generation_status == GenerationStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].node_id, nodes[1].id);
    assert!(
        failed[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("model unavailable")),
        "failed row carries the cause"
    );
    // The layer is done: every row is terminal.
    assert!(entries.iter().all(|e| e.generation_status.is_terminal()));

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_nodes_stay_failed_on_rerun() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();

    let nodes = vec![study_node("Recursion", 1), study_node("Iteration", 1)];
    initialize_all(pool, curriculum_id, &nodes).await.unwrap();

    let failing_client = test_client(Arc::new(SelectiveFailProvider {
        doomed_title: "Iteration".to_owned(),
    }));
    generate_all(
        pool,
        &failing_client,
        curriculum_id,
        &nodes,
        &course_context(),
        &test_config(),
    )
    .await
    .unwrap();

    // A second pass with a healthy provider must not touch the failed row.
    let provider = Arc::new(CountingProvider::new());
    let healthy_client = test_client(provider.clone());
    let report = generate_all(
        pool,
        &healthy_client,
        curriculum_id,
        &nodes,
        &course_context(),
        &test_config(),
    )
    .await
    .unwrap();

    assert_eq!(report.skipped, 2, "completed and failed rows both skipped");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

    let entry = content_cache::find(
        pool,
        curriculum_id,
        nodes[1].id,
        ContentKind::KnowledgeCard,
        None,
    )
    .await
    .unwrap()
    .expect("row exists");
    assert_eq!(entry.generation_status, GenerationStatus::Failed);

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trigger_returns_before_generation_finishes() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();

    /// A provider slow enough that completion cannot have happened by the
    /// time the trigger call returns.
    struct SlowProvider;

    #[async_trait]
    impl ModelProvider for SlowProvider {
        fn model_id(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _prompt_name: &str, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok("{\"front\": \"Q\", \"back\": \"A\"}".to_owned())
        }
    }

    let nodes = vec![study_node("Recursion", 1)];
    initialize_all(pool, curriculum_id, &nodes).await.unwrap();

    let client = test_client(Arc::new(SlowProvider));
    let handle = trigger_generate_all(
        pool.clone(),
        client,
        curriculum_id,
        nodes.clone(),
        course_context(),
        test_config(),
    );

    // Immediately after the trigger the node must not be completed yet.
    let entry = content_cache::find(
        pool,
        curriculum_id,
        nodes[0].id,
        ContentKind::KnowledgeCard,
        None,
    )
    .await
    .unwrap()
    .expect("row exists");
    assert_ne!(entry.generation_status, GenerationStatus::Completed);

    handle.await.expect("background task should not panic");

    let entry = content_cache::find(
        pool,
        curriculum_id,
        nodes[0].id,
        ContentKind::KnowledgeCard,
        None,
    )
    .await
    .unwrap()
    .expect("row exists");
    assert_eq!(entry.generation_status, GenerationStatus::Completed);

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn generate_now_caches_knowledge_cards() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();
    let node = study_node("Recursion", 1);

    let provider = Arc::new(CountingProvider::new());
    let client = test_client(provider.clone());

    let first = generate_now(
        pool,
        &client,
        curriculum_id,
        &node,
        &course_context(),
        None,
        &test_config(),
    )
    .await
    .unwrap();
    assert_eq!(first.generation_status, GenerationStatus::Completed);
    assert!(!first.payload.is_empty());

    let second = generate_now(
        pool,
        &client,
        curriculum_id,
        &node,
        &course_context(),
        None,
        &test_config(),
    )
    .await
    .unwrap();
    assert_eq!(second.id, first.id, "repeat call returns the cached row");
    assert_eq!(
        provider.calls.load(Ordering::SeqCst),
        1,
        "cached material is not regenerated"
    );

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn generate_now_scopes_clarifications_by_question() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();
    let curriculum_id = Uuid::new_v4();
    let node = study_node("Recursion", 1);

    let provider = Arc::new(CountingProvider::new());
    let client = test_client(provider.clone());
    let context = course_context();
    let config = test_config();

    // Card plus two distinct questions: three rows for the same node.
    generate_now(pool, &client, curriculum_id, &node, &context, None, &config)
        .await
        .unwrap();
    let a = generate_now(
        pool,
        &client,
        curriculum_id,
        &node,
        &context,
        Some("What is a base case?"),
        &config,
    )
    .await
    .unwrap();
    let b = generate_now(
        pool,
        &client,
        curriculum_id,
        &node,
        &context,
        Some("Why does it terminate?"),
        &config,
    )
    .await
    .unwrap();

    assert_eq!(a.content_kind, ContentKind::Clarification);
    assert!(a.question_fingerprint.is_some());
    assert_ne!(a.question_fingerprint, b.question_fingerprint);

    // Re-asking the same question (modulo case/whitespace) hits the cache.
    let again = generate_now(
        pool,
        &client,
        curriculum_id,
        &node,
        &context,
        Some("what is  a base case?"),
        &config,
    )
    .await
    .unwrap();
    assert_eq!(again.id, a.id);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    let entries = content_cache::list_for_curriculum(pool, curriculum_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 3, "card and clarifications coexist");

    harness.teardown().await;
}
