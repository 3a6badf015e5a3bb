//! Curriculum input types and the store seam.
//!
//! Node descriptors and course context are produced by the external
//! curriculum planner; this pipeline only reads them. The
//! [`CurriculumStore`] trait is the seam through which the recovery
//! supervisor reloads them after a restart.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tutor_db::models::NodeKind;

/// One unit of the curriculum graph, as handed over by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumNodeDescriptor {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub kind: NodeKind,
    /// Topological depth within the curriculum graph; generation proceeds
    /// layer by layer in ascending order.
    pub layer: i32,
    pub estimated_minutes: i32,
}

/// Course-level framing included in every generation prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseContext {
    pub name: String,
    pub rationale: String,
    pub level: String,
    pub mode: String,
    pub language: String,
}

/// A curriculum as reloaded for recovery: its nodes plus course context.
#[derive(Debug, Clone)]
pub struct Curriculum {
    pub nodes: Vec<CurriculumNodeDescriptor>,
    pub context: CourseContext,
}

/// Read access to the external curriculum store.
///
/// Object-safe so the recovery supervisor can hold `Arc<dyn
/// CurriculumStore>`; the production implementation lives with the
/// request-handling layer that owns the curriculum tables.
#[async_trait]
pub trait CurriculumStore: Send + Sync {
    /// Load a curriculum's node descriptors and course context.
    ///
    /// `None` when the curriculum no longer exists (deleted between crash
    /// and restart).
    async fn load(&self, curriculum_id: Uuid) -> Result<Option<Curriculum>>;
}

// Compile-time assertion: CurriculumStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CurriculumStore) {}
};
