//! The `ModelProvider` trait -- the adapter interface for generative models.
//!
//! Each concrete provider (a hosted API, the deterministic scripted double,
//! in-test mocks) implements this trait. The trait is object-safe so it can
//! be stored as `Arc<dyn ModelProvider>` inside the completion client.

use anyhow::Result;
use async_trait::async_trait;

/// Adapter interface for issuing one model invocation.
///
/// `invoke` performs a single attempt with no retry of its own; retry,
/// backoff, and timeout policy live in the completion client. `prompt_name`
/// identifies the template the prompt was built from and is available for
/// routing or telemetry; providers are free to ignore it.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Identifier of the underlying model (e.g. "scripted", a vendor id).
    fn model_id(&self) -> &str;

    /// Issue one completion request and return the raw output text.
    async fn invoke(&self, prompt_name: &str, prompt: &str) -> Result<String>;
}

// Compile-time assertion: ModelProvider must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ModelProvider) {}
};
