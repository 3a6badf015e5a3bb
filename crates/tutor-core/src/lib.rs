//! Content generation pipeline for a personalized learning backend.
//!
//! Turns curriculum graphs handed over by the planning collaborator into
//! generated study material: a completion client that calls a generative
//! model with retries and output validation, a persistent content cache
//! keyed by curriculum position, a bounded-concurrency orchestrator that
//! fills a whole curriculum layer by layer without blocking the caller, and
//! a startup recovery supervisor that repairs generation state after a
//! crash.

pub mod completion;
pub mod curriculum;
pub mod orchestrator;
pub mod recovery;
pub mod validator;
