//! Persistence layer for the content generation pipeline.
//!
//! Owns the connection pool, the embedded migrations, the row models for the
//! `content_cache` table, and the query functions that read and mutate it.
//! Everything above this crate talks to PostgreSQL exclusively through the
//! functions exported here.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
