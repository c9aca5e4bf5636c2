//! Core data models for the chunked upload service.
//!
//! These entities represent upload sessions and their parts. They map
//! cleanly to database tables via `sqlx::FromRow` and serialize naturally
//! as JSON via `serde`.

pub mod session;
