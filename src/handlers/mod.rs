//! HTTP handlers, split by concern: session lifecycle, part transfer, and
//! health probes.

pub mod health_handlers;
pub mod part_handlers;
pub mod upload_handlers;
