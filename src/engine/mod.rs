// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the ingest queue between watchers and the writer ([`queue`])
//! - the single writer task that owns the store ([`writer`])
//! - the supervisor that starts, runs and drains everything ([`supervisor`])

pub mod queue;
pub mod supervisor;
pub mod writer;

pub use crate::types::RunMode;
pub use queue::{ingest_queue, IngestReceiver, IngestSender, QueueClosed, QueueStats};
pub use supervisor::{shutdown_signal, RunningService, ServiceSummary, Supervisor};
pub use writer::{clamp_event_times, EventWriter, WriterStats, WriterStatsSnapshot};
