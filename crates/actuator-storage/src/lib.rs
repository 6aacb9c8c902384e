//! Actuator Storage crate - SQLite persistence for the execution fabric.
//!
//! Provides a WAL-mode SQLite database with migrations and one repository
//! per durable record: breaker state, concurrency slots, reserve/publish
//! state, autonomy budgets, dedupe records, governance, intents, the
//! outbox and audit log, and the TTL purge sweep.

pub mod auto_exec;
pub mod breaker;
pub mod budget;
pub mod db;
pub mod dedupe;
pub mod governance;
pub mod intents;
pub mod migrations;
pub mod notes;
pub mod outbox;
pub mod purge;
pub mod slots;

pub use auto_exec::{AutoExecRecord, AutoExecRepository};
pub use breaker::{BreakerRecord, BreakerRepository};
pub use budget::{BudgetConfigRecord, BudgetRepository, BudgetStateRecord};
pub use db::Database;
pub use dedupe::{DedupeRecord, DedupeRepository};
pub use governance::GovernanceRepository;
pub use intents::IntentRepository;
pub use notes::{NoteRecord, NoteRepository};
pub use outbox::{AuditRow, OutboxEvent, OutboxRepository};
pub use purge::{purge_expired, PurgeResult};
pub use slots::SlotRepository;
