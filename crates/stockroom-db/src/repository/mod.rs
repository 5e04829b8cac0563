//! # Repository Module
//!
//! Database repository implementations for Stockroom.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  SyncEngine                                                            │
//! │       │                                                                 │
//! │       │  db.entities().get(EntityKind::Item, id)                        │
//! │       ▼                                                                 │
//! │  EntityRepository              PendingOperationRepository              │
//! │  ├── get / get_all             ├── enqueue / all                       │
//! │  ├── put (LWW)                 ├── remove / record_attempt             │
//! │  └── mark_synced / stale       └── has_pending_for                     │
//! │                                                                         │
//! │  DeadLetterRepository                                                  │
//! │  └── dead_letter / list / requeue / purge                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Statements that must run inside a caller's transaction live here as
//! `pub(crate)` helpers over `&mut SqliteConnection`.

pub mod dead_letter;
pub mod entity;
pub mod pending;
