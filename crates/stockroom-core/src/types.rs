//! # Domain Types
//!
//! Core domain types used throughout Stockroom.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Item       │   │      Staff      │   │  CheckoutLog    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  name, barcode  │   │  name, dept     │   │  item_id (FK)   │       │
//! │  │  is_active      │   │  is_active      │   │  staff_id (FK)  │       │
//! │  │  last_modified  │   │  last_modified  │   │  last_modified  │       │
//! │  └────────┬────────┘   └────────┬────────┘   └────────┬────────┘       │
//! │           └─────────────────────┼─────────────────────┘                 │
//! │                                 ▼                                       │
//! │                     Entity (tagged by EntityKind)                       │
//! │                                 │                                       │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ PendingOperation { op type, payload snapshot, attempts }        │   │
//! │  │ DeadLetteredOperation { raw payload, reason }                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Last-Writer-Wins
//! Every entity carries `last_modified` (milliseconds since epoch). A stored
//! record is only replaced by a version with a strictly greater timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

// =============================================================================
// Entity Kind
// =============================================================================

/// The three record kinds the sync core manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    Staff,
    CheckoutLog,
}

impl EntityKind {
    /// All kinds, in the order the engine pulls remote snapshots.
    pub const ALL: [EntityKind; 3] = [EntityKind::Item, EntityKind::Staff, EntityKind::CheckoutLog];

    /// Stable string form (matches the database representation).
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::Staff => "staff",
            EntityKind::CheckoutLog => "checkout_log",
        }
    }

    /// Whether this kind is soft-deleted through an `is_active` flag.
    pub const fn has_active_flag(&self) -> bool {
        !matches!(self, EntityKind::CheckoutLog)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "item" | "items" => Ok(EntityKind::Item),
            "staff" => Ok(EntityKind::Staff),
            "checkout_log" | "checkoutlog" | "log" | "logs" => Ok(EntityKind::CheckoutLog),
            other => Err(CoreError::UnknownEntityKind(other.to_string())),
        }
    }
}

// =============================================================================
// Operation Type
// =============================================================================

/// The kind of mutation a pending operation carries to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Create,
    Update,
    /// Soft delete (archive / check-in complete).
    Delete,
}

impl OperationType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATE" => Ok(OperationType::Create),
            "UPDATE" => Ok(OperationType::Update),
            "DELETE" | "ARCHIVE" => Ok(OperationType::Delete),
            other => Err(CoreError::UnknownOperationType(other.to_string())),
        }
    }
}

// =============================================================================
// Item
// =============================================================================

/// A piece of tracked equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name.
    pub name: String,

    /// Scanned barcode, if the item has one.
    #[serde(default)]
    pub barcode: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Free-form condition note ("good", "needs repair", ...).
    #[serde(default)]
    pub condition: Option<String>,

    /// Soft delete flag.
    pub is_active: bool,

    pub last_modified: Timestamp,
}

impl Item {
    /// Creates an active item with a fresh UUID.
    pub fn new(name: impl Into<String>, last_modified: Timestamp) -> Self {
        Item {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            barcode: None,
            category: None,
            description: None,
            condition: None,
            is_active: true,
            last_modified,
        }
    }
}

// =============================================================================
// Staff
// =============================================================================

/// A staff member who can check items out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    pub id: String,
    pub name: String,
    pub department: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    /// Soft delete flag.
    pub is_active: bool,
    pub last_modified: Timestamp,
}

impl Staff {
    /// Creates an active staff member with a fresh UUID.
    pub fn new(
        name: impl Into<String>,
        department: impl Into<String>,
        last_modified: Timestamp,
    ) -> Self {
        Staff {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            department: department.into(),
            email: None,
            phone: None,
            position: None,
            is_active: true,
            last_modified,
        }
    }
}

// =============================================================================
// Checkout Log
// =============================================================================

/// A record of an item leaving with a staff member.
///
/// Logs have no active flag; "deleting" one completes the check-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLog {
    pub id: String,
    pub item_id: String,
    pub staff_id: String,
    pub checkout_time: Timestamp,
    /// Set once the item is returned.
    #[serde(default)]
    pub checkin_time: Option<Timestamp>,
    pub last_modified: Timestamp,
}

impl CheckoutLog {
    /// Opens a checkout of `item_id` by `staff_id` at `now`.
    pub fn open(item_id: impl Into<String>, staff_id: impl Into<String>, now: Timestamp) -> Self {
        CheckoutLog {
            id: Uuid::new_v4().to_string(),
            item_id: item_id.into(),
            staff_id: staff_id.into(),
            checkout_time: now,
            checkin_time: None,
            last_modified: now,
        }
    }

    /// Returns true while the item is still out.
    pub fn is_open(&self) -> bool {
        self.checkin_time.is_none()
    }
}

// =============================================================================
// Entity
// =============================================================================

/// Any record the sync core stores, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Item(Item),
    Staff(Staff),
    CheckoutLog(CheckoutLog),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Item(_) => EntityKind::Item,
            Entity::Staff(_) => EntityKind::Staff,
            Entity::CheckoutLog(_) => EntityKind::CheckoutLog,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Item(item) => &item.id,
            Entity::Staff(staff) => &staff.id,
            Entity::CheckoutLog(log) => &log.id,
        }
    }

    pub fn last_modified(&self) -> Timestamp {
        match self {
            Entity::Item(item) => item.last_modified,
            Entity::Staff(staff) => staff.last_modified,
            Entity::CheckoutLog(log) => log.last_modified,
        }
    }

    pub fn set_last_modified(&mut self, at: Timestamp) {
        match self {
            Entity::Item(item) => item.last_modified = at,
            Entity::Staff(staff) => staff.last_modified = at,
            Entity::CheckoutLog(log) => log.last_modified = at,
        }
    }

    /// The soft-delete flag, or `None` for kinds without one.
    pub fn is_active(&self) -> Option<bool> {
        match self {
            Entity::Item(item) => Some(item.is_active),
            Entity::Staff(staff) => Some(staff.is_active),
            Entity::CheckoutLog(_) => None,
        }
    }

    /// Applies the soft-delete for this kind and stamps `now`.
    ///
    /// Items and staff become inactive; an open checkout log is checked in.
    pub fn soft_delete(&mut self, now: Timestamp) {
        match self {
            Entity::Item(item) => item.is_active = false,
            Entity::Staff(staff) => staff.is_active = false,
            Entity::CheckoutLog(log) => {
                if log.checkin_time.is_none() {
                    log.checkin_time = Some(now);
                }
            }
        }
        self.set_last_modified(now);
    }

    /// Returns true if `self` should replace `stored` under last-writer-wins.
    ///
    /// Equal timestamps keep the stored record.
    #[inline]
    pub fn supersedes(&self, stored: &Entity) -> bool {
        self.last_modified() > stored.last_modified()
    }

    /// Serializes the kind-specific record (without the kind tag).
    pub fn to_payload(&self) -> CoreResult<String> {
        let json = match self {
            Entity::Item(item) => serde_json::to_string(item)?,
            Entity::Staff(staff) => serde_json::to_string(staff)?,
            Entity::CheckoutLog(log) => serde_json::to_string(log)?,
        };
        Ok(json)
    }

    /// Parses a payload produced by [`Entity::to_payload`].
    pub fn from_payload(kind: EntityKind, payload: &str) -> CoreResult<Self> {
        let entity = match kind {
            EntityKind::Item => Entity::Item(serde_json::from_str(payload)?),
            EntityKind::Staff => Entity::Staff(serde_json::from_str(payload)?),
            EntityKind::CheckoutLog => Entity::CheckoutLog(serde_json::from_str(payload)?),
        };
        Ok(entity)
    }

    pub fn as_item(&self) -> Option<&Item> {
        match self {
            Entity::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_staff(&self) -> Option<&Staff> {
        match self {
            Entity::Staff(staff) => Some(staff),
            _ => None,
        }
    }

    pub fn as_checkout_log(&self) -> Option<&CheckoutLog> {
        match self {
            Entity::CheckoutLog(log) => Some(log),
            _ => None,
        }
    }
}

impl From<Item> for Entity {
    fn from(item: Item) -> Self {
        Entity::Item(item)
    }
}

impl From<Staff> for Entity {
    fn from(staff: Staff) -> Self {
        Entity::Staff(staff)
    }
}

impl From<CheckoutLog> for Entity {
    fn from(log: CheckoutLog) -> Self {
        Entity::CheckoutLog(log)
    }
}

// =============================================================================
// Pending Operation
// =============================================================================

/// A local mutation not yet confirmed by the remote store.
///
/// Uses the outbox pattern: written in the same transaction as the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PendingOperation {
    /// Operation ID (UUID v4). Retries reuse it.
    pub id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub operation_type: OperationType,
    /// Serialized snapshot of the post-mutation entity.
    pub payload: String,
    pub created_at: Timestamp,
    /// Number of failed drain cycles so far.
    pub attempts: i64,
    /// Last error message if a drain failed.
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Captures `entity` as a new pending operation.
    pub fn capture(
        operation_type: OperationType,
        entity: &Entity,
        created_at: Timestamp,
    ) -> CoreResult<Self> {
        Ok(PendingOperation {
            id: Uuid::new_v4().to_string(),
            entity_kind: entity.kind(),
            entity_id: entity.id().to_string(),
            operation_type,
            payload: entity.to_payload()?,
            created_at,
            attempts: 0,
            last_error: None,
        })
    }

    /// Decodes the payload snapshot.
    pub fn entity(&self) -> CoreResult<Entity> {
        let entity = Entity::from_payload(self.entity_kind, &self.payload)?;
        if entity.id() != self.entity_id {
            return Err(CoreError::EntityIdMismatch {
                expected: self.entity_id.clone(),
                actual: entity.id().to_string(),
            });
        }
        Ok(entity)
    }

    /// Key that operations on the same record share.
    pub fn partition_key(&self) -> (EntityKind, &str) {
        (self.entity_kind, self.entity_id.as_str())
    }
}

// =============================================================================
// Dead Letters
// =============================================================================

/// Why an operation left the queue without reaching the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The stored payload could not be decoded.
    MalformedPayload,
    /// The remote store permanently refused the operation.
    Rejected,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::MalformedPayload => write!(f, "malformed_payload"),
            DeadLetterReason::Rejected => write!(f, "rejected"),
        }
    }
}

/// An operation parked for manual inspection, raw payload preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DeadLetteredOperation {
    /// ID of the original pending operation.
    pub id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub operation_type: OperationType,
    pub raw_payload: String,
    pub reason: DeadLetterReason,
    pub detail: String,
    pub created_at: Timestamp,
    pub dead_lettered_at: Timestamp,
}

impl DeadLetteredOperation {
    pub fn from_operation(
        op: &PendingOperation,
        reason: DeadLetterReason,
        detail: impl Into<String>,
        dead_lettered_at: Timestamp,
    ) -> Self {
        DeadLetteredOperation {
            id: op.id.clone(),
            entity_kind: op.entity_kind,
            entity_id: op.entity_id.clone(),
            operation_type: op.operation_type,
            raw_payload: op.payload.clone(),
            reason,
            detail: detail.into(),
            created_at: op.created_at,
            dead_lettered_at,
        }
    }

    /// Rebuilds a fresh pending operation (attempts reset) for requeueing.
    pub fn to_operation(&self) -> PendingOperation {
        PendingOperation {
            id: self.id.clone(),
            entity_kind: self.entity_kind,
            entity_id: self.entity_id.clone(),
            operation_type: self.operation_type,
            payload: self.raw_payload.clone(),
            created_at: self.created_at,
            attempts: 0,
            last_error: None,
        }
    }
}

/// One row of a queue snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    /// A decodable operation ready to be sent.
    Operation {
        op: PendingOperation,
        entity: Entity,
    },
    /// An operation whose payload could not be decoded.
    DeadLettered(DeadLetteredOperation),
}

impl QueueEntry {
    /// Classifies a raw queued operation by decoding its payload.
    pub fn classify(op: PendingOperation, now: Timestamp) -> Self {
        match op.entity() {
            Ok(entity) => QueueEntry::Operation { op, entity },
            Err(e) => QueueEntry::DeadLettered(DeadLetteredOperation::from_operation(
                &op,
                DeadLetterReason::MalformedPayload,
                e.to_string(),
                now,
            )),
        }
    }

    pub fn operation_id(&self) -> &str {
        match self {
            QueueEntry::Operation { op, .. } => &op.id,
            QueueEntry::DeadLettered(dead) => &dead.id,
        }
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Aggregate health of the sync engine, broadcast to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    Idle,
    InProgress,
    /// Every operation in the last drain succeeded.
    Complete,
    /// Some operations in the last drain are still queued.
    Partial,
    /// The last drain aborted on an engine-level fault.
    Failed,
    /// No connectivity when a drain was requested.
    Offline,
}

impl SyncStatus {
    /// Returns true for states that end a drain cycle.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SyncStatus::Complete | SyncStatus::Partial | SyncStatus::Failed | SyncStatus::Offline
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Idle => "IDLE",
            SyncStatus::InProgress => "IN_PROGRESS",
            SyncStatus::Complete => "COMPLETE",
            SyncStatus::Partial => "PARTIAL",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Offline => "OFFLINE",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
