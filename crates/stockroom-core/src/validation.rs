//! # Validation Module
//!
//! Input validation for local mutations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI (out of process)                                          │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: SyncEngine::enqueue_mutation                                 │
//! │  └── THIS MODULE: ids, timestamps, required fields                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── PRIMARY KEY (kind, id)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Remote snapshots are not validated here; the remote store is authoritative.
//!
//! ## Usage
//! ```rust
//! use stockroom_core::validation::validate_entity;
//! use stockroom_core::{Entity, Item};
//!
//! let item = Entity::from(Item::new("Cordless drill", 1_700_000_000_000));
//! assert!(validate_entity(&item).is_ok());
//! ```

use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::{CheckoutLog, Entity, Item, Staff, Timestamp};
use crate::MAX_NAME_LENGTH;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates an entity id: non-empty and a well-formed UUID.
///
/// ## Example
/// ```rust
/// use stockroom_core::validation::validate_entity_id;
///
/// assert!(validate_entity_id("id", "7f4f5f0e-3c43-4a5e-9d1c-1f0b6c3b9a01").is_ok());
/// assert!(validate_entity_id("id", "").is_err());
/// assert!(validate_entity_id("id", "not-a-uuid").is_err());
/// ```
pub fn validate_entity_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    Uuid::parse_str(id).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    Ok(())
}

/// Validates a millisecond timestamp. Zero is allowed.
pub fn validate_timestamp(field: &str, at: Timestamp) -> ValidationResult<()> {
    if at < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LENGTH,
        });
    }

    Ok(())
}

// =============================================================================
// Entity Validators
// =============================================================================

fn validate_item(item: &Item) -> ValidationResult<()> {
    validate_entity_id("id", &item.id)?;
    validate_name("name", &item.name)?;
    validate_timestamp("last_modified", item.last_modified)
}

fn validate_staff(staff: &Staff) -> ValidationResult<()> {
    validate_entity_id("id", &staff.id)?;
    validate_name("name", &staff.name)?;
    validate_name("department", &staff.department)?;
    validate_timestamp("last_modified", staff.last_modified)
}

fn validate_checkout_log(log: &CheckoutLog) -> ValidationResult<()> {
    validate_entity_id("id", &log.id)?;
    validate_entity_id("item_id", &log.item_id)?;
    validate_entity_id("staff_id", &log.staff_id)?;
    validate_timestamp("checkout_time", log.checkout_time)?;
    validate_timestamp("last_modified", log.last_modified)?;

    if let Some(checkin) = log.checkin_time {
        if checkin < log.checkout_time {
            return Err(ValidationError::OutOfOrder {
                field: "checkin_time".to_string(),
                other: "checkout_time".to_string(),
            });
        }
    }

    Ok(())
}

/// Validates the kind-specific required fields of an entity.
///
/// ## Rules
/// - Every id is a UUID
/// - Items need a name; staff need a name and department
/// - Logs reference an item and a staff member; check-in is not before checkout
/// - Timestamps are non-negative
pub fn validate_entity(entity: &Entity) -> ValidationResult<()> {
    match entity {
        Entity::Item(item) => validate_item(item),
        Entity::Staff(staff) => validate_staff(staff),
        Entity::CheckoutLog(log) => validate_checkout_log(log),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entity_id() {
        assert!(validate_entity_id("id", &Uuid::new_v4().to_string()).is_ok());
        assert!(matches!(
            validate_entity_id("id", "  "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_entity_id("item_id", "drill-01"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_validate_timestamp() {
        assert!(validate_timestamp("last_modified", 0).is_ok());
        assert!(validate_timestamp("last_modified", -1).is_err());
    }

    #[test]
    fn test_validate_item_requires_name() {
        let mut item = Item::new("Ladder", 10);
        assert!(validate_entity(&Entity::from(item.clone())).is_ok());

        item.name = "   ".to_string();
        let err = validate_entity(&Entity::from(item)).unwrap_err();
        assert_eq!(err.to_string(), "name is required");
    }

    #[test]
    fn test_validate_staff_requires_department() {
        let staff = Staff::new("Ana", "", 10);
        let err = validate_entity(&Entity::from(staff)).unwrap_err();
        assert_eq!(err.to_string(), "department is required");
    }

    #[test]
    fn test_validate_log_checkin_order() {
        let item = Uuid::new_v4().to_string();
        let staff = Uuid::new_v4().to_string();
        let mut log = CheckoutLog::open(item, staff, 1_000);
        assert!(validate_entity(&Entity::from(log.clone())).is_ok());

        log.checkin_time = Some(999);
        assert!(matches!(
            validate_entity(&Entity::from(log)),
            Err(ValidationError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_name_too_long() {
        let item = Item::new("x".repeat(MAX_NAME_LENGTH + 1), 1);
        assert!(matches!(
            validate_entity(&Entity::from(item)),
            Err(ValidationError::TooLong { .. })
        ));
    }
}
