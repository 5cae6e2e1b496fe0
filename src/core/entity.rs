//! Entity traits defining the core abstraction for all auditable record types

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use validator::Validate;

/// The audit envelope every stored record carries.
///
/// - id: surrogate key, `0` until the record has been persisted
/// - created_at / created_by: set once, on the first successful persist
/// - last_changed_at / last_changed_by: refreshed on every persist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditEnvelope {
    pub id: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub last_changed_by: Option<String>,
}

/// Base trait for all entities served by the gateway.
///
/// Entity types are registered statically; nothing here relies on runtime
/// type inspection. Relationship resolution works off [`Entity::join_fields`].
pub trait Entity:
    fmt::Debug + Clone + Send + Sync + Serialize + DeserializeOwned + Validate + 'static
{
    /// The plural resource name used in URLs (e.g., "jobs")
    fn resource_name() -> &'static str;

    /// The singular resource name (e.g., "job"), used for access rules
    fn resource_name_singular() -> &'static str;

    /// Get the surrogate key, `0` when not yet persisted
    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    /// Snapshot of the audit fields
    fn envelope(&self) -> AuditEnvelope;

    /// Overwrite all audit fields, including the id
    fn set_envelope(&mut self, envelope: AuditEnvelope);

    /// The integer foreign-key fields of this type that relations may join on
    fn join_fields() -> Vec<JoinField<Self>> {
        Vec::new()
    }

    /// Look up a declared join field by name
    fn join_field(name: &str) -> Option<JoinField<Self>> {
        Self::join_fields().into_iter().find(|f| f.name() == name)
    }

    fn is_persisted(&self) -> bool {
        self.id() != 0
    }
}

/// A named accessor for one integer foreign-key field of `T`
pub struct JoinField<T> {
    name: &'static str,
    read: fn(&T) -> Option<i64>,
}

impl<T> JoinField<T> {
    pub const fn new(name: &'static str, read: fn(&T) -> Option<i64>) -> Self {
        Self { name, read }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Read the join value from a record; `None` when the reference is unset
    pub fn value(&self, record: &T) -> Option<i64> {
        (self.read)(record)
    }
}

impl<T> Clone for JoinField<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for JoinField<T> {}

impl<T> fmt::Debug for JoinField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinField").field("name", &self.name).finish()
    }
}

/// Field types that can act as a join value
pub trait JoinValue {
    fn join_value(&self) -> Option<i64>;
}

impl JoinValue for i64 {
    fn join_value(&self) -> Option<i64> {
        Some(*self)
    }
}

impl JoinValue for Option<i64> {
    fn join_value(&self) -> Option<i64> {
        *self
    }
}
