//! Authorization for gateway operations
//!
//! Access is granted per (entity type, consumer key) as an [`Access`] flag set.
//! A request is allowed when the rule for its entity type and caller shares at
//! least one flag with what the operation requires. The reserved `admin`
//! consumer bypasses the registry entirely.

use crate::core::error::{ConfigError, GatewayError};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

/// A set of permission flags
///
/// `NONE` is the empty set and never satisfies a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Access(u8);

impl Access {
    pub const NONE: Access = Access(0);
    pub const READ: Access = Access(1 << 0);
    pub const INSERT: Access = Access(1 << 1);
    pub const UPDATE: Access = Access(1 << 2);
    pub const DELETE: Access = Access(1 << 3);
    pub const INSERT_READ: Access = Access(Self::INSERT.0 | Self::READ.0);
    pub const FULL: Access = Access(Self::READ.0 | Self::INSERT.0 | Self::UPDATE.0 | Self::DELETE.0);

    const NAMES: [(Access, &'static str); 4] = [
        (Access::READ, "Read"),
        (Access::INSERT, "Insert"),
        (Access::UPDATE, "Update"),
        (Access::DELETE, "Delete"),
    ];

    /// True when the two sets share at least one flag ("any of")
    pub const fn intersects(self, other: Access) -> bool {
        self.0 & other.0 != 0
    }

    /// True when every flag of `other` is in this set ("all of")
    pub const fn contains(self, other: Access) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        Access(self.0 | rhs.0)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// The four gateway operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// The flag an access rule must share for this operation
    pub fn required(self) -> Access {
        match self {
            Operation::Read => Access::READ,
            Operation::Insert => Access::INSERT,
            Operation::Update => Access::UPDATE,
            Operation::Delete => Access::DELETE,
        }
    }

    /// The HTTP verb this operation is served under
    pub fn verb(self) -> &'static str {
        match self {
            Operation::Read => "GET",
            Operation::Insert => "POST",
            Operation::Update => "PATCH",
            Operation::Delete => "DELETE",
        }
    }
}

/// The authenticated identity of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: i64,
    pub name: String,
    pub api_key: String,
    pub is_admin: bool,
}

/// Collects access rules during registration
#[derive(Debug, Default)]
pub struct AccessRegistryBuilder {
    rules: HashMap<(String, String), Access>,
}

impl AccessRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `access` on `entity_type` to the consumer holding `api_key`
    ///
    /// Granting twice for the same pair is a configuration error.
    pub fn grant(
        &mut self,
        entity_type: &str,
        api_key: &str,
        access: Access,
    ) -> Result<&mut Self, ConfigError> {
        let key = (entity_type.to_string(), api_key.to_string());
        if self.rules.contains_key(&key) {
            return Err(ConfigError::DuplicateAccessRule {
                entity_type: entity_type.to_string(),
                api_key: api_key.to_string(),
            });
        }

        tracing::debug!("Granting {} on {} to a consumer key", access, entity_type);
        self.rules.insert(key, access);
        Ok(self)
    }

    /// Freeze the rules; no rule can be added afterwards
    pub fn build(self) -> AccessRegistry {
        AccessRegistry { rules: self.rules }
    }
}

/// Immutable access rules, shared by all requests
#[derive(Debug, Default)]
pub struct AccessRegistry {
    rules: HashMap<(String, String), Access>,
}

impl AccessRegistry {
    /// The rule for a pair; absence means no access
    pub fn rule(&self, entity_type: &str, api_key: &str) -> Access {
        self.rules
            .get(&(entity_type.to_string(), api_key.to_string()))
            .copied()
            .unwrap_or(Access::NONE)
    }

    pub fn is_allowed(&self, entity_type: &str, caller: &Caller, operation: Operation) -> bool {
        caller.is_admin
            || self
                .rule(entity_type, &caller.api_key)
                .intersects(operation.required())
    }

    /// Allow or reject `operation` on `entity_type` for `caller`
    pub fn authorize(
        &self,
        entity_type: &str,
        caller: &Caller,
        operation: Operation,
    ) -> Result<(), GatewayError> {
        if self.is_allowed(entity_type, caller, operation) {
            return Ok(());
        }

        tracing::debug!(
            "Rejected {} on {} for consumer '{}'",
            operation.verb(),
            entity_type,
            caller.name
        );
        Err(GatewayError::Forbidden {
            entity_type: entity_type.to_string(),
            verb: operation.verb(),
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
