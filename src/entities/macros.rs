//! Macros for reducing boilerplate when defining auditable entities
//!
//! Every stored type carries the same audit envelope and the same trait
//! implementation; only its own fields and its join fields differ.

/// Create an auditable entity with automatic trait implementations
///
/// The generated struct has:
/// - `id: i64`, defaulting to `0` when absent from input
/// - the given fields, with their attributes passed through (serde, validator)
/// - `created_at`, `last_changed_at`, `created_by`, `last_changed_by`, which are
///   never serialized and are overwritten by the persistence layer
///
/// Fields listed under `joins` become [`JoinField`](crate::core::entity::JoinField)s
/// that relations can be declared on. They must be `i64` or `Option<i64>`.
///
/// # Example
///
/// ```rust,ignore
/// use gateway::prelude::*;
///
/// impl_auditable_entity!(
///     /// A result produced by a job
///     JobResult,
///     "job_result",
///     "job_results",
///     {
///         #[validate(range(min = 1))]
///         job_id: i64,
///         #[serde(default)]
///         blob: Option<String>,
///     },
///     joins [job_id]
/// );
///
/// let result = JobResult::new(7, Some("...".into()));
/// assert_eq!(result.id, 0);
/// ```
#[macro_export]
macro_rules! impl_auditable_entity {
    (
        $(#[$meta:meta])*
        $type:ident,
        $singular:expr,
        $plural:expr,
        {
            $( $(#[$field_meta:meta])* $field:ident : $field_type:ty ),* $(,)?
        }
        $(, joins [ $( $join:ident ),* $(,)? ] )?
        $(,)?
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::validator::Validate
        )]
        pub struct $type {
            /// Surrogate key, `0` until persisted
            #[serde(default)]
            pub id: i64,

            $(
                $(#[$field_meta])*
                pub $field : $field_type,
            )*

            #[serde(default, skip_serializing)]
            pub created_at: Option<::chrono::DateTime<::chrono::Utc>>,

            #[serde(default, skip_serializing)]
            pub last_changed_at: Option<::chrono::DateTime<::chrono::Utc>>,

            #[serde(default, skip_serializing)]
            pub created_by: Option<String>,

            #[serde(default, skip_serializing)]
            pub last_changed_by: Option<String>,
        }

        impl $crate::core::entity::Entity for $type {
            fn resource_name() -> &'static str {
                $plural
            }

            fn resource_name_singular() -> &'static str {
                $singular
            }

            fn id(&self) -> i64 {
                self.id
            }

            fn set_id(&mut self, id: i64) {
                self.id = id;
            }

            fn envelope(&self) -> $crate::core::entity::AuditEnvelope {
                $crate::core::entity::AuditEnvelope {
                    id: self.id,
                    created_at: self.created_at,
                    last_changed_at: self.last_changed_at,
                    created_by: self.created_by.clone(),
                    last_changed_by: self.last_changed_by.clone(),
                }
            }

            fn set_envelope(&mut self, envelope: $crate::core::entity::AuditEnvelope) {
                self.id = envelope.id;
                self.created_at = envelope.created_at;
                self.last_changed_at = envelope.last_changed_at;
                self.created_by = envelope.created_by;
                self.last_changed_by = envelope.last_changed_by;
            }

            fn join_fields() -> Vec<$crate::core::entity::JoinField<Self>> {
                vec![
                    $($(
                        $crate::core::entity::JoinField::new(
                            stringify!($join),
                            |record: &$type| {
                                $crate::core::entity::JoinValue::join_value(&record.$join)
                            },
                        ),
                    )*)?
                ]
            }
        }

        impl $type {
            /// Create a new, not yet persisted instance of this entity
            #[allow(clippy::too_many_arguments)]
            pub fn new($( $field: $field_type ),*) -> Self {
                Self {
                    id: 0,
                    $( $field, )*
                    created_at: None,
                    last_changed_at: None,
                    created_by: None,
                    last_changed_by: None,
                }
            }
        }
    };
}
