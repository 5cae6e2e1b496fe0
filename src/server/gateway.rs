//! Entity access gateway
//!
//! One [`EntityGateway`] serves one entity type. Every operation runs the same
//! short-circuiting sequence:
//!
//! 1. resolve the caller from the presented credential
//! 2. parse the target id
//! 3. authorize the operation for the caller and the entity type
//! 4. decode and validate the payload
//! 5. execute through an audit-stamping [`Session`]
//!
//! Storage failures never escape as anything but [`GatewayError::Storage`],
//! which carries the root cause of the failure.

use crate::core::auth::{Caller, Operation};
use crate::core::entity::{AuditEnvelope, Entity};
use crate::core::error::{GatewayError, ValidationError};
use crate::core::store::DataStore;
use crate::entities::consumer::ConsumerLog;
use crate::relations::Expansion;
use crate::server::host::GatewayContext;
use crate::storage::session::{Flush, FlushFailure, Session};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Result of a batch create
#[derive(Debug, Clone)]
pub struct Created<T> {
    /// Stored records, with their ids, in request order
    pub items: Vec<T>,
    /// Path of the last created record
    pub location: String,
}

/// Appends a [`ConsumerLog`] entry for every authenticated request
#[derive(Clone)]
pub struct RequestLog {
    store: Arc<dyn DataStore<ConsumerLog>>,
}

impl RequestLog {
    pub fn new(store: Arc<dyn DataStore<ConsumerLog>>) -> Self {
        Self { store }
    }

    /// Record one request; failures are logged and otherwise ignored
    pub async fn record(
        &self,
        caller: &Caller,
        operation: Operation,
        entity_type: &str,
        target: Option<i64>,
    ) {
        let entry = ConsumerLog::new(
            ConsumerLog::operation_label(operation.verb(), entity_type, target),
            caller.id,
        );
        let mut session = Session::new(Arc::clone(&self.store), caller.name.clone());

        if let Err(e) = session.persist(entry, Flush::Now).await {
            tracing::warn!("Failed to record request of '{}': {:#}", caller.name, e);
        }
    }
}

pub type ExpansionMap<T> = HashMap<String, Arc<dyn Expansion<T>>>;

/// Vetoes updates and deletes of individual stored records
pub trait WriteGuard<T>: Send + Sync {
    /// Called with the stored record before it is replaced or deleted
    fn check(&self, existing: &T, operation: Operation) -> Result<(), ValidationError>;
}

pub struct EntityGateway<T: Entity> {
    ctx: GatewayContext,
    store: Arc<dyn DataStore<T>>,
    expansions: Arc<ExpansionMap<T>>,
    guard: Option<Arc<dyn WriteGuard<T>>>,
}

impl<T: Entity> Clone for EntityGateway<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            store: Arc::clone(&self.store),
            expansions: Arc::clone(&self.expansions),
            guard: self.guard.clone(),
        }
    }
}

impl<T: Entity> EntityGateway<T> {
    pub fn new(
        ctx: GatewayContext,
        store: Arc<dyn DataStore<T>>,
        expansions: ExpansionMap<T>,
    ) -> Self {
        Self {
            ctx,
            store,
            expansions: Arc::new(expansions),
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn WriteGuard<T>>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn context(&self) -> &GatewayContext {
        &self.ctx
    }

    /// Steps 1 to 3 of every operation
    async fn admit(
        &self,
        credential: Option<&str>,
        target: Option<&str>,
        operation: Operation,
    ) -> Result<(Caller, Option<i64>), GatewayError> {
        let caller = self.ctx.credentials.resolve(credential).await?;
        let id = parse_target(target, operation)?;

        if let Some(log) = &self.ctx.request_log {
            log.record(&caller, operation, T::resource_name_singular(), id)
                .await;
        }

        self.ctx
            .access
            .authorize(T::resource_name_singular(), &caller, operation)?;

        tracing::debug!(
            "{} {} target={:?} admitted for '{}'",
            operation.verb(),
            T::resource_name(),
            id,
            caller.name
        );
        Ok((caller, id))
    }

    fn storage_failure(&self, operation: Operation, err: anyhow::Error) -> GatewayError {
        tracing::warn!(
            "{} on {} failed in storage: {:#}",
            operation.verb(),
            T::resource_name(),
            err
        );
        GatewayError::storage(&err)
    }

    async fn fetch(&self, id: Option<i64>) -> Result<Vec<T>, GatewayError> {
        let found = match id {
            Some(id) => self
                .store
                .get(id)
                .await
                .map(|found| found.into_iter().collect()),
            None => self.store.list().await,
        };
        found.map_err(|e| self.storage_failure(Operation::Read, e))
    }

    /// All records, or the zero or one record named by `target`
    pub async fn list(
        &self,
        credential: Option<&str>,
        target: Option<&str>,
    ) -> Result<Vec<T>, GatewayError> {
        let (_, id) = self.admit(credential, target, Operation::Read).await?;
        self.fetch(id).await
    }

    /// As [`EntityGateway::list`], with the named expansions attached to each
    /// rendered record
    ///
    /// Callers other than `admin` also need read access to every expanded
    /// related type.
    pub async fn list_expanded(
        &self,
        credential: Option<&str>,
        target: Option<&str>,
        expand: &[String],
    ) -> Result<Vec<Value>, GatewayError> {
        let (caller, id) = self.admit(credential, target, Operation::Read).await?;

        let mut selected: Vec<&Arc<dyn Expansion<T>>> = Vec::new();
        for name in expand {
            let expansion =
                self.expansions
                    .get(name)
                    .ok_or_else(|| GatewayError::UnknownExpansion {
                        entity_type: T::resource_name_singular().to_string(),
                        name: name.clone(),
                    })?;
            if selected.iter().any(|s| s.name() == expansion.name()) {
                continue;
            }
            self.ctx
                .access
                .authorize(expansion.related_type(), &caller, Operation::Read)?;
            selected.push(expansion);
        }

        let items = self.fetch(id).await?;
        let mut rendered = Vec::with_capacity(items.len());
        for item in &items {
            match serde_json::to_value(item) {
                Ok(Value::Object(map)) => rendered.push(map),
                Ok(other) => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other);
                    rendered.push(map);
                }
                Err(e) => return Err(self.storage_failure(Operation::Read, e.into())),
            }
        }

        for expansion in selected {
            expansion
                .attach(&items, &mut rendered)
                .await
                .map_err(|e| self.storage_failure(Operation::Read, e))?;
        }

        Ok(rendered.into_iter().map(Value::Object).collect())
    }

    /// Create every record of a JSON array body in one atomic commit
    pub async fn create(
        &self,
        credential: Option<&str>,
        body: &[u8],
    ) -> Result<Created<T>, GatewayError> {
        let (caller, _) = self.admit(credential, None, Operation::Insert).await?;

        let items: Vec<T> = decode(body)?;
        let batch = NonZeroUsize::new(items.len()).ok_or(ValidationError::EmptyBatch)?;
        if let Some(item) = items.iter().find(|i| i.is_persisted()) {
            return Err(ValidationError::IdentityPreassigned { id: item.id() }.into());
        }
        for item in &items {
            item.validate().map_err(ValidationError::from)?;
        }

        let mut session = Session::new(Arc::clone(&self.store), caller.name);
        let stored = session
            .persist_batch(items, batch, FlushFailure::Propagate)
            .await
            .map_err(|e| self.storage_failure(Operation::Insert, e))?;

        let last_id = stored.last().map(|s| s.id()).unwrap_or_default();
        tracing::debug!("Created {} {}", stored.len(), T::resource_name());
        Ok(Created {
            location: format!(
                "{}/{}/{}",
                self.ctx.base_path.trim_end_matches('/'),
                T::resource_name(),
                last_id
            ),
            items: stored,
        })
    }

    /// Replace the record named by `target`, keeping its creation data
    pub async fn update(
        &self,
        credential: Option<&str>,
        target: Option<&str>,
        body: &[u8],
    ) -> Result<T, GatewayError> {
        let (caller, id) = self.admit(credential, target, Operation::Update).await?;
        let id = id.ok_or(GatewayError::MalformedId {
            verb: Operation::Update.verb(),
            value: None,
        })?;

        let mut replacement: T = decode(body)?;
        replacement.validate().map_err(ValidationError::from)?;

        let mut session = Session::new(Arc::clone(&self.store), caller.name);
        let existing = self.existing(&session, id, Operation::Update).await?;

        let previous = existing.envelope();
        replacement.set_envelope(AuditEnvelope {
            id,
            created_at: previous.created_at,
            created_by: previous.created_by,
            last_changed_at: previous.last_changed_at,
            last_changed_by: previous.last_changed_by,
        });

        session
            .persist(replacement, Flush::Now)
            .await
            .map_err(|e| self.storage_failure(Operation::Update, e))
    }

    /// Hard delete the record named by `target`
    pub async fn delete(
        &self,
        credential: Option<&str>,
        target: Option<&str>,
    ) -> Result<(), GatewayError> {
        let (caller, id) = self.admit(credential, target, Operation::Delete).await?;
        let id = id.ok_or(GatewayError::MalformedId {
            verb: Operation::Delete.verb(),
            value: None,
        })?;

        let mut session = Session::new(Arc::clone(&self.store), caller.name);
        let existing = self.existing(&session, id, Operation::Delete).await?;

        session
            .remove(&existing, Flush::Now)
            .await
            .map_err(|e| self.storage_failure(Operation::Delete, e))
    }

    /// The stored target of an update or delete, once the guard allows it
    async fn existing(
        &self,
        session: &Session<T>,
        id: i64,
        operation: Operation,
    ) -> Result<T, GatewayError> {
        let existing = session
            .get_by_id(id)
            .await
            .map_err(|e| self.storage_failure(operation, e))?
            .ok_or_else(|| GatewayError::NotFound {
                entity_type: T::resource_name_singular().to_string(),
                id,
            })?;

        if let Some(guard) = &self.guard {
            guard.check(&existing, operation)?;
        }
        Ok(existing)
    }
}

fn decode<D: serde::de::DeserializeOwned>(body: &[u8]) -> Result<D, ValidationError> {
    serde_json::from_slice(body).map_err(|e| ValidationError::Malformed {
        message: e.to_string(),
    })
}

/// A missing target is "all" for reads and inserts, and malformed for
/// updates and deletes. A present target must be a positive integer.
fn parse_target(target: Option<&str>, operation: Operation) -> Result<Option<i64>, GatewayError> {
    match target.map(str::trim).filter(|t| !t.is_empty()) {
        None => match operation {
            Operation::Update | Operation::Delete => Err(GatewayError::MalformedId {
                verb: operation.verb(),
                value: None,
            }),
            Operation::Read | Operation::Insert => Ok(None),
        },
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Some(id)),
            _ => Err(GatewayError::MalformedId {
                verb: operation.verb(),
                value: Some(raw.to_string()),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::core::auth::{Access, AccessRegistryBuilder};
    use crate::core::error::StatusPolicy;
    use crate::entities::consumer::Consumer;
    use crate::relations::{ChildrenExpansion, ParentExpansion, Relation};
    use crate::server::credentials::CredentialResolver;
    use crate::storage::in_memory::InMemoryStore;

    crate::impl_auditable_entity!(Job, "job", "jobs", {
        #[validate(length(min = 1))]
        name: String,
        #[serde(default)]
        is_finished: bool,
    });

    crate::impl_auditable_entity!(JobResult, "job_result", "job_results", {
        job_id: i64,
        #[serde(default)]
        blob: Option<String>,
    }, joins [job_id]);

    const ADMIN: &str = "admin-key-0001";
    const K1: &str = "k1-key-000001";

    struct Fixture {
        jobs: EntityGateway<Job>,
        results: EntityGateway<JobResult>,
        logs: InMemoryStore<ConsumerLog>,
    }

    fn fixture(job_access: Access, result_access: Option<Access>, logging: bool) -> Fixture {
        let config = GatewayConfig::new("test", ADMIN).with_consumer("K1", K1);

        let mut access = AccessRegistryBuilder::new();
        access.grant("job", K1, job_access).unwrap();
        if let Some(result_access) = result_access {
            access.grant("job_result", K1, result_access).unwrap();
        }

        let logs = InMemoryStore::<ConsumerLog>::new();
        let ctx = GatewayContext {
            access: Arc::new(access.build()),
            credentials: Arc::new(CredentialResolver::new(
                &config.credentials,
                Arc::new(Consumer::in_memory_store()),
            )),
            request_log: logging.then(|| RequestLog::new(Arc::new(logs.clone()))),
            base_path: "/api".to_string(),
            status_policy: StatusPolicy::Distinct,
        };

        let job_store: Arc<dyn DataStore<Job>> = Arc::new(InMemoryStore::<Job>::new());
        let result_store: Arc<dyn DataStore<JobResult>> = Arc::new(InMemoryStore::<JobResult>::new());
        let relation = Relation::<Job, JobResult>::on("job_id").unwrap();

        let mut job_expansions: ExpansionMap<Job> = HashMap::new();
        job_expansions.insert(
            "job_results".into(),
            Arc::new(ChildrenExpansion::new(relation, Arc::clone(&result_store))),
        );
        let mut result_expansions: ExpansionMap<JobResult> = HashMap::new();
        result_expansions.insert(
            "job".into(),
            Arc::new(ParentExpansion::new(relation, Arc::clone(&job_store))),
        );

        Fixture {
            jobs: EntityGateway::new(ctx.clone(), job_store, job_expansions),
            results: EntityGateway::new(ctx, result_store, result_expansions),
            logs,
        }
    }

    #[tokio::test]
    async fn test_insert_read_consumer_scenario() {
        let f = fixture(Access::INSERT_READ, None, false);

        let created = f
            .jobs
            .create(Some(K1), br#"[{"name":"a"},{"name":"b"}]"#)
            .await
            .unwrap();
        assert_eq!(created.items.len(), 2);
        assert_ne!(created.items[0].id, created.items[1].id);
        assert!(created.items.iter().all(|j| j.created_by.as_deref() == Some("K1")));
        assert_eq!(created.location, "/api/jobs/2");

        let one = f.jobs.list(Some(K1), Some("2")).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "b");

        let err = f
            .jobs
            .update(Some(K1), Some("2"), br#"{"name":"c"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { verb: "PATCH", .. }));

        f.jobs.delete(Some(ADMIN), Some("2")).await.unwrap();
        assert!(f.jobs.list(Some(K1), Some("2")).await.unwrap().is_empty());
        assert_eq!(f.jobs.list(Some(K1), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_authentication_precedes_everything() {
        let f = fixture(Access::FULL, None, false);

        for result in [
            f.jobs.update(None, None, b"garbage").await.map(|_| ()),
            f.jobs.delete(Some("wrong-key-0001"), Some("abc")).await,
            f.jobs.create(Some(""), b"[]").await.map(|_| ()),
        ] {
            assert!(matches!(result, Err(GatewayError::Unauthenticated { .. })));
        }
    }

    #[tokio::test]
    async fn test_target_id_is_checked_before_authorization() {
        let f = fixture(Access::READ, None, false);

        assert!(matches!(
            f.jobs.update(Some(K1), None, b"{}").await,
            Err(GatewayError::MalformedId { verb: "PATCH", value: None })
        ));
        assert!(matches!(
            f.jobs.delete(Some(K1), None).await,
            Err(GatewayError::MalformedId { verb: "DELETE", value: None })
        ));
        assert!(matches!(
            f.jobs.list(Some(K1), Some("abc")).await,
            Err(GatewayError::MalformedId { verb: "GET", value: Some(_) })
        ));
        assert!(matches!(
            f.jobs.delete(Some(K1), Some("1")).await,
            Err(GatewayError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_authorization_precedes_payload_validation() {
        let f = fixture(Access::READ, None, false);

        assert!(matches!(
            f.jobs.create(Some(K1), b"not json").await,
            Err(GatewayError::Forbidden { verb: "POST", .. })
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_batches_without_writing() {
        let f = fixture(Access::FULL, None, false);

        let cases: [(&[u8], &str); 5] = [
            (b"{\"name\":\"x\"}", "MALFORMED_BODY"),
            (b"[]", "EMPTY_BATCH"),
            (br#"[{"name":"ok"},{"id":7,"name":"x"}]"#, "ID_NOT_ALLOWED"),
            (br#"[{"name":"ok"},{"name":""}]"#, "VALIDATION_ERROR"),
            (b"[{\"name\":", "MALFORMED_BODY"),
        ];
        for (body, code) in cases {
            let err = f.jobs.create(Some(K1), body).await.unwrap_err();
            assert_eq!(err.error_code(), code, "body {:?}", String::from_utf8_lossy(body));
        }

        assert!(f.jobs.list(Some(K1), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_preserves_creation_data() {
        let f = fixture(Access::FULL, None, false);
        let created = f
            .jobs
            .create(Some(K1), br#"[{"name":"a"}]"#)
            .await
            .unwrap()
            .items
            .remove(0);

        let updated = f
            .jobs
            .update(
                Some(ADMIN),
                Some(&created.id.to_string()),
                br#"{"id":99,"name":"renamed","is_finished":true,"created_by":"mallory","created_at":"2000-01-01T00:00:00Z"}"#,
            )
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name, "renamed");
        assert!(updated.is_finished);
        assert_eq!(updated.created_by.as_deref(), Some("K1"));
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.last_changed_by.as_deref(), Some("admin"));
        assert!(updated.last_changed_at > created.last_changed_at);
    }

    #[tokio::test]
    async fn test_update_and_delete_of_missing_record() {
        let f = fixture(Access::FULL, None, false);

        assert!(matches!(
            f.jobs.update(Some(K1), Some("5"), br#"{"name":"x"}"#).await,
            Err(GatewayError::NotFound { id: 5, .. })
        ));
        assert!(matches!(
            f.jobs.delete(Some(K1), Some("5")).await,
            Err(GatewayError::NotFound { id: 5, .. })
        ));
        assert!(f.jobs.list(Some(K1), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expansions_attach_related_records() {
        let f = fixture(Access::FULL, Some(Access::FULL), false);
        f.jobs
            .create(Some(K1), br#"[{"name":"a"},{"name":"b"}]"#)
            .await
            .unwrap();
        f.results
            .create(Some(K1), br#"[{"job_id":1,"blob":"x"},{"job_id":1},{"job_id":2}]"#)
            .await
            .unwrap();

        let jobs = f
            .jobs
            .list_expanded(Some(K1), None, &["job_results".to_string()])
            .await
            .unwrap();
        assert_eq!(jobs[0]["job_results"].as_array().unwrap().len(), 2);
        assert_eq!(jobs[1]["job_results"].as_array().unwrap().len(), 1);

        let results = f
            .results
            .list_expanded(Some(K1), Some("3"), &["job".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["job"]["name"], "b");
    }

    #[tokio::test]
    async fn test_expansion_requires_read_on_related_type() {
        let f = fixture(Access::FULL, None, false);

        assert!(matches!(
            f.jobs
                .list_expanded(Some(K1), None, &["job_results".to_string()])
                .await,
            Err(GatewayError::Forbidden { ref entity_type, verb: "GET" }) if entity_type == "job_result"
        ));
        assert!(
            f.jobs
                .list_expanded(Some(ADMIN), None, &["job_results".to_string()])
                .await
                .is_ok()
        );
        assert!(matches!(
            f.jobs
                .list_expanded(Some(K1), None, &["owner".to_string()])
                .await,
            Err(GatewayError::UnknownExpansion { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_log_records_authenticated_requests() {
        let f = fixture(Access::READ, None, true);

        f.jobs.list(Some(K1), None).await.unwrap();
        f.jobs.delete(Some(K1), Some("4")).await.unwrap_err();
        f.jobs.list(Some("nobody-key-01"), None).await.unwrap_err();

        let entries = f.logs.list().await.unwrap();
        let operations: Vec<&str> = entries.iter().map(|l| l.operation.as_str()).collect();
        assert_eq!(operations, vec!["GET=>job(all)", "DELETE=>job(4)"]);
        assert!(entries.iter().all(|l| l.created_by.as_deref() == Some("K1")));
        assert!(entries.iter().all(|l| l.api_consumer_id == entries[0].api_consumer_id));
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target(None, Operation::Read).unwrap(), None);
        assert_eq!(parse_target(Some(" 12 "), Operation::Update).unwrap(), Some(12));
        assert!(parse_target(Some("0"), Operation::Read).is_err());
        assert!(parse_target(Some("-3"), Operation::Delete).is_err());
        assert!(parse_target(Some(""), Operation::Delete).is_err());
    }
}
