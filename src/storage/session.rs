//! Audit-stamping unit of work over one [`DataStore`]
//!
//! A [`Session`] is opened per gateway operation with the acting identity.
//! Every record persisted through it is stamped before it reaches the store:
//!
//! - new records (`id == 0`) get `created_at`/`created_by`, whatever the caller sent
//! - every record gets a fresh `last_changed_at`/`last_changed_by`
//!
//! Changes are staged until flushed. A flush commits everything staged as one
//! atomic store commit and clears the staging area, whether or not the commit
//! succeeded. Dropping a session discards whatever is still staged.

use crate::core::entity::{AuditEnvelope, Entity};
use crate::core::store::{Change, DataStore, Selection};
use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// When staged changes reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Commit all staged changes before returning
    Now,
    /// Stage only; a later flush commits
    Deferred,
}

/// What a batch does when one of its intermediate flushes fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushFailure {
    /// Stop and return the error
    #[default]
    Propagate,
    /// Log the error and go on with the next items
    Ignore,
}

pub struct Session<T: Entity> {
    store: Arc<dyn DataStore<T>>,
    actor: String,
    pending: Vec<Change<T>>,
}

impl<T: Entity> Session<T> {
    pub fn new(store: Arc<dyn DataStore<T>>, actor: impl Into<String>) -> Self {
        Self {
            store,
            actor: actor.into(),
            pending: Vec::new(),
        }
    }

    /// Number of staged, not yet flushed changes
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Read a record from durable state; staged changes are not visible
    pub async fn get_by_id(&self, id: i64) -> Result<Option<T>> {
        self.store.get(id).await
    }

    /// Stamp and stage an insert (`id == 0`) or an update, optionally flushing
    ///
    /// With [`Flush::Now`] the stored record is returned, including the id
    /// the store assigned. With [`Flush::Deferred`] the stamped record is
    /// returned as staged.
    pub async fn persist(&mut self, mut entity: T, flush: Flush) -> Result<T> {
        let now = Utc::now();
        let inserting = !entity.is_persisted();

        let mut envelope = if inserting {
            AuditEnvelope {
                id: 0,
                created_at: Some(now),
                created_by: Some(self.actor.clone()),
                last_changed_at: None,
                last_changed_by: None,
            }
        } else {
            entity.envelope()
        };
        envelope.last_changed_at = Some(next_timestamp(envelope.last_changed_at, now));
        envelope.last_changed_by = Some(self.actor.clone());
        entity.set_envelope(envelope);

        self.pending.push(if inserting {
            Change::Insert(entity.clone())
        } else {
            Change::Update(entity.clone())
        });

        match flush {
            Flush::Deferred => Ok(entity),
            Flush::Now => {
                let mut stored = self.flush().await?;
                Ok(stored.pop().unwrap_or(entity))
            }
        }
    }

    /// Stage a hard delete, optionally flushing
    pub async fn remove(&mut self, entity: &T, flush: Flush) -> Result<()> {
        self.pending.push(Change::Remove(entity.id()));

        if flush == Flush::Now {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commit every staged change in one atomic store commit
    pub async fn flush(&mut self) -> Result<Vec<T>> {
        let changes = std::mem::take(&mut self.pending);
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            "Flushing {} change(s) to {} as '{}'",
            changes.len(),
            T::resource_name(),
            self.actor
        );
        self.store.commit(changes).await
    }

    /// Persist many records, flushing after every `interval` items and once
    /// more for a trailing partial batch
    ///
    /// Returns the stored state of every record whose batch committed.
    pub async fn persist_batch(
        &mut self,
        items: Vec<T>,
        interval: NonZeroUsize,
        on_failure: FlushFailure,
    ) -> Result<Vec<T>> {
        let mut stored = Vec::with_capacity(items.len());
        let mut staged = 0;

        for item in items {
            self.persist(item, Flush::Deferred).await?;
            staged += 1;

            if staged == interval.get() {
                staged = 0;
                self.flush_into(&mut stored, on_failure).await?;
            }
        }

        if !self.pending.is_empty() {
            self.flush_into(&mut stored, on_failure).await?;
        }

        Ok(stored)
    }

    async fn flush_into(&mut self, stored: &mut Vec<T>, on_failure: FlushFailure) -> Result<()> {
        match self.flush().await {
            Ok(batch) => {
                stored.extend(batch);
                Ok(())
            }
            Err(e) if on_failure == FlushFailure::Ignore => {
                tracing::warn!(
                    "Ignoring failed flush of {}: {}",
                    T::resource_name(),
                    e.root_cause()
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist `entity` unless a record matching `exists` is already stored
    ///
    /// Returns whether the entity was persisted (or staged).
    pub async fn add_if_missing(
        &mut self,
        entity: T,
        exists: Selection<T>,
        flush: Flush,
    ) -> Result<bool> {
        if !self.store.find_where(&exists.limit(1)).await?.is_empty() {
            return Ok(false);
        }

        self.persist(entity, flush).await?;
        Ok(true)
    }

    /// Return the first stored record matching `exists`, or persist `entity`
    /// and return it
    pub async fn get_or_create(&mut self, entity: T, exists: Selection<T>) -> Result<T> {
        if let Some(found) = self.store.find_where(&exists.limit(1)).await?.pop() {
            return Ok(found);
        }

        self.persist(entity, Flush::Now).await
    }
}

impl<T: Entity> Drop for Session<T> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                "Discarding {} unflushed change(s) to {}",
                self.pending.len(),
                T::resource_name()
            );
        }
    }
}

/// `now`, or the smallest step after `previous` when the clock has not moved
/// past it
fn next_timestamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + TimeDelta::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::StoreError;
    use crate::storage::in_memory::InMemoryStore;

    crate::impl_auditable_entity!(Task, "task", "tasks", {
        title: String,
    });

    fn setup() -> (InMemoryStore<Task>, Arc<dyn DataStore<Task>>) {
        let store = InMemoryStore::new().with_unique("title", |t: &Task| Some(t.title.clone()));
        let shared: Arc<dyn DataStore<Task>> = Arc::new(store.clone());
        (store, shared)
    }

    #[tokio::test]
    async fn test_insert_stamps_creation_and_change() {
        let (_, store) = setup();
        let mut session = Session::new(store, "k1");

        let mut task = Task::new("write".into());
        task.created_by = Some("mallory".into());
        task.created_at = Some(Utc::now() - TimeDelta::days(30));

        let stored = session.persist(task, Flush::Now).await.unwrap();

        assert_eq!(stored.id, 1);
        assert_eq!(stored.created_by.as_deref(), Some("k1"));
        assert_eq!(stored.last_changed_by.as_deref(), Some("k1"));
        assert_eq!(stored.created_at, stored.last_changed_at);
        assert!(stored.created_at.unwrap() > Utc::now() - TimeDelta::minutes(1));
    }

    #[tokio::test]
    async fn test_update_keeps_creation_and_advances_change() {
        let (_, store) = setup();
        let mut creator = Session::new(Arc::clone(&store), "k1");
        let stored = creator
            .persist(Task::new("a".into()), Flush::Now)
            .await
            .unwrap();

        let mut editor = Session::new(store, "admin");
        let mut changed = stored.clone();
        changed.title = "b".into();
        let updated = editor.persist(changed, Flush::Now).await.unwrap();

        assert_eq!(updated.id, stored.id);
        assert_eq!(updated.created_at, stored.created_at);
        assert_eq!(updated.created_by.as_deref(), Some("k1"));
        assert_eq!(updated.last_changed_by.as_deref(), Some("admin"));
        assert!(updated.last_changed_at > stored.last_changed_at);
    }

    #[tokio::test]
    async fn test_deferred_changes_are_invisible_until_flush() {
        let (_, store) = setup();
        let mut session = Session::new(store, "k1");

        let staged = session
            .persist(Task::new("a".into()), Flush::Deferred)
            .await
            .unwrap();
        assert_eq!(staged.id, 0);
        assert_eq!(session.pending(), 1);
        assert!(session.get_by_id(1).await.unwrap().is_none());

        let flushed = session.flush().await.unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(session.pending(), 0);
        assert!(session.get_by_id(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_flush_clears_pending() {
        let (_, store) = setup();
        let mut session = Session::new(store, "k1");
        session
            .persist(Task::new("dup".into()), Flush::Deferred)
            .await
            .unwrap();
        session
            .persist(Task::new("dup".into()), Flush::Deferred)
            .await
            .unwrap();

        assert!(session.flush().await.is_err());
        assert_eq!(session.pending(), 0);
        assert!(session.flush().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_session_discards_staged_changes() {
        let (raw, store) = setup();
        {
            let mut session = Session::new(store, "k1");
            session
                .persist(Task::new("lost".into()), Flush::Deferred)
                .await
                .unwrap();
        }
        assert!(raw.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_flushes_now() {
        let (raw, store) = setup();
        let mut session = Session::new(store, "admin");
        let stored = session
            .persist(Task::new("a".into()), Flush::Now)
            .await
            .unwrap();

        session.remove(&stored, Flush::Now).await.unwrap();
        assert!(raw.get(stored.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_flushes_at_interval_and_remainder() {
        let (raw, store) = setup();
        let mut session = Session::new(store, "k1");
        let items = (0..5).map(|i| Task::new(format!("t{}", i))).collect();

        let stored = session
            .persist_batch(items, NonZeroUsize::new(2).unwrap(), FlushFailure::Propagate)
            .await
            .unwrap();

        assert_eq!(stored.len(), 5);
        assert_eq!(
            stored.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(raw.list().await.unwrap().len(), 5);
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn test_batch_failure_policies() {
        let items = || {
            vec![
                Task::new("x".into()),
                Task::new("x".into()),
                Task::new("y".into()),
                Task::new("z".into()),
            ]
        };
        let interval = NonZeroUsize::new(2).unwrap();

        let (raw, store) = setup();
        let mut session = Session::new(store, "k1");
        let err = session
            .persist_batch(items(), interval, FlushFailure::Propagate)
            .await
            .unwrap_err();
        assert!(err.root_cause().downcast_ref::<StoreError>().is_some());
        assert!(raw.list().await.unwrap().is_empty());

        let (raw, store) = setup();
        let mut session = Session::new(store, "k1");
        let stored = session
            .persist_batch(items(), interval, FlushFailure::Ignore)
            .await
            .unwrap();
        assert_eq!(
            stored.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
            vec!["y", "z"]
        );
        assert_eq!(raw.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_if_missing_and_get_or_create() {
        let (raw, store) = setup();
        let mut session = Session::new(store, "system");
        let same_title = |title: &'static str| Selection::matching(move |t: &Task| t.title == title);

        assert!(
            session
                .add_if_missing(Task::new("a".into()), same_title("a"), Flush::Now)
                .await
                .unwrap()
        );
        assert!(
            !session
                .add_if_missing(Task::new("a".into()), same_title("a"), Flush::Now)
                .await
                .unwrap()
        );

        let existing = session
            .get_or_create(Task::new("a".into()), same_title("a"))
            .await
            .unwrap();
        assert_eq!(existing.id, 1);

        let created = session
            .get_or_create(Task::new("b".into()), same_title("b"))
            .await
            .unwrap();
        assert_eq!(created.id, 2);
        assert_eq!(raw.list().await.unwrap().len(), 2);
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let now = Utc::now();
        assert_eq!(next_timestamp(None, now), now);
        assert!(next_timestamp(Some(now), now) > now);
        let future = now + TimeDelta::seconds(5);
        assert!(next_timestamp(Some(future), now) > future);
        let past = now - TimeDelta::seconds(5);
        assert_eq!(next_timestamp(Some(past), now), now);
    }
}
