//! Store trait the persistence layer and the relationship resolver work against

use crate::core::entity::Entity;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// One staged modification, applied by [`DataStore::commit`]
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    /// Insert a new record; its id must be `0` and is assigned by the store
    Insert(T),
    /// Replace the stored record with the same id
    Update(T),
    /// Hard delete by id
    Remove(i64),
}

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// A composable, store-agnostic description of which records to read
///
/// Predicates are AND-ed. A limit caps the number of records returned, in
/// ascending id order.
pub struct Selection<T> {
    predicates: Vec<Predicate<T>>,
    limit: Option<usize>,
}

impl<T> Selection<T> {
    /// Every record
    pub fn all() -> Self {
        Self {
            predicates: Vec::new(),
            limit: None,
        }
    }

    /// Records matching one predicate
    pub fn matching(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self::all().filter(predicate)
    }

    /// Add a predicate to this selection
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Combine two selections; the tighter limit wins
    pub fn and(mut self, other: Selection<T>) -> Self {
        self.predicates.extend(other.predicates);
        self.limit = match (self.limit, other.limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(self.limit.map_or(limit, |current| current.min(limit)));
        self
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    pub fn matches(&self, record: &T) -> bool {
        self.predicates.iter().all(|p| p(record))
    }
}

impl<T: Entity> Selection<T> {
    /// Records whose id is in `ids`
    pub fn with_ids(ids: BTreeSet<i64>) -> Self {
        Self::matching(move |record: &T| ids.contains(&record.id()))
    }
}

impl<T> Clone for Selection<T> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            limit: self.limit,
        }
    }
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T> fmt::Debug for Selection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("predicates", &self.predicates.len())
            .field("limit", &self.limit)
            .finish()
    }
}

/// Typed persistence collaborator for one entity type
///
/// Implementations may be backed by anything. Failures are reported as
/// `anyhow::Error`; their root cause should be a
/// [`StoreError`](crate::core::error::StoreError) where one applies.
#[async_trait]
pub trait DataStore<T: Entity>: Send + Sync {
    /// Get a record by id
    async fn get(&self, id: i64) -> Result<Option<T>>;

    /// List all records in ascending id order
    async fn list(&self) -> Result<Vec<T>>;

    /// Materialize a selection in ascending id order
    async fn find_where(&self, selection: &Selection<T>) -> Result<Vec<T>>;

    /// Apply all changes atomically and return the stored state of every
    /// inserted or updated record, in order
    async fn commit(&self, changes: Vec<Change<T>>) -> Result<Vec<T>>;
}
