//! In-memory implementation of DataStore for testing and development

use crate::core::entity::Entity;
use crate::core::error::StoreError;
use crate::core::store::{Change, DataStore, Selection};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// A uniqueness constraint over one derived key of `T`
///
/// Records whose key is `None` are not constrained.
pub struct UniqueKey<T> {
    name: &'static str,
    key: fn(&T) -> Option<String>,
}

impl<T> Clone for UniqueKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for UniqueKey<T> {}

impl<T> UniqueKey<T> {
    fn index_of(&self, rows: &BTreeMap<i64, T>) -> HashMap<String, i64> {
        rows.iter()
            .filter_map(|(id, row)| (self.key)(row).map(|value| (value, *id)))
            .collect()
    }
}

struct Table<T> {
    rows: BTreeMap<i64, T>,
    next_id: i64,
    /// Key value to owning row id, per unique key name
    indexes: HashMap<&'static str, HashMap<String, i64>>,
}

/// In-memory store implementation
///
/// Ids are assigned from a per-table counter starting at 1. A commit is
/// checked against the live rows first (missing rows, preassigned ids and
/// unique keys, including duplicates within the batch) and only then applied
/// in place, so a failed commit leaves the table untouched. Clones share the
/// same table.
pub struct InMemoryStore<T> {
    table: Arc<RwLock<Table<T>>>,
    unique: Vec<UniqueKey<T>>,
}

impl<T: Entity> InMemoryStore<T> {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(Table {
                rows: BTreeMap::new(),
                next_id: 1,
                indexes: HashMap::new(),
            })),
            unique: Vec::new(),
        }
    }

    /// Declare a unique key
    pub fn with_unique(mut self, name: &'static str, key: fn(&T) -> Option<String>) -> Self {
        self.unique.push(UniqueKey { name, key });
        self
    }

    fn poisoned() -> StoreError {
        StoreError::Poisoned {
            entity_type: T::resource_name_singular(),
        }
    }

    fn apply(&self, changes: Vec<Change<T>>) -> std::result::Result<Vec<T>, StoreError> {
        let entity_type = T::resource_name_singular();
        let mut table = self.table.write().map_err(|_| Self::poisoned())?;
        let Table {
            rows,
            next_id,
            indexes,
        } = &mut *table;

        // row id to its new state; `None` marks a removal
        let mut touched: BTreeMap<i64, Option<T>> = BTreeMap::new();
        let mut assigned = *next_id;
        let mut stored = Vec::new();

        for change in changes {
            match change {
                Change::Insert(mut record) => {
                    if record.id() != 0 {
                        return Err(StoreError::PreassignedId {
                            entity_type,
                            id: record.id(),
                        });
                    }
                    record.set_id(assigned);
                    assigned += 1;
                    touched.insert(record.id(), Some(record.clone()));
                    stored.push(record);
                }
                Change::Update(record) => {
                    let id = record.id();
                    if !Self::exists(rows, &touched, id) {
                        return Err(StoreError::MissingRow { entity_type, id });
                    }
                    touched.insert(id, Some(record.clone()));
                    stored.push(record);
                }
                Change::Remove(id) => {
                    if !Self::exists(rows, &touched, id) {
                        return Err(StoreError::MissingRow { entity_type, id });
                    }
                    touched.insert(id, None);
                }
            }
        }

        for unique in &self.unique {
            let index = indexes
                .entry(unique.name)
                .or_insert_with(|| unique.index_of(rows));
            let mut claimed: HashMap<String, i64> = HashMap::new();

            for (id, slot) in &touched {
                let Some(value) = slot.as_ref().and_then(unique.key) else {
                    continue;
                };
                let held_elsewhere = index
                    .get(&value)
                    .is_some_and(|owner| owner != id && !touched.contains_key(owner));
                if held_elsewhere || claimed.insert(value.clone(), *id).is_some() {
                    return Err(StoreError::UniqueViolation {
                        entity_type,
                        key: unique.name,
                        value,
                    });
                }
            }
        }

        // nothing below can fail
        for unique in &self.unique {
            let Some(index) = indexes.get_mut(unique.name) else {
                continue;
            };
            for id in touched.keys() {
                if let Some(value) = rows.get(id).and_then(unique.key) {
                    if index.get(&value) == Some(id) {
                        index.remove(&value);
                    }
                }
            }
            for (id, slot) in &touched {
                if let Some(value) = slot.as_ref().and_then(unique.key) {
                    index.insert(value, *id);
                }
            }
        }

        for (id, slot) in touched {
            match slot {
                Some(row) => {
                    rows.insert(id, row);
                }
                None => {
                    rows.remove(&id);
                }
            }
        }
        *next_id = assigned;

        Ok(stored)
    }

    fn exists(rows: &BTreeMap<i64, T>, touched: &BTreeMap<i64, Option<T>>, id: i64) -> bool {
        match touched.get(&id) {
            Some(slot) => slot.is_some(),
            None => rows.contains_key(&id),
        }
    }
}

impl<T: Entity> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InMemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            unique: self.unique.clone(),
        }
    }
}

#[async_trait]
impl<T: Entity> DataStore<T> for InMemoryStore<T> {
    async fn get(&self, id: i64) -> Result<Option<T>> {
        let table = self.table.read().map_err(|_| Self::poisoned())?;

        Ok(table.rows.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<T>> {
        let table = self.table.read().map_err(|_| Self::poisoned())?;

        Ok(table.rows.values().cloned().collect())
    }

    async fn find_where(&self, selection: &Selection<T>) -> Result<Vec<T>> {
        let table = self.table.read().map_err(|_| Self::poisoned())?;

        let matching = table
            .rows
            .values()
            .filter(|row| selection.matches(row))
            .cloned();

        Ok(match selection.max_results() {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn commit(&self, changes: Vec<Change<T>>) -> Result<Vec<T>> {
        let count = changes.len();
        self.apply(changes).with_context(|| {
            format!(
                "failed to commit {} change(s) to {}",
                count,
                T::resource_name()
            )
        })
    }
}
