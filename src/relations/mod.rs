//! Relationship resolution between parents and children
//!
//! A [`Relation<P, C>`] joins a parent type `P` to a child type `C` over one
//! integer foreign-key field of `C`, named at registration time and checked
//! against `C::join_fields()`. Resolution always happens after the primary
//! query: the ids of a whole page of records are collected and the related
//! records are fetched with a single store query.
//!
//! ```rust,ignore
//! let results = Relation::<Job, JobResult>::on("job_id")?;
//! let children = results.children_of(&*result_store, &jobs, None).await?;
//! let parents = results.parents_of(&*job_store, &children, None).await?;
//! ```

pub mod expansion;

pub use expansion::{ChildrenExpansion, Expansion, ParentExpansion};

use crate::core::entity::{Entity, JoinField};
use crate::core::error::ConfigError;
use crate::core::store::{DataStore, Selection};
use anyhow::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

/// Narrows a selection before the store materializes it (extra predicates,
/// a limit)
pub type Refine<T> = Box<dyn FnOnce(Selection<T>) -> Selection<T> + Send>;

fn refined<T>(selection: Selection<T>, refine: Option<Refine<T>>) -> Selection<T> {
    match refine {
        Some(refine) => refine(selection),
        None => selection,
    }
}

/// A declared parent/child relationship
pub struct Relation<P, C> {
    join: JoinField<C>,
    _parent: PhantomData<fn() -> P>,
}

impl<P: Entity, C: Entity> Relation<P, C> {
    /// Declare the relation over the join field `field` of `C`
    pub fn on(field: &str) -> Result<Self, ConfigError> {
        let join = C::join_field(field).ok_or_else(|| ConfigError::UnknownJoinField {
            entity_type: C::resource_name_singular().to_string(),
            field: field.to_string(),
        })?;

        Ok(Self {
            join,
            _parent: PhantomData,
        })
    }

    pub fn join_field(&self) -> JoinField<C> {
        self.join
    }

    /// Every child whose join value is the id of one of `parents`
    pub async fn children_of(
        &self,
        store: &dyn DataStore<C>,
        parents: &[P],
        refine: Option<Refine<C>>,
    ) -> Result<Vec<C>> {
        let ids: BTreeSet<i64> = parents.iter().map(|p| p.id()).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let join = self.join;
        let selection =
            Selection::matching(move |child: &C| join.value(child).is_some_and(|v| ids.contains(&v)));
        store.find_where(&refined(selection, refine)).await
    }

    /// Every parent referenced by at least one of `children`
    pub async fn parents_of(
        &self,
        store: &dyn DataStore<P>,
        children: &[C],
        refine: Option<Refine<P>>,
    ) -> Result<Vec<P>> {
        let ids: BTreeSet<i64> = children.iter().filter_map(|c| self.join.value(c)).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        store
            .find_where(&refined(Selection::with_ids(ids), refine))
            .await
    }

    pub async fn children_of_one(
        &self,
        store: &dyn DataStore<C>,
        parent: &P,
        refine: Option<Refine<C>>,
    ) -> Result<Vec<C>> {
        self.children_of(store, std::slice::from_ref(parent), refine)
            .await
    }

    /// The parent `child` references, if it references one that exists
    pub async fn parent_of(&self, store: &dyn DataStore<P>, child: &C) -> Result<Option<P>> {
        match self.join.value(child) {
            Some(id) => store.get(id).await,
            None => Ok(None),
        }
    }
}

impl<P, C> Clone for Relation<P, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, C> Copy for Relation<P, C> {}

impl<P, C> fmt::Debug for Relation<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("join", &self.join.name())
            .finish()
    }
}
