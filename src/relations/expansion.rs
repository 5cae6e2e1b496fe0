//! Attaching related records to rendered query results

use super::Relation;
use crate::core::entity::Entity;
use crate::core::store::DataStore;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A named expansion available on entity type `T`
///
/// `attach` receives a whole page of records together with their rendered
/// JSON objects (same order) and inserts the related data under
/// [`Expansion::name`] in each object.
#[async_trait]
pub trait Expansion<T: Entity>: Send + Sync {
    /// The key under which related data is attached, and the `expand` value
    /// that selects this expansion
    fn name(&self) -> &str;

    /// Entity type name of the related records
    fn related_type(&self) -> &'static str;

    async fn attach(&self, items: &[T], rendered: &mut [Map<String, Value>]) -> Result<()>;
}

/// Attaches the children of each parent as an array
pub struct ChildrenExpansion<P, C: Entity> {
    name: String,
    relation: Relation<P, C>,
    store: Arc<dyn DataStore<C>>,
}

impl<P: Entity, C: Entity> ChildrenExpansion<P, C> {
    /// Named after the child resource (e.g. `job_results`) unless renamed
    pub fn new(relation: Relation<P, C>, store: Arc<dyn DataStore<C>>) -> Self {
        Self {
            name: C::resource_name().to_string(),
            relation,
            store,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<P: Entity, C: Entity> Expansion<P> for ChildrenExpansion<P, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn related_type(&self) -> &'static str {
        C::resource_name_singular()
    }

    async fn attach(&self, items: &[P], rendered: &mut [Map<String, Value>]) -> Result<()> {
        let children = self
            .relation
            .children_of(self.store.as_ref(), items, None)
            .await?;

        let join = self.relation.join_field();
        let mut by_parent: HashMap<i64, Vec<Value>> = HashMap::new();
        for child in &children {
            if let Some(parent_id) = join.value(child) {
                by_parent
                    .entry(parent_id)
                    .or_default()
                    .push(serde_json::to_value(child)?);
            }
        }

        for (item, object) in items.iter().zip(rendered.iter_mut()) {
            let group = by_parent.remove(&item.id()).unwrap_or_default();
            object.insert(self.name.clone(), Value::Array(group));
        }
        Ok(())
    }
}

/// Attaches the parent of each child as an object, or `null`
pub struct ParentExpansion<P: Entity, C> {
    name: String,
    relation: Relation<P, C>,
    store: Arc<dyn DataStore<P>>,
}

impl<P: Entity, C: Entity> ParentExpansion<P, C> {
    /// Named after the singular parent type (e.g. `job`) unless renamed
    pub fn new(relation: Relation<P, C>, store: Arc<dyn DataStore<P>>) -> Self {
        Self {
            name: P::resource_name_singular().to_string(),
            relation,
            store,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<P: Entity, C: Entity> Expansion<C> for ParentExpansion<P, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn related_type(&self) -> &'static str {
        P::resource_name_singular()
    }

    async fn attach(&self, items: &[C], rendered: &mut [Map<String, Value>]) -> Result<()> {
        let parents = self
            .relation
            .parents_of(self.store.as_ref(), items, None)
            .await?;

        let mut by_id: HashMap<i64, Value> = HashMap::with_capacity(parents.len());
        for parent in &parents {
            by_id.insert(parent.id(), serde_json::to_value(parent)?);
        }

        let join = self.relation.join_field();
        for (item, object) in items.iter().zip(rendered.iter_mut()) {
            let parent = join
                .value(item)
                .and_then(|id| by_id.get(&id).cloned())
                .unwrap_or(Value::Null);
            object.insert(self.name.clone(), parent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::Change;
    use crate::storage::in_memory::InMemoryStore;

    crate::impl_auditable_entity!(Shelf, "shelf", "shelves", {
        label: String,
    });

    crate::impl_auditable_entity!(Book, "book", "books", {
        title: String,
        #[serde(default)]
        shelf_id: Option<i64>,
    }, joins [shelf_id]);

    fn render<T: Entity>(items: &[T]) -> Vec<Map<String, Value>> {
        items
            .iter()
            .map(|i| match serde_json::to_value(i).unwrap() {
                Value::Object(map) => map,
                other => panic!("not an object: {}", other),
            })
            .collect()
    }

    async fn seed() -> (Arc<InMemoryStore<Shelf>>, Arc<InMemoryStore<Book>>, Vec<Shelf>, Vec<Book>) {
        let shelves = Arc::new(InMemoryStore::<Shelf>::new());
        let books = Arc::new(InMemoryStore::<Book>::new());
        let s = shelves
            .commit(vec![
                Change::Insert(Shelf::new("top".into())),
                Change::Insert(Shelf::new("empty".into())),
            ])
            .await
            .unwrap();
        let b = books
            .commit(vec![
                Change::Insert(Book::new("dune".into(), Some(1))),
                Change::Insert(Book::new("emma".into(), Some(1))),
                Change::Insert(Book::new("loose".into(), None)),
            ])
            .await
            .unwrap();
        (shelves, books, s, b)
    }

    #[tokio::test]
    async fn test_children_expansion_groups_per_parent() {
        let (_, books, shelves, _) = seed().await;
        let expansion = ChildrenExpansion::new(
            Relation::<Shelf, Book>::on("shelf_id").unwrap(),
            books as Arc<dyn DataStore<Book>>,
        );
        assert_eq!(expansion.name(), "books");
        assert_eq!(expansion.related_type(), "book");

        let mut rendered = render(&shelves);
        expansion.attach(&shelves, &mut rendered).await.unwrap();

        let titles: Vec<&str> = rendered[0]["books"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["dune", "emma"]);
        assert_eq!(rendered[1]["books"], Value::Array(vec![]));
    }

    #[tokio::test]
    async fn test_parent_expansion_attaches_object_or_null() {
        let (shelves, _, _, books) = seed().await;
        let expansion = ParentExpansion::new(
            Relation::<Shelf, Book>::on("shelf_id").unwrap(),
            shelves as Arc<dyn DataStore<Shelf>>,
        )
        .with_name("home");
        assert_eq!(expansion.name(), "home");

        let mut rendered = render(&books);
        expansion.attach(&books, &mut rendered).await.unwrap();

        assert_eq!(rendered[0]["home"]["label"], "top");
        assert_eq!(rendered[1]["home"]["id"], 1);
        assert_eq!(rendered[2]["home"], Value::Null);
    }
}
