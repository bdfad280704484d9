//! Typed views over LIMS records.
//!
//! Every record is stored once as an [`Entity`], which shares its raw data
//! cheaply. Typed views like [`Workunit`] wrap an entity and add accessors.
//! Relationships are not stored inside entities; instead, a view's
//! relationship accessors take a [`Lims`] and look the target up by ID, so
//! cyclic graphs like workunit → resource → workunit need no owning
//! pointers. The [`Lims`] keeps an optional identity cache which makes
//! repeated lookups cheap.

use serde_json::Value;
use std::{cell::RefCell, ops::Index, sync::Arc};

use crate::client::{query_from_json, record_id, value_as_i64};
use crate::prelude::*;

/// Declare a typed entity view.
macro_rules! entity_view {
    ($(#[$meta:meta])* $name:ident, $endpoint:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            entity: $crate::entities::Entity,
        }

        impl $crate::entities::EntityType for $name {
            const ENDPOINT: &'static str = $endpoint;

            fn from_entity(entity: $crate::entities::Entity) -> Self {
                $name { entity }
            }

            fn entity(&self) -> &$crate::entities::Entity {
                &self.entity
            }
        }
    };
}

mod application;
mod cache;
mod container;
mod dataset;
mod executable;
mod external_job;
mod link;
mod parameter;
mod resource;
mod storage;
mod workunit;

pub use self::application::*;
pub use self::container::*;
pub use self::dataset::*;
pub use self::executable::*;
pub use self::external_job::*;
pub use self::link::*;
pub use self::parameter::*;
pub use self::resource::*;
pub use self::storage::*;
pub use self::workunit::*;

use self::cache::CacheStack;

/// A single LIMS record with its identity.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    classname: String,
    id: i64,
    data: Arc<Record>,
}

impl Entity {
    /// Wrap a record read from `endpoint`. The record must have an `id`.
    pub fn new(endpoint: &str, record: Record) -> Result<Entity> {
        let id = record_id(&record)
            .ok_or_else(|| format_err!("{} record without id: {:?}", endpoint, record))?;
        let classname = record
            .get("classname")
            .and_then(Value::as_str)
            .unwrap_or(endpoint)
            .to_owned();
        Ok(Entity {
            classname,
            id,
            data: Arc::new(record),
        })
    }

    /// Wrap a JSON object.
    pub fn from_json(endpoint: &str, value: Value) -> Result<Entity> {
        match value {
            Value::Object(record) => Entity::new(endpoint, record),
            other => Err(format_err!("expected a {} record, got {}", endpoint, other)),
        }
    }

    /// The ID of this entity.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The LIMS class name of this entity.
    pub fn classname(&self) -> &str {
        &self.classname
    }

    /// The raw record.
    pub fn data(&self) -> &Record {
        &self.data
    }

    /// Get a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Get a string field, if present.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Get a string field, failing if it is missing.
    pub fn required_str(&self, field: &str) -> Result<&str> {
        self.str_field(field).ok_or_else(|| {
            format_err!("{} {} has no field {:?}", self.classname, self.id, field)
        })
    }

    /// Get an integer field (which may be sent as a string).
    pub fn i64_field(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(value_as_i64)
    }

    /// The ID referenced by a relationship field `{"classname": .., "id": ..}`.
    pub fn ref_id(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(|v| v.get("id")).and_then(value_as_i64)
    }

    /// The IDs referenced by a to-many relationship field. A single object
    /// is treated as a list of one.
    pub fn ref_ids(&self, field: &str) -> Option<Vec<i64>> {
        match self.get(field)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(value_as_i64))
                    .collect(),
            ),
            Value::Object(_) => self.ref_id(field).map(|id| vec![id]),
            _ => None,
        }
    }
}

/// A typed view over an [`Entity`] read from a specific endpoint.
pub trait EntityType: Clone + fmt::Debug + Sized {
    /// The endpoint these entities are read from.
    const ENDPOINT: &'static str;

    /// Wrap an entity. The caller is responsible for having read it from
    /// [`Self::ENDPOINT`].
    fn from_entity(entity: Entity) -> Self;

    /// The underlying entity.
    fn entity(&self) -> &Entity;

    /// The ID of this entity.
    fn id(&self) -> i64 {
        self.entity().id()
    }

    /// The raw record.
    fn data(&self) -> &Record {
        self.entity().data()
    }
}

/// A to-many relationship, sorted by ID.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityList<T> {
    items: Vec<T>,
}

impl<T: EntityType> EntityList<T> {
    fn new(mut items: Vec<T>) -> EntityList<T> {
        items.sort_by_key(|item| item.id());
        EntityList { items }
    }

    /// The IDs of the entities, in ascending order.
    pub fn ids(&self) -> Vec<i64> {
        self.items.iter().map(|item| item.id()).collect()
    }

    /// Iterate over the entities.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// The number of entities.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Is the list empty?
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Find an entity by ID.
    pub fn by_id(&self, id: i64) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Unwrap the entities.
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> Index<usize> for EntityList<T> {
    type Output = T;

    fn index(&self, idx: usize) -> &T {
        &self.items[idx]
    }
}

impl<'a, T> IntoIterator for &'a EntityList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Entity lookups against the LIMS, through an optional identity cache.
pub struct Lims {
    client: Client,
    cache: RefCell<CacheStack>,
}

impl Lims {
    /// Create a new entity layer over `client`, with caching disabled.
    pub fn new(client: Client) -> Lims {
        Lims {
            client,
            cache: RefCell::new(CacheStack::default()),
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Cache entities from `endpoints` until the returned guard is dropped.
    /// A `max_size` of 0 means unbounded.
    pub fn enable_cache(&self, endpoints: &[&str], max_size: usize) -> CacheGuard<'_> {
        self.cache.borrow_mut().push(endpoints, max_size);
        CacheGuard { lims: self }
    }

    fn cache_put(&self, endpoint: &str, entity: &Entity) {
        self.cache.borrow_mut().put(endpoint, entity);
    }

    /// Look up an entity by ID.
    pub fn find<T: EntityType>(&self, id: i64) -> Result<Option<T>> {
        Ok(self.find_all::<T>(&[id])?.remove(&id))
    }

    /// Look up an entity by ID, failing with
    /// [`RunnerError::EntityNotFound`] if it does not exist.
    pub fn find_required<T: EntityType>(&self, id: i64) -> Result<T> {
        self.find::<T>(id)?.ok_or_else(|| {
            RunnerError::EntityNotFound {
                entity: T::ENDPOINT.to_owned(),
                ids: vec![id],
            }
            .into()
        })
    }

    /// Look up several entities by ID. Missing entities are logged and left
    /// out of the result.
    pub fn find_all<T: EntityType>(&self, ids: &[i64]) -> Result<BTreeMap<i64, T>> {
        let mut found = BTreeMap::new();
        let mut pending = vec![];
        for &id in ids {
            if found.contains_key(&id) || pending.contains(&id) {
                continue;
            }
            match self.cache.borrow().get(T::ENDPOINT, id) {
                Some(entity) => {
                    found.insert(id, T::from_entity(entity));
                }
                None => pending.push(id),
            }
        }

        if !pending.is_empty() {
            let query = query_from_json(serde_json::json!({ "id": pending }));
            let result = self.client.read_all(T::ENDPOINT, &query)?;
            for record in result.records {
                let entity = Entity::new(T::ENDPOINT, record)?;
                self.cache_put(T::ENDPOINT, &entity);
                found.insert(entity.id(), T::from_entity(entity));
            }
            let missing = pending
                .iter()
                .filter(|id| !found.contains_key(id))
                .copied()
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                warn!(
                    "{}",
                    RunnerError::EntityNotFound {
                        entity: T::ENDPOINT.to_owned(),
                        ids: missing,
                    }
                );
            }
        }
        Ok(found)
    }

    /// Find entities matching `query`, keyed by ID.
    pub fn find_by<T: EntityType>(&self, query: &Query, max_results: Option<usize>) -> Result<BTreeMap<i64, T>> {
        let opts = crate::client::ReadOptions {
            max_results,
            ..Default::default()
        };
        let result = self.client.read_with(T::ENDPOINT, query, opts)?;
        let mut found = BTreeMap::new();
        for record in result.records {
            let entity = Entity::new(T::ENDPOINT, record)?;
            self.cache_put(T::ENDPOINT, &entity);
            found.insert(entity.id(), T::from_entity(entity));
        }
        Ok(found)
    }

    /// Load the required to-one relationship stored in `field` of `owner`.
    pub fn has_one<T: EntityType>(&self, owner: &Entity, field: &str) -> Result<T> {
        self.has_one_optional(owner, field)?.ok_or_else(|| {
            format_err!(
                "{} {} has no {:?} relationship",
                owner.classname(),
                owner.id(),
                field
            )
        })
    }

    /// Load the optional to-one relationship stored in `field` of `owner`.
    /// A field which references a missing entity is still an error.
    pub fn has_one_optional<T: EntityType>(&self, owner: &Entity, field: &str) -> Result<Option<T>> {
        match owner.ref_id(field) {
            None => Ok(None),
            Some(id) => self
                .find_required::<T>(id)
                .map(Some)
                .with_context(|| format!("could not load {} of {} {}", field, owner.classname(), owner.id())),
        }
    }

    /// Load the to-many relationship stored in `field` of `owner`, with a
    /// single batched read. A missing field is an error unless `optional`.
    pub fn has_many<T: EntityType>(&self, owner: &Entity, field: &str, optional: bool) -> Result<EntityList<T>> {
        let ids = match owner.ref_ids(field) {
            Some(ids) => ids,
            None if optional => vec![],
            None => {
                return Err(format_err!(
                    "{} {} has no {:?} relationship",
                    owner.classname(),
                    owner.id(),
                    field
                ))
            }
        };
        let found = self.find_all::<T>(&ids)?;
        Ok(EntityList::new(found.into_values().collect()))
    }
}

impl fmt::Debug for Lims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lims").finish()
    }
}

/// Keeps an entity cache level alive. Dropping it discards the level.
#[must_use = "the cache is disabled as soon as the guard is dropped"]
pub struct CacheGuard<'a> {
    lims: &'a Lims,
}

impl Drop for CacheGuard<'_> {
    fn drop(&mut self) {
        self.lims.cache.borrow_mut().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLims, LimsCall};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn lims_with_resources() -> FakeLims {
        let fake = FakeLims::new();
        for id in [3, 1, 2] {
            fake.insert(
                "resource",
                json!({"id": id, "name": format!("r{}", id), "storage": {"classname": "storage", "id": 9}}),
            );
        }
        fake.insert("storage", json!({"id": 9, "host": "fgcz", "basepath": "/store"}));
        fake.insert(
            "workunit",
            json!({"id": 100, "inputresource": [{"classname": "resource", "id": 3}, {"classname": "resource", "id": 1}]}),
        );
        fake
    }

    fn reads(fake: &FakeLims) -> usize {
        fake.calls()
            .iter()
            .filter(|call| matches!(call, LimsCall::Read { .. }))
            .count()
    }

    #[test]
    fn find_all_drops_missing_ids() {
        let fake = lims_with_resources();
        let lims = fake.lims();
        let found = lims.find_all::<Resource>(&[1, 2, 42]).unwrap();
        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn find_required_reports_missing_entity() {
        let lims = lims_with_resources().lims();
        let err = lims.find_required::<Resource>(42).unwrap_err();
        assert_matches!(
            err.downcast_ref::<RunnerError>(),
            Some(RunnerError::EntityNotFound { entity, ids }) if entity == "resource" && ids == &vec![42]
        );
    }

    #[test]
    fn cache_avoids_repeated_reads() {
        let fake = lims_with_resources();
        let lims = fake.lims();
        {
            let _guard = lims.enable_cache(&["resource"], 0);
            lims.find::<Resource>(1).unwrap();
            lims.find::<Resource>(1).unwrap();
            assert_eq!(reads(&fake), 1);
            // Only the uncached ID is fetched.
            lims.find_all::<Resource>(&[1, 2]).unwrap();
            assert_eq!(reads(&fake), 2);
        }
        lims.find::<Resource>(1).unwrap();
        assert_eq!(reads(&fake), 3);
    }

    #[test]
    fn has_many_is_sorted_and_batched() {
        let fake = lims_with_resources();
        let lims = fake.lims();
        let workunit = lims.find_required::<Workunit>(100).unwrap();
        let before = reads(&fake);
        let inputs = workunit.input_resources(&lims).unwrap();
        assert_eq!(reads(&fake), before + 1);
        assert_eq!(inputs.ids(), vec![1, 3]);
        assert_eq!(inputs[1].name(), Some("r3"));
    }

    #[test]
    fn optional_relationships_tolerate_missing_fields() {
        let lims = lims_with_resources().lims();
        let workunit = lims.find_required::<Workunit>(100).unwrap();
        assert!(workunit.resources(&lims).unwrap().is_empty());
        assert!(workunit.input_dataset(&lims).unwrap().is_none());
        assert!(workunit.application(&lims).is_err());
    }
}
