//! Game entities as flat property stores.
//!
//! Behaviours never see concrete entity types: they read and write named properties
//! through [`GameObject`], and each session keeps its entities in an [`ObjectTable`]
//! registered in the session scope under [`GAME_OBJECTS`].

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use skirmish_runtime::{CommandError, Dependency};
use std::collections::HashMap;
use std::sync::Arc;

/// The session's entity table.
pub const GAME_OBJECTS: Dependency<(), Arc<ObjectTable>> = Dependency::new("Game.Objects");

/// Error kind raised when a message targets an entity the session does not have.
pub const UNKNOWN_ENTITY: &str = "unknown_entity";

pub type EntityId = u64;

/// A string-keyed attribute store.
pub trait GameObject: Send + Sync {
    fn get_property(&self, name: &str) -> Result<Value, CommandError>;
    fn set_property(&self, name: &str, value: Value) -> Result<(), CommandError>;
}

/// Reads a property and deserializes it into `T`.
pub fn get_typed<T: DeserializeOwned>(
    object: &dyn GameObject,
    name: &str,
) -> Result<T, CommandError> {
    let value = object.get_property(name)?;
    serde_json::from_value(value).map_err(|e| CommandError::property(name, e.to_string()))
}

/// Serializes `value` and stores it as a property.
pub fn set_typed<T: Serialize>(
    object: &dyn GameObject,
    name: &str,
    value: &T,
) -> Result<(), CommandError> {
    let value =
        serde_json::to_value(value).map_err(|e| CommandError::property(name, e.to_string()))?;
    object.set_property(name, value)
}

/// Map-backed [`GameObject`].
#[derive(Debug, Default)]
pub struct PropertyBag {
    properties: RwLock<HashMap<String, Value>>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(properties: Map<String, Value>) -> Self {
        Self {
            properties: RwLock::new(properties.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }
}

impl GameObject for PropertyBag {
    fn get_property(&self, name: &str) -> Result<Value, CommandError> {
        self.properties
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::property(name, "not set"))
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), CommandError> {
        self.properties.write().insert(name.to_string(), value);
        Ok(())
    }
}

/// Entities of one session, by id.
#[derive(Default)]
pub struct ObjectTable {
    objects: DashMap<EntityId, Arc<dyn GameObject>>,
}

impl ObjectTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inserts or replaces an entity.
    pub fn insert(&self, id: EntityId, object: Arc<dyn GameObject>) {
        self.objects.insert(id, object);
    }

    pub fn get(&self, id: EntityId) -> Result<Arc<dyn GameObject>, CommandError> {
        self.objects
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CommandError::domain(UNKNOWN_ENTITY, format!("no entity with id {id}")))
    }

    pub fn remove(&self, id: EntityId) -> bool {
        self.objects.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skirmish_runtime::ErrorKind;

    #[test]
    fn missing_property_is_a_property_error() {
        let bag = PropertyBag::new();
        let err = bag.get_property("fuel_amount").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Property);
        assert!(err.to_string().contains("fuel_amount"));
    }

    #[test]
    fn typed_access_goes_through_json_values() {
        let bag = PropertyBag::new();
        set_typed(&bag, "fuel_amount", &10i64).unwrap();
        assert_eq!(get_typed::<i64>(&bag, "fuel_amount").unwrap(), 10);

        bag.set_property("fuel_amount", json!("plenty")).unwrap();
        assert_eq!(
            get_typed::<i64>(&bag, "fuel_amount").unwrap_err().kind(),
            ErrorKind::Property
        );
    }

    #[test]
    fn bag_from_map_keeps_entries() {
        let map = json!({"a": 1, "b": [1, 2]});
        let bag = PropertyBag::from_map(map.as_object().cloned().unwrap());
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.get_property("b").unwrap(), json!([1, 2]));
    }

    #[test]
    fn unknown_entity_is_reported_by_kind() {
        let table = ObjectTable::new();
        table.insert(1, Arc::new(PropertyBag::new()));
        assert!(table.get(1).is_ok());
        assert_eq!(
            table.get(2).err().map(|e| e.kind()),
            Some(ErrorKind::Domain(UNKNOWN_ENTITY))
        );
        assert!(table.remove(1));
        assert!(table.is_empty());
    }
}
