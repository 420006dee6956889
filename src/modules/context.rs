//! État partagé par les modules pendant un passage

use serde_json::{Map, Value};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

use crate::error::{RelocError, Result};
use crate::rom::Rom;

/// Données propres à chaque module, indexées par type
#[derive(Default)]
pub struct ModuleStore {
    data: HashMap<TypeId, Box<dyn Any>>,
}

impl ModuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installe les données d'un module, en remplaçant les précédentes
    pub fn insert<T: Any>(&mut self, value: T) {
        self.data.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    pub fn get<T: Any>(&self) -> Result<&T> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or_else(missing::<T>)
    }

    pub fn get_mut<T: Any>(&mut self) -> Result<&mut T> {
        self.data
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
            .ok_or_else(missing::<T>)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn missing<T>() -> RelocError {
    RelocError::config(format!("missing module data {}", type_name::<T>()))
}

/// Contexte passé à l'enregistrement des modules et à leurs écouteurs
pub struct RelocContext {
    pub rom: Rom,
    pub modules: ModuleStore,

    /// Sections du dump JSON, une par module
    pub dump: Map<String, Value>,
}

impl RelocContext {
    pub fn new(rom: Rom) -> Self {
        Self {
            rom,
            modules: ModuleStore::new(),
            dump: Map::new(),
        }
    }

    /// Ajoute une section au dump
    pub fn dump_section(&mut self, key: &str, value: Value) {
        self.dump.insert(key.to_string(), value);
    }
}
