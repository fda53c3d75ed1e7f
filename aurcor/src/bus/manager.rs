use std::{collections::BTreeMap, sync::Arc};

use log::{debug, warn};

use super::LEDBus;

/// The static set of buses, ordered by name.
#[derive(Default)]
pub struct Buses {
    buses: BTreeMap<String, Arc<LEDBus>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BusesErrorAdd {
    BusAlreadyExists(String),
}

impl Buses {
    pub fn new() -> Self {
        Buses::default()
    }

    pub fn add(&mut self, bus: LEDBus) -> Result<Arc<LEDBus>, BusesErrorAdd> {
        let name = bus.name().to_string();

        if self.buses.contains_key(&name) {
            warn!("Bus {} already exists", name);
            return Err(BusesErrorAdd::BusAlreadyExists(name));
        }

        debug!("Adding {} bus {} with {} LEDs", bus.type_name(), name, bus.length());

        let bus = Arc::new(bus);
        self.buses.insert(name, Arc::clone(&bus));
        Ok(bus)
    }

    pub fn get(&self, name: &str) -> Option<Arc<LEDBus>> {
        self.buses.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.buses.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LEDBus>> {
        self.buses.values()
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::sink::{LEDBusSinkType, NullSink},
        storage::{MemoryStorage, Storage},
    };

    fn bus(name: &str, storage: &Arc<dyn Storage>) -> LEDBus {
        LEDBus::new(name, 10, Arc::clone(storage), LEDBusSinkType::from(NullSink::new()))
    }

    #[test]
    fn test_names_are_sorted() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut buses = Buses::new();

        buses.add(bus("led2", &storage)).unwrap();
        buses.add(bus("led0", &storage)).unwrap();
        buses.add(bus("led1", &storage)).unwrap();

        assert_eq!(buses.names(), vec!["led0", "led1", "led2"]);
        assert_eq!(buses.len(), 3);
        assert_eq!(buses.iter().next().map(|bus| bus.name()), Some("led0"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut buses = Buses::new();

        assert!(buses.add(bus("led0", &storage)).is_ok());
        assert_eq!(
            buses.add(bus("led0", &storage)).err(),
            Some(BusesErrorAdd::BusAlreadyExists("led0".to_string()))
        );
        assert!(buses.get("led0").is_some());
        assert!(buses.get("led1").is_none());
    }
}
