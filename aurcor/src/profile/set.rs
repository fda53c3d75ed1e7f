use std::sync::Arc;

use parking_lot::Mutex;
use strum::EnumCount;
use strum_macros::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::{result::Result, storage::Storage};

use super::RatioProfile;

const DIRECTORY_NAME: &str = "/profiles";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumCount, EnumIter, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ProfileKind {
    Normal,
    Hdr,
}

impl ProfileKind {
    pub fn name(self) -> &'static str {
        self.into()
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// The profiles of one bus, loaded from storage on first use.
///
/// Lock order: the set's `loaded` lock may be held while a profile's own
/// lock is taken (first load of a slot), never the other way round. An
/// explicit reload of an already loaded slot releases the set lock before
/// touching the profile so that other slots aren't blocked by the I/O.
pub struct ProfileSet {
    bus_name: String,
    storage: Arc<dyn Storage>,
    loaded: Mutex<[bool; ProfileKind::COUNT]>,
    profiles: [RatioProfile; ProfileKind::COUNT],
}

impl ProfileSet {
    pub fn new(bus_name: &str, storage: Arc<dyn Storage>) -> Self {
        ProfileSet {
            bus_name: bus_name.to_string(),
            storage,
            loaded: Mutex::new([false; ProfileKind::COUNT]),
            profiles: Default::default(),
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn filename(&self, kind: ProfileKind) -> String {
        format!("{}/{}.{}.cbor", DIRECTORY_NAME, self.bus_name, kind)
    }

    /// Returns the profile, loading it first if this is the first access.
    pub fn get(&self, kind: ProfileKind) -> &RatioProfile {
        // Failures are logged and leave the profile at its defaults
        self.auto_load(kind, false).ok();
        &self.profiles[kind.slot()]
    }

    /// Re-reads the profile from storage, discarding unsaved changes.
    pub fn load(&self, kind: ProfileKind) -> Result {
        self.auto_load(kind, true)
    }

    pub fn loaded(&self, kind: ProfileKind) -> bool {
        self.loaded.lock()[kind.slot()]
    }

    /// Writes the current state of the profile, whether or not it has
    /// been modified.
    pub fn save(&self, kind: ProfileKind) -> Result {
        self.auto_load(kind, false).ok();
        self.profiles[kind.slot()].save(&*self.storage, &self.filename(kind))
    }

    fn auto_load(&self, kind: ProfileKind, reload: bool) -> Result {
        let slot = kind.slot();
        let filename = self.filename(kind);
        let mut loaded = self.loaded.lock();

        if loaded[slot] {
            if !reload {
                return Ok(());
            }

            drop(loaded);
            self.profiles[slot].load(&*self.storage, &filename, false)
        } else {
            loaded[slot] = true;

            // Concurrent first accesses wait here until the load is done
            let result = self.profiles[slot].load(&*self.storage, &filename, !reload);
            drop(loaded);
            result
        }
    }
}
