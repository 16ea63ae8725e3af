//! Drive Registry
//!
//! Holds the drive inventory of the node and the identity cache that maps
//! each drive handle to its stable id. The identity cache outlives inventory
//! rebuilds so a drive that disappears between two enumerations can still be
//! reported as absent with the identity it had. Entries of drives missing
//! from two consecutive enumerations are pruned.

use crate::domain::ports::{
    interfaces, properties, property, EventSource, InterfaceMap, ManagedObjects, ObjectPath,
    PropertyMap,
};
use crate::error::{Error, Result};
use crate::hardware::identity::{DriveIdentity, IdentityResolver};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Consecutive enumerations a drive may be missing from before its cached
/// identity is dropped
pub const ABSENT_ENUMERATIONS_BEFORE_PRUNE: u32 = 2;

// =============================================================================
// Drive
// =============================================================================

/// A drive known to the registry
#[derive(Debug, Clone)]
pub struct Drive {
    /// Handle of the drive object
    pub object_id: ObjectPath,
    /// Interfaces and properties last reported for the drive
    pub interfaces: InterfaceMap,
}

impl Drive {
    pub fn new(object_id: ObjectPath, interfaces: InterfaceMap) -> Self {
        Self {
            object_id,
            interfaces,
        }
    }

    /// Serial number as reported by the drive (may be empty)
    pub fn reported_serial(&self) -> String {
        property(&self.interfaces, interfaces::DRIVE, properties::SERIAL)
            .and_then(IdentityResolver::decode_string)
            .unwrap_or_default()
    }

    /// Whether the drive exposes ATA self-test capability
    pub fn is_ata_capable(&self) -> bool {
        self.interfaces.contains_key(interfaces::DRIVE_ATA)
    }

    /// Latest self-test result code, if the drive reports one
    pub fn self_test_status(&self) -> Result<String> {
        property(
            &self.interfaces,
            interfaces::DRIVE_ATA,
            properties::SMART_SELFTEST_STATUS,
        )
        .and_then(IdentityResolver::decode_string)
        .ok_or_else(|| {
            Error::malformed(
                self.object_id.as_str(),
                interfaces::DRIVE_ATA,
                properties::SMART_SELFTEST_STATUS,
            )
        })
    }

    fn merge(&mut self, interface: &str, changed: &PropertyMap) {
        let props = self.interfaces.entry(interface.to_string()).or_default();
        for (name, value) in changed {
            props.insert(name.clone(), value.clone());
        }
    }
}

// =============================================================================
// Registry Statistics
// =============================================================================

/// Snapshot of registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Drives in the current inventory
    pub drives: usize,
    /// Drives with ATA self-test capability
    pub ata_capable: usize,
    /// Drives with a cached stable id
    pub resolved: usize,
    /// Completed inventory rebuilds
    pub refreshes: u64,
}

// =============================================================================
// Drive Registry
// =============================================================================

/// Drive inventory plus identity cache, keyed by drive handle
#[derive(Debug, Default)]
pub struct DriveRegistry {
    /// Current inventory in enumeration order
    drives: IndexMap<ObjectPath, Drive>,
    /// Block device properties by block handle
    blocks: HashMap<ObjectPath, PropertyMap>,
    /// Stable id by drive handle
    stable_ids: HashMap<ObjectPath, String>,
    /// Last reported serial by drive handle
    serials: HashMap<ObjectPath, String>,
    /// Consecutive enumerations each cached drive has been missing from
    absent: HashMap<ObjectPath, u32>,
    refreshes: u64,
    last_refresh: Option<DateTime<Utc>>,
}

impl DriveRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the managed objects from the event source and rebuild
    pub async fn refresh_inventory(&mut self, source: &mut dyn EventSource) -> Result<usize> {
        let objects = source.managed_objects().await?;
        Ok(self.load_objects(&objects))
    }

    /// Rebuild the inventory from an enumeration
    ///
    /// Drives and block devices are replaced wholesale. Stable ids are
    /// recomputed for every block that points at a drive; cached ids of
    /// drives missing from the enumeration are kept until their removal, or
    /// until they have been missing from two enumerations in a row.
    pub fn load_objects(&mut self, objects: &ManagedObjects) -> usize {
        self.drives.clear();
        self.blocks.clear();

        for (handle, ifaces) in objects {
            if ifaces.contains_key(interfaces::DRIVE) {
                self.insert_drive(handle.clone(), ifaces.clone());
            }
            if let Some(block) = ifaces.get(interfaces::BLOCK) {
                self.insert_block(handle.clone(), block.clone());
            }
        }

        self.prune_absent();
        self.refreshes += 1;
        self.last_refresh = Some(Utc::now());

        info!(
            "Drive inventory refreshed: {} drives, {} block devices, {} stable ids",
            self.drives.len(),
            self.blocks.len(),
            self.stable_ids.len()
        );

        self.drives.len()
    }

    /// Record a newly added object; returns true when it is a drive
    pub fn on_drive_added(&mut self, handle: &ObjectPath, ifaces: &InterfaceMap) -> bool {
        if let Some(block) = ifaces.get(interfaces::BLOCK) {
            self.insert_block(handle.clone(), block.clone());
        }

        if !ifaces.contains_key(interfaces::DRIVE) {
            return false;
        }

        match self.drives.get_mut(handle) {
            Some(existing) => {
                for (interface, props) in ifaces {
                    existing.merge(interface, props);
                }
                self.serials
                    .insert(handle.clone(), existing.reported_serial());
            }
            None => self.insert_drive(handle.clone(), ifaces.clone()),
        }

        true
    }

    /// Merge a property change into a drive or block device
    pub fn on_properties_changed(
        &mut self,
        handle: &ObjectPath,
        interface: &str,
        changed: &PropertyMap,
    ) {
        if let Some(drive) = self.drives.get_mut(handle) {
            drive.merge(interface, changed);
            if interface == interfaces::DRIVE {
                self.serials.insert(handle.clone(), drive.reported_serial());
            }
            return;
        }

        if interface == interfaces::BLOCK {
            if let Some(block) = self.blocks.get_mut(handle) {
                for (name, value) in changed {
                    block.insert(name.clone(), value.clone());
                }
                let block = block.clone();
                self.index_block(handle, &block);
            }
        }
    }

    /// Forget a block device; the stable id it produced stays cached
    pub fn on_block_removed(&mut self, handle: &ObjectPath) {
        self.blocks.remove(handle);
    }

    /// Resolve the identity of a removed drive, then evict it
    ///
    /// Returns `Ok(None)` when the drive was never known (lookup miss).
    /// The entry is evicted even when its identity cannot be resolved.
    pub fn on_drive_removed(&mut self, handle: &ObjectPath) -> Result<Option<DriveIdentity>> {
        if !self.is_known(handle) {
            debug!("Removal of unknown drive {} ignored", handle);
            return Ok(None);
        }

        let identity = self.identity(handle);
        self.evict(handle);
        identity.map(Some)
    }

    /// Drop every record of a drive
    pub fn evict(&mut self, handle: &ObjectPath) -> Option<Drive> {
        self.stable_ids.remove(handle);
        self.serials.remove(handle);
        self.absent.remove(handle);
        self.drives.shift_remove(handle)
    }

    /// Serial number of a drive, falling back to its stable id
    pub fn resolve_serial(&self, handle: &ObjectPath) -> String {
        let reported = self
            .drives
            .get(handle)
            .map(Drive::reported_serial)
            .or_else(|| self.serials.get(handle).cloned())
            .unwrap_or_default();

        IdentityResolver::resolve_serial(&reported, self.stable_id(handle))
    }

    /// Cached stable id of a drive
    pub fn stable_id(&self, handle: &ObjectPath) -> Option<&str> {
        self.stable_ids.get(handle).map(String::as_str)
    }

    /// Full identity of a drive; fails when no stable id is cached
    pub fn identity(&self, handle: &ObjectPath) -> Result<DriveIdentity> {
        let stable_id = self
            .stable_id(handle)
            .ok_or_else(|| Error::StableIdUnresolved {
                drive: handle.to_string(),
            })?
            .to_string();

        Ok(DriveIdentity {
            stable_id,
            serial_number: self.resolve_serial(handle),
        })
    }

    /// Whether the drive exposes ATA self-test capability
    pub fn is_ata_capable(&self, handle: &ObjectPath) -> bool {
        self.drives
            .get(handle)
            .map(Drive::is_ata_capable)
            .unwrap_or(false)
    }

    /// Get a drive by handle
    pub fn get(&self, handle: &ObjectPath) -> Option<&Drive> {
        self.drives.get(handle)
    }

    /// Check if a drive is in the current inventory
    pub fn contains(&self, handle: &ObjectPath) -> bool {
        self.drives.contains_key(handle)
    }

    /// Drive handles in enumeration order
    pub fn drive_ids(&self) -> Vec<ObjectPath> {
        self.drives.keys().cloned().collect()
    }

    /// Iterate over drives in enumeration order
    pub fn drives(&self) -> impl Iterator<Item = &Drive> {
        self.drives.values()
    }

    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    /// Time of the last inventory rebuild
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            drives: self.drives.len(),
            ata_capable: self.drives.values().filter(|d| d.is_ata_capable()).count(),
            resolved: self
                .drives
                .keys()
                .filter(|h| self.stable_ids.contains_key(*h))
                .count(),
            refreshes: self.refreshes,
        }
    }

    fn is_known(&self, handle: &ObjectPath) -> bool {
        self.drives.contains_key(handle)
            || self.stable_ids.contains_key(handle)
            || self.serials.contains_key(handle)
    }

    fn insert_drive(&mut self, handle: ObjectPath, ifaces: InterfaceMap) {
        let drive = Drive::new(handle.clone(), ifaces);
        self.serials.insert(handle.clone(), drive.reported_serial());
        self.absent.remove(&handle);
        self.drives.insert(handle, drive);
    }

    fn prune_absent(&mut self) {
        let missing: HashSet<ObjectPath> = self
            .stable_ids
            .keys()
            .chain(self.serials.keys())
            .filter(|h| !self.drives.contains_key(*h))
            .cloned()
            .collect();

        self.absent.retain(|h, _| missing.contains(h));

        for handle in missing {
            let count = self.absent.entry(handle.clone()).or_insert(0);
            *count += 1;
            if *count >= ABSENT_ENUMERATIONS_BEFORE_PRUNE {
                debug!(
                    "Drive {} missing from {} enumerations, identity dropped",
                    handle, count
                );
                self.stable_ids.remove(&handle);
                self.serials.remove(&handle);
                self.absent.remove(&handle);
            }
        }
    }

    fn insert_block(&mut self, handle: ObjectPath, block: PropertyMap) {
        self.index_block(&handle, &block);
        self.blocks.insert(handle, block);
    }

    fn index_block(&mut self, handle: &ObjectPath, block: &PropertyMap) {
        let Some(drive) = block
            .get(properties::DRIVE)
            .and_then(IdentityResolver::decode_string)
            .filter(|d| d.as_str() != "/" && !d.is_empty())
        else {
            return;
        };

        let links = block
            .get(properties::SYMLINKS)
            .map(IdentityResolver::decode_string_list)
            .unwrap_or_default();

        if let Some(stable_id) =
            IdentityResolver::select_stable_id(links.iter().map(String::as_str))
        {
            debug!("Block {} maps drive {} to {}", handle, drive, stable_id);
            self.stable_ids.insert(ObjectPath::new(drive), stable_id);
        }
    }
}
