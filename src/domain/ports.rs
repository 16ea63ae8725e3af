//! Domain Ports - Core trait definitions for the watchdog
//!
//! These traits define the boundaries between the correlation engine and the
//! systems around it: the hardware/service event source on one side and the
//! internal message bus on the other. Adapters implement these traits.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Wire Names
// =============================================================================

/// Interface names reported by the event source
pub mod interfaces {
    pub const DRIVE: &str = "org.freedesktop.UDisks2.Drive";
    pub const DRIVE_ATA: &str = "org.freedesktop.UDisks2.Drive.Ata";
    pub const BLOCK: &str = "org.freedesktop.UDisks2.Block";
    pub const JOB: &str = "org.freedesktop.UDisks2.Job";
    pub const UNIT: &str = "org.freedesktop.systemd1.Unit";
}

/// Property names read from the interfaces above
pub mod properties {
    pub const SERIAL: &str = "Serial";
    pub const SYMLINKS: &str = "Symlinks";
    pub const DRIVE: &str = "Drive";
    pub const OPERATION: &str = "Operation";
    pub const OBJECTS: &str = "Objects";
    pub const START_TIME: &str = "StartTime";
    pub const SMART_SELFTEST_STATUS: &str = "SmartSelftestStatus";
    pub const ACTIVE_STATE: &str = "ActiveState";
    pub const SUB_STATE: &str = "SubState";
}

/// Downstream handler receiving service status messages
pub const SERVICE_MSG_HANDLER: &str = "ServiceMsgHandler";

/// Downstream handler receiving disk status messages
pub const DISK_MSG_HANDLER: &str = "DiskMsgHandler";

// =============================================================================
// Object Handles and Properties
// =============================================================================

/// Opaque handle of an object exported by the event source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(pub String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Property name -> value for one interface
pub type PropertyMap = BTreeMap<String, serde_json::Value>;

/// Interface name -> properties for one object
pub type InterfaceMap = BTreeMap<String, PropertyMap>;

/// Handle -> interfaces for every managed object
pub type ManagedObjects = BTreeMap<ObjectPath, InterfaceMap>;

/// Look up a single property value on an object
pub fn property<'a>(
    interfaces: &'a InterfaceMap,
    interface: &str,
    name: &str,
) -> Option<&'a serde_json::Value> {
    interfaces.get(interface).and_then(|props| props.get(name))
}

// =============================================================================
// Service Units
// =============================================================================

/// A unit as reported by the event source's unit listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    /// Unit name (e.g. `sshd.service`)
    pub name: String,
    /// Top-level state (`active`, `inactive`, `failed`, ...)
    pub active_state: String,
    /// Fine-grained state (`running`, `dead`, ...)
    pub sub_state: String,
}

/// Current ActiveState/SubState pair of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub active_state: String,
    pub sub_state: String,
}

/// Context record handed back with every property change of a subscribed unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionContext {
    /// Unit name the subscription was made for
    pub unit_name: String,
    /// Object handle of the unit
    pub object: ObjectPath,
}

// =============================================================================
// Self-Tests
// =============================================================================

/// Kind of drive self-test to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfTestKind {
    Short,
    Extended,
    Conveyance,
    Offline,
}

impl SelfTestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelfTestKind::Short => "short",
            SelfTestKind::Extended => "extended",
            SelfTestKind::Conveyance => "conveyance",
            SelfTestKind::Offline => "offline",
        }
    }
}

impl std::fmt::Display for SelfTestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Source Events
// =============================================================================

/// Events delivered by the event source during a drain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SourceEvent {
    /// An object gained interfaces (drive plugged in, job started, ...)
    InterfacesAdded {
        object: ObjectPath,
        interfaces: InterfaceMap,
    },

    /// An object lost interfaces (drive pulled, job finished, ...)
    InterfacesRemoved {
        object: ObjectPath,
        interfaces: Vec<String>,
    },

    /// Properties of a managed drive/block/job object changed
    ObjectPropertiesChanged {
        object: ObjectPath,
        interface: String,
        changed: PropertyMap,
    },

    /// Properties of a subscribed unit changed
    UnitPropertiesChanged {
        context: SubscriptionContext,
        interface: String,
        changed: PropertyMap,
        #[serde(default)]
        invalidated: Vec<String>,
    },
}

// =============================================================================
// Event Source Port
// =============================================================================

/// Port for the hardware/service event source
///
/// Every call except [`EventSource::drain`] is a request/response exchange.
/// `drain` must not block: it returns whatever the source has queued for the
/// current tick, possibly nothing. Loss of the underlying connection is
/// reported as [`crate::Error::ConnectionLost`].
#[async_trait]
pub trait EventSource: Send {
    /// Enumerate all managed objects (drives, block devices, jobs)
    async fn managed_objects(&mut self) -> Result<ManagedObjects>;

    /// Enumerate the unit listing
    async fn list_units(&mut self) -> Result<Vec<UnitInfo>>;

    /// Read the current ActiveState/SubState of a unit, loading it if needed
    async fn unit_state(&mut self, unit: &str) -> Result<UnitState>;

    /// Wire property-change notifications for a unit
    async fn subscribe_unit(&mut self, unit: &str) -> Result<SubscriptionContext>;

    /// Start a self-test on a drive; completion arrives later as events
    async fn start_self_test(&mut self, drive: &ObjectPath, kind: SelfTestKind) -> Result<()>;

    /// Take the batch of events pending for this tick
    async fn drain(&mut self) -> Result<Vec<SourceEvent>>;

    /// Release the connection
    async fn close(&mut self) {}
}

// =============================================================================
// Message Bus Port
// =============================================================================

/// A message addressed to a named downstream handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub handler: String,
    pub payload: serde_json::Value,
}

/// Port for the internal message bus
pub trait MessageBus: Send + Sync {
    /// Hand one message to the bus without waiting on consumers
    fn deliver(&self, message: BusMessage) -> Result<()>;
}

pub type EventSourceBox = Box<dyn EventSource>;
pub type MessageBusRef = Arc<dyn MessageBus>;
