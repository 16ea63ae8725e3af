//! Scripted Event Source
//!
//! An in-process [`EventSource`] driven by a scenario: an initial object and
//! unit inventory plus batches of events released one batch per drain. Used
//! by the binary's dry-run mode and by the scenario tests.
//!
//! Handles are cheap to clone and share their state, so a test can keep one
//! handle to script events while the reactor owns the other.

use crate::domain::ports::{
    properties, EventSource, InterfaceMap, ManagedObjects, ObjectPath, SelfTestKind,
    SourceEvent, SubscriptionContext, UnitInfo, UnitState,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Object prefix for unit handles
const UNIT_OBJECT_PREFIX: &str = "/org/freedesktop/systemd1/unit/";

// =============================================================================
// Scenario
// =============================================================================

/// Scenario file contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Objects present before the first enumeration
    pub objects: ManagedObjects,
    /// Unit listing before the first enumeration
    pub units: Vec<UnitInfo>,
    /// Event batches, one released per drain
    pub batches: Vec<Vec<SourceEvent>>,
}

impl Scenario {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}

// =============================================================================
// Scripted Event Source
// =============================================================================

#[derive(Debug, Default)]
struct ScriptState {
    objects: ManagedObjects,
    units: IndexMap<String, UnitState>,
    batches: VecDeque<Vec<SourceEvent>>,
    started_tests: Vec<(ObjectPath, SelfTestKind)>,
    subscriptions: Vec<String>,
    rejected_drives: Vec<ObjectPath>,
    disconnected: bool,
    closed: bool,
}

impl ScriptState {
    fn ensure_connected(&self) -> Result<()> {
        if self.disconnected {
            return Err(Error::ConnectionLost("scripted source disconnected".into()));
        }
        Ok(())
    }

    fn apply(&mut self, event: &SourceEvent) {
        match event {
            SourceEvent::InterfacesAdded { object, interfaces } => {
                let entry = self.objects.entry(object.clone()).or_default();
                for (interface, props) in interfaces {
                    entry
                        .entry(interface.clone())
                        .or_default()
                        .extend(props.clone());
                }
            }
            SourceEvent::InterfacesRemoved { object, interfaces } => {
                if let Some(entry) = self.objects.get_mut(object) {
                    for interface in interfaces {
                        entry.remove(interface);
                    }
                    if entry.is_empty() {
                        self.objects.remove(object);
                    }
                }
            }
            SourceEvent::ObjectPropertiesChanged {
                object,
                interface,
                changed,
            } => {
                if let Some(entry) = self.objects.get_mut(object) {
                    entry
                        .entry(interface.clone())
                        .or_default()
                        .extend(changed.clone());
                }
            }
            SourceEvent::UnitPropertiesChanged {
                context, changed, ..
            } => {
                let unit = self
                    .units
                    .entry(context.unit_name.clone())
                    .or_insert_with(inactive_unit);
                if let Some(state) = changed.get(properties::ACTIVE_STATE).and_then(|v| v.as_str()) {
                    unit.active_state = state.to_string();
                }
                if let Some(sub) = changed.get(properties::SUB_STATE).and_then(|v| v.as_str()) {
                    unit.sub_state = sub.to_string();
                }
            }
        }
    }
}

fn inactive_unit() -> UnitState {
    UnitState {
        active_state: "inactive".into(),
        sub_state: "dead".into(),
    }
}

/// Object handle of a unit, with the bus-path escaping systemd applies
pub fn unit_object_path(unit: &str) -> ObjectPath {
    let mut path = String::from(UNIT_OBJECT_PREFIX);
    for c in unit.chars() {
        if c.is_ascii_alphanumeric() {
            path.push(c);
        } else {
            path.push_str(&format!("_{:02x}", c as u32));
        }
    }
    ObjectPath::new(path)
}

/// Event source replaying a scripted scenario
#[derive(Debug, Clone, Default)]
pub struct ScriptedEventSource {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedEventSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source preloaded with a scenario
    pub fn from_scenario(scenario: Scenario) -> Self {
        let source = Self::new();
        {
            let mut state = source.state.lock();
            state.objects = scenario.objects;
            for unit in scenario.units {
                state.units.insert(
                    unit.name,
                    UnitState {
                        active_state: unit.active_state,
                        sub_state: unit.sub_state,
                    },
                );
            }
            state.batches = scenario.batches.into();
        }
        source
    }

    /// Queue a batch for a later drain
    pub fn push_batch(&self, batch: Vec<SourceEvent>) {
        self.state.lock().batches.push_back(batch);
    }

    /// Add a unit to the listing, or update its state
    pub fn set_unit_state(&self, unit: &str, active_state: &str, sub_state: &str) {
        self.state.lock().units.insert(
            unit.to_string(),
            UnitState {
                active_state: active_state.to_string(),
                sub_state: sub_state.to_string(),
            },
        );
    }

    /// Add an object to the inventory without announcing it
    pub fn insert_object(&self, object: impl Into<ObjectPath>, ifaces: InterfaceMap) {
        self.state.lock().objects.insert(object.into(), ifaces);
    }

    /// Make self-test requests for a drive fail
    pub fn reject_self_tests(&self, drive: impl Into<ObjectPath>) {
        self.state.lock().rejected_drives.push(drive.into());
    }

    /// Make every further call fail with a lost connection
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    /// Self-tests requested so far
    pub fn started_tests(&self) -> Vec<(ObjectPath, SelfTestKind)> {
        self.state.lock().started_tests.clone()
    }

    /// Units subscribed to so far, in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Current state of a listed unit
    pub fn unit_state_of(&self, unit: &str) -> Option<UnitState> {
        self.state.lock().units.get(unit).cloned()
    }

    /// Batches not yet drained
    pub fn queued_batches(&self) -> usize {
        self.state.lock().batches.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn managed_objects(&mut self) -> Result<ManagedObjects> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state.objects.clone())
    }

    async fn list_units(&mut self) -> Result<Vec<UnitInfo>> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state
            .units
            .iter()
            .map(|(name, unit)| UnitInfo {
                name: name.clone(),
                active_state: unit.active_state.clone(),
                sub_state: unit.sub_state.clone(),
            })
            .collect())
    }

    async fn unit_state(&mut self, unit: &str) -> Result<UnitState> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state.units.get(unit).cloned().unwrap_or_else(inactive_unit))
    }

    async fn subscribe_unit(&mut self, unit: &str) -> Result<SubscriptionContext> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.subscriptions.push(unit.to_string());
        debug!("Subscribed to unit {}", unit);
        Ok(SubscriptionContext {
            unit_name: unit.to_string(),
            object: unit_object_path(unit),
        })
    }

    async fn start_self_test(&mut self, drive: &ObjectPath, kind: SelfTestKind) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;

        if state.rejected_drives.contains(drive) {
            return Err(Error::EventSource(format!("self-test rejected by {}", drive)));
        }

        state.started_tests.push((drive.clone(), kind));
        Ok(())
    }

    async fn drain(&mut self) -> Result<Vec<SourceEvent>> {
        let mut state = self.state.lock();
        state.ensure_connected()?;

        let batch = state.batches.pop_front().unwrap_or_default();
        for event in &batch {
            state.apply(event);
        }
        Ok(batch)
    }

    async fn close(&mut self) {
        let mut state = self.state.lock();
        if !state.closed {
            info!("Scripted event source closed");
            state.closed = true;
        }
    }
}
