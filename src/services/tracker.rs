//! Service State Tracker
//!
//! Holds the state of every monitored service unit, detects meaningful
//! transitions and keeps the pending set of services not yet confirmed
//! active.

use crate::domain::ports::{EventSource, SubscriptionContext, UnitInfo};
use crate::error::{Error, Result};
use crate::watchdog::events::{StatusEvent, PREVIOUS_STATE_NONE};
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info, warn};

/// Suffix of the units that take part in monitoring
pub const SERVICE_UNIT_SUFFIX: &str = ".service";

/// Previous state reported when none was ever observed
const DEFAULT_PREVIOUS_STATE: &str = "inactive";

// =============================================================================
// Service State
// =============================================================================

/// Top-level state of a service unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Not observed yet
    Unknown,
    Active,
    Inactive,
    /// Any other state reported by the source (`failed`, `activating`, ...)
    Other(String),
}

impl ServiceState {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "active" => ServiceState::Active,
            "inactive" => ServiceState::Inactive,
            "" => ServiceState::Unknown,
            other => ServiceState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ServiceState::Unknown => "unknown",
            ServiceState::Active => "active",
            ServiceState::Inactive => "inactive",
            ServiceState::Other(s) => s,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Monitored Service
// =============================================================================

/// Tracked state of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredService {
    pub name: String,
    pub current_state: ServiceState,
    pub current_substate: String,
    /// `state:substate` of the last observed change
    pub last_notified_signature: Option<String>,
    /// Whether property-change notifications are wired
    pub subscribed: bool,
    pub context: Option<SubscriptionContext>,
}

impl MonitoredService {
    fn new(name: String) -> Self {
        Self {
            name,
            current_state: ServiceState::Unknown,
            current_substate: String::new(),
            last_notified_signature: None,
            subscribed: false,
            context: None,
        }
    }

    fn record(&mut self, state: &str, substate: &str) {
        self.current_state = ServiceState::from_raw(state);
        self.current_substate = substate.to_string();
        self.last_notified_signature = Some(signature(Some(state), Some(substate)));
    }

    /// State reported as `previous_state` in the next notification
    fn previous_state(&self) -> String {
        match &self.current_state {
            ServiceState::Unknown => DEFAULT_PREVIOUS_STATE.to_string(),
            state => state.as_str().to_string(),
        }
    }
}

fn signature(state: Option<&str>, substate: Option<&str>) -> String {
    format!("{}:{}", state.unwrap_or("None"), substate.unwrap_or("None"))
}

// =============================================================================
// Service Tracker
// =============================================================================

/// Per-service state and the pending working set
#[derive(Debug, Default)]
pub struct ServiceTracker {
    services: IndexMap<String, MonitoredService>,
    pending: IndexSet<String>,
    /// No names configured: every discovered service unit is monitored
    monitor_all: bool,
}

impl ServiceTracker {
    /// Create a tracker for the configured service names
    pub fn new<I, S>(service_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tracker = Self::default();
        tracker.initialize(service_names);
        tracker
    }

    /// Create one `unknown` entry per configured name
    pub fn initialize<I, S>(&mut self, service_names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services.clear();
        self.pending.clear();

        for name in service_names {
            let name = name.into();
            self.services
                .entry(name.clone())
                .or_insert_with(|| MonitoredService::new(name));
        }
        self.monitor_all = self.services.is_empty();
    }

    /// Reconcile the configured services with the unit listing
    ///
    /// Listed services are subscribed to; the rest go to the pending set.
    /// Emits one `N/A` notification per monitored service.
    pub async fn observe_initial_inventory(
        &mut self,
        units: &[UnitInfo],
        source: &mut dyn EventSource,
    ) -> Result<Vec<StatusEvent>> {
        let listed: Vec<&UnitInfo> = units
            .iter()
            .filter(|u| u.name.contains(SERVICE_UNIT_SUFFIX))
            .collect();

        if self.monitor_all {
            for unit in &listed {
                self.services
                    .entry(unit.name.clone())
                    .or_insert_with(|| MonitoredService::new(unit.name.clone()));
            }
        }

        self.pending = self.services.keys().cloned().collect();

        info!(
            "Monitored services from configuration: {:?}",
            if self.monitor_all {
                Vec::new()
            } else {
                self.services.keys().cloned().collect()
            }
        );

        let mut total = 0;
        for unit in listed {
            let Some(service) = self.services.get_mut(&unit.name) else {
                continue;
            };

            service.record(&unit.active_state, &unit.sub_state);
            info!("    {}", unit.name);
            total += 1;

            if self.subscribe(&unit.name, source).await? {
                self.pending.shift_remove(&unit.name);
            }
        }
        info!("Total services monitored: {}", total);

        Ok(self
            .services
            .keys()
            .map(|name| StatusEvent::service(name.clone(), PREVIOUS_STATE_NONE))
            .collect())
    }

    /// React to a state change of a subscribed service
    ///
    /// `None` means the property was not reported. Returns the notification
    /// to emit, if the (state, substate) pair differs from the last one.
    pub fn on_property_change(
        &mut self,
        unit: &str,
        state: Option<&str>,
        substate: Option<&str>,
    ) -> Option<StatusEvent> {
        let Some(service) = self.services.get_mut(unit) else {
            debug!("Property change for untracked unit {} ignored", unit);
            return None;
        };

        let sig = signature(state, substate);
        if service.last_notified_signature.as_deref() == Some(sig.as_str()) {
            return None;
        }

        debug!("Service state change detected on unit: {}", unit);
        let previous_state = service.previous_state();
        if let Some(state) = state {
            service.current_state = ServiceState::from_raw(state);
        }
        if let Some(substate) = substate {
            service.current_substate = substate.to_string();
        }
        service.last_notified_signature = Some(sig);

        if state.is_none() && substate.is_none() {
            return None;
        }

        debug!(
            "Unit {}: state {:?}, substate {:?}, previous {}",
            unit, state, substate, previous_state
        );

        match service.current_state {
            ServiceState::Inactive => {
                self.pending.insert(unit.to_string());
            }
            // Recovery already reported by this change
            ServiceState::Active if service.subscribed => {
                self.pending.shift_remove(unit);
            }
            _ => {}
        }

        Some(StatusEvent::service(unit, previous_state))
    }

    /// Re-check every pending service and promote the ones now active
    pub async fn reexamine_pending(
        &mut self,
        source: &mut dyn EventSource,
    ) -> Result<Vec<StatusEvent>> {
        let mut events = Vec::new();
        let candidates: Vec<String> = self.pending.iter().cloned().collect();

        for name in candidates {
            let state = match source.unit_state(&name).await {
                Ok(state) => state,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let e = Error::UnitQuery {
                        unit: name.clone(),
                        reason: e.to_string(),
                    };
                    warn!("Pending service skipped: {}", e);
                    continue;
                }
            };

            if ServiceState::from_raw(&state.active_state) != ServiceState::Active {
                continue;
            }

            if !self.subscribe(&name, source).await? {
                continue;
            }

            self.pending.shift_remove(&name);
            let sig = signature(Some(&state.active_state), Some(&state.sub_state));
            if let Some(service) = self.services.get_mut(&name) {
                if service.last_notified_signature.as_deref() == Some(sig.as_str()) {
                    debug!("Service {} already reported as {}", name, sig);
                    continue;
                }
                service.record(&state.active_state, &state.sub_state);
            }

            info!("Service {} is now active and being monitored", name);
            events.push(StatusEvent::service(name, DEFAULT_PREVIOUS_STATE));
        }

        if !events.is_empty() && self.pending.is_empty() {
            debug!("Successfully monitoring all services now");
        }

        Ok(events)
    }

    /// Wire notifications for a service once; false on a non-fatal failure
    async fn subscribe(&mut self, name: &str, source: &mut dyn EventSource) -> Result<bool> {
        let Some(service) = self.services.get_mut(name) else {
            return Ok(false);
        };
        if service.subscribed {
            return Ok(true);
        }

        match source.subscribe_unit(name).await {
            Ok(context) => {
                service.subscribed = true;
                service.context = Some(context);
                Ok(true)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let e = Error::SubscriptionFailed {
                    unit: name.to_string(),
                    reason: e.to_string(),
                };
                warn!("{}", e);
                Ok(false)
            }
        }
    }

    /// Get a tracked service
    pub fn get(&self, name: &str) -> Option<&MonitoredService> {
        self.services.get(name)
    }

    /// Tracked services in configuration order
    pub fn services(&self) -> impl Iterator<Item = &MonitoredService> {
        self.services.values()
    }

    /// Services not yet confirmed active
    pub fn pending(&self) -> Vec<&str> {
        self.pending.iter().map(String::as_str).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedEventSource;
    use crate::domain::ports::UnitState;

    fn unit(name: &str, state: &str, sub: &str) -> UnitInfo {
        UnitInfo {
            name: name.to_string(),
            active_state: state.to_string(),
            sub_state: sub.to_string(),
        }
    }

    fn service_names(events: &[StatusEvent]) -> Vec<(String, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Service {
                    service_name,
                    previous_state,
                } => Some((service_name.clone(), previous_state.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initialize_starts_unknown() {
        let tracker = ServiceTracker::new(["a.service", "b.service"]);
        assert_eq!(tracker.len(), 2);
        for service in tracker.services() {
            assert_eq!(service.current_state, ServiceState::Unknown);
            assert!(!service.subscribed);
        }
    }

    #[tokio::test]
    async fn test_initial_inventory_and_promotion() {
        let mut source = ScriptedEventSource::new();
        let mut tracker = ServiceTracker::new(["sshd.service", "crond.service"]);
        let units = vec![unit("sshd.service", "active", "running")];

        let events = tracker.observe_initial_inventory(&units, &mut source).await.unwrap();
        assert_eq!(
            service_names(&events),
            vec![
                ("sshd.service".to_string(), "N/A".to_string()),
                ("crond.service".to_string(), "N/A".to_string()),
            ]
        );
        assert_eq!(tracker.pending(), vec!["crond.service"]);
        assert!(tracker.get("sshd.service").unwrap().subscribed);
        assert_eq!(source.subscriptions(), vec!["sshd.service".to_string()]);

        // Still absent: nothing happens
        let events = tracker.reexamine_pending(&mut source).await.unwrap();
        assert!(events.is_empty());
        assert!(tracker.is_pending("crond.service"));

        source.set_unit_state("crond.service", "active", "running");
        let events = tracker.reexamine_pending(&mut source).await.unwrap();
        assert_eq!(
            service_names(&events),
            vec![("crond.service".to_string(), "inactive".to_string())]
        );
        assert!(!tracker.has_pending());
        assert!(tracker.get("crond.service").unwrap().subscribed);
    }

    #[tokio::test]
    async fn test_monitor_all_when_unconfigured() {
        let mut source = ScriptedEventSource::new();
        let mut tracker = ServiceTracker::new(Vec::<String>::new());
        let units = vec![
            unit("a.service", "active", "running"),
            unit("b.socket", "active", "listening"),
            unit("c.service", "inactive", "dead"),
        ];

        let events = tracker.observe_initial_inventory(&units, &mut source).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.get("b.socket").is_none());
        assert!(!tracker.has_pending());
    }

    #[tokio::test]
    async fn test_repeated_signature_notifies_once() {
        let mut source = ScriptedEventSource::new();
        let mut tracker = ServiceTracker::new(["sshd.service"]);
        tracker
            .observe_initial_inventory(&[unit("sshd.service", "active", "running")], &mut source)
            .await
            .unwrap();

        // Same pair as the listing
        assert!(tracker
            .on_property_change("sshd.service", Some("active"), Some("running"))
            .is_none());

        let event = tracker
            .on_property_change("sshd.service", Some("deactivating"), Some("stop-sigterm"))
            .unwrap();
        assert_eq!(event, StatusEvent::service("sshd.service", "active"));

        assert!(tracker
            .on_property_change("sshd.service", Some("deactivating"), Some("stop-sigterm"))
            .is_none());
        assert!(tracker
            .on_property_change("sshd.service", Some("deactivating"), Some("stop-sigterm"))
            .is_none());

        let event = tracker
            .on_property_change("sshd.service", Some("inactive"), Some("dead"))
            .unwrap();
        assert_eq!(event, StatusEvent::service("sshd.service", "deactivating"));
        assert!(tracker.is_pending("sshd.service"));
    }

    #[tokio::test]
    async fn test_recovery_does_not_resubscribe() {
        let mut source = ScriptedEventSource::new();
        let mut tracker = ServiceTracker::new(["sshd.service"]);
        tracker
            .observe_initial_inventory(&[unit("sshd.service", "active", "running")], &mut source)
            .await
            .unwrap();

        tracker.on_property_change("sshd.service", Some("inactive"), Some("dead"));
        source.set_unit_state("sshd.service", "active", "running");
        let events = tracker.reexamine_pending(&mut source).await.unwrap();

        assert_eq!(events, vec![StatusEvent::service("sshd.service", "inactive")]);
        assert_eq!(source.subscriptions().len(), 1);
        assert_eq!(
            source.unit_state_of("sshd.service"),
            Some(UnitState {
                active_state: "active".into(),
                sub_state: "running".into()
            })
        );
    }

    #[tokio::test]
    async fn test_recovery_seen_as_property_change_notifies_once() {
        let mut source = ScriptedEventSource::new();
        let mut tracker = ServiceTracker::new(["sshd.service"]);
        tracker
            .observe_initial_inventory(&[unit("sshd.service", "active", "running")], &mut source)
            .await
            .unwrap();

        assert!(tracker
            .on_property_change("sshd.service", Some("inactive"), Some("dead"))
            .is_some());
        assert!(tracker.is_pending("sshd.service"));

        let event = tracker
            .on_property_change("sshd.service", Some("active"), Some("running"))
            .unwrap();
        assert_eq!(event, StatusEvent::service("sshd.service", "inactive"));
        assert!(!tracker.is_pending("sshd.service"));

        source.set_unit_state("sshd.service", "active", "running");
        assert!(tracker.reexamine_pending(&mut source).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reexamine_skips_already_reported_state() {
        let mut source = ScriptedEventSource::new();
        let mut tracker = ServiceTracker::new(["sshd.service"]);
        tracker
            .observe_initial_inventory(&[unit("sshd.service", "active", "running")], &mut source)
            .await
            .unwrap();
        tracker.on_property_change("sshd.service", Some("inactive"), Some("dead"));

        // Service still pending but its current pair was already reported
        tracker.services.get_mut("sshd.service").unwrap().last_notified_signature =
            Some("active:running".into());
        source.set_unit_state("sshd.service", "active", "running");

        assert!(tracker.reexamine_pending(&mut source).await.unwrap().is_empty());
        assert!(!tracker.has_pending());
    }

    #[test]
    fn test_previous_state_defaults_to_inactive() {
        let mut tracker = ServiceTracker::new(["x.service"]);
        let event = tracker
            .on_property_change("x.service", Some("active"), Some("running"))
            .unwrap();
        assert_eq!(event, StatusEvent::service("x.service", "inactive"));
    }

    #[test]
    fn test_missing_properties_record_but_do_not_notify() {
        let mut tracker = ServiceTracker::new(["x.service"]);
        assert!(tracker.on_property_change("x.service", None, None).is_none());
        assert_eq!(
            tracker.get("x.service").unwrap().last_notified_signature.as_deref(),
            Some("None:None")
        );
        assert!(tracker.on_property_change("y.service", Some("active"), None).is_none());
    }
}
