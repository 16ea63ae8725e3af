//! Reactor
//!
//! Single-task cooperative loop. Each iteration drains one batch of events
//! from the event source, sleeps for the poll interval, re-examines pending
//! services and, once the diagnostic deadline has passed, re-enumerates the
//! drives and schedules a short self-test on each capable one.
//!
//! The reactor owns every piece of mutable state. Only a lost connection to
//! the event source ends the loop with an error; any other failure while
//! handling a single event, drive or service is logged and skipped.

use crate::domain::ports::{
    interfaces, properties, EventSourceBox, InterfaceMap, MessageBusRef, ObjectPath, PropertyMap,
    SelfTestKind, SourceEvent, SubscriptionContext,
};
use crate::error::{Error, ErrorAction, Result};
use crate::hardware::identity::IdentityResolver;
use crate::hardware::registry::{Drive, DriveRegistry};
use crate::hardware::selftest::{JobCorrelator, SmartJob, StatusReason};
use crate::services::{MonitoredService, ServiceTracker};
use crate::watchdog::config::WatchdogConfig;
use crate::watchdog::emitter::{EmitterStats, EventEmitter};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Deadline used when the configured interval does not fit an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Event-correlation loop of the watchdog
pub struct Reactor {
    config: WatchdogConfig,
    source: EventSourceBox,
    tracker: ServiceTracker,
    registry: DriveRegistry,
    correlator: JobCorrelator,
    emitter: EventEmitter,
    next_diagnostics: Instant,
    shutdown: CancellationToken,
    iterations: u64,
}

impl Reactor {
    pub fn new(config: WatchdogConfig, source: EventSourceBox, bus: MessageBusRef) -> Self {
        let tracker = ServiceTracker::new(config.monitored_services.iter().cloned());
        Self {
            config,
            source,
            tracker,
            registry: DriveRegistry::new(),
            correlator: JobCorrelator::new(),
            emitter: EventEmitter::new(bus),
            next_diagnostics: Instant::now(),
            shutdown: CancellationToken::new(),
            iterations: 0,
        }
    }

    /// Token that stops the loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Wait out the startup delay, then run until stopped
    ///
    /// The event source is closed on every exit path.
    pub async fn run(mut self) -> Result<()> {
        let delay = self.config.startup_delay();
        if !delay.is_zero() {
            info!("Waiting {:?} before connecting to the event source", delay);
            let cancelled = tokio::select! {
                _ = self.shutdown.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                info!("Stop requested during startup delay");
                self.source.close().await;
                return Ok(());
            }
        }

        let result = self.event_loop().await;
        if let Err(e) = &result {
            error!("Watchdog terminated: {}", e);
        }

        self.source.close().await;
        info!("Watchdog stopped after {} iterations", self.iterations);
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        self.start().await?;

        let interval = self.config.poll_interval();
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.pump_events().await?;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            self.run_periodic().await?;
            self.iterations += 1;
        }

        info!("Stop requested, leaving event loop");
        Ok(())
    }

    /// Enumerate drives and services and emit the initial notifications
    pub async fn start(&mut self) -> Result<()> {
        info!("Initializing drive inventory");
        self.run_diagnostics().await?;

        let units = match self.source.list_units().await {
            Ok(units) => units,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Unit listing failed, all services start pending: {}", e);
                Vec::new()
            }
        };

        let events = self
            .tracker
            .observe_initial_inventory(&units, self.source.as_mut())
            .await?;
        self.emitter.emit_all(&events);

        info!(
            "Watchdog started: {} services ({} pending), {} drives",
            self.tracker.len(),
            self.tracker.pending().len(),
            self.registry.len()
        );
        Ok(())
    }

    /// One iteration without the sleep: drain, dispatch, periodic work
    pub async fn step(&mut self) -> Result<()> {
        self.pump_events().await?;
        self.run_periodic().await?;
        self.iterations += 1;
        Ok(())
    }

    // =========================================================================
    // Event Handling
    // =========================================================================

    /// Drain one batch from the event source and dispatch it
    pub async fn pump_events(&mut self) -> Result<usize> {
        let batch = match self.source.drain().await {
            Ok(batch) => batch,
            Err(e) => return Self::absorb(e).map(|_| 0),
        };

        let count = batch.len();
        for event in batch {
            if let Err(e) = self.dispatch(event).await {
                Self::absorb(e)?;
            }
        }
        Ok(count)
    }

    /// Keep fatal errors, log the rest
    fn absorb(e: Error) -> Result<()> {
        match e.action() {
            ErrorAction::Terminate => Err(e),
            ErrorAction::LogAndContinue => {
                warn!("Event processing failed: {}", e);
                Ok(())
            }
        }
    }

    async fn dispatch(&mut self, event: SourceEvent) -> Result<()> {
        match event {
            SourceEvent::InterfacesAdded { object, interfaces } => {
                self.on_interfaces_added(&object, &interfaces).await
            }
            SourceEvent::InterfacesRemoved { object, interfaces } => {
                self.on_interfaces_removed(&object, &interfaces)
            }
            SourceEvent::ObjectPropertiesChanged {
                object,
                interface,
                changed,
            } => {
                self.registry
                    .on_properties_changed(&object, &interface, &changed);
                Ok(())
            }
            SourceEvent::UnitPropertiesChanged {
                context,
                interface,
                changed,
                invalidated,
            } => {
                self.on_unit_properties_changed(&context, &interface, &changed, &invalidated)
                    .await
            }
        }
    }

    async fn on_interfaces_added(&mut self, object: &ObjectPath, ifaces: &InterfaceMap) -> Result<()> {
        log_interfaces(object, ifaces);

        if ifaces.contains_key(interfaces::JOB) {
            self.correlator.on_job_added(object, ifaces);
            return Ok(());
        }

        if !self.registry.on_drive_added(object, ifaces) {
            return Ok(());
        }

        info!("Drive added: {}", object);
        // Block devices of a new drive may not have been announced yet
        if let Err(e) = self.registry.refresh_inventory(self.source.as_mut()).await {
            Self::absorb(e)?;
        }

        self.announce_drive(object);
        self.schedule(object, SelfTestKind::Conveyance).await
    }

    fn on_interfaces_removed(&mut self, object: &ObjectPath, removed: &[String]) -> Result<()> {
        let has = |name: &str| removed.iter().any(|i| i == name);

        if has(interfaces::DRIVE) {
            self.correlator.forget_drive(object);
            if let Some(identity) = self.registry.on_drive_removed(object)? {
                info!("Drive removed: {} ({})", identity.stable_id, identity.serial_number);
                self.emitter.emit_disk(identity, StatusReason::Empty);
            }
        } else if has(interfaces::JOB) {
            if let Some(event) = self.correlator.on_job_removed(object, &self.registry)? {
                self.emitter.emit(&event);
            }
        } else if has(interfaces::BLOCK) {
            self.registry.on_block_removed(object);
        }
        Ok(())
    }

    async fn on_unit_properties_changed(
        &mut self,
        context: &SubscriptionContext,
        interface: &str,
        changed: &PropertyMap,
        invalidated: &[String],
    ) -> Result<()> {
        if interface != interfaces::UNIT {
            return Ok(());
        }

        let mut state = changed
            .get(properties::ACTIVE_STATE)
            .and_then(IdentityResolver::decode_string);
        let mut substate = changed
            .get(properties::SUB_STATE)
            .and_then(IdentityResolver::decode_string);

        let wants = |name: &str| invalidated.iter().any(|p| p == name);
        if (state.is_none() && wants(properties::ACTIVE_STATE))
            || (substate.is_none() && wants(properties::SUB_STATE))
        {
            let current = self.source.unit_state(&context.unit_name).await?;
            if state.is_none() && wants(properties::ACTIVE_STATE) {
                state = Some(current.active_state);
            }
            if substate.is_none() && wants(properties::SUB_STATE) {
                substate = Some(current.sub_state);
            }
        }

        if let Some(event) =
            self.tracker
                .on_property_change(&context.unit_name, state.as_deref(), substate.as_deref())
        {
            self.emitter.emit(&event);
        }
        Ok(())
    }

    // =========================================================================
    // Periodic Work
    // =========================================================================

    /// Re-examine pending services and run diagnostics once due
    pub async fn run_periodic(&mut self) -> Result<()> {
        if self.tracker.has_pending() {
            let events = self.tracker.reexamine_pending(self.source.as_mut()).await?;
            self.emitter.emit_all(&events);
        }

        if Instant::now() >= self.next_diagnostics {
            self.run_diagnostics().await?;
        }
        Ok(())
    }

    /// Re-enumerate drives, announce each, start a short self-test on each
    async fn run_diagnostics(&mut self) -> Result<()> {
        let now = Instant::now();
        self.next_diagnostics = now
            .checked_add(self.config.smart_test_interval())
            .unwrap_or_else(|| now + FAR_FUTURE);

        if let Err(e) = self.registry.refresh_inventory(self.source.as_mut()).await {
            return Self::absorb(e);
        }

        for drive in self.registry.drive_ids() {
            self.announce_drive(&drive);
            self.schedule(&drive, SelfTestKind::Short).await?;
        }
        Ok(())
    }

    fn announce_drive(&mut self, drive: &ObjectPath) {
        match self.registry.identity(drive) {
            Ok(identity) => self.emitter.emit_disk(identity, StatusReason::Ok),
            Err(e) => warn!("Drive {} not announced: {}", drive, e),
        }
    }

    async fn schedule(&mut self, drive: &ObjectPath, kind: SelfTestKind) -> Result<()> {
        match self
            .correlator
            .schedule_self_test(self.source.as_mut(), &self.registry, drive, kind)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Self::absorb(e),
        }
    }

    // =========================================================================
    // Status Snapshot
    // =========================================================================

    /// Tracked services in configuration order
    pub fn services(&self) -> impl Iterator<Item = &MonitoredService> {
        self.tracker.services()
    }

    /// Services not yet confirmed active
    pub fn pending(&self) -> Vec<&str> {
        self.tracker.pending()
    }

    /// Drives of the current inventory
    pub fn drives(&self) -> impl Iterator<Item = &Drive> {
        self.registry.drives()
    }

    /// In-flight self-test jobs
    pub fn jobs(&self) -> impl Iterator<Item = &SmartJob> {
        self.correlator.in_flight()
    }

    pub fn registry(&self) -> &DriveRegistry {
        &self.registry
    }

    pub fn emitter_stats(&self) -> EmitterStats {
        self.emitter.stats()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }
}

fn log_interfaces(object: &ObjectPath, ifaces: &InterfaceMap) {
    debug!("Interfaces added to {}", object);
    for (interface, props) in ifaces {
        debug!("    interface: {}", interface);
        for (name, value) in props {
            match IdentityResolver::decode_string(value) {
                Some(text) => debug!("        {}: {}", name, text),
                None => debug!("        {}: {}", name, value),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{unit_object_path, ChannelBus, ScriptedEventSource};
    use crate::domain::ports::BusMessage;
    use crate::hardware::registry::drive_registry::tests::{block_object, drive_object};
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const DRIVE_A: &str = "/org/freedesktop/UDisks2/drives/A";
    const BLOCK_A: &str = "/org/freedesktop/UDisks2/block_devices/sda";
    const WWN_A: &str = "/dev/disk/by-id/wwn-0x5000a";

    fn config(services: &[&str]) -> WatchdogConfig {
        WatchdogConfig {
            monitored_services: services.iter().map(|s| s.to_string()).collect(),
            startup_delay_secs: 0,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    fn reactor(
        config: WatchdogConfig,
        source: &ScriptedEventSource,
    ) -> (Reactor, mpsc::Receiver<BusMessage>) {
        let (bus, rx) = ChannelBus::new(64);
        (Reactor::new(config, Box::new(source.clone()), Arc::new(bus)), rx)
    }

    fn received(rx: &mut mpsc::Receiver<BusMessage>) -> Vec<BusMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn previous_state(message: &BusMessage) -> &str {
        message.payload["actuator_request_type"]["service_watchdog_controller"]["previous_state"]
            .as_str()
            .unwrap()
    }

    fn with_drive_a(source: &ScriptedEventSource) {
        source.insert_object(DRIVE_A, drive_object("SER-A", true));
        source.insert_object(BLOCK_A, block_object(DRIVE_A, &[WWN_A]));
    }

    fn unit_change(unit: &str, state: &str, sub: &str) -> SourceEvent {
        SourceEvent::UnitPropertiesChanged {
            context: SubscriptionContext {
                unit_name: unit.to_string(),
                object: unit_object_path(unit),
            },
            interface: interfaces::UNIT.to_string(),
            changed: PropertyMap::from([
                (properties::ACTIVE_STATE.to_string(), json!(state)),
                (properties::SUB_STATE.to_string(), json!(sub)),
            ]),
            invalidated: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_absent_service_is_promoted_once_active() {
        let source = ScriptedEventSource::new();
        source.set_unit_state("sshd.service", "active", "running");
        let (mut reactor, mut rx) = reactor(config(&["sshd.service", "crond.service"]), &source);

        reactor.start().await.unwrap();
        let messages = received(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.handler == "ServiceMsgHandler"));
        assert!(messages.iter().all(|m| previous_state(m) == "N/A"));
        assert_eq!(reactor.pending(), vec!["crond.service"]);

        reactor.step().await.unwrap();
        assert!(received(&mut rx).is_empty());

        source.set_unit_state("crond.service", "active", "running");
        reactor.step().await.unwrap();
        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].payload["actuator_request_type"]["service_watchdog_controller"]
                ["service_name"],
            json!("crond.service")
        );
        assert_eq!(previous_state(&messages[0]), "inactive");
        assert!(reactor.pending().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_unit_state_notifies_once() {
        let source = ScriptedEventSource::new();
        source.set_unit_state("sshd.service", "active", "running");
        let (mut reactor, mut rx) = reactor(config(&["sshd.service"]), &source);
        reactor.start().await.unwrap();
        received(&mut rx);

        source.push_batch(vec![
            unit_change("sshd.service", "deactivating", "stop-sigterm"),
            unit_change("sshd.service", "deactivating", "stop-sigterm"),
            unit_change("sshd.service", "deactivating", "stop-sigterm"),
        ]);
        reactor.step().await.unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(previous_state(&messages[0]), "active");
    }

    #[tokio::test]
    async fn test_recovery_by_property_change_notifies_once() {
        let source = ScriptedEventSource::new();
        source.set_unit_state("sshd.service", "active", "running");
        let (mut reactor, mut rx) = reactor(config(&["sshd.service"]), &source);
        reactor.start().await.unwrap();
        received(&mut rx);

        source.push_batch(vec![unit_change("sshd.service", "inactive", "dead")]);
        reactor.step().await.unwrap();
        assert_eq!(received(&mut rx).len(), 1);

        source.push_batch(vec![unit_change("sshd.service", "active", "running")]);
        reactor.step().await.unwrap();
        reactor.step().await.unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(previous_state(&messages[0]), "inactive");
        assert!(reactor.pending().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_interval_does_not_overflow_deadline() {
        let source = ScriptedEventSource::new();
        with_drive_a(&source);
        let config = WatchdogConfig {
            smart_test_interval_secs: u64::MAX,
            ..config(&[])
        };
        let (mut reactor, mut rx) = reactor(config, &source);

        reactor.start().await.unwrap();
        reactor.step().await.unwrap();

        // Only the startup pass ran
        assert_eq!(received(&mut rx).len(), 1);
        assert_eq!(source.started_tests().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidated_state_is_fetched() {
        let source = ScriptedEventSource::new();
        source.set_unit_state("sshd.service", "active", "running");
        let (mut reactor, mut rx) = reactor(config(&["sshd.service"]), &source);
        reactor.start().await.unwrap();
        received(&mut rx);

        source.set_unit_state("sshd.service", "inactive", "dead");
        source.push_batch(vec![
            SourceEvent::UnitPropertiesChanged {
                context: SubscriptionContext {
                    unit_name: "sshd.service".into(),
                    object: unit_object_path("sshd.service"),
                },
                interface: "org.freedesktop.systemd1.Service".into(),
                changed: PropertyMap::new(),
                invalidated: vec![properties::ACTIVE_STATE.into()],
            },
            SourceEvent::UnitPropertiesChanged {
                context: SubscriptionContext {
                    unit_name: "sshd.service".into(),
                    object: unit_object_path("sshd.service"),
                },
                interface: interfaces::UNIT.into(),
                changed: PropertyMap::new(),
                invalidated: vec![properties::ACTIVE_STATE.into(), properties::SUB_STATE.into()],
            },
        ]);
        reactor.step().await.unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(previous_state(&messages[0]), "active");
        assert_eq!(reactor.pending(), vec!["sshd.service"]);
    }

    #[tokio::test]
    async fn test_startup_announces_drives_and_schedules_short_tests() {
        let source = ScriptedEventSource::new();
        with_drive_a(&source);
        let (mut reactor, mut rx) = reactor(config(&[]), &source);

        reactor.start().await.unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].payload,
            json!({
                "sensor_response_type": "disk_status_drivemanager",
                "status": "OK_None",
                "serial_number": "SER-A",
                "path_id": WWN_A
            })
        );
        assert_eq!(
            source.started_tests(),
            vec![(ObjectPath::new(DRIVE_A), SelfTestKind::Short)]
        );
        assert_eq!(reactor.drives().count(), 1);
    }

    #[tokio::test]
    async fn test_drive_removal_emits_empty_and_evicts() {
        let source = ScriptedEventSource::new();
        with_drive_a(&source);
        let (mut reactor, mut rx) = reactor(config(&[]), &source);
        reactor.start().await.unwrap();
        received(&mut rx);

        source.push_batch(vec![SourceEvent::InterfacesRemoved {
            object: DRIVE_A.into(),
            interfaces: vec![interfaces::DRIVE.into(), interfaces::DRIVE_ATA.into()],
        }]);
        reactor.step().await.unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].handler, "DiskMsgHandler");
        assert_eq!(messages[0].payload["status"], json!("EMPTY_None"));
        assert_eq!(messages[0].payload["path_id"], json!(WWN_A));
        assert_eq!(messages[0].payload["serial_number"], json!("SER-A"));
        assert!(!reactor.registry().contains(&DRIVE_A.into()));
    }

    #[tokio::test]
    async fn test_drive_removal_drops_unclaimed_self_test_request() {
        let source = ScriptedEventSource::new();
        with_drive_a(&source);
        let (mut reactor, mut rx) = reactor(config(&[]), &source);
        reactor.start().await.unwrap();
        received(&mut rx);
        assert_eq!(source.started_tests().len(), 1);

        source.push_batch(vec![SourceEvent::InterfacesRemoved {
            object: DRIVE_A.into(),
            interfaces: vec![interfaces::DRIVE.into()],
        }]);
        reactor.step().await.unwrap();

        // The handle comes back and an externally started test runs on it
        source.push_batch(vec![SourceEvent::InterfacesAdded {
            object: "/org/freedesktop/UDisks2/jobs/3".into(),
            interfaces: InterfaceMap::from([(
                interfaces::JOB.to_string(),
                PropertyMap::from([
                    (properties::OPERATION.to_string(), json!("ata-smart-selftest")),
                    (properties::OBJECTS.to_string(), json!([DRIVE_A])),
                ]),
            )]),
        }]);
        reactor.step().await.unwrap();

        assert_eq!(reactor.jobs().count(), 1);
        assert_eq!(reactor.jobs().next().unwrap().kind, None);
    }

    #[tokio::test]
    async fn test_hot_added_drive_gets_conveyance_test() {
        let source = ScriptedEventSource::new();
        let (mut reactor, mut rx) = reactor(config(&[]), &source);
        reactor.start().await.unwrap();

        source.push_batch(vec![
            SourceEvent::InterfacesAdded {
                object: BLOCK_A.into(),
                interfaces: block_object(DRIVE_A, &[WWN_A]),
            },
            SourceEvent::InterfacesAdded {
                object: DRIVE_A.into(),
                interfaces: drive_object("SER-A", true),
            },
        ]);
        reactor.step().await.unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload["status"], json!("OK_None"));
        assert_eq!(
            source.started_tests(),
            vec![(ObjectPath::new(DRIVE_A), SelfTestKind::Conveyance)]
        );
    }

    #[tokio::test]
    async fn test_self_test_job_is_correlated_to_drive() {
        let source = ScriptedEventSource::new();
        with_drive_a(&source);
        let (mut reactor, mut rx) = reactor(config(&[]), &source);
        reactor.start().await.unwrap();
        received(&mut rx);

        let job = ObjectPath::new("/org/freedesktop/UDisks2/jobs/12");
        source.push_batch(vec![SourceEvent::InterfacesAdded {
            object: job.clone(),
            interfaces: InterfaceMap::from([(
                interfaces::JOB.to_string(),
                PropertyMap::from([
                    (properties::OPERATION.to_string(), json!("ata-smart-selftest")),
                    (properties::OBJECTS.to_string(), json!([DRIVE_A])),
                ]),
            )]),
        }]);
        reactor.step().await.unwrap();
        assert_eq!(reactor.jobs().count(), 1);
        assert_eq!(reactor.jobs().next().unwrap().kind, Some(SelfTestKind::Short));

        source.push_batch(vec![
            SourceEvent::ObjectPropertiesChanged {
                object: DRIVE_A.into(),
                interface: interfaces::DRIVE_ATA.into(),
                changed: PropertyMap::from([(
                    properties::SMART_SELFTEST_STATUS.to_string(),
                    json!("ERROR_READ"),
                )]),
            },
            SourceEvent::InterfacesRemoved {
                object: job,
                interfaces: vec![interfaces::JOB.into()],
            },
        ]);
        reactor.step().await.unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload["status"], json!("Failed_smart_error_read"));
        assert_eq!(reactor.jobs().count(), 0);
    }

    #[tokio::test]
    async fn test_untracked_job_completion_emits_nothing() {
        let source = ScriptedEventSource::new();
        with_drive_a(&source);
        let (mut reactor, mut rx) = reactor(config(&[]), &source);
        reactor.start().await.unwrap();
        received(&mut rx);

        source.push_batch(vec![SourceEvent::InterfacesRemoved {
            object: "/org/freedesktop/UDisks2/jobs/99".into(),
            interfaces: vec![interfaces::JOB.into()],
        }]);
        reactor.step().await.unwrap();
        assert!(received(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_bad_drive_does_not_stop_the_rest() {
        let source = ScriptedEventSource::new();
        with_drive_a(&source);
        source.insert_object("/drives/B", drive_object("SER-B", true));
        source.reject_self_tests(DRIVE_A);
        let (mut reactor, mut rx) = reactor(config(&[]), &source);

        reactor.start().await.unwrap();

        // B has no stable id, so only A is announced; A's test is rejected
        assert_eq!(received(&mut rx).len(), 1);
        assert_eq!(
            source.started_tests(),
            vec![(ObjectPath::new("/drives/B"), SelfTestKind::Short)]
        );
    }

    #[tokio::test]
    async fn test_diagnostics_repeat_when_due() {
        let source = ScriptedEventSource::new();
        with_drive_a(&source);
        let config = WatchdogConfig {
            smart_test_interval_secs: 0,
            ..config(&[])
        };
        let (mut reactor, mut rx) = reactor(config, &source);

        reactor.start().await.unwrap();
        reactor.step().await.unwrap();

        assert_eq!(received(&mut rx).len(), 2);
        assert_eq!(source.started_tests().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_loss_is_fatal() {
        let source = ScriptedEventSource::new();
        let (mut reactor, _rx) = reactor(config(&[]), &source);
        reactor.start().await.unwrap();

        source.disconnect();
        assert_matches!(reactor.step().await, Err(Error::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_closes_source() {
        let source = ScriptedEventSource::new();
        let (reactor, _rx) = reactor(config(&[]), &source);
        let token = reactor.shutdown_token();

        let handle = tokio::spawn(reactor.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        handle.await.unwrap().unwrap();
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn test_run_surfaces_connection_loss() {
        let source = ScriptedEventSource::new();
        let (reactor, _rx) = reactor(config(&[]), &source);
        source.disconnect();

        assert_matches!(reactor.run().await, Err(Error::ConnectionLost(_)));
        assert!(source.is_closed());
    }
}
