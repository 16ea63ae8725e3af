//! Storage Node Watchdog - Service and Drive Health Monitoring
//!
//! Observes the lifecycle of a configured set of host services and of the
//! storage drives attached to the node, runs periodic drive self-tests, and
//! emits normalized status events to an internal message bus.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Event Source (port)                                │
//! │        unit listing · managed objects · property changes · self-tests       │
//! └──────────────────────────────────┬──────────────────────────────────────────┘
//!                                    │ drain (one batch per tick)
//! ┌──────────────────────────────────┴──────────────────────────────────────────┐
//! │                               Reactor                                       │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Service State  │  │  Drive Registry │  │      Job Correlator         │  │
//! │  │    Tracker      │  │  + Identity     │  │  (self-test lifecycle)      │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │   Status Normalizer   │                                │
//! │                    │   + Event Emitter     │                                │
//! │                    └───────────┬───────────┘                                │
//! └────────────────────────────────┼────────────────────────────────────────────┘
//!                                  │
//!                       Message Bus (port)
//! ```
//!
//! # Modules
//!
//! - [`watchdog`]: Reactor, configuration, status events and emission
//! - [`services`]: Service state tracking
//! - [`hardware`]: Drive identity, registry, and self-test correlation
//! - [`adapters`]: Scripted event source and message bus implementations
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod services;
pub mod watchdog;

// Re-export commonly used types
pub use adapters::{ChannelBus, LogBus, Scenario, ScriptedEventSource};

pub use domain::ports::{
    BusMessage, EventSource, InterfaceMap, ManagedObjects, MessageBus, ObjectPath, PropertyMap,
    SelfTestKind, SourceEvent, SubscriptionContext, UnitInfo, UnitState,
};

pub use error::{Error, ErrorAction, Result};

pub use hardware::{
    normalize, DriveIdentity, DriveRegistry, IdentityResolver, JobCorrelator, SmartJob,
    StatusReason,
};

pub use services::{MonitoredService, ServiceState, ServiceTracker};

pub use watchdog::{EventEmitter, Reactor, StatusEvent, WatchdogConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
