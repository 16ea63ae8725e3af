//! Self-Test Job Correlator
//!
//! Tracks in-flight self-test jobs and matches each job's completion back to
//! the drive it ran on. Records are created from job-added events rather than
//! from our own start calls, so tests started by someone else are correlated
//! too.

use crate::domain::ports::{
    interfaces, properties, EventSource, InterfaceMap, ObjectPath, SelfTestKind,
};
use crate::error::{Error, Result};
use crate::hardware::identity::IdentityResolver;
use crate::hardware::registry::DriveRegistry;
use crate::hardware::selftest::normalizer::normalize;
use crate::watchdog::events::StatusEvent;
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Job operation identifying the self-test family
pub const SELF_TEST_OPERATION: &str = "ata-smart-selftest";

// =============================================================================
// Smart Job
// =============================================================================

/// A self-test job observed in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartJob {
    /// Handle of the job object
    pub job_id: ObjectPath,
    /// Kind we requested, `None` when the test was started externally
    pub kind: Option<SelfTestKind>,
    /// Drives the job operates on
    pub targets: BTreeSet<ObjectPath>,
    /// When the job started
    pub started_at: DateTime<Utc>,
}

// =============================================================================
// Job Correlator
// =============================================================================

/// In-flight self-test jobs keyed by job handle
#[derive(Debug, Default)]
pub struct JobCorrelator {
    jobs: IndexMap<ObjectPath, SmartJob>,
    /// Kind last requested per drive, claimed by the next job on that drive
    requested: HashMap<ObjectPath, SelfTestKind>,
    completed: u64,
}

impl JobCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the event source to start a self-test on an ATA-capable drive
    ///
    /// Returns `Ok(false)` without calling the source when the drive has no
    /// self-test capability.
    pub async fn schedule_self_test(
        &mut self,
        source: &mut dyn EventSource,
        registry: &DriveRegistry,
        drive: &ObjectPath,
        kind: SelfTestKind,
    ) -> Result<bool> {
        if !registry.is_ata_capable(drive) {
            debug!("Drive does not support self-tests: {}", drive);
            return Ok(false);
        }

        debug!("Starting {} self-test on {}", kind, drive);
        source
            .start_self_test(drive, kind)
            .await
            .map_err(|e| match e {
                Error::ConnectionLost(_) => e,
                other => Error::SelfTestStart {
                    drive: drive.to_string(),
                    reason: other.to_string(),
                },
            })?;

        self.requested.insert(drive.clone(), kind);
        Ok(true)
    }

    /// Record a job if it belongs to the self-test family
    pub fn on_job_added(&mut self, job: &ObjectPath, ifaces: &InterfaceMap) -> bool {
        let Some(props) = ifaces.get(interfaces::JOB) else {
            return false;
        };

        let operation = props
            .get(properties::OPERATION)
            .and_then(IdentityResolver::decode_string);
        if operation.as_deref() != Some(SELF_TEST_OPERATION) {
            return false;
        }

        let targets: BTreeSet<ObjectPath> = props
            .get(properties::OBJECTS)
            .map(IdentityResolver::decode_string_list)
            .unwrap_or_default()
            .into_iter()
            .map(ObjectPath::new)
            .collect();

        let started_at = props
            .get(properties::START_TIME)
            .and_then(|v| v.as_u64())
            .filter(|us| *us > 0)
            .and_then(micros_to_datetime)
            .unwrap_or_else(Utc::now);

        let kind = targets.iter().find_map(|t| self.requested.remove(t));

        info!(
            "Self-test job {} started on {} drive(s) ({})",
            job,
            targets.len(),
            kind.map(|k| k.as_str()).unwrap_or("external")
        );

        self.jobs.insert(
            job.clone(),
            SmartJob {
                job_id: job.clone(),
                kind,
                targets,
                started_at,
            },
        );
        true
    }

    /// Correlate a finished job with its drive and normalize the result
    ///
    /// Unknown jobs are a no-op. The record is consumed even when no target
    /// drive is left in the registry. Only the first target found in the
    /// registry is reported.
    pub fn on_job_removed(
        &mut self,
        job: &ObjectPath,
        registry: &DriveRegistry,
    ) -> Result<Option<StatusEvent>> {
        let Some(smart_job) = self.jobs.shift_remove(job) else {
            debug!("Self-test job not tracked, ignoring: {}", job);
            return Ok(None);
        };
        self.completed += 1;

        let Some(drive) = registry
            .drives()
            .find(|d| smart_job.targets.contains(&d.object_id))
        else {
            warn!("Self-test job {} finished but none of its drives remain", job);
            return Ok(None);
        };

        let raw = drive.self_test_status()?;
        let identity = registry.identity(&drive.object_id)?;
        debug!(
            "Self-test on {} finished: serial {}, status '{}'",
            drive.object_id, identity.serial_number, raw
        );

        match normalize(&raw) {
            Some(reason) => Ok(Some(StatusEvent::disk(identity, reason))),
            None => {
                debug!("Self-test result not ready on drive {}", identity.serial_number);
                Ok(None)
            }
        }
    }

    /// Drop an unclaimed requested kind for a drive that went away
    pub fn forget_drive(&mut self, drive: &ObjectPath) {
        if let Some(kind) = self.requested.remove(drive) {
            debug!("Dropped unclaimed {} self-test request for {}", kind, drive);
        }
    }

    /// Whether a requested kind is waiting for a job on the drive
    pub fn has_pending_request(&self, drive: &ObjectPath) -> bool {
        self.requested.contains_key(drive)
    }

    /// Get an in-flight job
    pub fn get(&self, job: &ObjectPath) -> Option<&SmartJob> {
        self.jobs.get(job)
    }

    /// In-flight jobs in start order
    pub fn in_flight(&self) -> impl Iterator<Item = &SmartJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs consumed by a completion event so far
    pub fn completed(&self) -> u64 {
        self.completed
    }
}

fn micros_to_datetime(micros: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(micros / 1_000_000).ok()?;
    let nanos = u32::try_from((micros % 1_000_000) * 1_000).ok()?;
    Utc.timestamp_opt(secs, nanos).single()
}
