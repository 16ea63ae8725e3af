//! Status Normalizer
//!
//! Maps raw self-test result codes onto the fixed status-reason vocabulary
//! understood by downstream consumers.

use serde::{Serialize, Serializer};

// =============================================================================
// Status Reason
// =============================================================================

/// Normalized drive status reason
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusReason {
    /// Drive present and healthy (`OK_None`)
    Ok,
    /// Drive no longer present (`EMPTY_None`)
    Empty,
    /// Self-test interrupted
    SmartInterrupted,
    /// Self-test aborted
    SmartAborted,
    /// Self-test reported a fatal failure
    SmartFailure,
    /// Self-test failed for an unknown reason
    SmartUnknown,
    /// Electrical failure
    SmartElectricalFailure,
    /// Servo failure
    SmartServoFailure,
    /// Read error
    SmartErrorRead,
    /// Handling damage
    SmartDamage,
    /// Result code outside the known table, kept verbatim
    Unrecognized(String),
}

impl StatusReason {
    /// Wire representation of the reason
    pub fn as_wire(&self) -> String {
        match self {
            StatusReason::Ok => "OK_None".to_string(),
            StatusReason::Empty => "EMPTY_None".to_string(),
            StatusReason::SmartInterrupted => "Unknown_smart_interrupted".to_string(),
            StatusReason::SmartAborted => "Unknown_smart_aborted".to_string(),
            StatusReason::SmartFailure => "Failed_smart_failure".to_string(),
            StatusReason::SmartUnknown => "Failed_smart_unknown".to_string(),
            StatusReason::SmartElectricalFailure => "Failed_smart_electrical_failure".to_string(),
            StatusReason::SmartServoFailure => "Failed_smart_servo_failure".to_string(),
            StatusReason::SmartErrorRead => "Failed_smart_error_read".to_string(),
            StatusReason::SmartDamage => "Failed_smart_damage".to_string(),
            StatusReason::Unrecognized(raw) => format!("Unknown_{}_unknown", raw),
        }
    }

    /// Check if this reason reports a failed drive
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StatusReason::SmartFailure
                | StatusReason::SmartUnknown
                | StatusReason::SmartElectricalFailure
                | StatusReason::SmartServoFailure
                | StatusReason::SmartErrorRead
                | StatusReason::SmartDamage
        )
    }
}

impl std::fmt::Display for StatusReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

impl Serialize for StatusReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire())
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Normalize a raw self-test result code
///
/// Matching is case-insensitive. An empty code means the self-test has not
/// finished yet and yields `None`; codes outside the table are kept verbatim
/// inside an `Unknown_<code>_unknown` reason.
pub fn normalize(raw: &str) -> Option<StatusReason> {
    if raw.is_empty() {
        return None;
    }

    let reason = match raw.to_lowercase().as_str() {
        "success" | "inprogress" => StatusReason::Ok,
        "interrupted" => StatusReason::SmartInterrupted,
        "aborted" => StatusReason::SmartAborted,
        "fatal" => StatusReason::SmartFailure,
        "error_unknown" => StatusReason::SmartUnknown,
        "error_electrical" => StatusReason::SmartElectricalFailure,
        "error_servo" => StatusReason::SmartServoFailure,
        "error_read" => StatusReason::SmartErrorRead,
        "error_handling" => StatusReason::SmartDamage,
        _ => StatusReason::Unrecognized(raw.to_string()),
    };

    Some(reason)
}
