//! Identity Resolver
//!
//! Derives a drive's stable id and serial number from the raw metadata the
//! event source reports: the alternate-name (symlink) list of its block
//! device and the serial property of the drive itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Constants
// =============================================================================

/// Marker a derived serial number starts at
pub const SERIAL_MARKER: &str = "drive";

/// Path fragment of generic by-id links
const BY_ID_FRAGMENT: &str = "/by-id/";

/// Leaf prefix of world-wide-name links
const WWN_PREFIX: &str = "wwn-";

// =============================================================================
// Drive Identity
// =============================================================================

/// Resolved identity of a drive, as emitted in disk status events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveIdentity {
    /// Stable alternate path of the drive
    pub stable_id: String,
    /// Serial number (reported or derived), may be empty
    pub serial_number: String,
}

/// Class of an alternate-name candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClass {
    /// World-wide-name link (`.../by-id/wwn-0x5000...`)
    WorldWideName,
    /// Any other by-id link (`.../by-id/ata-MODEL_SERIAL`)
    ById,
}

// =============================================================================
// Identity Resolver
// =============================================================================

/// Stateless helpers turning raw drive metadata into identities
pub struct IdentityResolver;

impl IdentityResolver {
    /// Classify a symlink as a stable-id candidate
    pub fn classify(link: &str) -> Option<LinkClass> {
        let leaf = Self::leaf(link);
        if leaf.starts_with(WWN_PREFIX) {
            Some(LinkClass::WorldWideName)
        } else if link.contains(BY_ID_FRAGMENT) {
            Some(LinkClass::ById)
        } else {
            None
        }
    }

    /// Pick the stable id from an alternate-name list
    ///
    /// A world-wide-name link beats a by-id link. Within a class the last
    /// candidate scanned wins.
    pub fn select_stable_id<'a, I>(links: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut wwn = None;
        let mut by_id = None;

        for link in links {
            match Self::classify(link) {
                Some(LinkClass::WorldWideName) => wwn = Some(link),
                Some(LinkClass::ById) => by_id = Some(link),
                None => {}
            }
        }

        wwn.or(by_id).map(str::to_string)
    }

    /// Resolve the serial number of a drive
    ///
    /// Returns the reported serial when present. Otherwise the trailing path
    /// segment of the stable id is used, cut to start at the last occurrence
    /// of [`SERIAL_MARKER`] (the whole segment when the marker is absent).
    /// Returns an empty string when neither source has data.
    pub fn resolve_serial(reported: &str, stable_id: Option<&str>) -> String {
        let reported = reported.trim();
        if !reported.is_empty() {
            return reported.to_string();
        }

        let Some(stable_id) = stable_id else {
            return String::new();
        };

        let leaf = Self::leaf(stable_id);
        match leaf.rfind(SERIAL_MARKER) {
            Some(idx) => leaf[idx..].to_string(),
            None => leaf.to_string(),
        }
    }

    /// Decode a string-like property value
    ///
    /// Accepts plain strings and byte arrays (NUL padding stripped).
    pub fn decode_string(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => {
                let bytes: Option<Vec<u8>> = items
                    .iter()
                    .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect();
                let mut bytes = bytes?;
                while bytes.last() == Some(&0) {
                    bytes.pop();
                }
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => None,
        }
    }

    /// Decode a list-of-strings property value (e.g. the symlink list)
    pub fn decode_string_list(value: &Value) -> Vec<String> {
        match value {
            Value::Array(items) if items.iter().all(Value::is_number) && !items.is_empty() => {
                Self::decode_string(value).into_iter().collect()
            }
            Value::Array(items) => items
                .iter()
                .filter_map(Self::decode_string)
                .filter(|s| !s.is_empty())
                .collect(),
            Value::String(s) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    fn leaf(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }
}
