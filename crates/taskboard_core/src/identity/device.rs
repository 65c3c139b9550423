//! Per-installation device identifier.
//!
//! # Invariants
//! - Once persisted, the device id is never regenerated.
//! - The numeric derivation is always at most `DEVICE_DIGITS` digits and
//!   depends on every character of the identifier.

use crate::persistence::{keys, KeyValueStore, PersistenceResult};
use log::{info, warn};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Width of the device segment inside generated ids.
pub const DEVICE_DIGITS: u32 = 9;

pub(crate) const DEVICE_MODULUS: u128 = 10u128.pow(DEVICE_DIGITS);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a known identifier. Blank input yields `None`.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Random identifier for a fresh installation.
    pub fn random() -> Self {
        Self(format!("device-{}", Uuid::new_v4().simple()))
    }

    /// Non-persisted identifier used when id generation runs before the
    /// installation identity has been resolved.
    pub fn emergency() -> Self {
        Self(format!("emergency-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed-width numeric derivation of the whole identifier.
    ///
    /// Name-based UUID of the id folded into `DEVICE_DIGITS` decimal
    /// digits, so ids sharing a suffix or lacking digits still differ.
    pub fn numeric_segment(&self) -> u128 {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, self.0.as_bytes()).as_u128() % DEVICE_MODULUS
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Loads the persisted device id or creates one.
///
/// Preference order: persisted value, platform-provided stable id, random.
/// A newly chosen id is persisted before returning.
///
/// # Errors
/// - Returns persistence errors from reading or storing the id.
pub fn resolve_device_id(
    kv: &dyn KeyValueStore,
    platform_id: Option<&str>,
) -> PersistenceResult<DeviceId> {
    if let Some(stored) = kv.get(keys::DEVICE_ID)?.and_then(DeviceId::new) {
        info!("event=device_id_resolve module=identity status=ok source=persisted");
        return Ok(stored);
    }

    let (device_id, source) = match platform_id.and_then(DeviceId::new) {
        Some(platform) => (platform, "platform"),
        None => (DeviceId::random(), "random"),
    };
    kv.set(keys::DEVICE_ID, device_id.as_str())?;
    if source == "random" {
        warn!("event=device_id_resolve module=identity status=ok source=random");
    } else {
        info!("event=device_id_resolve module=identity status=ok source={source}");
    }
    Ok(device_id)
}
