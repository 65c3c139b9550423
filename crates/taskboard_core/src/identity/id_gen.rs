//! Numeric id generator.
//!
//! An id is the decimal concatenation
//! `<unix millis><device segment: 9 digits><counter: 6 digits>`, read back
//! as a `u128`. The per-kind counter also travels in snapshots as
//! `next*Id`, so merges can raise it past everything already seen.
//!
//! # Invariants
//! - `next_id` never fails; every `u64` millisecond value fits the layout.
//! - Two devices only share ids when their segments collide, which takes a
//!   collision of the name-based hash rather than matching id suffixes.
//! - Counters only move forward through `next_id` and `raise_to`.

use crate::clock::Clock;
use crate::identity::device::{DeviceId, DEVICE_MODULUS};
use crate::model::{EntityId, EntityKind, IdCounters};
use log::warn;
use once_cell::sync::OnceCell;
use std::sync::Arc;

const COUNTER_MODULUS: u128 = 1_000_000;
const TIMESTAMP_FACTOR: u128 = DEVICE_MODULUS * COUNTER_MODULUS;

pub struct IdGenerator {
    device: OnceCell<DeviceId>,
    counters: IdCounters,
    clock: Arc<dyn Clock>,
}

impl IdGenerator {
    pub fn new(clock: Arc<dyn Clock>, counters: IdCounters) -> Self {
        Self {
            device: OnceCell::new(),
            counters,
            clock,
        }
    }

    /// Installs the resolved device identity.
    ///
    /// Returns `false` when an identity (possibly an emergency one) is
    /// already in place; the existing identity is kept for the process
    /// lifetime.
    pub fn install_device(&self, device: DeviceId) -> bool {
        self.device.set(device).is_ok()
    }

    /// Current device identity, creating an emergency one if none was
    /// installed yet.
    pub fn device(&self) -> &DeviceId {
        self.device.get_or_init(|| {
            let fallback = DeviceId::emergency();
            warn!(
                "event=device_id_fallback module=identity status=degraded device_id={}",
                fallback
            );
            fallback
        })
    }

    pub fn counters(&self) -> IdCounters {
        self.counters
    }

    pub fn set_counters(&mut self, counters: IdCounters) {
        self.counters = counters;
    }

    /// Raises every counter to at least the matching value in `seen`.
    pub fn raise_to(&mut self, seen: IdCounters) {
        self.counters = self.counters.max(seen);
    }

    /// Mints the next id for `kind` and advances its counter.
    pub fn next_id(&mut self, kind: EntityKind) -> EntityId {
        let counter = self.counters.get(kind);
        self.counters.set(kind, counter.saturating_add(1));

        let millis = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        let device = self.device().numeric_segment();

        u128::from(millis) * TIMESTAMP_FACTOR
            + device * COUNTER_MODULUS
            + u128::from(counter) % COUNTER_MODULUS
    }
}
