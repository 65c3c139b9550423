//! Device identity and collision-free id generation.
//!
//! # Responsibility
//! - Resolve a stable per-installation device identifier.
//! - Mint numeric entity ids unique across every device that ever synced,
//!   without a central authority.
//!
//! # Invariants
//! - Id generation never fails and never blocks; a missing device identity
//!   is replaced by an emergency one.

pub mod device;
pub mod id_gen;

pub use device::{resolve_device_id, DeviceId, DEVICE_DIGITS};
pub use id_gen::IdGenerator;
