// ── Unified domain model ──
//
// Every type in this module is the canonical representation of a gateway
// entity. Each is built once, at the boundary, from the loosely-typed JSON
// the gateway sends; downstream code never re-inspects raw payloads.

pub mod device;
pub mod event;
pub mod pet;
pub mod policy;
pub mod update;

pub(crate) mod payload;

// ── Re-exports ──────────────────────────────────────────────────────
// Flat access: `use catflap_core::model::*` gives you everything.

pub use device::{Device, DeviceConnectivity};
pub use event::{Event, EventClassification, EventTriggerSource};
pub use pet::Pet;
pub use policy::{
    DeviceTransitPolicy, PolicyResult, Rule, RuleAction, RuleCriteria, SoundAction, TimeRange,
    TransitPolicy,
};
pub use update::{DeviceUpdate, EventUpdate, UpdateKind};
