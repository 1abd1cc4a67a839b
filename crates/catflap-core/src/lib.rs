// catflap-core: domain model, policy engine, and reactive sync layer
// between catflap-api and consumers (CLI, automations).

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::GatewayConfig;
pub use error::CoreError;
pub use gateway::{ConnectionState, FlapUpdate, Gateway};
pub use store::DataStore;
pub use stream::EntityStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Core entities
    Device, DeviceConnectivity, Event, Pet,
    // Wire enums
    EventClassification, EventTriggerSource, SoundAction, UpdateKind,
    // Transit policy
    DeviceTransitPolicy, PolicyResult, Rule, RuleAction, RuleCriteria, TimeRange, TransitPolicy,
    // Push envelopes
    DeviceUpdate, EventUpdate,
};
