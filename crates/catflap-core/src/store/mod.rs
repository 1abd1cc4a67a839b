// ── Central reactive data store ──
//
// Session-scoped storage for all gateway entities. Reads are wait-free,
// writes use DashMap's per-shard locks, and every mutation is broadcast
// to subscribers through `watch` channels. Entities are rebuilt from the
// gateway on every (re)connect; nothing here persists.

mod collection;

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::engine::{EventPhase, WorkingEvent};
use crate::model::{Device, DeviceTransitPolicy, Event, Pet};
use crate::stream::EntityStream;
use collection::EntityCollection;

/// Central reactive store for all gateway entities.
///
/// The synchronization layer is the single writer; consumers hold lookups
/// by id or watch-based subscriptions, never private copies.
pub struct DataStore {
    devices: EntityCollection<Device>,
    policies: EntityCollection<DeviceTransitPolicy>,
    pets: EntityCollection<Pet>,

    /// In-flight event per device, keyed by device id.
    working_events: DashMap<String, WorkingEvent>,

    /// The most recently concluded event, for late subscribers.
    last_concluded: ArcSwapOption<Event>,

    last_push: watch::Sender<Option<DateTime<Utc>>>,
}

impl DataStore {
    pub fn new() -> Self {
        let (last_push, _) = watch::channel(None);

        Self {
            devices: EntityCollection::new(),
            policies: EntityCollection::new(),
            pets: EntityCollection::new(),
            working_events: DashMap::new(),
            last_concluded: ArcSwapOption::empty(),
            last_push,
        }
    }

    // ── Devices ──────────────────────────────────────────────────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn device_by_id(&self, device_id: &str) -> Option<Arc<Device>> {
        self.devices.get(device_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn subscribe_devices(&self) -> EntityStream<Device> {
        EntityStream::new(self.devices.subscribe())
    }

    pub(crate) fn upsert_device(&self, device: Device) -> bool {
        self.devices.upsert(device.device_id.clone(), device)
    }

    // ── Transit policies ─────────────────────────────────────────────

    pub fn policies_snapshot(&self) -> Arc<Vec<Arc<DeviceTransitPolicy>>> {
        self.policies.snapshot()
    }

    pub fn policy_by_id(&self, policy_id: i64) -> Option<Arc<DeviceTransitPolicy>> {
        self.policies.get(&policy_id.to_string())
    }

    pub fn policies_for_device(&self, device_id: &str) -> Vec<Arc<DeviceTransitPolicy>> {
        self.policies
            .snapshot()
            .iter()
            .filter(|p| p.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn subscribe_policies(&self) -> EntityStream<DeviceTransitPolicy> {
        EntityStream::new(self.policies.subscribe())
    }

    pub(crate) fn upsert_policy(&self, policy: DeviceTransitPolicy) -> bool {
        self.policies
            .upsert(policy.device_transit_policy_id.to_string(), policy)
    }

    // ── Pets ─────────────────────────────────────────────────────────

    pub fn pets_snapshot(&self) -> Arc<Vec<Arc<Pet>>> {
        self.pets.snapshot()
    }

    pub fn pet(&self, device_id: &str, rfid_code: &str) -> Option<Arc<Pet>> {
        self.pets.get(&pet_key(device_id, rfid_code))
    }

    pub fn pets_for_device(&self, device_id: &str) -> Vec<Arc<Pet>> {
        self.pets
            .snapshot()
            .iter()
            .filter(|p| p.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn pet_count(&self) -> usize {
        self.pets.len()
    }

    pub fn subscribe_pets(&self) -> EntityStream<Pet> {
        EntityStream::new(self.pets.subscribe())
    }

    pub(crate) fn upsert_pet(&self, pet: Pet) -> bool {
        self.pets
            .upsert(pet_key(&pet.device_id, &pet.rfid_code), pet)
    }

    // ── Working events ───────────────────────────────────────────────

    /// Merge one event fragment into the device's working event.
    ///
    /// Conclusion (non-null frame count) resets the working copy and
    /// records the finished event in the last-concluded slot.
    pub(crate) fn absorb_event_fragment(&self, device_id: &str, fragment: Event) -> EventPhase {
        let mut working = self
            .working_events
            .entry(device_id.to_owned())
            .or_default();
        let phase = working.absorb(fragment);

        if let EventPhase::Concluded(ref event) = phase {
            self.last_concluded.store(Some(Arc::new(event.clone())));
        }
        phase
    }

    /// Current in-flight event state for a device, if any.
    pub fn working_event(&self, device_id: &str) -> Option<Event> {
        self.working_events
            .get(device_id)
            .map(|w| w.current().clone())
    }

    /// The most recently concluded event across all devices.
    pub fn last_concluded_event(&self) -> Option<Arc<Event>> {
        self.last_concluded.load_full()
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub(crate) fn mark_push(&self) {
        let _ = self.last_push.send(Some(Utc::now()));
    }

    /// When the last gateway push was observed, if ever.
    pub fn last_push(&self) -> Option<DateTime<Utc>> {
        *self.last_push.borrow()
    }

    /// Drop all session state (used on reconnect bootstrap).
    pub(crate) fn clear(&self) {
        self.devices.clear();
        self.policies.clear();
        self.pets.clear();
        self.working_events.clear();
        self.last_concluded.store(None);
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

fn pet_key(device_id: &str, rfid_code: &str) -> String {
    format!("{device_id}/{rfid_code}")
}
