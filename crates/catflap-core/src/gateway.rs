// ── Gateway abstraction ──
//
// Full lifecycle management for a gateway connection: session
// establishment, initial entity load, push routing into the DataStore,
// and reactive fan-out of derived facts (lock state, pet presence) to
// subscribers.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use catflap_api::{CONNECT_EVENT, PushEvent, Session};

use crate::config::GatewayConfig;
use crate::engine::assess_event;
use crate::error::CoreError;
use crate::model::{
    Device, DeviceTransitPolicy, DeviceUpdate, Event, EventUpdate, Pet, PolicyResult,
};
use crate::store::DataStore;
use crate::stream::EntityStream;

const UPDATE_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

// ── FlapUpdate ───────────────────────────────────────────────────────

/// A derived state change, broadcast to subscribers after each merge.
#[derive(Debug, Clone)]
pub enum FlapUpdate {
    /// A device's own state changed (connectivity, description, policy).
    DeviceChanged { device: Device },

    /// An in-flight event accumulated another fragment.
    EventFragment {
        device_id: String,
        event: Event,
        verdict: PolicyResult,
    },

    /// An event received its frame count and is final.
    EventConcluded {
        device_id: String,
        event: Event,
        verdict: PolicyResult,
    },

    /// The inferred lock state of the flap changed.
    LockChanged { device_id: String, unlocked: bool },

    /// A pet's inferred location changed.
    PresenceChanged {
        device_id: String,
        rfid_code: String,
        name: String,
        present: bool,
    },

    /// The device's classifier flagged contraband in an event.
    ContrabandDetected {
        device_id: String,
        event_id: Option<i64>,
    },
}

// ── Gateway ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<GatewayInner>`. Manages the session
/// lifecycle, the initial device/policy/pet load, push routing, and
/// reactive entity streaming.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    store: Arc<DataStore>,
    session: Mutex<Option<Arc<Session>>>,
    connection_state: watch::Sender<ConnectionState>,
    update_tx: broadcast::Sender<Arc<FlapUpdate>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Create a new Gateway from configuration. Does NOT connect --
    /// call [`connect()`](Self::connect) to open the session and load state.
    pub fn new(config: GatewayConfig) -> Self {
        let store = Arc::new(DataStore::new());
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);

        Self {
            inner: Arc::new(GatewayInner {
                config,
                store,
                session: Mutex::new(None),
                connection_state,
                update_tx,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Access the gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Access the underlying DataStore.
    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Open the session, load devices/policies/pets, and start routing
    /// pushes.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Connecting);

        let session = Arc::new(Session::connect(
            self.inner.config.transport(),
            self.inner.config.reconnect.clone(),
            self.inner.cancel.child_token(),
        ));

        // Entity state is session-scoped: rebuild from scratch.
        self.inner.store.clear();

        if let Err(e) = self.bootstrap(&session).await {
            session.shutdown();
            let _ = self.inner.connection_state.send(ConnectionState::Failed);
            return Err(e);
        }

        *self.inner.session.lock().await = Some(Arc::clone(&session));

        let mut handles = self.inner.task_handles.lock().await;
        let gateway = self.clone();
        let cancel = self.inner.cancel.clone();
        handles.push(tokio::spawn(route_pushes(gateway, session, cancel)));

        let _ = self.inner.connection_state.send(ConnectionState::Connected);
        info!(
            devices = self.inner.store.device_count(),
            pets = self.inner.store.pet_count(),
            "connected to gateway"
        );
        Ok(())
    }

    /// Tear down the session and background tasks.
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        if let Some(session) = self.inner.session.lock().await.take() {
            session.shutdown();
        }
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    // ── Initial load ─────────────────────────────────────────────────

    /// Fetch every device with its policies and derived pets.
    async fn bootstrap(&self, session: &Session) -> Result<(), CoreError> {
        let devices_resp = session
            .call("getDevices", json!({"subscribe": true}))
            .await?;
        if !devices_resp.is_array() {
            return Err(CoreError::UnexpectedResponse {
                operation: "getDevices".into(),
                reason: "expected a device list".into(),
            });
        }

        for device_id in device_ids_from_response(&devices_resp) {
            let payload = session
                .call("getDevice", json!({"deviceId": device_id, "subscribe": true}))
                .await?;
            let Some(mut device) = Device::from_payload(&payload, Some(&device_id)) else {
                warn!(%device_id, "getDevice returned no usable device");
                continue;
            };

            // Event subscriptions are per-device as well.
            if let Err(e) = session
                .call(
                    "getDeviceEvents",
                    json!({"deviceId": device_id, "subscribe": true}),
                )
                .await
            {
                warn!(%device_id, error = %e, "event subscription failed");
            }

            self.resolve_policies(session, &mut device).await;
            self.load_pets(session, &device).await;
            self.inner.store.upsert_device(device);
        }

        Ok(())
    }

    /// Load all transit policies for a device and attach the active one.
    ///
    /// Individual policy fetch failures are tolerated: a policy that
    /// cannot be resolved simply stays absent and evaluation degrades to
    /// UNKNOWN for that device.
    async fn resolve_policies(&self, session: &Session, device: &mut Device) {
        let resp = match session
            .call(
                "getDeviceTransitPolicies",
                json!({"deviceId": device.device_id}),
            )
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(device_id = %device.device_id, error = %e, "failed to list transit policies");
                return;
            }
        };

        for policy_id in policy_ids_from_response(&resp) {
            match session
                .call(
                    "getDeviceTransitPolicy",
                    json!({"deviceTransitPolicyId": policy_id}),
                )
                .await
            {
                Ok(payload) => {
                    let Some(policy) = DeviceTransitPolicy::from_payload(&payload) else {
                        warn!(policy_id, "unusable transit policy payload");
                        continue;
                    };
                    if device.device_transit_policy_id == Some(policy.device_transit_policy_id) {
                        device.attach_policy(policy.clone());
                    }
                    self.inner.store.upsert_policy(policy);
                }
                Err(e) => {
                    warn!(
                        policy_id,
                        device_id = %device.device_id,
                        error = %e,
                        "failed to load transit policy"
                    );
                }
            }
        }
    }

    /// Derive pets from recent RFID sightings and events.
    async fn load_pets(&self, session: &Session, device: &Device) {
        let events = match session
            .call("getDeviceEvents", json!({"deviceId": device.device_id}))
            .await
        {
            Ok(resp) => events_from_response(&resp),
            Err(e) => {
                warn!(device_id = %device.device_id, error = %e, "failed to load recent events");
                Vec::new()
            }
        };

        let sightings = match session
            .call(
                "getLastSeenRfidCodesByDevice",
                json!({"deviceId": device.device_id}),
            )
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(device_id = %device.device_id, error = %e, "failed to load RFID sightings");
                return;
            }
        };

        for entry in sightings.as_array().into_iter().flatten() {
            let Some(mut pet) = Pet::from_sighting(entry, &device.device_id) else {
                continue;
            };

            match session
                .call("getRfidProfile", json!({"rfidCode": pet.rfid_code}))
                .await
            {
                Ok(profile) => pet.apply_profile(&profile),
                Err(e) => debug!(rfid = %pet.rfid_code, error = %e, "no RFID profile"),
            }

            pet.last_seen_event = latest_event_for(&pet.rfid_code, &events).cloned();
            debug!(
                pet = pet.display_name(),
                device_id = %device.device_id,
                "found pet"
            );
            self.inner.store.upsert_pet(pet);
        }
    }

    // ── Push handling ────────────────────────────────────────────────

    async fn handle_push(&self, session: &Session, push: &PushEvent) {
        self.inner.store.mark_push();

        match push.event.as_str() {
            // The gateway forgets subscriptions on reconnect, and a user
            // change may add/remove devices under us.
            CONNECT_EVENT | "userUpdate" => self.refresh_subscriptions(session).await,
            "deviceUpdate" => self.handle_device_update(session, &push.data).await,
            "deviceEventUpdate" => self.handle_device_event_update(session, &push.data).await,
            "eventUpdate" => self.handle_event_update(&push.data),
            other => debug!(event = other, "ignoring unhandled push"),
        }
    }

    async fn refresh_subscriptions(&self, session: &Session) {
        debug!("refreshing gateway subscriptions");
        for device in self.inner.store.devices_snapshot().iter() {
            for call in ["getDevice", "getDeviceEvents"] {
                if let Err(e) = session
                    .call(call, json!({"deviceId": device.device_id, "subscribe": true}))
                    .await
                {
                    warn!(device_id = %device.device_id, call, error = %e, "re-subscribe failed");
                }
            }
        }
    }

    /// A device changed server-side: re-fetch the authoritative state,
    /// merge it into the held entity, and re-resolve policies.
    async fn handle_device_update(&self, session: &Session, data: &Value) {
        let Some(update) = DeviceUpdate::from_payload(data) else {
            warn!("malformed deviceUpdate push");
            return;
        };
        let Some(existing) = self.inner.store.device_by_id(&update.device_id) else {
            warn!(device_id = %update.device_id, "update for unknown device");
            return;
        };

        let mut device = (*existing).clone();
        match session
            .call(
                "getDevice",
                json!({"deviceId": update.device_id, "subscribe": true}),
            )
            .await
        {
            Ok(payload) => {
                if let Some(fresh) = Device::from_payload(&payload, Some(&update.device_id)) {
                    device.merge_from(fresh);
                }
            }
            Err(e) => {
                warn!(device_id = %update.device_id, error = %e, "getDevice failed, merging push body");
                if let Some(body) = update.body {
                    device.merge_from(body);
                }
            }
        }

        self.resolve_policies(session, &mut device).await;
        self.inner.store.upsert_device(device.clone());
        debug!(device_id = %device.device_id, "device updated");

        // With no transit in flight the lock simply reflects the idle state.
        let idle = self
            .inner
            .store
            .working_event(&device.device_id)
            .is_none_or(|event| event == Event::default());
        if idle {
            if let Some(unlocked) = device.is_unlocked_in_idle_state() {
                self.publish(FlapUpdate::LockChanged {
                    device_id: device.device_id.clone(),
                    unlocked,
                });
            }
        }

        self.publish(FlapUpdate::DeviceChanged { device });
    }

    /// A new event started: subscribe to its fragment stream and seed
    /// the working copy from the first authoritative snapshot.
    async fn handle_device_event_update(&self, session: &Session, data: &Value) {
        let Some(update) = EventUpdate::from_payload(data) else {
            warn!("malformed deviceEventUpdate push");
            return;
        };

        match session
            .call(
                "getEvent",
                json!({
                    "deviceId": update.device_id,
                    "eventId": update.event_id,
                    "subscribe": true,
                }),
            )
            .await
        {
            Ok(payload) => {
                if let Some(fragment) = Event::from_payload(&payload) {
                    self.process_fragment(&update.device_id, fragment);
                }
            }
            Err(e) => {
                warn!(
                    device_id = %update.device_id,
                    event_id = update.event_id,
                    error = %e,
                    "getEvent failed, falling back to push body"
                );
                if let Some(body) = update.body {
                    self.process_fragment(&update.device_id, body);
                }
            }
        }
    }

    fn handle_event_update(&self, data: &Value) {
        let Some(update) = EventUpdate::from_payload(data) else {
            warn!("malformed eventUpdate push");
            return;
        };
        let Some(fragment) = update.body else {
            debug!(
                device_id = %update.device_id,
                event_id = update.event_id,
                "eventUpdate without body"
            );
            return;
        };
        self.process_fragment(&update.device_id, fragment);
    }

    /// Merge one fragment and publish everything that follows from it.
    fn process_fragment(&self, device_id: &str, fragment: Event) {
        let Some(device) = self.inner.store.device_by_id(device_id) else {
            warn!(device_id, "event fragment for unknown device");
            return;
        };

        let phase = self.inner.store.absorb_event_fragment(device_id, fragment);
        let event = phase.event().clone();
        let assessment = assess_event(&device, &event);

        if assessment.contraband {
            self.publish(FlapUpdate::ContrabandDetected {
                device_id: device_id.to_owned(),
                event_id: event.event_id,
            });
        }

        if phase.is_concluded() {
            // Transit finished: presence can now be inferred, and the
            // lock falls back to the idle state.
            for pet in self.inner.store.pets_for_device(device_id) {
                if !event.carries_rfid(&pet.rfid_code) {
                    continue;
                }
                let mut pet = (*pet).clone();
                if let Some(timestamp) = event.timestamp {
                    pet.last_seen = timestamp;
                }
                pet.last_seen_event = Some(event.clone());
                let present = pet.is_present(&event, &device);
                let name = pet.display_name().to_owned();
                let rfid_code = pet.rfid_code.clone();
                self.inner.store.upsert_pet(pet);

                if let Some(present) = present {
                    self.publish(FlapUpdate::PresenceChanged {
                        device_id: device_id.to_owned(),
                        rfid_code,
                        name,
                        present,
                    });
                }
            }

            if let Some(unlocked) = device.is_unlocked_in_idle_state() {
                self.publish(FlapUpdate::LockChanged {
                    device_id: device_id.to_owned(),
                    unlocked,
                });
            }

            self.publish(FlapUpdate::EventConcluded {
                device_id: device_id.to_owned(),
                event,
                verdict: assessment.verdict,
            });
        } else {
            if let Some(unlocked) = assessment.unlocked {
                self.publish(FlapUpdate::LockChanged {
                    device_id: device_id.to_owned(),
                    unlocked,
                });
            }

            self.publish(FlapUpdate::EventFragment {
                device_id: device_id.to_owned(),
                event,
                verdict: assessment.verdict,
            });
        }
    }

    fn publish(&self, update: FlapUpdate) {
        // Send errors just mean no subscribers right now.
        let _ = self.inner.update_tx.send(Arc::new(update));
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Momentarily unlock the flap.
    pub async fn unlock(&self, device_id: &str) -> Result<(), CoreError> {
        self.run_device_command(device_id, "unlock").await
    }

    /// Reboot the device.
    pub async fn reboot(&self, device_id: &str) -> Result<(), CoreError> {
        self.run_device_command(device_id, "reboot").await
    }

    async fn run_device_command(&self, device_id: &str, command: &str) -> Result<(), CoreError> {
        self.require_device(device_id)?;
        let session = self.session().await?;
        session
            .call(
                "runDeviceCommand",
                json!({"deviceId": device_id, "command": command}),
            )
            .await?;
        Ok(())
    }

    /// Make another of the device's named transit policies the active one.
    pub async fn activate_policy(&self, device_id: &str, policy_id: i64) -> Result<(), CoreError> {
        self.require_device(device_id)?;
        if self.inner.store.policy_by_id(policy_id).is_none() {
            return Err(CoreError::PolicyNotFound {
                identifier: policy_id.to_string(),
            });
        }
        let session = self.session().await?;
        session
            .call(
                "activateDeviceTransitPolicy",
                json!({"deviceId": device_id, "deviceTransitPolicyId": policy_id}),
            )
            .await?;
        Ok(())
    }

    async fn session(&self) -> Result<Arc<Session>, CoreError> {
        self.inner
            .session
            .lock()
            .await
            .clone()
            .ok_or(CoreError::GatewayDisconnected)
    }

    fn require_device(&self, device_id: &str) -> Result<Arc<Device>, CoreError> {
        self.inner
            .store
            .device_by_id(device_id)
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: device_id.to_owned(),
            })
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Subscribe to the derived-state broadcast stream.
    pub fn updates(&self) -> broadcast::Receiver<Arc<FlapUpdate>> {
        self.inner.update_tx.subscribe()
    }

    // ── Snapshot / stream accessors (delegate to DataStore) ──────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.store.devices_snapshot()
    }

    pub fn pets_snapshot(&self) -> Arc<Vec<Arc<Pet>>> {
        self.inner.store.pets_snapshot()
    }

    pub fn policies_snapshot(&self) -> Arc<Vec<Arc<DeviceTransitPolicy>>> {
        self.inner.store.policies_snapshot()
    }

    pub fn devices(&self) -> EntityStream<Device> {
        self.inner.store.subscribe_devices()
    }

    pub fn pets(&self) -> EntityStream<Pet> {
        self.inner.store.subscribe_pets()
    }

    pub fn policies(&self) -> EntityStream<DeviceTransitPolicy> {
        self.inner.store.subscribe_policies()
    }
}

// ── Background push routing ──────────────────────────────────────────

async fn route_pushes(gateway: Gateway, session: Arc<Session>, cancel: CancellationToken) {
    let mut pushes = session.subscribe();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = pushes.recv() => {
                match result {
                    Ok(push) => gateway.handle_push(&session, &push).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "push consumer lagged, some updates were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    debug!("push routing stopped");
}

// ── Response shredding helpers ───────────────────────────────────────

/// `getDevices` answers a list of `{deviceId}` stubs.
fn device_ids_from_response(resp: &Value) -> Vec<String> {
    resp.as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("deviceId").and_then(Value::as_str))
        .map(str::to_owned)
        .collect()
}

/// `getDeviceTransitPolicies` answers a list of policy stubs.
fn policy_ids_from_response(resp: &Value) -> Vec<i64> {
    resp.as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("deviceTransitPolicyId").and_then(Value::as_i64))
        .collect()
}

/// `getDeviceEvents` answers recent events, newest first.
fn events_from_response(resp: &Value) -> Vec<Event> {
    resp.as_array()
        .into_iter()
        .flatten()
        .filter_map(Event::from_payload)
        .collect()
}

/// The most recent event carrying the given chip (events arrive newest
/// first, so the first hit wins).
fn latest_event_for<'a>(rfid_code: &str, events: &'a [Event]) -> Option<&'a Event> {
    events.iter().find(|event| event.carries_rfid(rfid_code))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_ids_from_stub_list() {
        let resp = json!([
            {"deviceId": "OC-001"},
            {"deviceId": "OC-002"},
            {"description": "no id, skipped"},
        ]);
        assert_eq!(device_ids_from_response(&resp), vec!["OC-001", "OC-002"]);
        assert!(device_ids_from_response(&Value::Null).is_empty());
    }

    #[test]
    fn policy_ids_from_stub_list() {
        let resp = json!([
            {"deviceTransitPolicyId": 5},
            {"name": "no id, skipped"},
            {"deviceTransitPolicyId": 9},
        ]);
        assert_eq!(policy_ids_from_response(&resp), vec![5, 9]);
    }

    #[test]
    fn latest_event_is_first_match() {
        let events = events_from_response(&json!([
            {"eventId": 3, "rfidCodes": ["B"]},
            {"eventId": 2, "rfidCodes": ["A"]},
            {"eventId": 1, "rfidCodes": ["A"]},
        ]));
        assert_eq!(latest_event_for("A", &events).unwrap().event_id, Some(2));
        assert!(latest_event_for("Z", &events).is_none());
    }

    #[tokio::test]
    async fn gateway_starts_disconnected() {
        let config = GatewayConfig::new(
            crate::config::DEFAULT_GATEWAY_URL.parse().unwrap(),
            secrecy::SecretString::from("tok"),
        );
        let gateway = Gateway::new(config);

        assert_eq!(
            *gateway.connection_state().borrow(),
            ConnectionState::Disconnected
        );
        assert_eq!(gateway.store().device_count(), 0);
        assert!(matches!(
            gateway.unlock("OC-001").await,
            Err(CoreError::DeviceNotFound { .. })
        ));
    }
}
