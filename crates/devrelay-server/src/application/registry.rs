//! SessionRegistry: the one shared, concurrency-safe map of live sessions.
//!
//! # What it stores
//!
//! ```text
//! DeviceKey ──► DeviceEntry { device: Outbox, clients: [Outbox, Outbox, ...] }
//!                                              (binding order)
//! ```
//!
//! # Invariants
//!
//! - A key maps to at most one device.
//! - A client appears in exactly one device's bound set: the one named by the
//!   key it joined with.
//! - Removing a device removes its bound set with it, so a later device that
//!   draws the same key starts with no clients.
//!
//! # Concurrency
//!
//! All state sits behind one `std::sync::RwLock`.  Mutations (register, bind,
//! unbind, unregister) take the write lock; lookups and fan-out snapshots take
//! the read lock and copy out what they need.  No lock is ever held across an
//! `.await`, so the synchronous lock is safe to use from async tasks and from
//! the WebSocket handshake callback alike.
//!
//! Fan-out works on a snapshot: a client bound after the snapshot was taken
//! does not receive that frame; a client bound before it does.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use devrelay_core::{
    generate_free_key, ConnectionId, DeviceKey, KeyGenerator, OsKeyGenerator, RelayError,
};

use super::outbox::Outbox;
use crate::domain::RelayConfig;

/// One registered device and the clients bound to it.
#[derive(Debug)]
struct DeviceEntry {
    device: Outbox,
    clients: Vec<Outbox>,
}

#[derive(Debug, Default)]
struct RegistryState {
    devices: HashMap<DeviceKey, DeviceEntry>,
}

/// Process-wide registry of device sessions and their bound clients.
///
/// Construct one per server (or per test) and share it behind an `Arc`.
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
    generator: Box<dyn KeyGenerator>,
    key_attempts: usize,
    max_clients_per_device: Option<usize>,
}

impl SessionRegistry {
    /// Creates an empty registry drawing keys from `generator`.
    pub fn new(
        generator: impl KeyGenerator + 'static,
        key_attempts: usize,
        max_clients_per_device: Option<usize>,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            generator: Box::new(generator),
            key_attempts: key_attempts.max(1),
            max_clients_per_device,
        }
    }

    /// Registry with OS-entropy keys and the limits from `config`.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            OsKeyGenerator::new(config.key_bytes),
            config.key_attempts,
            config.max_clients_per_device,
        )
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    /// Publishes `device` under a freshly generated key.
    ///
    /// Key generation and insertion happen under one write lock, so two
    /// concurrent registrations can never be handed the same key.
    ///
    /// # Errors
    ///
    /// - [`RelayError::EntropyUnavailable`] if the random source fails.
    /// - [`RelayError::KeySpaceExhausted`] if every candidate key was taken.
    pub fn register_device(&self, device: Outbox) -> Result<DeviceKey, RelayError> {
        let mut state = self.write();
        let key = generate_free_key(self.generator.as_ref(), self.key_attempts, |candidate| {
            state.devices.contains_key(candidate)
        })?;

        info!("device {} registered as {key}", device.id());
        state.devices.insert(
            key.clone(),
            DeviceEntry {
                device,
                clients: Vec::new(),
            },
        );
        Ok(key)
    }

    /// Atomically checks that `key` has a live device and appends `client`
    /// to its bound set.
    ///
    /// # Errors
    ///
    /// - [`RelayError::NoSuchDevice`] if no device is registered under `key`.
    /// - [`RelayError::ClientLimitReached`] if the fan-out cap is reached.
    pub fn bind_client(&self, key: &DeviceKey, client: Outbox) -> Result<(), RelayError> {
        let mut state = self.write();
        let entry = state
            .devices
            .get_mut(key)
            .ok_or_else(|| RelayError::NoSuchDevice(key.clone()))?;

        if let Some(limit) = self.max_clients_per_device {
            if entry.clients.len() >= limit {
                return Err(RelayError::ClientLimitReached {
                    key: key.clone(),
                    limit,
                });
            }
        }

        info!(
            "client {} bound to device {key} ({} bound)",
            client.id(),
            entry.clients.len() + 1
        );
        entry.clients.push(client);
        Ok(())
    }

    /// Removes the device registered under `key`, provided it is still the
    /// connection `device_id`.
    ///
    /// Bound clients are detached but not closed.  Returns `true` if an entry
    /// was removed.
    pub fn unregister_device(&self, key: &DeviceKey, device_id: ConnectionId) -> bool {
        let mut state = self.write();
        match state.devices.get(key) {
            Some(entry) if entry.device.id() == device_id => {}
            _ => return false,
        }

        if let Some(entry) = state.devices.remove(key) {
            info!(
                "device {device_id} unregistered from {key}; {} client(s) detached",
                entry.clients.len()
            );
        }
        true
    }

    /// Removes `client_id` from the bound set of `key`.  Idempotent: returns
    /// `false` (and changes nothing) if the client is not bound there.
    pub fn unbind_client(&self, key: &DeviceKey, client_id: ConnectionId) -> bool {
        let mut state = self.write();
        let Some(entry) = state.devices.get_mut(key) else {
            return false;
        };
        let before = entry.clients.len();
        entry.clients.retain(|client| client.id() != client_id);
        let removed = entry.clients.len() != before;
        if removed {
            debug!("client {client_id} unbound from device {key}");
        }
        removed
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Returns the device registered under `key`, if any.
    pub fn lookup_device(&self, key: &DeviceKey) -> Option<Outbox> {
        self.read()
            .devices
            .get(key)
            .map(|entry| entry.device.clone())
    }

    /// Returns the device a client is bound to, or `None` if the client is
    /// no longer in that device's bound set (device gone, or replaced by a
    /// newer device that reused the key).
    pub fn device_for_client(&self, key: &DeviceKey, client_id: ConnectionId) -> Option<Outbox> {
        let state = self.read();
        let entry = state.devices.get(key)?;
        entry
            .clients
            .iter()
            .any(|client| client.id() == client_id)
            .then(|| entry.device.clone())
    }

    /// Snapshot of the clients bound to `key`, in binding order.
    pub fn clients_of(&self, key: &DeviceKey) -> Vec<Outbox> {
        self.read()
            .devices
            .get(key)
            .map(|entry| entry.clients.clone())
            .unwrap_or_default()
    }

    pub fn device_count(&self) -> usize {
        self.read().devices.len()
    }

    pub fn client_count(&self, key: &DeviceKey) -> usize {
        self.read()
            .devices
            .get(key)
            .map_or(0, |entry| entry.clients.len())
    }

    // ── Lock helpers ──────────────────────────────────────────────────────────
    //
    // A panic while holding the lock cannot leave the maps half-updated (every
    // mutation is a single insert/remove/retain), so a poisoned lock is still
    // safe to use.

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use mockall::mock;

    mock! {
        pub Generator {}
        impl KeyGenerator for Generator {
            fn generate(&self) -> Result<DeviceKey, RelayError>;
        }
    }

    fn outbox(raw: u64) -> Outbox {
        // The receiver is dropped; these tests never deliver frames.
        Outbox::channel(ConnectionId::from_raw(raw), 1).0
    }

    fn fixed_generator(key: &'static str) -> MockGenerator {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(move || Ok(DeviceKey::from(key)));
        generator
    }

    #[test]
    fn test_register_then_lookup() {
        // Arrange
        let registry = SessionRegistry::default();

        // Act
        let key = registry.register_device(outbox(1)).unwrap();

        // Assert
        let found = registry.lookup_device(&key).expect("device must be present");
        assert_eq!(found.id(), ConnectionId::from_raw(1));
        assert_eq!(registry.device_count(), 1);
    }

    #[test]
    fn test_register_detects_collision_instead_of_overwriting() {
        // Arrange: the generator can only ever produce one key.
        let registry = SessionRegistry::new(fixed_generator("abcdef"), 4, None);
        registry.register_device(outbox(1)).unwrap();

        // Act
        let second = registry.register_device(outbox(2));

        // Assert: the first device keeps the key.
        assert!(matches!(
            second,
            Err(RelayError::KeySpaceExhausted { attempts: 4 })
        ));
        assert_eq!(
            registry
                .lookup_device(&DeviceKey::from("abcdef"))
                .unwrap()
                .id(),
            ConnectionId::from_raw(1)
        );
    }

    #[test]
    fn test_register_retries_past_collision() {
        let mut generator = MockGenerator::new();
        let mut seq = mockall::Sequence::new();
        for key in ["aaaaaa", "aaaaaa", "bbbbbb"] {
            generator
                .expect_generate()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move || Ok(DeviceKey::from(key)));
        }
        let registry = SessionRegistry::new(generator, 8, None);

        let first = registry.register_device(outbox(1)).unwrap();
        let second = registry.register_device(outbox(2)).unwrap();

        assert_eq!(first.as_str(), "aaaaaa");
        assert_eq!(second.as_str(), "bbbbbb");
    }

    #[test]
    fn test_register_propagates_entropy_failure() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(|| Err(RelayError::EntropyUnavailable("rng offline".into())));
        let registry = SessionRegistry::new(generator, 8, None);

        let result = registry.register_device(outbox(1));

        assert!(matches!(result, Err(RelayError::EntropyUnavailable(_))));
        assert_eq!(registry.device_count(), 0);
    }

    #[test]
    fn test_bind_to_unknown_key_is_no_such_device() {
        let registry = SessionRegistry::default();
        let result = registry.bind_client(&DeviceKey::from("nope00"), outbox(9));
        assert!(matches!(result, Err(RelayError::NoSuchDevice(_))));
    }

    #[test]
    fn test_clients_are_listed_in_binding_order() {
        // Arrange
        let registry = SessionRegistry::default();
        let key = registry.register_device(outbox(1)).unwrap();

        // Act
        for raw in [5, 3, 4] {
            registry.bind_client(&key, outbox(raw)).unwrap();
        }

        // Assert
        let ids: Vec<u64> = registry
            .clients_of(&key)
            .iter()
            .map(|c| c.id().as_u64())
            .collect();
        assert_eq!(ids, vec![5, 3, 4]);
    }

    #[test]
    fn test_client_limit_is_enforced() {
        let registry = SessionRegistry::new(OsKeyGenerator::default(), 8, Some(2));
        let key = registry.register_device(outbox(1)).unwrap();
        registry.bind_client(&key, outbox(2)).unwrap();
        registry.bind_client(&key, outbox(3)).unwrap();

        let third = registry.bind_client(&key, outbox(4));

        assert!(matches!(
            third,
            Err(RelayError::ClientLimitReached { limit: 2, .. })
        ));
        assert_eq!(registry.client_count(&key), 2);
    }

    #[test]
    fn test_unbind_is_idempotent() {
        // Arrange
        let registry = SessionRegistry::default();
        let key = registry.register_device(outbox(1)).unwrap();
        registry.bind_client(&key, outbox(2)).unwrap();
        registry.bind_client(&key, outbox(3)).unwrap();

        // Act
        let first = registry.unbind_client(&key, ConnectionId::from_raw(2));
        let second = registry.unbind_client(&key, ConnectionId::from_raw(2));

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(registry.client_count(&key), 1);
    }

    #[test]
    fn test_unbind_after_device_gone_is_noop() {
        let registry = SessionRegistry::default();
        let key = registry.register_device(outbox(1)).unwrap();
        registry.bind_client(&key, outbox(2)).unwrap();
        registry.unregister_device(&key, ConnectionId::from_raw(1));

        assert!(!registry.unbind_client(&key, ConnectionId::from_raw(2)));
    }

    #[test]
    fn test_unregister_releases_key_and_detaches_clients() {
        let registry = SessionRegistry::default();
        let key = registry.register_device(outbox(1)).unwrap();
        registry.bind_client(&key, outbox(2)).unwrap();

        assert!(registry.unregister_device(&key, ConnectionId::from_raw(1)));

        assert!(registry.lookup_device(&key).is_none());
        assert!(registry.clients_of(&key).is_empty());
        assert!(registry
            .device_for_client(&key, ConnectionId::from_raw(2))
            .is_none());
    }

    #[test]
    fn test_stale_unregister_does_not_remove_newer_device() {
        // Arrange: device 1 leaves, device 2 draws the same key.
        let registry = SessionRegistry::new(fixed_generator("c0ffee"), 1, None);
        let key = registry.register_device(outbox(1)).unwrap();
        registry.unregister_device(&key, ConnectionId::from_raw(1));
        registry.register_device(outbox(2)).unwrap();

        // Act: a late teardown for device 1 arrives.
        let removed = registry.unregister_device(&key, ConnectionId::from_raw(1));

        // Assert
        assert!(!removed);
        assert_eq!(
            registry.lookup_device(&key).unwrap().id(),
            ConnectionId::from_raw(2)
        );
    }

    #[test]
    fn test_detached_client_is_not_bound_to_key_reuser() {
        let registry = SessionRegistry::new(fixed_generator("beef00"), 1, None);
        let key = registry.register_device(outbox(1)).unwrap();
        registry.bind_client(&key, outbox(10)).unwrap();
        registry.unregister_device(&key, ConnectionId::from_raw(1));
        registry.register_device(outbox(2)).unwrap();

        assert!(registry
            .device_for_client(&key, ConnectionId::from_raw(10))
            .is_none());
        assert_eq!(registry.client_count(&key), 0);
    }

    #[test]
    fn test_concurrent_registrations_get_unique_keys() {
        // Arrange: a 1-byte key space (256 keys) makes collisions frequent.
        let registry = Arc::new(SessionRegistry::new(OsKeyGenerator::new(1), 10_000, None));
        let threads = 8;
        let per_thread = 16;

        // Act
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|i| {
                            registry
                                .register_device(outbox((t * per_thread + i) as u64))
                                .expect("key space not exhausted")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let keys: Vec<DeviceKey> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        let unique: HashSet<&DeviceKey> = keys.iter().collect();
        assert_eq!(unique.len(), threads * per_thread);
        assert_eq!(registry.device_count(), threads * per_thread);
    }
}
