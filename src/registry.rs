//! Registry of device sessions, keyed by device id
//!
//! Owned by the entry point and passed by `Arc` to whatever needs to look a
//! device up. Device handles are cloned out of the map before any awaiting
//! call, so the map lock is never held across network I/O.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::adapters::http::HttpConnector;
use crate::adapters::{Connector, DeviceSnapshot, PanasonicDevice, SessionSettings};
use crate::bus::SharedBus;
use crate::config::DeviceConfig;

pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, PanasonicDevice>>,
    settings: SessionSettings,
    bus: SharedBus,
    connector: Arc<dyn Connector>,
}

impl DeviceRegistry {
    pub fn new(settings: SessionSettings, bus: SharedBus) -> Self {
        Self::with_connector(settings, bus, Arc::new(HttpConnector))
    }

    pub fn with_connector(
        settings: SessionSettings,
        bus: SharedBus,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            settings,
            bus,
            connector,
        }
    }

    /// Create a session for a new device, or reconfigure an existing one.
    ///
    /// A new device gets an initial refresh in the background; an existing
    /// device is reconnected so a changed address takes effect.
    pub async fn add_or_update(&self, config: DeviceConfig) -> PanasonicDevice {
        // Lookup and insert under one guard so concurrent adds share a session
        let (device, created) = {
            let mut devices = self.devices.write().await;
            match devices.entry(config.id.clone()) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => {
                    info!(device_id = %config.id, address = %config.address, "Adding device");
                    let device = PanasonicDevice::with_connector(
                        config.clone(),
                        self.settings,
                        self.bus.clone(),
                        self.connector.clone(),
                    );
                    entry.insert(device.clone());
                    (device, true)
                }
            }
        };

        if created {
            let initial = device.clone();
            tokio::spawn(async move { initial.refresh().await });
            return device;
        }

        debug!(device_id = %config.id, "Updating device configuration");
        device.reconfigure(config).await;
        if device.is_connected().await {
            let reconnect = device.clone();
            tokio::spawn(async move {
                let _ = reconnect.connect().await;
            });
        }
        device
    }

    pub async fn get(&self, id: &str) -> Option<PanasonicDevice> {
        self.devices.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.devices.read().await.contains_key(id)
    }

    /// Remove a device and shut its session down.
    ///
    /// Background refreshes or reconnects still in flight for it find the
    /// session closed and do nothing.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.devices.write().await.remove(id);
        match removed {
            Some(device) => {
                info!(device_id = id, "Removing device");
                device.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Remove every device
    pub async fn clear(&self) {
        let devices: Vec<PanasonicDevice> =
            self.devices.write().await.drain().map(|(_, d)| d).collect();
        for device in devices {
            device.shutdown().await;
        }
    }

    /// Sorted device ids
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn all(&self) -> Vec<PanasonicDevice> {
        let mut devices: Vec<PanasonicDevice> =
            self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Snapshots of all devices, sorted by id
    pub async fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots = Vec::new();
        for device in self.all().await {
            snapshots.push(device.snapshot().await);
        }
        snapshots
    }

    /// Connect every device; failures are reported on the bus
    pub async fn connect_all(&self) {
        for device in self.all().await {
            let _ = device.connect().await;
        }
    }

    /// Stop polling and close every transport
    pub async fn disconnect_all(&self) {
        for device in self.all().await {
            device.stop_polling().await;
            device.disconnect().await;
        }
    }

    /// Host is going to sleep: release every device
    pub async fn enter_standby(&self) {
        debug!("Entering standby, disconnecting devices");
        self.disconnect_all().await;
    }

    /// Host woke up: reconnect and refresh every device
    pub async fn exit_standby(&self) {
        debug!("Exiting standby, reconnecting devices");
        for device in self.all().await {
            if device.connect().await.is_ok() {
                device.refresh().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Transport, TransportError};
    use crate::bus::create_bus;
    use crate::adapters::CommandStatus;
    use crate::bus::BusEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn open(
            &self,
            _address: &str,
            _timeout: Duration,
        ) -> Result<Arc<dyn Transport>, TransportError> {
            Err(TransportError::Unreachable("refused".into()))
        }
    }

    /// Player that is always reachable and always in standby
    #[derive(Default)]
    struct Answering {
        posts: Arc<AtomicUsize>,
    }

    struct AnsweringTransport {
        posts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for Answering {
        async fn open(
            &self,
            _address: &str,
            _timeout: Duration,
        ) -> Result<Arc<dyn Transport>, TransportError> {
            Ok(Arc::new(AnsweringTransport {
                posts: self.posts.clone(),
            }))
        }
    }

    #[async_trait]
    impl Transport for AnsweringTransport {
        async fn post(&self, _url: &str, _body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(b"00, \"\", 1\r\n0,0,0,00000000\r\n".to_vec())
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::with_connector(SessionSettings::default(), create_bus(), Arc::new(Refusing))
    }

    fn config(id: &str, address: &str) -> DeviceConfig {
        DeviceConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            address: address.to_string(),
            always_on: false,
        }
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let registry = registry();
        registry.add_or_update(config("bd2", "10.0.0.2")).await;
        registry.add_or_update(config("bd1", "10.0.0.1")).await;

        assert_eq!(registry.ids().await, vec!["bd1", "bd2"]);
        assert!(registry.get("bd1").await.is_some());
        assert_eq!(registry.len().await, 2);

        assert!(registry.remove("bd1").await);
        assert!(!registry.remove("bd1").await);
        assert!(!registry.contains("bd1").await);
    }

    #[tokio::test]
    async fn test_update_keeps_session() {
        let registry = registry();
        let first = registry.add_or_update(config("bd1", "10.0.0.1")).await;
        let second = registry.add_or_update(config("bd1", "10.0.0.9")).await;

        assert_eq!(registry.len().await, 1);
        assert_eq!(first.address().await, "10.0.0.9");
        assert_eq!(second.address().await, "10.0.0.9");
    }

    #[tokio::test]
    async fn test_snapshots_sorted() {
        let registry = registry();
        registry.add_or_update(config("zz", "10.0.0.3")).await;
        registry.add_or_update(config("aa", "10.0.0.4")).await;

        let ids: Vec<String> = registry.snapshots().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["aa", "zz"]);

        registry.clear().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_device_stays_down() {
        let connector = Answering::default();
        let posts = connector.posts.clone();
        let bus = create_bus();
        let registry =
            DeviceRegistry::with_connector(SessionSettings::default(), bus.clone(), Arc::new(connector));

        let device = registry.add_or_update(config("bd1", "10.0.0.1")).await;
        assert!(registry.remove("bd1").await);
        let mut rx = bus.subscribe();
        let posted = posts.load(Ordering::SeqCst);

        // Initial refresh spawned by the add runs after the removal
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(device.is_closed());
        assert!(!device.is_polling().await);
        assert!(!device.is_connected().await);
        assert_eq!(posts.load(Ordering::SeqCst), posted);
        assert!(rx.try_recv().is_err());
        assert_eq!(device.send_key("MENU").await, CommandStatus::ServiceUnavailable);
        assert!(matches!(device.connect().await, Err(TransportError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_after_connect_stops_everything() {
        let connector = Answering::default();
        let posts = connector.posts.clone();
        let bus = create_bus();
        let registry =
            DeviceRegistry::with_connector(SessionSettings::default(), bus.clone(), Arc::new(connector));

        let device = registry.add_or_update(config("bd1", "10.0.0.1")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(device.is_connected().await);
        assert!(device.is_polling().await);

        let mut rx = bus.subscribe();
        registry.remove("bd1").await;
        let posted = posts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(!device.is_polling().await);
        assert_eq!(posts.load(Ordering::SeqCst), posted);
        // Only the disconnect from the removal itself
        assert!(matches!(rx.try_recv(), Ok(BusEvent::DeviceDisconnected { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_share_one_session() {
        let registry = Arc::new(registry());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .add_or_update(config("bd1", &format!("10.0.0.{}", i)))
                    .await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        let stored = registry.get("bd1").await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert!(handles.iter().all(|device| device.same_session(&stored)));
        registry.clear().await;
        assert!(stored.is_closed());
    }
}
