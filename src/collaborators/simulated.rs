//! In-memory collaborators for demos and tests.
//!
//! Behave like a small fleet of devices and a cloud account, with optional
//! latency and injected transient failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{CloudApi, DeviceSession, Transport};
use crate::contexts::{ClaimCode, HardwareAddress, MeshNetworkInfo, SimRecord};
use crate::error::{CloudError, TransportError};

/// A device that the simulated transport can discover.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub serial: String,
    pub mobile_secret: String,
    pub device_id: String,
    pub platform_id: u16,
    pub iccid: Option<String>,
    pub network: Option<MeshNetworkInfo>,
}

impl SimulatedDevice {
    pub fn new(serial: &str, mobile_secret: &str, device_id: &str, platform_id: u16) -> Self {
        Self {
            serial: serial.to_string(),
            mobile_secret: mobile_secret.to_string(),
            device_id: device_id.to_string(),
            platform_id,
            iccid: None,
            network: None,
        }
    }

    pub fn with_iccid(mut self, iccid: &str) -> Self {
        self.iccid = Some(iccid.to_string());
        self
    }

    pub fn with_network(mut self, network: MeshNetworkInfo) -> Self {
        self.network = Some(network);
        self
    }

    /// The barcode payload printed on this device's sticker.
    pub fn barcode(&self) -> String {
        format!("{} {}", self.serial, self.mobile_secret)
    }

    fn address(&self) -> HardwareAddress {
        HardwareAddress(format!("sim:{}", self.serial))
    }
}

/// Simulated wireless transport.
pub struct SimulatedTransport {
    devices: Vec<SimulatedDevice>,
    latency: Duration,
    /// Number of upcoming `discover` calls that report "not found".
    discover_misses: AtomicU32,
    connects: AtomicUsize,
    claim_codes: Arc<Mutex<HashMap<String, ClaimCode>>>,
}

impl SimulatedTransport {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices,
            latency: Duration::ZERO,
            discover_misses: AtomicU32::new(0),
            connects: AtomicUsize::new(0),
            claim_codes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next `count` discoveries miss, as if the device were not
    /// advertising yet.
    pub fn with_discover_misses(self, count: u32) -> Self {
        self.discover_misses.store(count, Ordering::SeqCst);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Claim code a device received, keyed by device id.
    pub fn claim_code_for(&self, device_id: &str) -> Option<ClaimCode> {
        self.claim_codes.lock().get(device_id).cloned()
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn discover(&self, serial: &str) -> Result<HardwareAddress, TransportError> {
        self.pause().await;
        let missed = self
            .discover_misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let found = self.devices.iter().find(|d| d.serial == serial);
        match found {
            Some(device) if !missed => Ok(device.address()),
            _ => Err(TransportError::DeviceNotFound {
                serial: serial.to_string(),
            }),
        }
    }

    async fn connect(
        &self,
        address: &HardwareAddress,
        mobile_secret: &str,
    ) -> Result<Arc<dyn DeviceSession>, TransportError> {
        self.pause().await;
        self.connects.fetch_add(1, Ordering::SeqCst);

        let device = self
            .devices
            .iter()
            .find(|d| d.address() == *address)
            .ok_or_else(|| TransportError::ConnectFailed {
                address: address.to_string(),
                reason: "out of range".to_string(),
            })?;
        if device.mobile_secret != mobile_secret {
            return Err(TransportError::PairingRejected {
                address: address.to_string(),
            });
        }

        debug!(address = %address, "Simulated device paired");
        Ok(Arc::new(SimulatedSession {
            address: address.clone(),
            device: device.clone(),
            claim_codes: Arc::clone(&self.claim_codes),
        }))
    }
}

struct SimulatedSession {
    address: HardwareAddress,
    device: SimulatedDevice,
    claim_codes: Arc<Mutex<HashMap<String, ClaimCode>>>,
}

#[async_trait]
impl DeviceSession for SimulatedSession {
    fn address(&self) -> &HardwareAddress {
        &self.address
    }

    async fn device_id(&self) -> Result<String, TransportError> {
        Ok(self.device.device_id.clone())
    }

    async fn platform_id(&self) -> Result<u16, TransportError> {
        Ok(self.device.platform_id)
    }

    async fn iccid(&self) -> Result<String, TransportError> {
        self.device
            .iccid
            .clone()
            .ok_or_else(|| TransportError::Protocol("device has no SIM".to_string()))
    }

    async fn network_info(&self) -> Result<Option<MeshNetworkInfo>, TransportError> {
        Ok(self.device.network.clone())
    }

    async fn set_claim_code(&self, code: &ClaimCode) -> Result<(), TransportError> {
        self.claim_codes
            .lock()
            .insert(self.device.device_id.clone(), code.clone());
        Ok(())
    }

    async fn disconnect(&self) {
        debug!(address = %self.address, "Simulated session closed");
    }
}

/// Simulated device cloud.
pub struct SimulatedCloud {
    sims: HashMap<String, SimRecord>,
    latency: Duration,
    /// Number of upcoming `get_sim` calls that fail with a timeout.
    sim_timeouts: AtomicU32,
    sim_requests: AtomicUsize,
    claim_serial: AtomicUsize,
    names: Mutex<HashMap<String, String>>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self {
            sims: HashMap::new(),
            latency: Duration::ZERO,
            sim_timeouts: AtomicU32::new(0),
            sim_requests: AtomicUsize::new(0),
            claim_serial: AtomicUsize::new(0),
            names: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sim(mut self, sim: SimRecord) -> Self {
        self.sims.insert(sim.iccid.clone(), sim);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_sim_timeouts(self, count: u32) -> Self {
        self.sim_timeouts.store(count, Ordering::SeqCst);
        self
    }

    pub fn sim_request_count(&self) -> usize {
        self.sim_requests.load(Ordering::SeqCst)
    }

    pub fn name_of(&self, device_id: &str) -> Option<String> {
        self.names.lock().get(device_id).cloned()
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudApi for SimulatedCloud {
    async fn get_sim(&self, iccid: &str) -> Result<SimRecord, CloudError> {
        self.sim_requests.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self
            .sim_timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CloudError::Timeout {
                operation: "get_sim".to_string(),
            });
        }
        self.sims
            .get(iccid)
            .cloned()
            .ok_or_else(|| CloudError::NotFound {
                entity: "sim".to_string(),
                id: iccid.to_string(),
            })
    }

    async fn create_claim_code(&self) -> Result<ClaimCode, CloudError> {
        self.pause().await;
        let n = self.claim_serial.fetch_add(1, Ordering::SeqCst);
        Ok(ClaimCode(format!("claim-{n:04}")))
    }

    async fn rename_device(&self, device_id: &str, name: &str) -> Result<(), CloudError> {
        self.pause().await;
        self.names
            .lock()
            .insert(device_id.to_string(), name.to_string());
        Ok(())
    }
}
