use async_trait::async_trait;
use tracing::{debug, info};

use crate::contexts::{DeviceType, SetupContexts};
use crate::flow::{SetupStep, StepError};
use crate::scopes::Scopes;

/// Reads the target's device id and hardware family.
pub struct FetchDeviceInfo;

#[async_trait]
impl SetupStep for FetchDeviceInfo {
    fn name(&self) -> &'static str {
        "fetch_device_info"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        let target = &ctxs.target_device;
        if target.device_id.is_set() && target.device_type.is_set() {
            return Ok(());
        }
        let session = target.session.require()?;

        if !target.device_id.is_set() {
            let device_id = session.device_id().await?;
            scopes.ensure_active()?;
            target.device_id.set(device_id)?;
        }

        if !target.device_type.is_set() {
            let platform_id = session.platform_id().await?;
            scopes.ensure_active()?;
            let device_type = DeviceType::from_platform_id(platform_id);
            if !device_type.is_supported() {
                return Err(StepError::Fatal(format!(
                    "device platform {platform_id} is not supported"
                )));
            }
            target.device_type.set(device_type)?;
        }

        info!(
            device_id = ?target.device_id.get(),
            device_type = ?target.device_type.get(),
            "Target device identified"
        );
        Ok(())
    }
}

/// Reads the ICCID of the target's SIM card.
pub struct FetchIccid;

#[async_trait]
impl SetupStep for FetchIccid {
    fn name(&self) -> &'static str {
        "fetch_iccid"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        let target = &ctxs.target_device;
        if target.iccid.is_set() {
            return Ok(());
        }
        let session = target.session.require()?;
        let iccid = session.iccid().await?;
        scopes.ensure_active()?;
        debug!(iccid = %iccid, "ICCID read from device");
        target.iccid.set(iccid)?;
        Ok(())
    }
}

/// Asks the commissioner which mesh network the target will join.
pub struct FetchNetworkInfo;

#[async_trait]
impl SetupStep for FetchNetworkInfo {
    fn name(&self) -> &'static str {
        "fetch_network_info"
    }

    async fn run_step(&self, ctxs: &SetupContexts, scopes: &Scopes) -> Result<(), StepError> {
        if ctxs.network.target_network.is_set() {
            return Ok(());
        }
        let session = ctxs.commissioner.session.require()?;
        let network = session.network_info().await?;
        scopes.ensure_active()?;

        let Some(network) = network else {
            return Err(StepError::Fatal(
                "commissioner is not part of a mesh network".to_string(),
            ));
        };
        info!(network = %network.name, "Joining mesh network");
        ctxs.network.target_network.set(network)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Transport;
    use crate::collaborators::simulated::SimulatedDevice;
    use crate::contexts::{BarcodeData, MeshNetworkInfo};
    use crate::flow::StepOutcome;
    use crate::steps::testing::{BORON_ICCID, Harness, boron};

    async fn connected(harness: &Harness, device: &SimulatedDevice) -> SetupContexts {
        let ctxs = SetupContexts::default();
        let address = harness.transport.discover(&device.serial).await.unwrap();
        let session = harness
            .transport
            .connect(&address, &device.mobile_secret)
            .await
            .unwrap();
        ctxs.target_device.session.set(session).unwrap();
        ctxs
    }

    #[tokio::test]
    async fn identifies_boron() {
        let harness = Harness::with_devices(vec![boron()]);
        let ctxs = connected(&harness, &boron()).await;

        assert_eq!(
            FetchDeviceInfo.run(&ctxs, &harness.scopes).await,
            StepOutcome::Success
        );
        assert_eq!(ctxs.target_device.device_id.get().as_deref(), Some("e00fce68boron"));
        assert_eq!(ctxs.target_device.device_type.get(), Some(DeviceType::Boron));

        assert_eq!(FetchIccid.run(&ctxs, &harness.scopes).await, StepOutcome::Success);
        assert_eq!(ctxs.target_device.iccid.get().as_deref(), Some(BORON_ICCID));
    }

    #[tokio::test]
    async fn unknown_platform_is_fatal() {
        let odd = SimulatedDevice::new("ODD000000001", "ODDSECRET", "e00fce68odd", 99);
        let harness = Harness::with_devices(vec![odd.clone()]);
        let ctxs = connected(&harness, &odd).await;

        let outcome = FetchDeviceInfo.run(&ctxs, &harness.scopes).await;
        assert_eq!(
            outcome,
            StepOutcome::FatalFailure("device platform 99 is not supported".to_string())
        );
        assert!(!ctxs.target_device.device_type.is_set());
    }

    #[tokio::test]
    async fn guard_skips_known_device() {
        let ctxs = SetupContexts::default();
        ctxs.target_device.device_id.set("known".to_string()).unwrap();
        ctxs.target_device.device_type.set(DeviceType::Argon).unwrap();
        let harness = Harness::with_devices(vec![]);

        // no session is needed when nothing is left to fetch
        assert_eq!(
            FetchDeviceInfo.run(&ctxs, &harness.scopes).await,
            StepOutcome::Success
        );
    }

    #[tokio::test]
    async fn iccid_without_sim_is_fatal() {
        let argon = SimulatedDevice::new("ARGAAA123456789", "ARGONSECRET", "e00fce68argon", 12);
        let harness = Harness::with_devices(vec![argon.clone()]);
        let ctxs = connected(&harness, &argon).await;
        assert!(matches!(
            FetchIccid.run(&ctxs, &harness.scopes).await,
            StepOutcome::FatalFailure(_)
        ));
    }

    #[tokio::test]
    async fn network_info_from_commissioner() {
        let network = MeshNetworkInfo {
            name: "home-mesh".to_string(),
            ext_pan_id: "dead00beef00cafe".to_string(),
            network_id: Some("5c0ffee".to_string()),
        };
        let commissioner =
            SimulatedDevice::new("XENBBB123456789", "XENONSECRET0002", "e00fce68comm", 14)
                .with_network(network.clone());
        let harness = Harness::with_devices(vec![commissioner.clone()]);

        let ctxs = SetupContexts::default();
        ctxs.commissioner
            .barcode
            .set(BarcodeData::parse(&commissioner.barcode()).unwrap())
            .unwrap();
        let address = harness.transport.discover(&commissioner.serial).await.unwrap();
        let session = harness
            .transport
            .connect(&address, &commissioner.mobile_secret)
            .await
            .unwrap();
        ctxs.commissioner.session.set(session).unwrap();

        assert_eq!(
            FetchNetworkInfo.run(&ctxs, &harness.scopes).await,
            StepOutcome::Success
        );
        assert_eq!(ctxs.network.target_network.get(), Some(network));
    }

    #[tokio::test]
    async fn commissioner_without_network_is_fatal() {
        let lonely = SimulatedDevice::new("XENCCC123456789", "XENONSECRET0003", "e00fce68lonely", 14);
        let harness = Harness::with_devices(vec![lonely.clone()]);
        let ctxs = SetupContexts::default();
        let address = harness.transport.discover(&lonely.serial).await.unwrap();
        let session = harness
            .transport
            .connect(&address, &lonely.mobile_secret)
            .await
            .unwrap();
        ctxs.commissioner.session.set(session).unwrap();

        assert!(matches!(
            FetchNetworkInfo.run(&ctxs, &harness.scopes).await,
            StepOutcome::FatalFailure(_)
        ));
    }
}
