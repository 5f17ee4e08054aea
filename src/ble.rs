use async_trait::async_trait;
use btleplug::{
    api::{
        CharPropFlags, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use bytes::Bytes;
use futures::{future, stream::StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{FtmsError, Result},
    transport::{NotificationStream, Transport},
    types::{CharacteristicInfo, CharacteristicProperties, DeviceInfo},
};

/// A treadmill found while scanning
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Advertised details
    pub info: DeviceInfo,
    peripheral: Peripheral,
}

/// [`Transport`] backed by the host Bluetooth adapter through btleplug
pub struct BtleplugTransport {
    #[allow(dead_code)]
    manager: Manager,
    adapter: Adapter,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter on this host
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::AdapterUnavailable`] if the host has no adapter,
    /// or [`FtmsError::Ble`] if the Bluetooth stack cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(FtmsError::AdapterUnavailable)?;

        Ok(Self { manager, adapter })
    }

    async fn device_info(peripheral: &Peripheral) -> Option<DeviceInfo> {
        let properties = peripheral.properties().await.ok()??;
        let name = properties.local_name?;

        Some(DeviceInfo {
            name,
            mac_address: Some(properties.address.to_string()),
            rssi: properties.rssi.unwrap_or(0),
        })
    }

    fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(FtmsError::Disconnected)
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Device = DiscoveredDevice;
    type Handle = Peripheral;

    async fn scan(&mut self, name: &str, scan_timeout: Duration) -> Result<DiscoveredDevice> {
        info!("Scanning {}ms for '{}'", scan_timeout.as_millis(), name);

        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(scan_timeout).await;
        self.adapter.stop_scan().await?;

        for peripheral in self.adapter.peripherals().await? {
            let Some(info) = Self::device_info(&peripheral).await else {
                continue;
            };
            debug!("Saw {} ({:?}, rssi {})", info.name, info.mac_address, info.rssi);

            if info.name == name {
                info!("Found {} at {:?}", info.name, info.mac_address);
                return Ok(DiscoveredDevice { info, peripheral });
            }
        }

        Err(FtmsError::DeviceNotFound {
            name: name.to_string(),
        })
    }

    async fn connect(
        &mut self,
        device: &DiscoveredDevice,
        connect_timeout: Duration,
    ) -> Result<Peripheral> {
        info!("Connecting to device: {}", device.info.name);

        let peripheral = device.peripheral.clone();
        let timeout_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX);

        timeout(connect_timeout, peripheral.connect())
            .await
            .map_err(|_| FtmsError::Timeout { timeout_ms })?
            .map_err(|e| FtmsError::ConnectionFailed(e.to_string()))?;

        info!("Successfully connected to {}", device.info.name);
        Ok(peripheral)
    }

    async fn list_characteristics(
        &mut self,
        handle: &Peripheral,
    ) -> Result<Vec<CharacteristicInfo>> {
        handle.discover_services().await?;

        let characteristics = handle
            .characteristics()
            .into_iter()
            .map(|c| CharacteristicInfo {
                uuid: c.uuid,
                properties: CharacteristicProperties {
                    read: c.properties.contains(CharPropFlags::READ),
                    write: c.properties.contains(CharPropFlags::WRITE),
                    write_without_response: c
                        .properties
                        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
                    notify: c.properties.contains(CharPropFlags::NOTIFY),
                },
            })
            .collect::<Vec<_>>();

        debug!("Device exposes {} characteristics", characteristics.len());
        Ok(characteristics)
    }

    async fn subscribe(
        &mut self,
        handle: &Peripheral,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let target = Self::find_characteristic(handle, characteristic)?;

        // Take the stream before subscribing so the first notification is not missed
        let notifications = handle
            .notifications()
            .await
            .map_err(|e| FtmsError::NotifyFailed(e.to_string()))?;
        handle
            .subscribe(&target)
            .await
            .map_err(|e| FtmsError::NotifyFailed(e.to_string()))?;

        Ok(notifications
            .filter(move |n| future::ready(n.uuid == characteristic))
            .map(|n| Bytes::from(n.value))
            .boxed())
    }

    async fn unsubscribe(&mut self, handle: &Peripheral, characteristic: Uuid) -> Result<()> {
        let target = Self::find_characteristic(handle, characteristic)?;
        handle
            .unsubscribe(&target)
            .await
            .map_err(|e| FtmsError::NotifyFailed(e.to_string()))
    }

    async fn write(
        &mut self,
        handle: &Peripheral,
        characteristic: Uuid,
        data: &[u8],
        ack: bool,
    ) -> Result<()> {
        let target = Self::find_characteristic(handle, characteristic)?;
        let write_type = if ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        handle
            .write(&target, data, write_type)
            .await
            .map_err(|e| FtmsError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&mut self, handle: &Peripheral) -> Result<()> {
        handle.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self, handle: &Peripheral) -> bool {
        handle.is_connected().await.unwrap_or(false)
    }
}
