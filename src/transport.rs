use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::{error::Result, types::CharacteristicInfo};

/// Stream of raw notification payloads from one characteristic
pub type NotificationStream = BoxStream<'static, Bytes>;

/// The BLE operations a treadmill session needs
///
/// [`crate::ble::BtleplugTransport`] is the production implementation. All
/// methods are only ever called from the poll loop, one at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// A device found by scanning
    type Device: Send + Sync;
    /// An open connection to a device
    type Handle: Send + Sync;

    /// Scan for a device advertising exactly `name`
    ///
    /// # Errors
    ///
    /// Returns [`crate::FtmsError::DeviceNotFound`] if the scan completes
    /// without a match.
    async fn scan(&mut self, name: &str, timeout: Duration) -> Result<Self::Device>;

    /// Open a connection to a scanned device
    ///
    /// # Errors
    ///
    /// Returns [`crate::FtmsError::ConnectionFailed`] or
    /// [`crate::FtmsError::Timeout`] if the link cannot be established.
    async fn connect(&mut self, device: &Self::Device, timeout: Duration) -> Result<Self::Handle>;

    /// List every characteristic the connected device exposes
    ///
    /// # Errors
    ///
    /// Returns a transport error if service discovery fails.
    async fn list_characteristics(&mut self, handle: &Self::Handle)
        -> Result<Vec<CharacteristicInfo>>;

    /// Subscribe to notifications of a characteristic
    ///
    /// # Errors
    ///
    /// Returns [`crate::FtmsError::NotifyFailed`] if the subscription is refused.
    async fn subscribe(
        &mut self,
        handle: &Self::Handle,
        characteristic: Uuid,
    ) -> Result<NotificationStream>;

    /// Stop notifications of a characteristic
    ///
    /// # Errors
    ///
    /// Returns [`crate::FtmsError::NotifyFailed`] if the device rejects it.
    async fn unsubscribe(&mut self, handle: &Self::Handle, characteristic: Uuid) -> Result<()>;

    /// Write bytes to a characteristic, with or without acknowledgement
    ///
    /// # Errors
    ///
    /// Returns [`crate::FtmsError::WriteFailed`] if the write is rejected.
    async fn write(
        &mut self,
        handle: &Self::Handle,
        characteristic: Uuid,
        data: &[u8],
        ack: bool,
    ) -> Result<()>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns a transport error if the disconnect request fails.
    async fn disconnect(&mut self, handle: &Self::Handle) -> Result<()>;

    /// Whether the connection is still up
    async fn is_connected(&self, handle: &Self::Handle) -> bool;
}

/// Collect notifications for `window` and return the most recent one
///
/// Returns early if the stream ends.
pub async fn latest_notification(
    mut notifications: NotificationStream,
    window: Duration,
) -> Option<Bytes> {
    let deadline = Instant::now() + window;
    let mut latest = None;

    while let Ok(Some(value)) = timeout_at(deadline, notifications.next()).await {
        latest = Some(value);
    }

    latest
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::{
        error::FtmsError,
        protocol::encode_treadmill_data,
        types::{CharacteristicProperties, Reading},
        CONTROL_POINT_UUID, DEFAULT_DEVICE_NAME, TREADMILL_DATA_UUID,
    };
    use futures::stream;
    use std::sync::{Arc, Mutex};

    /// Scripted device behaviour plus a record of what the session did
    pub struct MockState {
        pub advertised_name: String,
        pub connect_fails: bool,
        pub characteristics: Vec<CharacteristicInfo>,
        pub notifications: Vec<Bytes>,
        pub write_fails: bool,
        pub subscribe_fails: bool,
        pub connected: bool,
        pub writes: Vec<(Uuid, Vec<u8>, bool)>,
        pub scans: usize,
        pub connects: usize,
        pub disconnects: usize,
        pub unsubscribes: usize,
    }

    #[derive(Clone)]
    pub struct MockTransport {
        pub state: Arc<Mutex<MockState>>,
    }

    pub fn ftms_characteristics() -> Vec<CharacteristicInfo> {
        vec![
            CharacteristicInfo {
                uuid: CONTROL_POINT_UUID,
                properties: CharacteristicProperties {
                    write: true,
                    ..Default::default()
                },
            },
            CharacteristicInfo {
                uuid: TREADMILL_DATA_UUID,
                properties: CharacteristicProperties {
                    notify: true,
                    ..Default::default()
                },
            },
        ]
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState {
                    advertised_name: DEFAULT_DEVICE_NAME.to_string(),
                    connect_fails: false,
                    characteristics: ftms_characteristics(),
                    notifications: vec![encode_treadmill_data(&Reading::new(300))],
                    write_fails: false,
                    subscribe_fails: false,
                    connected: false,
                    writes: Vec::new(),
                    scans: 0,
                    connects: 0,
                    disconnects: 0,
                    unsubscribes: 0,
                })),
            }
        }

        pub fn update(&self, f: impl FnOnce(&mut MockState)) {
            f(&mut self.state.lock().unwrap());
        }

        pub fn inspect<R>(&self, f: impl FnOnce(&MockState) -> R) -> R {
            f(&self.state.lock().unwrap())
        }

        /// Every subsequent telemetry read sees this reading
        pub fn set_reading(&self, reading: &Reading) {
            let bytes = encode_treadmill_data(reading);
            self.update(|state| state.notifications = vec![bytes]);
        }

        pub fn written_commands(&self) -> Vec<Vec<u8>> {
            self.inspect(|state| {
                state
                    .writes
                    .iter()
                    .map(|(_, data, _)| data.clone())
                    .collect()
            })
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        type Device = String;
        type Handle = usize;

        async fn scan(&mut self, name: &str, _timeout: Duration) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.scans += 1;
            if state.advertised_name == name {
                Ok(state.advertised_name.clone())
            } else {
                Err(FtmsError::DeviceNotFound {
                    name: name.to_string(),
                })
            }
        }

        async fn connect(&mut self, _device: &String, _timeout: Duration) -> Result<usize> {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            if state.connect_fails {
                return Err(FtmsError::ConnectionFailed("refused".to_string()));
            }
            state.connected = true;
            Ok(state.connects)
        }

        async fn list_characteristics(&mut self, _handle: &usize) -> Result<Vec<CharacteristicInfo>> {
            Ok(self.state.lock().unwrap().characteristics.clone())
        }

        async fn subscribe(&mut self, _handle: &usize, _characteristic: Uuid) -> Result<NotificationStream> {
            let state = self.state.lock().unwrap();
            if state.subscribe_fails {
                return Err(FtmsError::NotifyFailed("subscribe refused".to_string()));
            }
            Ok(stream::iter(state.notifications.clone()).boxed())
        }

        async fn unsubscribe(&mut self, _handle: &usize, _characteristic: Uuid) -> Result<()> {
            self.state.lock().unwrap().unsubscribes += 1;
            Ok(())
        }

        async fn write(
            &mut self,
            _handle: &usize,
            characteristic: Uuid,
            data: &[u8],
            ack: bool,
        ) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.write_fails {
                return Err(FtmsError::WriteFailed("gatt error".to_string()));
            }
            state.writes.push((characteristic, data.to_vec(), ack));
            Ok(())
        }

        async fn disconnect(&mut self, _handle: &usize) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.disconnects += 1;
            state.connected = false;
            Ok(())
        }

        async fn is_connected(&self, _handle: &usize) -> bool {
            self.state.lock().unwrap().connected
        }
    }
}
