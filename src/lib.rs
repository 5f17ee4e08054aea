#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # FTMS Treadmill
//!
//! A Rust library for monitoring and controlling treadmills that speak the
//! Bluetooth SIG Fitness Machine Service (FTMS) over Bluetooth Low Energy.
//!
//! The library decodes the Treadmill Data notification, encodes Fitness
//! Machine Control Point commands, and keeps a session with the device alive
//! across idle periods and dropped links. Developed against walking pads that
//! advertise as `EsangLinker`.
//!
//! ## Architecture
//!
//! - **Decoder / encoder** ([`protocol`]): pure functions over byte buffers
//! - **Command queue** ([`queue`]): FIFO filled by user input, drained by the poll loop
//! - **Session** ([`session`]): the connection and idle state machine, owning the transport
//! - **Poll loop** ([`poll`]): drives the session on a fixed cadence
//! - **Transport** ([`transport`], [`ble`]): scan/connect/read/write, backed by `btleplug`
//!
//! User input never touches the radio. Handlers on a [`TreadmillController`]
//! only enqueue commands and read the last published snapshot; every BLE
//! operation happens on the poll loop.
//!
//! ## Command delivery
//!
//! Control point writes are fire-and-forget (write without response). A
//! command is delivered at most once and is never confirmed; only the next
//! telemetry reading tells whether the belt actually changed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ftms_treadmill::{BtleplugTransport, PollLoop, SessionConfig, TreadmillSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BtleplugTransport::new().await?;
//!     let (session, controller) = TreadmillSession::new(transport, SessionConfig::default());
//!     let poll = PollLoop::new(session).spawn();
//!
//!     // Start the belt, then speed up by 0.1 km/h
//!     controller.toggle_pause().await;
//!     controller.speed_up().await;
//!
//!     println!("{}", controller.status().await.text);
//!
//!     controller.shutdown().await;
//!     poll.await??;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport backed by btleplug
pub mod ble;
/// Error types and handling
pub mod error;
/// Fixed-cadence session driver
pub mod poll;
/// Treadmill Data decoding and control point encoding
pub mod protocol;
/// Pending command queue
pub mod queue;
/// Session state machine and user-facing controller
pub mod session;
/// Status line rendering
pub mod status;
/// Transport abstraction over the BLE stack
pub mod transport;
/// Type definitions and data structures
pub mod types;

pub use ble::BtleplugTransport;
pub use error::{DecodeError, FtmsError, Result};
pub use poll::PollLoop;
pub use protocol::{decode_treadmill_data, encode_treadmill_data};
pub use queue::CommandQueue;
pub use session::{SessionSnapshot, TreadmillController, TreadmillSession};
pub use transport::{NotificationStream, Transport};
pub use types::{
    CharacteristicInfo, CharacteristicProperties, Command, DeviceInfo, Field, Reading,
    SessionConfig, SessionState, StatusColor, StatusLine,
};

use uuid::Uuid;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Advertised name of the walking pads this library was developed against
pub const DEFAULT_DEVICE_NAME: &str = "EsangLinker";

/// Fitness Machine Control Point short UUID
pub const CONTROL_POINT_SHORT_UUID: u16 = 0x2AD9;

/// Treadmill Data short UUID
pub const TREADMILL_DATA_SHORT_UUID: u16 = 0x2ACD;

/// Fitness Machine Control Point characteristic UUID (0x2AD9)
///
/// Write-only; receives resume, pause, stop and set-speed commands.
pub const CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// Treadmill Data characteristic UUID (0x2ACD)
///
/// Notify-only; carries the flag-driven telemetry record.
pub const TREADMILL_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2acd_0000_1000_8000_0080_5f9b_34fb);
