//! # Potlink - Smart Pot Firmware Core
//!
//! The connected-flower-pot firmware brain: sensing, automation, and a
//! single JSON line protocol to the backend, built for hosts where
//! allocation and bandwidth are both on a budget.
//!
//! ## Key Features
//!
//! - **Bounded JSON**: a scanning reader and capped builder, no DOM
//! - **One Envelope**: every frame is `{v,id,ts,t,d,p}`
//! - **Checksummed Settings**: a fixed-size record that survives power loss
//! - **Offline Autonomy**: threshold automation keeps running without a server
//!
//! ## Quick Start
//!
//! ```rust
//! use potlink::{LinkConfig, LinkState, MemoryStore, MemoryTransport, SmartPot};
//!
//! // Assemble the device around in-memory doubles
//! let mut pot = SmartPot::new(
//!     MemoryTransport::new(),
//!     MemoryStore::new(),
//!     LinkConfig::default(),
//! );
//! pot.register_sensor("soil", Box::new(|_: u64| 42));
//! pot.register_control("pump", Box::new(|_: bool| {}));
//!
//! // Run the loop: connect, register, report
//! pot.wifi_up();
//! for t in 0..5u64 {
//!     pot.tick(t * 1000);
//! }
//!
//! assert_eq!(pot.link_state(), LinkState::Registered);
//! assert_eq!(pot.sensors().get("soil"), Some(42));
//! ```
//!
//! ## Modules
//!
//! - [`json`]: Bounded JSON reading and building
//! - [`protocol`]: Message envelope and factory
//! - [`config`]: Persistent device configuration
//! - [`storage`]: Non-volatile store abstraction
//! - [`sensors`]: Sensor drivers and cached readings
//! - [`controls`]: Actuator registry
//! - [`engine`]: Threshold automation
//! - [`transport`]: Framed transport (TCP and in-memory)
//! - [`link`]: Device-server session machine
//! - [`device`]: The assembled firmware facade

// Modules
pub mod config;
pub mod controls;
pub mod device;
pub mod engine;
pub mod error;
pub mod json;
pub mod link;
pub mod protocol;
pub mod sensors;
pub mod storage;
pub mod transport;

// Re-exports for convenient access
pub use config::{DeviceConfig, Thresholds, WorkMode};
pub use controls::{ControlExecutor, ControlRegistry};
pub use device::SmartPot;
pub use engine::{ThresholdEngine, TriggerRecord};
pub use error::{PotlinkError, Result};
pub use json::{JsonBuilder, JsonView};
pub use link::{DeviceLink, LinkConfig, LinkState, RestartHandle};
pub use protocol::{Envelope, MessageFactory, MessageType};
pub use sensors::{SensorDriver, SensorRegistry};
pub use storage::{FileStore, MemoryStore, NvStore};
pub use transport::{MemoryTransport, TcpTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
