//! Drone-racing lap-timing hardware interface core: discovers I2C lap-timing
//! nodes, polls them on a fixed cadence, decodes lap/crossing events, and
//! exposes the configuration API that writes thresholds and frequency back
//! to the nodes.

pub mod bus;
pub mod callbacks;
pub mod capture;
pub mod cli;
pub mod clock;
pub mod codec;
pub mod config_api;
pub mod consts;
#[cfg(feature = "bme280-sensor")]
pub mod env;
pub mod error;
pub mod frame;
pub mod interface;
pub mod node;
pub mod poll;
pub mod registry;

pub use callbacks::EventSink;
pub use error::BusError;
pub use interface::{HardwareInterface, TimingConfig};
pub use node::{ApiLevel, LapSource, Node};
