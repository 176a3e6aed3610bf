//! thermgov Core Library
//!
//! Temperature-driven CPU core hotplug and frequency capping for Linux SoCs.
//!
//! # Features
//!
//! - **Band tables**: Per-topology temperature bands deciding which cores stay online
//! - **Throttle**: Frequency cap with a hysteresis dead band
//! - **Governor**: One serialized tick driving both engines through hardware ports
//! - **Runtime configuration**: Validated operator tunables shared with the governor
//!
//! # Module Structure
//!
//! - `engine/` - Hotplug and throttle decision engines (pure)
//! - `hw/` - Sysfs implementations of the ports
//! - `ports` - Sensor, core control and frequency control traits
//!
//! # Example
//!
//! ```
//! use tg_core::{engine::hotplug, Topology};
//!
//! let actions = hotplug::decide(Topology::Hexa, 82, false);
//! assert!(actions.iter().all(|a| a.core != 0 || a.online));
//! ```

// Grouped modules
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod daemon_client;
pub mod error;
pub mod governor;
pub mod platform;
pub mod ports;
pub mod runtime_config;
pub mod settings;
pub mod state;
pub mod topology;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{CoreAction, FrequencyCap, OnlineSnapshot, ThrottleAction, ThrottleState};
pub use governor::{Governor, ThrottleParams, TickReport};
pub use platform::PlatformBinding;
pub use ports::{CapConstraint, CoreControl, FrequencyControl, TemperatureSensor};
pub use runtime_config::{HotplugTransition, RuntimeConfig};
pub use settings::{load_settings, Settings, SocProfile};
pub use state::{GovernorState, Tunables};
pub use topology::{CoreIndex, Temperature, Topology};

// Re-export error types
pub use error::{GovernorError, Result};
