//! Governor decision engines
//!
//! Contains the hotplug band evaluator and the frequency throttle.

pub mod hotplug;
mod throttle;

pub use hotplug::{CoreAction, OnlineSnapshot};
pub use throttle::{FrequencyCap, ThrottleAction, ThrottleState};
