//! Constants and configuration values for thermgov
//!
//! Centralizes the governor defaults, sysfs layout and file locations.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// Root of the sysfs tree (overridable through settings for tests/chroots)
    pub const SYSFS_ROOT: &str = "/sys";

    /// CPU devices, relative to the sysfs root
    pub const CPU_DIR: &str = "devices/system/cpu";

    /// Thermal zones, relative to the sysfs root
    pub const THERMAL_DIR: &str = "class/thermal";

    /// Possible CPU list (range syntax, e.g. "0-7")
    pub const CPU_POSSIBLE_FILE: &str = "possible";

    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/thermgov";

    /// Settings file inside CONFIG_DIR
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Environment override for the daemon socket (used by tgctl and tests)
    pub const SOCKET_ENV: &str = "THERMGOV_SOCKET";

    /// Default settings path
    pub fn settings_path() -> PathBuf {
        PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE)
    }

    /// Socket path: env override first, then /run when present, else /var/run
    pub fn socket_path() -> PathBuf {
        if let Ok(path) = std::env::var(SOCKET_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        PathBuf::from(run_dir()).join("thermgov.sock")
    }

    /// PID file location for the daemon
    pub fn pid_file_path() -> PathBuf {
        PathBuf::from(run_dir()).join("thermgovd.pid")
    }

    fn run_dir() -> &'static str {
        if std::path::Path::new("/run").exists() {
            "/run"
        } else {
            "/var/run"
        }
    }
}

/// Sysfs attribute names used by the hardware ports
pub mod sysfs {
    /// Per-core hotplug control ("0" / "1")
    pub const ONLINE: &str = "online";

    /// Per-core cpufreq directory
    pub const CPUFREQ_DIR: &str = "cpufreq";

    /// Hardware ceiling reported by cpufreq (kHz)
    pub const CPUINFO_MAX_FREQ: &str = "cpuinfo_max_freq";

    /// Policy ceiling written by the frequency port (kHz)
    pub const SCALING_MAX_FREQ: &str = "scaling_max_freq";

    /// Thermal zone reading
    pub const ZONE_TEMP: &str = "temp";

    /// Readings above this are reported in millidegrees
    pub const MILLIDEGREE_CUTOFF: i64 = 1000;
}

/// Throttle engine defaults
pub mod throttle {
    /// Lowest temperature that starts throttling (°C)
    pub const DEFAULT_THRESHOLD: i32 = 60;

    /// Accepted threshold range, inclusive
    pub const MIN_THRESHOLD: i32 = tg_protocol::MIN_THRESHOLD;
    pub const MAX_THRESHOLD: i32 = tg_protocol::MAX_THRESHOLD;

    /// Dead band below the threshold before the cap is lifted (°C)
    pub const DEFAULT_HYSTERESIS_MARGIN: i32 = 5;

    /// Warm frequency cap for generic SoCs (kHz)
    pub const DEFAULT_WARM_FREQ_KHZ: u32 = 864_000;

    /// Warm frequency cap for MSM8916-class SoCs (kHz)
    pub const MSM8916_WARM_FREQ_KHZ: u32 = 800_000;
}

/// Governor loop timing
pub mod timing {
    use super::Duration;

    /// Default poll interval between ticks
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// Poll interval floor accepted from settings
    pub const MIN_POLL_INTERVAL_MS: u64 = 100;

    /// Poll interval ceiling accepted from settings
    pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

    /// Delay before the first tick after startup
    pub const INITIAL_DELAY: Duration = Duration::from_millis(50);

    /// Period of the cap enforcement watcher
    pub const ENFORCE_INTERVAL: Duration = Duration::from_millis(250);

    /// Log every Nth consecutive failure after the first
    pub const FAILURE_LOG_EVERY: u32 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn threshold_default_is_in_range() {
        assert!(throttle::DEFAULT_THRESHOLD >= throttle::MIN_THRESHOLD);
        assert!(throttle::DEFAULT_THRESHOLD <= throttle::MAX_THRESHOLD);
    }

    #[test]
    #[serial]
    fn socket_path_honours_env_override() {
        std::env::set_var(paths::SOCKET_ENV, "/tmp/tg-test.sock");
        assert_eq!(paths::socket_path(), std::path::PathBuf::from("/tmp/tg-test.sock"));
        std::env::remove_var(paths::SOCKET_ENV);
        assert!(paths::socket_path().ends_with("thermgov.sock"));
    }
}
