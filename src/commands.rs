/*
 * This file is part of thermgov.
 *
 * Copyright (C) 2025 thermgov contributors
 *
 * thermgov is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License version 2 as
 * published by the Free Software Foundation.
 *
 * thermgov is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with thermgov. If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::Context;
use std::fmt::Write;
use std::path::PathBuf;

use tg_core::constants::paths;
use tg_core::daemon_client::DaemonClient;
use tg_core::runtime_config::parse_toggle;
use tg_protocol::GovernorStatus;

use crate::cli::{Cli, Commands};

/// Socket from `--socket`, falling back to the environment and the default
pub fn socket_path(cli: &Cli) -> PathBuf {
    cli.socket.clone().unwrap_or_else(paths::socket_path)
}

/// Run one command against the daemon, returning what to print
pub fn execute(cli: &Cli) -> anyhow::Result<String> {
    let socket = socket_path(cli);
    tracing::debug!(socket = %socket.display(), "Connecting to daemon");

    let mut client = DaemonClient::connect(&socket)
        .with_context(|| format!("cannot reach thermgovd at {}", socket.display()))?;

    run(&mut client, &cli.command)
}

pub fn run(client: &mut DaemonClient, command: &Commands) -> anyhow::Result<String> {
    let output = match command {
        Commands::Status { json } => {
            let status = client.status()?;
            if *json {
                serde_json::to_string_pretty(&status)?
            } else {
                format_status(&status)
            }
        }

        Commands::Ping => {
            let reply = client.ping()?;
            format!("{} (thermgovd {})", reply, client.version()?)
        }

        Commands::Hotplug { value: None } => on_off(client.hotplug_enabled()?).to_string(),
        Commands::Hotplug { value: Some(value) } => {
            let enabled = parse_toggle(value)?;
            client.set_hotplug_enabled(enabled)?;
            format!("hotplug {}", on_off(enabled))
        }

        Commands::Threshold { value: None } => client.threshold()?.to_string(),
        Commands::Threshold { value: Some(celsius) } => {
            client.set_threshold(*celsius)?;
            format!("threshold {}°C", celsius)
        }

        Commands::WarmFreq { value: None } => client.warm_frequency()?.to_string(),
        Commands::WarmFreq { value: Some(khz) } => {
            client.set_warm_frequency(*khz)?;
            format!("warm frequency {} kHz", khz)
        }

        Commands::Core0 { value: None } => client.core0_permission()?.to_string(),
        Commands::Core0 { value: Some(value) } => {
            client.set_core0_permission(*value)?;
            format!("core0 permission {}", value)
        }
    };
    Ok(output)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Human-readable status block
pub fn format_status(status: &GovernorStatus) -> String {
    let mut out = String::new();
    let temperature = status
        .temperature
        .map(|t| format!("{}°C", t))
        .unwrap_or_else(|| "unknown".to_string());
    let cap = status
        .current_cap_khz
        .map(|khz| format!("{} kHz", khz))
        .unwrap_or_else(|| "none".to_string());
    let cores = status
        .online_cores
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let _ = writeln!(out, "thermgov status");
    let _ = writeln!(out, "===============");
    let _ = writeln!(out, "Topology:     {} (sensor {})", status.topology, status.sensor_id);
    let _ = writeln!(out, "Temperature:  {}", temperature);
    let _ = writeln!(out, "Online cores: {}", if cores.is_empty() { "-" } else { cores.as_str() });
    let _ = writeln!(out, "Hotplug:      {}", on_off(status.hotplug_enabled));
    let _ = writeln!(out, "Core 0:       {}", if status.core0_permission { "may go offline" } else { "pinned" });
    let _ = writeln!(
        out,
        "Throttle:     {} (threshold {}°C, release below {}°C)",
        if status.throttling { "active" } else { "idle" },
        status.threshold,
        status.threshold - status.hysteresis_margin
    );
    let _ = writeln!(out, "Warm cap:     {} kHz", status.warm_frequency_khz);
    let _ = writeln!(out, "Current cap:  {}", cap);
    let _ = write!(out, "Ticks:        {}", status.tick_count);
    if status.consecutive_sensor_failures > 0 {
        let _ = write!(out, " ({} sensor failures in a row)", status.consecutive_sensor_failures);
    }
    out
}
