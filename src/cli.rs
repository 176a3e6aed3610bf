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

//! Command Line Interface
//!
//! Argument definitions for `tgctl`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tgctl")]
#[command(version)]
#[command(about = "Inspect and tune the thermgov thermal governor")]
#[command(long_about = "Inspect and tune the thermgov thermal governor

Talks to the thermgovd daemon over its Unix socket. Every value command
prints the current value when called without an argument and changes it
when given one. Changes require root.

EXAMPLES:
    tgctl status                Show governor status
    tgctl status --json         Same, as JSON
    tgctl hotplug off           Stop hotplugging and bring every core online
    tgctl threshold 65          Start throttling at 65°C
    tgctl core0 1               Allow core 0 to be taken offline

ENVIRONMENT VARIABLES:
    THERMGOV_SOCKET        Daemon socket path
    THERMGOV_LOG=debug     Enable debug logging")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Daemon socket path
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Show governor status
    Status {
        /// Print the raw status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the daemon answers
    Ping,

    /// Show or toggle hotplug decisions (on/off)
    Hotplug {
        /// on, off, 1 or 0
        value: Option<String>,
    },

    /// Show or set the throttle threshold in °C
    Threshold {
        #[arg(allow_negative_numbers = true)]
        value: Option<i32>,
    },

    /// Show the warm frequency cap in kHz
    #[command(name = "warm-freq")]
    WarmFreq {
        /// Rejected by the daemon; the value is fixed at startup
        value: Option<u32>,
    },

    /// Show or set whether core 0 may be taken offline (0 or 1)
    Core0 {
        value: Option<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_value_commands() {
        let cli = Cli::try_parse_from(["tgctl", "threshold", "65"]).unwrap();
        assert_eq!(cli.command, Commands::Threshold { value: Some(65) });

        let cli = Cli::try_parse_from(["tgctl", "hotplug"]).unwrap();
        assert_eq!(cli.command, Commands::Hotplug { value: None });

        let cli = Cli::try_parse_from(["tgctl", "warm-freq", "800000"]).unwrap();
        assert_eq!(cli.command, Commands::WarmFreq { value: Some(800_000) });
    }

    #[test]
    fn test_global_socket_flag() {
        let cli = Cli::try_parse_from(["tgctl", "status", "--json", "--socket", "/tmp/tg.sock"]).unwrap();
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/tg.sock")));
        assert_eq!(cli.command, Commands::Status { json: true });
    }

    #[test]
    fn test_core0_rejects_non_numeric() {
        assert!(Cli::try_parse_from(["tgctl", "core0", "maybe"]).is_err());
    }
}
