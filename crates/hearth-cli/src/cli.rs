use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "hearthd",
    about = "Digital-twin control plane for functional IoT systems",
    version
)]
pub struct Cli {
    /// Base URL of the hearth server for client commands.
    #[arg(long, env = "HEARTH_URL", global = true, default_value = "http://127.0.0.1:8080")]
    pub remote: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the control-plane server.
    Serve {
        /// Path to the settings file. Defaults apply when omitted.
        #[arg(long, env = "HEARTH_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show server health and component status.
    Status,

    /// Show a device's twin: intent, reported, desired, convergence.
    Twin {
        /// Device id in wire form, e.g. `esp32:pump`.
        device: String,
    },

    /// Set a user intent on a device. The value decides the type:
    /// `true`/`false` drives a relay, `0`-`4` a fan.
    Intent {
        /// Device id in wire form, e.g. `esp32:pump`.
        device: String,
        /// `true`, `false`, or a fan level 0-4.
        value: String,
    },

    /// Manage overrides.
    Override {
        #[command(subcommand)]
        command: OverrideCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum OverrideCommand {
    /// Apply an override at a category.
    Set {
        /// Device id in wire form.
        device: String,
        /// MANUAL, SCHEDULED, MAINTENANCE or EMERGENCY.
        category: String,
        /// `true`, `false`, or a fan level 0-4.
        value: String,
        /// Reason recorded with the override.
        #[arg(long, default_value = "set via cli")]
        reason: String,
        /// Override lifetime; permanent when omitted.
        #[arg(long)]
        ttl_seconds: Option<u64>,
    },

    /// Cancel an override at a category.
    Clear {
        /// Device id in wire form.
        device: String,
        /// MANUAL, SCHEDULED, MAINTENANCE or EMERGENCY.
        category: String,
    },
}
