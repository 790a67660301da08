use std::path::PathBuf;

use clap::Parser;

use crate::cli::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// `siteflow` is a control-plane daemon for Docker-based websites on a
/// remote host
#[derive(Debug, Parser)]
#[command(name = "siteflow", author, styles=styles::styles())]
pub struct SiteflowArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<SiteflowSubcommand>,

    /// Show version
    #[arg(short = 'v', long)]
    pub version: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum SiteflowSubcommand {
    /// Run the daemon
    #[command(name = "serve")]
    Serve {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bind host, overriding the config
        #[arg(long)]
        host: Option<String>,

        /// Bind port, overriding the config
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Load and validate the configuration, then exit
    #[command(name = "validate")]
    Validate {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Prune audit entries and backup runs past retention
    #[command(name = "cleanup")]
    Cleanup {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
