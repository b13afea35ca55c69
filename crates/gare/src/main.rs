// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use gare::config::{supervisor_config_path, Config};

#[tokio::main]
async fn main() {
    let mut config = Config::parse();

    // Supervisor-provisioned station identity wins over env/flags.
    let supervisor_path = supervisor_config_path();
    if let Err(e) = config.apply_supervisor_file(&supervisor_path) {
        eprintln!("warning: supervisor config unreadable at {}: {e}", supervisor_path.display());
    }

    init_tracing(&config);
    gare::central::netprobe::ensure_crypto();

    if let Err(e) = config.validate() {
        error!("fatal: {e}");
        std::process::exit(2);
    }

    if let Err(e) = gare::node::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
