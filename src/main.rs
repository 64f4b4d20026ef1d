/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use std::sync::Arc;
use tokio::runtime;
use tracing::info;

mod config;
mod core;
mod network;
mod plugin;

use crate::plugin::PluginRegistry;

fn main() -> Result<(), String> {
    let runtime = core::init();

    let config = config::init(&runtime.options.config)
        .map_err(|e| format!("failed to load configuration: {e}"))?;

    let mut log_config = config.log.clone();
    if let Some(level) = runtime.options.log_level {
        log_config.level = level;
    }
    let _log_guard = core::init_log(log_config);

    tokio_run(config)
}

fn tokio_run(config: config::types::Config) -> Result<(), String> {
    let tokio_runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("pipedns-worker")
        .build()
        .map_err(|e| format!("failed to initialize Tokio runtime: {e}"))?;
    tokio_runtime.block_on(async_run(config))
}

async fn async_run(config: config::types::Config) -> Result<(), String> {
    info!("pipedns {} starting...", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(PluginRegistry::new());
    registry.install_presets().await;
    registry
        .init_plugins(config.plugins)
        .await
        .map_err(|e| e.to_string())?;

    info!("pipedns is up, awaiting queries");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to wait for shutdown signal: {e}"))?;

    info!("shutdown signal received, destroying plugins");
    registry.destroy_plugins().await;
    Ok(())
}
