/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Core functionality module
//!
//! Provides essential infrastructure including:
//! - Runtime initialization and command-line argument parsing
//! - Logging system setup with a custom formatter
//! - Query context and request handling shared by all listeners

use crate::config::types::LogConfig;
use crate::core::log::PipeDnsLogFormatter;
use crate::core::runtime::{Options, Runtime};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub mod context;
pub mod dns_utils;
pub mod error;
pub mod handler;

mod log;
mod runtime;

/// Parse command-line options.
pub fn init() -> Runtime {
    let options = Options::parse();
    Runtime { options }
}

/// Initialize the logging system with console and optional file output.
///
/// Returns a WorkerGuard that must be kept alive to ensure log flushing.
pub fn init_log(log: LogConfig) -> WorkerGuard {
    let (file_writer, guard) = if let Some(ref file_path) = log.file {
        let path = std::path::Path::new(file_path);
        let file_appender = tracing_appender::rolling::never(
            path.parent().unwrap_or_else(|| std::path::Path::new(".")),
            path.file_name().unwrap_or_else(|| "pipedns.log".as_ref()),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        (Some(non_blocking), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = fmt::layer()
        .event_format(PipeDnsLogFormatter)
        .with_writer(std::io::stdout);

    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .event_format(PipeDnsLogFormatter)
            .with_writer(writer)
    });

    let filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log.level);
        EnvFilter::new("info")
    });

    let subscriber = Registry::default().with(filter).with(console_layer);
    if let Some(file_layer) = file_layer {
        subscriber.with(file_layer).init();
    } else {
        subscriber.init();
    }

    guard.unwrap_or_else(|| tracing_appender::non_blocking(std::io::sink()).1)
}
