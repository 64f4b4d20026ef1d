/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Unified error handling for pipedns.
//!
//! One crate-wide error type keeps propagation uniform: stages return
//! `Result<T>` and bubble failures with `?`, the outermost listener decides
//! what to log and drop.

use crate::config::types::ConfigError;
use thiserror::Error;

/// Main error type for pipedns.
#[derive(Debug, Error)]
pub enum DnsError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing or serialization failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plugin construction or execution error
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Network address parsing error
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// Tokio runtime / task error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Plugin dependency resolution error
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Protocol(String),

    /// hickory wire-format error
    #[error("DNS wire error: {0}")]
    HickoryProto(#[from] hickory_proto::ProtoError),

    /// Deadline fired before any branch produced a result
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Generic error with custom message
    #[error("{0}")]
    Generic(String),
}

impl DnsError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DnsError::Config(msg.into())
    }

    /// Create a plugin error
    pub fn plugin<S: Into<String>>(msg: S) -> Self {
        DnsError::Plugin(msg.into())
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        DnsError::Runtime(msg.into())
    }

    /// Create a dependency error
    pub fn dependency<S: Into<String>>(msg: S) -> Self {
        DnsError::Dependency(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        DnsError::Protocol(msg.into())
    }

    /// Create a deadline error
    pub fn deadline<S: Into<String>>(msg: S) -> Self {
        DnsError::DeadlineExceeded(msg.into())
    }
}

impl From<String> for DnsError {
    fn from(s: String) -> Self {
        DnsError::Generic(s)
    }
}

impl From<&str> for DnsError {
    fn from(s: &str) -> Self {
        DnsError::Generic(s.to_string())
    }
}

impl From<ConfigError> for DnsError {
    fn from(e: ConfigError) -> Self {
        DnsError::Config(e.to_string())
    }
}

/// Convenient type alias for Results using DnsError
pub type Result<T> = std::result::Result<T, DnsError>;
