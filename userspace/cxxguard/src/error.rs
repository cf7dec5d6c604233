// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by every guard component.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::elf::FormatError;

/// Errors surfaced by guard components.
///
/// None of these ever reach the host's load call: the interceptor converts
/// them into diagnostics. Only the standalone probe turns them into a
/// non-zero exit.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Link-map introspection failed or returned an undecodable name.
    #[error("failed to resolve library path: {0}")]
    Resolution(String),
    /// The file is not a usable ELF image or lacks version definitions.
    #[error("cannot read version definitions from {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
    /// The isolated child probe failed or produced no usable output.
    #[error("system library probe failed: {0}")]
    Probe(String),
    /// The external dependency lister could not be run or reported failure.
    #[error("dependency listing failed for {path}: {reason}")]
    Lister { path: PathBuf, reason: String },
    /// `dlopen` rejected the library.
    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid guard configuration: {0}")]
    Config(#[from] toml::de::Error),
    /// The running platform has no ELF dynamic linker to introspect.
    #[error("unsupported platform: {0}")]
    Unsupported(&'static str),
}
