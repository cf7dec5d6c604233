// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Symbol-version triples (`GLIBCXX_3.4.21` -> `3.4.21`).

use std::fmt;
use std::str::FromStr;

use log::warn;
use thiserror::Error;

/// A `major.minor.patch` interface version, ordered lexicographically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: u32,
}

/// A version string did not match `major[.minor[.patch]]`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid version string `{input}`: {reason}")]
pub struct ParseError {
    input: String,
    reason: &'static str,
}

impl ParseError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self { input: input.to_string(), reason }
    }
}

impl Version {
    pub const ZERO: Version = Version::new(0, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub const fn major(self) -> u32 {
        self.major
    }

    pub const fn minor(self) -> u32 {
        self.minor
    }

    pub const fn patch(self) -> u32 {
        self.patch
    }

    /// Parses `input`, falling back to `0.0.0` with a warning on malformed text.
    pub fn parse_lenient(input: &str) -> Self {
        match input.parse() {
            Ok(version) => version,
            Err(err) => {
                warn!("{err}; treating it as 0.0.0, runtime link errors may occur");
                Version::ZERO
            }
        }
    }

    /// Packs the triple as `0x00AABBCC`, clamping each component to 255.
    pub fn packed(self) -> u32 {
        let clamp = |value: u32| value.min(0xff);
        (clamp(self.major) << 16) | (clamp(self.minor) << 8) | clamp(self.patch)
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u32; 3];
        for (index, segment) in input.split('.').enumerate() {
            if index == parts.len() {
                return Err(ParseError::new(input, "more than three components"));
            }
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::new(input, "components must be decimal integers"));
            }
            parts[index] = segment
                .parse()
                .map_err(|_| ParseError::new(input, "component out of range"))?;
        }
        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
