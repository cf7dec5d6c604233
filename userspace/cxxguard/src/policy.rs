// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Reconciliation between the system and the shipped target library
//! INTENT: Load the shipped copy when the system one is too old, or warn when it is too late
//! DEPS: linkmap (handles, dlopen), probe (system path), elf (versions)
//! TESTS: decide() table below; tests/reconcile.rs drives Reconciler with stubs

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::GuardConfig;
use crate::elf;
use crate::linkmap::{DynamicLinker, LibraryLoader, LinkMapResolver};
use crate::probe::{IsolatedProbe, SystemProbe};
use crate::version::Version;

/// What to do once both versions are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Noop,
    ProactiveLoad,
    WarnAlreadyBound,
}

/// Pure decision table.
pub fn decide(system: Version, shipped: Version, already_bound: bool) -> Decision {
    if system >= shipped {
        Decision::Noop
    } else if already_bound {
        Decision::WarnAlreadyBound
    } else {
        Decision::ProactiveLoad
    }
}

/// Which branch a reconciliation run took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// System copy is at least as new as the shipped one.
    UpToDate { system: Version, shipped: Version },
    /// The shipped copy was mapped ahead of the system one.
    Loaded { path: PathBuf, system: Version, shipped: Version },
    /// Loading the shipped copy failed; the system one will be used.
    LoadFailed { path: PathBuf, reason: String },
    /// An older copy was already bound before the guard ran.
    AlreadyBound { system: Version, shipped: Version },
    /// A path or version could not be determined.
    Indeterminate,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::UpToDate { system, shipped } => {
                write!(f, "up to date (system {system}, shipped {shipped})")
            }
            Outcome::Loaded { path, system, shipped } => {
                write!(f, "loaded {} (system {system} < shipped {shipped})", path.display())
            }
            Outcome::LoadFailed { path, reason } => {
                write!(f, "failed to load {}: {reason}", path.display())
            }
            Outcome::AlreadyBound { system, shipped } => {
                write!(f, "already bound to older system copy ({system} < {shipped})")
            }
            Outcome::Indeterminate => f.write_str("indeterminate"),
        }
    }
}

/// Runs the reconciliation flow against a linker and a system probe.
#[derive(Debug, Clone)]
pub struct Reconciler<K, P> {
    linker: K,
    probe: P,
    target: String,
    prefix: String,
}

impl Reconciler<DynamicLinker, IsolatedProbe> {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(
            DynamicLinker,
            IsolatedProbe::from_config(config),
            &config.target,
            &config.version_prefix,
        )
    }
}

impl<K, P> Reconciler<K, P>
where
    K: LibraryLoader + LinkMapResolver,
    P: SystemProbe,
{
    pub fn new(linker: K, probe: P, target: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            linker,
            probe,
            target: target.into(),
            prefix: prefix.into(),
        }
    }

    /// Compares the system copy against `shipped` and acts on the result.
    ///
    /// Never fails; every problem is logged and reported as
    /// [`Outcome::Indeterminate`] or [`Outcome::LoadFailed`].
    pub fn reconcile(&self, shipped: &Path) -> Outcome {
        let (system, already_bound) = self.system_path();

        let shipped_ok = shipped.is_file();
        if !shipped_ok {
            warn!(
                "the path to the shipped {} is invalid: {}; runtime link errors may occur",
                self.target,
                shipped.display()
            );
        }
        let system = match system {
            Some(path) if path.is_file() => Some(path),
            Some(path) => {
                warn!(
                    "the path to the system {} is invalid: {}; runtime link errors may occur",
                    self.target,
                    path.display()
                );
                None
            }
            None => {
                warn!(
                    "the path to the system {} could not be determined; runtime link errors may occur",
                    self.target
                );
                None
            }
        };
        let Some(system) = system.filter(|_| shipped_ok) else {
            return Outcome::Indeterminate;
        };

        let versions = elf::max_version(&system, &self.prefix)
            .and_then(|sys| Ok((sys, elf::max_version(shipped, &self.prefix)?)));
        let (system_version, shipped_version) = match versions {
            Ok(versions) => versions,
            Err(err) => {
                warn!(
                    "{err}; cannot compare {} with {}, runtime link errors may occur",
                    system.display(),
                    shipped.display()
                );
                return Outcome::Indeterminate;
            }
        };
        debug!(
            "system {} at {} is {system_version}, shipped {} is {shipped_version}",
            self.target,
            system.display(),
            shipped.display()
        );

        match decide(system_version, shipped_version, already_bound) {
            Decision::Noop => Outcome::UpToDate {
                system: system_version,
                shipped: shipped_version,
            },
            Decision::WarnAlreadyBound => {
                warn!(
                    "an incompatible {} ({system_version} < {shipped_version}) was loaded from {} \
                     before this guard ran, most likely by another loader; runtime link errors may occur",
                    self.target,
                    system.display()
                );
                Outcome::AlreadyBound {
                    system: system_version,
                    shipped: shipped_version,
                }
            }
            Decision::ProactiveLoad => match self.linker.load(shipped) {
                Ok(_) => {
                    info!(
                        "loaded {} ({shipped_version}) ahead of system {system_version}",
                        shipped.display()
                    );
                    Outcome::Loaded {
                        path: shipped.to_path_buf(),
                        system: system_version,
                        shipped: shipped_version,
                    }
                }
                Err(err) => {
                    warn!("{err}; runtime link errors may occur");
                    Outcome::LoadFailed {
                        path: shipped.to_path_buf(),
                        reason: err.to_string(),
                    }
                }
            },
        }
    }

    /// The system copy's path and whether it is already mapped here.
    fn system_path(&self) -> (Option<PathBuf>, bool) {
        if let Some(handle) = self.linker.find_loaded(&self.target) {
            return match self.linker.resolve_path(handle) {
                Ok(path) => (Some(path), true),
                Err(err) => {
                    warn!("{} is already loaded but {err}; runtime link errors may occur", self.target);
                    (None, true)
                }
            };
        }
        match self.probe.probe_system_path(&self.target) {
            Ok(path) => (Some(path), false),
            Err(err) => {
                warn!("{err}; runtime link errors may occur");
                (None, false)
            }
        }
    }
}
