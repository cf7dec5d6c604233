// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime `libstdc++` compatibility guard.
//!
//! A process that ships its own `libstdc++.so.6` can still end up bound to an
//! older system copy if something loads the system one first. The guard hooks
//! the host's load/import events and, the first time the target library is
//! about to bind (directly or through a dependency), compares the
//! `GLIBCXX_*` version definitions of the system and shipped copies. When the
//! system copy is older it maps the shipped one ahead of it; when it is too
//! late for that it warns.
//!
//! ```no_run
//! use cxxguard::{arm, GuardConfig, HookRegistry, LoadEvent};
//! use std::path::Path;
//!
//! let mut registry = HookRegistry::new();
//! let config = GuardConfig::default();
//! arm(Path::new("/opt/app/lib"), &mut registry, &config);
//! registry.emit(&LoadEvent::dl_load(Path::new("/opt/app/lib/libext.so")));
//! ```

pub mod config;
pub mod deps;
pub mod diag;
pub mod elf;
pub mod error;
pub mod interceptor;
pub mod linkmap;
pub mod locate;
pub mod policy;
pub mod probe;
pub mod version;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

pub use config::GuardConfig;
pub use deps::{DependencyEdge, DependencyLister, DependencyWalker, LddLister};
pub use elf::{max_version, FormatError};
pub use error::GuardError;
pub use interceptor::{EventKind, EventSource, GuardState, HookRegistry, LoadEvent, LoadHook, LoadInterceptor};
pub use linkmap::{DynamicLinker, LibraryHandle, LibraryLoader, LinkMapResolver};
pub use locate::{SearchOrigin, SearchVerdict, ShippedLibrary};
pub use policy::{decide, Decision, Outcome, Reconciler};
pub use probe::{standalone_probe, IsolatedProbe, SystemProbe};
pub use version::Version;

/// Canonical file name of the guarded library.
pub const TARGET_LIBRARY: &str = "libstdc++.so.6";
/// Version-definition namespace the guard compares.
pub const VERSION_NAMESPACE: &str = "GLIBCXX_";

/// True where the guard can introspect the dynamic linker.
pub const fn is_supported_platform() -> bool {
    cfg!(target_os = "linux")
}

/// `path` itself when it is a regular file, otherwise `path/<target>`.
pub fn shipped_library_path(path: &Path, target: &str) -> PathBuf {
    if path.is_file() {
        path.to_path_buf()
    } else {
        path.join(target)
    }
}

/// Arms the guard on `source` with the shipped library at `shipped` (a file,
/// or the directory holding it).
///
/// Returns `None` without registering anything on unsupported platforms.
pub fn arm<S: EventSource + ?Sized>(
    shipped: &Path,
    source: &mut S,
    config: &GuardConfig,
) -> Option<Arc<LoadInterceptor>> {
    if !is_supported_platform() {
        return None;
    }
    diag::install_stderr_logger();

    let shipped = shipped_library_path(shipped, &config.target);
    debug!("arming {} guard with {}", config.target, shipped.display());
    let walker = DependencyWalker::new(
        LddLister::new(&config.lister),
        &config.target,
        config.max_dependency_depth,
    );
    let interceptor = Arc::new(LoadInterceptor::new(
        Arc::new(GuardState::new(shipped)),
        &config.target,
        Box::new(walker),
        Box::new(Reconciler::from_config(config)),
    ));
    interceptor.attach(source);
    Some(interceptor)
}

/// Arms the guard from `CXXGUARD_CONFIG` / `CXXGUARD_SHIPPED`.
///
/// Without a configured shipped path, the running executable's RUNPATH and
/// RPATH are searched. Configuration problems are logged and leave the guard
/// unarmed.
pub fn arm_from_env<S: EventSource + ?Sized>(source: &mut S) -> Option<Arc<LoadInterceptor>> {
    if !is_supported_platform() {
        return None;
    }
    diag::install_stderr_logger();

    let config = match GuardConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            warn!("{err}; {TARGET_LIBRARY} guard not armed");
            return None;
        }
    };
    let shipped = match config.shipped.clone() {
        Some(shipped) => shipped,
        None => match shipped_from_current_exe(&config.target) {
            Some(shipped) => shipped,
            None => {
                warn!(
                    "no shipped {} configured or found on the executable's search path; guard not armed",
                    config.target
                );
                return None;
            }
        },
    };
    arm(&shipped, source, &config)
}

fn shipped_from_current_exe(target: &str) -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    match locate::shipped_from_runpath(&exe, target) {
        Ok(found) => found,
        Err(err) => {
            warn!("{err}");
            None
        }
    }
}
