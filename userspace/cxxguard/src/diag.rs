// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Diagnostics sink for embedded use.

use env_logger::{Builder, Env, Target};

/// Routes `log` records to stderr, `warn` and above unless `RUST_LOG` says
/// otherwise. A no-op when the host already installed a logger.
pub fn install_stderr_logger() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .target(Target::Stderr)
        .try_init();
}
