// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: One-shot hook on the host's load/import events
//! INTENT: Run reconciliation exactly once, the first time the target library is about to bind
//! DEPS: policy (Reconciler), deps (DependencyWalker), std atomics
//! TESTS: repeated/concurrent events, non-qualifying paths, contained panics

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::deps::{is_named, DependencyLister, DependencyWalker};
use crate::linkmap::{LibraryLoader, LinkMapResolver};
use crate::policy::{Outcome, Reconciler};
use crate::probe::SystemProbe;

/// Process-wide guard state: where the shipped library lives and whether the
/// check is still pending.
#[derive(Debug)]
pub struct GuardState {
    shipped: PathBuf,
    armed: AtomicBool,
}

impl GuardState {
    pub fn new(shipped: impl Into<PathBuf>) -> Self {
        Self {
            shipped: shipped.into(),
            armed: AtomicBool::new(true),
        }
    }

    pub fn shipped(&self) -> &Path {
        &self.shipped
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Armed -> Disarmed. Returns true only for the single caller that made
    /// the transition.
    pub fn disarm(&self) -> bool {
        self.armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A module import; `path` is the resolved file, if the host knows it.
    Import,
    /// An explicit shared-library load.
    DlLoad,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadEvent<'a> {
    pub kind: EventKind,
    pub path: Option<&'a Path>,
}

impl<'a> LoadEvent<'a> {
    pub fn import(path: Option<&'a Path>) -> Self {
        Self { kind: EventKind::Import, path }
    }

    pub fn dl_load(path: &'a Path) -> Self {
        Self {
            kind: EventKind::DlLoad,
            path: Some(path),
        }
    }
}

/// Object-safe view of a reconciliation run.
pub trait Reconcile: Send + Sync {
    fn reconcile(&self, shipped: &Path) -> Outcome;
}

impl<K, P> Reconcile for Reconciler<K, P>
where
    K: LibraryLoader + LinkMapResolver + Send + Sync,
    P: SystemProbe + Send + Sync,
{
    fn reconcile(&self, shipped: &Path) -> Outcome {
        Reconciler::reconcile(self, shipped)
    }
}

/// Object-safe view of the transitive dependency check.
pub trait DependencyCheck: Send + Sync {
    fn depends_on_target(&self, path: &Path) -> bool;
}

impl<L: DependencyLister + Send + Sync> DependencyCheck for DependencyWalker<L> {
    fn depends_on_target(&self, path: &Path) -> bool {
        DependencyWalker::depends_on_target(self, path)
    }
}

pub type LoadHook = Box<dyn Fn(&LoadEvent<'_>) + Send + Sync>;

/// Implemented by hosts that can call a hook on every load/import.
pub trait EventSource {
    fn register(&mut self, hook: LoadHook);
}

/// A minimal event source a host can embed and feed by hand.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<LoadHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Calls every registered hook, in registration order.
    pub fn emit(&self, event: &LoadEvent<'_>) {
        for hook in &self.hooks {
            hook(event);
        }
    }
}

impl EventSource for HookRegistry {
    fn register(&mut self, hook: LoadHook) {
        self.hooks.push(hook);
    }
}

pub struct LoadInterceptor {
    state: Arc<GuardState>,
    target: String,
    walker: Box<dyn DependencyCheck>,
    reconciler: Box<dyn Reconcile>,
}

impl LoadInterceptor {
    pub fn new(
        state: Arc<GuardState>,
        target: impl Into<String>,
        walker: Box<dyn DependencyCheck>,
        reconciler: Box<dyn Reconcile>,
    ) -> Self {
        Self {
            state,
            target: target.into(),
            walker,
            reconciler,
        }
    }

    pub fn state(&self) -> &Arc<GuardState> {
        &self.state
    }

    /// Registers this interceptor as a hook on `source`.
    pub fn attach<S: EventSource + ?Sized>(self: &Arc<Self>, source: &mut S) {
        let interceptor = Arc::clone(self);
        source.register(Box::new(move |event| {
            interceptor.on_event(event);
        }));
    }

    /// Handles one event. Returns the outcome when this call ran the check.
    ///
    /// Panics raised by the dependency check or the reconciliation are
    /// caught here and logged; they never reach the host's load call.
    pub fn on_event(&self, event: &LoadEvent<'_>) -> Option<Outcome> {
        if !self.state.is_armed() {
            return None;
        }
        let path = event.path?;
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle(event.kind, path))) {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "{} check panicked while handling {}; runtime link errors may occur",
                    self.target,
                    path.display()
                );
                Some(Outcome::Indeterminate)
            }
        }
    }

    fn handle(&self, kind: EventKind, path: &Path) -> Option<Outcome> {
        if !self.qualifies(path) {
            return None;
        }
        if !self.state.disarm() {
            return None;
        }
        info!("{kind:?} of {} binds {}; checking versions", path.display(), self.target);
        let outcome = self.reconciler.reconcile(self.state.shipped());
        debug!("{} check finished: {outcome}", self.target);
        Some(outcome)
    }

    fn qualifies(&self, path: &Path) -> bool {
        if is_named(path, &self.target) {
            return true;
        }
        path.extension().is_some_and(|ext| ext == "so") && self.walker.depends_on_target(path)
    }
}
