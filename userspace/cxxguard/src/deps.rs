// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Transitive shared-library dependency checks
//! INTENT: Answer "does loading X eventually pull in the target library?"
//! DEPS: external lister (ldd by default), std::process
//! TESTS: stub listers for found/absent/failing reports; ldd report parsing

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, warn};

use crate::error::GuardError;

/// Runs a dependency lister over a file and returns its textual report.
pub trait DependencyLister {
    fn list(&self, path: &Path) -> Result<String, GuardError>;
}

/// Invokes an `ldd`-compatible program as `<program> <path>`.
#[derive(Debug, Clone)]
pub struct LddLister {
    program: PathBuf,
}

impl LddLister {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for LddLister {
    fn default() -> Self {
        Self::new("ldd")
    }
}

impl DependencyLister for LddLister {
    fn list(&self, path: &Path) -> Result<String, GuardError> {
        let output = Command::new(&self.program)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| GuardError::Lister {
                path: path.to_path_buf(),
                reason: format!("cannot run {}: {err}", self.program.display()),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GuardError::Lister {
                path: path.to_path_buf(),
                reason: format!("{} exited with {}: {}", self.program.display(), output.status, stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// One line of a dependency report: `containing` needs `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub containing: PathBuf,
    pub name: String,
    /// Where the linker would map `name`, when the lister resolved it.
    pub resolved: Option<PathBuf>,
}

impl DependencyEdge {
    fn matches(&self, target: &str) -> bool {
        self.name == target || self.resolved.as_deref().is_some_and(|path| is_named(path, target))
    }
}

/// Parses an `ldd` report into edges.
///
/// Understands `name => /path (0x..)`, `name => not found` and bare
/// `/path (0x..)` lines; anything else is skipped.
pub fn parse_report(containing: &Path, report: &str) -> Vec<DependencyEdge> {
    report
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (name, resolved) = match line.split_once("=>") {
                Some((name, rest)) => {
                    let rest = rest.trim();
                    let resolved = rest
                        .split_whitespace()
                        .next()
                        .filter(|path| path.starts_with('/'))
                        .map(PathBuf::from);
                    (name.trim().to_string(), resolved)
                }
                None => {
                    let first = line.split_whitespace().next()?;
                    if !line.contains("(0x") {
                        return None;
                    }
                    if first.starts_with('/') {
                        let path = PathBuf::from(first);
                        let name = path.file_name()?.to_string_lossy().into_owned();
                        (name, Some(path))
                    } else {
                        (first.to_string(), None)
                    }
                }
            };
            (!name.is_empty()).then(|| DependencyEdge {
                containing: containing.to_path_buf(),
                name,
                resolved,
            })
        })
        .collect()
}

/// True when `path`'s final component is exactly `name`.
pub fn is_named(path: &Path, name: &str) -> bool {
    path.file_name().is_some_and(|file| file == name)
}

/// Walks dependency reports looking for the target library.
#[derive(Debug, Clone)]
pub struct DependencyWalker<L> {
    lister: L,
    target: String,
    max_depth: usize,
}

impl<L: DependencyLister> DependencyWalker<L> {
    pub fn new(lister: L, target: impl Into<String>, max_depth: usize) -> Self {
        Self {
            lister,
            target: target.into(),
            max_depth,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Lists the direct report for `path` as edges.
    pub fn edges(&self, path: &Path) -> Result<Vec<DependencyEdge>, GuardError> {
        let report = self.lister.list(path)?;
        Ok(parse_report(path, &report))
    }

    /// Never fails: lister errors are logged and count as "no dependency".
    pub fn depends_on_target(&self, path: &Path) -> bool {
        self.walk(path, 0)
    }

    fn walk(&self, path: &Path, depth: usize) -> bool {
        if is_named(path, &self.target) {
            return true;
        }
        if depth >= self.max_depth {
            debug!("dependency walk stopped at depth {depth} on {}", path.display());
            return false;
        }
        if !path.exists() {
            return false;
        }
        let edges = match self.edges(path) {
            Ok(edges) => edges,
            Err(err) => {
                warn!("{err}; assuming {} does not load {}", path.display(), self.target);
                return false;
            }
        };
        if !edges.iter().any(|edge| edge.matches(&self.target)) {
            return false;
        }
        debug!("{} pulls in {}", path.display(), self.target);
        self.walk(Path::new(&self.target), depth + 1)
    }
}
