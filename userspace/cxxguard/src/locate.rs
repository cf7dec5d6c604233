// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Finding the shipped library through an executable's `DT_RUNPATH` and
//! `DT_RPATH` search lists, and choosing between it and each system copy the
//! dynamic linker turns up while searching.

use std::fs;
use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use log::{debug, warn};

use crate::deps::is_named;
use crate::elf::{self, FormatError};
use crate::error::GuardError;
use crate::version::Version;

/// Expands one colon-separated search list into candidate library paths.
///
/// `$ORIGIN` and `${ORIGIN}` are replaced by `origin`; empty entries are
/// skipped.
pub fn candidates(search_list: &str, origin: &Path, target: &str) -> Vec<PathBuf> {
    let origin = origin.to_string_lossy();
    search_list
        .split(':')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let dir = entry.replace("${ORIGIN}", &origin).replace("$ORIGIN", &origin);
            PathBuf::from(dir).join(target)
        })
        .collect()
}

/// First candidate, across `lists` in order, that names an existing file.
pub fn find_in_search_lists<S: AsRef<str>>(lists: &[S], origin: &Path, target: &str) -> Option<PathBuf> {
    lists
        .iter()
        .flat_map(|list| candidates(list.as_ref(), origin, target))
        .find(|candidate| {
            let found = candidate.is_file();
            debug!("shipped candidate {}: {}", candidate.display(), if found { "found" } else { "missing" });
            found
        })
}

/// Looks for `target` in `executable`'s RUNPATH, then its RPATH.
///
/// `$ORIGIN` is the directory containing `executable`. Returns `Ok(None)`
/// when neither list holds the library.
pub fn shipped_from_runpath(executable: &Path, target: &str) -> Result<Option<PathBuf>, GuardError> {
    let bytes = fs::read(executable).map_err(|source| GuardError::Io {
        path: executable.to_path_buf(),
        source,
    })?;
    let format_error = |source: FormatError| GuardError::Format {
        path: executable.to_path_buf(),
        source,
    };
    if !bytes.starts_with(goblin::elf::header::ELFMAG) {
        return Err(format_error(FormatError::BadMagic));
    }
    let elf = Elf::parse(&bytes).map_err(|err| format_error(err.into()))?;
    let origin = executable.parent().unwrap_or_else(|| Path::new("."));

    Ok(find_in_search_lists(&elf.runpaths, origin, target)
        .or_else(|| find_in_search_lists(&elf.rpaths, origin, target)))
}

/// Which part of the search produced a candidate, as reported to an
/// `rtld-audit` `la_objsearch` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOrigin {
    /// The name as it appeared in `DT_NEEDED` or the `dlopen` call.
    Original,
    /// `LD_LIBRARY_PATH`.
    LibraryPath,
    /// `DT_RUNPATH` / `DT_RPATH`.
    RunPath,
    /// `ld.so.cache`.
    Config,
    /// The built-in default directories.
    Default,
    /// Secure-mode (setuid) search.
    Secure,
}

impl SearchOrigin {
    /// Maps an `LA_SER_*` flag value.
    pub fn from_flag(flag: u32) -> Option<Self> {
        match flag {
            0x01 => Some(Self::Original),
            0x02 => Some(Self::LibraryPath),
            0x04 => Some(Self::RunPath),
            0x08 => Some(Self::Config),
            0x40 => Some(Self::Default),
            0x80 => Some(Self::Secure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchVerdict {
    /// Let the linker use the candidate as found.
    Accept,
    /// Skip the candidate and keep searching.
    Reject,
    /// Use this path instead of the candidate.
    Redirect(PathBuf),
}

/// The shipped copy and the version a system copy has to reach to win.
///
/// The bar only rises: once a newer system copy is accepted, later
/// candidates are held to its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippedLibrary {
    path: PathBuf,
    version: Version,
}

impl ShippedLibrary {
    pub fn new(path: impl Into<PathBuf>, version: Version) -> Self {
        Self {
            path: path.into(),
            version,
        }
    }

    /// Reads the shipped copy's version from `path`.
    pub fn open(path: &Path, prefix: &str) -> Result<Self, GuardError> {
        Ok(Self::new(path, elf::max_version(path, prefix)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Decides what the linker should do with one search candidate, reading
    /// the candidate's version from disk.
    pub fn select(&mut self, candidate: &Path, origin: SearchOrigin, target: &str, prefix: &str) -> SearchVerdict {
        self.select_with(candidate, origin, target, |path| match elf::max_version(path, prefix) {
            Ok(version) => version,
            Err(err) => {
                warn!("{err}; treating {} as 0.0.0", path.display());
                Version::ZERO
            }
        })
    }

    /// Same as [`select`](Self::select) with the version lookup supplied by
    /// the caller.
    ///
    /// - candidates that are not a path to `target` are accepted untouched;
    /// - `target` found through RUNPATH/RPATH is rejected, since the shipped
    ///   copy already came from there;
    /// - candidates that do not exist are accepted and left to the linker;
    /// - an older system copy is redirected to the shipped one;
    /// - an equal or newer one is accepted and becomes the new bar.
    pub fn select_with(
        &mut self,
        candidate: &Path,
        origin: SearchOrigin,
        target: &str,
        read_version: impl FnOnce(&Path) -> Version,
    ) -> SearchVerdict {
        let has_dir = candidate.parent().is_some_and(|dir| !dir.as_os_str().is_empty());
        if !has_dir || !is_named(candidate, target) {
            return SearchVerdict::Accept;
        }
        if origin == SearchOrigin::RunPath {
            return SearchVerdict::Reject;
        }
        if !candidate.is_file() {
            return SearchVerdict::Accept;
        }

        let version = read_version(candidate);
        if version < self.version {
            debug!(
                "{} ({version}) is older than shipped {}; using {}",
                candidate.display(),
                self.version,
                self.path.display()
            );
            return SearchVerdict::Redirect(self.path.clone());
        }
        debug!("{} ({version}) meets shipped {}; accepting it", candidate.display(), self.version);
        self.version = version;
        SearchVerdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "libstdc++.so.6";

    #[test]
    fn expands_both_origin_spellings() {
        let found = candidates("$ORIGIN/../lib:${ORIGIN}/lib64::/opt/lib", Path::new("/app/bin"), TARGET);
        assert_eq!(
            found,
            [
                PathBuf::from("/app/bin/../lib/libstdc++.so.6"),
                PathBuf::from("/app/bin/lib64/libstdc++.so.6"),
                PathBuf::from("/opt/lib/libstdc++.so.6"),
            ]
        );
    }

    #[test]
    fn picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        fs::create_dir(&lib).unwrap();
        fs::write(lib.join(TARGET), b"").unwrap();

        let runpath = ["$ORIGIN/missing:$ORIGIN/lib"];
        let found = find_in_search_lists(&runpath, dir.path(), TARGET);
        assert_eq!(found, Some(lib.join(TARGET)));
    }

    #[test]
    fn falls_through_to_later_lists() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TARGET), b"").unwrap();
        let lists = ["/nonexistent/cxxguard", "$ORIGIN"];
        assert_eq!(find_in_search_lists(&lists, dir.path(), TARGET), Some(dir.path().join(TARGET)));
    }

    #[test]
    fn directories_are_not_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(TARGET)).unwrap();
        assert_eq!(find_in_search_lists(&["$ORIGIN"], dir.path(), TARGET), None);
    }

    #[test]
    fn non_elf_executable_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        let err = shipped_from_runpath(&script, TARGET).unwrap_err();
        assert!(matches!(err, GuardError::Format { source: FormatError::BadMagic, .. }));
    }

    fn system_candidate(dir: &Path) -> PathBuf {
        let path = dir.join(TARGET);
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn maps_audit_search_flags() {
        assert_eq!(SearchOrigin::from_flag(0x04), Some(SearchOrigin::RunPath));
        assert_eq!(SearchOrigin::from_flag(0x40), Some(SearchOrigin::Default));
        assert_eq!(SearchOrigin::from_flag(0x03), None);
    }

    #[test]
    fn unrelated_libraries_pass_through() {
        let mut shipped = ShippedLibrary::new("/opt/app/lib/libstdc++.so.6", Version::new(3, 4, 26));
        let verdict = shipped.select_with(Path::new("/usr/lib/libm.so.6"), SearchOrigin::Default, TARGET, |_| {
            panic!("version must not be read")
        });
        assert_eq!(verdict, SearchVerdict::Accept);
    }

    #[test]
    fn bare_name_passes_through() {
        let mut shipped = ShippedLibrary::new("/opt/app/lib/libstdc++.so.6", Version::new(3, 4, 26));
        let verdict = shipped.select_with(Path::new(TARGET), SearchOrigin::Original, TARGET, |_| {
            panic!("version must not be read")
        });
        assert_eq!(verdict, SearchVerdict::Accept);
    }

    #[test]
    fn runpath_candidates_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = system_candidate(dir.path());
        let mut shipped = ShippedLibrary::new("/opt/app/lib/libstdc++.so.6", Version::new(3, 4, 26));
        let verdict = shipped.select_with(&candidate, SearchOrigin::RunPath, TARGET, |_| Version::new(3, 4, 30));
        assert_eq!(verdict, SearchVerdict::Reject);
        assert_eq!(shipped.version(), Version::new(3, 4, 26));
    }

    #[test]
    fn missing_candidate_is_left_to_the_linker() {
        let mut shipped = ShippedLibrary::new("/opt/app/lib/libstdc++.so.6", Version::new(3, 4, 26));
        let verdict = shipped.select_with(
            Path::new("/nonexistent/cxxguard/libstdc++.so.6"),
            SearchOrigin::Default,
            TARGET,
            |_| panic!("version must not be read"),
        );
        assert_eq!(verdict, SearchVerdict::Accept);
    }

    #[test]
    fn older_system_copy_is_redirected_to_shipped() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = system_candidate(dir.path());
        let mut shipped = ShippedLibrary::new("/opt/app/lib/libstdc++.so.6", Version::new(3, 4, 26));
        let verdict = shipped.select_with(&candidate, SearchOrigin::Config, TARGET, |_| Version::new(3, 4, 9));
        assert_eq!(verdict, SearchVerdict::Redirect(PathBuf::from("/opt/app/lib/libstdc++.so.6")));
    }

    #[test]
    fn newer_system_copy_is_accepted_and_raises_the_bar() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = system_candidate(dir.path());
        let mut shipped = ShippedLibrary::new("/opt/app/lib/libstdc++.so.6", Version::new(3, 4, 26));
        let verdict = shipped.select_with(&candidate, SearchOrigin::LibraryPath, TARGET, |_| Version::new(3, 4, 30));
        assert_eq!(verdict, SearchVerdict::Accept);
        assert_eq!(shipped.version(), Version::new(3, 4, 30));

        let verdict = shipped.select_with(&candidate, SearchOrigin::Default, TARGET, |_| Version::new(3, 4, 28));
        assert_eq!(verdict, SearchVerdict::Redirect(PathBuf::from("/opt/app/lib/libstdc++.so.6")));
    }
}
