// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dynamic-linker introspection: handle -> on-disk path via the link-map.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use crate::error::GuardError;

/// A library mapped into this process, as returned by `dlopen`.
///
/// The dynamic linker owns the mapping. Handles are never passed to
/// `dlclose`, so a resolved library stays resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryHandle(NonNull<c_void>);

// SAFETY: a dlopen handle is an opaque token that glibc and musl accept from
// any thread.
unsafe impl Send for LibraryHandle {}
unsafe impl Sync for LibraryHandle {}

impl LibraryHandle {
    /// Wraps a raw handle.
    ///
    /// # Safety
    ///
    /// `raw` must have been returned by `dlopen` and not closed since, or the
    /// handle must never reach [`DynamicLinker`].
    pub unsafe fn from_raw(raw: NonNull<c_void>) -> Self {
        Self(raw)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Recovers the absolute path of an already-mapped library.
pub trait LinkMapResolver {
    fn resolve_path(&self, handle: LibraryHandle) -> Result<PathBuf, GuardError>;
}

/// The two dlopen modes the reconciliation needs.
pub trait LibraryLoader {
    /// Returns a handle only when `name` is already mapped; never maps it.
    fn find_loaded(&self, name: &str) -> Option<LibraryHandle>;

    /// Maps `path` (a file path or a bare soname) into the process.
    fn load(&self, path: &Path) -> Result<LibraryHandle, GuardError>;
}

impl<T: LinkMapResolver + ?Sized> LinkMapResolver for &T {
    fn resolve_path(&self, handle: LibraryHandle) -> Result<PathBuf, GuardError> {
        (**self).resolve_path(handle)
    }
}

impl<T: LibraryLoader + ?Sized> LibraryLoader for &T {
    fn find_loaded(&self, name: &str) -> Option<LibraryHandle> {
        (**self).find_loaded(name)
    }

    fn load(&self, path: &Path) -> Result<LibraryHandle, GuardError> {
        (**self).load(path)
    }
}

/// The process's own ELF dynamic linker (`ld.so`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicLinker;

#[cfg(target_os = "linux")]
mod sys {
    use std::ffi::{c_char, c_int, c_void, CStr};

    pub const RTLD_DI_LINKMAP: c_int = 2;

    /// Public prefix of glibc's and musl's `struct link_map`.
    #[repr(C)]
    pub struct LinkMap {
        pub l_addr: usize,
        pub l_name: *const c_char,
        pub l_ld: *mut c_void,
        pub l_next: *mut LinkMap,
        pub l_prev: *mut LinkMap,
    }

    extern "C" {
        pub fn dlinfo(handle: *mut c_void, request: c_int, info: *mut c_void) -> c_int;
    }

    /// Takes the pending `dlerror` message, if any.
    pub fn last_error() -> Option<String> {
        // SAFETY: dlerror returns null or a NUL-terminated thread-local string.
        unsafe {
            let message = libc::dlerror();
            if message.is_null() {
                None
            } else {
                Some(CStr::from_ptr(message).to_string_lossy().into_owned())
            }
        }
    }
}

#[cfg(target_os = "linux")]
impl LinkMapResolver for DynamicLinker {
    fn resolve_path(&self, handle: LibraryHandle) -> Result<PathBuf, GuardError> {
        use std::ffi::CStr;

        let mut map: *mut sys::LinkMap = std::ptr::null_mut();
        sys::last_error();
        // SAFETY: the handle came from dlopen and is never closed; dlinfo
        // writes a single pointer into `map`.
        let rc = unsafe {
            sys::dlinfo(
                handle.as_ptr(),
                sys::RTLD_DI_LINKMAP,
                (&mut map as *mut *mut sys::LinkMap).cast(),
            )
        };
        if rc != 0 || map.is_null() {
            let reason = sys::last_error().unwrap_or_else(|| "dlinfo(RTLD_DI_LINKMAP) failed".into());
            return Err(GuardError::Resolution(reason));
        }
        // SAFETY: `map` points at the linker's live link_map entry.
        let name = unsafe { (*map).l_name };
        if name.is_null() {
            return Err(GuardError::Resolution("link-map entry has no name".into()));
        }
        // SAFETY: l_name is a NUL-terminated string owned by the linker.
        let name = unsafe { CStr::from_ptr(name) };
        let name = name
            .to_str()
            .map_err(|_| GuardError::Resolution("link-map name is not valid UTF-8".into()))?;
        if name.is_empty() {
            return Err(GuardError::Resolution("link-map entry names the main program".into()));
        }
        Ok(PathBuf::from(name))
    }
}

#[cfg(target_os = "linux")]
impl LibraryLoader for DynamicLinker {
    fn find_loaded(&self, name: &str) -> Option<LibraryHandle> {
        let name = std::ffi::CString::new(name).ok()?;
        // SAFETY: RTLD_NOLOAD never maps a new object; the name is NUL-terminated.
        let raw = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD) };
        sys::last_error();
        NonNull::new(raw).map(LibraryHandle)
    }

    fn load(&self, path: &Path) -> Result<LibraryHandle, GuardError> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| GuardError::Load {
            path: path.to_path_buf(),
            reason: "path contains a NUL byte".into(),
        })?;
        sys::last_error();
        // SAFETY: c_path is NUL-terminated; the returned handle is kept for the
        // lifetime of the process.
        let raw = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        NonNull::new(raw).map(LibraryHandle).ok_or_else(|| GuardError::Load {
            path: path.to_path_buf(),
            reason: sys::last_error().unwrap_or_else(|| "dlopen failed".into()),
        })
    }
}

#[cfg(not(target_os = "linux"))]
impl LinkMapResolver for DynamicLinker {
    fn resolve_path(&self, _handle: LibraryHandle) -> Result<PathBuf, GuardError> {
        Err(GuardError::Unsupported("link-map introspection requires Linux"))
    }
}

#[cfg(not(target_os = "linux"))]
impl LibraryLoader for DynamicLinker {
    fn find_loaded(&self, _name: &str) -> Option<LibraryHandle> {
        None
    }

    fn load(&self, _path: &Path) -> Result<LibraryHandle, GuardError> {
        Err(GuardError::Unsupported("dynamic loading requires Linux"))
    }
}
