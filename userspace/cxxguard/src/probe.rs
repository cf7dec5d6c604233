// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resolving the system copy of a library without loading it here.
//!
//! Finding where the default search path would map a library means actually
//! mapping it. Doing that in the guarded process could bind the very copy the
//! guard exists to keep out, so [`IsolatedProbe`] asks a child process
//! (normally `cxxguard probe`) to load it and print the resolved path.
//! [`standalone_probe`] is that child's side.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::linkmap::{DynamicLinker, LibraryLoader, LinkMapResolver};

/// Cap on how much child output is read.
const MAX_PROBE_OUTPUT: u64 = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Anything that can name the system copy of a library.
pub trait SystemProbe {
    fn probe_system_path(&self, base_name: &str) -> Result<PathBuf, GuardError>;
}

impl<T: SystemProbe + ?Sized> SystemProbe for &T {
    fn probe_system_path(&self, base_name: &str) -> Result<PathBuf, GuardError> {
        (**self).probe_system_path(base_name)
    }
}

/// Spawns an isolated worker that loads the library and prints its path.
#[derive(Debug, Clone)]
pub struct IsolatedProbe {
    program: PathBuf,
    args: Vec<OsString>,
    strip_env: Vec<OsString>,
    timeout: Duration,
}

impl IsolatedProbe {
    /// The worker is run as `<program> <args..> --library <base_name>`.
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            strip_env: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(&config.probe_program, &config.probe_args)
            .strip_env(&config.probe_strip_env)
            .timeout(config.probe_timeout())
    }

    /// Variables removed from the child's environment, so a child that links
    /// this crate cannot arm a guard of its own.
    pub fn strip_env(mut self, vars: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.strip_env = vars.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, base_name: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--library")
            .arg(base_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        for var in &self.strip_env {
            command.env_remove(var);
        }
        // Own process group, so a timeout also reaches anything the worker forked.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }
}

impl SystemProbe for IsolatedProbe {
    fn probe_system_path(&self, base_name: &str) -> Result<PathBuf, GuardError> {
        let deadline = Instant::now() + self.timeout;
        let mut child = self.command(base_name).spawn().map_err(|err| {
            GuardError::Probe(format!("cannot spawn {}: {err}", self.program.display()))
        })?;

        // The reader owns only the pipe and hands back the first line as soon
        // as it has one. It is never joined: a forked grandchild may hold the
        // pipe open long after the worker is gone.
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                let mut reader = BufReader::new(stdout.take(MAX_PROBE_OUTPUT));
                let mut line = String::new();
                let _ = reader.read_line(&mut line);
                let _ = tx.send(line);
                let _ = io::copy(&mut reader, &mut io::sink());
            });
        }

        let status = wait_until(&mut child, deadline, self.timeout)?;
        if !status.success() {
            return Err(GuardError::Probe(format!(
                "{} exited with {status}",
                self.program.display()
            )));
        }

        let line = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                return Err(GuardError::Probe(format!(
                    "{} exited but its output stayed open past {} ms",
                    self.program.display(),
                    self.timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => String::new(),
        };
        let line = line.trim();
        if line.is_empty() {
            return Err(GuardError::Probe(format!(
                "{} printed no library path",
                self.program.display()
            )));
        }
        debug!("isolated probe resolved {base_name} to {line}");
        Ok(PathBuf::from(line))
    }
}

fn wait_until(child: &mut Child, deadline: Instant, timeout: Duration) -> Result<ExitStatus, GuardError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                kill_worker(child);
                return Err(GuardError::Probe(format!(
                    "probe did not finish within {} ms",
                    timeout.as_millis()
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                kill_worker(child);
                return Err(GuardError::Probe(format!("cannot wait for probe: {err}")));
            }
        }
    }
}

/// Kills the worker's whole process group, then the worker, and reaps it.
fn kill_worker(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: the worker leads its own group and is not reaped yet, so
            // the group id cannot have been reused.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Worker side of the probe: map `base_name` here and report where it lives.
///
/// Fails with [`GuardError::Unsupported`] before touching the linker when the
/// platform has no ELF dynamic linker.
pub fn standalone_probe(base_name: &str) -> Result<PathBuf, GuardError> {
    if !crate::is_supported_platform() {
        return Err(GuardError::Unsupported(
            "the system library probe only runs on Linux",
        ));
    }
    resolve_with(&DynamicLinker, base_name)
}

fn resolve_with<K: LibraryLoader + LinkMapResolver>(linker: &K, base_name: &str) -> Result<PathBuf, GuardError> {
    let handle = linker.load(Path::new(base_name))?;
    let path = linker.resolve_path(handle)?;
    if !path.is_absolute() {
        return Err(GuardError::Resolution(format!(
            "linker reported a relative path for {base_name}: {}",
            path.display()
        )));
    }
    Ok(path)
}
