// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Standalone probe and operator diagnostics for the libstdc++ guard
//! OWNERS: @runtime
//! PURPOSE: Isolated worker that prints the system library path; version/deps/locate/select/check tooling
//! NOTE: Command-line tool; the guard itself lives in the `cxxguard` library

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use cxxguard::{
    deps::DependencyWalker, locate, max_version, standalone_probe, GuardConfig, GuardError, LddLister,
    Reconciler, SearchOrigin, SearchVerdict, ShippedLibrary, TARGET_LIBRARY, VERSION_NAMESPACE,
};
use log::warn;

/// Runtime libstdc++ compatibility guard.
///
/// Without a subcommand, resolves the system libstdc++ and prints its path.
#[derive(Parser)]
#[command(name = "cxxguard", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Load a library in this process and print where the linker found it.
    Probe {
        #[arg(long, default_value = TARGET_LIBRARY)]
        library: String,
    },

    /// Print the highest version definition of an ELF shared object.
    Version {
        elf: PathBuf,

        #[arg(long, default_value = VERSION_NAMESPACE)]
        prefix: String,

        /// Print as 0x00AABBCC hex instead of M.N.P
        #[arg(long)]
        packed: bool,
    },

    /// List a file's dependencies and whether they pull in the target.
    Deps {
        elf: PathBuf,

        #[arg(long, default_value = TARGET_LIBRARY)]
        target: String,

        /// ldd-compatible program used to list dependencies
        #[arg(long, default_value = "ldd")]
        lister: PathBuf,

        #[arg(long, default_value_t = 4)]
        max_depth: usize,
    },

    /// Find the shipped library through an executable's RUNPATH/RPATH.
    Locate {
        executable: PathBuf,

        #[arg(long, default_value = TARGET_LIBRARY)]
        target: String,
    },

    /// Show what search-time selection would do with one linker candidate.
    Select {
        /// Path the linker is about to try
        candidate: PathBuf,

        /// Shipped library file, or the directory holding it
        #[arg(long)]
        shipped: PathBuf,

        #[arg(long, value_enum, default_value_t = Origin::Default)]
        origin: Origin,

        #[arg(long, default_value = TARGET_LIBRARY)]
        target: String,

        #[arg(long, default_value = VERSION_NAMESPACE)]
        prefix: String,
    },

    /// Compare the system copy with a shipped one and act on the result.
    Check {
        /// Shipped library file, or the directory holding it
        shipped: PathBuf,

        /// TOML configuration (defaults to $CXXGUARD_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Origin {
    Original,
    LibraryPath,
    Runpath,
    Cache,
    Default,
    Secure,
}

impl From<Origin> for SearchOrigin {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::Original => SearchOrigin::Original,
            Origin::LibraryPath => SearchOrigin::LibraryPath,
            Origin::Runpath => SearchOrigin::RunPath,
            Origin::Cache => SearchOrigin::Config,
            Origin::Default => SearchOrigin::Default,
            Origin::Secure => SearchOrigin::Secure,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Probe {
        library: TARGET_LIBRARY.to_string(),
    });
    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cxxguard: error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), GuardError> {
    match command {
        Command::Probe { library } => {
            let path = standalone_probe(&library)?;
            println!("{}", path.display());
        }
        Command::Version { elf, prefix, packed } => {
            let version = max_version(&elf, &prefix)?;
            if packed {
                println!("{:08x}", version.packed());
            } else {
                println!("{version}");
            }
        }
        Command::Deps {
            elf,
            target,
            lister,
            max_depth,
        } => {
            let walker = DependencyWalker::new(LddLister::new(lister), target, max_depth);
            print_deps(&walker, &elf);
        }
        Command::Locate { executable, target } => match locate::shipped_from_runpath(&executable, &target)? {
            Some(path) => println!("{}", path.display()),
            None => {
                return Err(GuardError::Resolution(format!(
                    "{target} not found on the RUNPATH/RPATH of {}",
                    executable.display()
                )))
            }
        },
        Command::Select {
            candidate,
            shipped,
            origin,
            target,
            prefix,
        } => {
            let shipped = cxxguard::shipped_library_path(&shipped, &target);
            let mut shipped = ShippedLibrary::open(&shipped, &prefix)?;
            match shipped.select(&candidate, origin.into(), &target, &prefix) {
                SearchVerdict::Accept => println!("accept {}", candidate.display()),
                SearchVerdict::Reject => println!("reject {}", candidate.display()),
                SearchVerdict::Redirect(path) => println!("redirect {}", path.display()),
            }
        }
        Command::Check { shipped, config } => {
            let config = match config {
                Some(path) => GuardConfig::load(&path)?,
                None => GuardConfig::from_env()?,
            };
            let shipped = cxxguard::shipped_library_path(&shipped, &config.target);
            let outcome = Reconciler::from_config(&config).reconcile(&shipped);
            println!("{outcome}");
        }
    }
    Ok(())
}

fn print_deps(walker: &DependencyWalker<LddLister>, elf: &Path) {
    match walker.edges(elf) {
        Ok(edges) => {
            for edge in edges {
                match edge.resolved {
                    Some(resolved) => println!("{} => {}", edge.name, resolved.display()),
                    None => println!("{} => (unresolved)", edge.name),
                }
            }
        }
        Err(err) => warn!("{err}"),
    }
    println!("{}: {}", walker.target(), walker.depends_on_target(elf));
}
