// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Symbol-version extraction from ELF shared objects
//! INTENT: Report the newest `<prefix>M.N.P` interface a library defines
//! DEPS: goblin (ELF parsing), std::fs
//! TESTS: tests/version_definitions.rs (hand-built ELF64 fixtures)

use std::fs;
use std::path::Path;

use goblin::elf::{
    header,
    section_header::{SectionHeader, SHT_GNU_VERDEF},
    Elf,
};
use goblin::strtab::Strtab;
use log::debug;
use thiserror::Error;

use crate::error::GuardError;
use crate::version::Version;

/// Reasons an image cannot yield version definitions.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not an ELF image (bad magic)")]
    BadMagic,
    #[error("malformed ELF image: {0}")]
    Malformed(#[from] goblin::error::Error),
    #[error("no .gnu.version_d section")]
    MissingVersionDefinitions,
    #[error("version definition name offset {0} is outside its string table")]
    NameOutOfRange(usize),
}

/// Returns the highest version named `<prefix>M[.N[.P]]` in the file's
/// `.gnu.version_d` section, or `0.0.0` when no definition carries the prefix.
pub fn max_version(path: &Path, prefix: &str) -> Result<Version, GuardError> {
    let bytes = fs::read(path).map_err(|source| GuardError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let version = max_version_in(&bytes, prefix).map_err(|source| GuardError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("{}: max {prefix}* version {version}", path.display());
    Ok(version)
}

/// Same as [`max_version`] over an in-memory image.
pub fn max_version_in(bytes: &[u8], prefix: &str) -> Result<Version, FormatError> {
    if !bytes.starts_with(header::ELFMAG) {
        return Err(FormatError::BadMagic);
    }
    let elf = Elf::parse(bytes)?;
    let definitions = elf.verdef.as_ref().ok_or(FormatError::MissingVersionDefinitions)?;
    let names = definition_strings(&elf, bytes)?;

    let mut max = Version::ZERO;
    for definition in definitions.iter() {
        for aux in definition.iter() {
            let offset = aux.vda_name as usize;
            let name = names.get_at(offset).ok_or(FormatError::NameOutOfRange(offset))?;
            if let Some(rest) = name.strip_prefix(prefix) {
                max = max.max(Version::parse_lenient(rest));
            }
        }
    }
    Ok(max)
}

/// Opens the string table that the version-definition section links to.
fn definition_strings<'a>(elf: &Elf<'a>, bytes: &'a [u8]) -> Result<Strtab<'a>, FormatError> {
    let section = elf
        .section_headers
        .iter()
        .find(|shdr| shdr.sh_type == SHT_GNU_VERDEF)
        .ok_or(FormatError::MissingVersionDefinitions)?;
    let linked: &SectionHeader = elf
        .section_headers
        .get(section.sh_link as usize)
        .ok_or(FormatError::MissingVersionDefinitions)?;
    Ok(Strtab::parse(
        bytes,
        linked.sh_offset as usize,
        linked.sh_size as usize,
        0x0,
    )?)
}
