// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hand-built ELF64 little-endian shared objects for integration tests.
//!
//! The images only carry what version extraction reads: an ELF header,
//! `.dynstr`, an optional `.gnu.version_d` and `.shstrtab`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use goblin::elf::header::{ELFCLASS64, ELFDATA2LSB, EM_X86_64, ET_DYN};
use goblin::elf::section_header::{SHT_GNU_VERDEF, SHT_STRTAB};

const EHDR_SIZE: usize = 64;
const SHDR_SIZE: u16 = 64;
const VERDEF_SIZE: u32 = 20;
const VERDAUX_SIZE: u32 = 8;

struct Section {
    name: u32,
    kind: u32,
    offset: usize,
    size: usize,
    link: u32,
    info: u32,
    align: u64,
}

/// A shared object whose `.gnu.version_d` defines each of `names`.
pub fn elf_with_version_definitions(names: &[&str]) -> Vec<u8> {
    build(Some(names))
}

/// A shared object with a string table but no version definitions.
pub fn elf_without_version_definitions() -> Vec<u8> {
    build(None)
}

/// Writes `bytes` as `dir/name` and returns the path.
pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

fn align(buf: &mut Vec<u8>, to: usize) {
    while buf.len() % to != 0 {
        buf.push(0);
    }
}

fn build(definitions: Option<&[&str]>) -> Vec<u8> {
    let mut buf = vec![0u8; EHDR_SIZE];
    let mut sections = Vec::new();

    // .dynstr
    let dynstr_offset = buf.len();
    buf.push(0);
    let mut name_offsets = Vec::new();
    for name in definitions.unwrap_or_default() {
        name_offsets.push((buf.len() - dynstr_offset) as u32);
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
    }
    let dynstr_index = 1u32;
    sections.push(Section {
        name: 1,
        kind: SHT_STRTAB,
        offset: dynstr_offset,
        size: buf.len() - dynstr_offset,
        link: 0,
        info: 0,
        align: 1,
    });

    // .gnu.version_d
    if definitions.is_some() {
        align(&mut buf, 4);
        let verdef_offset = buf.len();
        let count = name_offsets.len();
        for (index, name) in name_offsets.iter().enumerate() {
            let last = index + 1 == count;
            buf.write_u16::<LittleEndian>(1).unwrap(); // vd_version
            buf.write_u16::<LittleEndian>(if index == 0 { 1 } else { 0 }).unwrap(); // vd_flags (VER_FLG_BASE)
            buf.write_u16::<LittleEndian>(index as u16 + 1).unwrap(); // vd_ndx
            buf.write_u16::<LittleEndian>(1).unwrap(); // vd_cnt
            buf.write_u32::<LittleEndian>(0).unwrap(); // vd_hash
            buf.write_u32::<LittleEndian>(VERDEF_SIZE).unwrap(); // vd_aux
            buf.write_u32::<LittleEndian>(if last { 0 } else { VERDEF_SIZE + VERDAUX_SIZE })
                .unwrap(); // vd_next
            buf.write_u32::<LittleEndian>(*name).unwrap(); // vda_name
            buf.write_u32::<LittleEndian>(0).unwrap(); // vda_next
        }
        sections.push(Section {
            name: 9,
            kind: SHT_GNU_VERDEF,
            offset: verdef_offset,
            size: buf.len() - verdef_offset,
            link: dynstr_index,
            info: count as u32,
            align: 4,
        });
    }

    // .shstrtab
    let shstrtab_offset = buf.len();
    buf.extend_from_slice(b"\0.dynstr\0.gnu.version_d\0.shstrtab\0");
    sections.push(Section {
        name: 24,
        kind: SHT_STRTAB,
        offset: shstrtab_offset,
        size: buf.len() - shstrtab_offset,
        link: 0,
        info: 0,
        align: 1,
    });

    align(&mut buf, 8);
    let shoff = buf.len();
    buf.extend_from_slice(&[0u8; SHDR_SIZE as usize]); // SHN_UNDEF
    for section in &sections {
        buf.write_u32::<LittleEndian>(section.name).unwrap();
        buf.write_u32::<LittleEndian>(section.kind).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap(); // sh_flags
        buf.write_u64::<LittleEndian>(0).unwrap(); // sh_addr
        buf.write_u64::<LittleEndian>(section.offset as u64).unwrap();
        buf.write_u64::<LittleEndian>(section.size as u64).unwrap();
        buf.write_u32::<LittleEndian>(section.link).unwrap();
        buf.write_u32::<LittleEndian>(section.info).unwrap();
        buf.write_u64::<LittleEndian>(section.align).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap(); // sh_entsize
    }
    let shnum = sections.len() as u16 + 1;

    let mut header = Vec::with_capacity(EHDR_SIZE);
    header.extend_from_slice(&[0x7f, b'E', b'L', b'F', ELFCLASS64, ELFDATA2LSB, 1]);
    header.resize(16, 0);
    header.write_u16::<LittleEndian>(ET_DYN).unwrap();
    header.write_u16::<LittleEndian>(EM_X86_64).unwrap();
    header.write_u32::<LittleEndian>(1).unwrap(); // e_version
    header.write_u64::<LittleEndian>(0).unwrap(); // e_entry
    header.write_u64::<LittleEndian>(0).unwrap(); // e_phoff
    header.write_u64::<LittleEndian>(shoff as u64).unwrap();
    header.write_u32::<LittleEndian>(0).unwrap(); // e_flags
    header.write_u16::<LittleEndian>(EHDR_SIZE as u16).unwrap();
    header.write_u16::<LittleEndian>(56).unwrap(); // e_phentsize
    header.write_u16::<LittleEndian>(0).unwrap(); // e_phnum
    header.write_u16::<LittleEndian>(SHDR_SIZE).unwrap();
    header.write_u16::<LittleEndian>(shnum).unwrap();
    header.write_u16::<LittleEndian>(shnum - 1).unwrap(); // e_shstrndx
    buf[..EHDR_SIZE].copy_from_slice(&header);
    buf
}
