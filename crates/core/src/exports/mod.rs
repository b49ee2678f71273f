//! ELF symbol source: exported function addresses and dynamic-linking stub
//! ranges.
//!
//! This is the crate's adapter for the external symbol/relocation interface:
//! an address-to-exported-name map (fed to the resolver for library-dummy
//! naming and to the wrap-manifest builder) plus the `.plt` section ranges
//! consumed by `mark_function_as_plt` callers.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use goblin::elf::section_header::SHN_UNDEF;
use goblin::elf::sym::{STB_GLOBAL, STB_WEAK};
use goblin::elf::Elf;
use thiserror::Error;

use crate::model::{Addr, CodeRange};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object parse error: {0}")]
    Object(#[from] goblin::error::Error),
}

/// Exports and PLT ranges of one shared object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportMap {
    /// Address -> exported name, for global/weak function symbols.
    pub exports: BTreeMap<Addr, String>,
    /// `.plt` / `.plt.sec` section ranges.
    pub plt: Vec<CodeRange>,
}

impl ExportMap {
    pub fn addr_in_plt(&self, addr: Addr) -> bool {
        self.plt.iter().any(|r| r.contains(addr))
    }
}

/// Read the dynamic-symbol exports and PLT ranges of an ELF file.
pub fn read_elf_exports(path: impl AsRef<Path>) -> Result<ExportMap, ExportError> {
    let bytes = fs::read(path)?;
    let elf = Elf::parse(&bytes)?;

    // Static binaries and object files carry their symbols in .symtab only.
    let (symtab, strtab) = if elf.dynsyms.is_empty() {
        (&elf.syms, &elf.strtab)
    } else {
        (&elf.dynsyms, &elf.dynstrtab)
    };

    let mut map = ExportMap::default();
    for sym in symtab.iter() {
        if !sym.is_function()
            || sym.st_value == 0
            || sym.st_shndx == SHN_UNDEF as usize
            || !matches!(sym.st_bind(), STB_GLOBAL | STB_WEAK)
        {
            continue;
        }
        let name = strtab.get_at(sym.st_name).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        map.exports.insert(sym.st_value, name.to_string());
    }

    for header in &elf.section_headers {
        let name = elf.shdr_strtab.get_at(header.sh_name).unwrap_or("");
        if name.starts_with(".plt") && header.sh_size > 0 {
            map.plt.push(CodeRange::new(header.sh_addr, header.sh_addr + header.sh_size));
        }
    }

    Ok(map)
}
