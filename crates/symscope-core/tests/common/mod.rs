//! Fixtures shared by the integration tests: stab streams, in-memory ELF
//! images, an in-memory image source and a scripted target process.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use object::write::{Object as WriteObject, StandardSection, Symbol as WriteSymbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use symscope_core::breakpoints::BreakpointId;
use symscope_core::symbols::ImageSource;
use symscope_core::{Address, Result, SymscopeError, Target};

/// Builds a little-endian `.stab` / `.stabstr` pair.
pub struct StabStream
{
    records: Vec<(u32, u8, i16, u32)>,
    strings: Vec<u8>,
}

impl Default for StabStream
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl StabStream
{
    pub fn new() -> Self
    {
        Self {
            records: Vec::new(),
            strings: vec![0],
        }
    }

    fn intern(&mut self, text: &str) -> u32
    {
        if text.is_empty() {
            return 0;
        }
        let offset = u32::try_from(self.strings.len()).unwrap();
        self.strings.extend_from_slice(text.as_bytes());
        self.strings.push(0);
        offset
    }

    pub fn push(mut self, kind: u8, desc: i16, value: u32, text: &str) -> Self
    {
        let strx = self.intern(text);
        self.records.push((strx, kind, desc, value));
        self
    }

    /// Encoded sections, with the leading `N_UNDF` header record a compiler emits.
    pub fn finish(&self) -> (Vec<u8>, Vec<u8>)
    {
        let mut stabs = Vec::with_capacity((self.records.len() + 1) * 12);
        let header = (0u32, 0u8, i16::try_from(self.records.len()).unwrap(), u32::try_from(self.strings.len()).unwrap());
        for (strx, kind, desc, value) in std::iter::once(&header).chain(&self.records) {
            stabs.extend_from_slice(&strx.to_le_bytes());
            stabs.push(*kind);
            stabs.push(0);
            stabs.extend_from_slice(&desc.to_le_bytes());
            stabs.extend_from_slice(&value.to_le_bytes());
        }
        (stabs, self.strings.clone())
    }
}

/// One linker symbol for [`ElfBuilder`].
#[derive(Debug, Clone)]
pub struct LinkerSymbol
{
    pub name: &'static str,
    pub value: u64,
    pub size: u64,
    pub kind: SymbolKind,
    pub global: bool,
}

impl LinkerSymbol
{
    pub fn function(name: &'static str, value: u64, size: u64) -> Self
    {
        Self {
            name,
            value,
            size,
            kind: SymbolKind::Text,
            global: true,
        }
    }

    pub fn data(name: &'static str, value: u64, size: u64) -> Self
    {
        Self {
            name,
            value,
            size,
            kind: SymbolKind::Data,
            global: true,
        }
    }

    pub fn local(mut self) -> Self
    {
        self.global = false;
        self
    }
}

/// Writes a small x86-64 ELF object with optional stab sections and symbols.
#[derive(Default)]
pub struct ElfBuilder
{
    stabs: Option<(Vec<u8>, Vec<u8>)>,
    extra_sections: Vec<&'static str>,
    file_symbol: Option<&'static str>,
    symbols: Vec<LinkerSymbol>,
}

impl ElfBuilder
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn stabs(mut self, stream: &StabStream) -> Self
    {
        self.stabs = Some(stream.finish());
        self
    }

    pub fn section(mut self, name: &'static str) -> Self
    {
        self.extra_sections.push(name);
        self
    }

    pub fn file_symbol(mut self, name: &'static str) -> Self
    {
        self.file_symbol = Some(name);
        self
    }

    pub fn symbol(mut self, symbol: LinkerSymbol) -> Self
    {
        self.symbols.push(symbol);
        self
    }

    pub fn build(self) -> Vec<u8>
    {
        let mut obj = WriteObject::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let text = obj.section_id(StandardSection::Text);
        obj.append_section_data(text, &[0x90; 0x100], 16);
        let data = obj.section_id(StandardSection::Data);
        obj.append_section_data(data, &[0; 0x100], 8);

        if let Some((stab, stabstr)) = &self.stabs {
            let stab_id = obj.add_section(Vec::new(), b".stab".to_vec(), SectionKind::Debug);
            obj.append_section_data(stab_id, stab, 4);
            let str_id = obj.add_section(Vec::new(), b".stabstr".to_vec(), SectionKind::Debug);
            obj.append_section_data(str_id, stabstr, 1);
        }
        for name in &self.extra_sections {
            let id = obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::Debug);
            obj.append_section_data(id, &[0; 16], 1);
        }
        if let Some(file) = self.file_symbol {
            obj.add_file_symbol(file.as_bytes().to_vec());
        }
        for symbol in &self.symbols {
            let section = if symbol.kind == SymbolKind::Text { text } else { data };
            obj.add_symbol(WriteSymbol {
                name: symbol.name.as_bytes().to_vec(),
                value: symbol.value,
                size: symbol.size,
                kind: symbol.kind,
                scope: if symbol.global {
                    SymbolScope::Linkage
                } else {
                    SymbolScope::Compilation
                },
                weak: false,
                section: SymbolSection::Section(section),
                flags: SymbolFlags::None,
            });
        }
        obj.write().unwrap()
    }
}

/// Image bytes keyed by path.
#[derive(Default)]
pub struct MemoryImages
{
    images: HashMap<PathBuf, Vec<u8>>,
    reads: std::cell::RefCell<Vec<PathBuf>>,
}

impl MemoryImages
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, bytes: Vec<u8>)
    {
        self.images.insert(path.into(), bytes);
    }

    /// Paths read so far, in order.
    pub fn reads(&self) -> Vec<PathBuf>
    {
        self.reads.borrow().clone()
    }
}

impl ImageSource for MemoryImages
{
    fn read_image(&self, path: &Path) -> Result<Vec<u8>>
    {
        self.reads.borrow_mut().push(path.to_path_buf());
        self.images.get(path).cloned().ok_or_else(|| {
            SymscopeError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string()))
        })
    }
}

/// A flat window of target memory plus a breakpoint log.
pub struct FakeProcess
{
    base: u64,
    memory: Vec<u8>,
    pub breakpoints: Vec<Address>,
    pub breakpoints_supported: bool,
}

impl FakeProcess
{
    pub fn new(base: u64, size: usize) -> Self
    {
        Self {
            base,
            memory: vec![0; size],
            breakpoints: Vec::new(),
            breakpoints_supported: true,
        }
    }

    pub fn write(&mut self, address: u64, bytes: &[u8])
    {
        let start = usize::try_from(address - self.base).unwrap();
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_u64(&mut self, address: u64, value: u64)
    {
        self.write(address, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, address: u64, value: u32)
    {
        self.write(address, &value.to_le_bytes());
    }

    pub fn write_str(&mut self, address: u64, text: &str)
    {
        self.write(address, text.as_bytes());
        self.write(address + text.len() as u64, &[0]);
    }
}

impl Target for FakeProcess
{
    fn read_memory(&mut self, addr: Address, len: usize) -> Result<Vec<u8>>
    {
        let failure = SymscopeError::MemoryRead {
            address: addr.value(),
            length: len,
        };
        let Some(start) = addr.value().checked_sub(self.base) else {
            return Err(failure);
        };
        let start = usize::try_from(start).map_err(|_| SymscopeError::InvalidArgument("address".into()))?;
        self.memory.get(start..start + len).map(<[u8]>::to_vec).ok_or(failure)
    }

    fn set_breakpoint(&mut self, addr: Address) -> Result<BreakpointId>
    {
        if !self.breakpoints_supported {
            return Err(SymscopeError::Unsupported("no breakpoints".into()));
        }
        self.breakpoints.push(addr);
        Ok(BreakpointId::from_raw(self.breakpoints.len() as u64))
    }
}
