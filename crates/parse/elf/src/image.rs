//! Whole-image access: loadable segments and the TLS template.

use crate::header::{
    ELF64_PHDR_SIZE, Elf64Header, Elf64ProgramHeader, ElfError, PT_LOAD, PT_TLS,
};

/// A parsed ELF64 image borrowing the raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    header: Elf64Header,
}

/// One `PT_LOAD` segment ready for mapping.
#[derive(Debug)]
pub struct LoadSegment<'a> {
    /// Virtual address the segment wants.
    pub vaddr: u64,
    /// File-backed bytes; the remainder up to `memsz` zero-fills.
    pub data: &'a [u8],
    /// Total bytes occupied in memory.
    pub memsz: u64,
    /// `PF_R`/`PF_W`/`PF_X` flags.
    pub flags: u32,
}

/// The `PT_TLS` template, feeding the TLS auxiliary record.
#[derive(Debug, Clone, Copy)]
pub struct TlsSegment<'a> {
    /// Initialized TLS image.
    pub data: &'a [u8],
    /// Total TLS block size (image plus zero-fill).
    pub memsz: u64,
    /// Required alignment of each thread's block.
    pub align: u64,
}

impl<'a> ElfImage<'a> {
    /// Parses an image, validating the file header and program-header
    /// table bounds.
    ///
    /// # Errors
    ///
    /// Propagates [`ElfError`] from header validation.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let header = Elf64Header::parse(data)?;
        Ok(Self { data, header })
    }

    /// Entry point virtual address, or 0 when the header lies.
    #[must_use]
    pub fn entry_point(&self) -> u64 {
        self.header.e_entry
    }

    /// The parsed file header.
    #[must_use]
    pub fn header(&self) -> &Elf64Header {
        &self.header
    }

    fn program_headers(&self) -> impl Iterator<Item = Elf64ProgramHeader> + 'a {
        let data = self.data;
        let phoff = self.header.e_phoff as usize;
        let phentsize = self.header.e_phentsize as usize;
        let phnum = self.header.e_phnum as usize;

        (0..phnum).filter_map(move |i| {
            let offset = phoff + i * phentsize;
            (offset + ELF64_PHDR_SIZE <= data.len())
                .then(|| Elf64ProgramHeader::parse(data, offset))
        })
    }

    /// Iterates `PT_LOAD` segments in table order.
    pub fn load_segments(&self) -> impl Iterator<Item = LoadSegment<'a>> {
        let data = self.data;
        self.program_headers().filter_map(move |phdr| {
            if phdr.p_type != PT_LOAD {
                return None;
            }
            let start = phdr.p_offset as usize;
            let len = phdr.p_filesz as usize;
            let end = start.checked_add(len)?;
            if end > data.len() {
                return None;
            }
            Some(LoadSegment {
                vaddr: phdr.p_vaddr,
                data: &data[start..end],
                memsz: phdr.p_memsz,
                flags: phdr.p_flags,
            })
        })
    }

    /// The `PT_TLS` template, if the image has thread-local storage.
    pub fn tls_segment(&self) -> Option<TlsSegment<'a>> {
        let data = self.data;
        self.program_headers().find_map(move |phdr| {
            if phdr.p_type != PT_TLS {
                return None;
            }
            let start = phdr.p_offset as usize;
            let end = start.checked_add(phdr.p_filesz as usize)?;
            if end > data.len() {
                return None;
            }
            Some(TlsSegment {
                data: &data[start..end],
                memsz: phdr.p_memsz,
                align: phdr.p_align.max(1),
            })
        })
    }
}
