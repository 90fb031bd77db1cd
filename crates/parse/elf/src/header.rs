//! ELF64 header and program-header parsing.

use core::fmt;

/// ELF magic bytes: `\x7fELF`.
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class: 64-bit.
const ELFCLASS64: u8 = 2;

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF type: executable.
const ET_EXEC: u16 = 2;

/// ELF type: shared object (position-independent executable).
const ET_DYN: u16 = 3;

/// Program header type: loadable segment.
pub const PT_LOAD: u32 = 1;

/// Program header type: thread-local storage template.
pub const PT_TLS: u32 = 7;

/// Segment flag: readable.
pub const PF_R: u32 = 4;
/// Segment flag: writable.
pub const PF_W: u32 = 2;
/// Segment flag: executable.
pub const PF_X: u32 = 1;

/// Size of the ELF64 file header.
pub(crate) const ELF64_EHDR_SIZE: usize = 64;

/// Size of one ELF64 program header entry.
pub(crate) const ELF64_PHDR_SIZE: usize = 56;

fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn le_u64(data: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(bytes)
}

/// Errors from ELF parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The data does not start with `\x7fELF`.
    BadMagic,
    /// Not a 64-bit little-endian image.
    UnsupportedFormat,
    /// Not an executable or position-independent executable.
    UnsupportedType,
    /// The data is shorter than a declared structure.
    Truncated,
    /// A declared offset or size does not fit the data.
    InvalidOffset,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "invalid ELF magic"),
            Self::UnsupportedFormat => write!(f, "not a 64-bit little-endian ELF"),
            Self::UnsupportedType => write!(f, "not an executable ELF"),
            Self::Truncated => write!(f, "truncated ELF data"),
            Self::InvalidOffset => write!(f, "ELF offset out of bounds"),
        }
    }
}

/// The parsed ELF64 file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Header {
    /// Object type (`ET_EXEC` or `ET_DYN`).
    pub e_type: u16,
    /// Target machine.
    pub e_machine: u16,
    /// Entry point virtual address.
    pub e_entry: u64,
    /// Program header table offset.
    pub e_phoff: u64,
    /// Size of one program header entry.
    pub e_phentsize: u16,
    /// Number of program header entries.
    pub e_phnum: u16,
}

impl Elf64Header {
    /// Parses and validates the file header.
    ///
    /// # Errors
    ///
    /// Rejects data that is truncated, carries the wrong magic, is not a
    /// 64-bit little-endian image, is not executable, or whose program
    /// header table lies outside the data.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < ELF64_EHDR_SIZE {
            return Err(ElfError::Truncated);
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if data[4] != ELFCLASS64 || data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedFormat);
        }
        let e_type = le_u16(data, 16);
        if e_type != ET_EXEC && e_type != ET_DYN {
            return Err(ElfError::UnsupportedType);
        }

        let header = Self {
            e_type,
            e_machine: le_u16(data, 18),
            e_entry: le_u64(data, 24),
            e_phoff: le_u64(data, 32),
            e_phentsize: le_u16(data, 54),
            e_phnum: le_u16(data, 56),
        };

        if header.e_phnum != 0 {
            if (header.e_phentsize as usize) < ELF64_PHDR_SIZE {
                return Err(ElfError::InvalidOffset);
            }
            let table_size = header.e_phentsize as u64 * header.e_phnum as u64;
            let table_end = header.e_phoff.checked_add(table_size).ok_or(ElfError::InvalidOffset)?;
            if table_end > data.len() as u64 {
                return Err(ElfError::InvalidOffset);
            }
        }

        Ok(header)
    }
}

/// One parsed program header entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64ProgramHeader {
    /// Segment type (`PT_LOAD`, `PT_TLS`, ...).
    pub p_type: u32,
    /// Segment flags (`PF_R`/`PF_W`/`PF_X`).
    pub p_flags: u32,
    /// Offset of the segment contents in the file.
    pub p_offset: u64,
    /// Virtual address the segment wants.
    pub p_vaddr: u64,
    /// Bytes present in the file.
    pub p_filesz: u64,
    /// Bytes occupied in memory (the excess over `p_filesz` zero-fills).
    pub p_memsz: u64,
    /// Required alignment.
    pub p_align: u64,
}

impl Elf64ProgramHeader {
    /// Parses the entry at byte `offset`. The caller bounds-checks.
    pub(crate) fn parse(data: &[u8], offset: usize) -> Self {
        Self {
            p_type: le_u32(data, offset),
            p_flags: le_u32(data, offset + 4),
            p_offset: le_u64(data, offset + 8),
            p_vaddr: le_u64(data, offset + 16),
            p_filesz: le_u64(data, offset + 32),
            p_memsz: le_u64(data, offset + 40),
            p_align: le_u64(data, offset + 48),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A minimal valid ELF64 header with no program headers.
    pub(crate) fn make_elf_header() -> Vec<u8> {
        let mut buf = vec![0u8; ELF64_EHDR_SIZE];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS64;
        buf[5] = ELFDATA2LSB;
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        buf[24..32].copy_from_slice(&0x0040_1000u64.to_le_bytes()); // e_entry
        buf[32..40].copy_from_slice(&(ELF64_EHDR_SIZE as u64).to_le_bytes()); // e_phoff
        buf[54..56].copy_from_slice(&(ELF64_PHDR_SIZE as u16).to_le_bytes());
        buf
    }

    /// Appends one program header and bumps `e_phnum`.
    pub(crate) fn append_phdr(
        buf: &mut Vec<u8>,
        p_type: u32,
        p_flags: u32,
        p_offset: u64,
        p_vaddr: u64,
        p_filesz: u64,
        p_memsz: u64,
    ) {
        let mut phdr = vec![0u8; ELF64_PHDR_SIZE];
        phdr[0..4].copy_from_slice(&p_type.to_le_bytes());
        phdr[4..8].copy_from_slice(&p_flags.to_le_bytes());
        phdr[8..16].copy_from_slice(&p_offset.to_le_bytes());
        phdr[16..24].copy_from_slice(&p_vaddr.to_le_bytes());
        phdr[32..40].copy_from_slice(&p_filesz.to_le_bytes());
        phdr[40..48].copy_from_slice(&p_memsz.to_le_bytes());
        phdr[48..56].copy_from_slice(&16u64.to_le_bytes()); // p_align
        buf.extend_from_slice(&phdr);

        let phnum = le_u16(buf, 56) + 1;
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());
    }

    #[test]
    fn parse_accepts_minimal_header() {
        let buf = make_elf_header();
        let header = Elf64Header::parse(&buf).unwrap();
        assert_eq!(header.e_entry, 0x0040_1000);
        assert_eq!(header.e_machine, 62);
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut buf = make_elf_header();
        buf[0] = 0;
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::BadMagic));
    }

    #[test]
    fn parse_rejects_truncation() {
        assert_eq!(Elf64Header::parse(&[0u8; 10]), Err(ElfError::Truncated));
    }

    #[test]
    fn parse_rejects_32_bit() {
        let mut buf = make_elf_header();
        buf[4] = 1; // ELFCLASS32
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::UnsupportedFormat));
    }

    #[test]
    fn parse_rejects_out_of_bounds_phdr_table() {
        let mut buf = make_elf_header();
        buf[56..58].copy_from_slice(&4u16.to_le_bytes()); // claim 4 phdrs
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::InvalidOffset));
    }
}
