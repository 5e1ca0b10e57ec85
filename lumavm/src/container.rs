//! LBC container codec
//!
//! A single little-endian binary format: a 16-byte header, an extension
//! table, a constant pool, then the code section. See spec §4.5 for the
//! exact byte layout.

use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"LVM1";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 16;
pub const EXT_ENTRY_LEN: usize = 3;
pub const CONST_ENTRY_LEN: usize = 4;

/// Bit 0 of the header flags byte: widen relative jumps to full 16-bit
/// PC arithmetic instead of the page-local default (spec §4.3).
pub const FLAG_SIGNED_RELATIVE_JUMPS: u8 = 0x01;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("file is shorter than the 16-byte header")]
    TruncatedHeader,
    #[error("bad magic number, expected 'LVM1'")]
    BadMagic,
    #[error("unsupported format version {found}")]
    UnsupportedVersion { found: u8 },
    #[error("extension table runs past the end of the file")]
    TruncatedExtensionTable,
    #[error("constant pool runs past the end of the file")]
    TruncatedConstantPool,
    #[error("code section offset/length falls outside the file")]
    CodeSectionOutOfRange,
    #[error("code offset {declared} does not match the computed section layout offset {computed}")]
    CodeOffsetMismatch { declared: usize, computed: usize },
}

/// One entry of the extension table: an extension id plus two reserved
/// bytes (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionTableEntry {
    pub id: u8,
}

/// A fully decoded LBC container, owning its code and constant sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub version: u8,
    pub flags: u8,
    pub entry_point: u16,
    pub extensions: Vec<ExtensionTableEntry>,
    pub constants: Vec<i32>,
    pub code: Vec<u8>,
}

impl Container {
    pub fn new(code: Vec<u8>, constants: Vec<i32>, extensions: Vec<ExtensionTableEntry>) -> Self {
        Container {
            version: FORMAT_VERSION,
            flags: 0,
            entry_point: 0,
            extensions,
            constants,
            code,
        }
    }

    pub fn signed_relative_jumps(&self) -> bool {
        self.flags & FLAG_SIGNED_RELATIVE_JUMPS != 0
    }

    /// Serialize to the LBC binary format (spec §4.5).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_LEN
                + self.extensions.len() * EXT_ENTRY_LEN
                + self.constants.len() * CONST_ENTRY_LEN
                + self.code.len(),
        );

        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        out.push(self.flags);
        out.push(self.extensions.len() as u8);
        out.push(self.constants.len() as u8);

        let code_offset = (HEADER_LEN + self.extensions.len() * EXT_ENTRY_LEN
            + self.constants.len() * CONST_ENTRY_LEN) as u16;
        out.extend_from_slice(&code_offset.to_le_bytes());
        out.extend_from_slice(&self.entry_point.to_le_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_le_bytes());

        for ext in &self.extensions {
            out.push(ext.id);
            out.push(0);
            out.push(0);
        }

        for c in &self.constants {
            out.extend_from_slice(&c.to_le_bytes());
        }

        out.extend_from_slice(&self.code);
        out
    }

    /// Parse the LBC binary format, rejecting anything spec §4.5 says a
    /// reader must reject: wrong magic, unknown version, sections that
    /// overrun the file, or declared counts inconsistent with the
    /// available bytes.
    pub fn decode(bytes: &[u8]) -> Result<Container, LoadError> {
        if bytes.len() < HEADER_LEN {
            return Err(LoadError::TruncatedHeader);
        }
        if bytes[0..4] != MAGIC {
            return Err(LoadError::BadMagic);
        }
        let version = bytes[4];
        if version != FORMAT_VERSION {
            return Err(LoadError::UnsupportedVersion { found: version });
        }
        let flags = bytes[5];
        let ext_count = bytes[6];
        let const_count = bytes[7];
        let code_offset = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let entry_point = u16::from_le_bytes([bytes[10], bytes[11]]);
        let code_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;

        let ext_table_start = HEADER_LEN;
        let ext_table_len = ext_count as usize * EXT_ENTRY_LEN;
        let ext_table_end = ext_table_start + ext_table_len;
        if ext_table_end > bytes.len() {
            return Err(LoadError::TruncatedExtensionTable);
        }

        let const_pool_start = ext_table_end;
        let const_pool_len = const_count as usize * CONST_ENTRY_LEN;
        let const_pool_end = const_pool_start + const_pool_len;
        if const_pool_end > bytes.len() {
            return Err(LoadError::TruncatedConstantPool);
        }

        if code_offset != const_pool_end {
            return Err(LoadError::CodeOffsetMismatch {
                declared: code_offset,
                computed: const_pool_end,
            });
        }

        let code_end = code_offset
            .checked_add(code_len)
            .ok_or(LoadError::CodeSectionOutOfRange)?;
        if code_end > bytes.len() {
            return Err(LoadError::CodeSectionOutOfRange);
        }

        let extensions = bytes[ext_table_start..ext_table_end]
            .chunks_exact(EXT_ENTRY_LEN)
            .map(|chunk| ExtensionTableEntry { id: chunk[0] })
            .collect();

        let constants = bytes[const_pool_start..const_pool_end]
            .chunks_exact(CONST_ENTRY_LEN)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let code = bytes[code_offset..code_end].to_vec();

        Ok(Container {
            version,
            flags,
            entry_point,
            extensions,
            constants,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        let mut c = Container::new(
            vec![0xFF], // HALT
            vec![1, -2, 3],
            vec![ExtensionTableEntry { id: 0x01 }],
        );
        c.entry_point = 0;
        c
    }

    #[test]
    fn check_decode_of_encode_round_trips() {
        let c = sample();
        let bytes = c.encode();
        let back = Container::decode(&bytes).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn check_bad_magic_rejected() {
        let mut bytes = sample().encode();
        bytes[0] = b'X';
        assert_eq!(Container::decode(&bytes), Err(LoadError::BadMagic));
    }

    #[test]
    fn check_unsupported_version_rejected() {
        let mut bytes = sample().encode();
        bytes[4] = 9;
        assert_eq!(
            Container::decode(&bytes),
            Err(LoadError::UnsupportedVersion { found: 9 })
        );
    }

    #[test]
    fn check_truncated_file_rejected() {
        let bytes = sample().encode();
        let truncated = &bytes[..bytes.len() - 1];
        assert_eq!(
            Container::decode(truncated),
            Err(LoadError::CodeSectionOutOfRange)
        );
    }

    #[test]
    fn check_header_too_short_rejected() {
        assert_eq!(Container::decode(&[1, 2, 3]), Err(LoadError::TruncatedHeader));
    }

    #[test]
    fn check_empty_container_round_trips() {
        let c = Container::new(vec![], vec![], vec![]);
        let bytes = c.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(Container::decode(&bytes).unwrap(), c);
    }
}
