//! Compiled program files (`.hbc`).
//!
//! ```text
//! magic      4 bytes  b"HRMS"
//! signature  4 bytes  u32, identifies the front-end language
//! version    6 bytes  u16 major, minor, patch of the format
//! constants  u32 count, then each constant's value encoding
//! code       u32 byte length, then the main instruction stream
//! ```
//!
//! All integers are big-endian.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::codec::{self, CodecError};
use crate::compiler::Bytecode;

pub const MAGIC: [u8; 4] = *b"HRMS";

/// Version written by this build. Files with the same major and a minor no
/// newer than this one can be read.
pub const FORMAT_VERSION: SemVersion = SemVersion { major: 1, minor: 0, patch: 0 };

const HEADER_LEN: usize = 4 + 4 + 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl SemVersion {
    /// Whether a reader at `self` understands a file written at `file`.
    pub fn can_read(self, file: SemVersion) -> bool {
        file.major == self.major && file.minor <= self.minor
    }
}

impl fmt::Display for SemVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid binary file: {0}")]
    InvalidBinary(String),
    #[error("program was compiled for another language (signature {found:#010x}, expected {expected:#010x})")]
    InvalidLanguage { expected: u32, found: u32 },
    #[error("unsupported bytecode version {found}, this build reads {expected}")]
    InvalidVersion { expected: SemVersion, found: SemVersion },
    #[error("cannot encode program: {0}")]
    Encode(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialize `bytecode` into program file bytes.
pub fn encode(bytecode: &Bytecode, signature: u32) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(HEADER_LEN + bytecode.instructions.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&signature.to_be_bytes());
    for part in [FORMAT_VERSION.major, FORMAT_VERSION.minor, FORMAT_VERSION.patch] {
        out.extend_from_slice(&part.to_be_bytes());
    }

    write_len(&mut out, "constant count", bytecode.constants.len())?;
    for constant in &bytecode.constants {
        codec::compile_into(constant, &mut out)?;
    }

    write_len(&mut out, "code length", bytecode.instructions.len())?;
    out.extend_from_slice(bytecode.instructions.as_bytes());
    Ok(out)
}

/// Parse program file bytes, checking they target the language identified by
/// `signature`.
pub fn decode(bytes: &[u8], signature: u32) -> Result<Bytecode, LoadError> {
    let mut cursor = Cursor { bytes, pos: 0 };

    if cursor.take(4)? != MAGIC {
        return Err(LoadError::InvalidBinary("missing HRMS header".into()));
    }
    let found = cursor.u32()?;
    if found != signature {
        return Err(LoadError::InvalidLanguage { expected: signature, found });
    }
    let version = SemVersion { major: cursor.u16()?, minor: cursor.u16()?, patch: cursor.u16()? };
    if !FORMAT_VERSION.can_read(version) {
        return Err(LoadError::InvalidVersion { expected: FORMAT_VERSION, found: version });
    }

    let count = cursor.u32()? as usize;
    let mut constants = Vec::with_capacity(count.min(bytes.len()));
    for i in 0..count {
        let (value, read) = codec::decompile(cursor.rest())
            .map_err(|e| LoadError::InvalidBinary(format!("constant {}: {}", i, e)))?;
        constants.push(value);
        cursor.pos += read;
    }

    let code_len = cursor.u32()? as usize;
    let instructions = cursor.take(code_len)?.to_vec().into();

    if !cursor.rest().is_empty() {
        return Err(LoadError::InvalidBinary(format!("{} trailing bytes", cursor.rest().len())));
    }
    Ok(Bytecode { instructions, constants })
}

impl Bytecode {
    pub fn write_program<W: Write>(&self, mut writer: W, signature: u32) -> Result<(), LoadError> {
        let bytes = encode(self, signature)?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    pub fn read_program<R: Read>(mut reader: R, signature: u32) -> Result<Bytecode, LoadError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        decode(&bytes, signature)
    }
}

pub fn save(path: &Path, bytecode: &Bytecode, signature: u32) -> Result<(), LoadError> {
    let bytes = encode(bytecode, signature)?;
    std::fs::write(path, &bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), constants = bytecode.constants.len(), "program saved");
    Ok(())
}

pub fn load(path: &Path, signature: u32) -> Result<Bytecode, LoadError> {
    let bytes = std::fs::read(path)?;
    let bytecode = decode(&bytes, signature)?;
    debug!(path = %path.display(), bytes = bytes.len(), constants = bytecode.constants.len(), "program loaded");
    Ok(bytecode)
}

fn write_len(out: &mut Vec<u8>, what: &'static str, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len).map_err(|_| CodecError::LengthOverflow { what, len })?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos.min(self.bytes.len())..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        let rest = self.rest();
        if rest.len() < n {
            return Err(LoadError::InvalidBinary(format!(
                "unexpected end of file at byte {} (wanted {} more)",
                self.pos, n
            )));
        }
        self.pos += n;
        Ok(&rest[..n])
    }

    fn u16(&mut self) -> Result<u16, LoadError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, LoadError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
