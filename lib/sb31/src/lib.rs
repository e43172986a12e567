// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory model of an NXP "Secure Binary" 3.1 container, as assembled
//! during device-HSM provisioning.
//!
//! The container is laid out as follows:
//!
//! Manifest (the signed part):
//! - [`ImageHeader`] (60B)
//! - final hash (32B, SHA-256 of the first chained command block)
//! - [`CertBlockHeader`] (12B)
//! - certificate flags (4B, [`CERT_FLAGS`])
//! - firmware authentication public key (64B)
//! - encrypted OEM share (48B)
//!
//! followed by the manifest signature (64B) and the chained command blocks.
//! Each chained block is `number (4B) | digest of next block (32B) |
//! encrypted data (256B)`; the last block carries an all-zero digest.
//!
//! Nothing in this crate touches key material: encryption and signing happen
//! on the device, and the only primitive computed here is the SHA-256 chain
//! over already-encrypted blocks.

use core::fmt;
use thiserror::Error;

mod cert_block;
mod command;
mod header;
mod image;
mod section;

pub use crate::cert_block::{CertBlockHeader, CERT_FLAGS};
pub use crate::command::{Command, CommandTag, FwCounter, KeyWrap, COMMAND_TAG};
pub use crate::header::{Curve, ImageFlags, ImageHeader};
pub use crate::image::{FinalImage, Manifest};
pub use crate::section::{CommandBlocks, CommandSection};

pub const DIGEST_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;
pub const PUBLIC_KEY_LENGTH: usize = 64;
pub const ENC_OEM_SHARE_LENGTH: usize = 48;

/// Size of a plaintext (and encrypted) command block.
pub const DATA_BLOCK_LENGTH: usize = 256;

/// Size of a command block once it has been numbered and hash chained.
pub const CHAINED_BLOCK_LENGTH: usize = 4 + DIGEST_LENGTH + DATA_BLOCK_LENGTH;

pub type Digest = [u8; DIGEST_LENGTH];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("block {got} committed out of order (expected block {expected})")]
    BlockOutOfOrder { expected: u32, got: u32 },
    #[error("block {number} is {len} bytes long, expected {DATA_BLOCK_LENGTH}")]
    BlockLength { number: u32, len: usize },
    #[error("{remaining} command block(s) still waiting to be committed")]
    ChainIncomplete { remaining: u32 },
    #[error("command section is sealed once block commits have started")]
    SectionSealed,
    #[error("image header has already been finalized")]
    HeaderFinalized,
    #[error("image header must be finalized before building the manifest")]
    HeaderNotFinalized,
    #[error("{field} value {value:#x} does not fit its wire field")]
    FieldOverflow { field: &'static str, value: usize },
    #[error("description must be ASCII")]
    NonAsciiDescription,
    #[error("expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
}

pub(crate) fn wire_u32(
    field: &'static str,
    value: usize,
) -> Result<u32, Error> {
    u32::try_from(value).map_err(|_| Error::FieldOverflow { field, value })
}

/// Zero pads `data` up to the next multiple of `align`.
pub(crate) fn pad_to(data: &mut Vec<u8>, align: usize) {
    let padded = data.len().next_multiple_of(align);
    data.resize(padded, 0);
}

/// Hexdump formatter for debug logging of public artifacts.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.0.chunks(16).enumerate() {
            write!(f, "{:08x}:", i * 16)?;
            for byte in line {
                write!(f, " {byte:02x}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
