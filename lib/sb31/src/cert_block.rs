// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;
use static_assertions::const_assert_eq;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{wire_u32, Error, ENC_OEM_SHARE_LENGTH, PUBLIC_KEY_LENGTH};

/// CA flag, one certificate, NIST P-256 root key.
pub const CERT_FLAGS: u32 = 0x8000_0011;

#[derive(IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawCertBlockHeader {
    magic: [u8; 4],
    format_minor: U16,
    format_major: U16,
    cert_block_size: U32,
}

const_assert_eq!(
    core::mem::size_of::<RawCertBlockHeader>(),
    CertBlockHeader::SIZE
);

/// Header of the certificate block that sits in the manifest.
///
/// The device HSM flow embeds no certificate chain: the block is the
/// header, [`CERT_FLAGS`], the firmware authentication public key and the
/// encrypted OEM share, and `cert_block_size` covers exactly that.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertBlockHeader {
    cert_block_size: u32,
}

impl CertBlockHeader {
    pub const SIZE: usize = 12;
    pub const MAGIC: [u8; 4] = *b"chdr";
    pub const FORMAT_MAJOR: u16 = 2;
    pub const FORMAT_MINOR: u16 = 1;

    pub fn new(
        public_key_len: usize,
        enc_share_len: usize,
    ) -> Result<Self, Error> {
        let size = Self::SIZE + 4 + public_key_len + enc_share_len;
        Ok(Self {
            cert_block_size: wire_u32("cert_block_size", size)?,
        })
    }

    /// The block used by device HSM provisioning: P-256 public key and a
    /// 48 byte encrypted share, 128 bytes in total.
    pub fn placeholder() -> Self {
        Self {
            cert_block_size: (Self::SIZE
                + 4
                + PUBLIC_KEY_LENGTH
                + ENC_OEM_SHARE_LENGTH) as u32,
        }
    }

    /// Size of the whole certificate block, header included.
    pub fn cert_block_size(&self) -> u32 {
        self.cert_block_size
    }

    pub fn size(&self) -> usize {
        Self::SIZE
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let raw = RawCertBlockHeader {
            magic: Self::MAGIC,
            format_minor: Self::FORMAT_MINOR.into(),
            format_major: Self::FORMAT_MAJOR.into(),
            cert_block_size: self.cert_block_size.into(),
        };
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

impl fmt::Display for CertBlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Certificate block header v{}.{}",
            Self::FORMAT_MAJOR,
            Self::FORMAT_MINOR
        )?;
        writeln!(f, "  Block size: {}", self.cert_block_size)?;
        write!(f, "  Flags:      {CERT_FLAGS:#010x}")
    }
}
