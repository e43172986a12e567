// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;
use static_assertions::const_assert_eq;
use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    Error, DATA_BLOCK_LENGTH, DIGEST_LENGTH, SIGNATURE_LENGTH,
};

/// Elliptic curve used for the manifest signature and the block hash chain.
///
/// Only NIST P-256 is supported by the device HSM flow, which fixes the
/// digest to SHA-256.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Curve {
    #[default]
    Secp256r1,
}

impl Curve {
    pub fn name(&self) -> &'static str {
        match self {
            Curve::Secp256r1 => "secp256r1",
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            Curve::Secp256r1 => DIGEST_LENGTH,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ImageFlags: u32 {
        /// The container encrypts provisioning (manufacturing) firmware.
        const PROV_MFW = 1 << 0;
    }
}

/// Wire layout of the header; every field is little endian and unaligned.
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawHeader {
    magic: [u8; 4],
    format_minor: U16,
    format_major: U16,
    flags: U32,
    block_count: U32,
    block_size: U32,
    timestamp: U64,
    firmware_version: U32,
    image_total_length: U32,
    image_type: U32,
    cert_block_offset: U32,
    description: [u8; ImageHeader::DESCRIPTION_LENGTH],
}

const_assert_eq!(core::mem::size_of::<RawHeader>(), ImageHeader::SIZE);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageHeader {
    pub firmware_version: u32,
    pub curve: Curve,
    pub timestamp: u64,
    pub flags: ImageFlags,
    pub block_count: u32,
    pub image_total_length: u32,
    description: [u8; Self::DESCRIPTION_LENGTH],
    finalized: bool,
}

impl ImageHeader {
    pub const SIZE: usize = 60;
    pub const MAGIC: [u8; 4] = *b"sbv3";
    pub const FORMAT_MAJOR: u16 = 3;
    pub const FORMAT_MINOR: u16 = 1;
    pub const DESCRIPTION_LENGTH: usize = 16;
    /// Signed and encrypted container, not an NXP-signed one.
    pub const IMAGE_TYPE: u32 = 6;

    /// Builds a template header. `block_count` and `image_total_length`
    /// stay provisional until [`ImageHeader::finalize`] is called.
    ///
    /// A missing `timestamp` is taken from the wall clock.
    pub fn new(
        firmware_version: u32,
        curve: Curve,
        description: &str,
        timestamp: Option<u64>,
        flags: ImageFlags,
    ) -> Result<Self, Error> {
        if !description.is_ascii() {
            return Err(Error::NonAsciiDescription);
        }
        let mut desc = [0u8; Self::DESCRIPTION_LENGTH];
        let len = description.len().min(Self::DESCRIPTION_LENGTH);
        desc[..len].copy_from_slice(&description.as_bytes()[..len]);

        let timestamp = timestamp.unwrap_or_else(|| {
            u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
        });

        Ok(Self {
            firmware_version,
            curve,
            timestamp,
            flags,
            block_count: 0,
            image_total_length: Self::SIZE as u32,
            description: desc,
            finalized: false,
        })
    }

    /// Description as stored on the wire (ASCII, zero padded).
    pub fn description(&self) -> &[u8; Self::DESCRIPTION_LENGTH] {
        &self.description
    }

    pub fn block_size(&self) -> u32 {
        (4 + self.curve.digest_len() + DATA_BLOCK_LENGTH) as u32
    }

    /// The certificate block directly follows the header and final hash.
    pub fn cert_block_offset(&self) -> u32 {
        (Self::SIZE + self.curve.digest_len()) as u32
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Records the block count and grows the total length by the final
    /// hash, the certificate block and the signature. Only valid once.
    pub fn finalize(
        &mut self,
        block_count: u32,
        cert_block_size: u32,
    ) -> Result<(), Error> {
        if self.finalized {
            return Err(Error::HeaderFinalized);
        }
        let total = self.image_total_length as usize
            + self.curve.digest_len()
            + cert_block_size as usize
            + SIGNATURE_LENGTH;
        self.image_total_length =
            crate::wire_u32("image_total_length", total)?;
        self.block_count = block_count;
        self.finalized = true;
        Ok(())
    }

    pub fn size(&self) -> usize {
        Self::SIZE
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let raw = RawHeader {
            magic: Self::MAGIC,
            format_minor: Self::FORMAT_MINOR.into(),
            format_major: Self::FORMAT_MAJOR.into(),
            flags: self.flags.bits().into(),
            block_count: self.block_count.into(),
            block_size: self.block_size().into(),
            timestamp: self.timestamp.into(),
            firmware_version: self.firmware_version.into(),
            image_total_length: self.image_total_length.into(),
            image_type: Self::IMAGE_TYPE.into(),
            cert_block_offset: self.cert_block_offset().into(),
            description: self.description,
        };
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Parses a header back out of a container, e.g. to inspect a produced
    /// image. The result is considered finalized.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let (raw, _) = RawHeader::ref_from_prefix(bytes).map_err(|_| {
            Error::Truncated {
                expected: Self::SIZE,
                actual: bytes.len(),
            }
        })?;
        if raw.magic != Self::MAGIC {
            return Err(Error::BadMagic(raw.magic));
        }
        let (major, minor) = (raw.format_major.get(), raw.format_minor.get());
        if (major, minor) != (Self::FORMAT_MAJOR, Self::FORMAT_MINOR) {
            return Err(Error::UnsupportedVersion { major, minor });
        }
        Ok(Self {
            firmware_version: raw.firmware_version.get(),
            curve: Curve::Secp256r1,
            timestamp: raw.timestamp.get(),
            flags: ImageFlags::from_bits_retain(raw.flags.get()),
            block_count: raw.block_count.get(),
            image_total_length: raw.image_total_length.get(),
            description: raw.description,
            finalized: true,
        })
    }
}

impl fmt::Display for ImageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc_len = self
            .description
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::DESCRIPTION_LENGTH);
        let desc = String::from_utf8_lossy(&self.description[..desc_len]);
        let when = chrono::DateTime::from_timestamp(self.timestamp as i64, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "out of range".to_string());

        writeln!(f, "SB3.1 header")?;
        writeln!(f, "  Flags:              {:#010x}", self.flags.bits())?;
        writeln!(f, "  Block count:        {}", self.block_count)?;
        writeln!(f, "  Block size:         {}", self.block_size())?;
        writeln!(f, "  Timestamp:          {} ({when})", self.timestamp)?;
        writeln!(f, "  Firmware version:   {}", self.firmware_version)?;
        writeln!(f, "  Image total length: {}", self.image_total_length)?;
        writeln!(f, "  Image type:         {}", Self::IMAGE_TYPE)?;
        writeln!(f, "  Cert block offset:  {}", self.cert_block_offset())?;
        writeln!(f, "  Curve:              {}", self.curve.name())?;
        write!(f, "  Description:        {desc}")
    }
}
