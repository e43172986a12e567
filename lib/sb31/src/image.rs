// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

use crate::{
    CertBlockHeader, Digest, Error, HexDump, ImageHeader, CERT_FLAGS,
    CHAINED_BLOCK_LENGTH, ENC_OEM_SHARE_LENGTH, PUBLIC_KEY_LENGTH,
    SIGNATURE_LENGTH,
};

/// The signed prefix of the image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    bytes: Vec<u8>,
}

impl Manifest {
    pub const SIZE: usize = ImageHeader::SIZE
        + crate::DIGEST_LENGTH
        + CertBlockHeader::SIZE
        + 4
        + PUBLIC_KEY_LENGTH
        + ENC_OEM_SHARE_LENGTH;

    pub fn new(
        header: &ImageHeader,
        final_hash: &Digest,
        cert: &CertBlockHeader,
        auth_public_key: &[u8; PUBLIC_KEY_LENGTH],
        enc_oem_share: &[u8; ENC_OEM_SHARE_LENGTH],
    ) -> Result<Self, Error> {
        if !header.is_finalized() {
            return Err(Error::HeaderNotFinalized);
        }
        let mut bytes = Vec::with_capacity(Self::SIZE);
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(final_hash);
        bytes.extend_from_slice(&cert.to_bytes());
        bytes.extend_from_slice(&CERT_FLAGS.to_le_bytes());
        bytes.extend_from_slice(auth_public_key);
        bytes.extend_from_slice(enc_oem_share);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Manifest ({} bytes)", self.bytes.len())?;
        write!(f, "{}", HexDump(&self.bytes))
    }
}

/// `manifest | signature | chained blocks`, immutable once assembled.
#[derive(Clone, PartialEq, Eq)]
pub struct FinalImage {
    bytes: Vec<u8>,
    manifest_len: usize,
}

impl FinalImage {
    pub fn assemble(
        manifest: Manifest,
        signature: &[u8; SIGNATURE_LENGTH],
        chained_blocks: &[u8],
    ) -> Result<Self, Error> {
        if chained_blocks.len() % CHAINED_BLOCK_LENGTH != 0 {
            return Err(Error::Truncated {
                expected: chained_blocks.len().next_multiple_of(
                    CHAINED_BLOCK_LENGTH,
                ),
                actual: chained_blocks.len(),
            });
        }
        let manifest_len = manifest.size();
        let mut bytes = manifest.bytes;
        bytes.reserve(SIGNATURE_LENGTH + chained_blocks.len());
        bytes.extend_from_slice(signature);
        bytes.extend_from_slice(chained_blocks);
        Ok(Self {
            bytes,
            manifest_len,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn manifest(&self) -> &[u8] {
        &self.bytes[..self.manifest_len]
    }

    pub fn signature(&self) -> &[u8] {
        &self.bytes[self.manifest_len..self.manifest_len + SIGNATURE_LENGTH]
    }

    pub fn chained_blocks(&self) -> &[u8] {
        &self.bytes[self.manifest_len + SIGNATURE_LENGTH..]
    }

    pub fn block_count(&self) -> usize {
        self.chained_blocks().len() / CHAINED_BLOCK_LENGTH
    }

    /// Parses the header back out of the image.
    pub fn header(&self) -> Result<ImageHeader, Error> {
        ImageHeader::from_bytes(&self.bytes)
    }
}

impl fmt::Debug for FinalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalImage")
            .field("len", &self.bytes.len())
            .field("manifest_len", &self.manifest_len)
            .field("block_count", &self.block_count())
            .finish()
    }
}
