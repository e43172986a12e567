// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ordered command list and the hash chain over its encrypted blocks.
//!
//! The chain runs backwards: every chained block carries the digest of the
//! block after it, so the device can verify block `n + 1` with the digest
//! it got from block `n`, and the manifest only has to pin block 1. As a
//! consequence blocks must be committed last to first.

use core::fmt;
use sha2::{Digest as _, Sha256};
use zeroize::Zeroizing;

use crate::{
    pad_to, wire_u32, Command, Digest, Error, CHAINED_BLOCK_LENGTH,
    DATA_BLOCK_LENGTH, DIGEST_LENGTH,
};

#[derive(Default)]
pub struct CommandSection {
    commands: Vec<Command>,
    /// Block count fixed by the first commit; the command list is frozen
    /// from then on.
    sealed: Option<u32>,
    /// Chained blocks in commit order, i.e. block N first.
    chain: Vec<[u8; CHAINED_BLOCK_LENGTH]>,
}

impl CommandSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command; commands execute in insertion order.
    pub fn add_command(&mut self, command: Command) -> Result<(), Error> {
        if self.sealed.is_some() {
            return Err(Error::SectionSealed);
        }
        self.commands.push(command);
        Ok(())
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Serialized size of the commands, padded to whole blocks.
    pub fn size(&self) -> usize {
        let raw: usize = self.commands.iter().map(Command::size).sum();
        raw.next_multiple_of(DATA_BLOCK_LENGTH)
    }

    /// Plaintext of the whole section. Contains key blobs, so it is wiped
    /// on drop.
    pub fn serialize(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.size()));
        for c in &self.commands {
            out.extend_from_slice(&c.to_bytes()?);
        }
        pad_to(&mut out, DATA_BLOCK_LENGTH);
        Ok(out)
    }

    pub fn block_count(&self) -> Result<u32, Error> {
        match self.sealed {
            Some(n) => Ok(n),
            None => wire_u32("block count", self.size() / DATA_BLOCK_LENGTH),
        }
    }

    /// Splits the serialized section into plaintext blocks for encryption.
    pub fn blocks(&self) -> Result<CommandBlocks, Error> {
        // Make sure the count fits before handing anything out.
        self.block_count()?;
        Ok(CommandBlocks {
            data: self.serialize()?,
        })
    }

    /// Number of the block [`CommandSection::commit_block`] accepts next,
    /// or `None` once the chain is complete.
    pub fn next_commit(&self) -> Result<Option<u32>, Error> {
        let count = self.block_count()?;
        let done = self.chain.len() as u32;
        Ok((done < count).then(|| count - done))
    }

    /// Adds encrypted block `number` to the chain. Blocks must arrive as
    /// `N, N-1, ..., 1`.
    pub fn commit_block(
        &mut self,
        number: u32,
        encrypted: &[u8],
    ) -> Result<(), Error> {
        let count = self.block_count()?;
        let expected = self
            .next_commit()?
            .ok_or(Error::BlockOutOfOrder { expected: 0, got: number })?;
        if number != expected {
            return Err(Error::BlockOutOfOrder {
                expected,
                got: number,
            });
        }
        if encrypted.len() != DATA_BLOCK_LENGTH {
            return Err(Error::BlockLength {
                number,
                len: encrypted.len(),
            });
        }

        let next_digest = self
            .chain
            .last()
            .map(|b| sha256(b))
            .unwrap_or([0; DIGEST_LENGTH]);

        let mut block = [0u8; CHAINED_BLOCK_LENGTH];
        block[..4].copy_from_slice(&number.to_le_bytes());
        block[4..4 + DIGEST_LENGTH].copy_from_slice(&next_digest);
        block[4 + DIGEST_LENGTH..].copy_from_slice(encrypted);

        self.sealed = Some(count);
        self.chain.push(block);
        Ok(())
    }

    /// Commits a full set of encrypted blocks given in block order
    /// (block 1 first).
    pub fn commit_blocks<B: AsRef<[u8]>>(
        &mut self,
        encrypted: &[B],
    ) -> Result<(), Error> {
        for (i, block) in encrypted.iter().enumerate().rev() {
            self.commit_block(i as u32 + 1, block.as_ref())?;
        }
        Ok(())
    }

    fn ensure_complete(&self) -> Result<(), Error> {
        let count = self.block_count()?;
        let remaining = count - self.chain.len() as u32;
        if remaining != 0 {
            return Err(Error::ChainIncomplete { remaining });
        }
        Ok(())
    }

    /// SHA-256 of chained block 1. An empty section has an all-zero hash.
    pub fn final_hash(&self) -> Result<Digest, Error> {
        self.ensure_complete()?;
        Ok(self
            .chain
            .last()
            .map(|b| sha256(b))
            .unwrap_or([0; DIGEST_LENGTH]))
    }

    /// The chained blocks in block order, as they appear in the image.
    pub fn chained_data(&self) -> Result<Vec<u8>, Error> {
        self.ensure_complete()?;
        Ok(self.chain.iter().rev().flatten().copied().collect())
    }
}

fn sha256(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

impl fmt::Display for CommandSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command section ({} bytes)", self.size())?;
        for (i, c) in self.commands.iter().enumerate() {
            writeln!(f, "  {i:>3}: {c}")?;
        }
        match self.next_commit() {
            Ok(Some(n)) if self.sealed.is_some() => {
                write!(f, "  chain: waiting for block {n}")
            }
            Ok(Some(_)) => write!(f, "  chain: not started"),
            Ok(None) => write!(f, "  chain: complete"),
            Err(e) => write!(f, "  chain: {e}"),
        }
    }
}

/// Plaintext command blocks of a section, ready to be encrypted.
///
/// Iterating is cheap and can be repeated; the backing buffer is wiped when
/// this is dropped.
pub struct CommandBlocks {
    data: Zeroizing<Vec<u8>>,
}

impl CommandBlocks {
    pub fn len(&self) -> usize {
        self.data.len() / DATA_BLOCK_LENGTH
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Yields `(block_number, plaintext)` with block numbers starting at 1.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (u32, &[u8])> + '_ {
        self.data
            .chunks_exact(DATA_BLOCK_LENGTH)
            .enumerate()
            .map(|(i, b)| (i as u32 + 1, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyWrap;

    fn section(key_blob_len: usize) -> CommandSection {
        let mut s = CommandSection::new();
        s.add_command(Command::LoadKeyBlob {
            offset: 0x04,
            key_wrap: KeyWrap::External,
            data: Zeroizing::new(vec![0x33; 48]),
        })
        .unwrap();
        if key_blob_len > 0 {
            s.add_command(Command::Load {
                address: 0x1000,
                memory_id: 0,
                data: vec![0x44; key_blob_len],
            })
            .unwrap();
        }
        s
    }

    fn fake_encrypt(block: &[u8]) -> Vec<u8> {
        block.iter().map(|b| b ^ 0xff).collect()
    }

    #[test]
    fn single_block() {
        let s = section(0);
        assert_eq!(s.size(), 256);
        assert_eq!(s.block_count().unwrap(), 1);
        let blocks = s.blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        let (n, plain) = blocks.iter().next().unwrap();
        assert_eq!(n, 1);
        assert_eq!(&plain[..4], &[0x55, 0xaa, 0xaa, 0x55]);
        assert!(plain[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn blocks_restart() {
        let s = section(500);
        let blocks = s.blocks().unwrap();
        let first: Vec<_> = blocks.iter().map(|(n, _)| n).collect();
        let second: Vec<_> = blocks.iter().map(|(n, _)| n).collect();
        assert_eq!(first, [1, 2, 3]);
        assert_eq!(first, second);
    }

    #[test]
    fn serialization_is_pure() {
        let s = section(300);
        assert_eq!(*s.serialize().unwrap(), *s.serialize().unwrap());
    }

    #[test]
    fn chain_links_blocks() {
        let mut s = section(500);
        let enc: Vec<_> =
            s.blocks().unwrap().iter().map(|(_, b)| fake_encrypt(b)).collect();
        s.commit_blocks(&enc).unwrap();

        let chained = s.chained_data().unwrap();
        assert_eq!(chained.len(), 3 * CHAINED_BLOCK_LENGTH);
        let blocks: Vec<_> = chained.chunks(CHAINED_BLOCK_LENGTH).collect();

        for (i, b) in blocks.iter().enumerate() {
            assert_eq!(&b[..4], &(i as u32 + 1).to_le_bytes());
            assert_eq!(&b[36..], &enc[i][..]);
        }
        assert_eq!(&blocks[0][4..36], &sha256(blocks[1]));
        assert_eq!(&blocks[1][4..36], &sha256(blocks[2]));
        assert_eq!(&blocks[2][4..36], &[0u8; 32]);
        assert_eq!(s.final_hash().unwrap(), sha256(blocks[0]));
    }

    #[test]
    fn out_of_order_commit() {
        let mut s = section(500);
        let zero = [0u8; DATA_BLOCK_LENGTH];
        assert_eq!(
            s.commit_block(1, &zero),
            Err(Error::BlockOutOfOrder {
                expected: 3,
                got: 1
            })
        );
        s.commit_block(3, &zero).unwrap();
        assert_eq!(
            s.commit_block(3, &zero),
            Err(Error::BlockOutOfOrder {
                expected: 2,
                got: 3
            })
        );
        assert_eq!(
            s.final_hash(),
            Err(Error::ChainIncomplete { remaining: 2 })
        );
    }

    #[test]
    fn commit_past_end() {
        let mut s = section(0);
        let zero = [0u8; DATA_BLOCK_LENGTH];
        s.commit_block(1, &zero).unwrap();
        assert_eq!(
            s.commit_block(0, &zero),
            Err(Error::BlockOutOfOrder {
                expected: 0,
                got: 0
            })
        );
    }

    #[test]
    fn wrong_block_length() {
        let mut s = section(0);
        assert_eq!(
            s.commit_block(1, &[0u8; 255]),
            Err(Error::BlockLength { number: 1, len: 255 })
        );
    }

    #[test]
    fn sealed_after_commit() {
        let mut s = section(0);
        s.commit_block(1, &[0u8; DATA_BLOCK_LENGTH]).unwrap();
        assert_eq!(
            s.add_command(Command::Execute { address: 0 }),
            Err(Error::SectionSealed)
        );
        assert_eq!(s.commands().len(), 1);
    }

    #[test]
    fn empty_section() {
        let s = CommandSection::new();
        assert_eq!(s.block_count().unwrap(), 0);
        assert!(s.blocks().unwrap().is_empty());
        assert_eq!(s.final_hash().unwrap(), [0u8; 32]);
        assert!(s.chained_data().unwrap().is_empty());
    }

    proptest::proptest! {
        #[test]
        fn any_load_chains(len in 0usize..1200) {
            let mut s = section(len);
            let blocks = s.blocks().unwrap();
            let count = s.block_count().unwrap() as usize;
            proptest::prop_assert_eq!(blocks.len(), count);
            proptest::prop_assert_eq!(s.size(), count * DATA_BLOCK_LENGTH);

            let enc: Vec<_> =
                blocks.iter().map(|(_, b)| fake_encrypt(b)).collect();
            s.commit_blocks(&enc).unwrap();
            let chained = s.chained_data().unwrap();
            proptest::prop_assert_eq!(
                chained.len(),
                count * CHAINED_BLOCK_LENGTH
            );
            proptest::prop_assert_eq!(
                s.final_hash().unwrap(),
                sha256(&chained[..CHAINED_BLOCK_LENGTH])
            );
        }
    }
}
