// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted device used by the integration tests.
//!
//! Memory is a sparse byte map. HSM operations write fixed filler patterns
//! into their output regions, and "encryption" XORs each block with a byte
//! derived from its block number, so every run is deterministic.

#![allow(dead_code)]

use std::collections::BTreeMap;

use devhsm::{ChannelError, DeviceChannel, OemKeyType, Region, StoreKeyType};

pub const ENC_SHARE_FILL: u8 = 0xe1;
pub const ENC_MASTER_SHARE_FILL: u8 = 0xe2;
pub const CERT_PUK_FILL: u8 = 0xe3;
pub const AUTH_PRK_FILL: u8 = 0xa1;
pub const AUTH_PUK_FILL: u8 = 0xa2;
pub const ENC_PRK_FILL: u8 = 0xb1;
pub const ENC_PUK_FILL: u8 = 0xb2;
pub const WRAPPED_PCK_FILL: u8 = 0xc5;
pub const SIGNATURE_FILL: u8 = 0x5c;

pub fn block_mask(block_number: u32) -> u8 {
    0x5a ^ block_number as u8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Write,
    Read,
    MasterShare,
    GenerateKey,
    WrapKey,
    EncryptBlock,
    SignBlob,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Write { address: u32, len: usize },
    Read { address: u32, len: u32 },
    MasterShare,
    GenerateKey(OemKeyType),
    WrapKey(StoreKeyType, u32),
    EncryptBlock { kek_id: u32, block_number: u32 },
    SignBlob { data_len: u32 },
}

#[derive(Default)]
pub struct StubChannel {
    memory: BTreeMap<u32, u8>,
    pub calls: Vec<Call>,
    /// Report this size for the given operation instead of the real one.
    pub misreport: Option<(Op, u32)>,
    /// Fail the given operation.
    pub fail: Option<(Op, fn() -> ChannelError)>,
}

impl StubChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn misreporting(op: Op, size: u32) -> Self {
        Self {
            misreport: Some((op, size)),
            ..Self::default()
        }
    }

    pub fn failing(op: Op, err: fn() -> ChannelError) -> Self {
        Self {
            fail: Some((op, err)),
            ..Self::default()
        }
    }

    pub fn hsm_calls(&self) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|c| !matches!(c, Call::Write { .. } | Call::Read { .. }))
            .collect()
    }

    fn check(&self, op: Op) -> Result<(), ChannelError> {
        match self.fail {
            Some((o, err)) if o == op => Err(err()),
            _ => Ok(()),
        }
    }

    fn size(&self, op: Op, real: u32) -> u32 {
        match self.misreport {
            Some((o, size)) if o == op => size,
            _ => real,
        }
    }

    fn fill(&mut self, region: Region, len: u32, byte: u8) -> u32 {
        let len = len.min(region.len);
        for i in 0..len {
            self.memory.insert(region.address + i, byte);
        }
        len
    }

    fn peek(&self, address: u32, len: u32) -> Vec<u8> {
        (0..len)
            .map(|i| self.memory.get(&(address + i)).copied().unwrap_or(0))
            .collect()
    }
}

impl DeviceChannel for StubChannel {
    fn write_memory(
        &mut self,
        address: u32,
        data: &[u8],
    ) -> Result<(), ChannelError> {
        self.calls.push(Call::Write {
            address,
            len: data.len(),
        });
        self.check(Op::Write)?;
        for (i, b) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *b);
        }
        Ok(())
    }

    fn read_memory(
        &mut self,
        address: u32,
        len: u32,
    ) -> Result<Vec<u8>, ChannelError> {
        self.calls.push(Call::Read { address, len });
        self.check(Op::Read)?;
        let len = self.size(Op::Read, len);
        Ok(self.peek(address, len))
    }

    fn generate_master_share(
        &mut self,
        _seed: Region,
        enc_share: Region,
        enc_master_share: Region,
        cert_puk: Region,
    ) -> Result<[u32; 3], ChannelError> {
        self.calls.push(Call::MasterShare);
        self.check(Op::MasterShare)?;
        let a = self.fill(enc_share, 48, ENC_SHARE_FILL);
        let b = self.fill(enc_master_share, 64, ENC_MASTER_SHARE_FILL);
        let c = self.fill(cert_puk, 64, CERT_PUK_FILL);
        Ok([self.size(Op::MasterShare, a), b, c])
    }

    fn generate_key(
        &mut self,
        key_type: OemKeyType,
        _key_prop: u32,
        prk: Region,
        puk: Region,
    ) -> Result<(u32, u32), ChannelError> {
        self.calls.push(Call::GenerateKey(key_type));
        self.check(Op::GenerateKey)?;
        let (prk_fill, puk_fill) = match key_type {
            OemKeyType::Mfwisk => (AUTH_PRK_FILL, AUTH_PUK_FILL),
            _ => (ENC_PRK_FILL, ENC_PUK_FILL),
        };
        let a = self.fill(prk, 48, prk_fill);
        let b = self.fill(puk, 64, puk_fill);
        Ok((self.size(Op::GenerateKey, a), b))
    }

    fn wrap_key(
        &mut self,
        key_type: StoreKeyType,
        key_prop: u32,
        _input: Region,
        output: Region,
    ) -> Result<(u32, u32), ChannelError> {
        self.calls.push(Call::WrapKey(key_type, key_prop));
        self.check(Op::WrapKey)?;
        let n = self.fill(output, 48, WRAPPED_PCK_FILL);
        Ok((0, self.size(Op::WrapKey, n)))
    }

    fn encrypt_block(
        &mut self,
        _key: Region,
        kek_id: u32,
        _header: Region,
        block_number: u32,
        data: Region,
    ) -> Result<(), ChannelError> {
        self.calls.push(Call::EncryptBlock {
            kek_id,
            block_number,
        });
        self.check(Op::EncryptBlock)?;
        let mask = block_mask(block_number);
        for i in 0..data.len {
            let b = self.memory.entry(data.address + i).or_insert(0);
            *b ^= mask;
        }
        Ok(())
    }

    fn sign_blob(
        &mut self,
        _key: Region,
        data: Region,
        signature: Region,
    ) -> Result<u32, ChannelError> {
        self.calls.push(Call::SignBlob { data_len: data.len });
        self.check(Op::SignBlob)?;
        let n = self.fill(signature, 64, SIGNATURE_FILL);
        Ok(self.size(Op::SignBlob, n))
    }
}
