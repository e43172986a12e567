// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device side of provisioning: memory access plus the trust
//! provisioning opcodes of the ROM bootloader.

use crate::error::ChannelError;

/// A window of device memory handed to the HSM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub address: u32,
    pub len: u32,
}

/// Key classes the HSM can generate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum OemKeyType {
    /// Manufacturing firmware signing key.
    Mfwisk = 0xC3A5,
    /// Manufacturing firmware encryption key.
    Mfwenck = 0xA5C3,
    /// Generic signing key.
    GenSignk = 0x5A3C,
    /// Customer master key signing key.
    GetCustMkSk = 0x3C5A,
}

/// Key classes accepted by the store (wrap) key operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum StoreKeyType {
    /// Customer key derivation key, i.e. the PCK.
    Ckdfk = 1,
    Hkdfk = 2,
    Hmack = 3,
    Cmack = 4,
    Aesk = 5,
    Kuok = 6,
}

/// Blocking, exclusive link to a single device.
///
/// Every method is one round trip. Implementations own their timeouts and
/// report expiry as [`ChannelError::Timeout`]. Sizes returned by the HSM
/// operations are the byte counts the device claims to have written.
pub trait DeviceChannel {
    fn write_memory(
        &mut self,
        address: u32,
        data: &[u8],
    ) -> Result<(), ChannelError>;

    fn read_memory(
        &mut self,
        address: u32,
        len: u32,
    ) -> Result<Vec<u8>, ChannelError>;

    /// Returns the sizes of the encrypted OEM share, the encrypted OEM
    /// master share and the OEM certificate public key.
    fn generate_master_share(
        &mut self,
        seed: Region,
        enc_share: Region,
        enc_master_share: Region,
        cert_puk: Region,
    ) -> Result<[u32; 3], ChannelError>;

    /// Returns `(private key blob size, public key size)`.
    fn generate_key(
        &mut self,
        key_type: OemKeyType,
        key_prop: u32,
        prk: Region,
        puk: Region,
    ) -> Result<(u32, u32), ChannelError>;

    /// Returns `(key header, wrapped key size)`.
    fn wrap_key(
        &mut self,
        key_type: StoreKeyType,
        key_prop: u32,
        input: Region,
        output: Region,
    ) -> Result<(u32, u32), ChannelError>;

    /// Encrypts `data` in place. `block_number` is the per-block counter
    /// mixed into the encryption.
    fn encrypt_block(
        &mut self,
        key: Region,
        kek_id: u32,
        header: Region,
        block_number: u32,
        data: Region,
    ) -> Result<(), ChannelError>;

    /// Returns the signature size.
    fn sign_blob(
        &mut self,
        key: Region,
        data: Region,
        signature: Region,
    ) -> Result<u32, ChannelError>;
}

impl<C: DeviceChannel + ?Sized> DeviceChannel for &mut C {
    fn write_memory(
        &mut self,
        address: u32,
        data: &[u8],
    ) -> Result<(), ChannelError> {
        (**self).write_memory(address, data)
    }

    fn read_memory(
        &mut self,
        address: u32,
        len: u32,
    ) -> Result<Vec<u8>, ChannelError> {
        (**self).read_memory(address, len)
    }

    fn generate_master_share(
        &mut self,
        seed: Region,
        enc_share: Region,
        enc_master_share: Region,
        cert_puk: Region,
    ) -> Result<[u32; 3], ChannelError> {
        (**self).generate_master_share(
            seed,
            enc_share,
            enc_master_share,
            cert_puk,
        )
    }

    fn generate_key(
        &mut self,
        key_type: OemKeyType,
        key_prop: u32,
        prk: Region,
        puk: Region,
    ) -> Result<(u32, u32), ChannelError> {
        (**self).generate_key(key_type, key_prop, prk, puk)
    }

    fn wrap_key(
        &mut self,
        key_type: StoreKeyType,
        key_prop: u32,
        input: Region,
        output: Region,
    ) -> Result<(u32, u32), ChannelError> {
        (**self).wrap_key(key_type, key_prop, input, output)
    }

    fn encrypt_block(
        &mut self,
        key: Region,
        kek_id: u32,
        header: Region,
        block_number: u32,
        data: Region,
    ) -> Result<(), ChannelError> {
        (**self).encrypt_block(key, kek_id, header, block_number, data)
    }

    fn sign_blob(
        &mut self,
        key: Region,
        data: Region,
        signature: Region,
    ) -> Result<u32, ChannelError> {
        (**self).sign_blob(key, data, signature)
    }
}
