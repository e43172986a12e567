// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The provisioning run itself.
//!
//! Every step is a method taking the artifacts of earlier steps and
//! returning its own; `run` threads them through in order. Nothing is
//! retried: the master share and key wrapping operations change HSM state
//! and cannot be repeated until the device is reset.

use log::{debug, info, warn};
use zeroize::Zeroizing;

use sb31::{
    CertBlockHeader, Command, CommandSection, Curve, FinalImage, HexDump,
    ImageFlags, ImageHeader, KeyWrap, Manifest, DATA_BLOCK_LENGTH,
    ENC_OEM_SHARE_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};

use crate::buffers::{BufferMap, DevBuff};
use crate::channel::{DeviceChannel, OemKeyType, Region, StoreKeyType};
use crate::config::ContainerConfig;
use crate::error::{ChannelError, ProvisioningError, StateError};
use crate::forensic::ForensicSink;
use crate::progress::{NoProgress, ProgressSink, Stage};
use crate::validate::{
    validate_command_config, PreSharedKey, ShareSeed,
    RESERVED_KEY_BLOB_OFFSET,
};

pub const ENC_MASTER_SHARE_LENGTH: usize = 64;
pub const CERT_PUBLIC_KEY_LENGTH: usize = 64;
pub const KEY_BLOB_LENGTH: usize = 48;
pub const WRAPPED_PCK_LENGTH: usize = 48;

/// Key encryption key the HSM uses for command block encryption.
pub const BLOCK_KEK_ID: u32 = 16;

/// Key property passed when wrapping the PCK.
const PCK_KEY_PROP: u32 = 0x01;

/// Outputs of the OEM master share generation. All of it is encrypted or
/// public.
struct MasterShare {
    enc_share: [u8; ENC_OEM_SHARE_LENGTH],
    enc_master_share: [u8; ENC_MASTER_SHARE_LENGTH],
    cert_puk: [u8; CERT_PUBLIC_KEY_LENGTH],
}

/// An HSM generated key: the private part only ever exists as a device
/// wrapped blob.
struct KeyPair {
    prk: Zeroizing<Vec<u8>>,
    puk: [u8; PUBLIC_KEY_LENGTH],
}

/// Hands out encryption counters; they start at 1 and may never repeat or
/// go backwards.
struct BlockCounter {
    next: u32,
}

impl BlockCounter {
    fn new() -> Self {
        Self { next: 1 }
    }

    fn claim(&mut self, n: u32) -> Result<u32, StateError> {
        if n != self.next {
            return Err(StateError::CounterReused {
                got: n,
                next: self.next,
            });
        }
        self.next += 1;
        Ok(n)
    }
}

/// Drives one provisioning run against a device.
///
/// The channel is borrowed mutably for the lifetime of the run, so the same
/// device cannot be driven by two runs at once. `run` consumes the
/// orchestrator: a failed run cannot be resumed.
pub struct DeviceHsm<'a, C: DeviceChannel + ?Sized> {
    channel: &'a mut C,
    buffers: BufferMap,
    sink: Option<&'a mut dyn ForensicSink>,
}

impl<'a, C: DeviceChannel + ?Sized> DeviceHsm<'a, C> {
    pub fn new(channel: &'a mut C) -> Self {
        Self {
            channel,
            buffers: BufferMap::default(),
            sink: None,
        }
    }

    pub fn buffers(mut self, buffers: BufferMap) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn forensic_sink(mut self, sink: &'a mut dyn ForensicSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn run(
        mut self,
        pck: &PreSharedKey,
        seed: &ShareSeed,
        config: &ContainerConfig,
        progress: &mut impl ProgressSink,
    ) -> Result<FinalImage, ProvisioningError> {
        // Everything that can be rejected without the device is rejected
        // here, before the first round trip.
        validate_command_config(&config.commands)?;
        self.buffers.slot(DevBuff::B3)?;
        let mut header = ImageHeader::new(
            config.firmware_version,
            Curve::Secp256r1,
            &config.description,
            config.timestamp,
            ImageFlags::PROV_MFW,
        )?;
        let mut stage = |s: Stage| {
            info!("{s}");
            progress.stage(s);
        };

        stage(Stage::MasterShare);
        let share = self.master_share(seed)?;

        stage(Stage::SigningKey);
        let auth =
            self.generate_key(OemKeyType::Mfwisk, "hsm_gen_key(MFWISK)")?;
        self.record("CUST_FW_AUTH_PUK.bin", &auth.puk, None);

        stage(Stage::EncryptionKey);
        let enc_prk = self
            .generate_key(OemKeyType::Mfwenck, "hsm_gen_key(MFWENCK)")?
            .prk;

        stage(Stage::WrapPck);
        let wrapped_pck = self.wrap_pck(pck)?;

        stage(Stage::AssembleSection);
        let mut section = self.assemble(&header, wrapped_pck, config)?;

        stage(Stage::EncryptBlocks {
            count: section.block_count()?,
        });
        let chained = self.encrypt_blocks(&enc_prk, &header, &mut section)?;
        drop(enc_prk);

        stage(Stage::Finalize);
        let cert = self.finalize(&mut header, &section)?;
        let manifest = Manifest::new(
            &header,
            &section.final_hash()?,
            &cert,
            &auth.puk,
            &share.enc_share,
        )?;
        debug!("{manifest}");
        self.record(
            "manifest_to_sign.bin",
            manifest.as_bytes(),
            Some("to_merge"),
        );

        stage(Stage::SignManifest);
        let signature = self.sign_manifest(&auth.prk, &manifest)?;
        drop(auth);

        stage(Stage::Compose);
        let image = FinalImage::assemble(manifest, &signature, &chained)?;
        debug!("final image: {image:?}");
        self.record("Final_SB3.sb3", image.as_bytes(), None);
        Ok(image)
    }

    /// Step 1: seed in B0, encrypted share, encrypted master share and
    /// certificate key out of B1, B2 and B3.
    fn master_share(
        &mut self,
        seed: &ShareSeed,
    ) -> Result<MasterShare, ProvisioningError> {
        const OP: &str = "oem_gen_master_share";
        let seed_region = self.write(OP, DevBuff::B0, seed.as_bytes())?;
        let outputs = [
            self.buffers.slot(DevBuff::B1)?,
            self.buffers.slot(DevBuff::B2)?,
            self.buffers.slot(DevBuff::B3)?,
        ];
        let sizes = self.call(OP, |c| {
            c.generate_master_share(
                seed_region,
                outputs[0],
                outputs[1],
                outputs[2],
            )
        })?;
        check_size(OP, ENC_OEM_SHARE_LENGTH, sizes[0])?;
        check_size(OP, ENC_MASTER_SHARE_LENGTH, sizes[1])?;
        check_size(OP, CERT_PUBLIC_KEY_LENGTH, sizes[2])?;

        let share = MasterShare {
            enc_share: self.read_array(OP, DevBuff::B1)?,
            enc_master_share: self.read_array(OP, DevBuff::B2)?,
            cert_puk: self.read_array(OP, DevBuff::B3)?,
        };
        self.record("ENC_OEM_SHARE.bin", &share.enc_share, None);
        self.record("ENC_OEM_MASTER_SHARE.bin", &share.enc_master_share, None);
        self.record("OEM_CERT.bin", &share.cert_puk, None);
        debug!("encrypted OEM share:\n{}", HexDump(&share.enc_share));
        debug!("OEM certificate key:\n{}", HexDump(&share.cert_puk));
        Ok(share)
    }

    /// Steps 2 and 3: key blob out of B0, public key out of B1.
    fn generate_key(
        &mut self,
        key_type: OemKeyType,
        op: &'static str,
    ) -> Result<KeyPair, ProvisioningError> {
        let prk_region = self.buffers.slot(DevBuff::B0)?;
        let puk_region = self.buffers.slot(DevBuff::B1)?;
        let (prk_len, puk_len) = self.call(op, |c| {
            c.generate_key(key_type, 0, prk_region, puk_region)
        })?;
        check_size(op, KEY_BLOB_LENGTH, prk_len)?;
        check_size(op, PUBLIC_KEY_LENGTH, puk_len)?;

        let prk = self.read_secret(op, DevBuff::B0, KEY_BLOB_LENGTH)?;
        let puk: [u8; PUBLIC_KEY_LENGTH] = self.read_array(op, DevBuff::B1)?;
        debug!("{key_type:?} public key:\n{}", HexDump(&puk));
        Ok(KeyPair { prk, puk })
    }

    /// Step 4: PCK in B0, wrapped PCK out of B1.
    fn wrap_pck(
        &mut self,
        pck: &PreSharedKey,
    ) -> Result<Zeroizing<Vec<u8>>, ProvisioningError> {
        const OP: &str = "hsm_store_key";
        let input = self.write(OP, DevBuff::B0, pck.as_bytes())?;
        let output = self.buffers.slot(DevBuff::B1)?;
        let (_, wrapped_len) = self.call(OP, |c| {
            c.wrap_key(StoreKeyType::Ckdfk, PCK_KEY_PROP, input, output)
        })?;
        check_size(OP, WRAPPED_PCK_LENGTH, wrapped_len)?;
        self.read_secret(OP, DevBuff::B1, WRAPPED_PCK_LENGTH)
    }

    /// Step 5: the command section, starting with the wrapped PCK.
    fn assemble(
        &mut self,
        header: &ImageHeader,
        wrapped_pck: Zeroizing<Vec<u8>>,
        config: &ContainerConfig,
    ) -> Result<CommandSection, ProvisioningError> {
        let mut section = CommandSection::new();
        section.add_command(Command::LoadKeyBlob {
            offset: RESERVED_KEY_BLOB_OFFSET,
            key_wrap: KeyWrap::External,
            data: wrapped_pck,
        })?;
        for c in &config.commands {
            section.add_command(c.clone())?;
        }
        debug!("template header:\n{header}");
        debug!("{section}");
        Ok(section)
    }

    /// Step 6: encrypt every block on the device and chain the results.
    /// Returns the chained blocks in image order.
    fn encrypt_blocks(
        &mut self,
        key: &[u8],
        header: &ImageHeader,
        section: &mut CommandSection,
    ) -> Result<Vec<u8>, ProvisioningError> {
        const OP: &str = "hsm_enc_blk";
        let header_bytes = header.to_bytes();
        self.record("SB3_header.bin", &header_bytes, Some("to_encrypt"));

        let blocks = section.blocks()?;
        let mut counter = BlockCounter::new();
        let mut encrypted = Vec::with_capacity(blocks.len());

        // The header is the same for every block; the HSM only writes back
        // into the data slot.
        let header_region = self.write(OP, DevBuff::B1, &header_bytes)?;
        for (number, plain) in blocks.iter() {
            let key_region = self.write(OP, DevBuff::B0, key)?;
            let data_region = self.write(OP, DevBuff::B2, plain)?;
            let number = counter.claim(number)?;

            self.call(OP, |c| {
                c.encrypt_block(
                    key_region,
                    BLOCK_KEK_ID,
                    header_region,
                    number,
                    data_region,
                )
            })?;
            let block = self.read(OP, DevBuff::B2, DATA_BLOCK_LENGTH)?;
            self.record(
                &format!("SB3_block_{number}.bin"),
                &block,
                Some("encrypted"),
            );
            encrypted.push(block);
        }
        drop(blocks);

        section.commit_blocks(&encrypted)?;
        let chained = section.chained_data()?;
        self.record("Final_data.bin", &chained, Some("to_merge"));
        Ok(chained)
    }

    /// Step 7: placeholder certificate block and the final header fields.
    fn finalize(
        &mut self,
        header: &mut ImageHeader,
        section: &CommandSection,
    ) -> Result<CertBlockHeader, ProvisioningError> {
        let cert = CertBlockHeader::placeholder();
        header.finalize(section.block_count()?, cert.cert_block_size())?;
        debug!("{cert}");
        debug!("final header:\n{header}");
        Ok(cert)
    }

    /// Step 8: signing key blob in B0, manifest in B1, signature out of B2.
    fn sign_manifest(
        &mut self,
        key: &[u8],
        manifest: &Manifest,
    ) -> Result<[u8; SIGNATURE_LENGTH], ProvisioningError> {
        const OP: &str = "hsm_enc_sign";
        let key_region = self.write(OP, DevBuff::B0, key)?;
        let data_region = self.write(OP, DevBuff::B1, manifest.as_bytes())?;
        let sig_region = self.buffers.region(DevBuff::B2, SIGNATURE_LENGTH)?;
        let written = self.call(OP, |c| {
            c.sign_blob(key_region, data_region, sig_region)
        })?;
        check_size(OP, SIGNATURE_LENGTH, written)?;

        let signature: [u8; SIGNATURE_LENGTH] =
            self.read_array(OP, DevBuff::B2)?;
        debug!("manifest signature:\n{}", HexDump(&signature));
        self.record("SB3_sign.bin", &signature, Some("to_merge"));
        Ok(signature)
    }

    fn call<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut C) -> Result<T, ChannelError>,
    ) -> Result<T, ProvisioningError> {
        f(self.channel)
            .map_err(|source| ProvisioningError::Channel { op, source })
    }

    fn write(
        &mut self,
        op: &'static str,
        slot: DevBuff,
        data: &[u8],
    ) -> Result<Region, ProvisioningError> {
        let region = self.buffers.region(slot, data.len())?;
        self.call(op, |c| c.write_memory(region.address, data))?;
        Ok(region)
    }

    fn read(
        &mut self,
        op: &'static str,
        slot: DevBuff,
        len: usize,
    ) -> Result<Vec<u8>, ProvisioningError> {
        let region = self.buffers.region(slot, len)?;
        let data =
            self.call(op, |c| c.read_memory(region.address, region.len))?;
        if data.len() != len {
            return Err(ProvisioningError::Channel {
                op,
                source: ChannelError::UnexpectedSize {
                    op,
                    expected: len,
                    actual: data.len(),
                },
            });
        }
        Ok(data)
    }

    fn read_secret(
        &mut self,
        op: &'static str,
        slot: DevBuff,
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, ProvisioningError> {
        self.read(op, slot, len).map(Zeroizing::new)
    }

    fn read_array<const N: usize>(
        &mut self,
        op: &'static str,
        slot: DevBuff,
    ) -> Result<[u8; N], ProvisioningError> {
        let data = self.read(op, slot, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&data);
        Ok(out)
    }

    fn record(&mut self, name: &str, data: &[u8], category: Option<&str>) {
        if let Some(sink) = self.sink.as_deref_mut() {
            if let Err(e) = sink.store(name, data, category) {
                warn!("could not record {name}: {e}");
            }
        }
    }
}

fn check_size(
    op: &'static str,
    expected: usize,
    actual: u32,
) -> Result<(), ProvisioningError> {
    if actual as usize != expected {
        return Err(ProvisioningError::Channel {
            op,
            source: ChannelError::UnexpectedSize {
                op,
                expected,
                actual: actual as usize,
            },
        });
    }
    Ok(())
}

/// Runs the whole provisioning flow with the default buffer map, no
/// forensic recording and no progress reporting.
pub fn run<C: DeviceChannel + ?Sized>(
    channel: &mut C,
    pck: &PreSharedKey,
    seed: &ShareSeed,
    config: Option<&ContainerConfig>,
) -> Result<FinalImage, ProvisioningError> {
    let default = ContainerConfig::default();
    DeviceHsm::new(channel).run(
        pck,
        seed,
        config.unwrap_or(&default),
        &mut NoProgress,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_strictly_increasing() {
        let mut c = BlockCounter::new();
        assert_eq!(c.claim(1).unwrap(), 1);
        assert_eq!(c.claim(2).unwrap(), 2);
        assert!(matches!(
            c.claim(2),
            Err(StateError::CounterReused { got: 2, next: 3 })
        ));
        assert!(matches!(
            c.claim(5),
            Err(StateError::CounterReused { got: 5, next: 3 })
        ));
    }

    #[test]
    fn size_mismatch_is_a_channel_error() {
        let e = check_size("hsm_store_key", 48, 47).unwrap_err();
        assert!(matches!(
            e,
            ProvisioningError::Channel {
                op: "hsm_store_key",
                source: ChannelError::UnexpectedSize {
                    expected: 48,
                    actual: 47,
                    ..
                }
            }
        ));
        assert!(e.needs_device_reset());
        assert!(check_size("hsm_store_key", 48, 48).is_ok());
    }
}
