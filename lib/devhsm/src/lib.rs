// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device HSM provisioning.
//!
//! Produces an SB3.1 provisioning image whose keys never leave the
//! device: the on-chip HSM generates the firmware keys, wraps the OEM's
//! pre-shared key, encrypts every command block and signs the manifest.
//! The host only moves bytes through a handful of scratch buffers in device
//! RAM and assembles the container.
//!
//! The flow is one-shot. If anything fails the device has to be reset
//! before trying again; see [`ProvisioningError::needs_device_reset`].

mod buffers;
mod channel;
mod config;
mod error;
mod forensic;
mod hsm;
mod progress;
mod validate;

pub use crate::buffers::{BufferMap, DevBuff};
pub use crate::channel::{DeviceChannel, OemKeyType, Region, StoreKeyType};
pub use crate::config::{
    CommandConfig, ContainerConfig, IntValue, Words, DEFAULT_DESCRIPTION,
};
pub use crate::error::{
    ChannelError, ConfigError, ProvisioningError, StateError,
};
pub use crate::forensic::{ForensicSink, WorkspaceSink};
pub use crate::hsm::{
    run, DeviceHsm, BLOCK_KEK_ID, CERT_PUBLIC_KEY_LENGTH,
    ENC_MASTER_SHARE_LENGTH, KEY_BLOB_LENGTH, WRAPPED_PCK_LENGTH,
};
pub use crate::progress::{NoProgress, ProgressSink, Stage};
pub use crate::validate::{
    validate_command_config, validate_or_generate_seed,
    validate_pre_shared_key, PreSharedKey, ShareSeed, PCK_LENGTH,
    RESERVED_KEY_BLOB_OFFSET, SEED_LENGTH,
};

pub use sb31;
