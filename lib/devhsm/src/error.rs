// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

use crate::buffers::DevBuff;

/// Failure of a single device round trip.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("device rejected the command (status {status}: {description})")]
    Rejected { status: u32, description: String },
    #[error("device did not answer in time")]
    Timeout,
    #[error("{op} produced {actual} bytes, expected {expected}")]
    UnexpectedSize {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("malformed response from transport: {0}")]
    Malformed(String),
    #[error("transport I/O error")]
    Io(#[from] std::io::Error),
}

/// Internal protocol invariant violations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Image(#[from] sb31::Error),
    #[error("{len} bytes do not fit device buffer {slot:?} ({capacity} bytes)")]
    BufferOverflow {
        slot: DevBuff,
        len: usize,
        capacity: u32,
    },
    #[error("device buffer {slot:?} lies outside the address space")]
    BufferAddress { slot: DevBuff },
    #[error("encryption counter {got} reused (next is {next})")]
    CounterReused { got: u32, next: u32 },
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("{what} is {actual} bytes long, expected {expected}")]
    InputLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error(
        "configuration contains a loadKeyBlob command at reserved offset \
         {offset:#04x}"
    )]
    ConfigConflict { offset: u16 },
    #[error("{op} failed")]
    Channel {
        op: &'static str,
        #[source]
        source: ChannelError,
    },
    #[error("protocol state violated")]
    ProtocolState(#[from] StateError),
    #[error("no entropy available for the OEM share seed")]
    EntropyUnavailable(#[source] getrandom::Error),
}

impl ProvisioningError {
    /// Whether the device may have been touched before the failure. Steps
    /// 1 and 4 cannot be repeated without a device reset.
    pub fn needs_device_reset(&self) -> bool {
        matches!(
            self,
            ProvisioningError::Channel { .. }
                | ProvisioningError::ProtocolState(_)
        )
    }
}

impl From<sb31::Error> for ProvisioningError {
    fn from(e: sb31::Error) -> Self {
        ProvisioningError::ProtocolState(StateError::Image(e))
    }
}

/// Errors while loading a container configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON")]
    Json(#[from] serde_json::Error),
    #[error("{field}: {value:?} is not a valid {expected}")]
    Value {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("a load command needs exactly one of `file` and `values`")]
    LoadSource,
}
