// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// Provisioning milestones, reported as each one starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    MasterShare,
    SigningKey,
    EncryptionKey,
    WrapPck,
    AssembleSection,
    EncryptBlocks { count: u32 },
    Finalize,
    SignManifest,
    Compose,
}

impl Stage {
    pub fn number(&self) -> u8 {
        match self {
            Stage::MasterShare => 1,
            Stage::SigningKey => 2,
            Stage::EncryptionKey => 3,
            Stage::WrapPck => 4,
            Stage::AssembleSection => 5,
            Stage::EncryptBlocks { .. } => 6,
            Stage::Finalize => 7,
            Stage::SignManifest => 8,
            Stage::Compose => 9,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:2}: ", self.number())?;
        match self {
            Stage::MasterShare => write!(f, "Generating OEM master share."),
            Stage::SigningKey => {
                write!(f, "Generating 48 bytes FW signing keys.")
            }
            Stage::EncryptionKey => {
                write!(f, "Generating 48 bytes FW encryption keys.")
            }
            Stage::WrapPck => write!(f, "Wrapping user PCK key."),
            Stage::AssembleSection => write!(
                f,
                "Creating template un-encrypted SB3 header and data blobs."
            ),
            Stage::EncryptBlocks { count } => {
                write!(f, "Encrypting SB3 data on device ({count} blocks).")
            }
            Stage::Finalize => {
                write!(f, "Creating certificate block and final header.")
            }
            Stage::SignManifest => {
                write!(f, "Creating SB3 manifest signature on device.")
            }
            Stage::Compose => write!(f, "Composing final SB3 file."),
        }
    }
}

/// Consumer of [`Stage`] events.
pub trait ProgressSink {
    fn stage(&mut self, stage: Stage);
}

impl<F: FnMut(Stage)> ProgressSink for F {
    fn stage(&mut self, stage: Stage) {
        self(stage)
    }
}

/// Discards every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn stage(&mut self, _stage: Stage) {}
}
