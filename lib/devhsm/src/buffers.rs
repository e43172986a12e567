// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scratch buffers in device RAM used to pass data to and from the HSM.

use crate::channel::Region;
use crate::error::StateError;

/// One of the four scratch slots. Contents are not preserved between
/// protocol steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevBuff {
    B0,
    B1,
    B2,
    B3,
}

impl DevBuff {
    fn index(self) -> u32 {
        match self {
            DevBuff::B0 => 0,
            DevBuff::B1 => 1,
            DevBuff::B2 => 2,
            DevBuff::B3 => 3,
        }
    }
}

/// Maps scratch slots to device addresses for one device family. Slots are
/// laid out back to back starting at `base`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferMap {
    pub base: u32,
    pub slot_size: u32,
}

impl BufferMap {
    /// LPC55S3x: the HSM scratch area at the start of SRAM bank 1.
    pub const LPC55S3X: Self = Self {
        base: 0x2000_8000,
        slot_size: 0x100,
    };

    /// Start address of `slot`, refusing maps whose slots would run past
    /// the end of the address space.
    pub fn address(&self, slot: DevBuff) -> Result<u32, StateError> {
        slot.index()
            .checked_mul(self.slot_size)
            .and_then(|offset| self.base.checked_add(offset))
            .filter(|a| a.checked_add(self.slot_size).is_some())
            .ok_or(StateError::BufferAddress { slot })
    }

    /// The whole slot, for outputs of unknown size.
    pub fn slot(&self, slot: DevBuff) -> Result<Region, StateError> {
        Ok(Region {
            address: self.address(slot)?,
            len: self.slot_size,
        })
    }

    /// The first `len` bytes of `slot`, refusing anything that would spill
    /// into the next slot.
    pub fn region(
        &self,
        slot: DevBuff,
        len: usize,
    ) -> Result<Region, StateError> {
        match u32::try_from(len) {
            Ok(l) if l <= self.slot_size => Ok(Region {
                address: self.address(slot)?,
                len: l,
            }),
            _ => Err(StateError::BufferOverflow {
                slot,
                len,
                capacity: self.slot_size,
            }),
        }
    }
}

impl Default for BufferMap {
    fn default() -> Self {
        Self::LPC55S3X
    }
}
