// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;
use zeroize::Zeroizing;

use crate::{pad_to, wire_u32, Error};

/// Marks the start of every command on the wire.
pub const COMMAND_TAG: u32 = 0x55AA_AA55;

const BASE_LEN: usize = 16;
const ALIGN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandTag {
    Erase = 1,
    Load = 2,
    Execute = 3,
    Call = 4,
    ProgramFuses = 5,
    ProgramIfr = 6,
    Copy = 8,
    LoadKeyBlob = 10,
    ConfigureMemory = 11,
    FillMemory = 12,
    CheckFwVersion = 13,
}

/// Key used by the ROM to unwrap a key blob loaded with
/// [`Command::LoadKeyBlob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum KeyWrap {
    /// `NXP_CUST_KEK_INT_SK`
    Internal = 16,
    /// `NXP_CUST_KEK_EXT_SK`
    External = 17,
}

impl TryFrom<u32> for KeyWrap {
    type Error = u32;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            16 => Ok(KeyWrap::Internal),
            17 => Ok(KeyWrap::External),
            _ => Err(v),
        }
    }
}

/// Monotonic counter checked by [`Command::CheckFwVersion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FwCounter {
    NonSecure = 1,
    Secure = 2,
    Radio = 3,
    Snt = 4,
    Bootloader = 5,
}

impl TryFrom<u32> for FwCounter {
    type Error = u32;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(FwCounter::NonSecure),
            2 => Ok(FwCounter::Secure),
            3 => Ok(FwCounter::Radio),
            4 => Ok(FwCounter::Snt),
            5 => Ok(FwCounter::Bootloader),
            _ => Err(v),
        }
    }
}

/// One entry of the command section, executed in order by the boot ROM.
///
/// `Debug` is implemented by hand: key blob payloads are never printed.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    Erase {
        address: u32,
        length: u32,
        memory_id: u32,
    },
    Load {
        address: u32,
        memory_id: u32,
        data: Vec<u8>,
    },
    Execute {
        address: u32,
    },
    Call {
        address: u32,
    },
    ProgramFuses {
        address: u32,
        words: Vec<u32>,
    },
    ProgramIfr {
        address: u32,
        data: Vec<u8>,
    },
    Copy {
        address_from: u32,
        length: u32,
        address_to: u32,
        memory_id_from: u32,
        memory_id_to: u32,
    },
    LoadKeyBlob {
        offset: u16,
        key_wrap: KeyWrap,
        data: Zeroizing<Vec<u8>>,
    },
    ConfigureMemory {
        address: u32,
        memory_id: u32,
    },
    FillMemory {
        address: u32,
        length: u32,
        pattern: u32,
    },
    CheckFwVersion {
        value: u32,
        counter: FwCounter,
    },
}

impl Command {
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::Erase { .. } => CommandTag::Erase,
            Command::Load { .. } => CommandTag::Load,
            Command::Execute { .. } => CommandTag::Execute,
            Command::Call { .. } => CommandTag::Call,
            Command::ProgramFuses { .. } => CommandTag::ProgramFuses,
            Command::ProgramIfr { .. } => CommandTag::ProgramIfr,
            Command::Copy { .. } => CommandTag::Copy,
            Command::LoadKeyBlob { .. } => CommandTag::LoadKeyBlob,
            Command::ConfigureMemory { .. } => CommandTag::ConfigureMemory,
            Command::FillMemory { .. } => CommandTag::FillMemory,
            Command::CheckFwVersion { .. } => CommandTag::CheckFwVersion,
        }
    }

    /// Serialized size, including padding.
    pub fn size(&self) -> usize {
        let padded = |n: usize| (BASE_LEN + n).next_multiple_of(ALIGN);
        match self {
            Command::Erase { .. }
            | Command::FillMemory { .. }
            | Command::Copy { .. } => BASE_LEN + 16,
            Command::Load { data, .. } => padded(16 + data.len()),
            Command::Execute { .. }
            | Command::Call { .. }
            | Command::ConfigureMemory { .. }
            | Command::CheckFwVersion { .. } => BASE_LEN,
            Command::ProgramFuses { words, .. } => padded(4 * words.len()),
            Command::ProgramIfr { data, .. } => padded(data.len()),
            Command::LoadKeyBlob { data, .. } => padded(data.len()),
        }
    }

    /// Wire encoding. The buffer is scrubbed on drop since key blobs end up
    /// in it.
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.size()));
        let tag = self.tag() as u32;

        match self {
            Command::Erase {
                address,
                length,
                memory_id,
            } => {
                put(&mut out, &[COMMAND_TAG, *address, *length, tag]);
                put(&mut out, &[*memory_id, 0, 0, 0]);
            }
            Command::FillMemory {
                address,
                length,
                pattern,
            } => {
                put(&mut out, &[COMMAND_TAG, *address, *length, tag]);
                put(&mut out, &[*pattern, 0, 0, 0]);
            }
            Command::Load {
                address,
                memory_id,
                data,
            } => {
                let len = wire_u32("load length", data.len())?;
                put(&mut out, &[COMMAND_TAG, *address, len, tag]);
                put(&mut out, &[*memory_id, 0, 0, 0]);
                out.extend_from_slice(data);
            }
            Command::Execute { address } | Command::Call { address } => {
                put(&mut out, &[COMMAND_TAG, *address, 0, tag]);
            }
            Command::ProgramFuses { address, words } => {
                let count = wire_u32("fuse word count", words.len())?;
                put(&mut out, &[COMMAND_TAG, *address, count, tag]);
                put(&mut out, words);
            }
            Command::ProgramIfr { address, data } => {
                let len = wire_u32("IFR length", data.len())?;
                put(&mut out, &[COMMAND_TAG, *address, len, tag]);
                out.extend_from_slice(data);
            }
            Command::Copy {
                address_from,
                length,
                address_to,
                memory_id_from,
                memory_id_to,
            } => {
                put(&mut out, &[COMMAND_TAG, *address_from, *length, tag]);
                put(
                    &mut out,
                    &[*address_to, *memory_id_from, *memory_id_to, 0],
                );
            }
            Command::ConfigureMemory { address, memory_id } => {
                // Same width as the base header, but the length slot
                // carries the memory id.
                put(&mut out, &[COMMAND_TAG, *address, *memory_id, tag]);
            }
            Command::CheckFwVersion { value, counter } => {
                put(&mut out, &[COMMAND_TAG, *value, *counter as u32, tag]);
            }
            Command::LoadKeyBlob {
                offset,
                key_wrap,
                data,
            } => {
                let len = wire_u32("key blob length", data.len())?;
                out.extend_from_slice(&COMMAND_TAG.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&(*key_wrap as u16).to_le_bytes());
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(data);
            }
        }

        pad_to(&mut out, ALIGN);
        Ok(out)
    }
}

fn put(out: &mut Vec<u8>, words: &[u32]) {
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Erase {
                address,
                length,
                memory_id,
            } => write!(
                f,
                "ERASE: address={address:#010x} length={length:#x} memory_id={memory_id}"
            ),
            Command::Load {
                address,
                memory_id,
                data,
            } => write!(
                f,
                "LOAD: address={address:#010x} length={:#x} memory_id={memory_id}",
                data.len()
            ),
            Command::Execute { address } => {
                write!(f, "EXECUTE: address={address:#010x}")
            }
            Command::Call { address } => {
                write!(f, "CALL: address={address:#010x}")
            }
            Command::ProgramFuses { address, words } => {
                write!(f, "PROGRAM FUSES: address={address:#x} values=[")?;
                for (i, w) in words.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{w:#010x}")?;
                }
                write!(f, "]")
            }
            Command::ProgramIfr { address, data } => write!(
                f,
                "PROGRAM IFR: address={address:#x} length={:#x}",
                data.len()
            ),
            Command::Copy {
                address_from,
                length,
                address_to,
                memory_id_from,
                memory_id_to,
            } => write!(
                f,
                "COPY: from={address_from:#010x} ({memory_id_from}) \
                 to={address_to:#010x} ({memory_id_to}) length={length:#x}"
            ),
            Command::LoadKeyBlob {
                offset,
                key_wrap,
                data,
            } => write!(
                f,
                "LOAD KEY BLOB: offset={offset:#06x} key_wrap={key_wrap:?} length={}",
                data.len()
            ),
            Command::ConfigureMemory { address, memory_id } => write!(
                f,
                "CONFIGURE MEMORY: address={address:#010x} memory_id={memory_id}"
            ),
            Command::FillMemory {
                address,
                length,
                pattern,
            } => write!(
                f,
                "FILL MEMORY: address={address:#010x} length={length:#x} pattern={pattern:#010x}"
            ),
            Command::CheckFwVersion { value, counter } => write!(
                f,
                "CHECK FW VERSION: value={value} counter={counter:?}"
            ),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn erase() {
        let cmd = Command::Erase {
            address: 0x1000,
            length: 0x2000,
            memory_id: 0x9,
        };
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(bytes.len(), cmd.size());
        assert_eq!(
            words(&bytes),
            [0x55AA_AA55, 0x1000, 0x2000, 1, 0x9, 0, 0, 0]
        );
    }

    #[test]
    fn load_is_padded() {
        let cmd = Command::Load {
            address: 0x2000_0000,
            memory_id: 0,
            data: vec![0xcc; 5],
        };
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(cmd.size(), 48);
        assert_eq!(
            words(&bytes[..32]),
            [0x55AA_AA55, 0x2000_0000, 5, 2, 0, 0, 0, 0]
        );
        assert_eq!(&bytes[32..37], &[0xcc; 5]);
        assert!(bytes[37..].iter().all(|&b| b == 0));
    }

    #[test]
    fn load_key_blob() {
        let cmd = Command::LoadKeyBlob {
            offset: 0x04,
            key_wrap: KeyWrap::External,
            data: Zeroizing::new(vec![0x11; 48]),
        };
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(bytes.len(), 64);
        assert_eq!(
            &bytes[..16],
            &[
                0x55, 0xaa, 0xaa, 0x55, 0x04, 0x00, 0x11, 0x00, 48, 0, 0, 0, 10,
                0, 0, 0
            ]
        );
        assert_eq!(&bytes[16..], &[0x11; 48]);
    }

    #[test]
    fn fixed_size_commands() {
        let cmds = [
            (Command::Execute { address: 0x100 }, [0x55AA_AA55, 0x100, 0, 3]),
            (Command::Call { address: 0x200 }, [0x55AA_AA55, 0x200, 0, 4]),
            (
                Command::ConfigureMemory {
                    address: 0x3000,
                    memory_id: 9,
                },
                [0x55AA_AA55, 0x3000, 9, 11],
            ),
            (
                Command::CheckFwVersion {
                    value: 42,
                    counter: FwCounter::Bootloader,
                },
                [0x55AA_AA55, 42, 5, 13],
            ),
        ];
        for (cmd, expected) in cmds {
            let bytes = cmd.to_bytes().unwrap();
            assert_eq!(cmd.size(), 16, "{cmd}");
            assert_eq!(words(&bytes), expected, "{cmd}");
        }
    }

    #[test]
    fn program_fuses_counts_words() {
        let cmd = Command::ProgramFuses {
            address: 0x10,
            words: vec![0xdead_beef, 0x1234_5678],
        };
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(
            words(&bytes),
            [0x55AA_AA55, 0x10, 2, 5, 0xdead_beef, 0x1234_5678, 0, 0]
        );
    }

    #[test]
    fn copy_and_fill() {
        let copy = Command::Copy {
            address_from: 0x1000,
            length: 0x40,
            address_to: 0x8000,
            memory_id_from: 0,
            memory_id_to: 9,
        };
        assert_eq!(
            words(&copy.to_bytes().unwrap()),
            [0x55AA_AA55, 0x1000, 0x40, 8, 0x8000, 0, 9, 0]
        );

        let fill = Command::FillMemory {
            address: 0x1000,
            length: 0x40,
            pattern: 0xa5a5_a5a5,
        };
        assert_eq!(
            words(&fill.to_bytes().unwrap()),
            [0x55AA_AA55, 0x1000, 0x40, 12, 0xa5a5_a5a5, 0, 0, 0]
        );
    }

    #[test]
    fn key_blob_not_printed() {
        let cmd = Command::LoadKeyBlob {
            offset: 0x04,
            key_wrap: KeyWrap::External,
            data: Zeroizing::new(vec![0x5a; 48]),
        };
        let text = format!("{cmd:?}");
        assert!(text.contains("length=48"));
        assert!(!text.contains("5a"));
    }

    #[test]
    fn enum_conversions() {
        assert_eq!(KeyWrap::try_from(16), Ok(KeyWrap::Internal));
        assert_eq!(KeyWrap::try_from(18), Err(18));
        assert_eq!(FwCounter::try_from(3), Ok(FwCounter::Radio));
        assert_eq!(FwCounter::try_from(0), Err(0));
    }
}
