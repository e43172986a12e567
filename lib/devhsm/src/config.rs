// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Container configuration: header fields and extra commands for the
//! provisioning image.
//!
//! The file may be TOML or JSON. Only the keys below are read, so a full
//! SB3 configuration can be reused as is:
//!
//! ```toml
//! firmwareVersion = 3
//! description = "factory"
//! timestamp = "0x6553f100"
//!
//! [[commands]]
//! erase = { address = "0x10000", size = "0x4000" }
//!
//! [[commands]]
//! load = { address = "0x10000", file = "fw.bin" }
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use sb31::{Command, FwCounter, KeyWrap};

use crate::error::ConfigError;

pub const DEFAULT_DESCRIPTION: &str = "SB3 SB_KEK";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerConfig {
    pub firmware_version: u32,
    pub description: String,
    /// `None` takes the wall clock when the header is built.
    pub timestamp: Option<u64>,
    /// Extra commands, placed after the PCK key blob.
    pub commands: Vec<Command>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            firmware_version: 0,
            description: DEFAULT_DESCRIPTION.to_string(),
            timestamp: None,
            commands: Vec::new(),
        }
    }
}

impl ContainerConfig {
    /// Loads a configuration file; `.json` files are parsed as JSON and
    /// everything else as TOML. Data files are looked up relative to the
    /// configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Read {
                path: path.to_owned(),
                source,
            }
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let is_json = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&text, base)
        } else {
            Self::from_toml(&text, base)
        }
    }

    pub fn from_toml(text: &str, base: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        raw.resolve(base)
    }

    pub fn from_json(text: &str, base: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)?;
        raw.resolve(base)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    firmware_version: Option<IntValue>,
    description: Option<String>,
    timestamp: Option<IntValue>,
    #[serde(default)]
    commands: Vec<CommandConfig>,
}

impl RawConfig {
    fn resolve(self, base: &Path) -> Result<ContainerConfig, ConfigError> {
        let defaults = ContainerConfig::default();
        Ok(ContainerConfig {
            firmware_version: match self.firmware_version {
                Some(v) => v.to_u32("firmwareVersion")?,
                None => defaults.firmware_version,
            },
            description: self
                .description
                .filter(|d| !d.is_empty())
                .unwrap_or(defaults.description),
            timestamp: self
                .timestamp
                .map(|t| t.to_u64("timestamp"))
                .transpose()?,
            commands: self
                .commands
                .into_iter()
                .map(|c| c.into_command(base))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// An integer written either as a number or as a string in decimal, `0x`
/// hex or `0b` binary notation.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum IntValue {
    Number(u64),
    Text(String),
}

impl IntValue {
    fn to_u64(&self, field: &'static str) -> Result<u64, ConfigError> {
        let bad = |value: &str| ConfigError::Value {
            field,
            value: value.to_string(),
            expected: "integer",
        };
        match self {
            IntValue::Number(n) => Ok(*n),
            IntValue::Text(s) => parse_int(s).ok_or_else(|| bad(s)),
        }
    }

    fn to_u32(&self, field: &'static str) -> Result<u32, ConfigError> {
        let v = self.to_u64(field)?;
        u32::try_from(v).map_err(|_| ConfigError::Value {
            field,
            value: v.to_string(),
            expected: "32-bit integer",
        })
    }
}

fn parse_int(s: &str) -> Option<u64> {
    let s = s.trim().replace('_', "");
    let lower = s.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).ok()
    } else {
        lower.parse().ok()
    }
}

/// A list of 32-bit words: `"0x1, 0x2"`, a single number, or an array.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Words {
    Text(String),
    One(u64),
    List(Vec<IntValue>),
}

impl Words {
    fn to_vec(&self, field: &'static str) -> Result<Vec<u32>, ConfigError> {
        match self {
            Words::Text(s) => s
                .split(',')
                .map(|w| IntValue::Text(w.to_string()).to_u32(field))
                .collect(),
            Words::One(n) => Ok(vec![IntValue::Number(*n).to_u32(field)?]),
            Words::List(l) => l.iter().map(|v| v.to_u32(field)).collect(),
        }
    }
}

/// The closed set of commands a configuration may add.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub enum CommandConfig {
    #[serde(rename_all = "camelCase")]
    Erase {
        address: IntValue,
        size: IntValue,
        memory_id: Option<IntValue>,
    },
    #[serde(rename_all = "camelCase")]
    Load {
        address: IntValue,
        memory_id: Option<IntValue>,
        file: Option<PathBuf>,
        values: Option<Words>,
    },
    Execute {
        address: IntValue,
    },
    Call {
        address: IntValue,
    },
    ProgramFuses {
        address: IntValue,
        values: Words,
    },
    #[serde(rename = "programIFR")]
    ProgramIfr {
        address: IntValue,
        file: PathBuf,
    },
    #[serde(rename_all = "camelCase")]
    LoadKeyBlob {
        offset: IntValue,
        wrapping_key_id: IntValue,
        file: PathBuf,
    },
    FillMemory {
        address: IntValue,
        size: IntValue,
        pattern: IntValue,
    },
    #[serde(rename_all = "camelCase")]
    ConfigureMemory {
        address: IntValue,
        memory_id: IntValue,
    },
    #[serde(rename_all = "camelCase")]
    Copy {
        address_from: IntValue,
        size: IntValue,
        address_to: IntValue,
        memory_id_from: Option<IntValue>,
        memory_id_to: Option<IntValue>,
    },
    #[serde(rename_all = "camelCase")]
    CheckFwVersion {
        value: IntValue,
        counter_id: IntValue,
    },
}

fn read_data(base: &Path, file: &Path) -> Result<Vec<u8>, ConfigError> {
    let path = base.join(file);
    std::fs::read(&path).map_err(|source| ConfigError::Read { path, source })
}

fn opt_u32(
    v: &Option<IntValue>,
    field: &'static str,
) -> Result<u32, ConfigError> {
    v.as_ref().map_or(Ok(0), |v| v.to_u32(field))
}

fn key_wrap(v: &IntValue) -> Result<KeyWrap, ConfigError> {
    let bad = || ConfigError::Value {
        field: "wrappingKeyId",
        value: format!("{v:?}"),
        expected: "key wrap id",
    };
    match v {
        IntValue::Text(s) if s.eq_ignore_ascii_case("NXP_CUST_KEK_INT_SK") => {
            Ok(KeyWrap::Internal)
        }
        IntValue::Text(s) if s.eq_ignore_ascii_case("NXP_CUST_KEK_EXT_SK") => {
            Ok(KeyWrap::External)
        }
        _ => KeyWrap::try_from(v.to_u32("wrappingKeyId")?).map_err(|_| bad()),
    }
}

fn fw_counter(v: &IntValue) -> Result<FwCounter, ConfigError> {
    let by_name = match v {
        IntValue::Text(s) => match s.to_ascii_lowercase().as_str() {
            "nonsecure" => Some(FwCounter::NonSecure),
            "secure" => Some(FwCounter::Secure),
            "radio" => Some(FwCounter::Radio),
            "snt" => Some(FwCounter::Snt),
            "bootloader" => Some(FwCounter::Bootloader),
            _ => None,
        },
        IntValue::Number(_) => None,
    };
    if let Some(c) = by_name {
        return Ok(c);
    }
    FwCounter::try_from(v.to_u32("counterId")?).map_err(|id| {
        ConfigError::Value {
            field: "counterId",
            value: id.to_string(),
            expected: "firmware counter id",
        }
    })
}

impl CommandConfig {
    pub fn into_command(self, base: &Path) -> Result<Command, ConfigError> {
        Ok(match self {
            CommandConfig::Erase {
                address,
                size,
                memory_id,
            } => Command::Erase {
                address: address.to_u32("address")?,
                length: size.to_u32("size")?,
                memory_id: opt_u32(&memory_id, "memoryId")?,
            },
            CommandConfig::Load {
                address,
                memory_id,
                file,
                values,
            } => {
                let data = match (file, values) {
                    (Some(f), None) => read_data(base, &f)?,
                    (None, Some(v)) => v
                        .to_vec("values")?
                        .iter()
                        .flat_map(|w| w.to_le_bytes())
                        .collect(),
                    _ => return Err(ConfigError::LoadSource),
                };
                Command::Load {
                    address: address.to_u32("address")?,
                    memory_id: opt_u32(&memory_id, "memoryId")?,
                    data,
                }
            }
            CommandConfig::Execute { address } => Command::Execute {
                address: address.to_u32("address")?,
            },
            CommandConfig::Call { address } => Command::Call {
                address: address.to_u32("address")?,
            },
            CommandConfig::ProgramFuses { address, values } => {
                Command::ProgramFuses {
                    address: address.to_u32("address")?,
                    words: values.to_vec("values")?,
                }
            }
            CommandConfig::ProgramIfr { address, file } => {
                Command::ProgramIfr {
                    address: address.to_u32("address")?,
                    data: read_data(base, &file)?,
                }
            }
            CommandConfig::LoadKeyBlob {
                offset,
                wrapping_key_id,
                file,
            } => {
                let offset = offset.to_u64("offset")?;
                Command::LoadKeyBlob {
                    offset: u16::try_from(offset).map_err(|_| {
                        ConfigError::Value {
                            field: "offset",
                            value: offset.to_string(),
                            expected: "16-bit integer",
                        }
                    })?,
                    key_wrap: key_wrap(&wrapping_key_id)?,
                    data: Zeroizing::new(read_data(base, &file)?),
                }
            }
            CommandConfig::FillMemory {
                address,
                size,
                pattern,
            } => Command::FillMemory {
                address: address.to_u32("address")?,
                length: size.to_u32("size")?,
                pattern: pattern.to_u32("pattern")?,
            },
            CommandConfig::ConfigureMemory { address, memory_id } => {
                Command::ConfigureMemory {
                    address: address.to_u32("address")?,
                    memory_id: memory_id.to_u32("memoryId")?,
                }
            }
            CommandConfig::Copy {
                address_from,
                size,
                address_to,
                memory_id_from,
                memory_id_to,
            } => Command::Copy {
                address_from: address_from.to_u32("addressFrom")?,
                length: size.to_u32("size")?,
                address_to: address_to.to_u32("addressTo")?,
                memory_id_from: opt_u32(&memory_id_from, "memoryIdFrom")?,
                memory_id_to: opt_u32(&memory_id_to, "memoryIdTo")?,
            },
            CommandConfig::CheckFwVersion { value, counter_id } => {
                Command::CheckFwVersion {
                    value: value.to_u32("value")?,
                    counter: fw_counter(&counter_id)?,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn defaults() {
        let cfg = ContainerConfig::from_toml("", Path::new(".")).unwrap();
        assert_eq!(cfg, ContainerConfig::default());
        assert_eq!(cfg.description, "SB3 SB_KEK");
        assert_eq!(cfg.timestamp, None);
    }

    #[test]
    fn empty_description_falls_back() {
        let cfg =
            ContainerConfig::from_toml("description = ''", Path::new("."))
                .unwrap();
        assert_eq!(cfg.description, DEFAULT_DESCRIPTION);
        let cfg =
            ContainerConfig::from_json(r#"{"description": ""}"#, Path::new("."))
                .unwrap();
        assert_eq!(cfg.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn toml_header_fields() {
        let cfg = ContainerConfig::from_toml(
            indoc! {r#"
                firmwareVersion = 3
                description = "factory"
                timestamp = "0x6553f100"
                family = "lpc55s3x"
            "#},
            Path::new("."),
        )
        .unwrap();
        assert_eq!(cfg.firmware_version, 3);
        assert_eq!(cfg.description, "factory");
        assert_eq!(cfg.timestamp, Some(1_700_000_000));
        assert!(cfg.commands.is_empty());
    }

    #[test]
    fn toml_commands() {
        let cfg = ContainerConfig::from_toml(
            indoc! {r#"
                [[commands]]
                erase = { address = "0x10000", size = "0x4000" }

                [[commands]]
                load = { address = 0x2000, memoryId = 9, values = "0x1, 0x2" }

                [[commands]]
                programFuses = { address = "0x10", values = "0xdeadbeef" }

                [[commands]]
                copy = { addressFrom = 0, size = 16, addressTo = "0x100" }

                [[commands]]
                checkFwVersion = { value = 2, counterId = "secure" }

                [[commands]]
                execute = { address = "0b100" }
            "#},
            Path::new("."),
        )
        .unwrap();
        assert_eq!(
            cfg.commands,
            [
                Command::Erase {
                    address: 0x10000,
                    length: 0x4000,
                    memory_id: 0
                },
                Command::Load {
                    address: 0x2000,
                    memory_id: 9,
                    data: vec![1, 0, 0, 0, 2, 0, 0, 0]
                },
                Command::ProgramFuses {
                    address: 0x10,
                    words: vec![0xdead_beef]
                },
                Command::Copy {
                    address_from: 0,
                    length: 16,
                    address_to: 0x100,
                    memory_id_from: 0,
                    memory_id_to: 0
                },
                Command::CheckFwVersion {
                    value: 2,
                    counter: FwCounter::Secure
                },
                Command::Execute { address: 4 },
            ]
        );
    }

    #[test]
    fn json_with_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0x42; 48]).unwrap();
        std::fs::write(dir.path().join("ifr.bin"), [1, 2, 3]).unwrap();
        let path = dir.path().join("sb3.json");
        std::fs::write(
            &path,
            indoc! {r#"
                {
                    "firmwareVersion": "0x10",
                    "commands": [
                        {"loadKeyBlob": {"offset": "0x08",
                                         "wrappingKeyId": "NXP_CUST_KEK_INT_SK",
                                         "file": "blob.bin"}},
                        {"programIFR": {"address": "0x1000", "file": "ifr.bin"}}
                    ]
                }
            "#},
        )
        .unwrap();

        let cfg = ContainerConfig::load(&path).unwrap();
        assert_eq!(cfg.firmware_version, 16);
        assert_eq!(
            cfg.commands,
            [
                Command::LoadKeyBlob {
                    offset: 8,
                    key_wrap: KeyWrap::Internal,
                    data: Zeroizing::new(vec![0x42; 48])
                },
                Command::ProgramIfr {
                    address: 0x1000,
                    data: vec![1, 2, 3]
                },
            ]
        );
    }

    #[test]
    fn unknown_command() {
        let r = ContainerConfig::from_toml(
            indoc! {r#"
                [[commands]]
                reset = { address = 0 }
            "#},
            Path::new("."),
        );
        assert!(matches!(r, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_field() {
        let r = ContainerConfig::from_json(
            r#"{"commands": [{"call": {"address": 0, "flags": 1}}]}"#,
            Path::new("."),
        );
        assert!(matches!(r, Err(ConfigError::Json(_))));
    }

    #[test]
    fn bad_values() {
        let r = ContainerConfig::from_toml(
            r#"firmwareVersion = "0x1_0000_0000""#,
            Path::new("."),
        );
        assert!(matches!(
            r,
            Err(ConfigError::Value {
                field: "firmwareVersion",
                ..
            })
        ));

        let r = ContainerConfig::from_toml(
            indoc! {r#"
                [[commands]]
                load = { address = 0 }
            "#},
            Path::new("."),
        );
        assert!(matches!(r, Err(ConfigError::LoadSource)));
    }

    #[test]
    fn missing_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let r = ContainerConfig::from_toml(
            indoc! {r#"
                [[commands]]
                programIFR = { address = 0, file = "nope.bin" }
            "#},
            dir.path(),
        );
        match r {
            Err(ConfigError::Read { path, .. }) => {
                assert_eq!(path, dir.path().join("nope.bin"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn int_notation() {
        assert_eq!(parse_int("0x10"), Some(16));
        assert_eq!(parse_int("0B101"), Some(5));
        assert_eq!(parse_int(" 1_000 "), Some(1000));
        assert_eq!(parse_int("ten"), None);
    }
}
