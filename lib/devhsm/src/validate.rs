// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;
use sb31::Command;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ProvisioningError;

pub const PCK_LENGTH: usize = 32;
pub const SEED_LENGTH: usize = 16;

/// Key blob offset occupied by the wrapped PCK.
pub const RESERVED_KEY_BLOB_OFFSET: u16 = 0x04;

/// The 256-bit part common key supplied by the OEM.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PreSharedKey([u8; PCK_LENGTH]);

impl PreSharedKey {
    pub fn as_bytes(&self) -> &[u8; PCK_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreSharedKey(..)")
    }
}

/// Seed randomizing the OEM master share generation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ShareSeed([u8; SEED_LENGTH]);

impl ShareSeed {
    pub fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for ShareSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShareSeed(..)")
    }
}

pub fn validate_pre_shared_key(
    bytes: &[u8],
) -> Result<PreSharedKey, ProvisioningError> {
    let key = bytes.try_into().map_err(|_| ProvisioningError::InputLength {
        what: "pre-shared key",
        expected: PCK_LENGTH,
        actual: bytes.len(),
    })?;
    Ok(PreSharedKey(key))
}

/// Checks a caller supplied seed, or draws a fresh one from the OS RNG.
pub fn validate_or_generate_seed(
    bytes: Option<&[u8]>,
) -> Result<ShareSeed, ProvisioningError> {
    match bytes {
        Some(b) => {
            let seed =
                b.try_into().map_err(|_| ProvisioningError::InputLength {
                    what: "OEM share seed",
                    expected: SEED_LENGTH,
                    actual: b.len(),
                })?;
            Ok(ShareSeed(seed))
        }
        None => {
            let mut seed = ShareSeed([0; SEED_LENGTH]);
            getrandom::getrandom(&mut seed.0)
                .map_err(ProvisioningError::EntropyUnavailable)?;
            Ok(seed)
        }
    }
}

/// Rejects user commands that would clash with the injected PCK key blob.
pub fn validate_command_config(
    commands: &[Command],
) -> Result<(), ProvisioningError> {
    for c in commands {
        if let Command::LoadKeyBlob { offset, .. } = c {
            if *offset == RESERVED_KEY_BLOB_OFFSET {
                return Err(ProvisioningError::ConfigConflict {
                    offset: *offset,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sb31::KeyWrap;
    use zeroize::Zeroizing;

    proptest! {
        #[test]
        fn pck_length(bytes in proptest::collection::vec(any::<u8>(), 0..80)) {
            let r = validate_pre_shared_key(&bytes);
            if bytes.len() == PCK_LENGTH {
                let valid = r.unwrap();
                prop_assert_eq!(&valid.as_bytes()[..], &bytes[..]);
            } else {
                let is_length_error = matches!(
                    r,
                    Err(ProvisioningError::InputLength { expected: 32, .. })
                );
                prop_assert!(is_length_error);
            }
        }

        #[test]
        fn seed_length(bytes in proptest::collection::vec(any::<u8>(), 0..40)) {
            let r = validate_or_generate_seed(Some(&bytes));
            if bytes.len() == SEED_LENGTH {
                let valid = r.unwrap();
                prop_assert_eq!(&valid.as_bytes()[..], &bytes[..]);
            } else {
                let is_length_error = matches!(
                    r,
                    Err(ProvisioningError::InputLength { expected: 16, .. })
                );
                prop_assert!(is_length_error);
            }
        }
    }

    #[test]
    fn generated_seeds() {
        let seeds: Vec<_> = (0..8)
            .map(|_| *validate_or_generate_seed(None).unwrap().as_bytes())
            .collect();
        assert!(seeds.iter().all(|s| s != &[0u8; SEED_LENGTH]));
        assert!(seeds.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn secrets_not_printed() {
        let key = validate_pre_shared_key(&[0xab; 32]).unwrap();
        assert_eq!(format!("{key:?}"), "PreSharedKey(..)");
    }

    #[test]
    fn reserved_offset() {
        let blob = |offset| Command::LoadKeyBlob {
            offset,
            key_wrap: KeyWrap::Internal,
            data: Zeroizing::new(vec![0; 48]),
        };
        assert!(validate_command_config(&[]).is_ok());
        assert!(validate_command_config(&[blob(0x08)]).is_ok());
        assert!(matches!(
            validate_command_config(&[
                Command::Execute { address: 0 },
                blob(0x04)
            ]),
            Err(ProvisioningError::ConfigConflict { offset: 0x04 })
        ));
    }
}
