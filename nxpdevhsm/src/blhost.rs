// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DeviceChannel`] on top of NXP's `blhost` tool, talking to the ROM
//! bootloader in ISP mode.

use std::ffi::OsString;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process::Command;

use devhsm::{ChannelError, DeviceChannel, OemKeyType, Region, StoreKeyType};
use log::{debug, trace};
use serde::Deserialize;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

/// ROM status code for a timed out operation.
const STATUS_TIMEOUT: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Serial port, optionally with `,baud`.
    Port(String),
    /// USB `VID,PID` or device path.
    Usb(String),
}

impl Transport {
    fn args(&self) -> [&str; 2] {
        match self {
            Transport::Port(p) => ["-p", p],
            Transport::Usb(u) => ["-u", u],
        }
    }
}

#[derive(Debug, Deserialize)]
struct Status {
    value: u32,
    #[serde(default)]
    description: String,
}

/// What `blhost -j` prints for every command.
#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    response: Vec<u64>,
    status: Status,
}

fn parse_response(stdout: &[u8]) -> Result<Vec<u64>, ChannelError> {
    let r: Response = serde_json::from_slice(stdout)
        .map_err(|e| ChannelError::Malformed(e.to_string()))?;
    match r.status.value {
        0 => Ok(r.response),
        STATUS_TIMEOUT => Err(ChannelError::Timeout),
        _ if r.status.description.to_lowercase().contains("timeout") => {
            Err(ChannelError::Timeout)
        }
        status => Err(ChannelError::Rejected {
            status,
            description: r.status.description,
        }),
    }
}

/// Picks `n` 32-bit values out of a response.
fn values<const N: usize>(response: &[u64]) -> Result<[u32; N], ChannelError> {
    let mut out = [0u32; N];
    if response.len() < N {
        return Err(ChannelError::Malformed(format!(
            "expected {N} response values, got {}",
            response.len()
        )));
    }
    for (o, v) in out.iter_mut().zip(response) {
        *o = u32::try_from(*v).map_err(|_| {
            ChannelError::Malformed(format!("response value {v:#x} too large"))
        })?;
    }
    Ok(out)
}

fn hex(v: u32) -> OsString {
    format!("{v:#x}").into()
}

fn dec(v: u32) -> OsString {
    v.to_string().into()
}

fn region(r: Region) -> [OsString; 2] {
    [hex(r.address), dec(r.len)]
}

pub struct BlhostChannel {
    blhost: PathBuf,
    transport: Transport,
    timeout_ms: u32,
}

impl BlhostChannel {
    pub fn new(blhost: PathBuf, transport: Transport, timeout_ms: u32) -> Self {
        Self {
            blhost,
            transport,
            timeout_ms,
        }
    }

    fn invoke(
        &self,
        command: &str,
        args: impl IntoIterator<Item = OsString>,
    ) -> Result<Vec<u64>, ChannelError> {
        let args: Vec<OsString> = args.into_iter().collect();
        trace!("blhost {command} {args:?}");
        let out = Command::new(&self.blhost)
            .args(self.transport.args())
            .arg("-j")
            .arg("-t")
            .arg(dec(self.timeout_ms))
            .arg("--")
            .arg(command)
            .args(&args)
            .output()?;
        let r = parse_response(&out.stdout);
        if r.is_err() && !out.stderr.is_empty() {
            debug!("blhost: {}", String::from_utf8_lossy(&out.stderr).trim());
        }
        r
    }

    fn trust_provisioning(
        &self,
        op: &str,
        args: impl IntoIterator<Item = OsString>,
    ) -> Result<Vec<u64>, ChannelError> {
        self.invoke(
            "trust-provisioning",
            std::iter::once(OsString::from(op)).chain(args),
        )
    }

    /// Checks that the bootloader answers at all.
    pub fn ping(&mut self) -> Result<(), ChannelError> {
        self.invoke("get-property", [dec(1)]).map(|_| ())
    }
}

impl DeviceChannel for BlhostChannel {
    fn write_memory(
        &mut self,
        address: u32,
        data: &[u8],
    ) -> Result<(), ChannelError> {
        // Keys pass through here; the file is private to us and overwritten
        // before it is removed.
        let mut file = NamedTempFile::new()?;
        file.write_all(data)?;
        file.flush()?;
        let r = self.invoke(
            "write-memory",
            [hex(address), file.path().as_os_str().to_owned()],
        );
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&vec![0u8; data.len()])?;
        file.flush()?;
        r.map(|_| ())
    }

    fn read_memory(
        &mut self,
        address: u32,
        len: u32,
    ) -> Result<Vec<u8>, ChannelError> {
        let mut file = NamedTempFile::new()?;
        self.invoke(
            "read-memory",
            [hex(address), dec(len), file.path().as_os_str().to_owned()],
        )?;
        let mut data = Zeroizing::new(Vec::new());
        file.read_to_end(&mut data)?;
        Ok(data.to_vec())
    }

    fn generate_master_share(
        &mut self,
        seed: Region,
        enc_share: Region,
        enc_master_share: Region,
        cert_puk: Region,
    ) -> Result<[u32; 3], ChannelError> {
        let r = self.trust_provisioning(
            "oem_gen_master_share",
            [seed, enc_share, enc_master_share, cert_puk]
                .into_iter()
                .flat_map(region),
        )?;
        values(&r)
    }

    fn generate_key(
        &mut self,
        key_type: OemKeyType,
        key_prop: u32,
        prk: Region,
        puk: Region,
    ) -> Result<(u32, u32), ChannelError> {
        let r = self.trust_provisioning(
            "hsm_gen_key",
            [hex(key_type as u32), dec(key_prop)]
                .into_iter()
                .chain(region(prk))
                .chain(region(puk)),
        )?;
        let [prk_len, puk_len] = values(&r)?;
        Ok((prk_len, puk_len))
    }

    fn wrap_key(
        &mut self,
        key_type: StoreKeyType,
        key_prop: u32,
        input: Region,
        output: Region,
    ) -> Result<(u32, u32), ChannelError> {
        let r = self.trust_provisioning(
            "hsm_store_key",
            [dec(key_type as u32), hex(key_prop)]
                .into_iter()
                .chain(region(input))
                .chain(region(output)),
        )?;
        let [header, len] = values(&r)?;
        Ok((header, len))
    }

    fn encrypt_block(
        &mut self,
        key: Region,
        kek_id: u32,
        header: Region,
        block_number: u32,
        data: Region,
    ) -> Result<(), ChannelError> {
        self.trust_provisioning(
            "hsm_enc_blk",
            region(key)
                .into_iter()
                .chain([dec(kek_id)])
                .chain(region(header))
                .chain([dec(block_number)])
                .chain(region(data)),
        )
        .map(|_| ())
    }

    fn sign_blob(
        &mut self,
        key: Region,
        data: Region,
        signature: Region,
    ) -> Result<u32, ChannelError> {
        let r = self.trust_provisioning(
            "hsm_enc_sign",
            [key, data, signature].into_iter().flat_map(region),
        )?;
        let [len] = values(&r)?;
        Ok(len)
    }
}
