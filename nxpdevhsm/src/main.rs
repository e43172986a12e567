// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use devhsm::{
    validate_command_config, validate_or_generate_seed,
    validate_pre_shared_key, ContainerConfig, DeviceHsm, ProvisioningError,
    Stage, WorkspaceSink,
};
use log::{debug, error};
use zeroize::Zeroizing;

mod blhost;

use crate::blhost::{BlhostChannel, Transport};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, max_term_width = 80)]
struct Args {
    /// Print more (repeat for even more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a provisioning SB3.1 image using the device HSM
    Generate(GenerateArgs),
}

#[derive(clap::Args, Debug)]
#[command(group(
    ArgGroup::new("transport").required(true).args(["port", "usb"])
))]
struct GenerateArgs {
    /// OEM pre-shared customer key (32 bytes, binary)
    #[arg(short, long, value_name = "FILE")]
    key: PathBuf,

    /// OEM share input seed (16 bytes, binary); random if omitted
    #[arg(short = 'o', long, value_name = "FILE")]
    oem_share_input: Option<PathBuf>,

    /// Directory to store intermediate public artifacts in
    #[arg(short, long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Container configuration with extra commands (TOML or JSON)
    #[arg(short = 'j', long, value_name = "FILE")]
    container_conf: Option<PathBuf>,

    /// Serial port, e.g. `/dev/ttyACM0,115200`
    #[arg(short, long, value_name = "PORT[,BAUD]")]
    port: Option<String>,

    /// USB device, e.g. `0x1fc9,0x0021`
    #[arg(short, long, value_name = "VID,PID")]
    usb: Option<String>,

    /// Path to the blhost executable
    #[arg(long, value_name = "PATH", default_value = "blhost")]
    blhost: PathBuf,

    /// Per-command device timeout in milliseconds
    #[arg(short, long, default_value_t = 5000)]
    timeout: u32,

    /// Where to write the final image
    output: PathBuf,
}

impl GenerateArgs {
    fn transport(&self) -> Transport {
        match (&self.port, &self.usb) {
            (Some(p), _) => Transport::Port(p.clone()),
            (None, Some(u)) => Transport::Usb(u.clone()),
            // clap enforces exactly one of the two
            (None, None) => unreachable!(),
        }
    }
}

fn read_secret(path: &Path, what: &str) -> Result<Zeroizing<Vec<u8>>> {
    std::fs::read(path)
        .map(Zeroizing::new)
        .with_context(|| format!("failed to read {what} {}", path.display()))
}

fn generate(args: GenerateArgs) -> Result<()> {
    let key = read_secret(&args.key, "pre-shared key")?;
    let pck = validate_pre_shared_key(&key)?;

    let seed = match &args.oem_share_input {
        Some(p) => {
            let bytes = read_secret(p, "OEM share seed")?;
            validate_or_generate_seed(Some(bytes.as_slice()))?
        }
        None => validate_or_generate_seed(None)?,
    };

    let config = match &args.container_conf {
        Some(p) => ContainerConfig::load(p)
            .with_context(|| format!("failed to load {}", p.display()))?,
        None => ContainerConfig::default(),
    };
    debug!("{} user commands", config.commands.len());
    // Nothing may reach the device while the configuration is unusable.
    validate_command_config(&config.commands)?;

    let transport = args.transport();
    let mut channel =
        BlhostChannel::new(args.blhost.clone(), transport, args.timeout);
    channel
        .ping()
        .context("device is not responding; is it in ISP mode?")?;

    let mut workspace = args.workspace.as_ref().map(WorkspaceSink::new);
    let mut hsm = DeviceHsm::new(&mut channel);
    if let Some(ws) = workspace.as_mut() {
        hsm = hsm.forensic_sink(ws);
    }
    let image = hsm
        .run(&pck, &seed, &config, &mut |s: Stage| println!("{s}"))
        .map_err(|e: ProvisioningError| {
            if e.needs_device_reset() {
                error!("the device must be reset before another attempt");
            }
            e
        })?;

    std::fs::write(&args.output, image.as_bytes()).with_context(|| {
        format!("failed to write {}", args.output.display())
    })?;
    let path = std::fs::canonicalize(&args.output)
        .unwrap_or_else(|_| args.output.clone());
    println!("Final SB3 file has been written: {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level),
    )
    .init();

    match args.cmd {
        Cmd::Generate(g) => generate(g),
    }
}
