//! tether — command-line client for the device bridge daemon.
//!
//! ```text
//! tether devices                         List attached devices
//! tether -s <serial> shell <cmd>         Run a shell command
//! tether -s <serial> pull <remote> <to>  Pull a file or tree
//! tether -s <serial> push <from> <to>    Push a file or tree
//! tether -s <serial> install <apk>       Stream-install a package
//! tether -s <serial> screencap <out>     Capture the raw framebuffer
//! tether -s <serial> forward <l> <r>     Forward a local port
//! tether connect <host[:port]>           Attach a networked device
//! tether -s <serial> reboot [mode]       Reboot the device
//! ```

mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_core::device::{FetchDeviceFeaturesRequest, ListDevicesRequest};
use tether_core::forwarding::{LocalPortSpec, PortForwardRequest, RemotePortSpec};
use tether_core::framebuffer::ScreenCaptureRequest;
use tether_core::misc::{ConnectDeviceRequest, RebootMode, RebootRequest};
use tether_core::pkg::StreamingPackageInstallRequest;
use tether_core::sync::{PullRequest, PushRequest};
use tether_core::{Client, Feature, shell};

use config::CliConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Device bridge client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tether.toml")]
    config: PathBuf,

    /// Device serial to address.
    #[arg(short, long)]
    serial: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices known to the daemon.
    Devices,
    /// Show the feature set advertised by the device.
    Features,
    /// Run a shell command and print its output.
    Shell {
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },
    /// Pull a remote file or directory.
    Pull { remote: String, local: PathBuf },
    /// Push a local file or directory.
    Push { local: PathBuf, remote: String },
    /// Stream-install a package.
    Install {
        package: PathBuf,
        /// Replace an existing application.
        #[arg(short, long)]
        reinstall: bool,
    },
    /// Capture the framebuffer into a raw pixel dump.
    Screencap { output: PathBuf },
    /// Forward a local port to the device.
    Forward { local: String, remote: String },
    /// Connect a networked device.
    Connect { address: String },
    /// Reboot the device.
    Reboot {
        /// One of: bootloader, recovery, sideload, sideload-auto-reboot.
        mode: Option<String>,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = Client::for_address(config.daemon_address());
    let serial = cli.serial.as_deref();

    match cli.command {
        Command::Devices => {
            for device in client.execute(ListDevicesRequest::new(), None).await? {
                println!("{}\t{:?}", device.serial, device.state);
            }
        }
        Command::Features => {
            let serial = require_serial(serial)?;
            let features = client
                .execute(FetchDeviceFeaturesRequest::new(serial), None)
                .await?;
            for feature in features {
                println!("{feature}");
            }
        }
        Command::Shell { cmd } => {
            let cmd = cmd.join(" ");
            let features = match serial {
                Some(serial) => {
                    client
                        .execute(FetchDeviceFeaturesRequest::new(serial), None)
                        .await?
                }
                None => Vec::new(),
            };
            let result = if features.contains(&Feature::ShellV2) {
                client
                    .execute(shell::v2::ShellCommandRequest::new(cmd), serial)
                    .await?
            } else {
                client
                    .execute(shell::v1::ShellCommandRequest::new(cmd), serial)
                    .await?
            };
            print!("{}", result.stdout_text());
            eprint!("{}", result.stderr_text());
            std::process::exit(result.exit_code);
        }
        Command::Pull { remote, local } => {
            let features = fetch_features(&client, serial).await?;
            let request = PullRequest::new(remote, local, &features);
            let complete = client.execute_multi(request, serial).await?;
            if !complete {
                eprintln!("pull did not complete");
                std::process::exit(1);
            }
            info!("pull complete");
        }
        Command::Push { local, remote } => {
            let features = fetch_features(&client, serial).await?;
            let request = PushRequest::new(local, remote, &features);
            let complete = client.execute_multi(request, serial).await?;
            if !complete {
                eprintln!("push did not complete");
                std::process::exit(1);
            }
            info!("push complete");
        }
        Command::Install { package, reinstall } => {
            let features = fetch_features(&client, serial).await?;
            let mut request = StreamingPackageInstallRequest::new(package, &features);
            if reinstall {
                request = request.reinstall();
            }
            if client.execute(request, serial).await? {
                println!("Success");
            } else {
                eprintln!("install failed");
                std::process::exit(1);
            }
        }
        Command::Screencap { output } => {
            let image = client.execute(ScreenCaptureRequest::new(), serial).await?;
            tokio::fs::write(&output, &image.buffer).await?;
            info!(
                "captured {}x{} ({} bpp, {} bytes) to {}",
                image.width,
                image.height,
                image.bits_per_pixel,
                image.buffer.len(),
                output.display()
            );
        }
        Command::Forward { local, remote } => {
            let serial = require_serial(serial)?;
            let request = PortForwardRequest::new(
                parse_local_spec(&local)?,
                parse_remote_spec(&remote)?,
                serial,
            );
            match client.execute(request, None).await? {
                Some(port) => println!("{port}"),
                None => info!("forward established"),
            }
        }
        Command::Connect { address } => {
            let (host, port) = match address.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), port.parse()?),
                None => (address, 5555),
            };
            let message = client
                .execute(ConnectDeviceRequest::new(host, port), None)
                .await?;
            println!("{message}");
        }
        Command::Reboot { mode } => {
            let mode = match mode.as_deref() {
                None => RebootMode::Default,
                Some("bootloader") => RebootMode::Bootloader,
                Some("recovery") => RebootMode::Recovery,
                Some("sideload") => RebootMode::Sideload,
                Some("sideload-auto-reboot") => RebootMode::SideloadAutoReboot,
                Some(other) => return Err(format!("unknown reboot mode {other:?}").into()),
            };
            client.execute(RebootRequest::new(mode), serial).await?;
        }
    }

    Ok(())
}

fn require_serial(serial: Option<&str>) -> Result<&str, Box<dyn std::error::Error>> {
    serial.ok_or_else(|| "this command needs --serial".into())
}

async fn fetch_features(
    client: &Client,
    serial: Option<&str>,
) -> Result<Vec<Feature>, Box<dyn std::error::Error>> {
    let serial = require_serial(serial)?;
    Ok(client
        .execute(FetchDeviceFeaturesRequest::new(serial), None)
        .await?)
}

fn parse_local_spec(value: &str) -> Result<LocalPortSpec, Box<dyn std::error::Error>> {
    match value.split_once(':') {
        Some(("tcp", port)) => Ok(LocalPortSpec::Tcp(port.parse()?)),
        Some(("local", path)) => Ok(LocalPortSpec::UnixSocket(path.to_string())),
        _ => Err(format!("unsupported local spec {value:?}").into()),
    }
}

fn parse_remote_spec(value: &str) -> Result<RemotePortSpec, Box<dyn std::error::Error>> {
    match value.split_once(':') {
        Some(("tcp", port)) => Ok(RemotePortSpec::Tcp(port.parse()?)),
        Some(("localabstract", name)) => Ok(RemotePortSpec::LocalAbstract(name.to_string())),
        Some(("localreserved", name)) => Ok(RemotePortSpec::LocalReserved(name.to_string())),
        Some(("localfilesystem", path)) => {
            Ok(RemotePortSpec::LocalFilesystem(path.to_string()))
        }
        Some(("dev", path)) => Ok(RemotePortSpec::Dev(path.to_string())),
        Some(("jdwp", pid)) => Ok(RemotePortSpec::Jdwp(pid.parse()?)),
        _ => Err(format!("unsupported remote spec {value:?}").into()),
    }
}
