//! hexboot CLI - reboot, flash and monitor tool for hex-record serial
//! bootloaders.
//!
//! Thin collaborator around the `hexboot` library: parses arguments,
//! configures a flash run, shows progress, and maps failures to process
//! exit codes. All protocol behavior lives in the library.

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use hexboot::{FastMode, FlashOptions, Flasher, Session, TransferMode};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Set by the Ctrl-C handler installed for monitor mode.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// hexboot - reboot, flash and monitor tool for serial bootloaders.
///
/// Environment variables:
///   HEXBOOT_FLASH_BAUD - Baud rate for flashing (default: 115200)
///   HEXBOOT_USER_BAUD  - Baud rate for monitor and reboot magic
#[derive(Parser)]
#[command(name = "hexboot")]
#[command(author, version, propagate_version = true)]
#[command(about = "Reboot, flash and monitor tool for hex-record serial bootloaders")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to access (e.g. /dev/ttyUSB0, COM3).
    port: Option<String>,

    /// The .hex file to upload.
    hex_file: Option<PathBuf>,

    /// Baud rate for flashing.
    #[arg(
        long,
        value_name = "BAUD",
        default_value_t = hexboot::DEFAULT_BAUD,
        env = "HEXBOOT_FLASH_BAUD"
    )]
    flash_baud: u32,

    /// Baud rate for monitor mode and the reboot magic.
    #[arg(
        long,
        value_name = "BAUD",
        default_value_t = hexboot::DEFAULT_BAUD,
        env = "HEXBOOT_USER_BAUD"
    )]
    user_baud: u32,

    /// Send without waiting for device acknowledgements.
    #[arg(long)]
    no_ack: bool,

    /// Send the go command even when no hex file is given.
    #[arg(long, conflicts_with = "no_go")]
    go: bool,

    /// Do not send the go command after flashing.
    #[arg(long)]
    no_go: bool,

    /// Require the compact binary transfer mode.
    #[arg(long, conflicts_with = "no_fast")]
    fast: bool,

    /// Never use the compact binary transfer mode.
    #[arg(long)]
    no_fast: bool,

    /// The link runs through a buffering bridge that garbles long
    /// plain-text bursts; implies the binary transfer mode.
    #[arg(long)]
    unreliable_link: bool,

    /// Delay in milliseconds between the go acknowledgement and program
    /// start.
    #[arg(long, value_name = "MS")]
    go_delay: Option<u32>,

    /// Magic string sent at the user baud rate to reboot the device into
    /// its bootloader before flashing.
    #[arg(long, value_name = "MAGIC")]
    reboot: Option<String>,

    /// Delay after sending the reboot magic.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    reboot_delay: u64,

    /// Upload chunk size in bytes.
    #[arg(long, value_name = "BYTES")]
    packet_size: Option<usize>,

    /// Give up on device acknowledgements after this long instead of
    /// waiting forever.
    #[arg(long, value_name = "MS")]
    ack_timeout: Option<u64>,

    /// Monitor serial port output after the other actions.
    #[arg(long)]
    monitor: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,

    /// Generate a shell completion script and exit.
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,
}

impl Cli {
    /// Whether this invocation should send the go command.
    fn wants_go(&self) -> bool {
        if self.hex_file.is_some() {
            !self.no_go
        } else {
            self.go
        }
    }

    fn fast_mode(&self) -> FastMode {
        if self.fast {
            FastMode::Always
        } else if self.no_fast {
            FastMode::Never
        } else {
            FastMode::Auto
        }
    }

    fn to_options(&self, port: String) -> FlashOptions {
        let mut opts = FlashOptions::new(port);
        opts.flash_baud = self.flash_baud;
        opts.user_baud = self.user_baud;
        opts.wait_ack = !self.no_ack;
        opts.fast = self.fast_mode();
        opts.unreliable_link = self.unreliable_link;
        opts.send_go = self.wants_go();
        opts.go_delay_ms = self.go_delay;
        opts.reboot_magic = self.reboot.clone();
        opts.reboot_delay = Duration::from_millis(self.reboot_delay);
        if let Some(size) = self.packet_size {
            opts.chunk_size = size;
        }
        opts.ack_deadline = self.ack_timeout.map(Duration::from_millis);
        opts
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let Some(port) = cli.port.clone() else {
        bail!("no serial port specified");
    };

    debug!(
        "hexboot v{} on {port} at {} baud",
        env!("CARGO_PKG_VERSION"),
        cli.flash_baud
    );

    if let Some(hex) = &cli.hex_file {
        let is_hex = hex
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("hex"));
        if !is_hex {
            warn!("'{}' does not have a .hex extension", hex.display());
        }
    }

    let mut flasher = Flasher::open(cli.to_options(port)).context("failed to open serial port")?;

    flasher.reboot().context("reboot magic failed")?;

    if cli.hex_file.is_some() || cli.wants_go() {
        let mode = flasher.connect().context("device handshake failed")?;
        if !cli.quiet && mode == TransferMode::Binary {
            eprintln!("{} binary transfer mode", style("✓").green());
        }
    }

    if let Some(hex) = cli.hex_file.clone() {
        let total = std::fs::metadata(&hex)
            .with_context(|| format!("cannot stat {}", hex.display()))?
            .len();
        let pb = progress_bar(total, cli.quiet);

        let stats = flasher
            .upload_file(&hex, &mut |done, _| pb.set_position(done))
            .with_context(|| format!("upload of {} failed", hex.display()))?;
        pb.finish_and_clear();

        if !cli.quiet {
            eprintln!(
                "{} sent {} bytes in {:.1}s",
                style("✓").green(),
                stats.bytes,
                stats.elapsed.as_secs_f64()
            );
        }
    }

    if cli.wants_go() {
        flasher.go().context("go command failed")?;
        if !cli.quiet {
            let what = cli
                .hex_file
                .as_ref()
                .map_or_else(|| "device".to_string(), |p| p.display().to_string());
            eprintln!("{} {what} started", style("✓").green());
        }
    }

    if cli.monitor {
        run_monitor(&mut flasher, cli.quiet)?;
    }

    flasher.close()?;
    Ok(())
}

/// Pass device output through to stdout until Ctrl-C.
fn run_monitor(flasher: &mut Flasher<Session>, quiet: bool) -> Result<()> {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed))
        .context("failed to install Ctrl-C handler")?;

    if !quiet {
        eprintln!(
            "{} monitoring at {} baud, press Ctrl-C to exit",
            style("📡").cyan(),
            flasher.options().user_baud
        );
    }

    let _sub = flasher.monitor(std::io::stdout())?;
    while !was_interrupted() {
        std::thread::sleep(Duration::from_millis(50));
    }

    if !quiet {
        eprintln!("\n{} monitor closed", style("👋").cyan());
    }
    Ok(())
}

/// Byte progress bar on stderr; hidden in quiet or non-TTY runs.
fn progress_bar(total: u64, quiet: bool) -> ProgressBar {
    if quiet || !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}
