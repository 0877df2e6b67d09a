//! radvault: host-side simulator for the radio's secret store
//!
//! Each invocation boots the simulated device from a flash image file, runs
//! one command, and writes the image back:
//!   init / status / identity       - boot and report device state
//!   records / resolve              - inspect the record table
//!   read / write / erase           - record access through the encryption layer
//!   migrate                        - convert legacy plaintext records
//!   unlock / set-passcode          - passcode lifecycle
//!   max-tries / factory-reset      - lockout policy and recovery

mod host;
mod image;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;

use radvault_core::VaultConfig;
use radvault_secrets::device::MacDisplay;
use radvault_secrets::{DeviceIdentity, PasscodeError, PasscodeManager, SessionState};
use radvault_storage::{Allocation, GridIndex, MemFlash, Policy, RecordId};

use host::{HostEntropy, HostPlatform};

type Device = PasscodeManager<MemFlash, HostPlatform, HostEntropy>;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "radvault",
    version,
    about = "radvault secret-store simulator",
    long_about = "radvault: drive the radio's encrypted record store against a flash image file"
)]
struct Cli {
    /// Path to radvault.toml configuration file
    #[arg(long, short = 'c', env = "RADVAULT_CONFIG", default_value = "radvault.toml")]
    config: PathBuf,

    /// Flash image file (overrides config)
    #[arg(long, env = "RADVAULT_IMAGE")]
    image: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error; overrides config)
    #[arg(long, env = "RADVAULT_LOG")]
    log: Option<String>,

    /// Log format (overrides config)
    #[arg(long, env = "RADVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Current passcode, for non-interactive use (prompted when absent)
    #[arg(long, env = "RADVAULT_PASSCODE", hide_env_values = true)]
    passcode: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot the device, provisioning a fresh image if needed
    Init,

    /// Show session and passcode state
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Show the serial number and MAC address derived from the hardware ID
    Identity {
        #[arg(long)]
        json: bool,
    },

    /// List the record table
    Records,

    /// Print the flash address of a record element
    Resolve {
        record: RecordId,
        /// Element index (`N`, `0xN`, or `row:col` for grid records)
        #[arg(default_value = "0", value_parser = parse_index)]
        index: u16,
    },

    /// Read and hex-dump part of a record element
    Read {
        record: RecordId,
        #[arg(long, short = 'i', default_value = "0", value_parser = parse_index)]
        index: u16,
        #[arg(long, short = 'o', default_value = "0", value_parser = parse_u16)]
        offset: u16,
        /// Bytes to read (default: the rest of the element)
        #[arg(long, short = 'n', value_parser = parse_u16)]
        len: Option<u16>,
    },

    /// Write bytes into a record element
    Write {
        record: RecordId,
        #[arg(long, short = 'i', default_value = "0", value_parser = parse_index)]
        index: u16,
        #[arg(long, short = 'o', default_value = "0", value_parser = parse_u16)]
        offset: u16,
        /// Data as hex digits
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        hex: Option<String>,
        /// Data as UTF-8 text
        #[arg(long)]
        text: Option<String>,
    },

    /// Erase the flash sector holding a record
    Erase {
        record: RecordId,
        /// Required: the whole 4 KiB sector is erased, including neighbours
        #[arg(long)]
        force: bool,
    },

    /// Convert every record whose key is available
    Migrate {
        /// Unlock first so passcode-bound records are converted too
        #[arg(long)]
        unlock: bool,
    },

    /// Check a passcode and unlock the session
    Unlock,

    /// Set, change or remove the passcode
    #[command(name = "set-passcode")]
    SetPasscode {
        /// New passcode (prompted twice when absent)
        #[arg(long, env = "RADVAULT_NEW_PASSCODE", hide_env_values = true)]
        new: Option<String>,
        /// Remove the passcode instead
        #[arg(long, conflicts_with = "new")]
        remove: bool,
    },

    /// Show or set the failed-attempt limit
    #[command(name = "max-tries")]
    MaxTries { value: Option<u8> },

    /// Discard the passcode and master secret
    #[command(name = "factory-reset")]
    FactoryReset {
        /// Required: passcode-protected records become unreadable
        #[arg(long)]
        force: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = VaultConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    init_logging(&cli, &config);

    if !cli.config.exists() {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    if let Some(image) = &cli.image {
        config.device.flash_image = image.clone();
    }

    match cli.command {
        Commands::Records => return cmd_records(),
        Commands::Resolve { record, index } => return cmd_resolve(record, index),
        _ => {}
    }

    let passcode = cli.passcode.map(SecretString::from);
    let mut device = boot(&config)?;
    let outcome = dispatch(&mut device, cli.command, passcode.as_ref());

    image::save(&config.device.flash_image, device.flash())?;
    if device.platform().restart_requested() {
        tracing::warn!("device restarted");
    }
    outcome
}

fn dispatch(device: &mut Device, command: Commands, passcode: Option<&SecretString>) -> Result<()> {
    match command {
        Commands::Init => cmd_init(device),
        Commands::Status { json } => cmd_status(device, json),
        Commands::Identity { json } => cmd_identity(device.identity(), json),
        Commands::Read {
            record,
            index,
            offset,
            len,
        } => cmd_read(device, passcode, record, index, offset, len),
        Commands::Write {
            record,
            index,
            offset,
            hex,
            text,
        } => {
            let data = match (hex, text) {
                (Some(hex), _) => parse_hex(&hex)?,
                (None, Some(text)) => text.into_bytes(),
                (None, None) => anyhow::bail!("one of --hex or --text is required"),
            };
            cmd_write(device, passcode, record, index, offset, &data)
        }
        Commands::Erase { record, force } => cmd_erase(device, record, force),
        Commands::Migrate { unlock } => cmd_migrate(device, passcode, unlock),
        Commands::Unlock => cmd_unlock(device, passcode),
        Commands::SetPasscode { new, remove } => cmd_set_passcode(device, passcode, new, remove),
        Commands::MaxTries { value } => cmd_max_tries(device, passcode, value),
        Commands::FactoryReset { force } => cmd_factory_reset(device, force),
        Commands::Records | Commands::Resolve { .. } => Ok(()),
    }
}

fn init_logging(cli: &Cli, config: &VaultConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Boot ──────────────────────────────────────────────────────────────────────

fn boot(config: &VaultConfig) -> Result<Device> {
    let flash = image::load(&config.device.flash_image, config.device.flash_size)?;
    let identity = DeviceIdentity::from_cpu_id(config.device.hardware_id()?);
    let mut device = PasscodeManager::new(
        flash,
        identity,
        HostPlatform::default(),
        HostEntropy::new(),
        config.security.clone(),
    )?;
    let state = device.init().context("booting device")?;
    tracing::debug!(?state, image = %config.device.flash_image.display(), "booted");
    Ok(device)
}

// ── Passcode prompts ──────────────────────────────────────────────────────────

fn prompt(label: &str) -> Result<SecretString> {
    let entered = rpassword::prompt_password(label).context("reading passcode")?;
    Ok(SecretString::from(entered))
}

/// Serve any owed lockout, then ask for the passcode until it is accepted.
/// A passcode given on the command line gets a single attempt.
fn ensure_unlocked(device: &mut Device, passcode: Option<&SecretString>) -> Result<()> {
    if !device.is_locked() {
        return Ok(());
    }
    loop {
        if device.lockout_remaining().is_some() {
            serve_lockout(device)?;
        }

        let prompted;
        let candidate = match passcode {
            Some(p) => p,
            None => {
                prompted = prompt("Passcode: ")?;
                &prompted
            }
        };

        match device.validate(candidate) {
            Ok(()) => {
                println!("Unlocked.");
                return Ok(());
            }
            Err(PasscodeError::Rejected {
                attempts,
                max_tries,
            }) => {
                eprintln!("Incorrect passcode ({attempts}/{max_tries} attempts used)");
                if passcode.is_some() {
                    anyhow::bail!("passcode rejected");
                }
            }
            Err(PasscodeError::Exhausted) => {
                anyhow::bail!("too many failed attempts; the device restarts")
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn serve_lockout(device: &mut Device) -> Result<()> {
    let total = device.lockout_remaining().unwrap_or(0) as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.red/blue}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix("locked out");
    device.serve_lockout(|remaining| {
        pb.set_position(total - remaining as u64);
        pb.set_message(format!("{remaining}s"));
    })?;
    pb.finish_and_clear();
    Ok(())
}

fn prompt_new_passcode() -> Result<SecretString> {
    let first = prompt("New passcode: ")?;
    let second = prompt("Confirm passcode: ")?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passcodes do not match");
    }
    Ok(first)
}

// ── `radvault init` / `radvault status` ───────────────────────────────────────

fn cmd_init(device: &Device) -> Result<()> {
    println!("Device ready: {}", state_label(device.state()));
    if let Some(fp) = device.master_key_fingerprint() {
        println!("  master key: {fp:08x}");
    }
    Ok(())
}

fn cmd_status(device: &Device, json: bool) -> Result<()> {
    let state = device.state();
    let mask = device.migration_mask();
    let pending: Vec<&str> = RecordId::ALL
        .iter()
        .filter(|r| !mask.contains(**r))
        .map(|r| r.name())
        .collect();
    let config = device.key_ring().config();

    if json {
        let value = serde_json::json!({
            "state": state_label(state),
            "passcode_set": device.is_set(),
            "passcode_length": device.expose_length().then(|| device.passcode_length()),
            "failed_attempts": device.failed_attempts(),
            "max_tries": device.max_tries(),
            "lockout_secs": device.lockout_remaining(),
            "kdf_iterations": config.iterations,
            "stealth_mode": device.stealth_mode(),
            "migration_mask": format!("{:#018x}", mask.bits()),
            "pending_migration": pending,
            "master_key_fingerprint": device.master_key_fingerprint().map(|fp| format!("{fp:08x}")),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("radvault v{}", env!("CARGO_PKG_VERSION"));
    println!("  state:           {}", state_label(state));
    if device.is_set() && device.expose_length() {
        println!("  passcode length: {}", device.passcode_length());
    }
    println!(
        "  attempts:        {} of {}",
        device.failed_attempts(),
        device.max_tries()
    );
    if let Some(secs) = device.lockout_remaining() {
        println!("  lockout:         {secs}s before the next attempt");
    }
    println!("  kdf iterations:  {}", config.iterations);
    println!("  stealth mode:    {}", on_off(device.stealth_mode()));
    println!("  migration mask:  {:#018x}", mask.bits());
    if !pending.is_empty() {
        println!("  pending:         {}", pending.join(", "));
    }
    match device.master_key_fingerprint() {
        Some(fp) => println!("  master key:      {fp:08x}"),
        None => println!("  master key:      unavailable"),
    }
    Ok(())
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Uninitialized => "uninitialized",
        SessionState::Locked => "locked",
        SessionState::Unlocked => "unlocked",
        SessionState::UnlockedNoPasscode => "unlocked (no passcode)",
    }
}

fn on_off(v: bool) -> &'static str {
    if v {
        "on"
    } else {
        "off"
    }
}

// ── `radvault identity` ───────────────────────────────────────────────────────

fn cmd_identity(identity: &DeviceIdentity, json: bool) -> Result<()> {
    let mac = MacDisplay(identity.mac_address()).to_string();
    if json {
        let value = serde_json::json!({
            "cpu_id": to_hex(identity.cpu_id()),
            "serial": format!("{:016x}", identity.serial()),
            "crockford": identity.crockford_serial(),
            "mac": mac,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    println!("cpu id:    {}", to_hex(identity.cpu_id()));
    println!("serial:    {:016x}", identity.serial());
    println!("crockford: {}", identity.crockford_serial());
    println!("mac:       {mac}");
    Ok(())
}

// ── `radvault records` / `radvault resolve` ───────────────────────────────────

fn cmd_records() -> Result<()> {
    println!(
        "{:<18} {:<9} {:<7} {:>8} {:>5} {:>6}",
        "record", "policy", "kind", "base", "size", "count"
    );
    for &record in RecordId::ALL {
        let d = record.descriptor();
        let (kind, base) = match d.allocation {
            Allocation::Fixed { base } => ("fixed", base),
            Allocation::Linear { base, .. } => ("linear", base),
            Allocation::Grid { base, .. } => ("grid", base),
        };
        let size = match d.size {
            0 => "-".to_string(),
            n => n.to_string(),
        };
        println!(
            "{:<18} {:<9} {:<7} {:>#8x} {:>5} {:>6}",
            record.name(),
            d.policy,
            kind,
            base,
            size,
            d.count()
        );
    }
    Ok(())
}

fn cmd_resolve(record: RecordId, index: u16) -> Result<()> {
    let address = record
        .resolve(index)
        .with_context(|| format!("{record} has no element {}", describe_index(record, index)))?;
    println!("{address:#08x}");
    Ok(())
}

fn describe_index(record: RecordId, index: u16) -> String {
    match record.descriptor().allocation {
        Allocation::Grid { .. } => {
            let at = GridIndex::unpack(index);
            format!("{}:{}", at.row, at.col)
        }
        _ => index.to_string(),
    }
}

// ── `radvault read` / `radvault write` / `radvault erase` ─────────────────────

fn cmd_read(
    device: &mut Device,
    passcode: Option<&SecretString>,
    record: RecordId,
    index: u16,
    offset: u16,
    len: Option<u16>,
) -> Result<()> {
    let len = match (len, record.element_size()) {
        (Some(n), _) => n,
        (None, 0) => anyhow::bail!("{record} is a stream region; pass --len"),
        (None, size) => size.saturating_sub(offset),
    };
    if record.policy() == Policy::PasscodeBound {
        ensure_unlocked(device, passcode)?;
    }

    let mut buf = vec![0u8; len as usize];
    device
        .read(record, index, offset, &mut buf)
        .with_context(|| format!("reading {record}[{}]", describe_index(record, index)))?;
    let address = record.resolve(index).unwrap_or(0) + offset as u32;
    print!("{}", hexdump(address, &buf));
    Ok(())
}

fn cmd_write(
    device: &mut Device,
    passcode: Option<&SecretString>,
    record: RecordId,
    index: u16,
    offset: u16,
    data: &[u8],
) -> Result<()> {
    if record.policy() == Policy::PasscodeBound {
        ensure_unlocked(device, passcode)?;
    }
    device
        .write(record, index, offset, data)
        .with_context(|| format!("writing {record}[{}]", describe_index(record, index)))?;
    println!(
        "Wrote {} bytes to {record}[{}]+{offset}",
        data.len(),
        describe_index(record, index)
    );
    Ok(())
}

fn cmd_erase(device: &mut Device, record: RecordId, force: bool) -> Result<()> {
    if !force {
        anyhow::bail!("erasing {record} clears its whole flash sector; rerun with --force");
    }
    device.sector_erase(record)?;
    println!("Erased sector holding {record}");
    Ok(())
}

// ── `radvault migrate` ────────────────────────────────────────────────────────

fn cmd_migrate(device: &mut Device, passcode: Option<&SecretString>, unlock: bool) -> Result<()> {
    if unlock {
        // a successful unlock already runs the sweep
        ensure_unlocked(device, passcode)?;
    }
    let converted = device.migrate_all()?;
    let mask = device.migration_mask();
    println!("Converted {converted} records (mask {:#018x})", mask.bits());
    let pending: Vec<_> = RecordId::ALL
        .iter()
        .filter(|r| !mask.contains(**r))
        .collect();
    if !pending.is_empty() {
        println!("{} records wait for unlock", pending.len());
    }
    Ok(())
}

// ── Passcode commands ─────────────────────────────────────────────────────────

fn cmd_unlock(device: &mut Device, passcode: Option<&SecretString>) -> Result<()> {
    match device.state() {
        SessionState::UnlockedNoPasscode => {
            println!("No passcode is set.");
            Ok(())
        }
        SessionState::Unlocked => {
            println!("Already unlocked.");
            Ok(())
        }
        _ => ensure_unlocked(device, passcode),
    }
}

fn cmd_set_passcode(
    device: &mut Device,
    passcode: Option<&SecretString>,
    new: Option<String>,
    remove: bool,
) -> Result<()> {
    ensure_unlocked(device, passcode)?;
    let next = if remove {
        SecretString::from("")
    } else {
        match new {
            Some(p) => SecretString::from(p),
            None => prompt_new_passcode()?,
        }
    };
    device.set_passcode(&next)?;
    if next.expose_secret().is_empty() {
        println!("Passcode removed.");
    } else {
        println!("Passcode set ({} characters).", device.passcode_length());
    }
    Ok(())
}

fn cmd_max_tries(
    device: &mut Device,
    passcode: Option<&SecretString>,
    value: Option<u8>,
) -> Result<()> {
    let Some(value) = value else {
        println!("{}", device.max_tries());
        return Ok(());
    };
    ensure_unlocked(device, passcode)?;
    let stored = device.set_max_tries(value)?;
    if stored != value {
        println!("Attempt limit clamped to {stored}");
    } else {
        println!("Attempt limit set to {stored}");
    }
    Ok(())
}

fn cmd_factory_reset(device: &mut Device, force: bool) -> Result<()> {
    if !force {
        anyhow::bail!(
            "factory reset discards the master key and every passcode-protected record; rerun with --force"
        );
    }
    device.factory_reset()?;
    println!("Factory reset complete: {}", state_label(device.state()));
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

/// Element index: decimal, `0x` hex, or `row:col`.
fn parse_index(s: &str) -> Result<u16, String> {
    if let Some((row, col)) = s.split_once(':') {
        let row: u8 = row.trim().parse().map_err(|e| format!("row: {e}"))?;
        let col: u8 = col.trim().parse().map_err(|e| format!("col: {e}"))?;
        return Ok(GridIndex { row, col }.pack());
    }
    parse_u16(s)
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("{s}: {e}"))
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        anyhow::bail!("expected an even number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("bad hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Sixteen bytes per line, addressed, with a printable-ASCII column.
fn hexdump(address: u32, bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = line.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "{:06x}  {:<47}  |{}|\n",
            address as usize + i * 16,
            hex.join(" "),
            ascii
        ));
    }
    out
}
