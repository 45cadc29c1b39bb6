use std::path::Path;

use clap::{Args, Subcommand, ValueEnum};
use linkmux_mux::MuxConfig;

use crate::exit::{io_error, mux_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod loopback;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a host and a target mux in-process and transfer data on every channel.
    Loopback(LoopbackArgs),
    /// Decode one wire packet given as hex.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    match command {
        Command::Loopback(args) => loopback::run(args, format, load_config(config)?),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Read a JSON `MuxConfig`; missing fields take their defaults.
pub fn load_config(path: Option<&Path>) -> CliResult<MuxConfig> {
    let Some(path) = path else {
        return Ok(MuxConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("read config {}", path.display()), err))?;
    let config: MuxConfig = serde_json::from_str(&text).map_err(|err| {
        CliError::new(USAGE, format!("parse config {}: {err}", path.display()))
    })?;
    config.validate().map_err(|err| mux_error("config", err))?;
    Ok(config)
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LinkKind {
    /// In-memory packet queues.
    #[default]
    Memory,
    /// A connected Unix socket pair.
    Unix,
    /// A TCP connection over localhost.
    Tcp,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Number of channels to open.
    #[arg(long, short = 'n', default_value = "4")]
    pub channels: u32,
    /// First channel id.
    #[arg(long, default_value = "256")]
    pub first_channel: u32,
    /// Bytes per message.
    #[arg(long, default_value = "2000")]
    pub size: usize,
    /// Messages per channel.
    #[arg(long, default_value = "1")]
    pub messages: usize,
    /// Link between the two muxes.
    #[arg(long, value_enum, default_value_t = LinkKind::Memory)]
    pub link: LinkKind,
    /// Give up after this long (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Packet bytes as hex; whitespace and a leading 0x are ignored.
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `10s` or `2m`.
pub fn parse_duration(value: &str) -> CliResult<std::time::Duration> {
    use std::time::Duration;

    let value = value.trim();
    let (number, unit) = value
        .find(|c: char| !c.is_ascii_digit())
        .map(|split| value.split_at(split))
        .unwrap_or((value, "s"));
    let amount: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {value}")))?;
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        _ => Err(CliError::new(USAGE, format!("invalid duration unit: {value}"))),
    }
}
