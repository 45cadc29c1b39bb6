mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "linkmux", version, about = "Channel multiplexer CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "LINKMUX_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    /// Mux configuration file (JSON).
    #[arg(long, value_name = "PATH", env = "LINKMUX_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, cli.config.as_deref());

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::LinkKind;

    #[test]
    fn parses_loopback_subcommand() {
        let cli = Cli::try_parse_from([
            "linkmux",
            "loopback",
            "--channels",
            "8",
            "--size",
            "2000",
            "--link",
            "tcp",
        ])
        .expect("loopback args should parse");

        match cli.command {
            Command::Loopback(args) => {
                assert_eq!(args.channels, 8);
                assert_eq!(args.size, 2000);
                assert_eq!(args.link, LinkKind::Tcp);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "linkmux",
            "decode",
            "484c",
            "--format",
            "json",
            "--config",
            "/tmp/mux.json",
        ])
        .expect("global flags should parse after the subcommand");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/mux.json")));
        assert!(matches!(cli.command, Command::Decode(_)));
    }

    #[test]
    fn rejects_unknown_link() {
        let err = Cli::try_parse_from(["linkmux", "loopback", "--link", "carrier-pigeon"])
            .expect_err("unknown link should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
