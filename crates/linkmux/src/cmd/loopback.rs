use std::sync::Arc;
use std::time::{Duration, Instant};

use linkmux_mux::{Channel, ChannelError, ChannelState, Mux, MuxConfig, Session, SessionStats};
use linkmux_packet::channel::channel_name;
use linkmux_packet::{ChannelId, PacketConfig};
use linkmux_transport::{LoopbackDriver, PacketDriver, StreamDriver};
use serde::Serialize;

use crate::cmd::{parse_duration, LinkKind, LoopbackArgs};
use crate::exit::{
    channel_error, io_error, mux_error, session_error, transport_error, CliError, CliResult,
    FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_json, print_table, OutputFormat};

const MAX_SOCKET_IN_FLIGHT: usize = 128 * 1024;

#[derive(Serialize)]
struct LoopbackReport {
    link: &'static str,
    verified: bool,
    elapsed_ms: u64,
    channels: Vec<ChannelReport>,
    host: SessionStats,
    target: SessionStats,
}

#[derive(Serialize)]
struct ChannelReport {
    channel: ChannelId,
    name: &'static str,
    version: i16,
    messages_sent: u64,
    messages_received: u64,
    packets_sent: u64,
    bytes_sent: u64,
    would_block: u64,
    mismatches: usize,
    host_state: ChannelState,
    target_state: ChannelState,
}

/// One host/target channel pair and its transfer progress.
struct Lane {
    host: Channel,
    target: Channel,
    sent: usize,
    received: usize,
    mismatches: usize,
}

pub fn run(args: LoopbackArgs, format: OutputFormat, config: MuxConfig) -> CliResult<i32> {
    if args.channels == 0 {
        return Err(CliError::new(USAGE, "--channels must be at least 1"));
    }
    if args.size > config.max_write_size {
        return Err(CliError::new(
            USAGE,
            format!(
                "--size {} exceeds max_write_size {}",
                args.size, config.max_write_size
            ),
        ));
    }
    let timeout = parse_duration(&args.timeout)?;

    // Both ends are pumped from this thread, so everything in flight must fit
    // in the kernel socket buffers or a write blocks forever.
    let in_flight = args.channels as usize * config.default_receive_window;
    if args.link != LinkKind::Memory && in_flight > MAX_SOCKET_IN_FLIGHT {
        return Err(CliError::new(
            USAGE,
            format!(
                "{} channels x {} byte windows exceed the {MAX_SOCKET_IN_FLIGHT} bytes a socket link can hold; use --link memory or fewer channels",
                args.channels, config.default_receive_window
            ),
        ));
    }

    let report = match args.link {
        LinkKind::Memory => {
            let (host, target) = LoopbackDriver::pair();
            transfer("memory", &args, &config, host, target, timeout)?
        }
        LinkKind::Unix => unix_transfer(&args, &config, timeout)?,
        LinkKind::Tcp => {
            let (host, target) = tcp_pair()?;
            transfer("tcp", &args, &config, host, target, timeout)?
        }
    };

    tracing::info!(
        link = report.link,
        channels = report.channels.len(),
        verified = report.verified,
        elapsed_ms = report.elapsed_ms,
        "loopback transfer finished"
    );
    print_report(&report, format);
    Ok(if report.verified { SUCCESS } else { FAILURE })
}

#[cfg(unix)]
fn unix_transfer(
    args: &LoopbackArgs,
    config: &MuxConfig,
    timeout: Duration,
) -> CliResult<LoopbackReport> {
    let (left, right) = std::os::unix::net::UnixStream::pair()
        .map_err(|err| io_error("create socket pair", err))?;
    let host = StreamDriver::unix(left, PacketConfig::default())
        .map_err(|err| transport_error("host link", err))?;
    let target = StreamDriver::unix(right, PacketConfig::default())
        .map_err(|err| transport_error("target link", err))?;
    transfer("unix", args, config, host, target, timeout)
}

#[cfg(not(unix))]
fn unix_transfer(
    _args: &LoopbackArgs,
    _config: &MuxConfig,
    _timeout: Duration,
) -> CliResult<LoopbackReport> {
    Err(CliError::new(
        USAGE,
        "--link unix is only available on unix platforms",
    ))
}

fn tcp_pair() -> CliResult<(StreamDriver<std::net::TcpStream>, StreamDriver<std::net::TcpStream>)>
{
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|err| io_error("bind localhost", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| io_error("local address", err))?;
    let client =
        std::net::TcpStream::connect(addr).map_err(|err| io_error("connect localhost", err))?;
    let (server, _) = listener
        .accept()
        .map_err(|err| io_error("accept localhost", err))?;

    let host = StreamDriver::tcp(client, PacketConfig::default())
        .map_err(|err| transport_error("host link", err))?;
    let target = StreamDriver::tcp(server, PacketConfig::default())
        .map_err(|err| transport_error("target link", err))?;
    Ok((host, target))
}

fn transfer<A: PacketDriver, B: PacketDriver>(
    link: &'static str,
    args: &LoopbackArgs,
    config: &MuxConfig,
    host_driver: A,
    target_driver: B,
    timeout: Duration,
) -> CliResult<LoopbackReport> {
    let started = Instant::now();
    let deadline = started + timeout;

    let host_mux = Arc::new(Mux::new(config.clone()).map_err(|err| mux_error("host mux", err))?);
    let target_mux =
        Arc::new(Mux::new(config.clone()).map_err(|err| mux_error("target mux", err))?);

    let mut lanes = Vec::new();
    for offset in 0..args.channels {
        let id = args.first_channel.checked_add(offset).ok_or_else(|| {
            CliError::new(USAGE, "channel ids overflow u32")
        })?;
        lanes.push(Lane {
            host: host_mux
                .register_default(id)
                .map_err(|err| mux_error("register host channel", err))?,
            target: target_mux
                .register_default(id)
                .map_err(|err| mux_error("register target channel", err))?,
            sent: 0,
            received: 0,
            mismatches: 0,
        });
    }

    let mut host = Session::new(Arc::clone(&host_mux), host_driver);
    let mut target = Session::new(Arc::clone(&target_mux), target_driver);

    for lane in &lanes {
        lane.host
            .open()
            .map_err(|err| channel_error("open", err))?;
    }
    pump_until(&mut host, &mut target, deadline, "connect", || {
        lanes.iter().all(|lane| {
            lane.host.state() == ChannelState::Connected
                && lane.target.state() == ChannelState::Connected
        })
    })?;

    while lanes.iter().any(|lane| lane.received < args.messages) {
        for lane in lanes.iter_mut().filter(|lane| lane.sent < args.messages) {
            let message = pattern(lane.host.id(), lane.sent, args.size);
            match lane.host.send(&message) {
                Ok(()) => lane.sent += 1,
                Err(ChannelError::WouldBlock) => {}
                Err(err) => return Err(channel_error("send", err)),
            }
        }

        step(&mut host, &mut target)?;

        for lane in &mut lanes {
            while let Some(message) = lane
                .target
                .receive()
                .map_err(|err| channel_error("receive", err))?
            {
                let expected = pattern(lane.target.id(), lane.received, args.size);
                if message.as_ref() != expected.as_slice() {
                    lane.mismatches += 1;
                }
                lane.received += 1;
            }
        }

        if Instant::now() >= deadline {
            return Err(CliError::new(TIMEOUT, "loopback transfer timed out"));
        }
    }

    for lane in &lanes {
        lane.host
            .close()
            .map_err(|err| channel_error("close", err))?;
    }
    pump_until(&mut host, &mut target, deadline, "disconnect", || {
        lanes
            .iter()
            .all(|lane| lane.target.state() == ChannelState::Disconnected)
    })?;

    let channels: Vec<ChannelReport> = lanes
        .iter()
        .map(|lane| {
            let sent = lane.host.stats();
            let received = lane.target.stats();
            ChannelReport {
                channel: sent.channel,
                name: channel_name(sent.channel),
                version: sent.version,
                messages_sent: sent.messages_sent,
                messages_received: received.messages_received,
                packets_sent: sent.packets_sent,
                bytes_sent: sent.bytes_sent,
                would_block: sent.would_block,
                mismatches: lane.mismatches,
                host_state: sent.state,
                target_state: received.state,
            }
        })
        .collect();

    let verified = channels
        .iter()
        .all(|c| c.mismatches == 0 && c.messages_received == args.messages as u64);
    let host_stats = host
        .shutdown()
        .map_err(|err| session_error("host shutdown", err))?;
    let target_stats = target
        .shutdown()
        .map_err(|err| session_error("target shutdown", err))?;

    Ok(LoopbackReport {
        link,
        verified,
        elapsed_ms: started.elapsed().as_millis() as u64,
        channels,
        host: host_stats,
        target: target_stats,
    })
}

fn step<A: PacketDriver, B: PacketDriver>(
    host: &mut Session<A>,
    target: &mut Session<B>,
) -> CliResult<usize> {
    let (host_in, host_out) = host
        .run_once()
        .map_err(|err| session_error("host link", err))?;
    let (target_in, target_out) = target
        .run_once()
        .map_err(|err| session_error("target link", err))?;
    Ok(host_in + host_out + target_in + target_out)
}

fn pump_until<A: PacketDriver, B: PacketDriver>(
    host: &mut Session<A>,
    target: &mut Session<B>,
    deadline: Instant,
    phase: &str,
    mut done: impl FnMut() -> bool,
) -> CliResult<()> {
    while !done() {
        step(host, target)?;
        if Instant::now() >= deadline {
            return Err(CliError::new(TIMEOUT, format!("timed out waiting for {phase}")));
        }
    }
    Ok(())
}

/// Deterministic message body, distinct per channel and sequence number.
fn pattern(channel: ChannelId, sequence: usize, size: usize) -> Vec<u8> {
    let seed = channel as usize * 31 + sequence * 7;
    (0..size).map(|i| ((seed + i) % 251) as u8).collect()
}

fn print_report(report: &LoopbackReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(
            &[
                "CHANNEL", "NAME", "VERSION", "SENT", "RECEIVED", "PACKETS", "BYTES", "BLOCKED",
                "STATE",
            ],
            report.channels.iter().map(|c| {
                vec![
                    c.channel.to_string(),
                    c.name.to_string(),
                    c.version.to_string(),
                    c.messages_sent.to_string(),
                    c.messages_received.to_string(),
                    c.packets_sent.to_string(),
                    c.bytes_sent.to_string(),
                    c.would_block.to_string(),
                    format!("{}/{}", c.host_state, c.target_state),
                ]
            }),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "link={} verified={} elapsed_ms={}",
                report.link, report.verified, report.elapsed_ms
            );
            for c in &report.channels {
                println!(
                    "channel={} ({}) version={} sent={} received={} packets={} bytes={} blocked={}",
                    c.channel,
                    c.name,
                    c.version,
                    c.messages_sent,
                    c.messages_received,
                    c.packets_sent,
                    c.bytes_sent,
                    c.would_block
                );
            }
            println!(
                "host packets out={} in={}; target packets out={} in={}",
                report.host.packets_out,
                report.host.packets_in,
                report.target.packets_out,
                report.target.packets_in
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(channels: u32, size: usize, messages: usize) -> LoopbackArgs {
        LoopbackArgs {
            channels,
            first_channel: 256,
            size,
            messages,
            link: LinkKind::Memory,
            timeout: "10s".to_string(),
        }
    }

    #[test]
    fn pattern_differs_per_channel() {
        assert_eq!(pattern(1, 0, 16).len(), 16);
        assert_ne!(pattern(1, 0, 16), pattern(2, 0, 16));
        assert_ne!(pattern(1, 0, 16), pattern(1, 1, 16));
    }

    #[test]
    fn memory_transfer_verifies() {
        let (host, target) = LoopbackDriver::pair();
        let report = transfer(
            "memory",
            &args(3, 5000, 4),
            &MuxConfig::default(),
            host,
            target,
            Duration::from_secs(10),
        )
        .unwrap();

        assert!(report.verified);
        assert_eq!(report.channels.len(), 3);
        for channel in &report.channels {
            assert_eq!(channel.messages_received, 4);
            assert_eq!(channel.version, 2);
            assert_eq!(channel.host_state, ChannelState::Disconnected);
            assert_eq!(channel.target_state, ChannelState::Disconnected);
        }
        assert_eq!(report.host.packets_out, report.target.packets_in);
    }

    #[test]
    fn tiny_windows_still_complete() {
        let config = MuxConfig::default()
            .with_max_body_size(64)
            .with_default_windows(128, 128);
        let (host, target) = LoopbackDriver::pair();
        let report = transfer(
            "memory",
            &args(2, 1000, 3),
            &config,
            host,
            target,
            Duration::from_secs(10),
        )
        .unwrap();

        assert!(report.verified);
        assert!(report.channels.iter().all(|c| c.packets_sent >= 3 * 16));
    }

    #[test]
    fn socket_links_refuse_unbounded_in_flight_data() {
        let mut too_many = args(64, 100, 1);
        too_many.link = LinkKind::Tcp;
        let err = run(too_many, OutputFormat::Json, MuxConfig::default()).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn oversized_messages_are_a_usage_error() {
        let err = run(
            args(1, 64 * 1024 + 1, 1),
            OutputFormat::Json,
            MuxConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
