//! Multi-channel example: a host and a target sharing one socket pair.
//!
//! The target runs on its own thread and echoes every message back on the
//! channel it arrived on.
//!
//! Run with:
//!   cargo run --example multi-channel

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use linkmux::packet::{PacketConfig, LOG, TELEMETRY};
use linkmux::transport::StreamDriver;
use linkmux::{ChannelError, ChannelState, Mux, MuxConfig, Session};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host_link, target_link) = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| {
            let client = std::net::TcpStream::connect(listener.local_addr()?)?;
            let (server, _) = listener.accept()?;
            Ok((client, server))
        })?;

    let target = thread::spawn(
        move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let mux = Arc::new(Mux::new(MuxConfig::default())?);
            let channels = [mux.register_default(LOG)?, mux.register_default(TELEMETRY)?];
            let mut session = Session::new(
                Arc::clone(&mux),
                StreamDriver::tcp(target_link, PacketConfig::default())?,
            );

            let mut echoed = 0;
            while echoed < 2 {
                session.run_once()?;
                for channel in &channels {
                    if channel.state() != ChannelState::Connected {
                        continue;
                    }
                    if let Some(message) = channel.receive()? {
                        eprintln!(
                            "[target] channel={} payload={}",
                            channel.id(),
                            String::from_utf8_lossy(&message)
                        );
                        channel.send_bytes(message)?;
                        echoed += 1;
                    }
                }
            }
            // Let the echoes and the final credit updates leave.
            for _ in 0..10 {
                session.run_once()?;
            }
            session.shutdown()?;
            Ok(())
        },
    );

    let mux = Arc::new(Mux::new(MuxConfig::default())?);
    let log = mux.register_default(LOG)?;
    let telemetry = mux.register_default(TELEMETRY)?;
    let mut session = Session::new(
        Arc::clone(&mux),
        StreamDriver::tcp(host_link, PacketConfig::default())?,
    );

    log.open()?;
    telemetry.open()?;

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut pending = vec![
        (log.clone(), b"boot complete".to_vec()),
        (telemetry.clone(), b"{\"temp_c\":41}".to_vec()),
    ];
    let mut replies = 0;
    while replies < 2 {
        if Instant::now() > deadline {
            return Err("timed out waiting for echoes".into());
        }
        session.run_once()?;

        pending.retain(|(channel, payload)| match channel.send(payload) {
            Ok(()) => false,
            Err(ChannelError::ChannelClosed(_)) | Err(ChannelError::WouldBlock) => true,
            Err(err) => {
                eprintln!("[host] send failed: {err}");
                false
            }
        });

        for channel in [&log, &telemetry] {
            if channel.state() != ChannelState::Connected {
                continue;
            }
            if let Some(reply) = channel.receive()? {
                eprintln!(
                    "[host] reply on channel {}: {}",
                    channel.id(),
                    String::from_utf8_lossy(&reply)
                );
                replies += 1;
            }
        }
    }

    for channel in [&log, &telemetry] {
        eprintln!("[host] {:?}", channel.stats());
    }

    target
        .join()
        .expect("target thread should not panic")
        .map_err(|err| err.to_string())?;
    session.shutdown()?;
    Ok(())
}
