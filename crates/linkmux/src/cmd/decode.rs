use bytes::Bytes;
use linkmux_packet::channel::channel_name;
use linkmux_packet::{
    decode_packet, ConnectBody, ConnectResponseBody, ErrorBody, MaxDataBody, Packet, PacketType,
};
use serde::Serialize;

use crate::cmd::DecodeArgs;
use crate::exit::{packet_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{payload_preview, print_json, print_raw, print_table, OutputFormat};

#[derive(Serialize)]
struct DecodedPacket {
    packet_type: &'static str,
    type_code: u8,
    flags: u8,
    more_fragments: bool,
    version: i16,
    channel: u32,
    channel_name: &'static str,
    body_size: usize,
    body: Body,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Body {
    Data {
        preview: String,
    },
    Connect {
        max_version: i16,
        min_version: i16,
        receive_window: u32,
    },
    ConnectResponse {
        version: i16,
        receive_window: u32,
    },
    Disconnect,
    MaxData {
        max_data: u64,
    },
    Error {
        code: u32,
        reason: &'static str,
    },
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let raw = parse_hex(&args.hex)?;
    let packet = decode_packet(&raw).map_err(|err| packet_error("decode", err))?;

    if matches!(format, OutputFormat::Raw) {
        print_raw(packet.payload());
        return Ok(SUCCESS);
    }

    let decoded = describe(&packet)?;
    match format {
        OutputFormat::Json => print_json(&decoded),
        OutputFormat::Table => print_table(
            &["FIELD", "VALUE"],
            fields(&decoded)
                .into_iter()
                .map(|(name, value)| vec![name.to_string(), value]),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for (name, value) in fields(&decoded) {
                println!("{name:>15}: {value}");
            }
        }
    }
    Ok(SUCCESS)
}

fn describe(packet: &Packet) -> CliResult<DecodedPacket> {
    let payload = packet.payload();
    let body = match packet.packet_type() {
        PacketType::Data => Body::Data {
            preview: payload_preview(payload),
        },
        PacketType::Connect => {
            let body = ConnectBody::decode(payload).map_err(|err| packet_error("body", err))?;
            Body::Connect {
                max_version: body.max_version,
                min_version: body.min_version,
                receive_window: body.receive_window,
            }
        }
        PacketType::ConnectResponse => {
            let body =
                ConnectResponseBody::decode(payload).map_err(|err| packet_error("body", err))?;
            Body::ConnectResponse {
                version: body.version,
                receive_window: body.receive_window,
            }
        }
        PacketType::Disconnect => Body::Disconnect,
        PacketType::MaxData => {
            let body = MaxDataBody::decode(payload).map_err(|err| packet_error("body", err))?;
            Body::MaxData {
                max_data: body.max_data,
            }
        }
        PacketType::Error => {
            let body = ErrorBody::decode(payload).map_err(|err| packet_error("body", err))?;
            Body::Error {
                code: body.code,
                reason: error_reason(body.code),
            }
        }
    };

    Ok(DecodedPacket {
        packet_type: packet.packet_type().name(),
        type_code: packet.packet_type().code(),
        flags: packet.flags(),
        more_fragments: packet.has_more_fragments(),
        version: packet.version(),
        channel: packet.channel_id(),
        channel_name: channel_name(packet.channel_id()),
        body_size: packet.body_size(),
        body,
    })
}

fn fields(decoded: &DecodedPacket) -> Vec<(&'static str, String)> {
    let mut out = vec![
        ("type", format!("{} ({})", decoded.packet_type, decoded.type_code)),
        ("flags", format!("0x{:02x}", decoded.flags)),
        ("version", decoded.version.to_string()),
        (
            "channel",
            format!("{} ({})", decoded.channel, decoded.channel_name),
        ),
        ("body_size", decoded.body_size.to_string()),
    ];
    match &decoded.body {
        Body::Data { preview } => {
            out.push(("more_fragments", decoded.more_fragments.to_string()));
            out.push(("payload", preview.clone()));
        }
        Body::Connect {
            max_version,
            min_version,
            receive_window,
        } => {
            out.push(("versions", format!("{min_version}..={max_version}")));
            out.push(("receive_window", receive_window.to_string()));
        }
        Body::ConnectResponse {
            version,
            receive_window,
        } => {
            out.push(("negotiated", version.to_string()));
            out.push(("receive_window", receive_window.to_string()));
        }
        Body::Disconnect => {}
        Body::MaxData { max_data } => out.push(("max_data", max_data.to_string())),
        Body::Error { code, reason } => out.push(("error", format!("{code} ({reason})"))),
    }
    out
}

fn error_reason(code: u32) -> &'static str {
    match code {
        ErrorBody::VERSION_MISMATCH => "version mismatch",
        ErrorBody::PROTOCOL_VIOLATION => "protocol violation",
        ErrorBody::WINDOW_EXCEEDED => "window exceeded",
        _ => "unknown",
    }
}

fn parse_hex(input: &str) -> CliResult<Bytes> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(DATA_INVALID, "hex input has an odd length"));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| {
                CliError::new(
                    DATA_INVALID,
                    format!("invalid hex at offset {i}: {}", &digits[i..i + 2]),
                )
            })
        })
        .collect::<CliResult<Vec<u8>>>()
        .map(Bytes::from)
}
