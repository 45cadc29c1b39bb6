#![cfg(feature = "cli")]

use std::process::{Command, Output};

use bytes::BytesMut;
use linkmux_packet::{encode_packet, MaxDataBody, Packet, PacketType};

fn linkmux(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_linkmux"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .env_remove("LINKMUX_CONFIG")
        .output()
        .expect("linkmux should run")
}

fn to_hex(packet: &Packet) -> String {
    let mut raw = BytesMut::new();
    encode_packet(packet, &mut raw);
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn version_prints_package_version() {
    let output = linkmux(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("linkmux {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_lists_protocol_range() {
    let output = linkmux(&["version", "--extended"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("protocol_versions: 1..=2"));
    assert!(stdout.contains("header_size: 16"));
}

#[test]
fn decode_max_data_as_json() {
    let packet = Packet::new(
        PacketType::MaxData,
        7,
        2,
        MaxDataBody { max_data: 12_288 }.encode(),
    )
    .unwrap();
    let output = linkmux(&["--format", "json", "decode", &to_hex(&packet)]);
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["packet_type"], "MaxData");
    assert_eq!(json["channel"], 7);
    assert_eq!(json["version"], 2);
    assert_eq!(json["body"]["kind"], "max_data");
    assert_eq!(json["body"]["max_data"], 12_288);
}

#[test]
fn decode_rejects_bad_magic() {
    let packet = Packet::new(PacketType::Disconnect, 1, 1, bytes::Bytes::new()).unwrap();
    let hex = format!("00{}", &to_hex(&packet)[2..]);
    let output = linkmux(&["--format", "json", "decode", &hex]);

    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("magic"));
}

#[test]
fn decode_rejects_odd_hex() {
    let output = linkmux(&["decode", "484"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn loopback_over_memory_reports_every_channel() {
    let output = linkmux(&[
        "--format", "json", "loopback", "--channels", "3", "--size", "2000", "--messages", "2",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["link"], "memory");
    assert_eq!(json["verified"], true);
    let channels = json["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 3);
    for channel in channels {
        assert_eq!(channel["messages_received"], 2);
        assert_eq!(channel["mismatches"], 0);
        assert_eq!(channel["target_state"], "disconnected");
    }
}

#[cfg(unix)]
#[test]
fn loopback_over_socket_pair() {
    let output = linkmux(&["--format", "json", "loopback", "--link", "unix", "-n", "2"]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["link"], "unix");
    assert_eq!(json["verified"], true);
}

#[test]
fn loopback_honours_config_file() {
    let dir = std::env::temp_dir().join(format!("linkmux-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("mux.json");
    std::fs::write(&path, r#"{"max_body_size": 128, "max_write_size": 1024}"#).unwrap();
    let config = path.to_string_lossy().to_string();

    let ok = linkmux(&[
        "--format", "json", "--config", &config, "loopback", "--size", "1000",
    ]);
    assert!(ok.status.success());
    let json: serde_json::Value = serde_json::from_slice(&ok.stdout).unwrap();
    // 1000 bytes in 128-byte fragments.
    assert_eq!(json["channels"][0]["packets_sent"], 8);

    let too_big = linkmux(&["--config", &config, "loopback", "--size", "1025"]);
    assert_eq!(too_big.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_config_is_a_usage_error() {
    let dir = std::env::temp_dir().join(format!("linkmux-badcfg-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("mux.json");
    std::fs::write(&path, r#"{"min_version": 3, "max_version": 2}"#).unwrap();

    let output = linkmux(&["--config", &path.to_string_lossy(), "loopback"]);
    assert_eq!(output.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}
