use sqlink_core::{FrameFormat, Packet, PacketType, TAG_SQUARER6};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn tmp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("sqlink-cli-tests");
    fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir.join(name)
}

fn create_test_file(name: &str, content: &[u8]) -> PathBuf {
    let path = tmp_path(name);
    fs::write(&path, content).expect("Failed to write test file");
    path
}

fn run_sqlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sqlink"))
        .args(args)
        .output()
        .expect("Failed to execute sqlink")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_encode_then_decode_fast() {
    let input = create_test_file("fast_payload.bin", b"Track 2 data");
    let wav = tmp_path("fast.wav");

    let output = run_sqlink(&[
        "encode",
        input.to_str().unwrap(),
        wav.to_str().unwrap(),
        "--reader-id",
        "00112233445566ff",
        "--packet-type",
        "7",
        "--hw-major",
        "1",
        "--hw-minor",
        "3",
    ]);
    assert!(output.status.success(), "encode failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Encoded 12 bytes"), "{}", stdout(&output));
    assert!(wav.exists());

    let output = run_sqlink(&["decode", wav.to_str().unwrap()]);
    let text = stdout(&output);
    assert!(output.status.success(), "decode failed: {}", text);
    assert!(text.contains("Success"), "{}", text);
    assert!(text.contains("SQUAREM1"), "{}", text);
    assert!(text.contains("00112233445566ff"), "{}", text);
    assert!(text.contains("Packet type: 7"), "{}", text);
    assert!(text.contains("B3"), "{}", text);
}

#[test]
fn test_decode_json_slow() {
    let input = create_test_file("slow_payload.bin", &[0xDE, 0xAD, 0xBE, 0xEF]);
    let wav = tmp_path("slow.wav");

    let output = run_sqlink(&[
        "encode",
        input.to_str().unwrap(),
        wav.to_str().unwrap(),
        "--link",
        "slow",
        "--tag",
        "SQUARER6",
        "--packet-type-width",
        "2",
        "--packet-type",
        "513",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let output = run_sqlink(&[
        "decode",
        wav.to_str().unwrap(),
        "--link",
        "slow",
        "--json",
        "--packet-type-width",
        "2",
    ]);
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("Invalid JSON");
    assert_eq!(summary["status"], "Success");
    assert_eq!(summary["link"], "sqlink-slow");
    assert_eq!(summary["packet"]["tag"], "SQUARER6");
    assert_eq!(summary["packet"]["packet_type"], 513);
    assert_eq!(summary["packet"]["payload"], "deadbeef");
    assert_eq!(summary["sync_bit_errors"], 0);
    assert_eq!(summary["classified_link"], "sqlink-slow");
}

#[test]
fn test_custom_tag_round_trip() {
    let input = create_test_file("custom_tag_payload.bin", b"custom");
    let wav = tmp_path("custom_tag.wav");

    let output = run_sqlink(&[
        "encode",
        input.to_str().unwrap(),
        wav.to_str().unwrap(),
        "--tag",
        "FOOBAR12",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    // without the tag the decoder rejects the header
    let output = run_sqlink(&["decode", wav.to_str().unwrap(), "--json"]);
    assert!(!output.status.success());

    let output = run_sqlink(&["decode", wav.to_str().unwrap(), "--json", "--tag", "FOOBAR12"]);
    assert!(output.status.success(), "{}", stdout(&output));
    let summary: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("Invalid JSON");
    assert_eq!(summary["packet"]["tag"], "FOOBAR12");
    assert_eq!(summary["classified_link"], "sqlink-fast");
}

#[test]
fn test_decode_wrong_link_fails() {
    let input = create_test_file("mismatch_payload.bin", b"mismatch");
    let wav = tmp_path("mismatch.wav");
    let output = run_sqlink(&["encode", input.to_str().unwrap(), wav.to_str().unwrap()]);
    assert!(output.status.success());

    let output = run_sqlink(&["decode", wav.to_str().unwrap(), "--link", "slow", "--json"]);
    assert!(!output.status.success());
    let summary: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("Invalid JSON");
    assert_ne!(summary["status"], "Success");
    assert!(summary["packet"].is_null());
    assert_eq!(summary["classified_link"], "sqlink-fast");
}

#[test]
fn test_encode_rejects_bad_reader_id() {
    let input = create_test_file("bad_id_payload.bin", b"x");
    let wav = tmp_path("bad_id.wav");
    let output = run_sqlink(&[
        "encode",
        input.to_str().unwrap(),
        wav.to_str().unwrap(),
        "--reader-id",
        "1234",
    ]);
    assert!(!output.status.success());
}

#[test]
fn test_frame_byte_capture() {
    // Two SQUARER6 packets with no payload, garbage in between
    let packet = |packet_type: u32| {
        Packet::new(TAG_SQUARER6, [0u8; 8], PacketType(packet_type), Vec::new())
            .and_then(|p| p.encode(&FrameFormat::default()))
            .unwrap()
    };
    let mut capture = vec![0x11, 0x22, 0x33];
    capture.extend(packet(1));
    capture.extend([0xFF; 5]);
    capture.extend(packet(2));

    let input = create_test_file("capture.bin", &capture);
    let output = run_sqlink(&["frame", input.to_str().unwrap()]);
    let text = stdout(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("Packet 2:"), "{}", text);
    assert!(text.contains("Framed 2 packets"), "{}", text);
    assert!(text.contains("8 bytes discarded"), "{}", text);
}
