// End-to-end modem tests: modulate a packet, disturb the waveform, decode it.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use sqlink_core::fsk::FskModulator;
use sqlink_core::hamming;
use sqlink_core::sync::sync_pattern;
use sqlink_core::{
    DecodeStatus, FrameFormat, LinkType, Modem, ModemConfig, Packet, PacketType, PacketTypeWidth,
    SqLinkError, GUARD_SAMPLES, TAG_SQUAREM1, TAG_SQUARER6, TX_AMPLITUDE,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn modem() -> Modem {
    init_logging();
    Modem::init(ModemConfig::default()).expect("Failed to init modem")
}

fn test_packet(payload: &[u8]) -> Packet {
    let reader_id = *b"\x01\x02\x03\x04\x05\x06\x07\x08";
    Packet::new(TAG_SQUAREM1, reader_id, PacketType(0x42), payload.to_vec())
        .expect("Failed to build packet")
        .with_hw_rev(2, 5)
}

fn add_noise(samples: &[i16], sigma: f32, seed: u64) -> Vec<i16> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, sigma * 32768.0).unwrap();
    samples
        .iter()
        .map(|&s| (s as f32 + normal.sample(&mut rng)).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

fn noise(len: usize, sigma: f32, seed: u64) -> Vec<i16> {
    add_noise(&vec![0i16; len], sigma, seed)
}

fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * TX_AMPLITUDE * 32767.0).round() as i16)
        .collect()
}

#[test]
fn test_round_trip_both_links() {
    let mut modem = modem();
    for link in [LinkType::SqLinkFast, LinkType::SqLinkSlow] {
        let packet = test_packet(b"4111111111111111=2512");
        let samples = modem.modulate(link, &packet).expect("Failed to modulate");

        let output = modem.demod_and_decode(link, &samples);
        assert_eq!(output.status(), DecodeStatus::Success, "{}: {:?}", link, output.result);
        assert_eq!(output.packet(), Some(&packet));

        let stats = &output.stats;
        assert!(stats.is_probable_signal(), "{:?}", stats);
        assert_eq!(stats.sync_bit_errors(), 0);
        assert_eq!(stats.hamming_corrections(), 0);
        assert!(stats.bit_confidence_median() > 0.5, "{}", stats.bit_confidence_median());
        let sync_index = stats.sync_index().unwrap();
        assert!(
            sync_index.abs_diff(GUARD_SAMPLES) <= 1,
            "{}: sync at {}",
            link,
            sync_index
        );
        assert_eq!(stats.classified_link(), Some(link));
    }
}

#[test]
fn test_decode_without_leading_silence() {
    let mut modem = modem();
    for link in [LinkType::SqLinkFast, LinkType::SqLinkSlow] {
        let packet = test_packet(b"no guard");
        let samples = modem.modulate(link, &packet).unwrap();

        let output = modem.demod_and_decode(link, &samples[GUARD_SAMPLES..]);
        assert_eq!(output.packet(), Some(&packet), "{}: {:?}", link, output.result);
        assert!(output.stats.sync_index().unwrap() <= 2, "{:?}", output.stats);
    }
}

#[test]
fn test_classify_links() {
    let mut modem = modem();
    let packet = test_packet(b"which link");
    for link in [LinkType::SqLinkFast, LinkType::SqLinkSlow] {
        let samples = modem.modulate(link, &packet).unwrap();
        let classification = modem.classify(&samples).unwrap();
        assert_eq!(classification.link, Some(link), "{:?}", classification);

        let (own, other) = match link {
            LinkType::SqLinkFast => (classification.fast_score, classification.slow_score),
            LinkType::SqLinkSlow => (classification.slow_score, classification.fast_score),
        };
        assert!(own > 0.8, "{}: {:?}", link, classification);
        assert!(other < 0.5, "{}: {:?}", link, classification);
    }
}

#[test]
fn test_classify_noise_and_silence() {
    let mut modem = modem();
    let classification = modem.classify(&noise(20_000, 0.1, 5)).unwrap();
    assert_eq!(classification.link, None, "{:?}", classification);

    let classification = modem.classify(&vec![0i16; 4096]).unwrap();
    assert_eq!(classification.link, None);
    assert_eq!(classification.fast_score, 0.0);

    assert!(matches!(
        modem.classify(&[0i16; 64]),
        Err(SqLinkError::InsufficientSamples { needed: 129, got: 64 })
    ));
}

#[test]
fn test_empty_payload_round_trip() {
    let mut modem = modem();
    let packet = Packet::new(TAG_SQUARER6, [0u8; 8], PacketType(0), Vec::new()).unwrap();
    for link in [LinkType::SqLinkFast, LinkType::SqLinkSlow] {
        let samples = modem.modulate(link, &packet).unwrap();
        let output = modem.demod_and_decode(link, &samples);
        assert_eq!(output.packet(), Some(&packet), "{}", link);
    }
}

#[test]
fn test_large_payloads() {
    let mut modem = modem();
    let payload: Vec<u8> = (0..256u32).map(|i| (i * 7 + 3) as u8).collect();

    let packet = test_packet(&payload);
    let samples = modem.modulate(LinkType::SqLinkSlow, &packet).unwrap();
    let output = modem.demod_and_decode(LinkType::SqLinkSlow, &samples);
    assert_eq!(output.packet(), Some(&packet));

    let packet = test_packet(&[payload.as_slice(), payload.as_slice()].concat());
    let samples = modem.modulate(LinkType::SqLinkFast, &packet).unwrap();
    let output = modem.demod_and_decode(LinkType::SqLinkFast, &samples);
    assert_eq!(output.packet(), Some(&packet));
}

#[test]
fn test_decode_after_leading_noise() {
    let mut modem = modem();
    let lead = 1500;
    for (seed, link) in [(7, LinkType::SqLinkFast), (11, LinkType::SqLinkSlow)] {
        let packet = test_packet(b"swipe");
        let mut samples = noise(lead, 0.05, seed);
        samples.extend(modem.modulate(link, &packet).unwrap());
        let samples = add_noise(&samples, 0.02, seed + 1);

        let output = modem.demod_and_decode(link, &samples);
        assert_eq!(output.packet(), Some(&packet), "{}: {:?}", link, output.result);
        let sync_index = output.stats.sync_index().unwrap();
        assert!(
            sync_index.abs_diff(lead + GUARD_SAMPLES) <= 3,
            "{}: sync at {}",
            link,
            sync_index
        );
    }
}

#[test]
fn test_silence_reports_no_signal() {
    let mut modem = modem();
    let output = modem.demod_and_decode(LinkType::SqLinkFast, &vec![0i16; 10_000]);
    assert_eq!(output.status(), DecodeStatus::NoSignal);
    assert!(output.packet().is_none());
    assert!(!output.stats.carrier_detected());
}

#[test]
fn test_noise_only_is_corrupt() {
    let mut modem = modem();
    let output = modem.demod_and_decode(LinkType::SqLinkSlow, &noise(20_000, 0.1, 3));
    assert_eq!(output.status(), DecodeStatus::Corrupt);
    assert!(output.packet().is_none());
    assert!(output.stats.carrier_detected());
    assert_eq!(output.stats.classified_link(), None);
}

#[test]
fn test_short_capture_is_insufficient() {
    let mut modem = modem();
    let packet = test_packet(b"x");
    let samples = modem.modulate(LinkType::SqLinkFast, &packet).unwrap();

    let output = modem.demod_and_decode(LinkType::SqLinkFast, &samples[..128]);
    assert_eq!(output.status(), DecodeStatus::InsufficientSamples);
    assert!(matches!(
        output.result,
        Err(SqLinkError::InsufficientSamples { needed: 129, got: 128 })
    ));
    assert!(output.packet().is_none());
}

#[test]
fn test_truncated_capture_is_corrupt() {
    let mut modem = modem();
    for link in [LinkType::SqLinkFast, LinkType::SqLinkSlow] {
        let samples = modem.modulate(link, &test_packet(&[0x5A; 64])).unwrap();
        let output = modem.demod_and_decode(link, &samples[..samples.len() / 2]);
        assert_eq!(output.status(), DecodeStatus::Corrupt, "{}", link);
        assert!(matches!(output.result, Err(SqLinkError::Truncated)), "{:?}", output.result);
    }
}

fn modulate_with_flipped_bit(link: LinkType, packet: &Packet, byte: usize, mask: u8) -> Vec<i16> {
    let format = FrameFormat::default();
    let framed = packet.encode(&format).unwrap();
    let (header, body) = framed.split_at(format.header_len());

    let mut coded = match link {
        LinkType::SqLinkFast => {
            let mut coded = hamming::encode_stream(header);
            coded.extend(hamming::encode_stream(body));
            coded
        }
        LinkType::SqLinkSlow => framed.clone(),
    };
    coded[byte] ^= mask;

    let modulator = FskModulator::new(&link.profile());
    to_i16(&modulator.modulate(&sync_pattern(), &coded))
}

#[test]
fn test_hamming_corrects_bit_error_on_fast_link() {
    let mut modem = modem();
    let packet = test_packet(b"corrected on air");

    // one error in the header block, one in the first body block
    let header_block = hamming::calc_encoded_length(21);
    let mut samples = modulate_with_flipped_bit(LinkType::SqLinkFast, &packet, 3, 0x04);
    let clean = modem.modulate(LinkType::SqLinkFast, &packet).unwrap();
    assert_eq!(samples.len(), clean.len());

    let output = modem.demod_and_decode(LinkType::SqLinkFast, &samples);
    assert_eq!(output.packet(), Some(&packet));
    assert_eq!(output.stats.hamming_corrections(), 1);

    samples = modulate_with_flipped_bit(LinkType::SqLinkFast, &packet, header_block + 5, 0x80);
    let output = modem.demod_and_decode(LinkType::SqLinkFast, &samples);
    assert_eq!(output.packet(), Some(&packet));
    assert_eq!(output.stats.hamming_corrections(), 1);
}

#[test]
fn test_bit_error_on_slow_link_fails_crc() {
    let mut modem = modem();
    let packet = test_packet(b"no fec here");
    let samples = modulate_with_flipped_bit(LinkType::SqLinkSlow, &packet, 24, 0x01);

    let output = modem.demod_and_decode(LinkType::SqLinkSlow, &samples);
    assert_eq!(output.status(), DecodeStatus::Corrupt);
    assert!(matches!(output.result, Err(SqLinkError::BadCrc { .. })), "{:?}", output.result);
}

#[test]
fn test_corrupted_tag_is_header_invalid() {
    let mut modem = modem();
    let samples = modulate_with_flipped_bit(LinkType::SqLinkSlow, &test_packet(b"tag"), 0, 0x20);
    let output = modem.demod_and_decode(LinkType::SqLinkSlow, &samples);
    assert!(matches!(output.result, Err(SqLinkError::HeaderInvalid(_))), "{:?}", output.result);
}

#[test]
fn test_preamble_statistics() {
    let mut modem = modem();
    for link in [LinkType::SqLinkFast, LinkType::SqLinkSlow] {
        let profile = link.profile();
        let samples = modem.modulate(link, &test_packet(b"stats")).unwrap();
        let stats = modem.demod_and_decode(link, &samples).stats;

        assert!(
            stats.preamble_frequency_hz() > profile.tone0_hz()
                && stats.preamble_frequency_hz() < profile.tone1_hz(),
            "{}: {} Hz",
            link,
            stats.preamble_frequency_hz()
        );
        assert!(stats.reference_distance() < 0.5, "{}: {}", link, stats.reference_distance());
        assert!(stats.peak_amplitude() > 0.4 && stats.peak_amplitude() <= 0.5);
        assert!(stats.mean().abs() < 0.01);
        assert!(stats.bits_demodulated() >= 48);
    }
}

#[test]
fn test_wider_packet_type() {
    init_logging();
    let config = ModemConfig {
        frame_format: FrameFormat {
            packet_type_width: PacketTypeWidth::U32,
            ..FrameFormat::default()
        },
        ..ModemConfig::default()
    };
    let mut modem = Modem::init(config).unwrap();
    let packet =
        Packet::new(TAG_SQUAREM1, [9u8; 8], PacketType(0xDEAD_BEEF), b"wide".to_vec()).unwrap();

    for link in [LinkType::SqLinkFast, LinkType::SqLinkSlow] {
        let samples = modem.modulate(link, &packet).unwrap();
        let output = modem.demod_and_decode(link, &samples);
        assert_eq!(output.packet(), Some(&packet), "{}", link);
    }
    modem.shutdown();
}

#[test]
fn test_modem_is_reusable_between_links() {
    let mut modem = modem();
    let fast = test_packet(b"first");
    let slow = test_packet(b"second, longer");

    let fast_samples = modem.modulate(LinkType::SqLinkFast, &fast).unwrap();
    let slow_samples = modem.modulate(LinkType::SqLinkSlow, &slow).unwrap();

    for _ in 0..2 {
        let output = modem.demod_and_decode(LinkType::SqLinkSlow, &slow_samples);
        assert_eq!(output.packet(), Some(&slow));
        let output = modem.demod_and_decode(LinkType::SqLinkFast, &fast_samples);
        assert_eq!(output.packet(), Some(&fast));
    }
}
