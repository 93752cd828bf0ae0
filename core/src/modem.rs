use crate::error::{DecodeStatus, Result, SqLinkError};
use crate::filter::LowPassFilter;
use crate::framing::{FrameFormat, Framer, Packet, PacketHeader};
use crate::fsk::{BitReader, FskBuffers, FskDemodulator, FskModulator};
use crate::hamming;
use crate::link::{LinkEncoding, LinkProfile, LinkType};
use crate::math_util::{find_max, int16_to_scaled_float, mean, median, remove_mean, variance};
use crate::stats::DemodStats;
use crate::sync::{
    find_sync, pattern_bit_errors, reference_correlation, reference_distance, sync_pattern,
    zero_crossing_frequency, LINK_SCORE_THRESHOLD, SYNC_SCORE_THRESHOLD,
};
use crate::{
    CRC_LENGTH, FILTER_TAPS, PACKET_HEADER_TAG_LENGTH, PREAMBLE_BITS, SAMPLE_RATE, TX_AMPLITUDE,
};
use log::debug;
use std::time::Instant;

const INT16_SCALE: f32 = 32768.0;

#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub frame_format: FrameFormat,
    /// Input variance below which the capture is treated as silence
    pub carrier_variance_threshold: f32,
    pub sync_score_threshold: f32,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            frame_format: FrameFormat::default(),
            carrier_variance_threshold: 1e-5,
            sync_score_threshold: SYNC_SCORE_THRESHOLD,
        }
    }
}

/// Result of one [`Modem::demod_and_decode`] call
#[derive(Debug)]
pub struct DecodeOutput {
    pub result: Result<Packet>,
    pub stats: DemodStats,
}

impl DecodeOutput {
    pub fn status(&self) -> DecodeStatus {
        match &self.result {
            Ok(_) => DecodeStatus::Success,
            Err(e) => e.status(),
        }
    }

    pub fn packet(&self) -> Option<&Packet> {
        self.result.as_ref().ok()
    }
}

struct PacketDemodulator {
    profile: LinkProfile,
    filter: LowPassFilter,
    fsk: FskDemodulator,
    modulator: FskModulator,
}

impl PacketDemodulator {
    fn new(link: LinkType) -> Result<Self> {
        let profile = link.profile();
        Ok(Self {
            filter: LowPassFilter::new(FILTER_TAPS, profile.cutoff_hz, SAMPLE_RATE as f32)?,
            fsk: FskDemodulator::new(&profile),
            modulator: FskModulator::new(&profile),
            profile,
        })
    }
}

#[derive(Default)]
struct WorkBuffers {
    scaled: Vec<f32>,
    filtered: Vec<f32>,
    disc: Vec<f32>,
    fsk: FskBuffers,
}

/// Modem control block.
///
/// Holds one demodulator per link type plus the working buffers they share.
/// Buffers are reused between calls but no decode state carries over. A
/// `Modem` belongs to a single receive context; it is deliberately neither
/// `Clone` nor `Default`.
pub struct Modem {
    config: ModemConfig,
    fast: PacketDemodulator,
    slow: PacketDemodulator,
    sync_pattern: Vec<bool>,
    buffers: WorkBuffers,
}

impl Modem {
    /// Set up both demodulators once.
    pub fn init(config: ModemConfig) -> Result<Self> {
        if config.frame_format.tags.is_empty() {
            return Err(SqLinkError::InvalidConfig("no packet tags configured".to_string()));
        }
        Ok(Self {
            config,
            fast: PacketDemodulator::new(LinkType::SqLinkFast)?,
            slow: PacketDemodulator::new(LinkType::SqLinkSlow)?,
            sync_pattern: sync_pattern(),
            buffers: WorkBuffers::default(),
        })
    }

    /// Release the demodulators and their buffers.
    pub fn shutdown(self) {
        debug!(
            "Modem shutdown, releasing {} buffered samples",
            self.buffers.scaled.capacity() + self.buffers.filtered.capacity()
        );
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    fn demodulator(&self, link: LinkType) -> &PacketDemodulator {
        match link {
            LinkType::SqLinkFast => &self.fast,
            LinkType::SqLinkSlow => &self.slow,
        }
    }

    /// Configured frame format with the link's payload ceiling applied
    pub fn frame_format(&self, link: LinkType) -> FrameFormat {
        let mut format = self.config.frame_format.clone();
        format.max_payload_len = format.max_payload_len.min(link.profile().max_payload_len);
        format
    }

    /// Render `packet` as the waveform a reader would send on `link`.
    pub fn modulate(&self, link: LinkType, packet: &Packet) -> Result<Vec<i16>> {
        let format = self.frame_format(link);
        let demod = self.demodulator(link);

        let framed = packet.encode(&format)?;
        let coded = encode_for_link(&framed, format.header_len(), demod.profile.encoding);
        let samples = demod.modulator.modulate(&self.sync_pattern, &coded);

        Ok(samples
            .iter()
            .map(|&s| (s * TX_AMPLITUDE * (INT16_SCALE - 1.0)).round() as i16)
            .collect())
    }

    /// Demodulate and decode one SqLink packet from `samples`.
    ///
    /// Needs at least [`FILTER_TAPS`] samples. Statistics are returned for
    /// every outcome; on failure no packet is produced.
    pub fn demod_and_decode(&mut self, link: LinkType, samples: &[i16]) -> DecodeOutput {
        let start = Instant::now();
        let mut stats = DemodStats::new(link, samples.len());
        let result = self.decode_inner(link, samples, &mut stats);
        stats.runtime = start.elapsed();

        match &result {
            Ok(packet) => debug!(
                "{}: decoded {} packet type {} ({} payload bytes, {} corrections)",
                link,
                packet.header.tag_str(),
                packet.header.packet_type,
                packet.payload.len(),
                stats.hamming_corrections
            ),
            Err(e) => debug!("{}: decode failed: {}", link, e),
        }

        DecodeOutput { result, stats }
    }

    /// Decide which link, if any, `samples` was sent on.
    ///
    /// Each link's sync search runs over the capture and the waveform at the
    /// best alignment is correlated against that link's ideal preamble.
    pub fn classify(&mut self, samples: &[i16]) -> Result<LinkClassification> {
        if samples.len() < FILTER_TAPS {
            return Err(SqLinkError::InsufficientSamples {
                needed: FILTER_TAPS,
                got: samples.len(),
            });
        }

        let Modem {
            config,
            fast,
            slow,
            sync_pattern,
            buffers,
        } = self;
        let level = load_samples(buffers, samples, fast.filter.delay() / 2);
        if level.variance < config.carrier_variance_threshold {
            return Ok(LinkClassification::default());
        }

        let fast_score = link_score(fast, sync_pattern, buffers)?;
        let slow_score = link_score(slow, sync_pattern, buffers)?;
        let classification = LinkClassification::from_scores(fast_score, slow_score);
        debug!(
            "Classified capture as {:?} (fast {:.3}, slow {:.3})",
            classification.link, fast_score, slow_score
        );
        Ok(classification)
    }

    fn decode_inner(
        &mut self,
        link: LinkType,
        samples: &[i16],
        stats: &mut DemodStats,
    ) -> Result<Packet> {
        if samples.len() < FILTER_TAPS {
            return Err(SqLinkError::InsufficientSamples {
                needed: FILTER_TAPS,
                got: samples.len(),
            });
        }

        let format = self.frame_format(link);
        let Modem {
            config,
            fast,
            slow,
            sync_pattern,
            buffers,
        } = self;
        let (demod, other) = match link {
            LinkType::SqLinkFast => (&*fast, &*slow),
            LinkType::SqLinkSlow => (&*slow, &*fast),
        };

        let level = load_samples(buffers, samples, demod.filter.delay() / 2);
        stats.mean = level.mean;
        stats.variance = level.variance;
        if let Some((peak, index)) = level.peak {
            stats.peak_amplitude = peak;
            stats.peak_index = index;
        }

        if stats.variance < config.carrier_variance_threshold {
            return Err(SqLinkError::NoSignal);
        }
        stats.carrier_detected = true;

        // the other link goes first so the work buffers end up holding ours
        let other_score = link_score(other, sync_pattern, buffers)?;

        let t = Instant::now();
        demod.filter.apply(&buffers.scaled, &mut buffers.filtered)?;
        stats.filter_runtime = t.elapsed();

        let t = Instant::now();
        let n = demod.profile.samples_per_bit;
        demod
            .fsk
            .discriminate(&buffers.filtered, &mut buffers.fsk, &mut buffers.disc);
        let sync = find_sync(&buffers.disc, n, sync_pattern);
        stats.sync_runtime = t.elapsed();

        let observed = sync.map(|sync| {
            let sync_end = (sync.index + sync_pattern.len() * n).min(buffers.filtered.len());
            &buffers.filtered[sync.index..sync_end]
        });
        let own_score = observed.map_or(0.0, |observed| {
            reference_correlation(observed, &demod.profile, sync_pattern)
        });
        let classification = match link {
            LinkType::SqLinkFast => LinkClassification::from_scores(own_score, other_score),
            LinkType::SqLinkSlow => LinkClassification::from_scores(other_score, own_score),
        };
        stats.classified_link = classification.link;
        stats.fast_score = classification.fast_score;
        stats.slow_score = classification.slow_score;

        let (sync, observed) = sync.zip(observed).ok_or(SqLinkError::SyncNotFound)?;
        stats.sync_score = sync.score;
        // filtered output is aligned with the input, so this is an input index
        stats.sync_index = Some(sync.index);

        if sync.score < config.sync_score_threshold {
            return Err(SqLinkError::SyncNotFound);
        }

        stats.reference_distance = reference_distance(observed, &demod.profile, sync_pattern);
        let preamble_len = (PREAMBLE_BITS * n).min(observed.len());
        stats.preamble_frequency_hz =
            zero_crossing_frequency(&observed[..preamble_len], SAMPLE_RATE as f32);

        let t = Instant::now();
        let mut reader = BitReader::new(&buffers.disc, sync.index, n);
        let received: Vec<bool> = (0..sync_pattern.len())
            .map_while(|_| reader.next_bit())
            .collect();
        stats.sync_bit_errors = pattern_bit_errors(&received, sync_pattern);

        let result = match demod.profile.encoding {
            LinkEncoding::Raw => read_raw(&mut reader, &format),
            LinkEncoding::Hamming => {
                read_hamming(&mut reader, &format, &mut stats.hamming_corrections)
            }
        };
        stats.demod_runtime = t.elapsed();
        stats.bits_demodulated = reader.bits_read();
        stats.bit_confidence_median = median(reader.confidences());

        result
    }
}

/// Which link a capture was sent on, with the per-link preamble scores
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkClassification {
    /// `None` for noise or silence
    pub link: Option<LinkType>,
    pub fast_score: f32,
    pub slow_score: f32,
}

impl LinkClassification {
    fn from_scores(fast_score: f32, slow_score: f32) -> Self {
        let (link, best) = if fast_score >= slow_score {
            (LinkType::SqLinkFast, fast_score)
        } else {
            (LinkType::SqLinkSlow, slow_score)
        };
        Self {
            link: (best >= LINK_SCORE_THRESHOLD).then_some(link),
            fast_score,
            slow_score,
        }
    }
}

struct SignalLevel {
    mean: f32,
    variance: f32,
    peak: Option<(f32, usize)>,
}

/// Scale `samples` into the work buffer with `pad` zeros on either side so
/// the valid-mode filter output lines up with the input. Statistics cover
/// the capture only.
fn load_samples(buffers: &mut WorkBuffers, samples: &[i16], pad: usize) -> SignalLevel {
    buffers.scaled.clear();
    buffers.scaled.resize(samples.len() + 2 * pad, 0.0);

    let capture = &mut buffers.scaled[pad..pad + samples.len()];
    int16_to_scaled_float(capture, samples, INT16_SCALE);
    let level_mean = mean(capture);
    let level_variance = variance(capture);
    remove_mean(capture);
    SignalLevel {
        mean: level_mean,
        variance: level_variance,
        peak: find_max(capture, 0, capture.len()),
    }
}

/// Filter, discriminate and sync-search the loaded samples for one link,
/// returning the preamble correlation at the best alignment.
fn link_score(
    demod: &PacketDemodulator,
    sync_pattern: &[bool],
    buffers: &mut WorkBuffers,
) -> Result<f32> {
    demod.filter.apply(&buffers.scaled, &mut buffers.filtered)?;
    demod
        .fsk
        .discriminate(&buffers.filtered, &mut buffers.fsk, &mut buffers.disc);

    let n = demod.profile.samples_per_bit;
    Ok(find_sync(&buffers.disc, n, sync_pattern).map_or(0.0, |sync| {
        let sync_end = (sync.index + sync_pattern.len() * n).min(buffers.filtered.len());
        let observed = &buffers.filtered[sync.index..sync_end];
        reference_correlation(observed, &demod.profile, sync_pattern)
    }))
}

/// Apply the link's byte protection to a framed packet.
fn encode_for_link(framed: &[u8], header_len: usize, encoding: LinkEncoding) -> Vec<u8> {
    match encoding {
        LinkEncoding::Raw => framed.to_vec(),
        LinkEncoding::Hamming => {
            let (header, body) = framed.split_at(header_len);
            let mut coded = hamming::encode_stream(header);
            coded.extend(hamming::encode_stream(body));
            coded
        }
    }
}

fn read_raw(reader: &mut BitReader<'_>, format: &FrameFormat) -> Result<Packet> {
    let mut framer = Framer::new(format.clone());
    for count in 1..=format.framed_len(format.max_payload_len as usize) {
        let byte = reader.next_byte().ok_or(SqLinkError::Truncated)?;
        if let Some(outcome) = framer.push(byte).into_iter().next() {
            return outcome;
        }
        // the tag immediately follows the sync word
        if count == PACKET_HEADER_TAG_LENGTH && !framer.in_packet() {
            return Err(SqLinkError::HeaderInvalid("no tag after sync word".to_string()));
        }
    }
    Err(SqLinkError::Truncated)
}

fn read_hamming(
    reader: &mut BitReader<'_>,
    format: &FrameFormat,
    corrections: &mut usize,
) -> Result<Packet> {
    let header_len = format.header_len();
    let coded_header = reader
        .read_bytes(hamming::calc_encoded_length(header_len))
        .ok_or(SqLinkError::Truncated)?;

    let mut framed = vec![0u8; header_len];
    if hamming::decode_block(&coded_header, &mut framed)?.corrected {
        *corrections += 1;
    }
    let header = PacketHeader::parse(&framed, format)?;

    let body_len = header.payload_size as usize + CRC_LENGTH;
    let coded_body = reader
        .read_bytes(hamming::stream_encoded_length(body_len))
        .ok_or(SqLinkError::Truncated)?;
    let (body, body_corrections) = hamming::decode_stream(&coded_body)?;
    *corrections += body_corrections;
    framed.extend_from_slice(&body);

    let mut framer = Framer::new(format.clone());
    for &byte in &framed {
        if let Some(outcome) = framer.push(byte).into_iter().next() {
            return outcome;
        }
    }
    Err(SqLinkError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::PacketType;
    use crate::{GUARD_SAMPLES, TAG_SQUAREM1, TAIL_BITS};

    #[test]
    fn test_insufficient_samples() {
        let mut modem = Modem::init(ModemConfig::default()).unwrap();
        let output = modem.demod_and_decode(LinkType::SqLinkFast, &[1000i16; 128]);
        assert_eq!(output.status(), DecodeStatus::InsufficientSamples);
        assert!(output.packet().is_none());
        assert!(!output.stats.carrier_detected());
        assert_eq!(output.stats.num_samples(), 128);
    }

    #[test]
    fn test_silence_is_no_signal() {
        let mut modem = Modem::init(ModemConfig::default()).unwrap();
        let output = modem.demod_and_decode(LinkType::SqLinkSlow, &vec![0i16; 4096]);
        assert_eq!(output.status(), DecodeStatus::NoSignal);
        assert!(!output.stats.is_probable_signal());
    }

    #[test]
    fn test_modulated_length_per_encoding() {
        let modem = Modem::init(ModemConfig::default()).unwrap();
        let packet = Packet::new(TAG_SQUAREM1, [0u8; 8], PacketType(1), vec![7u8; 40]).unwrap();
        let framed_len = FrameFormat::default().framed_len(40);

        let slow = modem.modulate(LinkType::SqLinkSlow, &packet).unwrap();
        let bits = 48 + framed_len * 8 + TAIL_BITS;
        assert_eq!(slow.len(), bits * 48 + 2 * GUARD_SAMPLES);

        let fast = modem.modulate(LinkType::SqLinkFast, &packet).unwrap();
        let coded_len = hamming::calc_encoded_length(21) + hamming::stream_encoded_length(44);
        let bits = 48 + coded_len * 8 + TAIL_BITS;
        assert_eq!(fast.len(), bits * 12 + 2 * GUARD_SAMPLES);
    }

    #[test]
    fn test_link_payload_ceiling() {
        let modem = Modem::init(ModemConfig::default()).unwrap();
        assert_eq!(modem.frame_format(LinkType::SqLinkSlow).max_payload_len, 256);
        let packet = Packet::new(TAG_SQUAREM1, [0u8; 8], PacketType(1), vec![0u8; 300]).unwrap();
        assert!(matches!(
            modem.modulate(LinkType::SqLinkSlow, &packet),
            Err(SqLinkError::PayloadTooLarge { size: 300, max: 256 })
        ));
        assert!(modem.modulate(LinkType::SqLinkFast, &packet).is_ok());
    }

    #[test]
    fn test_classification_from_scores() {
        let both_weak = LinkClassification::from_scores(0.3, 0.49);
        assert_eq!(both_weak.link, None);
        assert_eq!(LinkClassification::from_scores(0.9, 0.1).link, Some(LinkType::SqLinkFast));
        assert_eq!(LinkClassification::from_scores(0.6, 0.95).link, Some(LinkType::SqLinkSlow));
    }

    #[test]
    fn test_init_rejects_empty_tag_list() {
        let config = ModemConfig {
            frame_format: FrameFormat {
                tags: Vec::new(),
                ..FrameFormat::default()
            },
            ..ModemConfig::default()
        };
        assert!(matches!(Modem::init(config), Err(SqLinkError::InvalidConfig(_))));
    }
}
