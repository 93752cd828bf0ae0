use crate::fsk::{bytes_to_bits, FskModulator};
use crate::link::LinkProfile;
use crate::math_util::{average_vector_distance, count_bit_differences};
use crate::{PREAMBLE_BITS, SYNC_WORD};

/// Minimum mean discriminator agreement with the sync pattern
pub const SYNC_SCORE_THRESHOLD: f32 = 0.5;

/// Minimum [`reference_correlation`] for a capture to be attributed to a link
pub const LINK_SCORE_THRESHOLD: f32 = 0.5;

/// Preamble (`1010...`) followed by the sync word, MSB first
pub fn sync_pattern() -> Vec<bool> {
    (0..PREAMBLE_BITS)
        .map(|i| i % 2 == 0)
        .chain(bytes_to_bits(&SYNC_WORD.to_be_bytes()).collect::<Vec<_>>())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncResult {
    /// Discriminator offset of the first preamble bit
    pub index: usize,
    /// Mean agreement in [-1, 1]
    pub score: f32,
}

/// Slide the sync pattern over the discriminator and return the best-matching
/// bit alignment. `None` when the discriminator is shorter than the pattern.
pub fn find_sync(disc: &[f32], samples_per_bit: usize, pattern: &[bool]) -> Option<SyncResult> {
    if pattern.is_empty() {
        return None;
    }
    let span = (pattern.len() - 1) * samples_per_bit;
    if disc.len() <= span {
        return None;
    }

    let scale = 1.0 / pattern.len() as f32;
    let mut best: Option<SyncResult> = None;
    for index in 0..disc.len() - span {
        let score = pattern
            .iter()
            .enumerate()
            .map(|(b, &bit)| {
                let d = disc[index + b * samples_per_bit];
                if bit {
                    d
                } else {
                    -d
                }
            })
            .sum::<f32>()
            * scale;

        if best.map_or(true, |b| score > b.score) {
            best = Some(SyncResult { index, score });
        }
    }
    best
}

/// Bit errors between the received sync bits and the expected pattern
pub fn pattern_bit_errors(received: &[bool], pattern: &[bool]) -> u32 {
    let pack = |bits: &[bool]| -> Vec<u8> {
        bits.chunks(8)
            .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
            .collect()
    };
    pack(received)
        .iter()
        .zip(pack(pattern).iter())
        .map(|(&a, &b)| count_bit_differences(a, b))
        .sum()
}

/// RMS distance between the observed sync waveform and an ideal one, both
/// normalised to unit RMS. Near 0 for a clean capture, about 1.4 for noise.
pub fn reference_distance(observed: &[f32], profile: &LinkProfile, pattern: &[bool]) -> f32 {
    let mut reference = Vec::with_capacity(pattern.len() * profile.samples_per_bit);
    FskModulator::new(profile).modulate_bits(pattern.iter().copied(), &mut reference);

    let len = reference.len().min(observed.len());
    let normalise = |x: &[f32]| -> Vec<f32> {
        let rms = (x.iter().map(|v| v * v).sum::<f32>() / x.len().max(1) as f32).sqrt();
        if rms > 0.0 {
            x.iter().map(|v| v / rms).collect()
        } else {
            x.to_vec()
        }
    };
    average_vector_distance(&normalise(&reference[..len]), &normalise(&observed[..len]))
}

/// Normalised correlation between the observed sync waveform and the ideal
/// one for `profile`, clamped to [0, 1]. Tones of another link or plain noise
/// land near 0.
pub fn reference_correlation(observed: &[f32], profile: &LinkProfile, pattern: &[bool]) -> f32 {
    let distance = reference_distance(observed, profile, pattern);
    (1.0 - distance * distance / 2.0).clamp(0.0, 1.0)
}

/// Dominant frequency over a stretch of signal, from its zero-crossing rate
pub fn zero_crossing_frequency(signal: &[f32], sample_rate: f32) -> f32 {
    if signal.len() < 2 {
        return 0.0;
    }
    let crossings = signal
        .windows(2)
        .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
        .count();
    crossings as f32 * sample_rate / (2.0 * (signal.len() - 1) as f32)
}
