use crate::link::LinkType;
use crate::sync::SYNC_SCORE_THRESHOLD;
use std::time::Duration;

/// Most sync-pattern bit errors still consistent with a real transmission
const MAX_SIGNAL_SYNC_BIT_ERRORS: u32 = 4;

/// Per-decode signal quality record.
///
/// Filled in once by [`crate::Modem::demod_and_decode`] and handed back with
/// the decode result; fields that a failed decode never reached keep their
/// zero values. Read-only outside the modem.
#[derive(Debug, Clone, PartialEq)]
pub struct DemodStats {
    pub(crate) link: LinkType,
    pub(crate) num_samples: usize,
    pub(crate) carrier_detected: bool,
    pub(crate) mean: f32,
    pub(crate) variance: f32,
    pub(crate) peak_amplitude: f32,
    pub(crate) peak_index: usize,
    pub(crate) classified_link: Option<LinkType>,
    pub(crate) fast_score: f32,
    pub(crate) slow_score: f32,
    pub(crate) sync_index: Option<usize>,
    pub(crate) sync_score: f32,
    pub(crate) sync_bit_errors: u32,
    pub(crate) reference_distance: f32,
    pub(crate) preamble_frequency_hz: f32,
    pub(crate) bits_demodulated: usize,
    pub(crate) hamming_corrections: usize,
    pub(crate) bit_confidence_median: f32,
    pub(crate) runtime: Duration,
    pub(crate) filter_runtime: Duration,
    pub(crate) sync_runtime: Duration,
    pub(crate) demod_runtime: Duration,
}

impl DemodStats {
    pub(crate) fn new(link: LinkType, num_samples: usize) -> Self {
        Self {
            link,
            num_samples,
            carrier_detected: false,
            mean: 0.0,
            variance: 0.0,
            peak_amplitude: 0.0,
            peak_index: 0,
            classified_link: None,
            fast_score: 0.0,
            slow_score: 0.0,
            sync_index: None,
            sync_score: 0.0,
            sync_bit_errors: 0,
            reference_distance: 0.0,
            preamble_frequency_hz: 0.0,
            bits_demodulated: 0,
            hamming_corrections: 0,
            bit_confidence_median: 0.0,
            runtime: Duration::ZERO,
            filter_runtime: Duration::ZERO,
            sync_runtime: Duration::ZERO,
            demod_runtime: Duration::ZERO,
        }
    }

    /// Link the decode was asked to use
    pub fn link(&self) -> LinkType {
        self.link
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn carrier_detected(&self) -> bool {
        self.carrier_detected
    }

    /// Mean of the scaled input, before mean removal
    pub fn mean(&self) -> f32 {
        self.mean
    }

    pub fn variance(&self) -> f32 {
        self.variance
    }

    pub fn peak_amplitude(&self) -> f32 {
        self.peak_amplitude
    }

    pub fn peak_index(&self) -> usize {
        self.peak_index
    }

    /// Link whose preamble best matches the capture, `None` for noise
    pub fn classified_link(&self) -> Option<LinkType> {
        self.classified_link
    }

    pub fn fast_score(&self) -> f32 {
        self.fast_score
    }

    pub fn slow_score(&self) -> f32 {
        self.slow_score
    }

    /// Input sample index where the preamble starts
    pub fn sync_index(&self) -> Option<usize> {
        self.sync_index
    }

    pub fn sync_score(&self) -> f32 {
        self.sync_score
    }

    pub fn sync_bit_errors(&self) -> u32 {
        self.sync_bit_errors
    }

    /// RMS distance between the received and ideal sync waveforms
    pub fn reference_distance(&self) -> f32 {
        self.reference_distance
    }

    pub fn preamble_frequency_hz(&self) -> f32 {
        self.preamble_frequency_hz
    }

    pub fn bits_demodulated(&self) -> usize {
        self.bits_demodulated
    }

    /// Hamming blocks that needed a correction
    pub fn hamming_corrections(&self) -> usize {
        self.hamming_corrections
    }

    pub fn bit_confidence_median(&self) -> f32 {
        self.bit_confidence_median
    }

    pub fn runtime(&self) -> Duration {
        self.runtime
    }

    pub fn filter_runtime(&self) -> Duration {
        self.filter_runtime
    }

    pub fn sync_runtime(&self) -> Duration {
        self.sync_runtime
    }

    pub fn demod_runtime(&self) -> Duration {
        self.demod_runtime
    }

    /// Whether the capture looks like a reader transmission rather than noise
    pub fn is_probable_signal(&self) -> bool {
        self.carrier_detected
            && self.sync_index.is_some()
            && self.sync_score >= SYNC_SCORE_THRESHOLD
            && self.sync_bit_errors <= MAX_SIGNAL_SYNC_BIT_ERRORS
    }
}
