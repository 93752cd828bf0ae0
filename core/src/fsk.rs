use crate::link::LinkProfile;
use crate::math_util::set_root_sum_of_squares;
use crate::{GUARD_SAMPLES, TAIL_BITS};
use std::f64::consts::PI;

// Binary FSK with whole-cycle tones.
//
// Each bit lasts `samples_per_bit` samples and carries `tone0_cycles` or
// `tone1_cycles` complete sine cycles, so every bit starts at phase zero and
// the waveform stays continuous across bit boundaries. Over an aligned bit
// window the two tones are orthogonal.

/// Iterate the bits of `bytes`, most significant bit first
pub fn bytes_to_bits(bytes: &[u8]) -> impl Iterator<Item = bool> + '_ {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |bit| (byte >> bit) & 1 == 1))
}

fn tone_table(cycles: usize, samples_per_bit: usize) -> (Vec<f32>, Vec<f32>) {
    (0..samples_per_bit)
        .map(|j| {
            let phase = 2.0 * PI * (cycles * j) as f64 / samples_per_bit as f64;
            (phase.cos() as f32, phase.sin() as f32)
        })
        .unzip()
}

pub struct FskModulator {
    samples_per_bit: usize,
    tone0: Vec<f32>,
    tone1: Vec<f32>,
}

impl FskModulator {
    pub fn new(profile: &LinkProfile) -> Self {
        let (_, tone0) = tone_table(profile.tone0_cycles, profile.samples_per_bit);
        let (_, tone1) = tone_table(profile.tone1_cycles, profile.samples_per_bit);
        Self {
            samples_per_bit: profile.samples_per_bit,
            tone0,
            tone1,
        }
    }

    /// Append one bit period per bit, unit amplitude.
    pub fn modulate_bits<I>(&self, bits: I, out: &mut Vec<f32>)
    where
        I: IntoIterator<Item = bool>,
    {
        for bit in bits {
            let tone = if bit { &self.tone1 } else { &self.tone0 };
            out.extend_from_slice(tone);
        }
    }

    /// Full transmission: guard silence, sync pattern, coded bytes, tail bits,
    /// guard silence.
    pub fn modulate(&self, sync_pattern: &[bool], coded: &[u8]) -> Vec<f32> {
        let total_bits = sync_pattern.len() + coded.len() * 8 + TAIL_BITS;
        let mut samples = Vec::with_capacity(total_bits * self.samples_per_bit + 2 * GUARD_SAMPLES);

        samples.resize(GUARD_SAMPLES, 0.0);
        self.modulate_bits(sync_pattern.iter().copied(), &mut samples);
        self.modulate_bits(bytes_to_bits(coded), &mut samples);
        self.modulate_bits((0..TAIL_BITS).map(|i| i % 2 == 0), &mut samples);
        samples.resize(samples.len() + GUARD_SAMPLES, 0.0);

        samples
    }
}

/// Non-coherent FSK detector.
///
/// For every sample offset it measures the energy of both tones over the
/// following bit period (sliding I/Q correlation via prefix sums) and reduces
/// them to a discriminator in [-1, 1]: positive favours `1`, negative `0`.
pub struct FskDemodulator {
    samples_per_bit: usize,
    tone0: (Vec<f32>, Vec<f32>),
    tone1: (Vec<f32>, Vec<f32>),
}

/// Scratch space for [`FskDemodulator::discriminate`], owned by the modem
#[derive(Default)]
pub struct FskBuffers {
    prefix_cos: Vec<f64>,
    prefix_sin: Vec<f64>,
    i_sum: Vec<f32>,
    q_sum: Vec<f32>,
    pub mag0: Vec<f32>,
    pub mag1: Vec<f32>,
}

/// Fraction of the strongest tone magnitude below which the discriminator
/// fades to zero
const DISCRIMINATOR_FLOOR: f32 = 0.05;

impl FskDemodulator {
    pub fn new(profile: &LinkProfile) -> Self {
        Self {
            samples_per_bit: profile.samples_per_bit,
            tone0: tone_table(profile.tone0_cycles, profile.samples_per_bit),
            tone1: tone_table(profile.tone1_cycles, profile.samples_per_bit),
        }
    }

    pub fn samples_per_bit(&self) -> usize {
        self.samples_per_bit
    }

    fn tone_magnitudes(
        &self,
        signal: &[f32],
        table: &(Vec<f32>, Vec<f32>),
        buffers: &mut FskBuffers,
        which: usize,
    ) {
        let n = self.samples_per_bit;
        let positions = signal.len() + 1 - n;
        let pc = &mut buffers.prefix_cos;
        let ps = &mut buffers.prefix_sin;

        pc.clear();
        ps.clear();
        pc.push(0.0);
        ps.push(0.0);
        let (mut acc_c, mut acc_s) = (0.0f64, 0.0f64);
        for (i, &x) in signal.iter().enumerate() {
            acc_c += (x * table.0[i % n]) as f64;
            acc_s += (x * table.1[i % n]) as f64;
            pc.push(acc_c);
            ps.push(acc_s);
        }

        buffers.i_sum.clear();
        buffers.q_sum.clear();
        for o in 0..positions {
            buffers.i_sum.push((pc[o + n] - pc[o]) as f32);
            buffers.q_sum.push((ps[o + n] - ps[o]) as f32);
        }

        let mags = if which == 0 {
            &mut buffers.mag0
        } else {
            &mut buffers.mag1
        };
        mags.clear();
        mags.resize(positions, 0.0);
        set_root_sum_of_squares(&buffers.i_sum, &buffers.q_sum, mags);
    }

    /// Fill `out` with one discriminator value per bit-window start offset.
    /// `out` is left empty when the signal is shorter than one bit.
    pub fn discriminate(&self, signal: &[f32], buffers: &mut FskBuffers, out: &mut Vec<f32>) {
        out.clear();
        if signal.len() < self.samples_per_bit {
            return;
        }

        self.tone_magnitudes(signal, &self.tone0, buffers, 0);
        self.tone_magnitudes(signal, &self.tone1, buffers, 1);

        let peak = buffers
            .mag0
            .iter()
            .chain(buffers.mag1.iter())
            .fold(0.0f32, |acc, &m| acc.max(m));
        let floor = peak * DISCRIMINATOR_FLOOR + f32::MIN_POSITIVE;

        out.extend(
            buffers
                .mag0
                .iter()
                .zip(buffers.mag1.iter())
                .map(|(&m0, &m1)| (m1 - m0) / (m1 + m0 + floor)),
        );
    }
}

/// Reads hard bit decisions from a discriminator at a fixed bit spacing.
pub struct BitReader<'a> {
    disc: &'a [f32],
    samples_per_bit: usize,
    next: usize,
    bits_read: usize,
    confidences: Vec<f32>,
}

impl<'a> BitReader<'a> {
    pub fn new(disc: &'a [f32], start: usize, samples_per_bit: usize) -> Self {
        Self {
            disc,
            samples_per_bit,
            next: start,
            bits_read: 0,
            confidences: Vec::new(),
        }
    }

    pub fn next_bit(&mut self) -> Option<bool> {
        let d = *self.disc.get(self.next)?;
        self.next += self.samples_per_bit;
        self.bits_read += 1;
        self.confidences.push(d.abs());
        Some(d > 0.0)
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | self.next_bit()? as u8;
        }
        Some(byte)
    }

    pub fn read_bytes(&mut self, count: usize) -> Option<Vec<u8>> {
        (0..count).map(|_| self.next_byte()).collect()
    }

    pub fn bits_read(&self) -> usize {
        self.bits_read
    }

    /// |discriminator| at every bit decision so far
    pub fn confidences(&self) -> &[f32] {
        &self.confidences
    }
}
