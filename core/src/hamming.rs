use crate::error::{Result, SqLinkError};
use crate::{HAMMING_MAX_DATA_TO_ENCODE_LENGTH, HAMMING_MAX_ENCODED_DATA_LENGTH};

// Block layout: data bytes followed by a single parity byte.
//
// Data bits (MSB first) occupy the non-power-of-two positions 3, 5, 6, 7, 9...
// of a virtual Hamming codeword. Check bit i covers every position with bit i
// set, so the check bits are simply the XOR of the positions of all set data
// bits. Blocks of up to 15 bytes need at most 7 check bits; the top bit of the
// parity byte then carries overall parity (SECDED). Longer blocks use all 8
// bits for the syndrome (SEC only).

/// Overall parity bit in SECDED blocks
const OVERALL_PARITY_BIT: u8 = 0x80;

/// Largest check-bit count that still leaves room for overall parity
const SECDED_MAX_CHECK_BITS: u32 = 7;

/// Result of decoding a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Number of data bytes written
    pub len: usize,
    /// A single-bit error was found and repaired
    pub corrected: bool,
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    check_bits: u32,
    secded: bool,
}

impl Layout {
    fn for_len(data_len: usize) -> Self {
        let data_bits = data_len * 8;
        let mut check_bits = 1u32;
        while (1usize << check_bits) < data_bits + check_bits as usize + 1 {
            check_bits += 1;
        }
        Self {
            check_bits,
            secded: check_bits <= SECDED_MAX_CHECK_BITS,
        }
    }

    fn check_mask(&self) -> u8 {
        ((1u16 << self.check_bits) - 1) as u8
    }

    fn spare_mask(&self) -> u8 {
        if self.secded {
            !(self.check_mask() | OVERALL_PARITY_BIT)
        } else {
            0
        }
    }
}

pub fn calc_encoded_length(unencoded_length: usize) -> usize {
    if unencoded_length == 0 {
        0
    } else {
        unencoded_length + 1
    }
}

pub fn calc_unencoded_length(encoded_length: usize) -> usize {
    encoded_length.saturating_sub(1)
}

/// XOR of the codeword positions of every set data bit
fn position_syndrome(data: &[u8]) -> usize {
    let mut acc = 0usize;
    let mut pos = 2usize;
    for &byte in data {
        for bit in (0..8).rev() {
            pos += 1;
            while pos.is_power_of_two() {
                pos += 1;
            }
            if (byte >> bit) & 1 == 1 {
                acc ^= pos;
            }
        }
    }
    acc
}

fn ones(data: &[u8]) -> u32 {
    data.iter().map(|b| b.count_ones()).sum()
}

fn check_block_len(len: usize) -> Result<()> {
    if len > HAMMING_MAX_DATA_TO_ENCODE_LENGTH {
        return Err(SqLinkError::BlockTooLarge {
            len,
            max: HAMMING_MAX_DATA_TO_ENCODE_LENGTH,
        });
    }
    Ok(())
}

/// Compute the parity byte for a block without encoding it.
pub fn generate_parity_bits(data: &[u8]) -> Result<u8> {
    check_block_len(data.len())?;
    if data.is_empty() {
        return Ok(0);
    }

    let layout = Layout::for_len(data.len());
    let check = position_syndrome(data) as u8 & layout.check_mask();
    if layout.secded && (ones(data) + check.count_ones()) % 2 == 1 {
        Ok(check | OVERALL_PARITY_BIT)
    } else {
        Ok(check)
    }
}

/// Flip the data bit a non-zero syndrome points at.
/// Syndromes naming a check bit leave the data untouched.
fn repair(data: &mut [u8], syndrome: usize) -> Result<()> {
    if syndrome.is_power_of_two() {
        return Ok(());
    }
    let index = syndrome - syndrome.ilog2() as usize - 2;
    if index >= data.len() * 8 {
        return Err(SqLinkError::HammingUncorrectable);
    }
    data[index / 8] ^= 0x80 >> (index % 8);
    Ok(())
}

/// Check `data` against its expected parity byte, repairing a single-bit
/// error in place.
///
/// Returns `Ok(true)` if a bit was corrected (in the data or in the parity
/// byte), `Ok(false)` if the block was clean. Double errors in blocks of up to
/// 15 bytes are always reported as `HammingUncorrectable`; longer blocks only
/// detect them when the syndrome names no codeword position.
pub fn correct_data(data: &mut [u8], parity_bits: u8) -> Result<bool> {
    check_block_len(data.len())?;
    if data.is_empty() {
        return Ok(false);
    }

    let layout = Layout::for_len(data.len());
    let mask = layout.check_mask();
    let syndrome = ((position_syndrome(data) as u8) ^ parity_bits) & mask;

    if !layout.secded {
        if syndrome == 0 {
            return Ok(false);
        }
        repair(data, syndrome as usize)?;
        return Ok(true);
    }

    let spare = (parity_bits & layout.spare_mask()).count_ones();
    let overall_mismatch =
        (ones(data) + (parity_bits & (mask | OVERALL_PARITY_BIT)).count_ones()) % 2 == 1;

    match (spare, syndrome, overall_mismatch) {
        (0, 0, false) => Ok(false),
        // overall parity bit flipped
        (0, 0, true) => Ok(true),
        (0, s, true) => {
            repair(data, s as usize)?;
            Ok(true)
        }
        // a spare bit flipped
        (1, 0, false) => Ok(true),
        _ => Err(SqLinkError::HammingUncorrectable),
    }
}

/// Encode one block into `encoded`, returning the number of bytes written.
pub fn encode_block(data: &[u8], encoded: &mut [u8]) -> Result<usize> {
    check_block_len(data.len())?;
    let needed = calc_encoded_length(data.len());
    if encoded.len() < needed {
        return Err(SqLinkError::BufferTooSmall {
            needed,
            capacity: encoded.len(),
        });
    }
    if data.is_empty() {
        return Ok(0);
    }

    encoded[..data.len()].copy_from_slice(data);
    encoded[data.len()] = generate_parity_bits(data)?;
    Ok(needed)
}

/// Decode one block into `decoded`, correcting a single-bit error.
/// Nothing is written to `decoded` when the block is uncorrectable.
pub fn decode_block(encoded: &[u8], decoded: &mut [u8]) -> Result<Decoded> {
    if encoded.len() > HAMMING_MAX_ENCODED_DATA_LENGTH {
        return Err(SqLinkError::BlockTooLarge {
            len: encoded.len(),
            max: HAMMING_MAX_ENCODED_DATA_LENGTH,
        });
    }
    // a parity byte needs at least one data byte in front of it
    if encoded.len() == 1 {
        return Err(SqLinkError::Truncated);
    }
    let len = calc_unencoded_length(encoded.len());
    if decoded.len() < len {
        return Err(SqLinkError::BufferTooSmall {
            needed: len,
            capacity: decoded.len(),
        });
    }
    if len == 0 {
        return Ok(Decoded { len: 0, corrected: false });
    }

    let mut block = [0u8; HAMMING_MAX_DATA_TO_ENCODE_LENGTH];
    block[..len].copy_from_slice(&encoded[..len]);
    let corrected = correct_data(&mut block[..len], encoded[len])?;
    decoded[..len].copy_from_slice(&block[..len]);

    Ok(Decoded { len, corrected })
}

/// Encoded size of `len` bytes split into maximum-size blocks
pub fn stream_encoded_length(len: usize) -> usize {
    let full = len / HAMMING_MAX_DATA_TO_ENCODE_LENGTH;
    let rem = len % HAMMING_MAX_DATA_TO_ENCODE_LENGTH;
    full * HAMMING_MAX_ENCODED_DATA_LENGTH + calc_encoded_length(rem)
}

/// Encode an arbitrary-length buffer as consecutive 30-byte blocks.
pub fn encode_stream(data: &[u8]) -> Vec<u8> {
    let mut encoded = vec![0u8; stream_encoded_length(data.len())];
    let mut offset = 0;
    for chunk in data.chunks(HAMMING_MAX_DATA_TO_ENCODE_LENGTH) {
        // chunk length and capacity are bounded by construction
        if let Ok(written) = encode_block(chunk, &mut encoded[offset..]) {
            offset += written;
        }
    }
    encoded
}

/// Decode a buffer produced by [`encode_stream`].
/// Returns the data and the number of blocks that needed correction.
pub fn decode_stream(encoded: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut data = Vec::with_capacity(encoded.len());
    let mut corrections = 0;
    let mut block = [0u8; HAMMING_MAX_DATA_TO_ENCODE_LENGTH];

    for chunk in encoded.chunks(HAMMING_MAX_ENCODED_DATA_LENGTH) {
        let decoded = decode_block(chunk, &mut block)?;
        if decoded.corrected {
            corrections += 1;
        }
        data.extend_from_slice(&block[..decoded.len]);
    }

    Ok((data, corrections))
}
