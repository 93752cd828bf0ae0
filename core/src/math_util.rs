//! Signal statistics shared by the demodulator and decode scoring

pub fn mean(src: &[f32]) -> f32 {
    if src.is_empty() {
        return 0.0;
    }
    src.iter().sum::<f32>() / src.len() as f32
}

/// Population variance
pub fn variance(src: &[f32]) -> f32 {
    if src.is_empty() {
        return 0.0;
    }
    let m = mean(src);
    src.iter().map(|&x| (x - m) * (x - m)).sum::<f32>() / src.len() as f32
}

pub fn remove_mean(src: &mut [f32]) {
    let m = mean(src);
    for x in src.iter_mut() {
        *x -= m;
    }
}

/// Find the largest value in `src[start..stop]`.
/// Returns the value and its absolute index; `None` for an empty range.
pub fn find_max(src: &[f32], start: usize, stop: usize) -> Option<(f32, usize)> {
    let stop = stop.min(src.len());
    if start >= stop {
        return None;
    }

    let mut best = (src[start], start);
    for (offset, &value) in src[start..stop].iter().enumerate() {
        if value > best.0 {
            best = (value, start + offset);
        }
    }
    Some(best)
}

/// Root-mean-square difference between two vectors over their common length
pub fn average_vector_distance(src1: &[f32], src2: &[f32]) -> f32 {
    let len = src1.len().min(src2.len());
    if len == 0 {
        return 0.0;
    }
    let sum: f32 = src1
        .iter()
        .zip(src2.iter())
        .map(|(&a, &b)| (a - b) * (a - b))
        .sum();
    (sum / len as f32).sqrt()
}

pub fn int16_to_scaled_float(output: &mut [f32], input: &[i16], divide_by: f32) {
    for (out, &sample) in output.iter_mut().zip(input.iter()) {
        *out = sample as f32 / divide_by;
    }
}

pub fn count_bit_differences(a: u8, b: u8) -> u32 {
    (a ^ b).count_ones()
}

/// dest[i] = sqrt(src1[i]^2 + src2[i]^2)
pub fn set_root_sum_of_squares(src1: &[f32], src2: &[f32], dest: &mut [f32]) {
    for ((d, &a), &b) in dest.iter_mut().zip(src1.iter()).zip(src2.iter()) {
        *d = (a * a + b * b).sqrt();
    }
}

/// dest[i] += sqrt(src1[i]^2 + src2[i]^2)
pub fn add_root_sum_of_squares(src1: &[f32], src2: &[f32], dest: &mut [f32]) {
    for ((d, &a), &b) in dest.iter_mut().zip(src1.iter()).zip(src2.iter()) {
        *d += (a * a + b * b).sqrt();
    }
}

/// Ascending sort; NaNs sort last.
pub fn sort(data: &mut [f32]) {
    data.sort_by(|a, b| a.total_cmp(b));
}

/// Median of a scratch copy of `src`
pub fn median(src: &[f32]) -> f32 {
    if src.is_empty() {
        return 0.0;
    }
    let mut scratch = src.to_vec();
    sort(&mut scratch);
    scratch[scratch.len() / 2]
}
