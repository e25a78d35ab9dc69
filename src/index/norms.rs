//! Length normalization factors and their one-byte encoding.
//!
//! Each indexed field of each document gets one norm byte:
//! `encode_norm(field_boost * length_norm(field, token_count))`. The byte is
//! a tiny float with a 3-bit mantissa and a 5-bit exponent, so it covers a
//! wide range with roughly one significant digit of precision. Zero encodes
//! as zero; values too large or too small clamp to the extremes.

use std::fmt::Debug;

/// Scoring hooks consumed at indexing time.
pub trait Similarity: Send + Sync + Debug {
    /// Normalization factor for a field holding `num_tokens` tokens.
    fn length_norm(&self, field: &str, num_tokens: u32) -> f32;
}

/// `1 / sqrt(num_tokens)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSimilarity;

impl Similarity for DefaultSimilarity {
    fn length_norm(&self, _field: &str, num_tokens: u32) -> f32 {
        if num_tokens == 0 {
            return 0.0;
        }
        1.0 / (num_tokens as f32).sqrt()
    }
}

/// Encode a non-negative float into one byte.
pub fn encode_norm(value: f32) -> u8 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    let bits = value.to_bits();
    let mantissa = (bits & 0x00ff_ffff) >> 21;
    let exponent = (((bits >> 24) & 0x7f) as i32 - 63) + 15;

    if exponent > 31 {
        return 0xff;
    }
    if exponent < 0 {
        return 1;
    }
    ((exponent as u32) << 3 | mantissa) as u8
}

/// Decode a norm byte.
pub fn decode_norm(byte: u8) -> f32 {
    NORM_TABLE[byte as usize]
}

fn decode_norm_bits(byte: u8) -> f32 {
    if byte == 0 {
        return 0.0;
    }
    let mantissa = (byte & 7) as u32;
    let exponent = ((byte >> 3) & 31) as u32;
    let bits = ((exponent + (63 - 15)) << 24) | (mantissa << 21);
    f32::from_bits(bits)
}

static NORM_TABLE: std::sync::LazyLock<[f32; 256]> = std::sync::LazyLock::new(|| {
    let mut table = [0.0f32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = decode_norm_bits(i as u8);
    }
    table
});
