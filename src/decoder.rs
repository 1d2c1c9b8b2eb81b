//! Frame decoder for scale notification payloads.
//!
//! Scales in the field speak at least four incompatible dialects over the
//! same notify characteristic: ASCII status lines with units ("ST,GS,+
//! 12.34KG"), the 16-bit flags+weight binary layout, a raw IEEE-754 float in
//! either byte order, and short control/acknowledgement frames that carry no
//! weight at all. `decode_frame` tries them in a fixed order and returns the
//! first plausible weight, normalized to kilograms.
//!
//! This module is a pure function of its input: no I/O, no state. Callers
//! must treat a decode failure as transient noise, not a fault.

use crate::config::Tunables;
use thiserror::Error;

/// Pounds to kilograms.
pub const LB_TO_KG: f64 = 0.453592;

/// Why a payload did not produce a weight.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Short frame of control characters or tiny integers; a protocol
    /// acknowledgement, not weight data.
    #[error("control frame, not a weight")]
    ControlFrame,
    /// A number was parsed but lies outside the plausible weight range.
    #[error("weight {0} kg outside plausible range")]
    OutOfRange(f64),
    /// No decode method produced an in-bounds weight.
    #[error("unrecognized weight frame ({0} bytes)")]
    Unrecognized(usize),
}

/// Decode a notification payload into a weight in kilograms, using the
/// default [`Tunables`] bounds.
pub fn decode_frame(data: &[u8]) -> Result<f64, FrameError> {
    decode_frame_with(data, &Tunables::default())
}

/// Decode a notification payload using the caller's bounds and resolution.
///
/// Attempt order, first success wins:
/// 1. control-byte filter (reject, see [`FrameError::ControlFrame`])
/// 2. ASCII text: Toledo/Mettler `...KG`, then `<number> kg|g|lb`, then a
///    bare numeric string
/// 3. for exactly 4 bytes: IEEE-754 f32, little-endian then big-endian
/// 4. 16-bit layout: flags byte (bit 0 = imperial) + little-endian u16 at
///    `binary_resolution_kg` per count
///
/// A payload that reads as printable text is settled by the ASCII stage one
/// way or the other; re-interpreting the character bytes as a binary layout
/// only ever produces nonsense. Likewise the f32 attempt runs before the
/// 16-bit layout so that a 4-byte float is never mis-read as flags+u16.
pub fn decode_frame_with(data: &[u8], tunables: &Tunables) -> Result<f64, FrameError> {
    let in_bounds = |w: f64| w > tunables.min_weight_kg && w < tunables.max_weight_kg;

    if is_control_frame(data) {
        return Err(FrameError::ControlFrame);
    }

    // ASCII dialects. Sign indicates direction on these scales, not
    // validity, so the magnitude is what gets bounds-checked and returned.
    if let Ok(text) = std::str::from_utf8(data) {
        let text = text.trim();
        if text.len() > 3 && text.chars().all(|c| c.is_ascii_graphic() || c.is_whitespace()) {
            let parsed = parse_kg_suffixed(text)
                .or_else(|| parse_unit_suffixed(text))
                .or_else(|| parse_bare_number(text));
            return match parsed {
                Some(kg) if in_bounds(kg.abs()) => Ok(kg.abs()),
                Some(kg) => Err(FrameError::OutOfRange(kg.abs())),
                None => Err(FrameError::Unrecognized(data.len())),
            };
        }
    }

    // Raw f32, both byte orders. Only meaningful when the float is the
    // entire payload.
    if data.len() == 4 {
        let quad: [u8; 4] = data.try_into().unwrap_or_default();
        for w in [
            f64::from(f32::from_le_bytes(quad)),
            f64::from(f32::from_be_bytes(quad)),
        ] {
            if w.is_finite() && in_bounds(w) {
                return Ok(w);
            }
        }
    }

    // 16-bit flags+weight layout (Weight Scale Service shape).
    if data.len() >= 3 {
        let imperial = data[0] & 0x01 != 0;
        let raw = u16::from_le_bytes([data[1], data[2]]);
        let mut w = f64::from(raw) * tunables.binary_resolution_kg;
        if imperial {
            w *= LB_TO_KG;
        }
        if in_bounds(w) {
            return Ok(w);
        }
    }

    Err(FrameError::Unrecognized(data.len()))
}

/// Short acknowledgement frames: at most two bytes, every byte either a
/// common control character (CR, LF, NUL) or a small integer.
fn is_control_frame(data: &[u8]) -> bool {
    data.len() <= 2
        && data
            .iter()
            .all(|&b| b == 0x0D || b == 0x0A || b == 0x00 || b <= 5)
}

/// Toledo/Mettler style: a number (interior whitespace allowed) directly
/// followed by `KG`, case-insensitive, e.g. `"ST,GS,+   12.34KG"`.
fn parse_kg_suffixed(text: &str) -> Option<f64> {
    let lower = text.to_ascii_lowercase();
    let mut search = 0;
    while let Some(pos) = lower[search..].find("kg").map(|p| p + search) {
        let prefix = &lower[..pos];
        // Walk backwards over number characters; a sign ends the number.
        let mut start = prefix.len();
        for (i, c) in prefix.char_indices().rev() {
            match c {
                '0'..='9' | '.' | ' ' | '\t' => start = i,
                '+' | '-' => {
                    start = i;
                    break;
                }
                _ => break,
            }
        }
        let raw: String = prefix[start..]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if raw.bytes().any(|b| b.is_ascii_digit())
            && let Ok(w) = raw.parse::<f64>()
        {
            return Some(w);
        }
        search = pos + 2;
    }
    None
}

/// Generic `<number> <unit>` with unit kg, g or lb; grams and pounds are
/// converted to kilograms.
fn parse_unit_suffixed(text: &str) -> Option<f64> {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let signed_start = (bytes[i] == b'+' || bytes[i] == b'-')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_digit();
        if !bytes[i].is_ascii_digit() && !signed_start {
            i += 1;
            continue;
        }

        let start = i;
        if signed_start {
            i += 1;
        }
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
            i += 1;
        }
        let number: f64 = match lower[start..i].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };

        let mut j = i;
        while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
            j += 1;
        }
        let unit = &lower[j..];
        let factor = if unit.starts_with("kg") {
            Some(1.0)
        } else if unit.starts_with("lb") {
            Some(LB_TO_KG)
        } else if unit.starts_with('g') {
            Some(1e-3)
        } else {
            None
        };
        if let Some(factor) = factor {
            return Some(number * factor);
        }
    }
    None
}

/// Some bare-bones scales send just the digits.
fn parse_bare_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.bytes().any(|b| b.is_ascii_digit()) {
        trimmed.parse::<f64>().ok()
    } else {
        None
    }
}
