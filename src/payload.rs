//! Notification payload decoding.
//!
//! The peripheral sends each reading as ASCII text, e.g. `b"12.5"`.
//! Decoding never fails: at most [`MAX_PAYLOAD_LEN`] bytes are copied
//! into a NUL-terminated buffer, the longest leading decimal number is
//! parsed, and anything unparsable reads as `0.0`.

use std::fmt;

/// Maximum number of payload bytes considered. Longer payloads are truncated.
pub const MAX_PAYLOAD_LEN: usize = 19;

/// Something about a payload that was tolerated rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadAnomaly {
    /// The payload was longer than [`MAX_PAYLOAD_LEN`] and was cut.
    Truncated {
        /// Length of the payload as received.
        received: usize,
    },
    /// No leading number was found; the reading is `0.0`.
    NoNumericPrefix,
    /// A number was parsed but bytes followed it.
    TrailingBytes {
        /// Number of bytes ignored after the number.
        ignored: usize,
    },
}

impl fmt::Display for PayloadAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { received } => write!(
                f,
                "payload of {} bytes truncated to {}",
                received, MAX_PAYLOAD_LEN
            ),
            Self::NoNumericPrefix => write!(f, "no numeric prefix, reading as 0.0"),
            Self::TrailingBytes { ignored } => {
                write!(f, "{} trailing bytes ignored", ignored)
            }
        }
    }
}

/// A decoded reading and what was tolerated to get it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The reading.
    pub value: f64,
    /// Anomalies found, in the order they were detected.
    pub anomalies: Vec<PayloadAnomaly>,
}

impl Decoded {
    /// Whether the payload decoded without any anomaly.
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Decode a payload into a reading, ignoring anomalies.
pub fn decode(bytes: &[u8]) -> f64 {
    decode_reading(bytes).value
}

/// Decode a payload into a reading and report anomalies.
pub fn decode_reading(bytes: &[u8]) -> Decoded {
    let mut anomalies = Vec::new();

    let copy_len = bytes.len().min(MAX_PAYLOAD_LEN);
    if bytes.len() > MAX_PAYLOAD_LEN {
        anomalies.push(PayloadAnomaly::Truncated {
            received: bytes.len(),
        });
    }

    let mut buffer = [0u8; MAX_PAYLOAD_LEN + 1];
    buffer[..copy_len].copy_from_slice(&bytes[..copy_len]);
    buffer[copy_len] = 0;

    // The text ends at the first NUL, like the C string it was sent as.
    let text_len = buffer.iter().position(|&b| b == 0).unwrap_or(copy_len);
    let text = &buffer[..text_len];

    let (start, end) = numeric_prefix(text);
    let value = if end > start {
        // The prefix is ASCII by construction.
        std::str::from_utf8(&text[start..end])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
    } else {
        0.0
    };

    if end == start {
        anomalies.push(PayloadAnomaly::NoNumericPrefix);
    } else if end < text.len() {
        anomalies.push(PayloadAnomaly::TrailingBytes {
            ignored: text.len() - end,
        });
    }

    Decoded { value, anomalies }
}

/// Locate the longest leading decimal number in `text`.
///
/// Returns `(start, end)` with `start == end` when there is none.
/// Leading ASCII whitespace, vertical tab included, is skipped. Accepted form:
/// `[+-] digits [. digits] [(e|E) [+-] digits]` where at least one
/// mantissa digit is required and the exponent only counts when it has
/// digits.
fn numeric_prefix(text: &[u8]) -> (usize, usize) {
    let start = text
        .iter()
        .position(|b| !is_space(*b))
        .unwrap_or(text.len());

    let mut pos = start;
    if matches!(text.get(pos), Some(b'+') | Some(b'-')) {
        pos += 1;
    }

    let int_digits = count_digits(&text[pos..]);
    pos += int_digits;

    let mut frac_digits = 0;
    if text.get(pos) == Some(&b'.') {
        frac_digits = count_digits(&text[pos + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            pos += 1 + frac_digits;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return (start, start);
    }

    if matches!(text.get(pos), Some(b'e') | Some(b'E')) {
        let mut exp = pos + 1;
        if matches!(text.get(exp), Some(b'+') | Some(b'-')) {
            exp += 1;
        }
        let exp_digits = count_digits(&text[exp..]);
        if exp_digits > 0 {
            pos = exp + exp_digits;
        }
    }

    (start, pos)
}

fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace() || b == 0x0b
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
