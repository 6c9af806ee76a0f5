//! Frame and chunk framing.
//!
//! A frame is a single properties byte (dictionary-size class plus the
//! hash flag), a run of self-describing chunks, a one-byte terminator,
//! and an optional 8-byte XXH64 trailer:
//!
//! ```text
//! byte 0    : (log2(dictSize) - 11) | hashFlag<<7
//! bytes 1.. : chunks
//! ...       : 0x00 terminator
//! tail      : 8-byte XXH64, little-endian, when the hash flag is set
//! ```
//!
//! Chunk headers are parsed into a tagged [`ChunkHeader`] so the decoder
//! dispatches over a sum type instead of re-deriving flag bits at every
//! site.

use crate::model::Props;
use crate::{Flz2Error, Flz2Result};

/// Maximum decoded bytes per chunk.
pub const MAX_CHUNK_UNPACKED: usize = 1 << 16;
/// Maximum compressed bytes per chunk payload.
pub const MAX_CHUNK_PACKED: usize = 1 << 16;

/// Control byte: end of frame.
pub const CTRL_END: u8 = 0x00;
/// Control byte: uncompressed chunk that resets the dictionary.
pub const CTRL_UNCOMPRESSED_RESET: u8 = 0x01;
/// Control byte: uncompressed chunk, dictionary kept.
pub const CTRL_UNCOMPRESSED: u8 = 0x02;

/// Properties-byte flag: frame ends with an XXH64 trailer.
pub const PROP_HASH_FLAG: u8 = 0x80;

/// Smallest dictionary the compressor will configure (2^20).
pub const DICT_LOG_MIN: u32 = 20;
/// Largest dictionary (2^30).
pub const DICT_LOG_MAX: u32 = 30;
/// Largest dictionary class a frame header may carry.
const DICT_PROP_MAX: u8 = 19;

/// Size of the XXH64 trailer.
pub const HASH_TRAILER_LEN: usize = 8;

/// State carried across chunks, encoded in bits 5..6 of a compressed
/// chunk's control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetMode {
    /// Continue with current state, no property reset implied.
    KeepNoProps = 0,
    /// Continue with current state.
    Keep = 1,
    /// Reset probabilities, coding state, and rep distances; keep
    /// properties and dictionary.
    ResetState = 2,
    /// Reset coding state and announce fresh properties (a properties
    /// byte follows the sizes). Dictionary resets travel on the
    /// uncompressed reset chunk instead.
    ResetAll = 3,
}

impl ResetMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => ResetMode::KeepNoProps,
            1 => ResetMode::Keep,
            2 => ResetMode::ResetState,
            _ => ResetMode::ResetAll,
        }
    }
}

/// One parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkHeader {
    EndOfFrame,
    Uncompressed {
        reset_dict: bool,
        unpacked: usize,
    },
    Compressed {
        reset: ResetMode,
        unpacked: usize,
        packed: usize,
        props: Option<Props>,
    },
}

impl ChunkHeader {
    /// Parse a header from the front of `buf`. Returns `Ok(None)` when
    /// more bytes are needed, otherwise the header and its encoded size.
    pub fn parse(buf: &[u8]) -> Flz2Result<Option<(ChunkHeader, usize)>> {
        let Some(&ctrl) = buf.first() else {
            return Ok(None);
        };
        match ctrl {
            CTRL_END => Ok(Some((ChunkHeader::EndOfFrame, 1))),
            CTRL_UNCOMPRESSED_RESET | CTRL_UNCOMPRESSED => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                let unpacked = u16::from_be_bytes([buf[1], buf[2]]) as usize + 1;
                Ok(Some((
                    ChunkHeader::Uncompressed {
                        reset_dict: ctrl == CTRL_UNCOMPRESSED_RESET,
                        unpacked,
                    },
                    3,
                )))
            }
            0x80..=0xFF => {
                let reset = ResetMode::from_bits((ctrl >> 5) & 3);
                let want_props = reset == ResetMode::ResetAll;
                let header_len = if want_props { 6 } else { 5 };
                if buf.len() < header_len {
                    return Ok(None);
                }
                let unpacked =
                    ((((ctrl & 0x1F) as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize)
                        + 1;
                if unpacked > MAX_CHUNK_UNPACKED {
                    return Err(Flz2Error::CorruptionDetected);
                }
                let packed = u16::from_be_bytes([buf[3], buf[4]]) as usize + 1;
                let props = if want_props {
                    Some(Props::from_byte(buf[5])?)
                } else {
                    None
                };
                Ok(Some((
                    ChunkHeader::Compressed {
                        reset,
                        unpacked,
                        packed,
                        props,
                    },
                    header_len,
                )))
            }
            _ => Err(Flz2Error::CorruptionDetected),
        }
    }

    /// Serialize this header.
    pub fn write(&self, out: &mut Vec<u8>) {
        match *self {
            ChunkHeader::EndOfFrame => out.push(CTRL_END),
            ChunkHeader::Uncompressed { reset_dict, unpacked } => {
                debug_assert!((1..=MAX_CHUNK_UNPACKED).contains(&unpacked));
                out.push(if reset_dict {
                    CTRL_UNCOMPRESSED_RESET
                } else {
                    CTRL_UNCOMPRESSED
                });
                out.extend_from_slice(&((unpacked - 1) as u16).to_be_bytes());
            }
            ChunkHeader::Compressed {
                reset,
                unpacked,
                packed,
                props,
            } => {
                debug_assert!((1..=MAX_CHUNK_UNPACKED).contains(&unpacked));
                debug_assert!((1..=MAX_CHUNK_PACKED).contains(&packed));
                debug_assert_eq!(props.is_some(), reset == ResetMode::ResetAll);
                let u = unpacked - 1;
                out.push(0x80 | (reset as u8) << 5 | (u >> 16) as u8);
                out.push((u >> 8) as u8);
                out.push(u as u8);
                out.extend_from_slice(&((packed - 1) as u16).to_be_bytes());
                if let Some(p) = props {
                    out.push(p.to_byte());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame properties byte
// ---------------------------------------------------------------------------

/// Build the frame properties byte for a dictionary of `1 << dict_log`
/// bytes.
pub fn dict_prop_byte(dict_log: u32, hashed: bool) -> u8 {
    debug_assert!((DICT_LOG_MIN..=DICT_LOG_MAX).contains(&dict_log));
    (dict_log - 11) as u8 | if hashed { PROP_HASH_FLAG } else { 0 }
}

/// Parse the frame properties byte into `(dict_size, hashed)`.
pub fn parse_dict_prop(byte: u8) -> Flz2Result<(u64, bool)> {
    let hashed = byte & PROP_HASH_FLAG != 0;
    let class = byte & !PROP_HASH_FLAG;
    if class > DICT_PROP_MAX {
        return Err(Flz2Error::CorruptionDetected);
    }
    Ok((1u64 << (class as u32 + 11), hashed))
}

// ---------------------------------------------------------------------------
// Whole-frame helpers
// ---------------------------------------------------------------------------

/// Worst-case compressed size for `src_size` input bytes: the encoder
/// falls back to raw chunks, so the overhead is the per-chunk header
/// plus the frame envelope. Chunks may close well before the 2^16
/// decoded limit when the trial payload hits the packed cap first, so
/// the header allowance is per ~2 KiB rather than per chunk maximum.
pub fn compress_bound(src_size: usize) -> usize {
    src_size + (src_size >> 11) + 16
}

/// Sum the declared unpacked sizes of every chunk without decoding.
/// Returns `None` on malformed or truncated input.
pub fn find_decompressed_size(frame: &[u8]) -> Option<u64> {
    if frame.is_empty() {
        return None;
    }
    parse_dict_prop(frame[0]).ok()?;
    let mut pos = 1usize;
    let mut total = 0u64;
    loop {
        let (header, header_len) = ChunkHeader::parse(&frame[pos..]).ok()??;
        pos += header_len;
        match header {
            ChunkHeader::EndOfFrame => return Some(total),
            ChunkHeader::Uncompressed { unpacked, .. } => {
                total += unpacked as u64;
                pos = pos.checked_add(unpacked)?;
            }
            ChunkHeader::Compressed { unpacked, packed, .. } => {
                total += unpacked as u64;
                pos = pos.checked_add(packed)?;
            }
        }
        if pos > frame.len() {
            return None;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_prop_round_trip() {
        for log in DICT_LOG_MIN..=DICT_LOG_MAX {
            for hashed in [false, true] {
                let b = dict_prop_byte(log, hashed);
                assert_eq!(parse_dict_prop(b).unwrap(), (1u64 << log, hashed));
            }
        }
    }

    #[test]
    fn test_dict_prop_rejects_oversize_class() {
        assert!(parse_dict_prop(20).is_err());
        assert!(parse_dict_prop(0x7F).is_err());
        // Hash flag alone does not make a class invalid.
        assert!(parse_dict_prop(PROP_HASH_FLAG | 9).is_ok());
    }

    #[test]
    fn test_end_header() {
        let (h, n) = ChunkHeader::parse(&[0x00, 0xAA]).unwrap().unwrap();
        assert_eq!(h, ChunkHeader::EndOfFrame);
        assert_eq!(n, 1);
    }

    #[test]
    fn test_uncompressed_header_round_trip() {
        for (reset, unpacked) in [(true, 1usize), (false, 100), (true, MAX_CHUNK_UNPACKED)] {
            let hdr = ChunkHeader::Uncompressed {
                reset_dict: reset,
                unpacked,
            };
            let mut buf = Vec::new();
            hdr.write(&mut buf);
            let (parsed, n) = ChunkHeader::parse(&buf).unwrap().unwrap();
            assert_eq!(parsed, hdr);
            assert_eq!(n, buf.len());
        }
    }

    #[test]
    fn test_compressed_header_round_trip() {
        let cases = [
            (ResetMode::ResetAll, 1usize, 1usize, Some(Props::default())),
            (ResetMode::ResetState, 4096, 512, None),
            (ResetMode::Keep, MAX_CHUNK_UNPACKED, MAX_CHUNK_PACKED, None),
        ];
        for (reset, unpacked, packed, props) in cases {
            let hdr = ChunkHeader::Compressed {
                reset,
                unpacked,
                packed,
                props,
            };
            let mut buf = Vec::new();
            hdr.write(&mut buf);
            let (parsed, n) = ChunkHeader::parse(&buf).unwrap().unwrap();
            assert_eq!(parsed, hdr);
            assert_eq!(n, buf.len());
        }
    }

    #[test]
    fn test_parse_needs_more_bytes() {
        // Truncated compressed header: want 5 (or 6) bytes.
        assert_eq!(ChunkHeader::parse(&[0x81, 0x00]).unwrap(), None);
        assert_eq!(ChunkHeader::parse(&[]).unwrap(), None);
        // Truncated uncompressed header.
        assert_eq!(ChunkHeader::parse(&[0x01]).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_reserved_control() {
        for ctrl in 3u8..0x80 {
            assert!(ChunkHeader::parse(&[ctrl, 0, 0, 0, 0, 0]).is_err());
        }
    }

    #[test]
    fn test_find_decompressed_size() {
        // props | raw chunk of 4 | raw chunk of 2 | end
        let mut frame = vec![dict_prop_byte(20, false)];
        ChunkHeader::Uncompressed {
            reset_dict: true,
            unpacked: 4,
        }
        .write(&mut frame);
        frame.extend_from_slice(b"abcd");
        ChunkHeader::Uncompressed {
            reset_dict: false,
            unpacked: 2,
        }
        .write(&mut frame);
        frame.extend_from_slice(b"ef");
        frame.push(CTRL_END);

        assert_eq!(find_decompressed_size(&frame), Some(6));
        // Truncation anywhere yields unknown.
        for cut in 0..frame.len() {
            assert_eq!(find_decompressed_size(&frame[..cut]), None);
        }
    }

    #[test]
    fn test_compress_bound_covers_raw_framing() {
        for n in [0usize, 1, 100, MAX_CHUNK_UNPACKED, MAX_CHUNK_UNPACKED * 3 + 17, 100 << 20] {
            // Even if every chunk closed after only ~10 KiB of input,
            // the envelope plus per-chunk headers must still fit.
            let pessimal_chunks = n / 10_000 + 1;
            assert!(compress_bound(n) >= n + pessimal_chunks * 3 + 2 + HASH_TRAILER_LEN);
        }
    }
}
