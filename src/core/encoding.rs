// LogWeave - core/encoding.rs
//
// Incremental byte-to-text decoding for tailed files.
//
// A tail read can end anywhere, including in the middle of a multi-byte
// sequence. `Decoder` keeps the incomplete trailing bytes and prepends them
// to the next chunk, so a character split across two reads decodes exactly
// once. Invalid input decodes to U+FFFD rather than failing.

use crate::util::error::TailError;
use std::char::REPLACEMENT_CHARACTER;

const BOM: char = '\u{FEFF}';

/// Character encodings a tailed file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl TextEncoding {
    /// Resolve a case-insensitive encoding label.
    pub fn from_label(label: &str) -> Result<Self, TailError> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16le" | "utf16le" | "utf-16" | "utf16" => Ok(Self::Utf16Le),
            "utf-16be" | "utf16be" => Ok(Self::Utf16Be),
            "latin1" | "latin-1" | "iso-8859-1" => Ok(Self::Latin1),
            _ => Err(TailError::UnsupportedEncoding {
                encoding: label.to_string(),
            }),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
            Self::Latin1 => "latin1",
        }
    }
}

/// Stateful decoder for one byte stream.
#[derive(Debug, Clone)]
pub struct Decoder {
    encoding: TextEncoding,
    carry: Vec<u8>,
    at_start: bool,
}

impl Decoder {
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            carry: Vec::new(),
            at_start: true,
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Forget carried bytes, as after the file was truncated.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.at_start = true;
    }

    /// Decode the next chunk of the stream.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        let mut out = match self.encoding {
            TextEncoding::Utf8 => self.decode_utf8(&buf),
            TextEncoding::Utf16Le => self.decode_utf16(&buf, u16::from_le_bytes),
            TextEncoding::Utf16Be => self.decode_utf16(&buf, u16::from_be_bytes),
            TextEncoding::Latin1 => buf.iter().map(|&b| char::from(b)).collect(),
        };

        if self.at_start && !out.is_empty() {
            self.at_start = false;
            if out.starts_with(BOM) {
                out.drain(..BOM.len_utf8());
            }
        }
        out
    }

    fn decode_utf8(&mut self, buf: &[u8]) -> String {
        let mut out = String::with_capacity(buf.len());
        let mut rest = buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    return out;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk.
                            self.carry = after.to_vec();
                            return out;
                        }
                    }
                }
            }
        }
    }

    fn decode_utf16(&mut self, buf: &[u8], unit: fn([u8; 2]) -> u16) -> String {
        let even = buf.len() & !1;
        let mut units: Vec<u16> = buf[..even]
            .chunks_exact(2)
            .map(|pair| unit([pair[0], pair[1]]))
            .collect();

        let mut keep_from = even;
        // A high surrogate needs its partner from the next chunk.
        if units.last().is_some_and(|u| (0xD800..0xDC00).contains(u)) {
            units.pop();
            keep_from -= 2;
        }
        self.carry = buf[keep_from..].to_vec();

        char::decode_utf16(units)
            .map(|r| r.unwrap_or(REPLACEMENT_CHARACTER))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(TextEncoding::from_label("UTF-8").unwrap(), TextEncoding::Utf8);
        assert_eq!(
            TextEncoding::from_label(" utf-16be ").unwrap(),
            TextEncoding::Utf16Be
        );
        assert_eq!(
            TextEncoding::from_label("ISO-8859-1").unwrap(),
            TextEncoding::Latin1
        );
        assert!(matches!(
            TextEncoding::from_label("ebcdic"),
            Err(TailError::UnsupportedEncoding { .. })
        ));
    }

    #[test]
    fn test_utf8_split_sequence_is_carried() {
        let bytes = "größe ok\n".as_bytes();
        // Split inside the two-byte 'ö'.
        let cut = "gr".len() + 1;
        let mut d = Decoder::new(TextEncoding::Utf8);
        let first = d.decode(&bytes[..cut]);
        let second = d.decode(&bytes[cut..]);
        assert_eq!(first, "gr");
        assert_eq!(format!("{first}{second}"), "größe ok\n");
    }

    #[test]
    fn test_utf8_invalid_byte_replaced() {
        let mut d = Decoder::new(TextEncoding::Utf8);
        assert_eq!(d.decode(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_bom_stripped_once() {
        let mut d = Decoder::new(TextEncoding::Utf8);
        assert_eq!(d.decode(b"\xEF\xBB\xBFhello"), "hello");
        assert_eq!(d.decode("\u{FEFF}x".as_bytes()), "\u{FEFF}x");
    }

    #[test]
    fn test_utf16le_odd_split_and_surrogates() {
        let text = "a😀b\n";
        let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut d = Decoder::new(TextEncoding::Utf16Le);
        let mut out = String::new();
        // Feed three bytes at a time so both odd-byte and surrogate splits occur.
        for chunk in bytes.chunks(3) {
            out.push_str(&d.decode(chunk));
        }
        assert_eq!(out, text);
    }

    #[test]
    fn test_utf16be_with_bom() {
        let mut bytes = vec![0xFE, 0xFF];
        bytes.extend("hi\n".encode_utf16().flat_map(u16::to_be_bytes));
        let mut d = Decoder::new(TextEncoding::Utf16Be);
        assert_eq!(d.decode(&bytes), "hi\n");
    }

    #[test]
    fn test_latin1_maps_bytes_directly() {
        let mut d = Decoder::new(TextEncoding::Latin1);
        assert_eq!(d.decode(b"caf\xE9"), "café");
    }

    #[test]
    fn test_reset_drops_carry() {
        let mut d = Decoder::new(TextEncoding::Utf8);
        assert_eq!(d.decode(&[0xC3]), "");
        d.reset();
        assert_eq!(d.decode(b"x"), "x");
    }
}
