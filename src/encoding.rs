//! Charset transcoding between a session's configured encoding and UTF-8.
//!
//! Reads come off the PTY in whatever charset the shell/program inside it
//! emits; everything downstream of the read loop (scrollback, subscribers,
//! the VT) works in UTF-8. Writes go the other way: UTF-8 in from the
//! caller, the session's charset out to the PTY.

use encoding_rs::Encoding;

use crate::error::SessionError;

/// One of the charsets the session data path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Gbk,
    Gb18030,
    Gb2312,
}

impl Charset {
    /// Resolves a case-insensitive charset name.
    ///
    /// `"utf-8"`, `"utf8"`, and `""` all resolve to [`Charset::Utf8`].
    pub fn parse(name: &str) -> Result<Self, SessionError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "utf-8" | "utf8" => Ok(Charset::Utf8),
            "gbk" => Ok(Charset::Gbk),
            "gb18030" => Ok(Charset::Gb18030),
            "gb2312" => Ok(Charset::Gb2312),
            other => Err(SessionError::InvalidEncoding(other.to_string())),
        }
    }

    fn encoding(self) -> Option<&'static Encoding> {
        match self {
            Charset::Utf8 => None,
            Charset::Gbk => Some(encoding_rs::GBK),
            Charset::Gb18030 => Some(encoding_rs::GB18030),
            // encoding_rs has no standalone GB2312 codec; GBK is a superset
            // and is the documented fallback for legacy GB2312 streams.
            Charset::Gb2312 => Some(encoding_rs::GBK),
        }
    }

    pub fn is_utf8(self) -> bool {
        matches!(self, Charset::Utf8)
    }
}

/// Stateful charset decoder with a UTF-8 fast path.
///
/// Non-UTF-8 charsets are decoded chunk-by-chunk with `encoding_rs`, which
/// replaces malformed sequences with U+FFFD rather than erroring. The UTF-8
/// path buffers a trailing incomplete multi-byte sequence across reads so a
/// 4/32 KiB chunk boundary landing inside a CJK character or emoji does not
/// produce replacement characters.
pub struct Decoder {
    charset: Charset,
    incomplete: Vec<u8>,
}

impl Decoder {
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            incomplete: Vec::with_capacity(4),
        }
    }

    pub fn decode(&mut self, input: &[u8]) -> String {
        match self.charset.encoding() {
            None => self.decode_utf8(input),
            Some(encoding) => {
                let (text, _, _) = encoding.decode(input);
                text.into_owned()
            }
        }
    }

    fn decode_utf8(&mut self, input: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.incomplete);
        data.extend_from_slice(input);

        let valid_up_to = match std::str::from_utf8(&data) {
            Ok(_) => data.len(),
            Err(e) => {
                if e.error_len().is_none() {
                    e.valid_up_to()
                } else {
                    e.valid_up_to() + e.error_len().unwrap_or(1)
                }
            }
        };

        if valid_up_to < data.len() {
            self.incomplete = data[valid_up_to..].to_vec();
        }

        String::from_utf8(data[..valid_up_to].to_vec())
            .unwrap_or_else(|_| String::from_utf8_lossy(&data[..valid_up_to]).into_owned())
    }
}

/// Encodes a UTF-8 string into the session's charset for writing to the PTY.
pub fn encode(charset: Charset, text: &str) -> Vec<u8> {
    match charset.encoding() {
        None => text.as_bytes().to_vec(),
        Some(encoding) => {
            let (bytes, _, _) = encoding.encode(text);
            bytes.into_owned()
        }
    }
}
