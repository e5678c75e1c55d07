//! Binary key-value codec used by Steam's `shortcuts.vdf`: tag byte, NUL
//! terminated key, payload. The file is one implicit root map.

use thiserror::Error;

pub const TAG_MAP: u8 = 0x00;
pub const TAG_STRING: u8 = 0x01;
pub const TAG_INT32: u8 = 0x02;
pub const TAG_END: u8 = 0x08;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Map(Vec<Entry>),
    String(String),
    Int32(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Value,
}

impl Entry {
    pub fn map(key: impl Into<String>, children: Vec<Entry>) -> Self {
        Self {
            key: key.into(),
            value: Value::Map(children),
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::String(value.into()),
        }
    }

    pub fn int32(key: impl Into<String>, value: i32) -> Self {
        Self {
            key: key.into(),
            value: Value::Int32(value),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("unexpected end of data at offset {offset} while reading {context}")]
    Truncated { offset: usize, context: &'static str },
    #[error("unknown field type tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("invalid UTF-8 in {context} at offset {offset}")]
    InvalidUtf8 { offset: usize, context: &'static str },
    #[error("{remaining} trailing byte(s) after the root map closed at offset {offset}")]
    TrailingData { offset: usize, remaining: usize },
    #[error("maps nested too deeply at offset {offset}")]
    TooDeep { offset: usize },
}

/// Decodes a full stream into the entries of its implicit root map.
pub fn decode(bytes: &[u8]) -> Result<Vec<Entry>, FormatError> {
    let mut reader = Reader { bytes, pos: 0 };
    let root = reader.read_map(0)?;
    if reader.pos != bytes.len() {
        return Err(FormatError::TrailingData {
            offset: reader.pos,
            remaining: bytes.len() - reader.pos,
        });
    }
    Ok(root)
}

/// Encodes root entries back into a stream.
///
/// Keys and string values must not contain NUL bytes; everything produced by
/// [`decode`] satisfies that.
pub fn encode(root: &[Entry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_map(&mut out, root);
    out
}

fn write_map(out: &mut Vec<u8>, entries: &[Entry]) {
    for entry in entries {
        match &entry.value {
            Value::Map(children) => {
                out.push(TAG_MAP);
                write_cstr(out, &entry.key);
                write_map(out, children);
            }
            Value::String(text) => {
                out.push(TAG_STRING);
                write_cstr(out, &entry.key);
                write_cstr(out, text);
            }
            Value::Int32(value) => {
                out.push(TAG_INT32);
                write_cstr(out, &entry.key);
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    out.push(TAG_END);
}

fn write_cstr(out: &mut Vec<u8>, text: &str) {
    debug_assert!(!text.as_bytes().contains(&0), "NUL inside vdf string");
    out.extend_from_slice(text.as_bytes());
    out.push(0);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn read_map(&mut self, depth: usize) -> Result<Vec<Entry>, FormatError> {
        if depth > MAX_DEPTH {
            return Err(FormatError::TooDeep { offset: self.pos });
        }

        let mut entries = Vec::new();
        loop {
            let tag_offset = self.pos;
            let tag = self.read_u8("field type tag")?;
            let entry = match tag {
                TAG_END => return Ok(entries),
                TAG_MAP | TAG_STRING | TAG_INT32 => {
                    let key = self.read_cstr("field key")?;
                    let value = match tag {
                        TAG_MAP => Value::Map(self.read_map(depth + 1)?),
                        TAG_STRING => Value::String(self.read_cstr("string value")?),
                        _ => Value::Int32(self.read_i32()?),
                    };
                    Entry { key, value }
                }
                other => {
                    return Err(FormatError::UnknownTag {
                        tag: other,
                        offset: tag_offset,
                    });
                }
            };
            entries.push(entry);
        }
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, FormatError> {
        let byte = *self.bytes.get(self.pos).ok_or(FormatError::Truncated {
            offset: self.pos,
            context,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_i32(&mut self) -> Result<i32, FormatError> {
        let raw: [u8; 4] = self
            .bytes
            .get(self.pos..self.pos + 4)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(FormatError::Truncated {
                offset: self.pos,
                context: "int32 value",
            })?;
        self.pos += 4;
        Ok(i32::from_le_bytes(raw))
    }

    fn read_cstr(&mut self, context: &'static str) -> Result<String, FormatError> {
        let start = self.pos;
        let rest = &self.bytes[start..];
        let len = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(FormatError::Truncated {
                offset: self.bytes.len(),
                context,
            })?;
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| FormatError::InvalidUtf8 {
                offset: start,
                context,
            })?
            .to_string();
        self.pos = start + len + 1;
        Ok(text)
    }
}
