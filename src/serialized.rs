//! Codec for the PHP `serialize()` wire format.
//!
//! WordPress stores composite meta and option values as serialized PHP
//! (`a:2:{s:6:"bucket";s:4:"mine";...}`). The scalar tags are `N;` (null),
//! `b:` (bool), `i:` (int), `d:` (float), `s:` (string) and `a:` (array).
//! String lengths count BYTES, not characters, so multibyte content must be
//! measured on the UTF-8 encoding. Object payloads (`O:`) are not modeled;
//! they decode to `Malformed` and callers fall back to treating the stored
//! value as plain text.

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("malformed serialized value at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(IndexMap<ArrayKey, Value>),
}

/// PHP array keys are either integers or strings; anything else is coerced
/// before serialization, so the wire format only ever carries these two.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(String),
}

/// Decode a full serialized payload. Trailing bytes after the top-level
/// value are an error: a truncated or concatenated payload must not be
/// silently accepted and re-encoded.
pub fn decode(input: &str) -> Result<Value, DecodeError> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
    };
    let value = parser.parse_value()?;
    if parser.pos != parser.input.len() {
        return Err(parser.err("trailing bytes after value"));
    }
    Ok(value)
}

/// Encode a value back to the wire format. Decoding the result yields the
/// same value (modulo float formatting PHP would also normalize).
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("N;"),
        Value::Bool(b) => {
            out.push_str(if *b { "b:1;" } else { "b:0;" });
        }
        Value::Int(n) => {
            out.push_str(&format!("i:{n};"));
        }
        Value::Float(f) => {
            out.push_str(&format!("d:{};", format_float(*f)));
        }
        Value::Str(s) => {
            encode_str(s, out);
        }
        Value::Array(map) => {
            out.push_str(&format!("a:{}:{{", map.len()));
            for (key, val) in map {
                match key {
                    ArrayKey::Int(n) => out.push_str(&format!("i:{n};")),
                    ArrayKey::Str(s) => encode_str(s, out),
                }
                encode_into(val, out);
            }
            out.push('}');
        }
    }
}

fn encode_str(s: &str, out: &mut String) {
    // Length prefix is the UTF-8 byte count.
    out.push_str(&format!("s:{}:\"{s}\";", s.len()));
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NAN".to_string()
    } else if f == f64::INFINITY {
        "INF".to_string()
    } else if f == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        format!("{f}")
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err(&self, reason: &'static str) -> DecodeError {
        DecodeError::Malformed {
            offset: self.pos,
            reason,
        }
    }

    fn expect(&mut self, byte: u8, reason: &'static str) -> Result<(), DecodeError> {
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(reason))
        }
    }

    /// Consume bytes up to (not including) `delim`, then step past it.
    fn take_until(&mut self, delim: u8, reason: &'static str) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        while let Some(&b) = self.input.get(self.pos) {
            if b == delim {
                let slice = &self.input[start..self.pos];
                self.pos += 1;
                return Ok(slice);
            }
            self.pos += 1;
        }
        self.pos = start;
        Err(self.err(reason))
    }

    fn parse_value(&mut self) -> Result<Value, DecodeError> {
        let tag = *self.input.get(self.pos).ok_or_else(|| self.err("empty input"))?;
        match tag {
            b'N' => {
                self.pos += 1;
                self.expect(b';', "expected ';' after null")?;
                Ok(Value::Null)
            }
            b'b' => {
                self.pos += 1;
                self.expect(b':', "expected ':' after bool tag")?;
                let flag = match self.input.get(self.pos) {
                    Some(b'0') => false,
                    Some(b'1') => true,
                    _ => return Err(self.err("bool must be 0 or 1")),
                };
                self.pos += 1;
                self.expect(b';', "expected ';' after bool")?;
                Ok(Value::Bool(flag))
            }
            b'i' => {
                self.pos += 1;
                self.expect(b':', "expected ':' after int tag")?;
                let n = self.parse_int(b';', "unterminated int")?;
                Ok(Value::Int(n))
            }
            b'd' => {
                self.pos += 1;
                self.expect(b':', "expected ':' after float tag")?;
                let raw = self.take_until(b';', "unterminated float")?;
                let text =
                    std::str::from_utf8(raw).map_err(|_| self.err("invalid float bytes"))?;
                let f = match text {
                    "NAN" => f64::NAN,
                    "INF" => f64::INFINITY,
                    "-INF" => f64::NEG_INFINITY,
                    other => other.parse::<f64>().map_err(|_| self.err("invalid float"))?,
                };
                Ok(Value::Float(f))
            }
            b's' => Ok(Value::Str(self.parse_string()?)),
            b'a' => {
                self.pos += 1;
                self.expect(b':', "expected ':' after array tag")?;
                let count = self.parse_len("invalid array length")?;
                self.expect(b'{', "expected '{' to open array")?;
                let mut map: IndexMap<ArrayKey, Value> = IndexMap::with_capacity(count);
                for _ in 0..count {
                    let key = self.parse_key()?;
                    let val = self.parse_value()?;
                    map.insert(key, val);
                }
                self.expect(b'}', "expected '}' to close array")?;
                Ok(Value::Array(map))
            }
            b'O' => Err(self.err("php objects are not supported")),
            _ => Err(self.err("unknown type tag")),
        }
    }

    fn parse_key(&mut self) -> Result<ArrayKey, DecodeError> {
        match self.input.get(self.pos) {
            Some(b'i') => {
                self.pos += 1;
                self.expect(b':', "expected ':' after int key tag")?;
                let n = self.parse_int(b';', "unterminated int key")?;
                Ok(ArrayKey::Int(n))
            }
            Some(b's') => Ok(ArrayKey::Str(self.parse_string()?)),
            _ => Err(self.err("array key must be int or string")),
        }
    }

    fn parse_string(&mut self) -> Result<String, DecodeError> {
        self.expect(b's', "expected string tag")?;
        self.expect(b':', "expected ':' after string tag")?;
        let len = self.parse_len("invalid string length")?;
        self.expect(b'"', "expected '\"' to open string")?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| self.err("string length past end of input"))?;
        let bytes = &self.input[self.pos..end];
        let text = std::str::from_utf8(bytes)
            .map_err(|_| self.err("string is not valid utf-8"))?
            .to_string();
        self.pos = end;
        self.expect(b'"', "string length does not match content")?;
        self.expect(b';', "expected ';' after string")?;
        Ok(text)
    }

    fn parse_int(&mut self, delim: u8, reason: &'static str) -> Result<i64, DecodeError> {
        let raw = self.take_until(delim, reason)?;
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| self.err("invalid int"))
    }

    fn parse_len(&mut self, reason: &'static str) -> Result<usize, DecodeError> {
        let raw = self.take_until(b':', reason)?;
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| self.err(reason))
    }
}

/// Apply `f` to every string reachable at depth one: the value itself if it
/// is a string, or the immediate string members of a top-level array. Nested
/// arrays and non-string members pass through untouched.
pub fn rewrite_string_values<F>(value: Value, f: F) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::Str(s) => Value::Str(f(&s)),
        Value::Array(map) => Value::Array(
            map.into_iter()
                .map(|(key, val)| {
                    let val = match val {
                        Value::Str(s) => Value::Str(f(&s)),
                        other => other,
                    };
                    (key, val)
                })
                .collect(),
        ),
        other => other,
    }
}
