/*
src/bencode.rs

Bencoding codec: the data language used by .torrent files and tracker
responses. A tagged `Value` enum stands in for the duck-typed dispatch the
original implementation used (int/str/bytes/list/dict keyed by Python type).

Maps are kept as an ordered `Vec<(Value, Value)>` rather than a `HashMap` so
that re-encoding a decoded `info` dictionary reproduces the same bytes that
were hashed to produce the torrent's infohash.
*/

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    Eof,
    UnexpectedEnd,
    InvalidToken(usize),
    InvalidInteger(usize),
    InvalidLength(usize),
    NonByteStringKey(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Eof => write!(f, "empty input"),
            DecodeError::UnexpectedEnd => write!(f, "unexpected end of input"),
            DecodeError::InvalidToken(i) => write!(f, "invalid token at offset {i}"),
            DecodeError::InvalidInteger(i) => write!(f, "invalid integer at offset {i}"),
            DecodeError::InvalidLength(i) => write!(f, "invalid length prefix at offset {i}"),
            DecodeError::NonByteStringKey(i) => write!(f, "map key at offset {i} is not a byte string"),
        }
    }
}

impl std::error::Error for DecodeError {}

const TOKEN_INTEGER: u8 = b'i';
const TOKEN_LIST: u8 = b'l';
const TOKEN_DICT: u8 = b'd';
const TOKEN_END: u8 = b'e';
const TOKEN_SEP: u8 = b':';

/// Decodes one bencoded value from the front of `data`, returning the value
/// and the number of bytes consumed.
pub fn decode(data: &[u8]) -> Result<(Value, usize), DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Eof);
    }
    let mut d = Decoder { data, index: 0 };
    let value = d.decode_value()?;
    Ok((value, d.index))
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            out.push(TOKEN_INTEGER);
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(TOKEN_END);
        }
        Value::Bytes(b) => {
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.push(TOKEN_SEP);
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            out.push(TOKEN_LIST);
            for item in items {
                encode_into(item, out);
            }
            out.push(TOKEN_END);
        }
        Value::Map(entries) => {
            out.push(TOKEN_DICT);
            for (k, v) in entries {
                encode_into(k, out);
                encode_into(v, out);
            }
            out.push(TOKEN_END);
        }
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Decoder<'a> {
    /// Look at the byte at the current index. A strict "index + 1 >= size"
    /// guard (as in the original implementation) would refuse to peek the
    /// final byte of the buffer; this allows it.
    fn peek(&self) -> Option<u8> {
        self.data.get(self.index).copied()
    }

    fn consume(&mut self, n: usize) {
        self.index += n;
    }

    fn read(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.index + len > self.data.len() {
            return Err(DecodeError::UnexpectedEnd);
        }
        let slice = &self.data[self.index..self.index + len];
        self.consume(len);
        Ok(slice)
    }

    fn read_until(&mut self, token: u8) -> Result<&'a [u8], DecodeError> {
        let rel = self.data[self.index..]
            .iter()
            .position(|&b| b == token)
            .ok_or(DecodeError::UnexpectedEnd)?;
        let slice = &self.data[self.index..self.index + rel];
        self.consume(rel + 1);
        Ok(slice)
    }

    fn decode_value(&mut self) -> Result<Value, DecodeError> {
        match self.peek() {
            None => Err(DecodeError::UnexpectedEnd),
            Some(TOKEN_INTEGER) => self.decode_int(),
            Some(TOKEN_LIST) => self.decode_list(),
            Some(TOKEN_DICT) => self.decode_dict(),
            Some(b) if b.is_ascii_digit() => self.decode_bytes(),
            Some(_) => Err(DecodeError::InvalidToken(self.index)),
        }
    }

    fn decode_int(&mut self) -> Result<Value, DecodeError> {
        let start = self.index;
        self.consume(1);
        let raw = self.read_until(TOKEN_END)?;
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidInteger(start))?;
        validate_integer_token(text).ok_or(DecodeError::InvalidInteger(start))?;
        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| DecodeError::InvalidInteger(start))
    }

    fn decode_bytes(&mut self) -> Result<Value, DecodeError> {
        let start = self.index;
        let len_raw = self.read_until(TOKEN_SEP)?;
        let len_text = std::str::from_utf8(len_raw).map_err(|_| DecodeError::InvalidLength(start))?;
        if len_text.is_empty() || (len_text.len() > 1 && len_text.starts_with('0')) {
            return Err(DecodeError::InvalidLength(start));
        }
        let len: usize = len_text.parse().map_err(|_| DecodeError::InvalidLength(start))?;
        self.read(len).map(|s| Value::Bytes(s.to_vec()))
    }

    fn decode_list(&mut self) -> Result<Value, DecodeError> {
        self.consume(1);
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(DecodeError::UnexpectedEnd),
                Some(TOKEN_END) => {
                    self.consume(1);
                    return Ok(Value::List(items));
                }
                _ => items.push(self.decode_value()?),
            }
        }
    }

    fn decode_dict(&mut self) -> Result<Value, DecodeError> {
        self.consume(1);
        let mut entries = Vec::new();
        loop {
            match self.peek() {
                None => return Err(DecodeError::UnexpectedEnd),
                Some(TOKEN_END) => {
                    self.consume(1);
                    return Ok(Value::Map(entries));
                }
                _ => {
                    let key_start = self.index;
                    let key = self.decode_value()?;
                    if !matches!(key, Value::Bytes(_)) {
                        return Err(DecodeError::NonByteStringKey(key_start));
                    }
                    let value = self.decode_value()?;
                    entries.push((key, value));
                }
            }
        }
    }
}

/// Rejects a leading zero (except the literal "0") and a "-0" body, matching
/// the canonical bencoding integer grammar.
fn validate_integer_token(text: &str) -> Option<()> {
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits == "0" {
        return if neg { None } else { Some(()) };
    }
    if digits.starts_with('0') {
        return None;
    }
    Some(())
}

impl Value {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up a byte-string-keyed entry in a `Map` value.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_bytes() == Some(key))
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Bytes(v.as_bytes().to_vec())
    }

    #[test]
    fn decode_integer() {
        assert_eq!(decode(b"i42e").unwrap(), (Value::Int(42), 4));
        assert_eq!(decode(b"i-42e").unwrap(), (Value::Int(-42), 5));
        assert_eq!(decode(b"i0e").unwrap(), (Value::Int(0), 3));
    }

    #[test]
    fn decode_rejects_negative_zero_and_leading_zero() {
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"i03e").is_err());
    }

    #[test]
    fn decode_bytes() {
        assert_eq!(decode(b"4:spam").unwrap(), (s("spam"), 6));
        assert_eq!(decode(b"0:").unwrap(), (Value::Bytes(vec![]), 2));
    }

    #[test]
    fn decode_list() {
        assert_eq!(
            decode(b"l4:spam4:eggse").unwrap(),
            (Value::List(vec![s("spam"), s("eggs")]), 14)
        );
    }

    #[test]
    fn decode_dict_preserves_insertion_order() {
        let (value, _) = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
        assert_eq!(
            value,
            Value::Map(vec![(s("cow"), s("moo")), (s("spam"), s("eggs"))])
        );
    }

    #[test]
    fn decode_dict_rejects_non_bytes_key() {
        assert!(matches!(
            decode(b"di1e4:spame"),
            Err(DecodeError::NonByteStringKey(_))
        ));
    }

    #[test]
    fn decode_empty_is_eof() {
        assert_eq!(decode(b""), Err(DecodeError::Eof));
    }

    #[test]
    fn decode_unterminated_is_error() {
        assert!(decode(b"i42").is_err());
        assert!(decode(b"4:sp").is_err());
        assert!(decode(b"l4:spam").is_err());
    }

    #[test]
    fn round_trip_decode_encode() {
        let values = vec![
            Value::Int(0),
            Value::Int(-7),
            s("hello world"),
            Value::List(vec![Value::Int(1), s("two"), Value::List(vec![])]),
            Value::Map(vec![(s("a"), Value::Int(1)), (s("b"), s("c"))]),
        ];
        for v in values {
            let bytes = encode(&v);
            let (decoded, consumed) = decode(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(decoded, v);
        }
    }

    #[test]
    fn round_trip_encode_decode_bytes_with_sorted_keys() {
        let raw: &[u8] = b"d4:name5:Alice3:agei30ee";
        let (value, _) = decode(raw).unwrap();
        assert_eq!(encode(&value), raw);
    }

    #[test]
    fn peek_allows_final_byte_of_buffer() {
        // A single-byte buffer still decodes; this exercises the fixed
        // off-by-one in `peek`.
        assert_eq!(decode(b"0:").unwrap().0, Value::Bytes(vec![]));
        let (value, consumed) = decode(b"i5e").unwrap();
        assert_eq!(value, Value::Int(5));
        assert_eq!(consumed, 3);
    }
}
