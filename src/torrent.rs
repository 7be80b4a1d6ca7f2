/*
src/torrent.rs

Parses a .torrent metainfo blob via the bencoding codec and exposes the
fields the rest of the engine needs: announce URL, piece length, total
size, output file name, per-piece SHA-1 digests and the infohash.

Multi-file torrents are rejected here, at load time, rather than allowed to
propagate into the piece manager or coordinator.
*/

use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::bencode::{self, Value};
use crate::error::{Error, MetainfoError, Result};

#[derive(Debug, Clone)]
pub struct Torrent {
    pub announce: String,
    pub name: String,
    pub piece_length: i64,
    pub total_size: i64,
    pub pieces: Vec<[u8; 20]>,
    info_hash: [u8; 20],
}

impl Torrent {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (meta_info, _) = bencode::decode(bytes)?;

        let info = meta_info
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;

        if info.get(b"files").is_some() {
            return Err(Error::Metainfo(MetainfoError::MultiFileUnsupported));
        }

        let announce = meta_info
            .get(b"announce")
            .and_then(Value::as_bytes)
            .ok_or(MetainfoError::MissingField("announce"))?;
        let announce = String::from_utf8(announce.to_vec())
            .map_err(|_| MetainfoError::InvalidField("announce"))?;

        let name = info
            .get(b"name")
            .and_then(Value::as_bytes)
            .ok_or(MetainfoError::MissingField("info.name"))?;
        let name = String::from_utf8(name.to_vec())
            .map_err(|_| MetainfoError::InvalidField("info.name"))?;

        let piece_length = info
            .get(b"piece length")
            .and_then(Value::as_int)
            .ok_or(MetainfoError::MissingField("info.piece length"))?;
        if piece_length <= 0 {
            return Err(MetainfoError::InvalidField("info.piece length").into());
        }

        let total_size = info
            .get(b"length")
            .and_then(Value::as_int)
            .ok_or(MetainfoError::MissingField("info.length"))?;
        if total_size <= 0 {
            return Err(MetainfoError::InvalidField("info.length").into());
        }

        let pieces_raw = info
            .get(b"pieces")
            .and_then(Value::as_bytes)
            .ok_or(MetainfoError::MissingField("info.pieces"))?;
        if pieces_raw.len() % 20 != 0 {
            return Err(MetainfoError::InvalidField("info.pieces").into());
        }
        let pieces: Vec<[u8; 20]> = pieces_raw
            .chunks(20)
            .map(|c| {
                let mut arr = [0u8; 20];
                arr.copy_from_slice(c);
                arr
            })
            .collect();

        let expected = ceil_div(total_size as u64, piece_length as u64) as usize;
        if expected != pieces.len() {
            return Err(MetainfoError::PieceCountMismatch {
                expected,
                actual: pieces.len(),
            }
            .into());
        }

        let mut hasher = Sha1::new();
        hasher.update(bencode::encode(info));
        let info_hash: [u8; 20] = hasher.finalize().into();

        Ok(Torrent {
            announce,
            name,
            piece_length,
            total_size,
            pieces,
            info_hash,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn announce(&self) -> &str {
        &self.announce
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn piece_length(&self) -> i64 {
        self.piece_length
    }

    pub fn total_size(&self) -> i64 {
        self.total_size
    }

    pub fn piece_hashes(&self) -> &[[u8; 20]] {
        &self.pieces
    }
}

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::Value;

    fn s(v: &str) -> Value {
        Value::Bytes(v.as_bytes().to_vec())
    }

    fn sample_metainfo(total_size: i64, piece_length: i64, num_pieces: usize) -> Vec<u8> {
        let pieces: Vec<u8> = (0..num_pieces).flat_map(|i| [i as u8; 20]).collect();
        let info = Value::Map(vec![
            (s("name"), s("file.bin")),
            (s("length"), Value::Int(total_size)),
            (s("piece length"), Value::Int(piece_length)),
            (s("pieces"), Value::Bytes(pieces)),
        ]);
        let meta = Value::Map(vec![
            (s("announce"), s("http://tracker.example/announce")),
            (s("info"), info),
        ]);
        bencode::encode(&meta)
    }

    #[test]
    fn parses_single_file_torrent() {
        let bytes = sample_metainfo(30, 10, 3);
        let torrent = Torrent::from_bytes(&bytes).unwrap();
        assert_eq!(torrent.announce(), "http://tracker.example/announce");
        assert_eq!(torrent.name(), "file.bin");
        assert_eq!(torrent.total_size(), 30);
        assert_eq!(torrent.piece_length(), 10);
        assert_eq!(torrent.piece_hashes().len(), 3);
    }

    #[test]
    fn rejects_piece_count_mismatch() {
        let bytes = sample_metainfo(30, 10, 2);
        let err = Torrent::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Metainfo(MetainfoError::PieceCountMismatch { .. })
        ));
    }

    #[test]
    fn rejects_multi_file_torrent() {
        let info = Value::Map(vec![
            (s("name"), s("dir")),
            (s("piece length"), Value::Int(10)),
            (s("pieces"), Value::Bytes(vec![0u8; 20])),
            (
                s("files"),
                Value::List(vec![Value::Map(vec![
                    (s("length"), Value::Int(10)),
                    (s("path"), Value::List(vec![s("a.bin")])),
                ])]),
            ),
        ]);
        let meta = Value::Map(vec![
            (s("announce"), s("http://tracker.example/announce")),
            (s("info"), info),
        ]);
        let bytes = bencode::encode(&meta);
        let err = Torrent::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Metainfo(MetainfoError::MultiFileUnsupported)
        ));
    }

    #[test]
    fn infohash_is_stable_across_reencoding() {
        let bytes = sample_metainfo(30, 10, 3);
        let torrent = Torrent::from_bytes(&bytes).unwrap();

        let (meta_info, _) = bencode::decode(&bytes).unwrap();
        let info = meta_info.get(b"info").unwrap();
        let mut hasher = Sha1::new();
        hasher.update(bencode::encode(info));
        let expected: [u8; 20] = hasher.finalize().into();

        assert_eq!(torrent.info_hash(), expected);
    }
}
