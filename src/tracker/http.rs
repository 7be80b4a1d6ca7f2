/*
src/tracker/http.rs

HTTP tracker client (§4.5). Request construction kept from the teacher's
announce/scrape functions; the socket and HTTP/1.1 framing are now
delegated to `ureq` (the HTTP transport is an external collaborator, not an
in-scope hand-rolled concern), and the bencoded response body is parsed with
`crate::bencode` instead of `serde_bencode`.
*/

use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use url::Url;
use urlencoding::encode_binary;

use crate::bencode::{self, Value};
use crate::error::{Error, Result};
use crate::torrent::Torrent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Started,
    Stopped,
    Completed,
}

impl Event {
    fn as_str(self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Stopped => "stopped",
            Event::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerResponse {
    pub interval: u64,
    pub complete: u64,
    pub incomplete: u64,
    pub peers: Vec<SocketAddr>,
    pub failure: Option<String>,
}

/// Announces to `torrent.announce()` and parses the tracker's response.
///
/// `left` should be `total_size - downloaded`. `event` is only meaningful
/// on the first announce of a session.
pub fn announce(
    torrent: &Torrent,
    peer_id: [u8; 20],
    port: u16,
    uploaded: u64,
    downloaded: u64,
    left: u64,
    event: Option<Event>,
) -> Result<TrackerResponse> {
    let mut url = Url::parse(torrent.announce())?;

    let mut query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        encode_binary(&torrent.info_hash()),
        encode_binary(&peer_id),
        port,
        uploaded,
        downloaded,
        left,
    );
    if let Some(event) = event {
        query.push_str("&event=");
        query.push_str(event.as_str());
    }
    url.set_query(Some(&query));

    log::debug!("announce: {url}");

    let response = ureq::get(url.as_str()).call()?;
    let status = response.status();
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(Error::from)?;

    if status != 200 {
        return Err(Error::Http(format!("tracker returned HTTP {status}")));
    }

    parse_announce_response(&body)
}

fn parse_announce_response(body: &[u8]) -> Result<TrackerResponse> {
    let (value, _) = bencode::decode(body)?;
    if value.as_map().is_none() {
        return Err(Error::protocol("tracker response is not a bencoded dictionary"));
    }

    let failure = value
        .get(b"failure reason")
        .and_then(Value::as_bytes)
        .map(|b| String::from_utf8_lossy(b).into_owned());
    if let Some(reason) = failure {
        return Err(Error::Http(format!("tracker failure: {reason}")));
    }

    let interval = value.get(b"interval").and_then(Value::as_int).unwrap_or(0) as u64;
    let complete = value.get(b"complete").and_then(Value::as_int).unwrap_or(0) as u64;
    let incomplete = value.get(b"incomplete").and_then(Value::as_int).unwrap_or(0) as u64;
    let peers = match value.get(b"peers") {
        Some(peers) => parse_peers(peers)?,
        None => Vec::new(),
    };

    Ok(TrackerResponse {
        interval,
        complete,
        incomplete,
        peers,
        failure: None,
    })
}

/// Accepts both the compact binary encoding and the dictionary-list
/// encoding of `peers` (§4.5).
fn parse_peers(value: &Value) -> Result<Vec<SocketAddr>> {
    match value {
        Value::Bytes(raw) => {
            if raw.len() % 6 != 0 {
                return Err(Error::protocol("compact peers length not a multiple of 6"));
            }
            Ok(raw
                .chunks_exact(6)
                .map(|chunk| {
                    let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                    let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                    SocketAddr::V4(SocketAddrV4::new(ip, port))
                })
                .collect())
        }
        Value::List(entries) => entries
            .iter()
            .map(|entry| {
                let ip_bytes = entry
                    .get(b"ip")
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| Error::protocol("peer dictionary missing ip"))?;
                let ip: Ipv4Addr = String::from_utf8_lossy(ip_bytes)
                    .parse()
                    .map_err(|_| Error::protocol("peer dictionary ip is not a valid IPv4 address"))?;
                let port = entry
                    .get(b"port")
                    .and_then(Value::as_int)
                    .ok_or_else(|| Error::protocol("peer dictionary missing port"))? as u16;
                Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
            })
            .collect(),
        _ => Err(Error::protocol("peers field is neither a byte string nor a list")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Bytes(v.as_bytes().to_vec())
    }

    #[test]
    fn e5_compact_peers_parse() {
        let raw = vec![1, 2, 3, 4, 0x1A, 0xE1, 127, 0, 0, 1, 0x1A, 0xE1];
        let peers = parse_peers(&Value::Bytes(raw)).unwrap();
        assert_eq!(
            peers,
            vec![
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881)),
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881)),
            ]
        );
    }

    #[test]
    fn dictionary_mode_peers_parse() {
        let list = Value::List(vec![Value::Map(vec![
            (s("ip"), s("10.0.0.5")),
            (s("port"), Value::Int(51413)),
        ])]);
        let peers = parse_peers(&list).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].port(), 51413);
    }

    #[test]
    fn compact_peers_with_bad_length_is_an_error() {
        let raw = vec![1, 2, 3, 4, 5];
        assert!(parse_peers(&Value::Bytes(raw)).is_err());
    }

    #[test]
    fn parses_full_announce_response() {
        let body = Value::Map(vec![
            (s("interval"), Value::Int(1800)),
            (s("complete"), Value::Int(3)),
            (s("incomplete"), Value::Int(7)),
            (s("peers"), Value::Bytes(vec![1, 2, 3, 4, 0x1A, 0xE1])),
        ]);
        let encoded = bencode::encode(&body);
        let parsed = parse_announce_response(&encoded).unwrap();
        assert_eq!(parsed.interval, 1800);
        assert_eq!(parsed.complete, 3);
        assert_eq!(parsed.incomplete, 7);
        assert_eq!(parsed.peers.len(), 1);
    }

    #[test]
    fn failure_reason_is_a_connection_error() {
        let body = Value::Map(vec![(s("failure reason"), s("torrent not registered"))]);
        let encoded = bencode::encode(&body);
        assert!(parse_announce_response(&encoded).is_err());
    }
}
