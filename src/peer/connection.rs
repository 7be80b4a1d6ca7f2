/*
src/peer/connection.rs

Per-peer finite-state machine (§4.4). Each `Connection` owns its own mio
`Poll`/`TcpStream` (kept from the teacher's reactor-per-connection design)
and runs on its own OS thread (`spawn_peer`); the piece manager is reached
through a shared `Arc<Mutex<PieceManager>>`, held only across `next_request`
and `block_received` calls, reproducing the single-owner discipline of
§5(b) on a preemptive runtime.
*/

use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::bitfield::BitField;
use crate::error::{Error, Result};
use crate::manager::PieceManager;
use crate::peer::handshake::{self, Handshake};
use crate::peer::message::{self, Message, Parsed};

const SOCKET_TOKEN: Token = Token(0);
const HANDSHAKE_MAX_TRIES: usize = 10;
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Our side's flow-control flags (§4.4 "Session states").
#[derive(Debug, Default)]
struct OurState {
    choked: bool,
    interested: bool,
    pending_request: bool,
}

/// The remote peer's flags, as reported to us.
#[derive(Debug, Default)]
struct PeerState {
    interested: bool,
}

pub type BlockCallback = Arc<dyn Fn(&[u8], usize, u32, Vec<u8>) + Send + Sync>;

pub struct Connection {
    stream: TcpStream,
    poll: Poll,
    addr: SocketAddr,
    pub peer_id: [u8; 20],
    our: OurState,
    peer: PeerState,
    bitfield: BitField,
    buffer: Vec<u8>,
}

impl Connection {
    /// Connects to `addr`, performs the handshake, and returns a session
    /// ready to enter the message loop. Fails with a `ProtocolError` if the
    /// peer's infohash does not match ours.
    pub fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        my_id: [u8; 20],
        num_pieces: usize,
    ) -> Result<Connection> {
        let mut stream = TcpStream::connect(addr)?;
        let mut poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, SOCKET_TOKEN, Interest::WRITABLE)?;
        poll_once(&mut poll, Duration::from_secs(5))?;

        stream.write_all(&Handshake::new(info_hash, my_id).to_bytes())?;
        poll.registry()
            .reregister(&mut stream, SOCKET_TOKEN, Interest::READABLE)?;

        let read_fn = |buf: &mut Vec<u8>| -> Result<usize> {
            poll_once(&mut poll, Duration::from_secs(5))?;
            let mut chunk = [0u8; 512];
            match stream.read(&mut chunk) {
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    Ok(n)
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(Error::from(e)),
            }
        };
        let (handshake, rest) = handshake::read_handshake(read_fn, HANDSHAKE_MAX_TRIES)?;

        if !handshake.check(&info_hash) {
            return Err(Error::protocol("peer returned a different infohash"));
        }

        log::info!("handshake with {addr} succeeded");

        Ok(Connection {
            stream,
            poll,
            addr,
            peer_id: handshake.peer_id,
            our: OurState::default(),
            peer: PeerState::default(),
            bitfield: BitField::new(num_pieces),
            buffer: rest,
        })
    }

    /// Drives the message loop until the connection ends (peer closed it,
    /// a protocol error occurred, or `stopped` was set). Registers/removes
    /// this peer with `manager` on entry/exit.
    pub fn run(
        &mut self,
        manager: &Arc<Mutex<PieceManager>>,
        on_block: &BlockCallback,
        stopped: &AtomicBool,
    ) -> Result<()> {
        manager
            .lock()
            .unwrap()
            .add_peer(self.peer_id.to_vec(), self.bitfield.clone());

        self.send(&Message::Interested)?;
        self.our.interested = true;

        let result = self.message_loop(manager, on_block, stopped);

        manager.lock().unwrap().remove_peer(&self.peer_id);
        result
    }

    fn message_loop(
        &mut self,
        manager: &Arc<Mutex<PieceManager>>,
        on_block: &BlockCallback,
        stopped: &AtomicBool,
    ) -> Result<()> {
        loop {
            if stopped.load(Ordering::Relaxed) {
                return Ok(());
            }

            self.poll_and_fill()?;

            while let Parsed::Message(msg) = message::try_parse(&mut self.buffer)? {
                match msg {
                    None => {} // unknown id, already logged in try_parse
                    Some(Message::Bitfield(bits)) => {
                        let bf = BitField::from_payload(bits, self.bitfield.bits());
                        manager.lock().unwrap().add_peer(self.peer_id.to_vec(), bf.clone());
                        self.bitfield = bf;
                    }
                    Some(Message::Have(index)) => {
                        manager
                            .lock()
                            .unwrap()
                            .update_peer(&self.peer_id, index as usize);
                        self.bitfield.set(index as usize);
                    }
                    Some(Message::Choke) => self.our.choked = true,
                    Some(Message::Unchoke) => self.our.choked = false,
                    Some(Message::Interested) => self.peer.interested = true,
                    Some(Message::NotInterested) => self.peer.interested = false,
                    Some(Message::KeepAlive) => {}
                    Some(Message::Piece(index, begin, block)) => {
                        self.our.pending_request = false;
                        on_block(&self.peer_id, index as usize, begin, block);
                    }
                    Some(Message::Request(..)) | Some(Message::Cancel(..)) => {
                        log::debug!("ignoring upload-direction message from {}", self.addr);
                    }
                    Some(Message::Port(_)) => {}
                }
            }

            if !self.our.choked && self.our.interested && !self.our.pending_request {
                let block = manager.lock().unwrap().next_request(&self.peer_id);
                if let Some(block) = block {
                    self.send(&Message::Request(
                        block.piece as u32,
                        block.offset,
                        block.length,
                    ))?;
                    self.our.pending_request = true;
                }
            }
        }
    }

    fn poll_and_fill(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(32);
        self.poll.poll(&mut events, Some(POLL_TIMEOUT))?;
        if events.is_empty() {
            return Ok(());
        }
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(Error::protocol("peer closed the connection")),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(Error::from(e)),
            }
        }
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        self.stream.write_all(&message.serialize())?;
        Ok(())
    }

    pub fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn poll_once(poll: &mut Poll, timeout: Duration) -> Result<()> {
    let mut events = Events::with_capacity(4);
    poll.poll(&mut events, Some(timeout))?;
    Ok(())
}

/// A worker loop: repeatedly pulls one endpoint from `candidates`,
/// connects, runs the session, and loops — unless `stopped` is set, in
/// which case it exits.
pub fn run_worker(
    candidates: crossbeam::channel::Receiver<SocketAddr>,
    info_hash: [u8; 20],
    my_id: [u8; 20],
    num_pieces: usize,
    manager: Arc<Mutex<PieceManager>>,
    on_block: BlockCallback,
    stopped: Arc<AtomicBool>,
) {
    while !stopped.load(Ordering::Relaxed) {
        let addr = match candidates.recv_timeout(Duration::from_millis(500)) {
            Ok(addr) => addr,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
        };

        match Connection::connect(addr, info_hash, my_id, num_pieces) {
            Ok(mut conn) => {
                if let Err(e) = conn.run(&manager, &on_block, &stopped) {
                    log::warn!("session with {addr} ended: {e}");
                }
                conn.close();
            }
            Err(e) => {
                log::warn!("could not connect to {addr}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// Spins up a real TCP listener standing in for a remote peer, accepts
    /// one connection, and writes a handshake with `reply_info_hash`.
    fn fake_peer(reply_info_hash: [u8; 20], reply_peer_id: [u8; 20]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut incoming = [0u8; handshake::HANDSHAKE_LEN];
            std::io::Read::read_exact(&mut stream, &mut incoming).unwrap();
            let reply = Handshake::new(reply_info_hash, reply_peer_id).to_bytes();
            std::io::Write::write_all(&mut stream, &reply).unwrap();
        });
        addr
    }

    #[test]
    fn connect_succeeds_with_matching_infohash() {
        let info_hash = [5u8; 20];
        let remote_peer_id = [6u8; 20];
        let addr = fake_peer(info_hash, remote_peer_id);
        let conn = Connection::connect(addr, info_hash, [1u8; 20], 10).unwrap();
        assert_eq!(conn.peer_id, remote_peer_id);
    }

    #[test]
    fn connect_rejects_mismatched_infohash() {
        let addr = fake_peer([9u8; 20], [6u8; 20]);
        let result = Connection::connect(addr, [5u8; 20], [1u8; 20], 10);
        assert!(result.is_err());
    }
}
