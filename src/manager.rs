/*
src/manager.rs

The piece manager: tracks per-peer availability, per-piece block state,
expiry of in-flight requests, hash verification, and sequential disk
writes. Grounded in `original_source/src/manager.py` (`Block`, `Piece`,
`PieceManager`), restructured as an owned object guarded by a single mutex
(§5 option b) rather than Python's single-threaded-coroutine discipline.
*/

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};

use crate::bitfield::BitField;
use crate::torrent::Torrent;

pub const REQUEST_SIZE: u32 = 16384;
pub const MAX_PENDING_TIME_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Missing,
    Pending,
    Retrieved,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub piece: usize,
    pub offset: u32,
    pub length: u32,
    pub status: BlockStatus,
    pub data: Option<Vec<u8>>,
}

impl Block {
    fn new(piece: usize, offset: u32, length: u32) -> Block {
        Block {
            piece,
            offset,
            length,
            status: BlockStatus::Missing,
            data: None,
        }
    }
}

struct Piece {
    index: usize,
    blocks: Vec<Block>,
    hash: [u8; 20],
}

impl Piece {
    fn reset(&mut self) {
        for block in &mut self.blocks {
            block.status = BlockStatus::Missing;
            block.data = None;
        }
    }

    /// Marks the first Missing block Pending and returns a copy of it.
    fn next_request(&mut self) -> Option<Block> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.status == BlockStatus::Missing)?;
        block.status = BlockStatus::Pending;
        Some(block.clone())
    }

    fn block_received(&mut self, offset: u32, data: Vec<u8>) -> bool {
        match self.blocks.iter_mut().find(|b| b.offset == offset) {
            Some(block) => {
                block.status = BlockStatus::Retrieved;
                block.data = Some(data);
                true
            }
            None => false,
        }
    }

    fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| b.status == BlockStatus::Retrieved)
    }

    /// Concatenates block data in offset order. Only valid once complete.
    fn data(&self) -> Vec<u8> {
        let mut ordered: Vec<&Block> = self.blocks.iter().collect();
        ordered.sort_by_key(|b| b.offset);
        ordered
            .into_iter()
            .flat_map(|b| b.data.as_deref().unwrap_or(&[]).to_vec())
            .collect()
    }

    fn hash_matches(&self) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(self.data());
        hasher.finalize().as_slice() == self.hash
    }
}

struct PendingRequest {
    block: Block,
    added_ms: u64,
}

pub struct PieceManager {
    piece_length: i64,
    total_pieces: usize,
    peers: HashMap<Vec<u8>, BitField>,
    pending: Vec<PendingRequest>,
    missing: Vec<Piece>,
    ongoing: Vec<Piece>,
    have_count: usize,
    file: std::fs::File,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

impl PieceManager {
    pub fn new(torrent: &Torrent, output_path: &std::path::Path) -> std::io::Result<PieceManager> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(output_path)?;

        let total_pieces = torrent.piece_hashes().len();
        let piece_length = torrent.piece_length();
        let total_size = torrent.total_size();

        let mut missing = Vec::with_capacity(total_pieces);
        for (index, hash) in torrent.piece_hashes().iter().enumerate() {
            let effective_len = if index < total_pieces - 1 {
                piece_length
            } else {
                let rem = total_size - (total_pieces as i64 - 1) * piece_length;
                if rem > 0 {
                    rem
                } else {
                    piece_length
                }
            };
            let blocks = build_blocks(index, effective_len as u64);
            missing.push(Piece {
                index,
                blocks,
                hash: *hash,
            });
        }

        Ok(PieceManager {
            piece_length,
            total_pieces,
            peers: HashMap::new(),
            pending: Vec::new(),
            missing,
            ongoing: Vec::new(),
            have_count: 0,
            file,
        })
    }

    pub fn add_peer(&mut self, peer_id: Vec<u8>, bitfield: BitField) {
        self.peers.insert(peer_id, bitfield);
    }

    pub fn update_peer(&mut self, peer_id: &[u8], piece_index: usize) {
        if let Some(bf) = self.peers.get_mut(peer_id) {
            bf.set(piece_index);
        }
    }

    pub fn remove_peer(&mut self, peer_id: &[u8]) {
        self.peers.remove(peer_id);
    }

    pub fn next_request(&mut self, peer_id: &[u8]) -> Option<Block> {
        if !self.peers.contains_key(peer_id) {
            return None;
        }
        self.expired_request(peer_id)
            .or_else(|| self.next_ongoing(peer_id))
            .or_else(|| self.next_missing(peer_id))
    }

    fn peer_has(&self, peer_id: &[u8], piece_index: usize) -> bool {
        self.peers
            .get(peer_id)
            .map(|bf| bf.has_piece(piece_index))
            .unwrap_or(false)
    }

    fn expired_request(&mut self, peer_id: &[u8]) -> Option<Block> {
        let current = now_ms();
        for req in self.pending.iter_mut() {
            if self.peers.get(peer_id).map_or(false, |bf| bf.has_piece(req.block.piece))
                && current.saturating_sub(req.added_ms) >= MAX_PENDING_TIME_MS
            {
                req.added_ms = current;
                return Some(req.block.clone());
            }
        }
        None
    }

    fn next_ongoing(&mut self, peer_id: &[u8]) -> Option<Block> {
        for piece in self.ongoing.iter_mut() {
            if self.peers.get(peer_id).map_or(false, |bf| bf.has_piece(piece.index)) {
                if let Some(block) = piece.next_request() {
                    self.pending.push(PendingRequest {
                        block: block.clone(),
                        added_ms: now_ms(),
                    });
                    return Some(block);
                }
            }
        }
        None
    }

    fn next_missing(&mut self, peer_id: &[u8]) -> Option<Block> {
        let pos = self
            .missing
            .iter()
            .position(|piece| self.peer_has(peer_id, piece.index))?;
        let mut piece = self.missing.remove(pos);
        let block = piece.next_request();
        if let Some(b) = &block {
            self.pending.push(PendingRequest {
                block: b.clone(),
                added_ms: now_ms(),
            });
        }
        self.ongoing.push(piece);
        block
    }

    pub fn block_received(
        &mut self,
        _peer_id: &[u8],
        piece_index: usize,
        offset: u32,
        data: Vec<u8>,
    ) -> std::io::Result<()> {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|r| r.block.piece == piece_index && r.block.offset == offset)
        {
            self.pending.remove(pos);
        }

        let Some(piece_pos) = self.ongoing.iter().position(|p| p.index == piece_index) else {
            log::warn!("block received for piece {piece_index} that is not ongoing");
            return Ok(());
        };

        let received = self.ongoing[piece_pos].block_received(offset, data);
        if !received {
            log::warn!("block received at unknown offset {offset} for piece {piece_index}");
            return Ok(());
        }

        if !self.ongoing[piece_pos].is_complete() {
            return Ok(());
        }

        if self.ongoing[piece_pos].hash_matches() {
            let piece = self.ongoing.remove(piece_pos);
            self.write_piece(&piece)?;
            self.have_count += 1;
            log::info!(
                "{}/{} pieces downloaded ({})",
                self.have_count,
                self.total_pieces,
                crate::utils::format_progress(self.have_count, self.total_pieces)
            );
        } else {
            log::info!("discarding corrupt piece {piece_index}");
            self.ongoing[piece_pos].reset();
        }

        Ok(())
    }

    fn write_piece(&mut self, piece: &Piece) -> std::io::Result<()> {
        let pos = piece.index as i64 * self.piece_length;
        self.file.seek(SeekFrom::Start(pos as u64))?;
        self.file.write_all(&piece.data())
    }

    pub fn complete(&self) -> bool {
        self.have_count == self.total_pieces
    }

    /// Approximation: counts only full verified pieces, so the true size of
    /// a shorter final piece is not accounted for. Documented in spec.md §4.3.
    pub fn bytes_downloaded(&self) -> u64 {
        self.have_count as u64 * self.piece_length as u64
    }

    pub fn close(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn build_blocks(piece_index: usize, effective_len: u64) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut offset: u64 = 0;
    while offset < effective_len {
        let remaining = effective_len - offset;
        let len = remaining.min(REQUEST_SIZE as u64) as u32;
        blocks.push(Block::new(piece_index, offset as u32, len));
        offset += len as u64;
    }
    blocks
}
