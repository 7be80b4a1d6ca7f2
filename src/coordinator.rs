/*
src/coordinator.rs

Owns the whole download: tracker announce loop, candidate-peer queue, and
the pool of peer workers (§4.6). Grounded in
`original_source/src/client.py`'s `TorrentClient`, restructured from its
single-threaded asyncio event loop onto the teacher's thread-per-connection
model — the announce loop runs on the calling thread while
`MAX_PEER_CONNECTIONS` worker threads block on a crossbeam channel.
*/

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::Result;
use crate::manager::PieceManager;
use crate::peer::connection::{self, BlockCallback};
use crate::torrent::Torrent;
use crate::tracker::http::{self, Event};
use crate::{CLIENT_ID, CLIENT_VERSION, DEFAULT_ANNOUNCE_INTERVAL_SECS};

pub const MAX_PEER_CONNECTIONS: usize = 30;
const POLL_SLEEP: Duration = Duration::from_secs(5);

/// Azureus-style peer id: `-PC0001-` followed by 12 random decimal digits.
pub fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    let prefix = format!("-{CLIENT_ID}{CLIENT_VERSION}-");
    id[..prefix.len()].copy_from_slice(prefix.as_bytes());
    let mut rng = rand::thread_rng();
    for byte in &mut id[prefix.len()..] {
        *byte = b'0' + rng.gen_range(0..10);
    }
    id
}

pub struct Coordinator {
    torrent: Torrent,
    peer_id: [u8; 20],
    port: u16,
    manager: Arc<Mutex<PieceManager>>,
    candidates: crossbeam::channel::Sender<std::net::SocketAddr>,
    candidates_rx: crossbeam::channel::Receiver<std::net::SocketAddr>,
    stopped: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(torrent: Torrent, port: u16, output_path: &Path) -> Result<Coordinator> {
        let manager = PieceManager::new(&torrent, output_path)?;
        let (tx, rx) = crossbeam::channel::unbounded();
        Ok(Coordinator {
            torrent,
            peer_id: generate_peer_id(),
            port,
            manager: Arc::new(Mutex::new(manager)),
            candidates: tx,
            candidates_rx: rx,
            stopped: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        })
    }

    /// Spawns the worker pool and drives the announce loop until the
    /// torrent completes or `stop()` is called from another thread.
    pub fn run(&mut self) -> Result<()> {
        self.spawn_workers();

        let mut previous: Option<Instant> = None;
        let mut interval = Duration::from_secs(DEFAULT_ANNOUNCE_INTERVAL_SECS);

        loop {
            if self.manager.lock().unwrap().complete() {
                log::info!("torrent fully downloaded");
                break;
            }
            if self.stopped.load(Ordering::Relaxed) {
                log::info!("aborting download");
                break;
            }

            let now = Instant::now();
            let due = previous.map_or(true, |p| now.duration_since(p) >= interval);
            if due {
                let event = if previous.is_none() { Some(Event::Started) } else { None };
                match self.announce(event) {
                    Ok(response) => {
                        previous = Some(now);
                        if response.interval > 0 {
                            interval = Duration::from_secs(response.interval);
                        }
                        self.drain_candidates();
                        for addr in response.peers {
                            let _ = self.candidates.send(addr);
                        }
                    }
                    Err(e) if previous.is_none() => {
                        self.stop();
                        return Err(e);
                    }
                    Err(e) => {
                        log::warn!("announce failed, retrying at next interval: {e}");
                        previous = Some(now);
                    }
                }
            } else {
                std::thread::sleep(POLL_SLEEP);
            }
        }

        self.stop();
        Ok(())
    }

    fn announce(&self, event: Option<Event>) -> Result<http::TrackerResponse> {
        let (downloaded, left) = {
            let manager = self.manager.lock().unwrap();
            let downloaded = manager.bytes_downloaded();
            let left = (self.torrent.total_size() as u64).saturating_sub(downloaded);
            (downloaded, left)
        };
        http::announce(
            &self.torrent,
            self.peer_id,
            self.port,
            0,
            downloaded,
            left,
            event,
        )
    }

    fn drain_candidates(&self) {
        while self.candidates_rx.try_recv().is_ok() {}
    }

    fn spawn_workers(&mut self) {
        let on_block: BlockCallback = Arc::new({
            let manager = Arc::clone(&self.manager);
            move |peer_id, piece_index, offset, data| {
                if let Err(e) = manager.lock().unwrap().block_received(peer_id, piece_index, offset, data) {
                    log::warn!("failed writing received block: {e}");
                }
            }
        });

        for _ in 0..MAX_PEER_CONNECTIONS {
            let candidates_rx = self.candidates_rx.clone();
            let info_hash = self.torrent.info_hash();
            let my_id = self.peer_id;
            let num_pieces = self.torrent.piece_hashes().len();
            let manager = Arc::clone(&self.manager);
            let on_block = Arc::clone(&on_block);
            let stopped = Arc::clone(&self.stopped);

            let handle = std::thread::spawn(move || {
                connection::run_worker(candidates_rx, info_hash, my_id, num_pieces, manager, on_block, stopped);
            });
            self.workers.push(handle);
        }
    }

    /// Signals every worker and the announce loop to stop, then joins the
    /// workers and closes the manager. Safe to call from a SIGINT handler
    /// via the `Arc<AtomicBool>` returned by `stop_handle()`.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Err(e) = self.manager.lock().unwrap().close() {
            log::warn!("error closing output file: {e}");
        }
    }

    /// A clone of the stop flag, for wiring into a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_peer_id_has_azureus_prefix_and_length() {
        let id = generate_peer_id();
        assert_eq!(id.len(), 20);
        assert_eq!(&id[..8], b"-PC0001-");
        assert!(id[8..].iter().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn generated_peer_ids_are_not_constant() {
        let a = generate_peer_id();
        let b = generate_peer_id();
        assert_ne!(a, b, "two generations should not collide in practice");
    }
}
