pub mod bencode;
pub mod bitfield;
pub mod coordinator;
pub mod error;
pub mod manager;
pub mod torrent;
pub mod utils;

pub mod tracker {
    pub mod http;
    pub mod udp;
}

pub mod peer {
    pub mod connection;
    pub mod handshake;
    pub mod message;
}

/// Azureus-style client id prefix component (§6).
pub const CLIENT_ID: &str = "PC";
/// Azureus-style client version component (§6).
pub const CLIENT_VERSION: &str = "0001";
/// Port advertised to the tracker when the CLI does not override it.
pub const DEFAULT_PORT: u16 = 6889;
/// Announce interval assumed until the tracker's first response says otherwise.
pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u64 = 1800;

pub use coordinator::MAX_PEER_CONNECTIONS;
pub use manager::{MAX_PENDING_TIME_MS, REQUEST_SIZE};
