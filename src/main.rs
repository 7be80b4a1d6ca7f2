use std::path::PathBuf;
use std::sync::atomic::Ordering;

use bittorrent_leecher::coordinator::Coordinator;
use bittorrent_leecher::torrent::Torrent;
use bittorrent_leecher::utils::format_bytes;
use bittorrent_leecher::DEFAULT_PORT;
use clap::Parser;

/// A leecher-mode BitTorrent client: downloads a single-file torrent to disk
/// and exits once every piece is verified.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the .torrent metainfo file.
    #[arg(long)]
    torrent: PathBuf,

    /// Port advertised to the tracker. This client never accepts inbound
    /// connections; the port is reported for protocol compliance only.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Output path. Defaults to the metainfo's info.name in the current directory.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Increase log verbosity; repeatable (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all logging below error level.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose, args.quiet);

    let torrent = Torrent::from_file(&args.torrent)?;
    let out_path = args.out.unwrap_or_else(|| PathBuf::from(torrent.name()));

    log::info!(
        "downloading {:?} ({}) to {:?}",
        torrent.name(),
        format_bytes(torrent.total_size() as u64),
        out_path
    );

    let mut coordinator = Coordinator::new(torrent, args.port, &out_path)?;
    let stop_flag = coordinator.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("received SIGINT, stopping gracefully");
        stop_flag.store(true, Ordering::Relaxed);
    })?;

    coordinator.run()?;
    log::info!("done");
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        log::LevelFilter::Error
    } else {
        match verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new().filter_level(level).init();
}
