/*
src/utils.rs

Small formatting helpers shared by the CLI and the piece manager's progress
logging. Peer id generation and tracker/torrent plumbing that used to live
here moved to `coordinator.rs` and `tracker::http` respectively, since both
need the engine's own types rather than being free-standing utilities.
*/

/// Formats a byte count as a human-readable size, e.g. `"3.4 MiB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Formats `have / total` as a percentage string, e.g. `"42.3%"`.
pub fn format_progress(have: usize, total: usize) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", 100.0 * have as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_small_byte_counts_without_scaling() {
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn formats_megabyte_scale() {
        assert_eq!(format_bytes(3 * 1024 * 1024 + 512 * 1024), "3.5 MiB");
    }

    #[test]
    fn formats_progress_percentage() {
        assert_eq!(format_progress(1, 4), "25.0%");
        assert_eq!(format_progress(0, 0), "0.0%");
    }
}
