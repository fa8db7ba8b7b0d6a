//! Utility functions

/// Format a byte count with binary units, e.g. `2.00 MB` for a 2 MiB chunk
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }
    format!("{:.2} {}", size, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_chunk_sizes() {
        // Two i64 values of x[3:5]
        assert_eq!(format_bytes(2 * 8), "16 B");
        // f32 channel weights for 32 dumps x 4096 channels
        assert_eq!(format_bytes(32 * 4096 * 4), "512.00 KB");
        // u8 flags for 32 dumps x 4096 channels x 16 baselines
        assert_eq!(format_bytes(32 * 4096 * 16), "2.00 MB");
        // complex64 visibilities for 32 dumps x 4096 channels x 2016 baselines
        assert_eq!(format_bytes(32 * 4096 * 2016 * 8), "1.97 GB");
    }
}
