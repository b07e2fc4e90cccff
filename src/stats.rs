use std::io::Write;

use crate::util;

pub struct DownloadStatistics {
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub quiet: bool,
}

impl DownloadStatistics {
    pub fn new() -> Self {
        Self {
            bytes_downloaded: 0,
            bytes_total: None,
            quiet: false,
        }
    }

    pub fn line(&self) -> String {
        match self.bytes_total {
            Some(total) if total > 0 => format!(
                "Downloaded {} of {} ({:.1}%)",
                util::format_bytes(self.bytes_downloaded),
                util::format_bytes(total),
                self.bytes_downloaded as f64 * 100.0 / total as f64
            ),
            _ => format!("Downloaded {}", util::format_bytes(self.bytes_downloaded)),
        }
    }

    pub fn print(&self) {
        if self.quiet {
            return;
        }
        print!("\x1b[2K\r{}", self.line());
        let _ = std::io::stdout().lock().flush();
    }
}

impl Default for DownloadStatistics {
    fn default() -> Self {
        Self::new()
    }
}
