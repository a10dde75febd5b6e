use std::io::Write;

use crate::util;

/// Running total of remuxed bytes written by the standalone downloader.
pub struct TransferProgress {
    pub bytes_received: u64,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self { bytes_received: 0 }
    }

    pub fn update(&mut self, bytes_received: u64) {
        self.bytes_received = bytes_received;
        self.print();
    }

    pub fn line(&self) -> String {
        format!(
            "Status: Receiving... | Total Size: {}",
            util::format_bytes(self.bytes_received)
        )
    }

    pub fn print(&self) {
        print!("\x1b[2K\r{}", self.line());
        let _ = std::io::stdout().lock().flush();
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}
