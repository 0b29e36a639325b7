// Status display handles
//
// The runtime owns one StatusDisplay and writes short status lines to it. Writes are
// fire-and-forget: a display that cannot show a line drops it.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::messages::StatusLine;

pub trait StatusDisplay {
    fn write_text(&mut self, text: &str, x: i32, y: i32);
}

/// Display that writes lines to the log
#[derive(Debug, Default)]
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn write_text(&mut self, text: &str, x: i32, y: i32) {
        info!("[display {},{}] {}", x, y, text);
    }
}

/// Display that forwards lines to an async publisher task
#[derive(Debug, Clone)]
pub struct ChannelDisplay {
    tx: UnboundedSender<StatusLine>,
}

impl ChannelDisplay {
    pub fn new(tx: UnboundedSender<StatusLine>) -> Self {
        Self { tx }
    }
}

impl StatusDisplay for ChannelDisplay {
    fn write_text(&mut self, text: &str, x: i32, y: i32) {
        let line = StatusLine { text: text.to_string(), x, y };
        if self.tx.send(line).is_err() {
            debug!("Display channel closed, dropping '{}'", text);
        }
    }
}
