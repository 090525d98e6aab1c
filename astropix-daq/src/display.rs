//! Live hit display.

use log::info;

/// Receives the column and row coordinates of each nominal event as it is
/// acquired.
pub trait HitDisplay {
    /// Shows one event.
    fn show_event(&mut self, readout: u64, cols: &[u16], rows: &[u16]);
}

/// Writes each event to the log at info level.
#[derive(Debug, Default)]
pub struct LogDisplay {
    shown: u64,
}

impl LogDisplay {
    /// Creates a display.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events shown so far.
    #[must_use]
    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl HitDisplay for LogDisplay {
    fn show_event(&mut self, readout: u64, cols: &[u16], rows: &[u16]) {
        self.shown += 1;
        info!("Event {readout}: columns {cols:?}, rows {rows:?}");
    }
}
