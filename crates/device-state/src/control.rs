//! Screen controls driven by the hub's virtual entities.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::platform;

/// Backlight writer and keep-awake flag shared with the [`Collector`].
///
/// Clones share the same flag, so a collector built from one clone reports
/// what another clone last set.
///
/// [`Collector`]: crate::Collector
#[derive(Debug, Clone, Default)]
pub struct ScreenControl {
    keep_awake: Arc<AtomicBool>,
}

impl ScreenControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backlight from a 0-255 level.
    pub fn set_brightness(&self, level: u8) -> io::Result<()> {
        platform::write_backlight(level)?;
        tracing::debug!(level, "screen brightness set");
        Ok(())
    }

    /// Holds or releases the keep-awake request. Returns true if it changed.
    pub fn set_keep_awake(&self, on: bool) -> bool {
        let changed = self.keep_awake.swap(on, Ordering::SeqCst) != on;
        if changed {
            tracing::info!(keep_awake = on, "screen keep-awake changed");
        }
        changed
    }

    pub fn keep_awake(&self) -> bool {
        self.keep_awake.load(Ordering::SeqCst)
    }
}
