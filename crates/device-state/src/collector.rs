//! Periodic device state collector.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::control::ScreenControl;
use crate::platform;
use crate::state::{ChargingType, DeviceState};

/// Callback invoked with each device state snapshot.
pub type SendFn = Box<dyn Fn(DeviceState) + Send + Sync + 'static>;

/// Reads the device state at a fixed interval and hands it to a callback.
pub struct Collector {
    inner: Arc<Mutex<CollectorInner>>,
}

struct CollectorInner {
    send_fn: SendFn,
    control: ScreenControl,
    cancel: Option<CancellationToken>,
}

impl Collector {
    /// Creates a new collector with the given send callback.
    pub fn new(send_fn: SendFn) -> Self {
        Self::with_control(send_fn, ScreenControl::new())
    }

    /// Creates a collector whose snapshots carry `control`'s keep-awake flag.
    pub fn with_control(send_fn: SendFn, control: ScreenControl) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CollectorInner {
                send_fn,
                control,
                cancel: None,
            })),
        }
    }

    /// Starts periodic collection. The first snapshot is sent immediately.
    ///
    /// Intervals under one second are raised to one second.
    pub async fn start(&self, interval: Duration) {
        let mut inner = self.inner.lock().await;

        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }

        let interval = interval.max(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());

        let collector = Arc::clone(&self.inner);
        tokio::spawn(async move {
            collection_loop(collector, interval, cancel).await;
        });

        tracing::info!(interval_secs = interval.as_secs(), "device state collector started");
    }

    /// Stops the collector.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
            tracing::info!("device state collector stopped");
        }
    }

    /// Returns `true` if the collector is running.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.cancel.is_some()
    }
}

async fn collection_loop(
    inner: Arc<Mutex<CollectorInner>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut state = collect();
                let guard = inner.lock().await;
                state.keep_screen_on = guard.control.keep_awake();
                (guard.send_fn)(state);
            }
        }
    }
}

/// Reads one device state snapshot from the platform.
pub fn collect() -> DeviceState {
    let (capacity, status) = platform::read_battery();
    let (brightness, max_brightness, powered) = platform::read_backlight();
    from_readings(
        capacity,
        &status,
        &platform::read_charger_type(),
        brightness,
        max_brightness,
        powered,
    )
}

fn from_readings(
    capacity: i32,
    status: &str,
    charger: &str,
    brightness: i32,
    max_brightness: i32,
    powered: bool,
) -> DeviceState {
    // "Full" while plugged in counts as charging.
    let is_charging = matches!(status, "Charging" | "Full");
    let charging_type = match ChargingType::from_sysfs(charger) {
        ChargingType::None if is_charging => ChargingType::Unknown,
        other => other,
    };

    let screen_brightness = if brightness >= 0 && max_brightness > 0 {
        (i64::from(brightness) * 255 / i64::from(max_brightness)).clamp(0, 255) as u8
    } else {
        0
    };

    tracing::debug!(
        battery = capacity,
        is_charging,
        charging_type = charging_type.as_str(),
        screen_brightness,
        "collected device state"
    );

    DeviceState {
        battery_level: capacity,
        is_charging,
        charging_type,
        screen_brightness,
        is_screen_on: powered && (max_brightness <= 0 || brightness > 0),
        keep_screen_on: false,
        latitude: None,
        longitude: None,
        location_accuracy: None,
        timestamp: Utc::now(),
    }
}
