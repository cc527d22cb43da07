//! Linux sysfs readers for battery, charger and backlight, plus the
//! backlight writer.
//!
//! Paths are resolved once on first access and cached for the lifetime of
//! the process (they are stable per boot on Linux).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const SYSFS_CLASS: &str = "/sys/class";

// ---------------------------------------------------------------------------
// Path cache (resolved once via OnceLock)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SysfsPaths {
    battery: Option<PathBuf>,
    chargers: Vec<PathBuf>,
    backlight: Option<PathBuf>,
}

static PATHS: OnceLock<SysfsPaths> = OnceLock::new();

fn cached_paths() -> &'static SysfsPaths {
    PATHS.get_or_init(|| resolve_paths(Path::new(SYSFS_CLASS)))
}

fn resolve_paths(class_root: &Path) -> SysfsPaths {
    let mut paths = SysfsPaths::default();

    // Battery and external supplies (AC adapter, USB, wireless pad).
    if let Ok(entries) = std::fs::read_dir(class_root.join("power_supply")) {
        let mut supplies: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        supplies.sort();
        for dir in supplies {
            let kind = read_trimmed(&dir.join("type")).unwrap_or_default();
            let is_battery = kind == "Battery"
                || dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("BAT"));
            if is_battery {
                if paths.battery.is_none() {
                    paths.battery = Some(dir);
                }
            } else if dir.join("online").exists() {
                paths.chargers.push(dir);
            }
        }
    }

    // First backlight device.
    if let Ok(entries) = std::fs::read_dir(class_root.join("backlight")) {
        let mut devices: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        devices.sort();
        paths.backlight = devices
            .into_iter()
            .find(|d| d.join("max_brightness").exists());
    }

    paths
}

// ---------------------------------------------------------------------------
// Public readers
// ---------------------------------------------------------------------------

/// Reads battery capacity (0-100) and status string.
pub fn read_battery() -> (i32, String) {
    battery_at(cached_paths())
}

/// Reads the kind of the online charger: `ac`, `usb`, `wireless` or `none`.
pub fn read_charger_type() -> String {
    charger_type_at(cached_paths())
}

/// Reads backlight brightness, its maximum, and whether the panel is powered.
pub fn read_backlight() -> (i32, i32, bool) {
    backlight_at(cached_paths())
}

/// Sets the backlight from a 0-255 level, scaled to `max_brightness`.
pub fn write_backlight(level: u8) -> io::Result<()> {
    write_backlight_at(cached_paths(), level)
}

fn battery_at(paths: &SysfsPaths) -> (i32, String) {
    let bat_path = match &paths.battery {
        Some(p) => p,
        None => return (-1, String::new()),
    };

    let capacity = read_trimmed(&bat_path.join("capacity"))
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(-1);

    if capacity < 0 {
        return (-1, String::new());
    }

    let status = read_trimmed(&bat_path.join("status")).unwrap_or_else(|| "Unknown".into());

    (capacity.min(100), status)
}

fn charger_type_at(paths: &SysfsPaths) -> String {
    for dir in &paths.chargers {
        if read_trimmed(&dir.join("online")).as_deref() != Some("1") {
            continue;
        }
        let kind = read_trimmed(&dir.join("type")).unwrap_or_default();
        return match kind.as_str() {
            "Mains" => "ac",
            "Wireless" => "wireless",
            k if k.starts_with("USB") => "usb",
            _ => "unknown",
        }
        .to_string();
    }
    "none".to_string()
}

fn backlight_at(paths: &SysfsPaths) -> (i32, i32, bool) {
    let dir = match &paths.backlight {
        Some(d) => d,
        None => return (-1, -1, true),
    };

    let max = read_i32(&dir.join("max_brightness")).unwrap_or(-1);
    let current = read_i32(&dir.join("actual_brightness"))
        .or_else(|| read_i32(&dir.join("brightness")))
        .unwrap_or(-1);
    // bl_power follows FB_BLANK_*; 0 means unblanked.
    let powered = read_i32(&dir.join("bl_power")).is_none_or(|v| v == 0);

    (current, max, powered)
}

fn write_backlight_at(paths: &SysfsPaths, level: u8) -> io::Result<()> {
    let dir = paths
        .backlight
        .as_ref()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no backlight device"))?;
    let max = read_i32(&dir.join("max_brightness"))
        .filter(|max| *max > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unreadable max_brightness"))?;

    let value = i64::from(level) * i64::from(max) / 255;
    std::fs::write(dir.join("brightness"), format!("{value}\n"))
}

/// Reads a file and trims whitespace.
fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_i32(path: &Path) -> Option<i32> {
    read_trimmed(path).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, content: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn reads_battery_and_usb_charger() {
        let root = tempfile::tempdir().unwrap();
        let bat = root.path().join("power_supply/BAT0");
        write(&bat, "type", "Battery\n");
        write(&bat, "capacity", "87\n");
        write(&bat, "status", "Charging\n");
        let usb = root.path().join("power_supply/usb");
        write(&usb, "type", "USB_PD\n");
        write(&usb, "online", "1\n");
        let ac = root.path().join("power_supply/ADP1");
        write(&ac, "type", "Mains\n");
        write(&ac, "online", "0\n");

        let paths = resolve_paths(root.path());
        assert_eq!(battery_at(&paths), (87, "Charging".to_string()));
        assert_eq!(charger_type_at(&paths), "usb");
    }

    #[test]
    fn no_battery_reports_sentinel() {
        let root = tempfile::tempdir().unwrap();
        let paths = resolve_paths(root.path());
        assert_eq!(battery_at(&paths), (-1, String::new()));
        assert_eq!(charger_type_at(&paths), "none");
        assert_eq!(backlight_at(&paths), (-1, -1, true));
    }

    #[test]
    fn reads_backlight() {
        let root = tempfile::tempdir().unwrap();
        let bl = root.path().join("backlight/intel_backlight");
        write(&bl, "max_brightness", "1000\n");
        write(&bl, "brightness", "900\n");
        write(&bl, "actual_brightness", "500\n");
        write(&bl, "bl_power", "4\n");

        let paths = resolve_paths(root.path());
        assert_eq!(backlight_at(&paths), (500, 1000, false));
    }

    #[test]
    fn capacity_is_capped() {
        let root = tempfile::tempdir().unwrap();
        let bat = root.path().join("power_supply/BAT1");
        write(&bat, "capacity", "104\n");

        let paths = resolve_paths(root.path());
        assert_eq!(battery_at(&paths), (100, "Unknown".to_string()));
    }

    #[test]
    fn writes_scaled_backlight() {
        let root = tempfile::tempdir().unwrap();
        let bl = root.path().join("backlight/panel");
        write(&bl, "max_brightness", "1000\n");
        write(&bl, "brightness", "10\n");
        let paths = resolve_paths(root.path());

        write_backlight_at(&paths, 255).unwrap();
        assert_eq!(read_i32(&bl.join("brightness")), Some(1000));
        write_backlight_at(&paths, 128).unwrap();
        assert_eq!(read_i32(&bl.join("brightness")), Some(501));
        write_backlight_at(&paths, 0).unwrap();
        assert_eq!(backlight_at(&paths), (0, 1000, true));
    }

    #[test]
    fn backlight_write_needs_a_device() {
        let root = tempfile::tempdir().unwrap();
        let paths = resolve_paths(root.path());
        let err = write_backlight_at(&paths, 100).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
