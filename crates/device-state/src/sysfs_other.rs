//! Stub readers for platforms without sysfs.

use std::io;

pub fn read_battery() -> (i32, String) {
    (-1, String::new())
}
pub fn read_charger_type() -> String {
    "unknown".to_string()
}
pub fn read_backlight() -> (i32, i32, bool) {
    (-1, -1, true)
}
pub fn write_backlight(_level: u8) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "backlight control is not supported on this platform",
    ))
}
