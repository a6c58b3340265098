//! HMS/print-error code formatting and description lookup (grounded on
//! `hms_utils.py`): hex-group rendering, per-device-serial description
//! tables loaded from `data/hms/data/hms_en_<device>.json`, lazily cached.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde_json::Value;
use tokio::sync::RwLock;

/// Default device table used when a printer's serial prefix has no
/// dedicated table. Recorded as a product decision in DESIGN.md rather
/// than silently guessed.
pub const DEFAULT_DEVICE: &str = "22E";

/// Render an integer error code as `XXXX-XXXX[-XXXX-XXXX...]`: hex, grouped
/// in 4-character chunks, left-padded to a multiple of 4 nibbles.
pub fn int_to_hex_groups(value: i64) -> String {
    let hex = format!("{:X}", value.unsigned_abs());
    let padded_len = hex.len().div_ceil(4) * 4;
    let padded = format!("{hex:0>padded_len$}");
    padded
        .as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join("-")
}

/// Strip `HMS_`/`_`/`-` from a raw attr-code pair string and re-group into
/// 4-character hex chunks, mirroring `normalize_code`.
pub fn normalize_code(raw: &str) -> String {
    let stripped: String = raw
        .trim_start_matches("HMS_")
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect();
    stripped
        .as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join("-")
}

/// Device code from the first 3 characters of a printer serial, uppercased.
pub fn device_code_for_serial(serial: &str) -> String {
    serial.chars().take(3).collect::<String>().to_ascii_uppercase()
}

struct HmsTableCache {
    data_dir: PathBuf,
    tables: RwLock<HashMap<String, Option<Value>>>,
}

static CACHE: OnceLock<HmsTableCache> = OnceLock::new();

fn cache(data_dir: &std::path::Path) -> &'static HmsTableCache {
    CACHE.get_or_init(|| HmsTableCache {
        data_dir: data_dir.to_path_buf(),
        tables: RwLock::new(HashMap::new()),
    })
}

/// Look up the human description for a normalized `code` (e.g. `"0300-2000"`)
/// against the device table for `serial`, falling back to [`DEFAULT_DEVICE`]
/// when no dedicated table exists.
pub async fn describe(data_dir: &std::path::Path, serial: &str, code: &str) -> Option<String> {
    let device = device_code_for_serial(serial);
    if let Some(desc) = lookup_in_table(data_dir, &device, code).await {
        return Some(desc);
    }
    if device != DEFAULT_DEVICE {
        return lookup_in_table(data_dir, DEFAULT_DEVICE, code).await;
    }
    None
}

async fn lookup_in_table(data_dir: &std::path::Path, device: &str, code: &str) -> Option<String> {
    let cache = cache(data_dir);
    {
        let tables = cache.tables.read().await;
        if let Some(table) = tables.get(device) {
            return table.as_ref().and_then(|t| t.get(code)).and_then(|v| v.as_str()).map(str::to_string);
        }
    }
    let path = cache.data_dir.join("hms").join("data").join(format!("hms_en_{device}.json"));
    let loaded = tokio::fs::read(&path).await.ok().and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());
    let result = loaded.as_ref().and_then(|t| t.get(code)).and_then(|v| v.as_str()).map(str::to_string);
    cache.tables.write().await.insert(device.to_string(), loaded);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_hex_groups_padded() {
        assert_eq!(int_to_hex_groups(0x300), "0300");
        assert_eq!(int_to_hex_groups(0x30002000), "3000-2000");
    }

    #[test]
    fn normalizes_prefixed_codes() {
        assert_eq!(normalize_code("HMS_0300-2000"), "0300-2000");
        assert_eq!(normalize_code("0300_2000"), "0300-2000");
    }

    #[test]
    fn device_code_uses_serial_prefix() {
        assert_eq!(device_code_for_serial("01S00A123456789"), "01S");
        assert_eq!(device_code_for_serial("ab"), "AB");
    }
}
