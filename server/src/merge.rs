//! Deep-merge of raw MQTT payloads into the accumulated master document
//! (§4.3). Printers report partial updates interleaved with full pushes;
//! a handful of sentinel values mean "no update" rather than "clear this
//! field", so a naive merge would erase richer prior state.

use serde_json::Value;

/// Sentinel values a printer may report in place of "nothing changed".
pub fn is_sentinel(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.is_empty() || trimmed == "?" || trimmed == "0/0"
        }
        _ => false,
    }
}

/// Recursively merge `new` into `old`, in place. Dicts merge key by key;
/// sentinel values in `new` are dropped (the prior value survives); lists,
/// numbers, booleans, and non-sentinel strings replace outright.
pub fn merge_into(old: &mut Value, new: &Value) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_val) in new_map {
                if is_sentinel(new_val) {
                    continue;
                }
                match old_map.get_mut(key) {
                    Some(existing) if existing.is_object() && new_val.is_object() => {
                        merge_into(existing, new_val);
                    }
                    _ => {
                        old_map.insert(key.clone(), new_val.clone());
                    }
                }
            }
        }
        (old_slot, new_val) => {
            if !is_sentinel(new_val) {
                *old_slot = new_val.clone();
            }
        }
    }
}

/// Merge `new` on top of `old`, returning a fresh value (used where the
/// caller wants an immutable-looking API).
pub fn merge(old: &Value, new: &Value) -> Value {
    let mut result = old.clone();
    merge_into(&mut result, new);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sentinel_values_preserve_prior_state() {
        let old = json!({"print": {"gcode_state": "RUNNING", "layer_num": "10/30"}});
        let new = json!({"print": {"gcode_state": "", "layer_num": "0/0"}});
        let merged = merge(&old, &new);
        assert_eq!(merged["print"]["gcode_state"], "RUNNING");
        assert_eq!(merged["print"]["layer_num"], "10/30");
    }

    #[test]
    fn non_sentinel_values_replace() {
        let old = json!({"print": {"mc_percent": 10}});
        let new = json!({"print": {"mc_percent": 42}});
        assert_eq!(merge(&old, &new)["print"]["mc_percent"], 42);
    }

    #[test]
    fn nested_dicts_merge_recursively() {
        let old = json!({"print": {"ams": {"ams_exist_bits": "1", "tray_now": "0"}}});
        let new = json!({"print": {"ams": {"tray_now": "2"}}});
        let merged = merge(&old, &new);
        assert_eq!(merged["print"]["ams"]["ams_exist_bits"], "1");
        assert_eq!(merged["print"]["ams"]["tray_now"], "2");
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let old = json!({"a": 1, "b": {"c": 2}});
        assert_eq!(merge(&old, &json!({})), old);
    }

    #[test]
    fn lists_replace_rather_than_concatenate() {
        let old = json!({"print": {"hms": [1, 2, 3]}});
        let new = json!({"print": {"hms": [9]}});
        assert_eq!(merge(&old, &new)["print"]["hms"], json!([9]));
    }
}
