//! Static per-model/per-AMS-product field-override registry (§4.4 step 6):
//! some printer/AMS models don't expose certain telemetry fields, so the
//! UI hides them rather than show stale defaults.

use std::collections::HashMap;

use crate::models::{AmsUnitCapabilities, PrinterCapabilities};

fn printer_overrides() -> &'static [(&'static str, &'static [&'static str])] {
    &[("bambu lab a1", &["chamber_temp", "fan_gear", "layer_inspect"])]
}

fn ams_overrides() -> &'static [(&'static str, &'static [&'static str])] {
    &[("ams lite", &["trays.remain", "unit.humidity", "unit.temp"])]
}

fn build_fields(hidden: &[&str]) -> HashMap<String, HashMap<String, bool>> {
    let mut fields: HashMap<String, HashMap<String, bool>> = HashMap::new();
    for path in hidden {
        let mut visibility = HashMap::new();
        visibility.insert("visible".to_string(), false);
        fields.insert((*path).to_string(), visibility);
    }
    fields
}

pub fn apply_printer_capabilities(model: Option<&str>) -> PrinterCapabilities {
    let lowered = model.map(str::to_ascii_lowercase);
    let fields = lowered
        .as_deref()
        .and_then(|m| printer_overrides().iter().find(|(key, _)| *key == m))
        .map(|(_, hidden)| build_fields(hidden))
        .unwrap_or_default();
    PrinterCapabilities { model: model.map(str::to_string), fields }
}

pub fn apply_ams_capabilities(product_name: Option<&str>) -> AmsUnitCapabilities {
    let lowered = product_name.map(str::to_ascii_lowercase);
    let fields = lowered
        .as_deref()
        .and_then(|m| ams_overrides().iter().find(|(key, _)| *key == m))
        .map(|(_, hidden)| build_fields(hidden))
        .unwrap_or_default();
    AmsUnitCapabilities { product_name: product_name.map(str::to_string), fields }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_hides_chamber_temp() {
        let caps = apply_printer_capabilities(Some("Bambu Lab A1"));
        assert_eq!(caps.fields["chamber_temp"]["visible"], false);
    }

    #[test]
    fn unknown_model_has_no_overrides() {
        let caps = apply_printer_capabilities(Some("X1 Carbon"));
        assert!(caps.fields.is_empty());
    }

    #[test]
    fn ams_lite_hides_remain_and_humidity() {
        let caps = apply_ams_capabilities(Some("AMS lite"));
        assert!(caps.fields.contains_key("trays.remain"));
        assert!(caps.fields.contains_key("unit.humidity"));
    }
}
