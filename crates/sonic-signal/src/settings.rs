//! Calibration settings access.
//!
//! The pipeline never owns persistence: calibration lives in whatever store
//! the host provides and is read through [`SettingsStore`] on every tick.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sonic_core::CalibrationParams;

pub const KEY_BASE_SENSITIVITY: &str = "baseSensitivity";
pub const KEY_MEDIAN_MULTIPLIER: &str = "medianMultiplier";
pub const KEY_INVERT_GESTURE: &str = "invertGesture";

/// Value held by a settings key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Float(f64),
}

impl SettingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Float(v) => Some(*v),
            SettingValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(v) => Some(*v),
            SettingValue::Float(_) => None,
        }
    }
}

/// Narrow key-value interface to the host's settings storage
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<SettingValue>;

    fn set(&self, key: &str, value: SettingValue);
}

/// Process-local settings store
#[derive(Debug, Default)]
pub struct InMemorySettings {
    values: RwLock<HashMap<String, SettingValue>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calibration(calibration: CalibrationParams) -> Self {
        let store = Self::new();
        store_calibration(&store, &calibration);
        store
    }
}

impl SettingsStore for InMemorySettings {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.read().get(key).copied()
    }

    fn set(&self, key: &str, value: SettingValue) {
        self.values.write().insert(key.to_string(), value);
    }
}

/// Read the calibration knobs, falling back to defaults for missing,
/// mistyped, non-finite or negative values.
pub fn load_calibration(store: &dyn SettingsStore) -> CalibrationParams {
    let defaults = CalibrationParams::default();
    let float = |key: &str, default: f64| {
        store
            .get(key)
            .and_then(|v| v.as_f64())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(default)
    };

    CalibrationParams {
        base_sensitivity: float(KEY_BASE_SENSITIVITY, defaults.base_sensitivity),
        median_multiplier: float(KEY_MEDIAN_MULTIPLIER, defaults.median_multiplier),
        invert_gesture: store
            .get(KEY_INVERT_GESTURE)
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.invert_gesture),
    }
}

pub fn store_calibration(store: &dyn SettingsStore, calibration: &CalibrationParams) {
    store.set(
        KEY_BASE_SENSITIVITY,
        SettingValue::Float(calibration.base_sensitivity),
    );
    store.set(
        KEY_MEDIAN_MULTIPLIER,
        SettingValue::Float(calibration.median_multiplier),
    );
    store.set(
        KEY_INVERT_GESTURE,
        SettingValue::Bool(calibration.invert_gesture),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_yields_defaults() {
        let store = InMemorySettings::new();
        assert_eq!(load_calibration(&store), CalibrationParams::default());
    }

    #[test]
    fn test_roundtrip() {
        let calibration = CalibrationParams {
            base_sensitivity: 0.004,
            median_multiplier: 1.5,
            invert_gesture: true,
        };
        let store = InMemorySettings::with_calibration(calibration);
        assert_eq!(load_calibration(&store), calibration);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let store = InMemorySettings::new();
        store.set(KEY_BASE_SENSITIVITY, SettingValue::Float(f64::NAN));
        store.set(KEY_MEDIAN_MULTIPLIER, SettingValue::Bool(true));
        store.set(KEY_INVERT_GESTURE, SettingValue::Float(1.0));
        assert_eq!(load_calibration(&store), CalibrationParams::default());
    }

    #[test]
    fn test_setting_value_json() {
        let v: SettingValue = serde_json::from_str("0.25").unwrap();
        assert_eq!(v.as_f64(), Some(0.25));
        let b: SettingValue = serde_json::from_str("true").unwrap();
        assert_eq!(b.as_bool(), Some(true));
    }
}
