//! Sensor registry
//!
//! Sensors are pluggable: anything implementing [`SensorDriver`] (or
//! any `FnMut(u64) -> i32` closure) can be registered under a wire key
//! of at most 8 bytes. The registry caches the latest reading per
//! sensor so that reporting and threshold checks see one coherent
//! snapshot between sweeps, and tracks running min/max extrema plus a
//! freshness timestamp per slot.
//!
//! Readings are plain integers end to end. Soil moisture and humidity
//! are percentages, temperature is tenths of a degree, light and water
//! level are raw levels.

use log::warn;

/// Well-known sensor keys
pub const KEY_SOIL: &str = "soil";
pub const KEY_TEMPERATURE: &str = "temp";
pub const KEY_HUMIDITY: &str = "humi";
pub const KEY_LIGHT: &str = "light";
pub const KEY_WATER_LEVEL: &str = "water";

/// Registry capacity
pub const MAX_SENSORS: usize = 8;

const KEY_LEN: usize = 8;

/// Produces one reading on demand.
///
/// `now_ms` is the caller's clock, for drivers that model drift or
/// rate-limit their hardware access.
pub trait SensorDriver {
    fn read(&mut self, now_ms: u64) -> i32;
}

impl<F: FnMut(u64) -> i32> SensorDriver for F {
    fn read(&mut self, now_ms: u64) -> i32 {
        self(now_ms)
    }
}

struct SensorEntry {
    key: String,
    driver: Box<dyn SensorDriver>,
    value: i32,
    min: i32,
    max: i32,
    last_update_ms: u64,
    valid: bool,
}

impl SensorEntry {
    fn fold(&mut self, value: i32, now_ms: u64) {
        self.value = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last_update_ms = now_ms;
        self.valid = true;
    }
}

/// Keyed collection of sensors with cached readings.
#[derive(Default)]
pub struct SensorRegistry {
    sensors: Vec<SensorEntry>,
    last_sweep_ms: Option<u64>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor under `key`.
    ///
    /// Registering a key again replaces its driver and keeps the
    /// accumulated stats. Returns false when the registry is full or
    /// the key is unusable.
    pub fn register(&mut self, key: &str, driver: Box<dyn SensorDriver>) -> bool {
        if key.is_empty() || key.len() > KEY_LEN {
            warn!("bad sensor key {:?}", key);
            return false;
        }
        if let Some(entry) = self.sensors.iter_mut().find(|s| s.key == key) {
            entry.driver = driver;
            return true;
        }
        if self.sensors.len() >= MAX_SENSORS {
            warn!("sensor registry full, dropping {:?}", key);
            return false;
        }
        self.sensors.push(SensorEntry {
            key: key.to_string(),
            driver,
            value: 0,
            min: i32::MAX,
            max: i32::MIN,
            last_update_ms: 0,
            valid: false,
        });
        true
    }

    /// Read every sensor once and cache the values
    pub fn read_all(&mut self, now_ms: u64) {
        for entry in &mut self.sensors {
            let value = entry.driver.read(now_ms);
            entry.fold(value, now_ms);
        }
        self.last_sweep_ms = Some(now_ms);
    }

    /// Push a reading from outside the sweep (event-driven sources).
    ///
    /// Returns false for an unknown key.
    pub fn update(&mut self, key: &str, value: i32, now_ms: u64) -> bool {
        match self.sensors.iter_mut().find(|s| s.key == key) {
            Some(entry) => {
                entry.fold(value, now_ms);
                true
            }
            None => false,
        }
    }

    /// Latest cached reading for `key`
    pub fn get(&self, key: &str) -> Option<i32> {
        self.sensors.iter().find(|s| s.key == key).map(|s| s.value)
    }

    /// Whether `key` has produced at least one reading
    pub fn is_valid(&self, key: &str) -> bool {
        self.sensors
            .iter()
            .find(|s| s.key == key)
            .map_or(false, |s| s.valid)
    }

    /// Running `(min, max)` for `key` since registration or the last
    /// [`reset_extremes`](Self::reset_extremes). Before the first
    /// reading the pair holds the integer extremes, so any sample
    /// establishes both bounds at once.
    pub fn extremes(&self, key: &str) -> Option<(i32, i32)> {
        self.sensors
            .iter()
            .find(|s| s.key == key)
            .map(|s| (s.min, s.max))
    }

    /// Forget the running extrema for `key`
    pub fn reset_extremes(&mut self, key: &str) -> bool {
        match self.sensors.iter_mut().find(|s| s.key == key) {
            Some(entry) => {
                entry.min = i32::MAX;
                entry.max = i32::MIN;
                true
            }
            None => false,
        }
    }

    /// A slot is stale when it never produced a reading or its last
    /// one is older than `timeout_ms`. Unknown keys are stale.
    pub fn is_stale(&self, key: &str, now_ms: u64, timeout_ms: u64) -> bool {
        match self.sensors.iter().find(|s| s.key == key) {
            Some(entry) => {
                !entry.valid || now_ms.saturating_sub(entry.last_update_ms) > timeout_ms
            }
            None => true,
        }
    }

    /// All cached readings in registration order
    pub fn readings(&self) -> Vec<(&str, i32)> {
        self.sensors
            .iter()
            .map(|s| (s.key.as_str(), s.value))
            .collect()
    }

    /// When the last sweep ran, None before the first
    pub fn last_sweep_ms(&self) -> Option<u64> {
        self.last_sweep_ms
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_read() {
        let mut registry = SensorRegistry::new();
        assert!(registry.register(KEY_SOIL, Box::new(|_now: u64| 42)));
        assert!(registry.register(KEY_TEMPERATURE, Box::new(|_now: u64| 231)));
        assert_eq!(registry.len(), 2);

        // nothing read yet
        assert_eq!(registry.get(KEY_SOIL), Some(0));
        assert!(!registry.is_valid(KEY_SOIL));
        assert_eq!(registry.last_sweep_ms(), None);

        registry.read_all(1000);
        assert_eq!(registry.get(KEY_SOIL), Some(42));
        assert_eq!(registry.get(KEY_TEMPERATURE), Some(231));
        assert!(registry.is_valid(KEY_SOIL));
        assert_eq!(registry.last_sweep_ms(), Some(1000));
    }

    #[test]
    fn test_unknown_key() {
        let registry = SensorRegistry::new();
        assert_eq!(registry.get("nope"), None);
        assert_eq!(registry.extremes("nope"), None);
        assert!(!registry.is_valid("nope"));
    }

    #[test]
    fn test_reregistration_replaces_driver() {
        let mut registry = SensorRegistry::new();
        assert!(registry.register(KEY_SOIL, Box::new(|_: u64| 10)));
        registry.read_all(0);

        assert!(registry.register(KEY_SOIL, Box::new(|_: u64| 90)));
        assert_eq!(registry.len(), 1);
        registry.read_all(1000);

        // new driver feeds the same slot, extrema span both readings
        assert_eq!(registry.get(KEY_SOIL), Some(90));
        assert_eq!(registry.extremes(KEY_SOIL), Some((10, 90)));
    }

    #[test]
    fn test_capacity_cap() {
        let mut registry = SensorRegistry::new();
        for i in 0..MAX_SENSORS {
            assert!(registry.register(&format!("s{}", i), Box::new(|_: u64| 0)));
        }
        assert!(!registry.register("overflow", Box::new(|_: u64| 0)));
        assert_eq!(registry.len(), MAX_SENSORS);
    }

    #[test]
    fn test_readings_keep_registration_order() {
        let mut registry = SensorRegistry::new();
        registry.register(KEY_SOIL, Box::new(|_: u64| 10));
        registry.register(KEY_LIGHT, Box::new(|_: u64| 20));
        registry.read_all(0);
        let readings = registry.readings();
        assert_eq!(readings, vec![(KEY_SOIL, 10), (KEY_LIGHT, 20)]);
    }

    #[test]
    fn test_stateful_driver() {
        let mut registry = SensorRegistry::new();
        let mut counter = 0;
        registry.register(
            KEY_WATER_LEVEL,
            Box::new(move |_now: u64| {
                counter += 10;
                counter
            }),
        );
        registry.read_all(0);
        assert_eq!(registry.get(KEY_WATER_LEVEL), Some(10));
        registry.read_all(1000);
        assert_eq!(registry.get(KEY_WATER_LEVEL), Some(20));
    }

    #[test]
    fn test_extremes_track_and_reset() {
        let mut registry = SensorRegistry::new();
        registry.register(KEY_SOIL, Box::new(|_: u64| 0));
        assert_eq!(registry.extremes(KEY_SOIL), Some((i32::MAX, i32::MIN)));

        // the first sample establishes both bounds
        registry.update(KEY_SOIL, 50, 100);
        assert_eq!(registry.extremes(KEY_SOIL), Some((50, 50)));

        registry.update(KEY_SOIL, 30, 200);
        registry.update(KEY_SOIL, 80, 300);
        assert_eq!(registry.extremes(KEY_SOIL), Some((30, 80)));
        assert_eq!(registry.get(KEY_SOIL), Some(80));

        assert!(registry.reset_extremes(KEY_SOIL));
        assert_eq!(registry.extremes(KEY_SOIL), Some((i32::MAX, i32::MIN)));
        registry.update(KEY_SOIL, 61, 400);
        assert_eq!(registry.extremes(KEY_SOIL), Some((61, 61)));
    }

    #[test]
    fn test_update_unknown_key_rejected() {
        let mut registry = SensorRegistry::new();
        assert!(!registry.update("nope", 1, 0));
        assert!(!registry.reset_extremes("nope"));
    }

    #[test]
    fn test_staleness() {
        let mut registry = SensorRegistry::new();
        registry.register(KEY_HUMIDITY, Box::new(|_: u64| 55));

        // never read: stale at any horizon
        assert!(registry.is_stale(KEY_HUMIDITY, 0, 10_000));

        registry.read_all(1_000);
        assert!(!registry.is_stale(KEY_HUMIDITY, 1_500, 1_000));
        assert!(!registry.is_stale(KEY_HUMIDITY, 2_000, 1_000));
        assert!(registry.is_stale(KEY_HUMIDITY, 2_001, 1_000));

        assert!(registry.is_stale("nope", 0, u64::MAX));
    }

    #[test]
    fn test_bad_keys_rejected() {
        let mut registry = SensorRegistry::new();
        assert!(!registry.register("", Box::new(|_: u64| 0)));
        assert!(!registry.register(&"k".repeat(20), Box::new(|_: u64| 0)));
        assert!(registry.is_empty());
    }
}
