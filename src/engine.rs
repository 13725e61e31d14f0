//! Threshold control engine
//!
//! Compares the latest sensor snapshot against the configured bands and
//! drives actuators through the control registry. Rules only run in
//! automatic work mode while the engine is enabled.
//!
//! Rules:
//! - soil below its band starts the pump, above stops it
//! - temperature below its band starts the heater and stops the fan;
//!   above, the reverse; near the band midpoint both are forced off
//! - light below its band switches the grow light on, above off
//!
//! The midpoint dead band keeps the heater and fan from hunting: an
//! in-band temperature changes nothing unless it comes within
//! [`TEMP_DEAD_BAND`] of the midpoint, where both stop.
//!
//! A transition that would leave an actuator in its current state is
//! skipped entirely, producing no trigger record.

use log::{debug, info, warn};

use crate::config::{Thresholds, WorkMode};
use crate::controls::{ControlRegistry, KEY_FAN, KEY_HEATER, KEY_LIGHT, KEY_PUMP};
use crate::sensors::{SensorRegistry, KEY_SOIL, KEY_TEMPERATURE, KEY_LIGHT as SENSOR_LIGHT};

/// Half-width of the midpoint dead band, in tenths of a degree
pub const TEMP_DEAD_BAND: i32 = 20;

/// One actuator transition caused by a threshold rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRecord {
    /// Sensor key the rule evaluated
    pub sensor: &'static str,
    /// Actuator key the rule drove
    pub control: &'static str,
    /// The reading that fired the rule
    pub value: i32,
    /// The bound (or midpoint) it was compared against
    pub threshold: i32,
    /// State the actuator was driven to
    pub turned_on: bool,
    /// When the transition happened
    pub at_ms: u64,
}

/// The rule evaluator.
#[derive(Debug, Default)]
pub struct ThresholdEngine {
    disabled: bool,
    last_trigger: Option<TriggerRecord>,
    trigger_count: u32,
}

impl ThresholdEngine {
    /// A new engine, enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate the engine on or off without touching actuators
    pub fn enable(&mut self, enabled: bool) {
        if self.disabled != !enabled {
            debug!("threshold engine {}", if enabled { "enabled" } else { "disabled" });
        }
        self.disabled = !enabled;
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Forget trigger history
    pub fn reset(&mut self) {
        self.last_trigger = None;
        self.trigger_count = 0;
    }

    /// The most recent transition, if any
    pub fn last_trigger(&self) -> Option<&TriggerRecord> {
        self.last_trigger.as_ref()
    }

    /// Transitions since construction or [`reset`](Self::reset)
    pub fn trigger_count(&self) -> u32 {
        self.trigger_count
    }

    /// Run every rule once against the cached readings.
    ///
    /// Does nothing unless the engine is enabled and `mode` is
    /// [`WorkMode::Auto`].
    pub fn evaluate(
        &mut self,
        sensors: &SensorRegistry,
        thresholds: &Thresholds,
        mode: WorkMode,
        controls: &mut ControlRegistry,
        now_ms: u64,
    ) {
        if self.disabled || mode != WorkMode::Auto {
            return;
        }

        if let Some(v) = sensors.get(KEY_SOIL) {
            let low = thresholds.soil_low as i32;
            let high = thresholds.soil_high as i32;
            if v < low {
                self.trigger(controls, KEY_SOIL, KEY_PUMP, true, v, low, now_ms);
            } else if v > high {
                self.trigger(controls, KEY_SOIL, KEY_PUMP, false, v, high, now_ms);
            }
        }

        if let Some(v) = sensors.get(KEY_TEMPERATURE) {
            let low = thresholds.temp_low as i32;
            let high = thresholds.temp_high as i32;
            if v < low {
                self.trigger(controls, KEY_TEMPERATURE, KEY_HEATER, true, v, low, now_ms);
                self.trigger(controls, KEY_TEMPERATURE, KEY_FAN, false, v, low, now_ms);
            } else if v > high {
                self.trigger(controls, KEY_TEMPERATURE, KEY_FAN, true, v, high, now_ms);
                self.trigger(controls, KEY_TEMPERATURE, KEY_HEATER, false, v, high, now_ms);
            } else {
                let mid = (low + high) / 2;
                if v > mid - TEMP_DEAD_BAND && v < mid + TEMP_DEAD_BAND {
                    self.trigger(controls, KEY_TEMPERATURE, KEY_HEATER, false, v, mid, now_ms);
                    self.trigger(controls, KEY_TEMPERATURE, KEY_FAN, false, v, mid, now_ms);
                }
            }
        }

        if let Some(v) = sensors.get(SENSOR_LIGHT) {
            let low = thresholds.light_low as i32;
            let high = thresholds.light_high as i32;
            if v < low {
                self.trigger(controls, SENSOR_LIGHT, KEY_LIGHT, true, v, low, now_ms);
            } else if v > high {
                self.trigger(controls, SENSOR_LIGHT, KEY_LIGHT, false, v, high, now_ms);
            }
        }
    }

    fn trigger(
        &mut self,
        controls: &mut ControlRegistry,
        sensor: &'static str,
        control: &'static str,
        on: bool,
        value: i32,
        threshold: i32,
        now_ms: u64,
    ) {
        match controls.get(control) {
            Some(current) if current == on => return,
            None => {
                warn!("rule for {:?} targets unregistered control {:?}", sensor, control);
                return;
            }
            _ => {}
        }

        info!(
            "threshold trigger: {}={} vs {} -> {} {}",
            sensor,
            value,
            threshold,
            control,
            if on { "on" } else { "off" }
        );
        self.last_trigger = Some(TriggerRecord {
            sensor,
            control,
            value,
            threshold,
            turned_on: on,
            at_ms: now_ms,
        });
        self.trigger_count += 1;
        controls.set(control, on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Rig {
        engine: ThresholdEngine,
        sensors: SensorRegistry,
        controls: ControlRegistry,
        thresholds: Thresholds,
        soil: Rc<Cell<i32>>,
        temp: Rc<Cell<i32>>,
        light: Rc<Cell<i32>>,
    }

    impl Rig {
        fn new() -> Self {
            let soil = Rc::new(Cell::new(50));
            let temp = Rc::new(Cell::new(200));
            let light = Rc::new(Cell::new(500));

            let mut sensors = SensorRegistry::new();
            let s = soil.clone();
            sensors.register(KEY_SOIL, Box::new(move |_: u64| s.get()));
            let t = temp.clone();
            sensors.register(KEY_TEMPERATURE, Box::new(move |_: u64| t.get()));
            let l = light.clone();
            sensors.register(SENSOR_LIGHT, Box::new(move |_: u64| l.get()));

            let mut controls = ControlRegistry::new();
            controls.register(KEY_PUMP, Box::new(|_: bool| {}));
            controls.register(KEY_FAN, Box::new(|_: bool| {}));
            controls.register(KEY_HEATER, Box::new(|_: bool| {}));
            controls.register(KEY_LIGHT, Box::new(|_: bool| {}));

            Rig {
                engine: ThresholdEngine::new(),
                sensors,
                controls,
                thresholds: Thresholds::default(),
                soil,
                temp,
                light,
            }
        }

        fn run(&mut self, now_ms: u64) {
            self.sensors.read_all(now_ms);
            self.engine.evaluate(
                &self.sensors,
                &self.thresholds,
                WorkMode::Auto,
                &mut self.controls,
                now_ms,
            );
        }
    }

    #[test]
    fn test_dry_soil_starts_pump() {
        let mut rig = Rig::new();
        rig.soil.set(25);
        rig.run(1000);

        assert_eq!(rig.controls.get(KEY_PUMP), Some(true));
        let record = rig.engine.last_trigger().unwrap();
        assert_eq!(record.sensor, KEY_SOIL);
        assert_eq!(record.control, KEY_PUMP);
        assert_eq!(record.value, 25);
        assert_eq!(record.threshold, 30);
        assert!(record.turned_on);
        assert_eq!(record.at_ms, 1000);
    }

    #[test]
    fn test_wet_soil_stops_pump() {
        let mut rig = Rig::new();
        rig.soil.set(25);
        rig.run(0);
        rig.soil.set(75);
        rig.run(1000);

        assert_eq!(rig.controls.get(KEY_PUMP), Some(false));
        assert_eq!(rig.engine.trigger_count(), 2);
    }

    #[test]
    fn test_in_band_soil_changes_nothing() {
        let mut rig = Rig::new();
        rig.soil.set(50);
        rig.run(0);
        assert_eq!(rig.engine.trigger_count(), 0);
        assert_eq!(rig.engine.last_trigger(), None);
    }

    #[test]
    fn test_repeated_breach_triggers_once() {
        let mut rig = Rig::new();
        rig.soil.set(25);
        rig.run(0);
        rig.run(2000);
        rig.run(4000);
        assert_eq!(rig.engine.trigger_count(), 1);
    }

    #[test]
    fn test_inverted_band_is_tolerated() {
        let mut rig = Rig::new();
        rig.thresholds.soil_low = 70;
        rig.thresholds.soil_high = 30;
        for (i, v) in [80, 50, 20, 50, 80].into_iter().enumerate() {
            rig.soil.set(v);
            rig.run(i as u64 * 1000);
        }
        // nonsense bounds give nonsense decisions, never a crash
        assert!(rig.controls.get(KEY_PUMP).is_some());
    }

    #[test]
    fn test_cold_starts_heater() {
        let mut rig = Rig::new();
        rig.temp.set(140);
        rig.run(0);

        assert_eq!(rig.controls.get(KEY_HEATER), Some(true));
        assert_eq!(rig.controls.get(KEY_FAN), Some(false));
        // fan was already off, only the heater transition is recorded
        assert_eq!(rig.engine.trigger_count(), 1);
    }

    #[test]
    fn test_hot_starts_fan_and_stops_heater() {
        let mut rig = Rig::new();
        rig.temp.set(140);
        rig.run(0);
        rig.temp.set(320);
        rig.run(2000);

        assert_eq!(rig.controls.get(KEY_FAN), Some(true));
        assert_eq!(rig.controls.get(KEY_HEATER), Some(false));
        let record = rig.engine.last_trigger().unwrap();
        assert_eq!(record.control, KEY_HEATER);
        assert!(!record.turned_on);
        assert_eq!(record.threshold, 300);
    }

    #[test]
    fn test_heater_keeps_running_between_bound_and_dead_band() {
        let mut rig = Rig::new();
        rig.temp.set(140);
        rig.run(0);
        assert_eq!(rig.controls.get(KEY_HEATER), Some(true));

        // back in band but still below the midpoint zone: no change
        rig.temp.set(151);
        rig.run(2000);
        assert_eq!(rig.controls.get(KEY_HEATER), Some(true));
        assert_eq!(rig.engine.trigger_count(), 1);
    }

    #[test]
    fn test_midpoint_zone_stops_heater() {
        let mut rig = Rig::new();
        rig.temp.set(140);
        rig.run(0);

        // midpoint of [150, 300] is 225
        rig.temp.set(225);
        rig.run(2000);
        assert_eq!(rig.controls.get(KEY_HEATER), Some(false));
        let record = rig.engine.last_trigger().unwrap();
        assert_eq!(record.threshold, 225);
        assert!(!record.turned_on);
    }

    #[test]
    fn test_midpoint_zone_with_everything_off_is_quiet() {
        let mut rig = Rig::new();
        rig.temp.set(225);
        rig.run(0);
        assert_eq!(rig.engine.trigger_count(), 0);
    }

    #[test]
    fn test_dark_switches_grow_light_on() {
        let mut rig = Rig::new();
        rig.light.set(120);
        rig.run(0);
        assert_eq!(rig.controls.get(KEY_LIGHT), Some(true));

        rig.light.set(900);
        rig.run(2000);
        assert_eq!(rig.controls.get(KEY_LIGHT), Some(false));
    }

    #[test]
    fn test_manual_mode_gates_rules() {
        let mut rig = Rig::new();
        rig.soil.set(10);
        rig.sensors.read_all(0);
        rig.engine.evaluate(
            &rig.sensors,
            &rig.thresholds,
            WorkMode::Manual,
            &mut rig.controls,
            0,
        );
        assert_eq!(rig.controls.get(KEY_PUMP), Some(false));
        assert_eq!(rig.engine.trigger_count(), 0);
    }

    #[test]
    fn test_disabled_engine_does_nothing() {
        let mut rig = Rig::new();
        rig.engine.enable(false);
        assert!(!rig.engine.is_enabled());
        rig.soil.set(10);
        rig.run(0);
        assert_eq!(rig.controls.get(KEY_PUMP), Some(false));

        rig.engine.enable(true);
        rig.run(2000);
        assert_eq!(rig.controls.get(KEY_PUMP), Some(true));
    }

    #[test]
    fn test_unregistered_control_is_skipped() {
        let mut rig = Rig::new();
        rig.controls = ControlRegistry::new();
        rig.soil.set(10);
        rig.run(0);
        assert_eq!(rig.engine.trigger_count(), 0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut rig = Rig::new();
        rig.soil.set(10);
        rig.run(0);
        assert_eq!(rig.engine.trigger_count(), 1);

        rig.engine.reset();
        assert_eq!(rig.engine.trigger_count(), 0);
        assert_eq!(rig.engine.last_trigger(), None);
    }
}
