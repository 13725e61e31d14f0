//! Firmware facade
//!
//! [`SmartPot`] assembles the whole device: persistent configuration,
//! the server link, both hardware registries, and the threshold
//! engine. The host loop owns one value and calls [`SmartPot::tick`]
//! with a monotonic millisecond clock; everything else happens behind
//! that call.
//!
//! Each tick runs in a fixed order: drain inbound commands, sweep the
//! sensors when their interval elapses, run the outbound session
//! machine, then evaluate thresholds. Automation triggers push a fresh
//! status snapshot to the server so the app side never has to poll.

use log::{debug, warn};

use crate::config::{DeviceConfig, WorkMode};
use crate::controls::{ControlExecutor, ControlRegistry};
use crate::engine::{ThresholdEngine, TriggerRecord};
use crate::json::JsonView;
use crate::link::{DeviceLink, LinkConfig, LinkState, RestartHandle};
use crate::sensors::{SensorDriver, SensorRegistry};
use crate::storage::NvStore;
use crate::transport::Transport;

/// How often the sensor registry is swept
pub const SENSOR_READ_INTERVAL_MS: u64 = 1000;

/// How often thresholds are evaluated against the cached readings
pub const THRESHOLD_CHECK_INTERVAL_MS: u64 = 2000;

/// The assembled device.
pub struct SmartPot<T: Transport, S: NvStore> {
    store: S,
    link: DeviceLink<T>,
    sensors: SensorRegistry,
    controls: ControlRegistry,
    engine: ThresholdEngine,
    last_sensor_read_ms: Option<u64>,
    last_threshold_check_ms: Option<u64>,
}

impl<T: Transport, S: NvStore> SmartPot<T, S> {
    /// Bring the device up: load (or reinitialize) configuration from
    /// `store` and assemble the link around `transport`.
    pub fn new(transport: T, mut store: S, link_cfg: LinkConfig) -> Self {
        let config = DeviceConfig::init(&mut store);
        let mut engine = ThresholdEngine::new();
        engine.enable(config.work_mode() == WorkMode::Auto);
        let link = DeviceLink::new(transport, config, link_cfg);

        Self {
            store,
            link,
            sensors: SensorRegistry::new(),
            controls: ControlRegistry::new(),
            engine,
            last_sensor_read_ms: None,
            last_threshold_check_ms: None,
        }
    }

    /// One pass of the firmware loop.
    pub fn tick(&mut self, now_ms: u64) {
        let mode_before = self.link.config().work_mode();
        self.link
            .poll_inbound(now_ms, &mut self.store, &mut self.controls);

        let mode = self.link.config().work_mode();
        if mode != mode_before {
            debug!("work mode now {}", mode);
            self.engine.enable(mode == WorkMode::Auto);
        }

        let sweep_due = self
            .last_sensor_read_ms
            .map_or(true, |t| now_ms.saturating_sub(t) >= SENSOR_READ_INTERVAL_MS);
        if sweep_due {
            self.last_sensor_read_ms = Some(now_ms);
            self.sensors.read_all(now_ms);
        }

        self.link.poll_outbound(now_ms, &self.sensors);

        let check_due = self.last_threshold_check_ms.map_or(true, |t| {
            now_ms.saturating_sub(t) >= THRESHOLD_CHECK_INTERVAL_MS
        });
        if check_due {
            self.last_threshold_check_ms = Some(now_ms);
            let before = self.engine.trigger_count();
            let thresholds = self.link.config().thresholds();
            self.engine
                .evaluate(&self.sensors, &thresholds, mode, &mut self.controls, now_ms);
            if self.engine.trigger_count() != before {
                self.link.push_status(&self.controls);
            }
        }
    }

    /// Attach a sensor under `key`
    pub fn register_sensor(&mut self, key: &str, driver: Box<dyn SensorDriver>) -> bool {
        self.sensors.register(key, driver)
    }

    /// Attach an actuator under `key`
    pub fn register_control(&mut self, key: &str, executor: Box<dyn ControlExecutor>) -> bool {
        self.controls.register(key, executor)
    }

    /// Install the hook fired by a remote `reboot` action
    pub fn set_restart_handle(&mut self, handle: Box<dyn RestartHandle>) {
        self.link.set_restart_handle(handle);
    }

    pub fn wifi_up(&mut self) {
        self.link.wifi_up();
    }

    pub fn wifi_lost(&mut self) {
        self.link.wifi_lost();
    }

    /// Switch work mode from the application side.
    ///
    /// Returns whether the mode actually changed.
    pub fn set_mode(&mut self, mode: WorkMode) -> bool {
        let changed = self
            .link
            .set_work_mode(mode, &mut self.store, &self.controls);
        self.engine.enable(mode == WorkMode::Auto);
        changed
    }

    /// Drive an actuator by hand. Only honored in manual mode.
    pub fn manual_control(&mut self, key: &str, on: bool) -> bool {
        if self.link.config().work_mode() != WorkMode::Manual {
            warn!("manual control of {:?} refused in auto mode", key);
            return false;
        }
        match self.controls.set(key, on) {
            Some(changed) => {
                if changed {
                    self.link.push_status(&self.controls);
                }
                true
            }
            None => false,
        }
    }

    /// Apply a sparse configuration patch from a local source
    /// (captive portal, serial console). Returns whether anything
    /// changed and was persisted.
    pub fn apply_config_patch(&mut self, patch: &str) -> bool {
        let view = JsonView::new(patch);
        self.link.apply_config_patch(&view, &mut self.store)
    }

    pub fn config(&self) -> &DeviceConfig {
        self.link.config()
    }

    /// Configuration staging access, for first-boot provisioning
    pub fn config_mut(&mut self) -> &mut DeviceConfig {
        self.link.config_mut()
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn sensors(&self) -> &SensorRegistry {
        &self.sensors
    }

    pub fn controls(&self) -> &ControlRegistry {
        &self.controls
    }

    pub fn last_trigger(&self) -> Option<&TriggerRecord> {
        self.engine.last_trigger()
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
