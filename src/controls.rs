//! Actuator registry
//!
//! Actuators register an executor under a wire key, mirroring the
//! sensor side. The registry is the single owner of on/off state: an
//! executor fires only when a command actually changes state, so
//! repeated identical commands and threshold re-evaluations never
//! re-drive hardware.

use log::{info, warn};

/// Well-known actuator keys
pub const KEY_PUMP: &str = "pump";
pub const KEY_FAN: &str = "fan";
pub const KEY_HEATER: &str = "heater";
pub const KEY_LIGHT: &str = "light";

/// Registry capacity
pub const MAX_CONTROLS: usize = 8;

const KEY_LEN: usize = 8;

/// Drives one actuator to the requested state.
///
/// The registry invokes this only when the state actually changes,
/// never for repeated identical commands.
pub trait ControlExecutor {
    fn apply(&mut self, on: bool);
}

impl<F: FnMut(bool)> ControlExecutor for F {
    fn apply(&mut self, on: bool) {
        self(on)
    }
}

struct ControlEntry {
    key: String,
    executor: Box<dyn ControlExecutor>,
    on: bool,
}

/// Keyed collection of actuators with tracked state.
#[derive(Default)]
pub struct ControlRegistry {
    controls: Vec<ControlEntry>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actuator under `key`, initially off.
    ///
    /// Registering a key again replaces its executor and keeps the
    /// current state. Returns false when the registry is full or the
    /// key is unusable.
    pub fn register(&mut self, key: &str, executor: Box<dyn ControlExecutor>) -> bool {
        if key.is_empty() || key.len() > KEY_LEN {
            warn!("bad control key {:?}", key);
            return false;
        }
        if let Some(entry) = self.controls.iter_mut().find(|c| c.key == key) {
            entry.executor = executor;
            return true;
        }
        if self.controls.len() >= MAX_CONTROLS {
            warn!("control registry full, dropping {:?}", key);
            return false;
        }
        self.controls.push(ControlEntry {
            key: key.to_string(),
            executor,
            on: false,
        });
        true
    }

    /// Command `key` to `on`.
    ///
    /// Returns None for an unknown key, otherwise Some(changed). The
    /// executor fires only when the state actually changed.
    pub fn set(&mut self, key: &str, on: bool) -> Option<bool> {
        let entry = self.controls.iter_mut().find(|c| c.key == key)?;
        if entry.on == on {
            return Some(false);
        }
        entry.on = on;
        entry.executor.apply(on);
        info!("{} -> {}", key, if on { "on" } else { "off" });
        Some(true)
    }

    /// Flip `key` to the opposite state.
    ///
    /// Returns the new state, None for an unknown key.
    pub fn toggle(&mut self, key: &str) -> Option<bool> {
        let target = !self.get(key)?;
        self.set(key, target);
        Some(target)
    }

    /// Drive every actuator off.
    ///
    /// Executors fire only for the slots that were on, so a second
    /// call in a row is a no-op. Returns how many switched.
    pub fn all_off(&mut self) -> usize {
        let mut switched = 0;
        for entry in &mut self.controls {
            if entry.on {
                entry.on = false;
                entry.executor.apply(false);
                info!("{} -> off", entry.key);
                switched += 1;
            }
        }
        switched
    }

    /// Current state of `key`
    pub fn get(&self, key: &str) -> Option<bool> {
        self.controls.iter().find(|c| c.key == key).map(|c| c.on)
    }

    /// All states in registration order
    pub fn states(&self) -> Vec<(&str, bool)> {
        self.controls
            .iter()
            .map(|c| (c.key.as_str(), c.on))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}
