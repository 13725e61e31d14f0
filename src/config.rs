//! Persisted device configuration
//!
//! [`DeviceConfig`] holds everything the device must remember across
//! power cycles: identity, server endpoint, reporting cadence, work
//! mode and the control thresholds. It serializes to a fixed-layout
//! record guarded by a magic word and a checksum; anything that fails
//! validation on boot is discarded and factory defaults are written
//! back.
//!
//! Mutators that matter at runtime (work mode, thresholds, patches)
//! persist immediately on change and report whether anything changed.
//! Provisioning setters only stage values; the caller decides when to
//! save.

use log::{debug, error, info, warn};

use crate::error::{Result, StorageError};
use crate::json::{clip, JsonView};
use crate::storage::NvStore;

/// Record magic, the ASCII bytes "POT2" packed as a u32
pub const CONFIG_MAGIC: u32 = 0x504F5432;

/// Serialized record size in bytes
pub const RECORD_SIZE: usize = 196;

// Fixed record layout. String slots are NUL-padded; the last byte of
// each slot stays NUL.
const OFF_MAGIC: usize = 0; // u32
const OFF_DEVICE_ID: usize = 4; // [u8; 32]
const OFF_NAME: usize = 36; // [u8; 64]
const OFF_USER: usize = 100; // [u8; 32]
const OFF_IP: usize = 132; // [u8; 32]
const OFF_PORT: usize = 164; // u16
const OFF_REPORT: usize = 166; // u16
const OFF_HEARTBEAT: usize = 168; // u16
const OFF_MODE: usize = 170; // u8, one reserved byte follows
const OFF_THRESHOLDS: usize = 172; // 8 x i16
const OFF_VERSION: usize = 188; // u32
const OFF_CHECKSUM: usize = 192; // u32

const ID_LEN: usize = 32;
const NAME_LEN: usize = 64;
const USER_LEN: usize = 32;
const IP_LEN: usize = 32;

/// Patch value meaning "temperature bound not supplied"
const TEMP_UNSET: i32 = -32768;

/// Operating mode of the control engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum WorkMode {
    /// Thresholds drive the actuators
    #[default]
    Auto = 0,
    /// Actuators only move on explicit commands
    Manual = 1,
}

impl WorkMode {
    /// Decode a stored mode byte; anything nonzero is manual
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            WorkMode::Auto
        } else {
            WorkMode::Manual
        }
    }

    /// The wire label for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkMode::Auto => "auto",
            WorkMode::Manual => "manual",
        }
    }
}

impl std::fmt::Display for WorkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-metric control bands.
///
/// Soil and humidity are percentages, temperature is tenths of a
/// degree, light is a raw sensor level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub soil_low: i16,
    pub soil_high: i16,
    pub temp_low: i16,
    pub temp_high: i16,
    pub humi_low: i16,
    pub humi_high: i16,
    pub light_low: i16,
    pub light_high: i16,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            soil_low: 30,
            soil_high: 70,
            temp_low: 150,
            temp_high: 300,
            humi_low: 40,
            humi_high: 80,
            light_low: 200,
            light_high: 800,
        }
    }
}

/// The device's persistent configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    device_id: String,
    device_name: String,
    bound_user: String,
    server_ip: String,
    server_port: u16,
    report_interval: u16,
    heartbeat_interval: u16,
    work_mode: WorkMode,
    thresholds: Thresholds,
    version: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "POT_DEVICE_001".to_string(),
            device_name: "Smart Flower Pot".to_string(),
            bound_user: String::new(),
            server_ip: "192.168.1.100".to_string(),
            server_port: 8003,
            report_interval: 30,
            heartbeat_interval: 10,
            work_mode: WorkMode::Auto,
            thresholds: Thresholds::default(),
            version: 0,
        }
    }
}

impl DeviceConfig {
    /// Load the stored configuration, falling back to defaults.
    ///
    /// A missing, truncated or corrupt record is replaced by factory
    /// defaults, which are written back so the next boot is clean.
    pub fn init(store: &mut dyn NvStore) -> DeviceConfig {
        match Self::try_load(store) {
            Ok(config) => {
                info!(
                    "configuration loaded for {} (version {})",
                    config.device_id, config.version
                );
                config
            }
            Err(e) => {
                warn!("stored configuration unusable ({}), using defaults", e);
                let config = DeviceConfig::default();
                config.persist(store);
                config
            }
        }
    }

    fn try_load(store: &mut dyn NvStore) -> Result<DeviceConfig> {
        let data = store.load()?.unwrap_or_default();
        Self::from_bytes(&data)
    }

    /// Decode a serialized record.
    ///
    /// # Errors
    ///
    /// [`StorageError::TruncatedRecord`] on a short buffer,
    /// [`StorageError::MagicMismatch`] when the magic word is wrong,
    /// [`StorageError::ChecksumMismatch`] when the content is corrupt.
    pub fn from_bytes(data: &[u8]) -> Result<DeviceConfig> {
        if data.len() < RECORD_SIZE {
            return Err(StorageError::TruncatedRecord {
                size: data.len(),
                expected: RECORD_SIZE,
            }
            .into());
        }

        let magic = read_u32(data, OFF_MAGIC);
        if magic != CONFIG_MAGIC {
            return Err(StorageError::MagicMismatch { found: magic }.into());
        }

        let stored = read_u32(data, OFF_CHECKSUM);
        let computed = checksum(&data[OFF_DEVICE_ID..OFF_CHECKSUM]);
        if stored != computed {
            return Err(StorageError::ChecksumMismatch {
                expected: computed,
                actual: stored,
            }
            .into());
        }

        Ok(DeviceConfig {
            device_id: read_padded_str(data, OFF_DEVICE_ID, ID_LEN),
            device_name: read_padded_str(data, OFF_NAME, NAME_LEN),
            bound_user: read_padded_str(data, OFF_USER, USER_LEN),
            server_ip: read_padded_str(data, OFF_IP, IP_LEN),
            server_port: read_u16(data, OFF_PORT),
            report_interval: read_u16(data, OFF_REPORT),
            heartbeat_interval: read_u16(data, OFF_HEARTBEAT),
            work_mode: WorkMode::from_u8(data[OFF_MODE]),
            thresholds: Thresholds {
                soil_low: read_i16(data, OFF_THRESHOLDS),
                soil_high: read_i16(data, OFF_THRESHOLDS + 2),
                temp_low: read_i16(data, OFF_THRESHOLDS + 4),
                temp_high: read_i16(data, OFF_THRESHOLDS + 6),
                humi_low: read_i16(data, OFF_THRESHOLDS + 8),
                humi_high: read_i16(data, OFF_THRESHOLDS + 10),
                light_low: read_i16(data, OFF_THRESHOLDS + 12),
                light_high: read_i16(data, OFF_THRESHOLDS + 14),
            },
            version: read_u32(data, OFF_VERSION),
        })
    }

    /// Serialize to the fixed record layout, checksum included
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_SIZE];
        buf[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&CONFIG_MAGIC.to_le_bytes());
        write_padded_str(&mut buf, OFF_DEVICE_ID, ID_LEN, &self.device_id);
        write_padded_str(&mut buf, OFF_NAME, NAME_LEN, &self.device_name);
        write_padded_str(&mut buf, OFF_USER, USER_LEN, &self.bound_user);
        write_padded_str(&mut buf, OFF_IP, IP_LEN, &self.server_ip);
        buf[OFF_PORT..OFF_PORT + 2].copy_from_slice(&self.server_port.to_le_bytes());
        buf[OFF_REPORT..OFF_REPORT + 2].copy_from_slice(&self.report_interval.to_le_bytes());
        buf[OFF_HEARTBEAT..OFF_HEARTBEAT + 2].copy_from_slice(&self.heartbeat_interval.to_le_bytes());
        buf[OFF_MODE] = self.work_mode as u8;

        let t = &self.thresholds;
        let bands = [
            t.soil_low,
            t.soil_high,
            t.temp_low,
            t.temp_high,
            t.humi_low,
            t.humi_high,
            t.light_low,
            t.light_high,
        ];
        for (i, band) in bands.iter().enumerate() {
            let off = OFF_THRESHOLDS + i * 2;
            buf[off..off + 2].copy_from_slice(&band.to_le_bytes());
        }

        buf[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&self.version.to_le_bytes());
        let sum = checksum(&buf[OFF_DEVICE_ID..OFF_CHECKSUM]);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&sum.to_le_bytes());
        buf
    }

    /// Write the current configuration to the store
    pub fn save(&self, store: &mut dyn NvStore) -> Result<()> {
        store.store(&self.to_bytes())
    }

    fn persist(&self, store: &mut dyn NvStore) {
        if let Err(e) = self.save(store) {
            error!("configuration save failed: {}", e);
        }
    }

    /// Whether the configuration can drive a connection
    pub fn is_valid(&self) -> bool {
        !self.device_id.is_empty()
            && !self.server_ip.is_empty()
            && self.server_port != 0
            && self.report_interval > 0
            && self.heartbeat_interval > 0
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn bound_user(&self) -> &str {
        &self.bound_user
    }

    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn report_interval(&self) -> u16 {
        self.report_interval
    }

    pub fn heartbeat_interval(&self) -> u16 {
        self.heartbeat_interval
    }

    pub fn work_mode(&self) -> WorkMode {
        self.work_mode
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Stage a new device identity without persisting
    pub fn set_identity(&mut self, device_id: &str, device_name: &str) {
        self.device_id = clip(device_id, ID_LEN - 1).to_string();
        self.device_name = clip(device_name, NAME_LEN - 1).to_string();
    }

    /// Stage the bound user without persisting
    pub fn set_bound_user(&mut self, user: &str) {
        self.bound_user = clip(user, USER_LEN - 1).to_string();
    }

    /// Stage the server endpoint without persisting
    pub fn set_server(&mut self, ip: &str, port: u16) {
        self.server_ip = clip(ip, IP_LEN - 1).to_string();
        self.server_port = port;
    }

    /// Switch work mode; persists and returns true when it changed
    pub fn set_work_mode(&mut self, mode: WorkMode, store: &mut dyn NvStore) -> bool {
        if self.work_mode == mode {
            return false;
        }
        self.work_mode = mode;
        info!("work mode -> {}", mode);
        self.persist(store);
        true
    }

    /// Replace all bands; persists and returns true when they changed
    pub fn set_thresholds(&mut self, thresholds: Thresholds, store: &mut dyn NvStore) -> bool {
        if self.thresholds == thresholds {
            return false;
        }
        self.thresholds = thresholds;
        info!("thresholds updated");
        self.persist(store);
        true
    }

    /// Apply a sparse configuration patch.
    ///
    /// Recognized keys: `name`, `ri` (report interval), `hb` (heartbeat
    /// interval), `mode`, the band keys `sm_l sm_h t_l t_h h_l h_h l_l
    /// l_h`, and `ver`. Intervals must be positive, band values
    /// non-negative except temperature, which uses -32768 as its
    /// "absent" sentinel. `ver` updates the version counter without by
    /// itself triggering a save. Persists and returns true when any
    /// field changed.
    pub fn apply_patch(&mut self, patch: &JsonView<'_>, store: &mut dyn NvStore) -> bool {
        let mut changed = false;

        if let Some(name) = patch.get_str("name", NAME_LEN) {
            if !name.is_empty() && name != self.device_name {
                self.device_name = name;
                changed = true;
            }
        }

        let ri = patch.get_int("ri", -1);
        if ri > 0 && ri != self.report_interval as i32 {
            self.report_interval = ri as u16;
            changed = true;
        }

        let hb = patch.get_int("hb", -1);
        if hb > 0 && hb != self.heartbeat_interval as i32 {
            self.heartbeat_interval = hb as u16;
            changed = true;
        }

        let mode = patch.get_int("mode", -1);
        if mode >= 0 {
            let mode = WorkMode::from_u8(mode as u8);
            if mode != self.work_mode {
                self.work_mode = mode;
                changed = true;
            }
        }

        let t = &mut self.thresholds;
        patch_band(&mut t.soil_low, patch.get_int("sm_l", -1), &mut changed);
        patch_band(&mut t.soil_high, patch.get_int("sm_h", -1), &mut changed);
        patch_temp(&mut t.temp_low, patch.get_int("t_l", TEMP_UNSET), &mut changed);
        patch_temp(&mut t.temp_high, patch.get_int("t_h", TEMP_UNSET), &mut changed);
        patch_band(&mut t.humi_low, patch.get_int("h_l", -1), &mut changed);
        patch_band(&mut t.humi_high, patch.get_int("h_h", -1), &mut changed);
        patch_band(&mut t.light_low, patch.get_int("l_l", -1), &mut changed);
        patch_band(&mut t.light_high, patch.get_int("l_h", -1), &mut changed);

        let ver = patch.get_int("ver", -1);
        if ver > 0 {
            debug!("configuration version -> {}", ver);
            self.version = ver as u32;
        }

        if changed {
            info!("configuration patched");
            self.persist(store);
        }
        changed
    }
}

fn patch_band(slot: &mut i16, value: i32, changed: &mut bool) {
    if value >= 0 && *slot != value as i16 {
        *slot = value as i16;
        *changed = true;
    }
}

fn patch_temp(slot: &mut i16, value: i32, changed: &mut bool) {
    if value != TEMP_UNSET && *slot != value as i16 {
        *slot = value as i16;
        *changed = true;
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for &b in data {
        sum = sum.wrapping_add(b as u32);
    }
    sum ^ CONFIG_MAGIC
}

fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn read_i16(data: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([data[off], data[off + 1]])
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn read_padded_str(data: &[u8], off: usize, len: usize) -> String {
    let slot = &data[off..off + len];
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

fn write_padded_str(buf: &mut [u8], off: usize, len: usize, s: &str) {
    let bytes = clip(s, len - 1).as_bytes();
    buf[off..off + bytes.len()].copy_from_slice(bytes);
}
