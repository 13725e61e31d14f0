//! Device-server session
//!
//! [`DeviceLink`] owns the connection lifecycle and everything that
//! crosses it. The session walks `Offline -> Disconnected -> Connected
//! -> Registered`: wifi gates the whole machine, reconnects are paced
//! with an optional attempt budget, and registration is announced
//! immediately after every successful connect.
//!
//! While registered, the link emits heartbeats and sensor reports on
//! the configured cadences and dispatches inbound commands:
//!
//! - `ctl` drives an actuator or switches work mode. Actuator commands
//!   are refused (acknowledged with `ok:0`) while in automatic mode.
//! - `cfg` rewrites the threshold bands wholesale.
//! - `act` runs named actions: `get_status`, `reboot`.
//!
//! Acks are only sent when the inbound frame carried a message id, and
//! echo that id verbatim. Unknown message types and unparseable frames
//! are dropped with a debug log.

use log::{debug, error, info, warn};

use crate::config::{DeviceConfig, Thresholds, WorkMode};
use crate::controls::ControlRegistry;
use crate::error::LinkError;
use crate::json::JsonView;
use crate::protocol::{Envelope, MessageFactory, MessageType};
use crate::sensors::SensorRegistry;
use crate::storage::NvStore;
use crate::transport::Transport;

/// Pause between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL_S: u32 = 10;

/// Socket connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Grace period between a reboot ack and the restart itself
pub const REBOOT_DELAY_MS: u64 = 500;

/// Firmware version announced at registration
pub const FIRMWARE_VERSION: &str = "2.0";

const CONTROL_KEY_LEN: usize = 16;
const ACTION_LEN: usize = 16;

/// Tunables for the session machine.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub reconnect_interval_s: u32,
    /// 0 means retry forever
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    pub firmware_version: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_s: DEFAULT_RECONNECT_INTERVAL_S,
            max_reconnect_attempts: 0,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            firmware_version: FIRMWARE_VERSION.to_string(),
        }
    }
}

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No network below us
    Offline,
    /// Network up, no server connection
    Disconnected,
    /// Socket open, registration not yet sent
    Connected,
    /// Registration sent, periodic traffic flowing
    Registered,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Offline => "offline",
            LinkState::Disconnected => "disconnected",
            LinkState::Connected => "connected",
            LinkState::Registered => "registered",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Last-resort device restart, armed by the `reboot` action.
pub trait RestartHandle {
    fn restart(&mut self);
}

impl<F: FnMut()> RestartHandle for F {
    fn restart(&mut self) {
        self()
    }
}

/// The device side of the server session.
pub struct DeviceLink<T: Transport> {
    transport: T,
    factory: MessageFactory,
    config: DeviceConfig,
    link_cfg: LinkConfig,
    state: LinkState,
    last_attempt_ms: Option<u64>,
    attempts: u32,
    gave_up: bool,
    last_heartbeat_ms: u64,
    last_report_ms: u64,
    force_report: bool,
    reboot_at_ms: Option<u64>,
    restart: Option<Box<dyn RestartHandle>>,
    last_command: String,
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(transport: T, config: DeviceConfig, link_cfg: LinkConfig) -> Self {
        let factory = MessageFactory::new(config.device_id());
        Self {
            transport,
            factory,
            config,
            link_cfg,
            state: LinkState::Offline,
            last_attempt_ms: None,
            attempts: 0,
            gave_up: false,
            last_heartbeat_ms: 0,
            last_report_ms: 0,
            force_report: false,
            reboot_at_ms: None,
            restart: None,
            last_command: String::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Direct configuration access, for provisioning before going online
    pub fn config_mut(&mut self) -> &mut DeviceConfig {
        &mut self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Key or action name of the last dispatched inbound command
    pub fn last_command(&self) -> &str {
        &self.last_command
    }

    /// Install the restart hook used by the `reboot` action
    pub fn set_restart_handle(&mut self, handle: Box<dyn RestartHandle>) {
        self.restart = Some(handle);
    }

    /// Whether a reboot is armed and waiting for its deadline
    pub fn reboot_scheduled(&self) -> bool {
        self.reboot_at_ms.is_some()
    }

    /// Network came up; connecting may begin
    pub fn wifi_up(&mut self) {
        if self.state == LinkState::Offline {
            info!("network up");
            self.state = LinkState::Disconnected;
            self.attempts = 0;
            self.gave_up = false;
            self.last_attempt_ms = None;
        }
    }

    /// Network went away; drop everything
    pub fn wifi_lost(&mut self) {
        if self.state != LinkState::Offline {
            warn!("network lost");
            self.transport.disconnect();
            self.state = LinkState::Offline;
        }
    }

    /// Drain and dispatch inbound frames.
    pub fn poll_inbound(
        &mut self,
        now_ms: u64,
        store: &mut dyn NvStore,
        controls: &mut ControlRegistry,
    ) {
        self.factory.set_timestamp((now_ms / 1000) as u32);
        if self.state == LinkState::Offline {
            return;
        }

        loop {
            match self.transport.poll_frame() {
                Ok(Some(frame)) => self.handle_frame(&frame, now_ms, store, controls),
                Ok(None) => break,
                Err(e) => {
                    warn!("receive failed: {}", e);
                    self.drop_link();
                    break;
                }
            }
        }

        let established =
            self.state == LinkState::Connected || self.state == LinkState::Registered;
        if established && !self.transport.is_connected() {
            debug!("connection lost");
            self.drop_link();
        }
    }

    /// Run the outbound side: reconnects, registration, periodic
    /// traffic, and armed reboots.
    pub fn poll_outbound(&mut self, now_ms: u64, sensors: &SensorRegistry) {
        self.factory.set_timestamp((now_ms / 1000) as u32);

        if let Some(at) = self.reboot_at_ms {
            if now_ms >= at {
                self.reboot_at_ms = None;
                warn!("restarting now");
                match self.restart.as_mut() {
                    Some(handle) => handle.restart(),
                    None => warn!("no restart handle installed"),
                }
            }
        }

        match self.state {
            LinkState::Offline => {}
            LinkState::Disconnected => self.maybe_reconnect(now_ms),
            LinkState::Connected => self.send_register(now_ms),
            LinkState::Registered => self.pump_periodic(now_ms, sensors),
        }
    }

    /// Send a status snapshot if the session is established
    pub fn push_status(&mut self, controls: &ControlRegistry) {
        if self.state != LinkState::Connected && self.state != LinkState::Registered {
            return;
        }
        let mode = self.config.work_mode();
        let states = controls.states();
        match self.factory.build_status(mode as u8, &states) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => warn!("status build failed: {}", e),
        }
    }

    /// Switch work mode from the application side.
    ///
    /// Persists on change and pushes a status snapshot to the server.
    pub fn set_work_mode(
        &mut self,
        mode: WorkMode,
        store: &mut dyn NvStore,
        controls: &ControlRegistry,
    ) -> bool {
        let changed = self.config.set_work_mode(mode, store);
        if changed {
            self.push_status(controls);
        }
        changed
    }

    /// Apply a sparse local configuration patch
    pub fn apply_config_patch(&mut self, patch: &JsonView<'_>, store: &mut dyn NvStore) -> bool {
        self.config.apply_patch(patch, store)
    }

    fn drop_link(&mut self) {
        self.transport.disconnect();
        self.state = LinkState::Disconnected;
        self.attempts = 0;
        self.gave_up = false;
        self.last_attempt_ms = None;
    }

    fn maybe_reconnect(&mut self, now_ms: u64) {
        if self.gave_up {
            return;
        }
        let max = self.link_cfg.max_reconnect_attempts;
        if max > 0 && self.attempts >= max {
            self.gave_up = true;
            error!(
                "{}",
                LinkError::RetriesExhausted {
                    attempts: self.attempts
                }
            );
            return;
        }

        let due = match self.last_attempt_ms {
            None => true,
            Some(t) => {
                now_ms.saturating_sub(t) >= self.link_cfg.reconnect_interval_s as u64 * 1000
            }
        };
        if !due {
            return;
        }
        self.last_attempt_ms = Some(now_ms);

        if !self.config.is_valid() {
            warn!("configuration incomplete, not connecting");
            return;
        }

        self.attempts += 1;
        let ip = self.config.server_ip().to_string();
        let port = self.config.server_port();
        info!("connecting to {}:{} (attempt {})", ip, port, self.attempts);
        match self
            .transport
            .connect(&ip, port, self.link_cfg.connect_timeout_ms)
        {
            Ok(()) => {
                info!("connected");
                self.state = LinkState::Connected;
                self.attempts = 0;
            }
            Err(e) => warn!("connect failed: {}", e),
        }
    }

    fn send_register(&mut self, now_ms: u64) {
        self.factory.set_device_id(self.config.device_id());
        let user = self.config.bound_user().to_string();
        let firmware = self.link_cfg.firmware_version.clone();
        match self.factory.build_register(&user, &firmware) {
            Ok(frame) => {
                self.send_frame(frame);
                if self.state == LinkState::Connected {
                    info!("registered as {}", self.config.device_id());
                    self.state = LinkState::Registered;
                    self.last_heartbeat_ms = now_ms;
                    self.last_report_ms = now_ms;
                    self.force_report = true;
                }
            }
            Err(e) => warn!("register build failed: {}", e),
        }
    }

    fn pump_periodic(&mut self, now_ms: u64, sensors: &SensorRegistry) {
        let hb_interval = self.config.heartbeat_interval() as u64 * 1000;
        if now_ms.saturating_sub(self.last_heartbeat_ms) >= hb_interval {
            self.last_heartbeat_ms = now_ms;
            match self.factory.build_heartbeat() {
                Ok(frame) => self.send_frame(frame),
                Err(e) => warn!("heartbeat build failed: {}", e),
            }
        }
        if self.state != LinkState::Registered {
            return;
        }

        let report_interval = self.config.report_interval() as u64 * 1000;
        if self.force_report || now_ms.saturating_sub(self.last_report_ms) >= report_interval {
            self.force_report = false;
            self.last_report_ms = now_ms;
            let readings = sensors.readings();
            match self.factory.build_sensor_data(&readings) {
                Ok(frame) => self.send_frame(frame),
                Err(e) => warn!("report build failed: {}", e),
            }
        }
    }

    fn send_frame(&mut self, frame: String) {
        match self.transport.send(&frame) {
            Ok(()) => debug!("sent {} bytes", frame.len()),
            Err(e) => {
                warn!("send failed: {}", e);
                self.drop_link();
            }
        }
    }

    fn handle_frame(
        &mut self,
        text: &str,
        now_ms: u64,
        store: &mut dyn NvStore,
        controls: &mut ControlRegistry,
    ) {
        let env = match Envelope::parse(text) {
            Ok(env) => env,
            Err(e) => {
                debug!("dropping unparseable frame: {}", e);
                return;
            }
        };

        match env.kind() {
            Some(MessageType::Control) => self.handle_control(&env, store, controls),
            Some(MessageType::Config) => self.handle_config(&env, store),
            Some(MessageType::Action) => self.handle_action(&env, now_ms, controls),
            Some(MessageType::Ack) => {
                if let Some(pv) = env.payload_view() {
                    debug!("server ack {} ok={}", env.id, pv.get_int("ok", -1));
                }
            }
            Some(MessageType::RegisterOk) => debug!("registration confirmed"),
            Some(MessageType::RegisterErr) => warn!("registration refused by server"),
            Some(MessageType::HeartbeatOk) => debug!("heartbeat answered"),
            Some(MessageType::ErrorReport) => {
                warn!("server reported an error: {:?}", env.payload)
            }
            Some(other) => debug!("ignoring {} frame", other),
            None => debug!("dropping unknown message type {:?}", env.msg_type),
        }
    }

    fn handle_control(
        &mut self,
        env: &Envelope,
        store: &mut dyn NvStore,
        controls: &mut ControlRegistry,
    ) {
        let key = env
            .payload_view()
            .and_then(|pv| pv.get_str("k", CONTROL_KEY_LEN))
            .unwrap_or_default();
        if key.is_empty() {
            warn!("control command without key");
            self.send_ack(env, false, None);
            return;
        }
        let s = env
            .payload_view()
            .map(|pv| pv.get_int("s", 0))
            .unwrap_or(0);
        let on = s != 0;
        self.last_command = key.clone();

        if key == "mode" {
            let mode = if s == 0 { WorkMode::Auto } else { WorkMode::Manual };
            self.config.set_work_mode(mode, store);
            self.send_ack(env, true, Some(("mode", mode == WorkMode::Manual)));
            self.push_status(controls);
            return;
        }

        if self.config.work_mode() == WorkMode::Auto {
            debug!("auto mode, refusing manual control of {:?}", key);
            self.send_ack(env, false, Some((key.as_str(), on)));
            return;
        }

        match controls.set(&key, on) {
            Some(_) => self.send_ack(env, true, Some((key.as_str(), on))),
            None => {
                warn!("control {:?} not registered", key);
                self.send_ack(env, false, Some((key.as_str(), on)));
            }
        }
    }

    fn handle_config(&mut self, env: &Envelope, store: &mut dyn NvStore) {
        let Some(pv) = env.payload_view() else {
            self.send_ack(env, false, None);
            return;
        };

        // wholesale copy, the server sends the full set; absent fields land as -1
        let t = Thresholds {
            soil_low: pv.get_int("soil_lower", -1) as i16,
            soil_high: pv.get_int("soil_upper", -1) as i16,
            temp_low: pv.get_int("temp_lower", -1) as i16,
            temp_high: pv.get_int("temp_upper", -1) as i16,
            humi_low: pv.get_int("humi_lower", -1) as i16,
            humi_high: pv.get_int("humi_upper", -1) as i16,
            light_low: pv.get_int("light_lower", -1) as i16,
            light_high: pv.get_int("light_upper", -1) as i16,
        };
        self.config.set_thresholds(t, store);

        self.send_ack(env, true, None);
    }

    fn handle_action(&mut self, env: &Envelope, now_ms: u64, controls: &ControlRegistry) {
        let action = env
            .payload_view()
            .and_then(|pv| pv.get_str("act", ACTION_LEN))
            .unwrap_or_default();
        self.last_command = action.clone();

        match action.as_str() {
            "get_status" => {
                self.push_status(controls);
                self.send_ack(env, true, None);
            }
            "reboot" => {
                info!("reboot requested");
                self.send_ack(env, true, None);
                self.reboot_at_ms = Some(now_ms + REBOOT_DELAY_MS);
            }
            other => {
                warn!("unknown action {:?}", other);
                self.send_ack(env, false, None);
            }
        }
    }

    fn send_ack(&mut self, env: &Envelope, ok: bool, detail: Option<(&str, bool)>) {
        if env.id.is_empty() {
            debug!("inbound {} had no id, ack suppressed", env.msg_type);
            return;
        }
        match self.factory.build_ack(&env.id, ok, detail) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => warn!("ack build failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{KEY_LIGHT, KEY_PUMP};
    use crate::protocol::PROTOCOL_VERSION;
    use crate::sensors::KEY_SOIL;
    use crate::storage::MemoryStore;
    use crate::transport::MemoryTransport;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Rig {
        link: DeviceLink<MemoryTransport>,
        store: MemoryStore,
        sensors: SensorRegistry,
        controls: ControlRegistry,
    }

    impl Rig {
        fn new() -> Self {
            Self::with_link_cfg(LinkConfig::default())
        }

        fn with_link_cfg(link_cfg: LinkConfig) -> Self {
            let mut store = MemoryStore::new();
            let config = DeviceConfig::init(&mut store);
            let link = DeviceLink::new(MemoryTransport::new(), config, link_cfg);

            let mut sensors = SensorRegistry::new();
            sensors.register(KEY_SOIL, Box::new(|_: u64| 50));
            let mut controls = ControlRegistry::new();
            controls.register(KEY_PUMP, Box::new(|_: bool| {}));
            controls.register(KEY_LIGHT, Box::new(|_: bool| {}));

            Rig {
                link,
                store,
                sensors,
                controls,
            }
        }

        /// Connect, register, absorb the forced first report
        fn go_online(&mut self) {
            self.link.wifi_up();
            self.link.poll_outbound(0, &self.sensors);
            self.link.poll_outbound(0, &self.sensors);
            self.link.poll_outbound(0, &self.sensors);
            assert_eq!(self.link.state(), LinkState::Registered);
            self.link.transport_mut().take_sent();
        }

        fn inbound(&mut self, frame: &str, now_ms: u64) {
            self.link.transport_mut().push_inbound(frame);
            self.link
                .poll_inbound(now_ms, &mut self.store, &mut self.controls);
        }

        fn sent(&mut self) -> Vec<Envelope> {
            self.link
                .transport_mut()
                .take_sent()
                .iter()
                .map(|f| Envelope::parse(f).unwrap())
                .collect()
        }
    }

    #[test]
    fn test_comes_online_and_registers() {
        let mut rig = Rig::new();
        rig.link.wifi_up();
        assert_eq!(rig.link.state(), LinkState::Disconnected);

        rig.link.poll_outbound(0, &rig.sensors);
        assert_eq!(rig.link.state(), LinkState::Connected);
        assert!(rig.link.transport().sent().is_empty());

        rig.link.poll_outbound(0, &rig.sensors);
        assert_eq!(rig.link.state(), LinkState::Registered);

        rig.link.poll_outbound(0, &rig.sensors);
        let sent = rig.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind(), Some(MessageType::Register));
        assert_eq!(sent[0].version, PROTOCOL_VERSION);
        let reg = sent[0].payload_view().unwrap();
        assert_eq!(reg.get_str("ver", 16).as_deref(), Some(FIRMWARE_VERSION));
        // the forced first report carries the cached readings
        assert_eq!(sent[1].kind(), Some(MessageType::SensorData));
        assert_eq!(sent[1].payload_view().unwrap().get_int("soil", -1), 0);
    }

    #[test]
    fn test_stays_offline_without_wifi() {
        let mut rig = Rig::new();
        rig.link.poll_outbound(0, &rig.sensors);
        assert_eq!(rig.link.state(), LinkState::Offline);
        assert_eq!(rig.link.transport().connect_attempts(), 0);
    }

    #[test]
    fn test_heartbeat_cadence() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.link.poll_outbound(9_999, &rig.sensors);
        assert!(rig.link.transport().sent().is_empty());

        rig.link.poll_outbound(10_000, &rig.sensors);
        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), Some(MessageType::Heartbeat));
    }

    #[test]
    fn test_report_cadence() {
        let mut rig = Rig::new();
        rig.go_online();
        rig.sensors.read_all(29_000);

        rig.link.poll_outbound(30_000, &rig.sensors);
        let sent = rig.sent();
        // both timers fire on this poll
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind(), Some(MessageType::Heartbeat));
        assert_eq!(sent[1].kind(), Some(MessageType::SensorData));
        assert_eq!(sent[1].payload_view().unwrap().get_int("soil", -1), 50);
    }

    #[test]
    fn test_reconnect_is_paced() {
        let mut rig = Rig::new();
        rig.link.transport_mut().refuse_connections(true);
        rig.link.wifi_up();

        rig.link.poll_outbound(0, &rig.sensors);
        assert_eq!(rig.link.transport().connect_attempts(), 1);

        rig.link.poll_outbound(5_000, &rig.sensors);
        assert_eq!(rig.link.transport().connect_attempts(), 1);

        rig.link.poll_outbound(10_000, &rig.sensors);
        assert_eq!(rig.link.transport().connect_attempts(), 2);
        assert_eq!(rig.link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut rig = Rig::with_link_cfg(LinkConfig {
            max_reconnect_attempts: 2,
            ..LinkConfig::default()
        });
        rig.link.transport_mut().refuse_connections(true);
        rig.link.wifi_up();

        for i in 0..5 {
            rig.link.poll_outbound(i * 10_000, &rig.sensors);
        }
        assert_eq!(rig.link.transport().connect_attempts(), 2);

        // a wifi cycle resets the budget
        rig.link.wifi_lost();
        rig.link.wifi_up();
        rig.link.poll_outbound(60_000, &rig.sensors);
        assert_eq!(rig.link.transport().connect_attempts(), 3);
    }

    #[test]
    fn test_reconnects_after_connection_drop() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.link.transport_mut().drop_connection();
        rig.link
            .poll_inbound(1_000, &mut rig.store, &mut rig.controls);
        assert_eq!(rig.link.state(), LinkState::Disconnected);

        rig.link.poll_outbound(1_000, &rig.sensors);
        assert_eq!(rig.link.state(), LinkState::Connected);
    }

    #[test]
    fn test_invalid_config_blocks_connecting() {
        let mut rig = Rig::new();
        rig.link.config_mut().set_server("", 0);
        rig.link.wifi_up();
        rig.link.poll_outbound(0, &rig.sensors);
        assert_eq!(rig.link.transport().connect_attempts(), 0);
        assert_eq!(rig.link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_ctl_mode_switch_acks_and_reports() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.inbound(r#"{"t":"ctl","id":"7","p":{"k":"mode","s":1}}"#, 1_000);
        assert_eq!(rig.link.config().work_mode(), WorkMode::Manual);
        assert_eq!(rig.link.last_command(), "mode");

        let sent = rig.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind(), Some(MessageType::Ack));
        assert_eq!(sent[0].id, "7");
        let ack = sent[0].payload_view().unwrap();
        assert_eq!(ack.get_int("ok", -1), 1);
        assert_eq!(ack.get_str("k", 16).as_deref(), Some("mode"));
        assert_eq!(ack.get_int("s", -1), 1);

        assert_eq!(sent[1].kind(), Some(MessageType::Status));
        let sta = sent[1].payload_view().unwrap();
        assert_eq!(sta.get_int("mode", -1), 1);
        assert_eq!(sta.get_int("pump", -1), 0);
    }

    #[test]
    fn test_ctl_actuator_executes_in_manual_mode() {
        let mut rig = Rig::new();
        rig.go_online();
        rig.inbound(r#"{"t":"ctl","id":"7","p":{"k":"mode","s":1}}"#, 1_000);
        rig.sent();

        rig.inbound(r#"{"t":"ctl","id":"8","p":{"k":"pump","s":1}}"#, 2_000);
        assert_eq!(rig.controls.get(KEY_PUMP), Some(true));

        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        let ack = sent[0].payload_view().unwrap();
        assert_eq!(ack.get_int("ok", -1), 1);
        assert_eq!(ack.get_str("k", 16).as_deref(), Some("pump"));
        assert_eq!(ack.get_int("s", -1), 1);
    }

    #[test]
    fn test_ctl_actuator_refused_in_auto_mode() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.inbound(r#"{"t":"ctl","id":"42","p":{"k":"light","s":1}}"#, 1_000);
        assert_eq!(rig.controls.get(KEY_LIGHT), Some(false));

        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, "42");
        let ack = sent[0].payload_view().unwrap();
        assert_eq!(ack.get_int("ok", -1), 0);
        assert_eq!(ack.get_str("k", 16).as_deref(), Some("light"));
    }

    #[test]
    fn test_ctl_unknown_key_refused() {
        let mut rig = Rig::new();
        rig.go_online();
        rig.inbound(r#"{"t":"ctl","id":"7","p":{"k":"mode","s":1}}"#, 1_000);
        rig.sent();

        rig.inbound(r#"{"t":"ctl","id":"9","p":{"k":"sprinkler","s":1}}"#, 2_000);
        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload_view().unwrap().get_int("ok", -1), 0);
    }

    #[test]
    fn test_ctl_without_id_gets_no_ack() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.inbound(r#"{"t":"ctl","p":{"k":"pump","s":1}}"#, 1_000);
        assert!(rig.link.transport().sent().is_empty());
    }

    #[test]
    fn test_cfg_rewrites_thresholds() {
        let mut rig = Rig::new();
        rig.go_online();
        let writes_before = rig.store.write_count();

        rig.inbound(
            concat!(
                r#"{"t":"cfg","id":"9","p":{"soil_lower":20,"soil_upper":65,"#,
                r#""temp_lower":160,"temp_upper":350,"humi_lower":35,"#,
                r#""humi_upper":80,"light_lower":150,"light_upper":900}}"#
            ),
            1_000,
        );
        let t = rig.link.config().thresholds();
        assert_eq!(t.soil_low, 20);
        assert_eq!(t.soil_high, 65);
        assert_eq!(t.temp_low, 160);
        assert_eq!(t.temp_high, 350);
        assert_eq!(t.light_high, 900);
        assert_eq!(rig.store.write_count(), writes_before + 1);

        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload_view().unwrap().get_int("ok", -1), 1);
    }

    #[test]
    fn test_cfg_is_a_wholesale_copy() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.inbound(r#"{"t":"cfg","id":"10","p":{"soil_lower":20}}"#, 1_000);
        let t = rig.link.config().thresholds();
        assert_eq!(t.soil_low, 20);
        // fields the server left out are not preserved
        assert_eq!(t.soil_high, -1);
        assert_eq!(t.temp_low, -1);
    }

    #[test]
    fn test_act_get_status_sends_status_before_ack() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.inbound(r#"{"t":"act","id":"11","p":{"act":"get_status"}}"#, 1_000);
        let sent = rig.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind(), Some(MessageType::Status));
        let sta = sent[0].payload_view().unwrap();
        assert_eq!(sta.get_int("mode", -1), 0);
        assert_eq!(sta.get_int("light", -1), 0);
        assert_eq!(sent[1].kind(), Some(MessageType::Ack));
        assert_eq!(sent[1].id, "11");
    }

    #[test]
    fn test_act_reboot_fires_restart_after_delay() {
        let mut rig = Rig::new();
        rig.go_online();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        rig.link.set_restart_handle(Box::new(move || flag.set(true)));

        rig.inbound(r#"{"t":"act","id":"12","p":{"act":"reboot"}}"#, 1_000);
        assert!(rig.link.reboot_scheduled());
        let sent = rig.sent();
        assert_eq!(sent[0].payload_view().unwrap().get_int("ok", -1), 1);

        rig.link.poll_outbound(1_400, &rig.sensors);
        assert!(!fired.get());
        rig.link.poll_outbound(1_500, &rig.sensors);
        assert!(fired.get());
        assert!(!rig.link.reboot_scheduled());
    }

    #[test]
    fn test_act_unknown_action_refused() {
        let mut rig = Rig::new();
        rig.go_online();
        rig.inbound(r#"{"t":"act","id":"13","p":{"act":"self_destruct"}}"#, 1_000);
        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload_view().unwrap().get_int("ok", -1), 0);
    }

    #[test]
    fn test_junk_frames_are_dropped() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.inbound(r#"{"t":"zzz","id":"5"}"#, 1_000);
        rig.inbound(r#"{"id":"6"}"#, 1_000);
        rig.inbound("not json at all", 1_000);

        assert!(rig.link.transport().sent().is_empty());
        assert_eq!(rig.link.state(), LinkState::Registered);
    }

    #[test]
    fn test_server_frames_are_logged_without_acks() {
        let mut rig = Rig::new();
        rig.go_online();

        rig.inbound(r#"{"t":"reg_ok","id":"1"}"#, 1_000);
        rig.inbound(r#"{"t":"hb_ok","id":"2"}"#, 1_000);
        rig.inbound(r#"{"t":"reg_err","id":"3"}"#, 1_000);
        rig.inbound(r#"{"t":"err","id":"4","p":{"code":3}}"#, 1_000);

        assert!(rig.link.transport().sent().is_empty());
        assert_eq!(rig.link.state(), LinkState::Registered);
    }

    #[test]
    fn test_app_mode_switch_pushes_status() {
        let mut rig = Rig::new();
        rig.go_online();

        let changed =
            rig.link
                .set_work_mode(WorkMode::Manual, &mut rig.store, &rig.controls);
        assert!(changed);
        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), Some(MessageType::Status));

        // repeat is a no-op
        let changed =
            rig.link
                .set_work_mode(WorkMode::Manual, &mut rig.store, &rig.controls);
        assert!(!changed);
        assert!(rig.link.transport().sent().is_empty());
    }
}
