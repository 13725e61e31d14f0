//! Message envelope encoding and parsing
//!
//! Every frame on the device link is a single JSON object with the
//! envelope fields `v` (protocol version), `id` (message id), `ts`
//! (seconds timestamp), `t` (type tag), `d` (device id) and an optional
//! `p` payload object. [`MessageFactory`] stamps outbound envelopes and
//! generates monotonic message ids; [`Envelope`] is the parsed form of
//! an inbound frame.
//!
//! Only the type tag is mandatory on parse. Everything else defaults:
//! the compiled protocol version, empty strings, zero timestamp, absent
//! payload. An unrecognized type tag still parses; classification
//! happens later via [`Envelope::kind`].

use crate::error::{CodecError, ProtocolError, Result};
use crate::json::{clip, JsonBuilder, JsonView};

/// Envelope protocol version stamped into every outbound frame
pub const PROTOCOL_VERSION: &str = "1.0";

/// Maximum outbound message size in bytes
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Maximum extracted payload object size in bytes
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Maximum accepted inbound frame size in bytes
pub const MAX_FRAME_SIZE: usize = 1024;

/// Envelope field caps, one byte reserved for bookkeeping in each
pub const MAX_VERSION_LEN: usize = 8;
pub const MAX_ID_LEN: usize = 24;
pub const MAX_TYPE_LEN: usize = 16;
pub const MAX_DEVICE_ID_LEN: usize = 32;

/// Known envelope type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Device announces itself after connecting (`reg`)
    Register,
    /// Keepalive (`hb`)
    Heartbeat,
    /// Periodic sensor report (`dat`)
    SensorData,
    /// Mode and actuator state snapshot (`sta`)
    Status,
    /// Command acknowledgement (`ack`)
    Ack,
    /// Actuator or mode command (`ctl`)
    Control,
    /// Wholesale threshold update (`cfg`)
    Config,
    /// Named action request (`act`)
    Action,
    /// Server accepted a registration (`reg_ok`)
    RegisterOk,
    /// Server refused a registration (`reg_err`)
    RegisterErr,
    /// Server answered a keepalive (`hb_ok`)
    HeartbeatOk,
    /// Server-side fault report (`err`)
    ErrorReport,
}

impl MessageType {
    /// The wire tag for this type
    pub fn as_tag(&self) -> &'static str {
        match self {
            MessageType::Register => "reg",
            MessageType::Heartbeat => "hb",
            MessageType::SensorData => "dat",
            MessageType::Status => "sta",
            MessageType::Ack => "ack",
            MessageType::Control => "ctl",
            MessageType::Config => "cfg",
            MessageType::Action => "act",
            MessageType::RegisterOk => "reg_ok",
            MessageType::RegisterErr => "reg_err",
            MessageType::HeartbeatOk => "hb_ok",
            MessageType::ErrorReport => "err",
        }
    }

    /// Classify a wire tag, None for anything unrecognized
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "reg" => Some(MessageType::Register),
            "hb" => Some(MessageType::Heartbeat),
            "dat" => Some(MessageType::SensorData),
            "sta" => Some(MessageType::Status),
            "ack" => Some(MessageType::Ack),
            "ctl" => Some(MessageType::Control),
            "cfg" => Some(MessageType::Config),
            "act" => Some(MessageType::Action),
            "reg_ok" => Some(MessageType::RegisterOk),
            "reg_err" => Some(MessageType::RegisterErr),
            "hb_ok" => Some(MessageType::HeartbeatOk),
            "err" => Some(MessageType::ErrorReport),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

/// A parsed inbound frame.
///
/// Fields the sender omitted hold their defaults; `msg_type` is the raw
/// tag so unknown types survive parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: String,
    pub id: String,
    pub timestamp: u32,
    pub msg_type: String,
    pub device_id: String,
    pub payload: Option<String>,
}

impl Envelope {
    /// Parse one frame.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::FrameTooLarge`] when the text exceeds
    /// [`MAX_FRAME_SIZE`]; [`ProtocolError::MissingType`] when no `t`
    /// field can be extracted.
    pub fn parse(text: &str) -> Result<Envelope> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            }
            .into());
        }

        let view = JsonView::new(text);
        let msg_type = view
            .get_str("t", MAX_TYPE_LEN)
            .ok_or(ProtocolError::MissingType)?;

        Ok(Envelope {
            version: view
                .get_str("v", MAX_VERSION_LEN)
                .unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
            id: view.get_str("id", MAX_ID_LEN).unwrap_or_default(),
            timestamp: view.get_int("ts", 0) as u32,
            msg_type,
            device_id: view.get_str("d", MAX_DEVICE_ID_LEN).unwrap_or_default(),
            payload: view.get_object("p", MAX_PAYLOAD_SIZE),
        })
    }

    /// Classify the type tag
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_tag(&self.msg_type)
    }

    /// Field access over the payload object, if one was present
    pub fn payload_view(&self) -> Option<JsonView<'_>> {
        self.payload.as_deref().map(JsonView::new)
    }
}

/// Stamps outbound envelopes for one device.
///
/// Holds the device id, a monotonic message counter and the timestamp
/// to stamp. The clock is pushed in by the caller via
/// [`set_timestamp`](Self::set_timestamp) rather than read here.
#[derive(Debug, Clone)]
pub struct MessageFactory {
    device_id: String,
    counter: u32,
    timestamp: u32,
}

impl MessageFactory {
    /// Create a factory stamping `device_id` into every frame
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: clip(device_id, MAX_DEVICE_ID_LEN - 1).to_string(),
            counter: 0,
            timestamp: 0,
        }
    }

    /// Replace the stamped device id
    pub fn set_device_id(&mut self, device_id: &str) {
        self.device_id = clip(device_id, MAX_DEVICE_ID_LEN - 1).to_string();
    }

    /// The currently stamped device id
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Set the timestamp stamped into subsequent frames
    pub fn set_timestamp(&mut self, seconds: u32) {
        self.timestamp = seconds;
    }

    /// The timestamp currently being stamped
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Generate the next message id, `m` plus an eight-digit hex counter
    pub fn next_id(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!("m{:08x}", self.counter)
    }

    /// Messages stamped so far
    pub fn count(&self) -> u32 {
        self.counter
    }

    /// Envelope prefix shared by all outbound frames
    fn begin(&mut self, msg_type: MessageType) -> JsonBuilder {
        let id = self.next_id();
        let mut b = JsonBuilder::with_capacity(MAX_MESSAGE_SIZE);
        b.begin_object();
        b.add_str("v", PROTOCOL_VERSION);
        b.add_str("id", &id);
        b.add_int("ts", self.timestamp as i64);
        b.add_str("t", msg_type.as_tag());
        b.add_str("d", &self.device_id);
        b
    }

    /// Registration frame carrying device id, user binding and firmware
    pub fn build_register(&mut self, user: &str, firmware: &str) -> Result<String> {
        let mut b = self.begin(MessageType::Register);
        b.add_object("p");
        b.add_str("d", &self.device_id);
        b.add_str("u", user);
        b.add_str("ver", firmware);
        b.end_object();
        b.end_object();
        seal(b)
    }

    /// Keepalive frame, empty payload
    pub fn build_heartbeat(&mut self) -> Result<String> {
        let mut b = self.begin(MessageType::Heartbeat);
        b.add_object("p");
        b.end_object();
        b.end_object();
        seal(b)
    }

    /// Sensor report, one integer per reading key
    pub fn build_sensor_data(&mut self, readings: &[(&str, i32)]) -> Result<String> {
        let mut b = self.begin(MessageType::SensorData);
        b.add_object("p");
        for (key, value) in readings {
            b.add_int(key, *value as i64);
        }
        b.end_object();
        b.end_object();
        seal(b)
    }

    /// Status snapshot: work mode as 0 (auto) or 1 (manual), plus one
    /// 0/1 per actuator
    pub fn build_status(&mut self, mode: u8, states: &[(&str, bool)]) -> Result<String> {
        let mut b = self.begin(MessageType::Status);
        b.add_object("p");
        b.add_int("mode", mode as i64);
        for (key, on) in states {
            b.add_int(key, *on as i64);
        }
        b.end_object();
        b.end_object();
        seal(b)
    }

    /// Acknowledgement correlated to an inbound frame.
    ///
    /// `reply_to` is echoed verbatim as the ack's own id. `detail`
    /// echoes the commanded key and state for executed controls.
    pub fn build_ack(
        &mut self,
        reply_to: &str,
        ok: bool,
        detail: Option<(&str, bool)>,
    ) -> Result<String> {
        let mut b = JsonBuilder::with_capacity(MAX_MESSAGE_SIZE);
        b.begin_object();
        b.add_str("v", PROTOCOL_VERSION);
        b.add_str("id", clip(reply_to, MAX_ID_LEN - 1));
        b.add_int("ts", self.timestamp as i64);
        b.add_str("t", MessageType::Ack.as_tag());
        b.add_str("d", &self.device_id);
        b.add_object("p");
        b.add_int("ok", ok as i64);
        if let Some((key, state)) = detail {
            b.add_str("k", key);
            b.add_int("s", state as i64);
        }
        b.end_object();
        b.end_object();
        seal(b)
    }
}

fn seal(builder: JsonBuilder) -> Result<String> {
    let overflowed = builder.has_error();
    let capacity = builder.capacity();
    let depth = builder.depth();
    match builder.finish() {
        Some(text) => Ok(text),
        None if overflowed => Err(CodecError::Overflow { capacity }.into()),
        None => Err(CodecError::Unbalanced { depth }.into()),
    }
}
