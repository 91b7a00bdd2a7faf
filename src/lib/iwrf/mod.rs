use bincode::Options;
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::IngestError;

pub mod calibration;
pub mod event;
pub mod pulse;

pub use calibration::Calibration;
pub use event::EventNotice;
pub use pulse::{PulseHeader, PulsePacket};

/// Size of the `packet info` block at the top of every IWRF packet
pub const PACKET_INFO_LEN: usize = 56;
/// Anything longer than this is garbage, not a packet
pub const MAX_PACKET_LEN: usize = 1_000_000;

// The values are the IWRF packet ids as they appear on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Primitive)]
pub enum PacketId {
    Sync = 0x77770001,
    RadarInfo = 0x77770002,
    ScanSegment = 0x77770003,
    AntennaCorrection = 0x77770004,
    TsProcessing = 0x77770005,
    XmitPower = 0x77770006,
    XmitSample = 0x77770007,
    Calibration = 0x77770008,
    EventNotice = 0x77770009,
    PhaseCode = 0x7777000a,
    XmitInfo = 0x7777000b,
    PulseHeader = 0x7777000c,
    Version = 0x7777000d,
    UiOperations = 0x7777000e,
    AntControlConstants = 0x7777000f,
    XmitSampleV2 = 0x77770010,
    BurstHeader = 0x77770011,
    StatusXml = 0x77770012,
    AntennaAngles = 0x77770013,
    RxPower = 0x77770014,
    Rvp8OpsInfo = 0x77770070,
    Rvp8PulseHeader = 0x77770071,
    MomentsFieldHeader = 0x77770101,
    MomentsRayHeader = 0x77770102,
    MomentsFieldIndex = 0x77770103,
    PlatformGeoref = 0x77770111,
    GeorefCorrection = 0x77770112,
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub fn packet_id_name(id: i32) -> String {
    match PacketId::from_i32(id) {
        Some(p) => p.to_string(),
        None => format!("Unknown(0x{:08x})", id),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Work out the byte order of a packet from its leading id field.
    pub fn detect(bytes: &[u8]) -> Option<ByteOrder> {
        let raw: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
        if PacketId::from_i32(i32::from_le_bytes(raw)).is_some() {
            return Some(ByteOrder::Little);
        }
        if PacketId::from_i32(i32::from_be_bytes(raw)).is_some() {
            return Some(ByteOrder::Big);
        }
        None
    }

    pub fn read_f32(&self, raw: [u8; 4]) -> f32 {
        match self {
            ByteOrder::Little => f32::from_le_bytes(raw),
            ByteOrder::Big => f32::from_be_bytes(raw),
        }
    }

    pub fn write_f32(&self, value: f32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

// IWRF structs are C structs without implicit padding, so bincode with fixed
// size integers gives exactly the wire layout.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8], order: ByteOrder) -> Result<T, IngestError> {
    let options = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes();
    let r = match order {
        ByteOrder::Little => options.with_little_endian().deserialize(bytes),
        ByteOrder::Big => options.with_big_endian().deserialize(bytes),
    };
    r.map_err(|e| IngestError::Decode(e.to_string()))
}

pub(crate) fn encode<T: Serialize>(value: &T, order: ByteOrder) -> Result<Vec<u8>, IngestError> {
    let options = bincode::DefaultOptions::new().with_fixint_encoding();
    let r = match order {
        ByteOrder::Little => options.with_little_endian().serialize(value),
        ByteOrder::Big => options.with_big_endian().serialize(value),
    };
    r.map_err(|e| IngestError::Decode(e.to_string()))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct PacketInfo {
    pub id: i32,
    pub len_bytes: i32,
    pub seq_num: i64,
    pub version_num: i32,
    pub radar_id: i32,
    pub time_secs_utc: i64,
    pub time_nano_secs: i32,
    pub reserved: [i32; 5],
} /* total size = 56 */

impl PacketInfo {
    pub fn new(id: PacketId, len_bytes: usize) -> Self {
        PacketInfo {
            id: id as i32,
            len_bytes: len_bytes as i32,
            version_num: 1,
            ..Default::default()
        }
    }

    /// Look for a packet header at the front of `bytes`. Only returns a header
    /// for a known packet id with a plausible length.
    pub fn peek(bytes: &[u8]) -> Option<(PacketInfo, ByteOrder)> {
        if bytes.len() < PACKET_INFO_LEN {
            return None;
        }
        let order = ByteOrder::detect(bytes)?;
        let info: PacketInfo = decode(&bytes[..PACKET_INFO_LEN], order).ok()?;
        let len = info.len_bytes as usize;
        if info.len_bytes < 0 || len < PACKET_INFO_LEN || len > MAX_PACKET_LEN {
            return None;
        }
        Some((info, order))
    }

    pub fn time(&self) -> f64 {
        self.time_secs_utc as f64 + self.time_nano_secs as f64 / 1.0e9
    }

    pub fn set_time(&mut self, time: f64) {
        let secs = time.floor();
        let mut nanos = ((time - secs) * 1.0e9).round() as i64;
        let mut secs = secs as i64;
        if nanos >= 1_000_000_000 {
            secs += 1;
            nanos -= 1_000_000_000;
        }
        self.time_secs_utc = secs;
        self.time_nano_secs = nanos as i32;
    }

    pub fn time_string(&self) -> String {
        match chrono::DateTime::from_timestamp(self.time_secs_utc, self.time_nano_secs.max(0) as u32)
        {
            Some(t) => t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            None => format!("{}.{:09}", self.time_secs_utc, self.time_nano_secs),
        }
    }
}

/// A complete, framed IWRF packet: the packet header followed by its body.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: i32,
    pub order: ByteOrder,
    pub bytes: Vec<u8>,
}

impl Message {
    pub fn new(id: i32, order: ByteOrder, bytes: Vec<u8>) -> Self {
        Message { id, order, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn packet_id(&self) -> Option<PacketId> {
        PacketId::from_i32(self.id)
    }
}

/// A message classified by the kind of processing it needs.
#[derive(Debug)]
pub enum Packet {
    PulseHeader(PulsePacket),
    Calibration(Message),
    Other(Message),
}

impl Packet {
    pub fn from_message(message: Message) -> Packet {
        match message.packet_id() {
            Some(PacketId::PulseHeader) => match PulsePacket::from_message(message) {
                Ok(pulse) => Packet::PulseHeader(pulse),
                Err((message, e)) => {
                    log::warn!("Cannot decode pulse header, passing it on as is: {}", e);
                    Packet::Other(message)
                }
            },
            Some(PacketId::Calibration) => Packet::Calibration(message),
            _ => Packet::Other(message),
        }
    }
}
