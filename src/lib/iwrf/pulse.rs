use serde::{Deserialize, Serialize};

use super::{decode, encode, ByteOrder, Message, PacketId, PacketInfo};
use crate::IngestError;

pub const PULSE_HEADER_LEN: usize = 256;

pub const SCAN_MODE_SECTOR: i32 = 1;
pub const IQ_ENCODING_FL32: i32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct PulseHeader {
    pub packet: PacketInfo,
    pub pulse_seq_num: i64,
    pub scan_mode: i32,
    pub follow_mode: i32,
    pub volume_num: i32,
    pub sweep_num: i32,
    pub fixed_el: f32,
    pub fixed_az: f32,
    pub elevation: f32,
    pub azimuth: f32,
    pub prt: f32,
    pub prt_next: f32,
    pub pulse_width_us: f32,
    pub n_gates: i32,
    pub n_channels: i32,
    pub iq_encoding: i32,
    pub hv_flag: i32,
    pub antenna_transition: i32,
    pub phase_cohered: i32,
    pub status: i32,
    pub n_data: i32,
    pub iq_offset: [i32; 4],
    pub burst_mag: [f32; 4],
    pub burst_arg: [f32; 4],
    pub burst_arg_diff: [f32; 4],
    pub scale: f32,
    pub offset: f32,
    pub n_gates_burst: i32,
    pub start_range_m: f32,
    pub gate_spacing_m: f32,
    pub event_flags: i32,
    pub txrx_state: i32,
    pub unused: [i32; 6],
} /* total size = 256 */

/// A pulse header packet, decoded once, with its IQ data still in wire form.
///
/// Corrections change `header` and, for rescaling, the IQ bytes. The header is
/// only written back into the byte buffer when the packet has been modified,
/// so untouched pulses leave as they arrived.
#[derive(Debug, Clone)]
pub struct PulsePacket {
    pub header: PulseHeader,
    order: ByteOrder,
    bytes: Vec<u8>,
    modified: bool,
}

impl PulsePacket {
    pub fn from_message(message: Message) -> Result<PulsePacket, (Message, IngestError)> {
        if message.bytes.len() < PULSE_HEADER_LEN {
            let e = IngestError::Decode(format!(
                "pulse packet of {} bytes is shorter than its header",
                message.bytes.len()
            ));
            return Err((message, e));
        }
        match decode::<PulseHeader>(&message.bytes[..PULSE_HEADER_LEN], message.order) {
            Ok(header) => Ok(PulsePacket {
                header,
                order: message.order,
                bytes: message.bytes,
                modified: false,
            }),
            Err(e) => Err((message, e)),
        }
    }

    pub fn time(&self) -> f64 {
        self.header.packet.time()
    }

    /// Mutable access to the header; marks the packet as modified.
    pub fn header_mut(&mut self) -> &mut PulseHeader {
        self.modified = true;
        &mut self.header
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// The IQ samples following the header, as raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.bytes[PULSE_HEADER_LEN..]
    }

    /// Apply `f` to each float IQ sample, limited to `n_data` and to the
    /// bytes actually present.
    pub fn map_fl32_samples<F: Fn(f32) -> f32>(&mut self, f: F) {
        let n_data = self.header.n_data.max(0) as usize;
        let available = (self.bytes.len() - PULSE_HEADER_LEN) / 4;
        let order = self.order;
        for chunk in self.bytes[PULSE_HEADER_LEN..]
            .chunks_exact_mut(4)
            .take(n_data.min(available))
        {
            let raw: [u8; 4] = [chunk[0], chunk[1], chunk[2], chunk[3]];
            chunk.copy_from_slice(&order.write_f32(f(order.read_f32(raw))));
        }
        self.modified = true;
    }

    pub fn into_message(mut self) -> Result<Message, IngestError> {
        if self.modified {
            let header = encode(&self.header, self.order)?;
            self.bytes[..PULSE_HEADER_LEN].copy_from_slice(&header);
        }
        Ok(Message::new(PacketId::PulseHeader as i32, self.order, self.bytes))
    }
}
