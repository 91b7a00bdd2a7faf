use serde::{Deserialize, Serialize};

use super::{encode, ByteOrder, Message, PacketId, PacketInfo};
use crate::IngestError;

pub const EVENT_NOTICE_LEN: usize = 128;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct EventNotice {
    pub packet: PacketInfo,
    pub start_of_sweep: i32,
    pub end_of_sweep: i32,
    pub start_of_volume: i32,
    pub end_of_volume: i32,
    pub scan_mode: i32,
    pub follow_mode: i32,
    pub volume_num: i32,
    pub sweep_num: i32,
    pub cause: i32,
    pub current_fixed_angle: f32,
    pub antenna_transition: i32,
    pub unused: [i32; 7],
} /* total size = 128 */

impl EventNotice {
    pub fn end_of_volume(volume_num: i32, sweep_num: i32) -> Self {
        let mut packet = PacketInfo::new(PacketId::EventNotice, EVENT_NOTICE_LEN);
        if let Ok(now) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            packet.time_secs_utc = now.as_secs() as i64;
            packet.time_nano_secs = now.subsec_nanos() as i32;
        }
        EventNotice {
            packet,
            end_of_volume: 1,
            volume_num,
            sweep_num,
            current_fixed_angle: f32::NAN,
            ..Default::default()
        }
    }

    pub fn to_message(&self, order: ByteOrder) -> Result<Message, IngestError> {
        Ok(Message::new(
            PacketId::EventNotice as i32,
            order,
            encode(self, order)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iwrf::decode;

    #[test]
    fn end_of_volume_notice() {
        let message = EventNotice::end_of_volume(4, 9)
            .to_message(ByteOrder::Little)
            .unwrap();
        assert_eq!(message.len(), EVENT_NOTICE_LEN);
        assert_eq!(message.packet_id(), Some(PacketId::EventNotice));

        let (info, _) = PacketInfo::peek(&message.bytes).unwrap();
        assert_eq!(info.len_bytes as usize, EVENT_NOTICE_LEN);
        assert_eq!(info.version_num, 1);

        let notice: EventNotice = decode(&message.bytes, ByteOrder::Little).unwrap();
        assert_eq!(notice.end_of_volume, 1);
        assert_eq!(notice.start_of_volume, 0);
        assert_eq!(notice.volume_num, 4);
        assert_eq!(notice.sweep_num, 9);
        assert!(notice.current_fixed_angle.is_nan());
    }
}
