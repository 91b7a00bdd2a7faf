use crate::iwrf::{packet_id_name, ByteOrder, Message, PacketInfo};
use crate::util::PrintableSlice;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReassemblyStatistics {
    pub messages: u64,
    pub incomplete_dropped: u64,
    pub oversize_dropped: u64,
    pub sync_dropped: u64,
}

struct InProgress {
    id: i32,
    order: ByteOrder,
    declared_len: usize,
}

/// Rebuilds IWRF packets that were split across several datagrams.
///
/// A datagram that starts with a valid packet header always starts a new
/// message. Datagrams that arrive while no message is in progress and that do
/// not start with a header are dropped until the stream is back in sync.
pub struct MessageReassembler {
    buf: Vec<u8>,
    current: Option<InProgress>,
    synchronizing: bool,
    pub statistics: ReassemblyStatistics,
}

impl Default for MessageReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageReassembler {
    pub fn new() -> Self {
        MessageReassembler {
            buf: Vec::with_capacity(65536),
            current: None,
            synchronizing: false,
            statistics: ReassemblyStatistics::default(),
        }
    }

    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Feed one datagram; returns a message when this datagram completes one.
    pub fn push(&mut self, datagram: &[u8]) -> Option<Message> {
        if let Some((info, order)) = PacketInfo::peek(datagram) {
            if let Some(current) = &self.current {
                self.statistics.incomplete_dropped += 1;
                log::warn!(
                    "Dropped incomplete message {}: got {} of {} bytes",
                    packet_id_name(current.id),
                    self.buf.len(),
                    current.declared_len
                );
            }
            if self.synchronizing {
                log::debug!("Back in sync at {}", packet_id_name(info.id));
                self.synchronizing = false;
            }
            self.buf.clear();
            self.current = Some(InProgress {
                id: info.id,
                order,
                declared_len: info.len_bytes as usize,
            });
        }

        let Some(current) = &self.current else {
            self.statistics.sync_dropped += 1;
            if !self.synchronizing {
                log::warn!("Synchronizing - dropping packet of {} bytes", datagram.len());
                self.synchronizing = true;
            } else {
                log::debug!("Synchronizing - dropping packet of {} bytes", datagram.len());
            }
            log::trace!(
                "Dropped {}",
                PrintableSlice::new(&datagram[..datagram.len().min(32)])
            );
            return None;
        };

        if self.buf.len() + datagram.len() > current.declared_len {
            self.statistics.oversize_dropped += 1;
            log::warn!(
                "Dropped message {}: {} bytes received, but only {} declared",
                packet_id_name(current.id),
                self.buf.len() + datagram.len(),
                current.declared_len
            );
            self.reset();
            return None;
        }

        self.buf.extend_from_slice(datagram);
        if self.buf.len() < current.declared_len {
            return None;
        }

        let message = Message::new(current.id, current.order, self.buf.clone());
        self.statistics.messages += 1;
        self.reset();
        log::trace!(
            "Reassembled {} of {} bytes",
            packet_id_name(message.id),
            message.len()
        );
        Some(message)
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.current = None;
    }
}
