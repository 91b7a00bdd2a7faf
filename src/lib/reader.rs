use log::{debug, error, info};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::Params;
use crate::dispatch::{CorrectionContext, Dispatcher};
use crate::input::{Datagram, MessageReassembler, RECEIVE_TIMEOUT};
use crate::iwrf::Calibration;
use crate::output::{BatchWriter, MessageSink};
use crate::position::PositionUpdater;
use crate::IngestError;

/// The consumer side of the pipeline. Owns all per-stream state, so nothing
/// here is shared with the receiver except the channel.
pub struct Reader<S: MessageSink> {
    reassembler: MessageReassembler,
    dispatcher: Dispatcher,
    writer: BatchWriter<S>,
    position: Option<PositionUpdater>,
    end_of_vol_after: Option<u32>,
    idle_count: u32,
}

impl<S: MessageSink> Reader<S> {
    pub fn new(params: &Params, sink: S) -> Result<Reader<S>, IngestError> {
        let calibration = if params.override_calibration {
            let calibration = Calibration::from_xml_file(&params.cal_xml_file_path)?;
            info!(
                "Calibration packets will be replaced from '{}' for radar '{}'",
                params.cal_xml_file_path.display(),
                calibration.radar_name
            );
            Some(calibration)
        } else {
            None
        };

        let position = params
            .update_position
            .then(|| PositionUpdater::new(&params.position_file_path, params.position_check_interval));

        Ok(Reader {
            reassembler: MessageReassembler::new(),
            dispatcher: Dispatcher::new(params, calibration),
            writer: BatchWriter::new(sink, params.n_pulses_per_message),
            position,
            end_of_vol_after: params
                .write_end_of_vol_when_data_stops
                .then_some(params.nsecs_no_data_for_end_of_vol),
            idle_count: 0,
        })
    }

    /// Process datagrams until shutdown or until the receiver goes away.
    /// Whatever is batched is written out either way.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Datagram>,
        shutdown: CancellationToken,
    ) -> Result<(), IngestError> {
        let r = loop {
            if let Some(position) = &mut self.position {
                position.maybe_refresh(Instant::now());
            }

            // Shutdown first: on Ctrl-C the receiver stops too, and its
            // closed channel must not read as a failure
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    break Ok(());
                },
                r = timeout(RECEIVE_TIMEOUT, rx.recv()) => {
                    match r {
                        Ok(Some(datagram)) => self.handle_datagram(datagram),
                        Ok(None) => {
                            error!("Input stream closed");
                            break Err(IngestError::InputClosed);
                        }
                        Err(_) => self.handle_idle(),
                    }
                },
            }
        };

        if let Err(e) = self.writer.close() {
            error!("Cannot close output: {}", e);
        }
        debug!(
            "Reader stopped: {} pulses ({} summaries), {:?}, {:?}",
            self.dispatcher.pulses(),
            self.dispatcher.summaries(),
            self.reassembler.statistics,
            self.writer.statistics
        );
        r
    }

    fn handle_datagram(&mut self, datagram: Datagram) {
        self.idle_count = 0;

        let Some(message) = self.reassembler.push(&datagram.data) else {
            return;
        };
        let context = CorrectionContext {
            position: self.position.as_ref().and_then(|p| p.position()),
        };
        if let Some(message) = self.dispatcher.dispatch(message, &context) {
            self.writer.add(message);
            self.writer.maybe_flush();
        }
    }

    fn handle_idle(&mut self) {
        self.idle_count = self.idle_count.saturating_add(1);
        if Some(self.idle_count) == self.end_of_vol_after {
            let (volume_num, sweep_num) = self.dispatcher.latest_volume_and_sweep();
            info!("No data for {} secs", self.idle_count);
            self.writer.write_end_of_volume(volume_num, sweep_num);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iwrf::pulse::tests::pulse_bytes;
    use crate::iwrf::{decode, ByteOrder, EventNotice, PacketId};
    use crate::output::decode_batch;
    use crate::output::tests::MemorySink;
    use std::time::Duration;

    #[tokio::test]
    async fn fragments_to_one_batch_on_close() {
        let samples: Vec<f32> = (0..400).map(|i| i as f32).collect();
        let bytes = pulse_bytes(ByteOrder::Little, 45.0, 2, &samples);
        let sink = MemorySink::default();
        let reader = Reader::new(&Params::default(), sink.clone()).unwrap();

        let (tx, rx) = mpsc::channel(16);
        let quarter = bytes.len() / 4;
        for k in 0..4 {
            let end = if k == 3 { bytes.len() } else { (k + 1) * quarter };
            tx.send(Datagram::new(bytes[k * quarter..end].to_vec()))
                .await
                .unwrap();
        }
        drop(tx);

        let r = reader.run(rx, CancellationToken::new()).await;
        assert!(matches!(r, Err(IngestError::InputClosed)));

        let written = sink.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        let parts = decode_batch(&written[0]).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].part_type, PacketId::PulseHeader as i32);
        assert_eq!(parts[0].bytes, &bytes[..]);
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_batch() {
        let sink = MemorySink::default();
        let reader = Reader::new(&Params::default(), sink.clone()).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        tx.send(Datagram::new(pulse_bytes(ByteOrder::Little, 1.0, 1, &[])))
            .await
            .unwrap();
        let handle = tokio::spawn(reader.run(rx, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(sink.written.lock().unwrap().len(), 1);
        drop(tx);
    }

    #[tokio::test]
    async fn shutdown_wins_over_closed_input() {
        for _ in 0..50 {
            let reader = Reader::new(&Params::default(), MemorySink::default()).unwrap();
            let (tx, rx) = mpsc::channel::<Datagram>(1);
            drop(tx);
            let shutdown = CancellationToken::new();
            shutdown.cancel();
            assert!(reader.run(rx, shutdown).await.is_ok());
        }
    }

    #[tokio::test]
    async fn end_of_volume_after_silence() {
        let params = Params {
            write_end_of_vol_when_data_stops: true,
            nsecs_no_data_for_end_of_vol: 1,
            ..Default::default()
        };
        let sink = MemorySink::default();
        let reader = Reader::new(&params, sink.clone()).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        tx.send(Datagram::new(pulse_bytes(ByteOrder::Little, 1.0, 3, &[])))
            .await
            .unwrap();
        let handle = tokio::spawn(reader.run(rx, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        shutdown.cancel();
        assert!(handle.await.unwrap().is_ok());

        let written = sink.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        let parts = decode_batch(&written[0]).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].part_type, PacketId::EventNotice as i32);
        let notice: EventNotice = decode(parts[1].bytes, ByteOrder::Little).unwrap();
        assert_eq!(notice.end_of_volume, 1);
        assert_eq!((notice.volume_num, notice.sweep_num), (1, 3));
        drop(tx);
    }

    #[test]
    fn missing_calibration_file_is_fatal() {
        let params = Params {
            override_calibration: true,
            cal_xml_file_path: "/nonexistent/calibration.xml".into(),
            ..Default::default()
        };
        assert!(matches!(
            Reader::new(&params, MemorySink::default()),
            Err(IngestError::Calibration(_))
        ));
    }
}
