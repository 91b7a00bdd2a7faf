use log::{info, trace, warn};

use crate::config::Params;
use crate::iwrf::{packet_id_name, Calibration, Message, Packet, PacketInfo, PulsePacket};
use crate::position::PositionState;

pub mod corrections;
pub mod sweep;

use corrections::{AzimuthFromTime, HeadingCorrection, MonotonicTime, Rescale, TimeAdjustment};
use sweep::SweepTracking;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop,
}

/// State from outside the pulse stream that corrections may consult.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrectionContext<'a> {
    pub position: Option<&'a PositionState>,
}

/// One step of the pulse correction pipeline.
pub trait PulseCorrection: Send {
    fn name(&self) -> &'static str;
    fn apply(&mut self, pulse: &mut PulsePacket, context: &CorrectionContext) -> Verdict;
}

/// Build the correction pipeline. The order matters: the time adjustment must
/// come before anything that looks at time, and sweep numbers are tracked on
/// the final azimuth.
pub fn build_pipeline(params: &Params) -> Vec<Box<dyn PulseCorrection>> {
    let mut pipeline: Vec<Box<dyn PulseCorrection>> = Vec::new();

    if params.pulse_time_adjustment_secs != 0.0 {
        pipeline.push(Box::new(TimeAdjustment {
            offset_secs: params.pulse_time_adjustment_secs,
        }));
    }
    if params.apply_scale {
        pipeline.push(Box::new(Rescale::new(params.scale, params.bias)));
    }
    if params.update_position {
        pipeline.push(Box::new(HeadingCorrection));
    }
    if params.compute_azimuth_from_time {
        pipeline.push(Box::new(AzimuthFromTime {
            secs_per_rev: params.simulated_secs_per_rev,
        }));
    }
    pipeline.push(Box::new(SweepTracking::new(
        params.zero_sweep_number_at_start_of_vol,
        params.delay_sweep_num_change_in_sector_scan,
    )));
    if params.ignore_pulse_if_time_goes_backwards {
        pipeline.push(Box::new(MonotonicTime::default()));
    }

    pipeline
}

/// Routes each reassembled message by packet type, correcting pulses and
/// optionally replacing calibrations. Everything else passes through as is.
pub struct Dispatcher {
    corrections: Vec<Box<dyn PulseCorrection>>,
    calibration: Option<Calibration>,
    pulse_log_interval: u64,
    n_pulses: u64,
    summaries: u64,
    volume_num: i32,
    sweep_num: i32,
}

impl Dispatcher {
    pub fn new(params: &Params, calibration: Option<Calibration>) -> Self {
        let corrections = build_pipeline(params);
        log::debug!(
            "Pulse corrections: {:?}",
            corrections.iter().map(|c| c.name()).collect::<Vec<_>>()
        );
        Dispatcher {
            corrections,
            calibration,
            pulse_log_interval: params.pulse_log_interval,
            n_pulses: 0,
            summaries: 0,
            volume_num: 0,
            sweep_num: 0,
        }
    }

    pub fn pulses(&self) -> u64 {
        self.n_pulses
    }

    /// Number of pulse summaries logged
    pub fn summaries(&self) -> u64 {
        self.summaries
    }

    /// Volume and sweep number of the latest pulse, as received.
    pub fn latest_volume_and_sweep(&self) -> (i32, i32) {
        (self.volume_num, self.sweep_num)
    }

    /// Returns the message to forward, or None when it was dropped.
    pub fn dispatch(&mut self, message: Message, context: &CorrectionContext) -> Option<Message> {
        match Packet::from_message(message) {
            Packet::PulseHeader(pulse) => self.dispatch_pulse(pulse, context),
            Packet::Calibration(message) => Some(self.dispatch_calibration(message)),
            Packet::Other(message) => {
                trace!("Passing on {} of {} bytes", packet_id_name(message.id), message.len());
                Some(message)
            }
        }
    }

    fn dispatch_pulse(
        &mut self,
        mut pulse: PulsePacket,
        context: &CorrectionContext,
    ) -> Option<Message> {
        self.n_pulses += 1;
        self.volume_num = pulse.header.volume_num;
        self.sweep_num = pulse.header.sweep_num;

        // Counted on arrival, so a dropped pulse does not skip a summary
        if self.pulse_log_interval > 0 && self.n_pulses % self.pulse_log_interval == 0 {
            self.summaries += 1;
            let h = &pulse.header;
            info!(
                "Pulses: {} time {} el {:.2} az {:.2} vol {} sweep {}",
                self.n_pulses,
                h.packet.time_string(),
                h.elevation,
                h.azimuth,
                h.volume_num,
                h.sweep_num
            );
        }

        for correction in self.corrections.iter_mut() {
            if correction.apply(&mut pulse, context) == Verdict::Drop {
                trace!("Pulse dropped by {}", correction.name());
                return None;
            }
        }

        match pulse.into_message() {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Cannot encode corrected pulse, dropping it: {}", e);
                None
            }
        }
    }

    fn dispatch_calibration(&self, message: Message) -> Message {
        let Some(calibration) = &self.calibration else {
            return message;
        };
        let template = PacketInfo::peek(&message.bytes).map(|(info, _)| info);
        match calibration.to_message(template.as_ref(), message.order) {
            Ok(replacement) => {
                trace!("Replaced calibration with '{}'", calibration.radar_name);
                replacement
            }
            Err(e) => {
                warn!("Cannot encode calibration override, passing on original: {}", e);
                message
            }
        }
    }
}
