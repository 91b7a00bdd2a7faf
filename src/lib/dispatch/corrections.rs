use log::{trace, warn};

use super::{CorrectionContext, PulseCorrection, Verdict};
use crate::iwrf::pulse::IQ_ENCODING_FL32;
use crate::iwrf::PulsePacket;
use crate::util::wrap_360_f32;

/// Shift the pulse time by a fixed offset, for radars with a known clock error.
pub struct TimeAdjustment {
    pub offset_secs: f64,
}

impl PulseCorrection for TimeAdjustment {
    fn name(&self) -> &'static str {
        "time adjustment"
    }

    fn apply(&mut self, pulse: &mut PulsePacket, _context: &CorrectionContext) -> Verdict {
        let t = pulse.time() + self.offset_secs;
        pulse.header_mut().packet.set_time(t);
        Verdict::Keep
    }
}

/// `sample * scale + bias` over the float IQ data.
pub struct Rescale {
    pub scale: f32,
    pub bias: f32,
    warned: bool,
}

impl Rescale {
    pub fn new(scale: f64, bias: f64) -> Self {
        Rescale {
            scale: scale as f32,
            bias: bias as f32,
            warned: false,
        }
    }
}

impl PulseCorrection for Rescale {
    fn name(&self) -> &'static str {
        "rescale"
    }

    fn apply(&mut self, pulse: &mut PulsePacket, _context: &CorrectionContext) -> Verdict {
        if pulse.header.iq_encoding != IQ_ENCODING_FL32 {
            if !self.warned {
                warn!(
                    "Scaling only applies to float IQ data, pulses have encoding {}; not scaling",
                    pulse.header.iq_encoding
                );
                self.warned = true;
            }
            return Verdict::Keep;
        }
        let (scale, bias) = (self.scale, self.bias);
        pulse.map_fl32_samples(|s| s * scale + bias);
        Verdict::Keep
    }
}

/// Add the platform heading to the antenna azimuth.
pub struct HeadingCorrection;

impl PulseCorrection for HeadingCorrection {
    fn name(&self) -> &'static str {
        "heading correction"
    }

    fn apply(&mut self, pulse: &mut PulsePacket, context: &CorrectionContext) -> Verdict {
        let Some(position) = context.position else {
            trace!("No position yet, azimuth left as is");
            return Verdict::Keep;
        };
        let header = pulse.header_mut();
        header.azimuth = wrap_360_f32(header.azimuth as f64 + position.heading_deg);
        Verdict::Keep
    }
}

/// Replace the azimuth with one derived from the pulse time, as if the antenna
/// turned at a constant rate. Used for test signals with no antenna.
pub struct AzimuthFromTime {
    pub secs_per_rev: f64,
}

impl PulseCorrection for AzimuthFromTime {
    fn name(&self) -> &'static str {
        "azimuth from time"
    }

    fn apply(&mut self, pulse: &mut PulsePacket, _context: &CorrectionContext) -> Verdict {
        let t = pulse.time();
        let fraction = t.rem_euclid(self.secs_per_rev) / self.secs_per_rev;
        pulse.header_mut().azimuth = wrap_360_f32(fraction * 360.0);
        Verdict::Keep
    }
}

/// Drop pulses whose time does not advance past the last pulse let through.
#[derive(Default)]
pub struct MonotonicTime {
    latest: Option<f64>,
    dropped: u64,
}

impl PulseCorrection for MonotonicTime {
    fn name(&self) -> &'static str {
        "monotonic time"
    }

    fn apply(&mut self, pulse: &mut PulsePacket, _context: &CorrectionContext) -> Verdict {
        let t = pulse.time();
        if let Some(latest) = self.latest {
            if t <= latest {
                self.dropped += 1;
                warn!(
                    "Pulse time {} is not after {:.6}, dropping pulse ({} dropped so far)",
                    pulse.header.packet.time_string(),
                    latest,
                    self.dropped
                );
                return Verdict::Drop;
            }
        }
        self.latest = Some(t);
        Verdict::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iwrf::pulse::tests::{pulse, pulse_bytes};
    use crate::iwrf::{ByteOrder, Message, PacketId};
    use crate::position::PositionState;

    fn timed(t: f64) -> PulsePacket {
        let mut p = pulse(0.0, 1);
        p.header.packet.set_time(t);
        p
    }

    #[test]
    fn heading_wraps_past_north() {
        let position = PositionState {
            heading_deg: 30.0,
            ..Default::default()
        };
        let context = CorrectionContext {
            position: Some(&position),
        };
        let mut p = pulse(350.0, 1);
        assert_eq!(HeadingCorrection.apply(&mut p, &context), Verdict::Keep);
        assert!((p.header.azimuth - 20.0).abs() < 1e-4);
    }

    #[test]
    fn heading_never_reaches_360() {
        let position = PositionState {
            heading_deg: 0.00002,
            ..Default::default()
        };
        let context = CorrectionContext {
            position: Some(&position),
        };
        let mut p = pulse(359.99997, 1);
        HeadingCorrection.apply(&mut p, &context);
        assert!(p.header.azimuth < 360.0, "az = {}", p.header.azimuth);
        assert!(p.header.azimuth >= 0.0);
    }

    #[test]
    fn azimuth_from_time_never_reaches_360() {
        let mut c = AzimuthFromTime { secs_per_rev: 10.0 };
        // one nanosecond short of a full revolution
        let mut p = timed(1_000_009.999_999_999);
        c.apply(&mut p, &CorrectionContext::default());
        assert!(p.header.azimuth < 360.0, "az = {}", p.header.azimuth);
    }

    #[test]
    fn heading_without_position_is_a_no_op() {
        let mut p = pulse(350.0, 1);
        HeadingCorrection.apply(&mut p, &CorrectionContext::default());
        assert_eq!(p.header.azimuth, 350.0);
        assert!(!p.is_modified());
    }

    #[test]
    fn time_goes_backwards() {
        let mut filter = MonotonicTime::default();
        let context = CorrectionContext::default();
        let verdicts: Vec<Verdict> = [10.0, 9.0, 11.0, 11.0]
            .into_iter()
            .map(|t| filter.apply(&mut timed(t), &context))
            .collect();
        assert_eq!(
            verdicts,
            vec![Verdict::Keep, Verdict::Drop, Verdict::Keep, Verdict::Drop]
        );
    }

    #[test]
    fn azimuth_from_time() {
        let mut c = AzimuthFromTime { secs_per_rev: 10.0 };
        let mut p = timed(1_000_002.5);
        c.apply(&mut p, &CorrectionContext::default());
        assert!((p.header.azimuth - 90.0).abs() < 1e-3);
    }

    #[test]
    fn time_adjustment() {
        let mut c = TimeAdjustment { offset_secs: -1.25 };
        let mut p = timed(100.5);
        c.apply(&mut p, &CorrectionContext::default());
        assert_eq!(p.header.packet.time_secs_utc, 99);
        assert_eq!(p.header.packet.time_nano_secs, 250_000_000);
    }

    #[test]
    fn rescale_float_samples() {
        let bytes = pulse_bytes(ByteOrder::Big, 0.0, 1, &[1.0, -2.0]);
        let message = Message::new(PacketId::PulseHeader as i32, ByteOrder::Big, bytes);
        let mut p = PulsePacket::from_message(message).unwrap();
        Rescale::new(2.0, 0.5).apply(&mut p, &CorrectionContext::default());
        let data: Vec<f32> = p
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_be_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(data, vec![2.5, -3.5]);
    }

    #[test]
    fn rescale_skips_integer_samples() {
        let mut p = pulse(0.0, 1);
        p.header.iq_encoding = 0;
        let mut c = Rescale::new(2.0, 0.0);
        c.apply(&mut p, &CorrectionContext::default());
        c.apply(&mut p, &CorrectionContext::default());
        assert!(c.warned);
        assert!(!p.is_modified());
    }
}
