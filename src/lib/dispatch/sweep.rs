use log::{debug, trace};

use super::{CorrectionContext, PulseCorrection, Verdict};
use crate::iwrf::pulse::SCAN_MODE_SECTOR;
use crate::iwrf::PulsePacket;
use crate::util::diff_deg;

/// Delays a sweep number change in sector scans until the antenna turns
/// around, so each sweep covers exactly one pass across the sector.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Hysteresis {
    initialized: bool,
    old_sweep_num: i32,
    old_azimuth: f32,
    change_in_progress: bool,
    direction: f64,
}

impl Hysteresis {
    /// Returns the sweep number the pulse should carry.
    fn update(&mut self, sweep_num: i32, azimuth: f32) -> i32 {
        if !self.initialized {
            self.initialized = true;
            self.change_in_progress = false;
            self.old_sweep_num = sweep_num;
            self.old_azimuth = azimuth;
            return sweep_num;
        }

        if sweep_num == self.old_sweep_num {
            self.change_in_progress = false;
            self.old_azimuth = azimuth;
            return sweep_num;
        }

        // Wait for the antenna to actually move
        if azimuth == self.old_azimuth {
            return self.old_sweep_num;
        }

        let delta = diff_deg(azimuth as f64, self.old_azimuth as f64);
        self.old_azimuth = azimuth;

        if !self.change_in_progress {
            self.direction = if delta >= 0.0 { 1.0 } else { -1.0 };
            self.change_in_progress = true;
            debug!(
                "Sweep number changed {} -> {} at az {:.2}, delaying until turnaround",
                self.old_sweep_num, sweep_num, azimuth
            );
            return self.old_sweep_num;
        }

        if delta * self.direction < 0.0 {
            debug!(
                "Antenna turned at az {:.2}, sweep number now {}",
                azimuth, sweep_num
            );
            self.change_in_progress = false;
            self.old_sweep_num = sweep_num;
            return sweep_num;
        }

        self.old_sweep_num
    }
}

/// Volume and sweep bookkeeping for every pulse, with optional renumbering
/// from zero at the start of each volume and optional sector hysteresis.
#[derive(Debug, Default)]
pub struct SweepTracking {
    pub volume_num: i32,
    pub sweep_num: i32,
    prev_volume_num: Option<i32>,
    vol_start_sweep_num: i32,
    zero_at_start_of_vol: bool,
    hysteresis: Option<Hysteresis>,
}

impl SweepTracking {
    pub fn new(zero_at_start_of_vol: bool, delay_change_in_sector: bool) -> Self {
        SweepTracking {
            zero_at_start_of_vol,
            hysteresis: delay_change_in_sector.then(Hysteresis::default),
            ..Default::default()
        }
    }
}

impl PulseCorrection for SweepTracking {
    fn name(&self) -> &'static str {
        "sweep tracking"
    }

    fn apply(&mut self, pulse: &mut PulsePacket, _context: &CorrectionContext) -> Verdict {
        self.volume_num = pulse.header.volume_num;
        self.sweep_num = pulse.header.sweep_num;

        if self.prev_volume_num != Some(self.volume_num) {
            trace!(
                "Volume {} starts at sweep {}",
                self.volume_num, self.sweep_num
            );
            self.vol_start_sweep_num = self.sweep_num;
            self.prev_volume_num = Some(self.volume_num);
        }

        if self.zero_at_start_of_vol {
            pulse.header_mut().sweep_num = self.sweep_num - self.vol_start_sweep_num;
        }

        if let Some(hysteresis) = &mut self.hysteresis {
            if pulse.header.scan_mode == SCAN_MODE_SECTOR {
                let sweep_num = hysteresis.update(pulse.header.sweep_num, pulse.header.azimuth);
                if sweep_num != pulse.header.sweep_num {
                    pulse.header_mut().sweep_num = sweep_num;
                }
            }
        }

        Verdict::Keep
    }
}
