use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::{Cli, IngestError};

pub fn get_project_dirs() -> Option<ProjectDirs> {
    directories::ProjectDirs::from("edu", "ucar", "tsudp2fmq")
}

pub fn default_params_path() -> Option<PathBuf> {
    get_project_dirs().map(|dirs| dirs.config_dir().join("params.json"))
}

/// Run-time parameters. Every field has a default, so a parameter file only
/// needs the values that differ.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    pub udp_port: u16,
    /// Datagrams buffered between the socket and the reader
    pub input_queue_size: usize,

    pub output_fmq_path: PathBuf,
    pub output_fmq_nslots: usize,
    pub output_fmq_size: usize,
    pub n_pulses_per_message: usize,

    pub pulse_time_adjustment_secs: f64,

    pub apply_scale: bool,
    pub scale: f64,
    pub bias: f64,

    pub update_position: bool,
    pub position_file_path: PathBuf,
    /// Seconds between checks of the position file
    pub position_check_interval: f64,

    pub compute_azimuth_from_time: bool,
    pub simulated_secs_per_rev: f64,

    pub delay_sweep_num_change_in_sector_scan: bool,
    pub zero_sweep_number_at_start_of_vol: bool,
    pub ignore_pulse_if_time_goes_backwards: bool,

    pub write_end_of_vol_when_data_stops: bool,
    pub nsecs_no_data_for_end_of_vol: u32,

    pub override_calibration: bool,
    pub cal_xml_file_path: PathBuf,

    /// Log a pulse summary every this many pulses, 0 disables
    pub pulse_log_interval: u64,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            udp_port: 11000,
            input_queue_size: 10000,
            output_fmq_path: PathBuf::from("/tmp/fmq/ts"),
            output_fmq_nslots: 2000,
            output_fmq_size: 200_000_000,
            n_pulses_per_message: 200,
            pulse_time_adjustment_secs: 0.0,
            apply_scale: false,
            scale: 1.0,
            bias: 0.0,
            update_position: false,
            position_file_path: PathBuf::from("/tmp/position.txt"),
            position_check_interval: 1.0,
            compute_azimuth_from_time: false,
            simulated_secs_per_rev: 10.0,
            delay_sweep_num_change_in_sector_scan: false,
            zero_sweep_number_at_start_of_vol: false,
            ignore_pulse_if_time_goes_backwards: false,
            write_end_of_vol_when_data_stops: false,
            nsecs_no_data_for_end_of_vol: 5,
            override_calibration: false,
            cal_xml_file_path: PathBuf::from("./calibration.xml"),
            pulse_log_interval: 10000,
        }
    }
}

impl Params {
    /// Load parameters for this run: the parameter file (explicit or default
    /// location) with command line overrides applied on top.
    pub fn load(args: &Cli) -> Result<Params, IngestError> {
        let mut params = match &args.params {
            Some(path) => Self::from_file(path)?,
            None => match default_params_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                Some(path) => {
                    warn!(
                        "no parameter file '{}' yet; using defaults",
                        path.display()
                    );
                    Params::default()
                }
                None => Params::default(),
            },
        };

        if let Some(port) = args.udp_port {
            params.udp_port = port;
        }
        if let Some(path) = &args.output_fmq_path {
            params.output_fmq_path = path.clone();
        }

        params.validate()?;
        debug!("parameters loaded: {:?}", params);
        Ok(params)
    }

    pub fn from_file(path: &Path) -> Result<Params, IngestError> {
        let file = File::open(path).map_err(|e| {
            IngestError::Config(format!("cannot open '{}': {}", path.display(), e))
        })?;
        let reader = BufReader::new(file);
        let params = serde_json::from_reader(reader)
            .map_err(|e| IngestError::ParseJson(format!("{}: {}", path.display(), e)))?;
        info!("Loaded parameters from '{}'", path.display());
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        let fail = |msg: &str| Err(IngestError::Config(msg.to_string()));

        if self.n_pulses_per_message == 0 {
            return fail("n_pulses_per_message must be at least 1");
        }
        if self.input_queue_size == 0 {
            return fail("input_queue_size must be at least 1");
        }
        if self.output_fmq_nslots == 0 {
            return fail("output_fmq_nslots must be at least 1");
        }
        if self.output_fmq_size == 0 {
            return fail("output_fmq_size must be positive");
        }
        if self.compute_azimuth_from_time && !(self.simulated_secs_per_rev > 0.0) {
            return fail("simulated_secs_per_rev must be positive");
        }
        if self.update_position && self.position_check_interval < 0.0 {
            return fail("position_check_interval cannot be negative");
        }
        if self.write_end_of_vol_when_data_stops && self.nsecs_no_data_for_end_of_vol == 0 {
            return fail("nsecs_no_data_for_end_of_vol must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn write_params(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_params(r#"{ "udp_port": 12345, "apply_scale": true, "scale": 2.0 }"#);
        let params = Params::from_file(file.path()).unwrap();
        assert_eq!(params.udp_port, 12345);
        assert!(params.apply_scale);
        assert_eq!(params.scale, 2.0);
        assert_eq!(params.n_pulses_per_message, 200);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_params(r#"{ "udp_prot": 12345 }"#);
        assert!(matches!(
            Params::from_file(file.path()),
            Err(IngestError::ParseJson(_))
        ));
    }

    #[test]
    fn command_line_overrides_file() {
        let file = write_params(r#"{ "udp_port": 12345, "output_fmq_path": "/data/a" }"#);
        let path = file.path().to_str().unwrap().to_string();
        let args = Cli::parse_from(["tsudp2fmq", "--params", &path, "--udp-port", "2222"]);
        let params = Params::load(&args).unwrap();
        assert_eq!(params.udp_port, 2222);
        assert_eq!(params.output_fmq_path, PathBuf::from("/data/a"));
    }

    #[test]
    fn validation() {
        assert!(Params::default().validate().is_ok());

        let params = Params {
            n_pulses_per_message: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = Params {
            compute_azimuth_from_time: true,
            simulated_secs_per_rev: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let args = Cli::parse_from(["tsudp2fmq", "--params", "/nonexistent/params.json"]);
        assert!(matches!(Params::load(&args), Err(IngestError::Config(_))));
    }
}
