use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::{encode, ByteOrder, Message, PacketId, PacketInfo};
use crate::IngestError;

pub const CALIBRATION_LEN: usize = 512;

/// Tags in a calibration file that carry no value for the packet
const DESCRIPTIVE_TAGS: [&str; 2] = ["radarName", "calibTime"];

/// The calibration values, in wire order. Tags in a calibration XML file are
/// the camelCase versions of these, or the names the radar calibration tools
/// write where those differ. Unknown tags are an error.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CalibrationValues {
    pub wavelength_cm: f32,
    #[serde(alias = "beamWidthDegH")]
    pub beamwidth_deg_h: f32,
    #[serde(alias = "beamWidthDegV")]
    pub beamwidth_deg_v: f32,
    #[serde(alias = "antGainDbH")]
    pub gain_ant_db_h: f32,
    #[serde(alias = "antGainDbV")]
    pub gain_ant_db_v: f32,
    pub pulse_width_us: f32,
    pub xmit_power_dbm_h: f32,
    pub xmit_power_dbm_v: f32,
    pub two_way_waveguide_loss_db_h: f32,
    pub two_way_waveguide_loss_db_v: f32,
    pub two_way_radome_loss_db_h: f32,
    pub two_way_radome_loss_db_v: f32,
    pub receiver_mismatch_loss_db: f32,
    #[serde(alias = "radarConstH")]
    pub radar_constant_h: f32,
    #[serde(alias = "radarConstV")]
    pub radar_constant_v: f32,
    pub noise_dbm_hc: f32,
    pub noise_dbm_hx: f32,
    pub noise_dbm_vc: f32,
    pub noise_dbm_vx: f32,
    pub receiver_gain_db_hc: f32,
    pub receiver_gain_db_hx: f32,
    pub receiver_gain_db_vc: f32,
    pub receiver_gain_db_vx: f32,
    pub base_dbz_1km_hc: f32,
    pub base_dbz_1km_hx: f32,
    pub base_dbz_1km_vc: f32,
    pub base_dbz_1km_vx: f32,
    pub sun_power_dbm_hc: f32,
    pub sun_power_dbm_hx: f32,
    pub sun_power_dbm_vc: f32,
    pub sun_power_dbm_vx: f32,
    pub noise_source_power_dbm_h: f32,
    pub noise_source_power_dbm_v: f32,
    pub power_meas_loss_db_h: f32,
    pub power_meas_loss_db_v: f32,
    pub coupler_forward_loss_db_h: f32,
    pub coupler_forward_loss_db_v: f32,
    pub test_power_dbm_h: f32,
    pub test_power_dbm_v: f32,
    pub zdr_correction_db: f32,
    pub ldr_correction_db_h: f32,
    pub ldr_correction_db_v: f32,
    #[serde(alias = "systemPhidpDeg")]
    pub phidp_rot_deg: f32,
    #[serde(alias = "receiverSlopeDbHc")]
    pub receiver_slope_hc: f32,
    #[serde(alias = "receiverSlopeDbHx")]
    pub receiver_slope_hx: f32,
    #[serde(alias = "receiverSlopeDbVc")]
    pub receiver_slope_vc: f32,
    #[serde(alias = "receiverSlopeDbVx")]
    pub receiver_slope_vx: f32,
    pub i0_dbm_hc: f32,
    pub i0_dbm_hx: f32,
    pub i0_dbm_vc: f32,
    pub i0_dbm_vx: f32,
    pub dynamic_range_db_hc: f32,
    pub dynamic_range_db_hx: f32,
    pub dynamic_range_db_vc: f32,
    pub dynamic_range_db_vx: f32,
    pub k_squared_water: f32,
    pub dbz_correction: f32,
}

// serde only handles arrays up to 32 elements, hence the split spare space
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
struct CalibrationRecord {
    packet: PacketInfo,
    values: CalibrationValues,
    unused_a: [i32; 32],
    unused_b: [i32; 17],
    radar_name: [u8; 32],
} /* total size = 512 */

#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub radar_name: String,
    pub values: CalibrationValues,
}

impl Calibration {
    pub fn from_xml_file(path: &Path) -> Result<Calibration, IngestError> {
        let xml = fs::read_to_string(path).map_err(|e| {
            IngestError::Calibration(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_xml(&xml)
            .map_err(|e| IngestError::Calibration(format!("'{}': {}", path.display(), e)))
    }

    pub fn from_xml(xml: &str) -> Result<Calibration, String> {
        let doc = roxmltree::Document::parse(xml).map_err(|e| e.to_string())?;

        let mut radar_name = String::new();
        let mut map = serde_json::Map::new();
        for node in doc.descendants().filter(|n| n.is_element()) {
            if node.children().any(|c| c.is_element()) {
                continue;
            }
            let tag = node.tag_name().name();
            let text = node.text().unwrap_or("").trim();
            if tag == "radarName" {
                radar_name = text.to_string();
                continue;
            }
            if DESCRIPTIVE_TAGS.contains(&tag) {
                continue;
            }
            let value = match text.parse::<f64>() {
                Ok(v) => serde_json::json!(v),
                Err(_) => serde_json::json!(text),
            };
            if map.insert(tag.to_string(), value).is_some() {
                return Err(format!("<{}> appears more than once", tag));
            }
        }
        if map.is_empty() {
            return Err("no calibration values found".to_string());
        }

        let values: CalibrationValues =
            serde_json::from_value(serde_json::Value::Object(map)).map_err(|e| e.to_string())?;

        Ok(Calibration { radar_name, values })
    }

    /// Encode as an IWRF calibration packet, taking sequence number and time
    /// from `template` so the override slots into the stream it replaces.
    pub fn to_message(
        &self,
        template: Option<&PacketInfo>,
        order: ByteOrder,
    ) -> Result<Message, IngestError> {
        let mut packet = PacketInfo::new(PacketId::Calibration, CALIBRATION_LEN);
        if let Some(t) = template {
            packet.seq_num = t.seq_num;
            packet.radar_id = t.radar_id;
            packet.version_num = t.version_num;
            packet.time_secs_utc = t.time_secs_utc;
            packet.time_nano_secs = t.time_nano_secs;
        }
        let mut radar_name = [0u8; 32];
        let name = self.radar_name.as_bytes();
        let n = name.len().min(radar_name.len() - 1);
        radar_name[..n].copy_from_slice(&name[..n]);

        let record = CalibrationRecord {
            packet,
            values: self.values,
            unused_a: [0; 32],
            unused_b: [0; 17],
            radar_name,
        };
        Ok(Message::new(
            PacketId::Calibration as i32,
            order,
            encode(&record, order)?,
        ))
    }
}
