//! Tissue volume results.

use serde::{Deserialize, Serialize};

/// Segmented tissue volumes in cubic millimetres.
///
/// `tiv_volume` is always the sum of the three tissue classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumetricResult {
    pub gm_volume: f64,
    pub wm_volume: f64,
    pub csf_volume: f64,
    pub tiv_volume: f64,
}

impl VolumetricResult {
    pub fn from_tissues(gm_volume: f64, wm_volume: f64, csf_volume: f64) -> Self {
        Self {
            gm_volume,
            wm_volume,
            csf_volume,
            tiv_volume: gm_volume + wm_volume + csf_volume,
        }
    }
}
