//! Optical medium: horizontal layers with their own Cherenkov photon yield.

use crate::step_generator::StepError;

/// Layered medium description used by the step generator.
///
/// Layer `i` spans `[z_start + i·height, z_start + (i+1)·height)`. Points
/// outside the layered region use the nearest layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MediumProperties {
    layers_z_start: f64,
    layers_height: f64,
    photons_per_meter: Vec<f64>,
    density: f64,
}

impl MediumProperties {
    /// Create a medium.
    ///
    /// # Arguments
    /// * `layers_z_start` - z coordinate of the bottom of the first layer [m]
    /// * `layers_height` - thickness of each layer [m]
    /// * `photons_per_meter` - Cherenkov photon yield per metre of a β≈1 track, per layer
    /// * `density` - medium density [g/cm³]
    pub fn new(
        layers_z_start: f64,
        layers_height: f64,
        photons_per_meter: Vec<f64>,
        density: f64,
    ) -> Result<Self, StepError> {
        if photons_per_meter.is_empty() {
            return Err(StepError::InvalidConfig(
                "medium needs at least one layer".to_string(),
            ));
        }
        if !(layers_height > 0.0) || !layers_height.is_finite() {
            return Err(StepError::InvalidConfig(format!(
                "layer height must be positive and finite, got {}",
                layers_height
            )));
        }
        if !layers_z_start.is_finite() {
            return Err(StepError::InvalidConfig(
                "layer z start must be finite".to_string(),
            ));
        }
        if !(density > 0.0) || !density.is_finite() {
            return Err(StepError::InvalidConfig(format!(
                "density must be positive and finite, got {}",
                density
            )));
        }
        if let Some(i) = photons_per_meter
            .iter()
            .position(|&n| !(n >= 0.0) || !n.is_finite())
        {
            return Err(StepError::InvalidConfig(format!(
                "photon yield of layer {} must be non-negative and finite",
                i
            )));
        }
        Ok(Self {
            layers_z_start,
            layers_height,
            photons_per_meter,
            density,
        })
    }

    /// Single-layer medium
    pub fn uniform(photons_per_meter: f64, density: f64) -> Result<Self, StepError> {
        Self::new(0.0, 1.0, vec![photons_per_meter], density)
    }

    /// Number of layers
    pub fn num_layers(&self) -> usize {
        self.photons_per_meter.len()
    }

    /// Medium density [g/cm³]
    pub fn density(&self) -> f64 {
        self.density
    }

    /// Index of the layer containing height `z`, clamped to the layer range.
    pub fn layer_index(&self, z: f64) -> usize {
        let raw = ((z - self.layers_z_start) / self.layers_height).floor();
        // NaN.max(0.0) is 0.0; float-to-int casts saturate
        (raw.max(0.0) as usize).min(self.num_layers() - 1)
    }

    /// Photon yield per metre at height `z`
    pub fn photons_per_meter_at(&self, z: f64) -> f64 {
        self.photons_per_meter[self.layer_index(z)]
    }
}
