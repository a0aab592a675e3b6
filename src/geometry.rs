//! Detector geometry: optical module positions and closest-module distances.

use std::collections::BTreeMap;

use glam::DVec3;

/// Optical module key: string number and module number on that string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OmKey {
    /// String number
    pub string: i32,
    /// Module number on the string
    pub om: u32,
}

impl OmKey {
    /// Create a key
    pub fn new(string: i32, om: u32) -> Self {
        Self { string, om }
    }
}

/// Positions of all optical modules in the detector.
#[derive(Debug, Clone, Default)]
pub struct DetectorGeometry {
    modules: BTreeMap<OmKey, DVec3>,
}

impl DetectorGeometry {
    /// Empty geometry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or move) a module
    pub fn insert(&mut self, key: OmKey, pos: DVec3) {
        self.modules.insert(key, pos);
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True if there are no modules
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Position of a module
    pub fn position(&self, key: OmKey) -> Option<DVec3> {
        self.modules.get(&key).copied()
    }

    /// All modules in key order
    pub fn iter(&self) -> impl Iterator<Item = (OmKey, DVec3)> + '_ {
        self.modules.iter().map(|(k, p)| (*k, *p))
    }

    /// Distance from `point` to the closest module, or 0 for an empty geometry.
    pub fn distance_to_closest_module(&self, point: DVec3) -> f64 {
        self.modules
            .values()
            .map(|p| p.distance(point))
            .fold(None, |best: Option<f64>, d| Some(best.map_or(d, |b| b.min(d))))
            .unwrap_or(0.0)
    }

    /// Distance from a track to the closest module, or 0 for an empty geometry.
    ///
    /// The track starts at `pos` and runs `length` metres along `dir`. With
    /// `no_start` it extends backwards indefinitely; with `no_stop` it extends
    /// forwards indefinitely and `length` is ignored.
    pub fn distance_to_closest_module_from_track(
        &self,
        pos: DVec3,
        dir: DVec3,
        length: f64,
        no_start: bool,
        no_stop: bool,
    ) -> f64 {
        self.modules
            .values()
            .map(|om| {
                let mut along = (*om - pos).dot(dir);
                if !no_start && along < 0.0 {
                    along = 0.0;
                }
                if !no_stop && along > length {
                    along = length;
                }
                om.distance(pos + dir * along)
            })
            .fold(None, |best: Option<f64>, d| Some(best.map_or(d, |b| b.min(d))))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_modules() -> DetectorGeometry {
        let mut g = DetectorGeometry::new();
        g.insert(OmKey::new(1, 1), DVec3::new(0.0, 0.0, 0.0));
        g.insert(OmKey::new(1, 2), DVec3::new(0.0, 0.0, -17.0));
        g
    }

    #[test]
    fn test_point_distance() {
        let g = two_modules();
        let d = g.distance_to_closest_module(DVec3::new(3.0, 4.0, 0.0));
        assert!((d - 5.0).abs() < 1e-12);
        let d = g.distance_to_closest_module(DVec3::new(0.0, 0.0, -20.0));
        assert!((d - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_geometry_is_zero() {
        let g = DetectorGeometry::new();
        assert_eq!(g.distance_to_closest_module(DVec3::splat(1e4)), 0.0);
        assert_eq!(
            g.distance_to_closest_module_from_track(DVec3::ZERO, DVec3::X, 1.0, false, false),
            0.0
        );
    }

    #[test]
    fn test_track_distance_clamps_to_segment() {
        let mut g = DetectorGeometry::new();
        g.insert(OmKey::new(1, 1), DVec3::ZERO);

        // Track along +x from x=10 for 5 m; closest point is its start
        let pos = DVec3::new(10.0, 1.0, 0.0);
        let d = g.distance_to_closest_module_from_track(pos, DVec3::X, 5.0, false, false);
        assert!((d - pos.length()).abs() < 1e-12);

        // Without a start it passes the module at distance 1
        let d = g.distance_to_closest_module_from_track(pos, DVec3::X, 5.0, true, false);
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_track_distance_no_stop() {
        let mut g = DetectorGeometry::new();
        g.insert(OmKey::new(1, 1), DVec3::new(100.0, 2.0, 0.0));

        let d = g.distance_to_closest_module_from_track(DVec3::ZERO, DVec3::X, 10.0, false, false);
        assert!((d - DVec3::new(90.0, 2.0, 0.0).length()).abs() < 1e-12);

        let d = g.distance_to_closest_module_from_track(DVec3::ZERO, DVec3::X, 10.0, false, true);
        assert!((d - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_keys_are_ordered() {
        assert!(OmKey::new(1, 60) < OmKey::new(2, 1));
        assert!(OmKey::new(-1, 5) < OmKey::new(1, 1));
    }
}
