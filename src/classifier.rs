// src/classifier.rs

use crate::state::BBox;

/// Geometric fall heuristic: a person lying down produces a box that is
/// wider than it is tall. Intentionally simple and replaceable; the rest of
/// the pipeline only relies on getting a boolean per detection with no side
/// effects.
pub fn is_fall_candidate(bbox: &BBox, aspect_ratio_min: f32) -> bool {
    if bbox.height <= 0.0 {
        return false;
    }
    let aspect = bbox.width / bbox.height;
    aspect > aspect_ratio_min && bbox.height < bbox.width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DEFAULT_ASPECT_RATIO_MIN;

    fn bbox(width: f32, height: f32) -> BBox {
        BBox {
            x: 10.0,
            y: 20.0,
            width,
            height,
        }
    }

    #[test]
    fn wide_box_is_candidate() {
        assert!(is_fall_candidate(&bbox(130.0, 100.0), DEFAULT_ASPECT_RATIO_MIN));
    }

    #[test]
    fn upright_box_is_not_candidate() {
        assert!(!is_fall_candidate(&bbox(60.0, 180.0), DEFAULT_ASPECT_RATIO_MIN));
    }

    #[test]
    fn ratio_at_threshold_is_not_candidate() {
        // Strictly greater than the threshold is required.
        assert!(!is_fall_candidate(&bbox(120.0, 100.0), DEFAULT_ASPECT_RATIO_MIN));
    }

    #[test]
    fn zero_height_is_not_candidate() {
        assert!(!is_fall_candidate(&bbox(50.0, 0.0), DEFAULT_ASPECT_RATIO_MIN));
    }

    #[test]
    fn threshold_is_configurable() {
        let b = bbox(150.0, 100.0);
        assert!(is_fall_candidate(&b, 1.2));
        assert!(!is_fall_candidate(&b, 2.0));
    }
}
