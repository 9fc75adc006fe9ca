/// Pixel-space box geometry shared by the label and OCR grounding paths.
///
/// Everything here works in the screenshot's own pixel coordinates; callers
/// convert to resolution-independent percentages at the last moment via
/// [`BoundingBox::center_percent`].
use serde::{Deserialize, Serialize};

/// Four corner points of an OCR-detected text region, in reading order.
pub type Quad = [[f32; 2]; 4];

/// Axis-aligned bounding box `(x1, y1, x2, y2)` in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Screen position expressed as fractions of width/height, in [0,1]×[0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentPoint {
    pub x: f32,
    pub y: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Tight axis-aligned box around an OCR quadrilateral: min/max over the
    /// four corner xs and ys.
    pub fn from_quad(quad: &Quad) -> Self {
        let xs = quad.iter().map(|p| p[0]);
        let ys = quad.iter().map(|p| p[1]);
        Self {
            x1: xs.clone().fold(f32::INFINITY, f32::min),
            y1: ys.clone().fold(f32::INFINITY, f32::min),
            x2: xs.fold(f32::NEG_INFINITY, f32::max),
            y2: ys.fold(f32::NEG_INFINITY, f32::max),
        }
    }

    /// Centre of the box as a fraction of the image dimensions.
    pub fn center_percent(&self, image_size: (u32, u32)) -> PercentPoint {
        let cx = (self.x1 + self.x2) / 2.0;
        let cy = (self.y1 + self.y2) / 2.0;
        PercentPoint {
            x: cx / image_size.0 as f32,
            y: cy / image_size.1 as f32,
        }
    }
}

/// Rectangle-intersection test with inclusive edges: two boxes are disjoint
/// only when one starts strictly past the other's end along x or y, so boxes
/// that merely touch still count as overlapping.
pub fn is_overlapping(a: &BoundingBox, b: &BoundingBox) -> bool {
    if a.x1 > b.x2 || b.x1 > a.x2 {
        return false;
    }
    if a.y1 > b.y2 || b.y1 > a.y2 {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_along_x_is_not_overlapping() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.5, 0.0, 20.0, 10.0);
        assert!(!is_overlapping(&a, &b));
        assert!(!is_overlapping(&b, &a));
    }

    #[test]
    fn disjoint_along_y_is_not_overlapping() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(0.0, 11.0, 10.0, 20.0);
        assert!(!is_overlapping(&a, &b));
        assert!(!is_overlapping(&b, &a));
    }

    #[test]
    fn touching_edges_count_as_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        assert!(is_overlapping(&a, &b));
    }

    #[test]
    fn identical_boxes_overlap() {
        let a = BoundingBox::new(3.0, 4.0, 8.0, 9.0);
        assert!(is_overlapping(&a, &a));
    }

    #[test]
    fn center_percent_is_midpoint_over_dimensions() {
        let b = BoundingBox::new(100.0, 50.0, 300.0, 150.0);
        let p = b.center_percent((1000, 500));
        assert!((p.x - 0.2).abs() < 1e-6);
        assert!((p.y - 0.2).abs() < 1e-6);
    }

    #[test]
    fn center_percent_stays_in_unit_range_for_in_bounds_boxes() {
        let b = BoundingBox::new(0.0, 0.0, 1000.0, 500.0);
        let p = b.center_percent((1000, 500));
        assert!((0.0..=1.0).contains(&p.x));
        assert!((0.0..=1.0).contains(&p.y));
    }

    #[test]
    fn quad_bbox_spans_corner_extremes() {
        let quad: Quad = [[10.0, 20.0], [110.0, 18.0], [112.0, 44.0], [9.0, 46.0]];
        let b = BoundingBox::from_quad(&quad);
        assert_eq!(b.x1, 9.0);
        assert_eq!(b.y1, 18.0);
        assert_eq!(b.x2, 112.0);
        assert_eq!(b.y2, 46.0);
    }
}
