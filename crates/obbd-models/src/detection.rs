//! Canonical detection records.
//!
//! Every model output convention ends up here: a class, a confidence and an
//! ordered 4-point polygon in pixel coordinates.

use serde::{Deserialize, Serialize};

/// Ordered 4-point polygon `[x1, y1, x2, y2, x3, y3, x4, y4]` in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon4(pub [f64; 8]);

impl Polygon4 {
    /// Build a polygon from four `(x, y)` corners, keeping their order.
    pub fn from_corners(corners: [(f64, f64); 4]) -> Self {
        let mut coords = [0.0; 8];
        for (i, (x, y)) in corners.iter().enumerate() {
            coords[2 * i] = *x;
            coords[2 * i + 1] = *y;
        }
        Self(coords)
    }

    /// Expand an axis-aligned box into top-left, top-right, bottom-right, bottom-left.
    pub fn from_xyxy(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self([x1, y1, x2, y1, x2, y2, x1, y2])
    }

    /// The four corners as `(x, y)` pairs.
    pub fn points(&self) -> [(f64, f64); 4] {
        let c = &self.0;
        [(c[0], c[1]), (c[2], c[3]), (c[4], c[5]), (c[6], c[7])]
    }

    /// Flat coordinate slice.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Axis-aligned bounds of the polygon.
    pub fn bounding_box(&self) -> BoundingBox {
        let points = self.points();
        let mut bbox = BoundingBox {
            x1: points[0].0,
            y1: points[0].1,
            x2: points[0].0,
            y2: points[0].1,
        };
        for (x, y) in &points[1..] {
            bbox.x1 = bbox.x1.min(*x);
            bbox.y1 = bbox.y1.min(*y);
            bbox.x2 = bbox.x2.max(*x);
            bbox.y2 = bbox.y2.max(*y);
        }
        bbox
    }

    /// True when the polygon is exactly the TL, TR, BR, BL corners of its own bounds.
    pub fn is_axis_aligned_rect(&self) -> bool {
        let b = self.bounding_box();
        *self == Self::from_xyxy(b.x1, b.y1, b.x2, b.y2)
    }
}

/// Axis-aligned bounds `(x1, y1)` top-left, `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// A single detected instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class name, the decimal class id, or `"obj"` when the model gave none
    #[serde(rename = "class")]
    pub class_label: String,
    /// Numeric class id
    pub class_id: Option<i64>,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Pixel-space polygon
    #[serde(rename = "polygon")]
    pub geometry: Polygon4,
}

impl Detection {
    /// Label used when the model reports no class.
    pub const UNKNOWN_CLASS: &'static str = "obj";

    pub fn new(class_label: impl Into<String>, class_id: Option<i64>, confidence: f64, geometry: Polygon4) -> Self {
        Self {
            class_label: class_label.into(),
            class_id,
            confidence,
            geometry,
        }
    }
}

/// Normalized output of one inference call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub image_width: u32,
    pub image_height: u32,
    /// In model order, not sorted by confidence
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xyxy_winding_order() {
        let poly = Polygon4::from_xyxy(10.0, 20.0, 30.0, 40.0);
        assert_eq!(poly.0, [10.0, 20.0, 30.0, 20.0, 30.0, 40.0, 10.0, 40.0]);
        assert!(poly.is_axis_aligned_rect());
    }

    #[test]
    fn test_bounding_box_of_rotated_polygon() {
        let poly = Polygon4([50.0, 40.0, 60.0, 50.0, 50.0, 60.0, 40.0, 50.0]);
        let bbox = poly.bounding_box();
        assert_eq!(bbox, BoundingBox { x1: 40.0, y1: 40.0, x2: 60.0, y2: 60.0 });
        assert!(!poly.is_axis_aligned_rect());
    }

    #[test]
    fn test_rectangle_in_other_winding_is_not_degenerate() {
        // Same bounds, but starting at bottom-left.
        let poly = Polygon4([10.0, 40.0, 10.0, 20.0, 30.0, 20.0, 30.0, 40.0]);
        assert!(!poly.is_axis_aligned_rect());
    }

    #[test]
    fn test_detection_json_shape() {
        let det = Detection::new("0", Some(0), 0.9, Polygon4::from_xyxy(10.0, 20.0, 30.0, 40.0));
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "class": "0",
                "class_id": 0,
                "confidence": 0.9,
                "polygon": [10.0, 20.0, 30.0, 20.0, 30.0, 40.0, 10.0, 40.0]
            })
        );

        let unknown = Detection::new(Detection::UNKNOWN_CLASS, None, 0.0, Polygon4([0.0; 8]));
        let json = serde_json::to_value(&unknown).unwrap();
        assert!(json["class_id"].is_null());
        assert_eq!(json["class"], "obj");
    }
}
