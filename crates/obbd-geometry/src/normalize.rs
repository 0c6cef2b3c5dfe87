//! Geometry normalizer.
//!
//! Turns a [`RawPrediction`] into a [`DetectionResult`]. Normalization never
//! fails. Instances whose geometry cannot be read are skipped. Unreadable or
//! out-of-range confidences become `0.0`, unreadable classes become
//! [`Detection::UNKNOWN_CLASS`] and unusable name tables fall back to the id.

use serde_json::Value;
use tracing::debug;

use obbd_models::{Detection, DetectionResult, Polygon4};

use crate::coerce;
use crate::error::CoerceResult;
use crate::raw::{GeometrySource, RawPrediction};

/// Normalize one raw prediction.
///
/// Image size defaults to `0 x 0` when the prediction does not carry it.
pub fn normalize(raw: &RawPrediction) -> DetectionResult {
    let (image_width, image_height) = raw.image_size().unwrap_or((0, 0));
    let mut result = DetectionResult {
        image_width,
        image_height,
        detections: Vec::new(),
    };

    let Some(source) = raw.resolve() else {
        debug!("Prediction carries no geometry");
        return result;
    };

    let columns = source.columns();
    let rows = match coerce::rows(columns.geometry) {
        Ok(rows) => rows,
        Err(e) => {
            debug!(source = source.kind(), error = %e, "Unreadable geometry column");
            return result;
        }
    };

    for (index, row) in rows.iter().enumerate() {
        let geometry = match to_polygon(&source, row) {
            Ok(polygon) => polygon,
            Err(e) => {
                debug!(source = source.kind(), index, error = %e, "Skipping malformed instance");
                continue;
            }
        };

        let confidence = columns
            .conf_at(index)
            .and_then(|v| coerce::confidence(v).ok())
            .unwrap_or(0.0);
        let class_id = columns.cls_at(index).and_then(|v| coerce::class_id(v).ok());
        let class_label = match class_id {
            Some(id) => raw.class_label(id),
            None => Detection::UNKNOWN_CLASS.to_string(),
        };

        result
            .detections
            .push(Detection::new(class_label, class_id, confidence, geometry));
    }

    result
}

fn to_polygon(source: &GeometrySource<'_>, row: &Value) -> CoerceResult<Polygon4> {
    match source {
        GeometrySource::Polygons(_) => coerce::fixed::<8>(row).map(Polygon4),
        GeometrySource::OrientedBoxes(_) => {
            let [cx, cy, w, h, theta] = coerce::fixed::<5>(row)?;
            Ok(oriented_box_to_polygon(cx, cy, w, h, theta))
        }
        GeometrySource::AxisAligned(_) => {
            let [x1, y1, x2, y2] = coerce::fixed::<4>(row)?;
            Ok(Polygon4::from_xyxy(x1, y1, x2, y2))
        }
    }
}

/// Corners of a box centered at `(cx, cy)`, rotated by `theta` radians.
///
/// Corner order before rotation is `(-w/2, -h/2), (w/2, -h/2), (w/2, h/2), (-w/2, h/2)`.
pub fn oriented_box_to_polygon(cx: f64, cy: f64, w: f64, h: f64, theta: f64) -> Polygon4 {
    let (hx, hy) = (w / 2.0, h / 2.0);
    let (sin, cos) = theta.sin_cos();
    let corners = [(-hx, -hy), (hx, -hy), (hx, hy), (-hx, hy)]
        .map(|(x, y)| (cx + x * cos - y * sin, cy + x * sin + y * cos));
    Polygon4::from_corners(corners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> RawPrediction {
        serde_json::from_value(value).unwrap()
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_axis_aligned_box() {
        let raw = parse(json!({
            "orig_shape": [100, 200],
            "boxes": { "xyxy": [[10, 20, 30, 40]], "conf": [0.9], "cls": [0] }
        }));

        let result = normalize(&raw);
        assert_eq!(result.image_width, 200);
        assert_eq!(result.image_height, 100);
        assert_eq!(result.detection_count(), 1);

        let det = &result.detections[0];
        assert_eq!(det.class_label, "0");
        assert_eq!(det.class_id, Some(0));
        assert_eq!(det.confidence, 0.9);
        assert_eq!(det.geometry.0, [10.0, 20.0, 30.0, 20.0, 30.0, 40.0, 10.0, 40.0]);
    }

    #[test]
    fn test_oriented_box_without_rotation() {
        let raw = parse(json!({
            "obb": { "xywhr": [[50, 50, 20, 10, 0]], "conf": [0.8], "cls": [1] }
        }));

        let det = &normalize(&raw).detections[0];
        assert_close(det.geometry.as_slice(), &[40.0, 45.0, 60.0, 45.0, 60.0, 55.0, 40.0, 55.0]);
        assert_eq!(det.class_label, "1");
    }

    #[test]
    fn test_zero_rotation_matches_unrotated_corners() {
        let poly = oriented_box_to_polygon(12.5, 7.0, 5.0, 3.0, 0.0);
        let expected = Polygon4::from_xyxy(10.0, 5.5, 15.0, 8.5);
        assert_close(poly.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_rotation_is_periodic() {
        let theta = 0.7;
        let a = oriented_box_to_polygon(30.0, 40.0, 16.0, 6.0, theta);
        let b = oriented_box_to_polygon(30.0, 40.0, 16.0, 6.0, theta + 2.0 * std::f64::consts::PI);
        assert_close(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_quarter_turn() {
        let poly = oriented_box_to_polygon(0.0, 0.0, 4.0, 2.0, std::f64::consts::FRAC_PI_2);
        assert_close(poly.as_slice(), &[1.0, -2.0, 1.0, 2.0, -1.0, 2.0, -1.0, -2.0]);
    }

    #[test]
    fn test_axis_aligned_bbox_round_trip() {
        for (x1, y1, x2, y2) in [(0.0, 0.0, 1.0, 1.0), (3.5, 8.25, 120.0, 64.0)] {
            let raw = parse(json!({ "boxes": { "xyxy": [[x1, y1, x2, y2]] } }));
            let bbox = normalize(&raw).detections[0].geometry.bounding_box();
            assert_eq!((bbox.x1, bbox.y1, bbox.x2, bbox.y2), (x1, y1, x2, y2));
        }
    }

    #[test]
    fn test_polygon_wins_over_boxes() {
        let raw = parse(json!({
            "obb": { "xyxyxyxy": [[[1, 2], [3, 4], [5, 6], [7, 8]]], "conf": [[0.6]], "cls": [[2]] },
            "boxes": { "xyxy": [[0, 0, 100, 100]], "conf": [0.99], "cls": [5] }
        }));

        let result = normalize(&raw);
        assert_eq!(result.detection_count(), 1);
        let det = &result.detections[0];
        assert_eq!(det.geometry.0, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(det.confidence, 0.6);
        assert_eq!(det.class_id, Some(2));
    }

    #[test]
    fn test_missing_confidence_and_class() {
        let raw = parse(json!({ "boxes": { "xyxy": [[0, 0, 1, 1], [1, 1, 2, 2]], "conf": ["bad"] } }));

        let result = normalize(&raw);
        assert_eq!(result.detection_count(), 2);
        for det in &result.detections {
            assert_eq!(det.confidence, 0.0);
            assert_eq!(det.class_label, Detection::UNKNOWN_CLASS);
            assert_eq!(det.class_id, None);
        }
    }

    #[test]
    fn test_malformed_instance_is_skipped() {
        let raw = parse(json!({
            "boxes": {
                "xyxy": [[0, 0, 1], [0, 0, 5, 5], ["x", 0, 1, 1]],
                "conf": [0.1, 0.2, 0.3],
                "cls": [0, 1, 2]
            }
        }));

        let result = normalize(&raw);
        assert_eq!(result.detection_count(), 1);
        assert_eq!(result.detections[0].confidence, 0.2);
        assert_eq!(result.detections[0].class_id, Some(1));
    }

    #[test]
    fn test_names_table_labels() {
        let raw = parse(json!({
            "boxes": { "xyxy": [[0, 0, 1, 1], [0, 0, 1, 1]], "cls": [0, 3] },
            "names": { "0": "spike" }
        }));

        let labels: Vec<_> = normalize(&raw)
            .detections
            .into_iter()
            .map(|d| d.class_label)
            .collect();
        assert_eq!(labels, vec!["spike", "3"]);
    }

    #[test]
    fn test_out_of_range_confidence_is_zero() {
        let raw = parse(json!({
            "boxes": { "xyxy": [[0, 0, 1, 1], [0, 0, 1, 1], [0, 0, 1, 1]], "conf": [1.5, -0.2, 1.0] }
        }));
        let confs: Vec<f64> = normalize(&raw).detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unusable_names_keep_detections() {
        for names in [json!(null), json!(["spike"]), json!({ "0": 5 })] {
            let raw = parse(json!({
                "boxes": { "xyxy": [[0, 0, 1, 1], [0, 0, 2, 2]], "conf": [0.9, 0.8], "cls": [0, 1] },
                "names": names
            }));
            let labels: Vec<String> = normalize(&raw).detections.into_iter().map(|d| d.class_label).collect();
            let expected = if names.is_array() { vec!["spike", "1"] } else { vec!["0", "1"] };
            assert_eq!(labels, expected, "names = {}", names);
        }
    }

    #[test]
    fn test_no_geometry_is_empty() {
        let raw = parse(json!({ "image_width": 64, "image_height": 32 }));
        let result = normalize(&raw);
        assert!(result.is_empty());
        assert_eq!((result.image_width, result.image_height), (64, 32));

        let raw = parse(json!({ "boxes": { "xyxy": "garbage" } }));
        assert!(normalize(&raw).is_empty());
    }

    #[test]
    fn test_model_order_is_kept() {
        let raw = parse(json!({
            "boxes": { "xyxy": [[0, 0, 1, 1], [0, 0, 2, 2], [0, 0, 3, 3]], "conf": [0.1, 0.9, 0.5] }
        }));
        let confs: Vec<f64> = normalize(&raw).detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.1, 0.9, 0.5]);
    }
}
