//! Detection label files.
//!
//! One line per detection, tab separated:
//!
//! ```text
//! class<TAB>confidence<TAB>x1,y1,x2,y2[<TAB>x1,y1,x2,y2,x3,y3,x4,y4]
//! ```
//!
//! Bounds come from the polygon's bounding box. Coordinates are truncated
//! toward zero. The polygon column is written only for rotated or irregular
//! polygons. The file always ends with a single newline.

use obbd_models::{Detection, JobId};

/// Directory label files are stored under.
pub const LABELS_DIR: &str = "labels";

const LABEL_EXTENSION: &str = ".txt";

/// A rendered label file and where it belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelArtifact {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Storage key for a job's label file.
pub fn label_path(job_id: &JobId) -> String {
    format!("{}/{}{}", LABELS_DIR, job_id, LABEL_EXTENSION)
}

/// Render and locate a job's label file.
pub fn label_artifact(job_id: &JobId, detections: &[Detection]) -> LabelArtifact {
    LabelArtifact {
        path: label_path(job_id),
        bytes: render_labels(detections),
    }
}

/// Render detections to label file bytes.
pub fn render_labels(detections: &[Detection]) -> Vec<u8> {
    let lines: Vec<String> = detections.iter().map(render_line).collect();
    let mut text = lines.join("\n");
    text.push('\n');
    text.into_bytes()
}

fn render_line(detection: &Detection) -> String {
    let bbox = detection.geometry.bounding_box();
    let mut line = format!(
        "{}\t{:.6}\t{},{},{},{}",
        sanitize_label(&detection.class_label),
        detection.confidence,
        truncate(bbox.x1),
        truncate(bbox.y1),
        truncate(bbox.x2),
        truncate(bbox.y2),
    );

    if !detection.geometry.is_axis_aligned_rect() {
        let polygon: Vec<String> = detection
            .geometry
            .as_slice()
            .iter()
            .map(|v| truncate(*v).to_string())
            .collect();
        line.push('\t');
        line.push_str(&polygon.join(","));
    }
    line
}

fn truncate(value: f64) -> i64 {
    value.trunc() as i64
}

/// Keep a label on one column: tabs and line breaks become spaces.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

/// Map a requested download name to its storage key.
///
/// Only plain `<name>.txt` file names are served; anything with a path
/// separator or a leading dot is refused.
pub fn resolve_label_download(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(LABEL_EXTENSION)?;
    if stem.is_empty() || file_name.starts_with('.') || file_name.contains(|c: char| c == '/' || c == '\\') {
        return None;
    }
    Some(format!("{}/{}", LABELS_DIR, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use obbd_models::Polygon4;

    fn text(detections: &[Detection]) -> String {
        String::from_utf8(render_labels(detections)).unwrap()
    }

    #[test]
    fn test_empty_file_is_single_newline() {
        assert_eq!(render_labels(&[]), b"\n");
    }

    #[test]
    fn test_axis_aligned_line_has_no_polygon() {
        let det = Detection::new("0", Some(0), 0.9, Polygon4::from_xyxy(10.0, 20.0, 30.0, 40.0));
        assert_eq!(text(&[det]), "0\t0.900000\t10,20,30,40\n");
    }

    #[test]
    fn test_rotated_line_has_polygon() {
        let det = Detection::new(
            "spike",
            Some(1),
            0.5,
            Polygon4([50.5, 40.0, 60.9, 50.2, 50.0, 60.0, 40.1, 50.0]),
        );
        assert_eq!(
            text(&[det]),
            "spike\t0.500000\t40,40,60,60\t50,40,60,50,50,60,40,50\n"
        );
    }

    #[test]
    fn test_negative_coordinates_truncate_toward_zero() {
        let det = Detection::new("obj", None, 0.0, Polygon4::from_xyxy(-1.7, -0.4, 2.9, 3.2));
        assert_eq!(text(&[det]), "obj\t0.000000\t-1,0,2,3\n");
    }

    #[test]
    fn test_lines_keep_order() {
        let a = Detection::new("a", None, 0.1, Polygon4::from_xyxy(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new("b", None, 0.2, Polygon4::from_xyxy(0.0, 0.0, 2.0, 2.0));
        assert_eq!(text(&[a, b]), "a\t0.100000\t0,0,1,1\nb\t0.200000\t0,0,2,2\n");
    }

    #[test]
    fn test_label_is_sanitized() {
        let det = Detection::new("bad\tname\n", None, 1.0, Polygon4::from_xyxy(0.0, 0.0, 1.0, 1.0));
        let line = text(&[det]);
        assert_eq!(line, "bad name \t1.000000\t0,0,1,1\n");
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_label_artifact_path() {
        let id = JobId::from_string("abc-123");
        let artifact = label_artifact(&id, &[]);
        assert_eq!(artifact.path, "labels/abc-123.txt");
        assert_eq!(artifact.bytes, b"\n");
    }

    #[test]
    fn test_download_names() {
        assert_eq!(resolve_label_download("abc.txt").as_deref(), Some("labels/abc.txt"));
        assert_eq!(resolve_label_download("abc.json"), None);
        assert_eq!(resolve_label_download(".txt"), None);
        assert_eq!(resolve_label_download("../abc.txt"), None);
        assert_eq!(resolve_label_download("a/b.txt"), None);
        assert_eq!(resolve_label_download(".hidden.txt"), None);
    }
}
