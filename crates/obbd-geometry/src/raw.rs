//! Raw prediction wire form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce;

/// Oriented-box head output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObb {
    /// `(N, 8)` or `(N, 4, 2)` corner points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xyxyxyxy: Option<Value>,
    /// `(N, 5)` center x, center y, width, height, angle in radians
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xywhr: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cls: Option<Value>,
}

/// Axis-aligned box head output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBoxes {
    /// `(N, 4)` corners x1, y1, x2, y2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xyxy: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cls: Option<Value>,
}

/// One inference call's output, as returned by the model server.
///
/// Numeric fields stay as [`Value`] so any tensor nesting survives
/// deserialization; they are coerced per instance during normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
    /// `[height, width, ...]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_shape: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_width: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_height: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obb: Option<RawObb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boxes: Option<RawBoxes>,
    /// Class names, keyed by decimal id or listed in id order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Value>,
}

/// Per-instance columns of the selected geometry.
#[derive(Debug, Clone, Copy)]
pub struct Columns<'a> {
    pub geometry: &'a Value,
    pub conf: Option<&'a Value>,
    pub cls: Option<&'a Value>,
}

impl<'a> Columns<'a> {
    pub fn conf_at(&self, index: usize) -> Option<&'a Value> {
        Self::at(self.conf, index)
    }

    pub fn cls_at(&self, index: usize) -> Option<&'a Value> {
        Self::at(self.cls, index)
    }

    fn at(column: Option<&'a Value>, index: usize) -> Option<&'a Value> {
        coerce::rows(column?).ok()?.get(index)
    }
}

/// The one geometry convention a prediction is read with.
#[derive(Debug, Clone, Copy)]
pub enum GeometrySource<'a> {
    Polygons(Columns<'a>),
    OrientedBoxes(Columns<'a>),
    AxisAligned(Columns<'a>),
}

impl<'a> GeometrySource<'a> {
    pub fn columns(&self) -> Columns<'a> {
        match self {
            GeometrySource::Polygons(c)
            | GeometrySource::OrientedBoxes(c)
            | GeometrySource::AxisAligned(c) => *c,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GeometrySource::Polygons(_) => "polygon",
            GeometrySource::OrientedBoxes(_) => "oriented_box",
            GeometrySource::AxisAligned(_) => "axis_aligned",
        }
    }
}

impl RawPrediction {
    /// Pick the geometry source: polygon, then oriented box, then axis-aligned.
    pub fn resolve(&self) -> Option<GeometrySource<'_>> {
        if let Some(obb) = &self.obb {
            if let Some(polys) = &obb.xyxyxyxy {
                return Some(GeometrySource::Polygons(Columns {
                    geometry: polys,
                    conf: obb.conf.as_ref(),
                    cls: obb.cls.as_ref(),
                }));
            }
            if let Some(xywhr) = &obb.xywhr {
                return Some(GeometrySource::OrientedBoxes(Columns {
                    geometry: xywhr,
                    conf: obb.conf.as_ref(),
                    cls: obb.cls.as_ref(),
                }));
            }
        }

        let boxes = self.boxes.as_ref()?;
        boxes.xyxy.as_ref().map(|xyxy| {
            GeometrySource::AxisAligned(Columns {
                geometry: xyxy,
                conf: boxes.conf.as_ref(),
                cls: boxes.cls.as_ref(),
            })
        })
    }

    /// Image `(width, height)` when the prediction reports it.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        if let Some(size) = self.orig_shape.as_ref().and_then(shape_to_size) {
            return Some(size);
        }

        let width = to_dimension(self.image_width.as_ref()?)?;
        let height = to_dimension(self.image_height.as_ref()?)?;
        Some((width, height))
    }

    /// Class label for a class id: the name table entry, else the decimal id.
    pub fn class_label(&self, class_id: i64) -> String {
        self.names
            .as_ref()
            .and_then(|table| coerce::class_name(table, class_id).ok())
            .unwrap_or_else(|| class_id.to_string())
    }
}

fn shape_to_size(shape: &Value) -> Option<(u32, u32)> {
    match coerce::rows(shape).ok()? {
        [height, width, ..] => Some((to_dimension(width)?, to_dimension(height)?)),
        _ => None,
    }
}

fn to_dimension(value: &Value) -> Option<u32> {
    let n = coerce::number(value).ok()?;
    (n >= 0.0 && n <= u32::MAX as f64).then(|| n as u32)
}
