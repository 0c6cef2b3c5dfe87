//! Geometry normalization for detection model output.
//!
//! This crate provides:
//! - The wire form of a raw prediction (`RawPrediction`)
//! - Typed numeric coercion for loosely-shaped model output
//! - Conversion of polygons, oriented boxes and axis-aligned boxes into
//!   canonical [`obbd_models::Detection`] records

pub mod coerce;
pub mod error;
pub mod normalize;
pub mod raw;

pub use error::{CoerceError, CoerceResult};
pub use normalize::{normalize, oriented_box_to_polygon};
pub use raw::{GeometrySource, RawBoxes, RawObb, RawPrediction};
