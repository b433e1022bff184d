//! Append and upsert features between GeoPackage layers, built on top of
//! rusqlite.
//!
//! ## Overview
//!
//! - `Gpkg` is an open GeoPackage file (or an in-memory one).
//! - `GpkgLayer` is a single feature table or attribute table in it. It can
//!   be read as a [`FeatureSource`] and edited as a [`FeatureSink`].
//! - `Value` is a single attribute value of a feature.
//! - [`append_features`] copies the features of a source into a target,
//!   optionally detecting duplicates on a pair of comparison fields and
//!   skipping or updating them.
//!
//! `Gpkg` supports several open modes:
//!
//! - `Gpkg::open_read_only(path)`: open an existing file without write access.
//! - `Gpkg::open(path)`: open an existing file for read/write.
//! - `Gpkg::new(path)`: create a new file.
//! - `Gpkg::new_in_memory()`: create a transient in-memory GeoPackage.
//!
//! ## Appending features
//!
//! ```no_run
//! use gpkg_append::{ActionOnDuplicate, AppendParameters, Gpkg, LogFeedback, append_features};
//!
//! let source_gpkg = Gpkg::open_read_only("survey.gpkg")?;
//! let target_gpkg = Gpkg::open("cadastre.gpkg")?;
//! let source = source_gpkg.open_layer("parcels")?;
//! let mut target = target_gpkg.open_layer("parcels")?;
//!
//! let params = AppendParameters {
//!     source_field: Some("parcel_id".to_string()),
//!     target_field: Some("parcel_id".to_string()),
//!     action_on_duplicate: ActionOnDuplicate::SkipFeature,
//!     ..Default::default()
//! };
//! let report = append_features(&source, &mut target, &params, &mut LogFeedback::new());
//! if report.is_empty() {
//!     eprintln!("nothing was written, see the log");
//! }
//! # Ok::<(), gpkg_append::AppendError>(())
//! ```
//!
//! ## Reading and writing layers
//!
//! ```no_run
//! use gpkg_append::{
//!     ColumnSpec, ColumnType, FeatureRequest, FeatureSink, FeatureSource, GeometryType, Gpkg,
//!     NewFeature, Value,
//! };
//! use geo_types::{Geometry, Point};
//!
//! let gpkg = Gpkg::new("points.gpkg")?;
//! let mut layer = gpkg.create_layer(
//!     "points",
//!     "geom",
//!     GeometryType::Point,
//!     4326,
//!     &[ColumnSpec::new("name", ColumnType::Varchar)],
//! )?;
//!
//! // Field 0 is the `fid` primary key.
//! layer.add_features(&[
//!     NewFeature::new(Some(Geometry::Point(Point::new(1.0, 2.0)))).with_attribute(1, "alpha"),
//! ])?;
//!
//! for feature in layer.features(&FeatureRequest::all())? {
//!     let feature = feature?;
//!     let name: Option<String> = feature.attributes[1].clone().try_into()?;
//!     println!("{}: {name:?} {:?}", feature.id, feature.geometry);
//! }
//! # Ok::<(), gpkg_append::AppendError>(())
//! ```
mod append;
mod conversions;
mod error;
mod feedback;
mod geometry;
mod gpkg;
mod ogc_sql;
mod sql_functions;
mod store;
mod types;
mod value;

pub use append::{ActionOnDuplicate, AppendParameters, AppendReport, append_features};
pub use error::{AppendError, Result};
pub use feedback::{CancellationFlag, Feedback, LogFeedback};
pub use geometry::{
    AvoidIntersectionLayer, GeometryKind, avoid_intersections, convert_to_type, geometry_kind,
    is_multi,
};
pub use gpkg::{GeometryColumn, Gpkg, GpkgFeatureIterator, GpkgLayer};
pub use sql_functions::register_spatial_functions;
pub use store::{
    AttributeMap, Capabilities, Feature, FeatureId, FeatureIter, FeatureRequest, FeatureSink,
    FeatureSource, NewFeature, StorageKind,
};
pub use types::{ColumnSpec, ColumnType, GeometryType};
pub use value::{Value, try_convert};

// Re-exported because it appears in `GeometryColumn`.
pub use wkb::reader::Dimension;
