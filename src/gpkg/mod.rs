//! GeoPackage storage backed by rusqlite.
//!
//! `Gpkg` owns the connection; `GpkgLayer` is one feature or attribute table
//! and implements both `FeatureSource` and `FeatureSink`.

mod blob;
mod gpkg;
mod layer;

pub use gpkg::Gpkg;
pub use layer::{GeometryColumn, GpkgFeatureIterator, GpkgLayer};

pub(crate) use blob::gpkg_geometry_to_wkb;
#[cfg(test)]
pub(crate) use blob::encode_gpkg_geometry;
