//! Collaborator traits an append run reads from and writes to.
//!
//! [`FeatureSource`] is anything that can enumerate features with a schema.
//! [`FeatureSink`] adds the editing surface of a target layer. The GeoPackage
//! layer implements both; tests implement them with wrappers.

use crate::error::Result;
use crate::geometry::GeometryKind;
use crate::types::ColumnSpec;
use crate::value::Value;
use geo_types::Geometry;
use std::collections::BTreeMap;

/// Store-assigned identifier of a feature. Meaningless across stores.
pub type FeatureId = i64;

/// Attribute values keyed by field position in the target schema.
pub type AttributeMap = BTreeMap<usize, Value>;

/// A feature read from a store.
///
/// `attributes` is aligned with the store's `fields()`, identity columns
/// included.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub attributes: Vec<Value>,
    pub geometry: Option<Geometry<f64>>,
}

impl Feature {
    pub fn attribute(&self, index: usize) -> Option<&Value> {
        self.attributes.get(index)
    }
}

/// A feature to insert. Fields absent from `attributes` take the store default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewFeature {
    pub attributes: AttributeMap,
    pub geometry: Option<Geometry<f64>>,
}

impl NewFeature {
    pub fn new(geometry: Option<Geometry<f64>>) -> Self {
        Self {
            attributes: AttributeMap::new(),
            geometry,
        }
    }

    pub fn with_attribute(mut self, index: usize, value: impl Into<Value>) -> Self {
        self.attributes.insert(index, value.into());
        self
    }
}

/// Which features to read and whether to decode their geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRequest {
    pub(crate) ids: Option<Vec<FeatureId>>,
    pub(crate) with_geometry: bool,
}

impl FeatureRequest {
    pub fn all() -> Self {
        Self {
            ids: None,
            with_geometry: true,
        }
    }

    /// Only the features with these identifiers. Unknown identifiers are ignored.
    pub fn with_ids(ids: impl IntoIterator<Item = FeatureId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            with_geometry: true,
        }
    }

    pub fn no_geometry(mut self) -> Self {
        self.with_geometry = false;
        self
    }

    pub fn ids(&self) -> Option<&[FeatureId]> {
        self.ids.as_deref()
    }

    pub fn wants_geometry(&self) -> bool {
        self.with_geometry
    }
}

impl Default for FeatureRequest {
    fn default() -> Self {
        Self::all()
    }
}

/// Editing operations a target store supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub can_insert: bool,
    pub can_update_attributes: bool,
    pub can_update_geometry: bool,
}

impl Capabilities {
    pub const fn all() -> Self {
        Self {
            can_insert: true,
            can_update_attributes: true,
            can_update_geometry: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            can_insert: false,
            can_update_attributes: false,
            can_update_geometry: false,
        }
    }

    /// Operations supported by both sets.
    pub fn intersect(self, other: Self) -> Self {
        Self {
            can_insert: self.can_insert && other.can_insert,
            can_update_attributes: self.can_update_attributes && other.can_update_attributes,
            can_update_geometry: self.can_update_geometry && other.can_update_geometry,
        }
    }
}

/// Kind of storage behind a sink.
///
/// GeoPackage tables carry an implicit `fid` row identifier that is never
/// written, even when it is not declared as the primary key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageKind {
    GeoPackage,
    Other(String),
}

pub type FeatureIter<'s> = Box<dyn Iterator<Item = Result<Feature>> + 's>;

pub trait FeatureSource {
    fn name(&self) -> &str;

    /// Attribute schema, geometry column excluded.
    fn fields(&self) -> &[ColumnSpec];

    fn geometry_kind(&self) -> GeometryKind;

    fn feature_count(&self) -> Result<u64>;

    fn features(&self, request: &FeatureRequest) -> Result<FeatureIter<'_>>;

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|field| field.name == name)
    }
}

/// A target store.
///
/// Methods returning `Ok(false)` refused the change (a constraint, a missing
/// feature). `Err` is a store-level failure that aborts the edit session.
pub trait FeatureSink: FeatureSource {
    fn storage_kind(&self) -> StorageKind;

    fn capabilities(&self) -> Capabilities;

    fn is_multi_part(&self) -> bool;

    fn is_spatial(&self) -> bool {
        self.geometry_kind() != GeometryKind::Null
    }

    /// Whether stored geometries carry Z or M coordinates. Geometries are
    /// written in XY, so such a target cannot take new geometries.
    fn has_z_or_m(&self) -> bool {
        false
    }

    /// Whether an edit session is already open on the store.
    fn is_editing(&self) -> bool;

    fn begin_edit(&mut self) -> Result<()>;

    fn change_attribute_values(&mut self, id: FeatureId, values: &AttributeMap) -> Result<bool>;

    fn change_geometry(&mut self, id: FeatureId, geometry: Option<&Geometry<f64>>) -> Result<bool>;

    /// Insert the whole batch or nothing.
    fn add_features(&mut self, features: &[NewFeature]) -> Result<bool>;

    fn commit_edit(&mut self) -> Result<()>;

    fn rollback_edit(&mut self) -> Result<()>;
}
