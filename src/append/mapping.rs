use crate::store::{AttributeMap, Feature, FeatureSink, StorageKind};
use crate::types::ColumnSpec;
use crate::value::Value;

/// Implicit row identifier of GeoPackage tables.
const GPKG_FID: &str = "fid";

/// Target field position to source field position, matched by exact name.
///
/// Identity columns of the target are never part of the mapping, so the
/// store keeps assigning them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct FieldMapping {
    pairs: Vec<(usize, usize)>,
}

impl FieldMapping {
    pub fn new<T: FeatureSink + ?Sized>(source_fields: &[ColumnSpec], target: &T) -> Self {
        let is_gpkg = target.storage_kind() == StorageKind::GeoPackage;

        let pairs = target
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| !field.primary_key)
            .filter(|(_, field)| !(is_gpkg && field.name == GPKG_FID))
            .filter_map(|(target_index, field)| {
                source_fields
                    .iter()
                    .position(|source| source.name == field.name)
                    .map(|source_index| (target_index, source_index))
            })
            .collect();

        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Copy the mapped source values verbatim. A source feature shorter than
    /// its schema yields `Null` for the missing positions.
    pub fn attributes(&self, feature: &Feature) -> AttributeMap {
        self.pairs
            .iter()
            .map(|&(target_index, source_index)| {
                let value = feature
                    .attribute(source_index)
                    .cloned()
                    .unwrap_or(Value::Null);
                (target_index, value)
            })
            .collect()
    }
}
