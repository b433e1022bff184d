use crate::error::{AppendError, Result};
use crate::geometry::GeometryKind;
use crate::ogc_sql::{RowFilter, sql_count, sql_insert_feature, sql_select_features, sql_update_feature};
use crate::store::{
    AttributeMap, Capabilities, Feature, FeatureId, FeatureIter, FeatureRequest, FeatureSink,
    FeatureSource, NewFeature, StorageKind,
};
use crate::types::{ColumnSpec, GeometryType};
use crate::value::Value;
use geo_types::Geometry;
use rusqlite::params_from_iter;
use rusqlite::types::ValueRef;
use wkb::reader::Dimension;

use super::Gpkg;
use super::blob::{decode_gpkg_geometry, encode_gpkg_geometry};

mod feature_iterator;

pub use feature_iterator::GpkgFeatureIterator;

const INSERT_SAVEPOINT: &str = "gpkg_append_insert";

/// Geometry column metadata from `gpkg_geometry_columns`.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryColumn {
    pub name: String,
    pub geometry_type: GeometryType,
    pub dimension: Dimension,
    pub srs_id: u32,
}

#[derive(Debug)]
/// A GeoPackage feature table or attribute table.
///
/// `fields` lists every column except the geometry column, primary key
/// included. Feature attributes read from the layer follow this order.
pub struct GpkgLayer<'a> {
    pub(super) gpkg: &'a Gpkg,
    pub layer_name: String,
    pub primary_key_column: String,
    pub geometry: Option<GeometryColumn>,
    pub fields: Vec<ColumnSpec>,
    capabilities: Capabilities,
}

impl<'a> GpkgLayer<'a> {
    pub(super) fn new(
        gpkg: &'a Gpkg,
        layer_name: &str,
        primary_key_column: String,
        geometry: Option<GeometryColumn>,
        fields: Vec<ColumnSpec>,
    ) -> Self {
        let capabilities = if gpkg.is_read_only() {
            Capabilities::none()
        } else {
            Capabilities {
                can_update_geometry: geometry.is_some(),
                ..Capabilities::all()
            }
        };

        Self {
            gpkg,
            layer_name: layer_name.to_string(),
            primary_key_column,
            geometry,
            fields,
            capabilities,
        }
    }

    /// Restrict the editing operations this layer reports as supported.
    /// Capabilities are only ever narrowed.
    ///
    /// ```no_run
    /// use gpkg_append::{Capabilities, FeatureSink, Gpkg};
    ///
    /// let gpkg = Gpkg::open("data.gpkg")?;
    /// let layer = gpkg.open_layer("parcels")?.with_capabilities(Capabilities {
    ///     can_update_attributes: false,
    ///     ..Capabilities::all()
    /// });
    /// assert!(!layer.capabilities().can_update_attributes);
    /// # Ok::<(), gpkg_append::AppendError>(())
    /// ```
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = self.capabilities.intersect(capabilities);
        self
    }

    pub fn srs_id(&self) -> Option<u32> {
        self.geometry.as_ref().map(|column| column.srs_id)
    }

    pub(super) fn connection(&self) -> &rusqlite::Connection {
        self.gpkg.connection()
    }

    pub(super) fn select_sql(&self, with_geometry: bool, filter: RowFilter) -> String {
        let geometry_column = self
            .geometry
            .as_ref()
            .filter(|_| with_geometry)
            .map(|column| column.name.as_str());
        sql_select_features(
            &self.layer_name,
            &self.primary_key_column,
            geometry_column,
            self.fields.iter().map(|spec| spec.name.as_str()),
            filter,
        )
    }

    /// Decode a row selected by [`Self::select_sql`].
    pub(super) fn row_to_feature(
        &self,
        row: &rusqlite::Row<'_>,
        with_geometry: bool,
    ) -> rusqlite::Result<Feature> {
        let id: FeatureId = row.get(0)?;

        let mut offset = 1;
        let mut geometry = None;
        if let Some(column) = self.geometry.as_ref().filter(|_| with_geometry) {
            geometry = match row.get_ref(1)? {
                ValueRef::Null => None,
                ValueRef::Blob(blob) => decode_gpkg_geometry(blob).map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Blob,
                        err.to_string().into(),
                    )
                })?,
                other => {
                    return Err(rusqlite::Error::InvalidColumnType(
                        1,
                        column.name.clone(),
                        other.data_type(),
                    ));
                }
            };
            offset = 2;
        }

        let attributes = self
            .fields
            .iter()
            .enumerate()
            .map(|(idx, spec)| Ok(Value::from_sql(row.get_ref(offset + idx)?, spec.column_type)))
            .collect::<rusqlite::Result<Vec<Value>>>()?;

        Ok(Feature {
            id,
            attributes,
            geometry,
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.gpkg.is_read_only() {
            return Err(AppendError::ReadOnly);
        }
        Ok(())
    }

    fn column_name(&self, index: usize) -> Result<&str> {
        self.fields
            .get(index)
            .map(|spec| spec.name.as_str())
            .ok_or(AppendError::InvalidFieldIndex {
                index,
                field_count: self.fields.len(),
            })
    }

    fn geometry_value(&self, geometry: Option<&Geometry<f64>>) -> Result<Value> {
        let Some(geometry) = geometry else {
            return Ok(Value::Null);
        };
        if self.has_z_or_m() {
            return Err(AppendError::ZmGeometryUnsupported {
                layer_name: self.layer_name.clone(),
            });
        }
        let srs_id = self.srs_id().unwrap_or(0);
        Ok(Value::Blob(encode_gpkg_geometry(geometry, srs_id)?))
    }

    fn insert_one(&self, feature: &NewFeature) -> Result<()> {
        let mut columns = Vec::with_capacity(feature.attributes.len() + 1);
        let mut values = Vec::with_capacity(feature.attributes.len() + 1);

        if let Some(column) = &self.geometry {
            columns.push(column.name.as_str());
            values.push(self.geometry_value(feature.geometry.as_ref())?);
        }
        for (index, value) in &feature.attributes {
            columns.push(self.column_name(*index)?);
            values.push(value.clone());
        }

        let sql = sql_insert_feature(&self.layer_name, columns);
        let mut stmt = self.connection().prepare_cached(&sql)?;
        stmt.execute(params_from_iter(values.iter()))?;
        Ok(())
    }

    /// Run an UPDATE; a constraint violation or a missing row is a refusal.
    fn execute_update(&self, sql: &str, values: &[&Value]) -> Result<bool> {
        let mut stmt = self.connection().prepare_cached(sql)?;
        match stmt.execute(params_from_iter(values.iter())) {
            Ok(changed) => Ok(changed > 0),
            Err(err) => {
                let err = AppendError::from(err);
                if err.is_constraint_violation() {
                    tracing::debug!(layer = %self.layer_name, %err, "update refused");
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }
}

impl FeatureSource for GpkgLayer<'_> {
    fn name(&self) -> &str {
        &self.layer_name
    }

    fn fields(&self) -> &[ColumnSpec] {
        &self.fields
    }

    fn geometry_kind(&self) -> GeometryKind {
        self.geometry
            .as_ref()
            .map_or(GeometryKind::Null, |column| column.geometry_type.kind())
    }

    fn feature_count(&self) -> Result<u64> {
        let count: i64 = self
            .connection()
            .query_row(&sql_count(&self.layer_name), [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn features(&self, request: &FeatureRequest) -> Result<FeatureIter<'_>> {
        Ok(Box::new(GpkgFeatureIterator::new(self, request)))
    }
}

impl FeatureSink for GpkgLayer<'_> {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::GeoPackage
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn is_multi_part(&self) -> bool {
        self.geometry
            .as_ref()
            .is_some_and(|column| column.geometry_type.is_multi())
    }

    fn has_z_or_m(&self) -> bool {
        self.geometry
            .as_ref()
            .is_some_and(|column| column.dimension != Dimension::Xy)
    }

    fn is_editing(&self) -> bool {
        !self.connection().is_autocommit()
    }

    fn begin_edit(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.connection().execute_batch("BEGIN")?;
        Ok(())
    }

    fn change_attribute_values(&mut self, id: FeatureId, values: &AttributeMap) -> Result<bool> {
        self.ensure_writable()?;
        if values.is_empty() {
            return Ok(true);
        }

        let columns = values
            .keys()
            .map(|index| self.column_name(*index))
            .collect::<Result<Vec<&str>>>()?;
        let sql = sql_update_feature(&self.layer_name, &self.primary_key_column, columns);

        let id = Value::Integer(id);
        let params: Vec<&Value> = values.values().chain(std::iter::once(&id)).collect();
        self.execute_update(&sql, &params)
    }

    fn change_geometry(&mut self, id: FeatureId, geometry: Option<&Geometry<f64>>) -> Result<bool> {
        self.ensure_writable()?;
        let Some(column) = &self.geometry else {
            return Ok(false);
        };

        let sql = sql_update_feature(
            &self.layer_name,
            &self.primary_key_column,
            [column.name.as_str()],
        );
        let geometry = self.geometry_value(geometry)?;
        self.execute_update(&sql, &[&geometry, &Value::Integer(id)])
    }

    fn add_features(&mut self, features: &[NewFeature]) -> Result<bool> {
        self.ensure_writable()?;
        if features.is_empty() {
            return Ok(true);
        }

        let conn = self.connection();
        conn.execute_batch(&format!("SAVEPOINT {INSERT_SAVEPOINT}"))?;

        let result = features.iter().try_for_each(|feature| self.insert_one(feature));
        if result.is_err() {
            conn.execute_batch(&format!("ROLLBACK TO {INSERT_SAVEPOINT}"))?;
        }
        conn.execute_batch(&format!("RELEASE {INSERT_SAVEPOINT}"))?;

        match result {
            Ok(()) => Ok(true),
            Err(err) if err.is_constraint_violation() => {
                tracing::debug!(layer = %self.layer_name, %err, "insert batch refused");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn commit_edit(&mut self) -> Result<()> {
        self.connection().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_edit(&mut self) -> Result<()> {
        self.connection().execute_batch("ROLLBACK")?;
        Ok(())
    }
}
