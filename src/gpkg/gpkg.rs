use crate::conversions::{
    column_type_from_str, column_type_to_str, dimension_from_zm, dimension_to_zm,
    geometry_type_from_str, geometry_type_to_str,
};
use crate::error::{AppendError, Result};
use crate::ogc_sql::{
    SQL_DELETE_LAYER_METADATA, SQL_INSERT_GPKG_CONTENTS, SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
    SQL_INSERT_SRS, SQL_LIST_LAYERS, SQL_SELECT_DATA_TYPE, SQL_SELECT_GEOMETRY_COLUMN_META,
    SQL_SRS_EXISTS, execute_rtree_sqls, gpkg_rtree_drop_sql, initialize_gpkg, quoted,
    sql_create_table, sql_drop_table, sql_table_columns,
};
use crate::sql_functions::register_spatial_functions;
use crate::types::{ColumnSpec, GeometryType};
use rusqlite::{OpenFlags, OptionalExtension};
use std::path::Path;

use super::layer::{GeometryColumn, GpkgLayer};

const FID_COLUMN: &str = "fid";

#[derive(Debug)]
/// GeoPackage connection wrapper.
pub struct Gpkg {
    conn: rusqlite::Connection,
    read_only: bool,
}

impl Gpkg {
    /// Open a GeoPackage in read-only mode.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: true,
        })
    }

    /// Open an existing GeoPackage in read-write mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppendError::Message(format!(
                "GeoPackage file does not exist: {}",
                path.display()
            )));
        }

        let conn = rusqlite::Connection::open(path)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a new GeoPackage file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(AppendError::Message(format!(
                "GeoPackage file already exists: {}",
                path.display()
            )));
        }

        let conn = rusqlite::Connection::open(path)?;
        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;

        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a transient GeoPackage in memory.
    pub fn new_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;

        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Register a spatial reference system in `gpkg_spatial_ref_sys`.
    ///
    /// Only EPSG:4326 and the two undefined systems are present in a new
    /// GeoPackage. Layers in any other SRS need their definition registered
    /// first. The WKT `definition` is stored as given.
    pub fn register_srs(
        &self,
        srs_name: &str,
        srs_id: i32,
        organization: &str,
        organization_coordsys_id: i32,
        definition: &str,
        description: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.conn.execute(
            SQL_INSERT_SRS,
            rusqlite::params![
                srs_name,
                srs_id,
                organization,
                organization_coordsys_id,
                definition,
                description
            ],
        )?;
        Ok(())
    }

    /// Names of the feature and attribute tables, sorted.
    pub fn list_layers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(SQL_LIST_LAYERS)?;
        let layers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(layers)
    }

    /// Load a layer definition by name.
    pub fn open_layer(&self, layer_name: &str) -> Result<GpkgLayer<'_>> {
        let data_type: Option<String> = self
            .conn
            .query_row(SQL_SELECT_DATA_TYPE, [layer_name], |row| row.get(0))
            .optional()?;
        let Some(data_type) = data_type else {
            return Err(AppendError::Message(format!(
                "Layer not found: {layer_name}"
            )));
        };

        let geometry = if data_type == "features" {
            Some(self.get_geometry_column(layer_name)?)
        } else {
            None
        };

        let (primary_key_column, fields) = self.get_column_specs(
            layer_name,
            geometry.as_ref().map(|column| column.name.as_str()),
        )?;

        tracing::debug!(
            layer = layer_name,
            data_type = %data_type,
            fields = fields.len(),
            "opened layer"
        );
        Ok(GpkgLayer::new(self, layer_name, primary_key_column, geometry, fields))
    }

    /// Create a feature table with an integer `fid` primary key, a geometry
    /// column and the given attribute columns. Geometries are stored in XY.
    pub fn create_layer(
        &self,
        layer_name: &str,
        geometry_column: &str,
        geometry_type: GeometryType,
        srs_id: u32,
        column_specs: &[ColumnSpec],
    ) -> Result<GpkgLayer<'_>> {
        self.ensure_new_layer(layer_name)?;

        let srs_exists: bool =
            self.conn
                .query_row(SQL_SRS_EXISTS, rusqlite::params![srs_id], |row| row.get(0))?;
        if !srs_exists {
            return Err(AppendError::MissingSpatialRefSysId { srs_id });
        }

        let dimension = wkb::reader::Dimension::Xy;
        let (z, m) = dimension_to_zm(dimension);

        let mut column_defs = vec![
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quoted(FID_COLUMN)),
            format!(
                "{} {}",
                quoted(geometry_column),
                geometry_type_to_str(geometry_type)
            ),
        ];
        column_defs.extend(column_specs.iter().map(column_def));

        self.conn
            .execute_batch(&sql_create_table(layer_name, &column_defs.join(", ")))?;
        self.conn.execute(
            SQL_INSERT_GPKG_CONTENTS,
            rusqlite::params![layer_name, "features", layer_name, srs_id],
        )?;
        self.conn.execute(
            SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
            rusqlite::params![
                layer_name,
                geometry_column,
                geometry_type_to_str(geometry_type),
                srs_id,
                z,
                m
            ],
        )?;
        execute_rtree_sqls(&self.conn, layer_name, geometry_column, FID_COLUMN)?;

        let geometry = GeometryColumn {
            name: geometry_column.to_string(),
            geometry_type,
            dimension,
            srs_id,
        };
        Ok(GpkgLayer::new(
            self,
            layer_name,
            FID_COLUMN.to_string(),
            Some(geometry),
            layer_fields(column_specs),
        ))
    }

    /// Create a non-spatial (`attributes`) table with an integer `fid`
    /// primary key.
    pub fn create_attribute_table(
        &self,
        table_name: &str,
        column_specs: &[ColumnSpec],
    ) -> Result<GpkgLayer<'_>> {
        self.ensure_new_layer(table_name)?;

        let mut column_defs = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quoted(FID_COLUMN)
        )];
        column_defs.extend(column_specs.iter().map(column_def));

        self.conn
            .execute_batch(&sql_create_table(table_name, &column_defs.join(", ")))?;
        self.conn.execute(
            SQL_INSERT_GPKG_CONTENTS,
            rusqlite::params![table_name, "attributes", table_name, None::<u32>],
        )?;

        Ok(GpkgLayer::new(
            self,
            table_name,
            FID_COLUMN.to_string(),
            None,
            layer_fields(column_specs),
        ))
    }

    /// Drop a layer, its spatial index and its metadata rows.
    pub fn delete_layer(&self, layer_name: &str) -> Result<()> {
        self.ensure_writable()?;

        let geometry_column: Option<String> = self
            .conn
            .query_row(SQL_SELECT_GEOMETRY_COLUMN_META, [layer_name], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(geometry_column) = geometry_column {
            self.conn
                .execute_batch(&gpkg_rtree_drop_sql(layer_name, &geometry_column))?;
        }

        self.conn.execute_batch(&sql_drop_table(layer_name))?;
        for sql in SQL_DELETE_LAYER_METADATA {
            self.conn.execute(sql, [layer_name])?;
        }
        Ok(())
    }

    pub(crate) fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(AppendError::ReadOnly);
        }
        Ok(())
    }

    fn ensure_new_layer(&self, layer_name: &str) -> Result<()> {
        self.ensure_writable()?;
        if self.list_layers()?.iter().any(|name| name == layer_name) {
            return Err(AppendError::LayerAlreadyExists {
                layer_name: layer_name.to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the table columns, except the geometry column, and the single
    /// primary key column.
    fn get_column_specs(
        &self,
        layer_name: &str,
        geometry_column: Option<&str>,
    ) -> Result<(String, Vec<ColumnSpec>)> {
        let mut stmt = self.conn.prepare(&sql_table_columns(layer_name))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)? != 0,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut primary_key: Option<String> = None;
        let mut fields = Vec::with_capacity(rows.len());
        for (name, declared_type, is_primary_key) in rows {
            if Some(name.as_str()) == geometry_column {
                continue;
            }

            // cf. https://www.geopackage.org/spec140/index.html#_sqlite_container
            let column_type = column_type_from_str(&declared_type).ok_or_else(|| {
                AppendError::UnsupportedColumnType {
                    column: name.clone(),
                    declared_type: declared_type.clone(),
                }
            })?;

            if is_primary_key {
                if primary_key.is_some() {
                    return Err(AppendError::CompositePrimaryKeyUnsupported {
                        layer_name: layer_name.to_string(),
                    });
                }
                primary_key = Some(name.clone());
            }

            fields.push(ColumnSpec {
                name,
                column_type,
                primary_key: is_primary_key,
                not_null: false,
            });
        }

        let primary_key = primary_key.ok_or_else(|| AppendError::MissingPrimaryKeyColumn {
            layer_name: layer_name.to_string(),
        })?;
        Ok((primary_key, fields))
    }

    fn get_geometry_column(&self, layer_name: &str) -> Result<GeometryColumn> {
        let (name, geometry_type_str, z, m, srs_id) = self.conn.query_row(
            SQL_SELECT_GEOMETRY_COLUMN_META,
            [layer_name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i8>(2)?,
                    row.get::<_, i8>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            },
        )?;

        Ok(GeometryColumn {
            name,
            geometry_type: geometry_type_from_str(&geometry_type_str)?,
            dimension: dimension_from_zm(z, m)?,
            srs_id,
        })
    }
}

fn column_def(spec: &ColumnSpec) -> String {
    let mut def = format!(
        "{} {}",
        quoted(&spec.name),
        column_type_to_str(spec.column_type)
    );
    if spec.not_null {
        def.push_str(" NOT NULL");
    }
    def
}

/// Schema of a freshly created table: `fid` first, then the given columns.
fn layer_fields(column_specs: &[ColumnSpec]) -> Vec<ColumnSpec> {
    let mut fid = ColumnSpec::new(FID_COLUMN, crate::types::ColumnType::Integer);
    fid.primary_key = true;
    std::iter::once(fid)
        .chain(column_specs.iter().cloned().map(|mut spec| {
            spec.primary_key = false;
            spec
        }))
        .collect()
}
