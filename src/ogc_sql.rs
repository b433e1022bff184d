// cf. https://www.geopackage.org/spec140/index.html#table_definition_sql

/// Quote an SQL identifier, doubling embedded quotes.
pub(crate) fn quoted(name: &str) -> String {
    format!(r#""{}""#, name.replace('"', r#""""#))
}

// gpkg_spatial_ref_sys: the SRS catalog referenced by gpkg_contents and
// gpkg_geometry_columns.
pub(crate) const SQL_GPKG_SPATIAL_REF_SYS: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition  TEXT NOT NULL,
  description TEXT
);
";

// gpkg_contents: one row per user table, 'features' or 'attributes'.
pub(crate) const SQL_GPKG_CONTENTS: &str = "
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
";

// gpkg_geometry_columns: the geometry column and declared type of each
// feature table.
pub(crate) const SQL_GPKG_GEOMETRY_COLUMNS: &str = "
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT uk_gc_table_name UNIQUE (table_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

// gpkg_extensions: lets readers discover the R-tree index of each feature table.
pub(crate) const SQL_GPKG_EXTENSIONS: &str = "
CREATE TABLE gpkg_extensions (
  table_name TEXT,
  column_name TEXT,
  extension_name TEXT NOT NULL,
  definition TEXT NOT NULL,
  scope TEXT NOT NULL,
  CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
);
";

pub(crate) const SQL_INSERT_SRS: &str = "
INSERT INTO gpkg_spatial_ref_sys
  (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_SRS_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM gpkg_spatial_ref_sys WHERE srs_id = ?1)";

pub(crate) const SQL_LIST_LAYERS: &str = "
SELECT table_name FROM gpkg_contents
WHERE data_type IN ('features', 'attributes')
ORDER BY table_name
";

pub(crate) const SQL_SELECT_DATA_TYPE: &str =
    "SELECT data_type FROM gpkg_contents WHERE table_name = ?1";

pub(crate) const SQL_INSERT_GPKG_CONTENTS: &str = "
INSERT INTO gpkg_contents
  (table_name, data_type, identifier, description, srs_id)
VALUES
  (?1, ?2, ?3, '', ?4)
";

pub(crate) const SQL_INSERT_GPKG_GEOMETRY_COLUMNS: &str = "
INSERT INTO gpkg_geometry_columns
  (table_name, column_name, geometry_type_name, srs_id, z, m)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_SELECT_GEOMETRY_COLUMN_META: &str = "
SELECT column_name, geometry_type_name, z, m, srs_id
FROM gpkg_geometry_columns
WHERE table_name = ?1
";

pub(crate) const SQL_INSERT_RTREE_EXTENSION: &str = "
INSERT INTO gpkg_extensions
  (table_name, column_name, extension_name, definition, scope)
VALUES
  (?1, ?2, 'gpkg_rtree_index', 'http://www.geopackage.org/spec120/#extension_rtree', 'write-only')
";

// Children first, gpkg_contents is referenced by gpkg_geometry_columns.
pub(crate) const SQL_DELETE_LAYER_METADATA: [&str; 3] = [
    "DELETE FROM gpkg_extensions WHERE table_name = ?1",
    "DELETE FROM gpkg_geometry_columns WHERE table_name = ?1",
    "DELETE FROM gpkg_contents WHERE table_name = ?1",
];

pub(crate) fn sql_create_table(layer_name: &str, column_defs: &str) -> String {
    format!("CREATE TABLE {} ({})", quoted(layer_name), column_defs)
}

pub(crate) fn sql_drop_table(layer_name: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quoted(layer_name))
}

pub(crate) fn sql_table_columns(layer_name: &str) -> String {
    format!(
        "SELECT name, type, pk FROM pragma_table_info('{}') ORDER BY cid",
        layer_name.replace('\'', "''")
    )
}

pub(crate) fn sql_count(layer_name: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quoted(layer_name))
}

/// Row selection of [`sql_select_features`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RowFilter {
    /// `?1` is the primary key.
    ById,
    /// First page of a keyset scan: `?1` is the page size.
    FirstPage,
    /// Following pages: `?1` is the last key seen, `?2` the page size.
    NextPage,
}

/// SELECT the primary key, then the geometry column when given, then the
/// attribute columns.
pub(crate) fn sql_select_features<'a, I>(
    layer_name: &str,
    primary_key_column: &str,
    geometry_column: Option<&str>,
    other_columns: I,
    filter: RowFilter,
) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut columns = vec![quoted(primary_key_column)];
    columns.extend(geometry_column.map(quoted));
    columns.extend(other_columns.into_iter().map(quoted));
    let columns = columns.join(", ");

    let pk = quoted(primary_key_column);
    let filter = match filter {
        RowFilter::ById => format!("WHERE {pk} = ?1"),
        RowFilter::FirstPage => format!("ORDER BY {pk} LIMIT ?1"),
        RowFilter::NextPage => format!("WHERE {pk} > ?1 ORDER BY {pk} LIMIT ?2"),
    };

    format!("SELECT {columns} FROM {} {filter}", quoted(layer_name))
}

pub(crate) fn sql_insert_feature<'a, I>(layer_name: &str, columns: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let columns: Vec<String> = columns.into_iter().map(quoted).collect();
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quoted(layer_name));
    }

    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<String>>()
        .join(",");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quoted(layer_name),
        columns.join(","),
        placeholders
    )
}

/// `UPDATE ... SET c1=?1, ..., cn=?n WHERE pk=?(n+1)`
pub(crate) fn sql_update_feature<'a, I>(
    layer_name: &str,
    primary_key_column: &str,
    columns: I,
) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let assignments: Vec<String> = columns
        .into_iter()
        .enumerate()
        .map(|(idx, name)| format!("{}=?{}", quoted(name), idx + 1))
        .collect();
    let id_idx = assignments.len() + 1;

    format!(
        "UPDATE {} SET {} WHERE {}=?{}",
        quoted(layer_name),
        assignments.join(","),
        quoted(primary_key_column),
        id_idx
    )
}

pub(crate) fn initialize_gpkg(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    // "GPKG" application id and the 1.4 user version.
    conn.execute_batch("PRAGMA application_id = 1196444487; PRAGMA user_version = 10400;")?;
    conn.execute_batch(SQL_GPKG_SPATIAL_REF_SYS)?;
    register_default_srs_ids(conn)?;
    conn.execute_batch(SQL_GPKG_CONTENTS)?;
    conn.execute_batch(SQL_GPKG_GEOMETRY_COLUMNS)?;
    conn.execute_batch(SQL_GPKG_EXTENSIONS)?;
    Ok(())
}

// Only the three SRS the GeoPackage spec mandates are registered. Others go
// through Gpkg::register_srs.
fn register_default_srs_ids(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    const EPSG4326_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

    conn.execute(
        SQL_INSERT_SRS,
        rusqlite::params!["WGS 84", 4326, "EPSG", 4326, EPSG4326_WKT, "WGS 84"],
    )?;
    conn.execute(
        SQL_INSERT_SRS,
        rusqlite::params![
            "Undefined Cartesian SRS",
            -1,
            "NONE",
            -1,
            "undefined",
            "undefined Cartesian coordinate reference system"
        ],
    )?;
    conn.execute(
        SQL_INSERT_SRS,
        rusqlite::params![
            "Undefined geographic SRS",
            0,
            "NONE",
            0,
            "undefined",
            "undefined geographic coordinate reference system"
        ],
    )?;
    Ok(())
}

fn rtree_name(table: &str, geom_column: &str) -> String {
    quoted(&format!("rtree_{table}_{geom_column}"))
}

// cf. https://www.geopackage.org/spec140/index.html#extension_rtree
pub(crate) fn gpkg_rtree_create_sql(table: &str, geom_column: &str) -> String {
    format!(
        "CREATE VIRTUAL TABLE {} USING rtree(id, minx, maxx, miny, maxy);",
        rtree_name(table, geom_column)
    )
}

pub(crate) fn gpkg_rtree_drop_sql(table: &str, geom_column: &str) -> String {
    format!("DROP TABLE IF EXISTS {};", rtree_name(table, geom_column))
}

pub(crate) fn gpkg_rtree_load_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    format!(
        "INSERT OR REPLACE INTO {r}
  SELECT {i}, ST_MinX({c}), ST_MaxX({c}), ST_MinY({c}), ST_MaxY({c})
  FROM {t} WHERE {c} NOT NULL AND NOT ST_IsEmpty({c});",
        r = rtree_name(table, geom_column),
        t = quoted(table),
        c = quoted(geom_column),
        i = quoted(id_column),
    )
}

pub(crate) fn gpkg_rtree_triggers_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    format!(
        "CREATE TRIGGER {tr_insert} AFTER INSERT ON {t}
  WHEN (new.{c} NOT NULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {tr_update2} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;

CREATE TRIGGER {tr_update4} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id IN (OLD.{i}, NEW.{i});
END;

CREATE TRIGGER {tr_update5} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {tr_update6} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} NOTNULL AND NOT ST_IsEmpty(OLD.{c}))
BEGIN
  UPDATE {r} SET
    minx = ST_MinX(NEW.{c}),
    maxx = ST_MaxX(NEW.{c}),
    miny = ST_MinY(NEW.{c}),
    maxy = ST_MaxY(NEW.{c})
  WHERE id = NEW.{i};
END;

CREATE TRIGGER {tr_update7} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} ISNULL OR ST_IsEmpty(OLD.{c}))
BEGIN
  INSERT INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {tr_delete} AFTER DELETE ON {t}
  WHEN old.{c} NOT NULL
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;",
        r = rtree_name(table, geom_column),
        t = quoted(table),
        c = quoted(geom_column),
        i = quoted(id_column),
        tr_insert = rtree_name(table, &format!("{geom_column}_insert")),
        tr_update2 = rtree_name(table, &format!("{geom_column}_update2")),
        tr_update4 = rtree_name(table, &format!("{geom_column}_update4")),
        tr_update5 = rtree_name(table, &format!("{geom_column}_update5")),
        tr_update6 = rtree_name(table, &format!("{geom_column}_update6")),
        tr_update7 = rtree_name(table, &format!("{geom_column}_update7")),
        tr_delete = rtree_name(table, &format!("{geom_column}_delete")),
    )
}

pub(crate) fn execute_rtree_sqls(
    conn: &rusqlite::Connection,
    table: &str,
    geom_column: &str,
    id_column: &str,
) -> rusqlite::Result<()> {
    conn.execute_batch(&gpkg_rtree_create_sql(table, geom_column))?;
    conn.execute_batch(&gpkg_rtree_load_sql(table, geom_column, id_column))?;
    conn.execute_batch(&gpkg_rtree_triggers_sql(table, geom_column, id_column))?;
    conn.execute(
        SQL_INSERT_RTREE_EXTENSION,
        rusqlite::params![table, geom_column],
    )?;
    Ok(())
}
