use crate::error::AppendError;
use crate::types::{ColumnType, GeometryType};

#[inline]
pub(crate) fn geometry_type_to_str(geometry_type: GeometryType) -> &'static str {
    match geometry_type {
        GeometryType::Geometry => "GEOMETRY",
        GeometryType::GeometryCollection => "GEOMETRYCOLLECTION",
        GeometryType::Point => "POINT",
        GeometryType::LineString => "LINESTRING",
        GeometryType::Polygon => "POLYGON",
        GeometryType::MultiPoint => "MULTIPOINT",
        GeometryType::MultiLineString => "MULTILINESTRING",
        GeometryType::MultiPolygon => "MULTIPOLYGON",
    }
}

#[inline]
pub(crate) fn geometry_type_from_str(geometry_type_str: &str) -> Result<GeometryType, AppendError> {
    const TYPES: [GeometryType; 8] = [
        GeometryType::Geometry,
        GeometryType::GeometryCollection,
        GeometryType::Point,
        GeometryType::LineString,
        GeometryType::Polygon,
        GeometryType::MultiPoint,
        GeometryType::MultiLineString,
        GeometryType::MultiPolygon,
    ];
    TYPES
        .into_iter()
        .find(|ty| geometry_type_str.eq_ignore_ascii_case(geometry_type_to_str(*ty)))
        .ok_or_else(|| AppendError::UnsupportedGeometryType(geometry_type_str.to_string()))
}

#[inline]
pub(crate) fn dimension_to_zm(dimension: wkb::reader::Dimension) -> (i8, i8) {
    match dimension {
        wkb::reader::Dimension::Xy => (0, 0),
        wkb::reader::Dimension::Xyz => (1, 0),
        wkb::reader::Dimension::Xym => (0, 1),
        wkb::reader::Dimension::Xyzm => (1, 1),
    }
}

#[inline]
pub(crate) fn dimension_from_zm(z: i8, m: i8) -> Result<wkb::reader::Dimension, AppendError> {
    match (z, m) {
        (0, 0) => Ok(wkb::reader::Dimension::Xy),
        (1, 0) => Ok(wkb::reader::Dimension::Xyz),
        (0, 1) => Ok(wkb::reader::Dimension::Xym),
        (1, 1) => Ok(wkb::reader::Dimension::Xyzm),
        // 2 means "optional". Geometries are handled in XY anyway, so treat
        // an optional dimension as absent.
        (0 | 2, 0 | 2) => Ok(wkb::reader::Dimension::Xy),
        _ => Err(AppendError::InvalidDimension { z, m }),
    }
}

#[inline]
pub(crate) fn column_type_to_str(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Double => "DOUBLE",
        ColumnType::Varchar => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Date => "DATE",
        ColumnType::DateTime => "DATETIME",
        ColumnType::Blob => "BLOB",
        ColumnType::Geometry => "GEOMETRY",
    }
}

#[inline]
pub(crate) fn column_type_from_str(column_type_str: &str) -> Option<ColumnType> {
    // TEXT(n) and BLOB(n) carry a maximum length we don't enforce.
    let s = match column_type_str.split_once('(') {
        Some((base, _)) => base.trim(),
        None => column_type_str.trim(),
    };
    let is = |names: &[&str]| names.iter().any(|name| s.eq_ignore_ascii_case(name));

    // cf. https://www.geopackage.org/spec140/index.html#_sqlite_container
    if is(&["TINYINT", "SMALLINT", "MEDIUMINT", "INT", "INTEGER"]) {
        Some(ColumnType::Integer)
    } else if is(&["DOUBLE", "FLOAT", "REAL"]) {
        Some(ColumnType::Double)
    } else if is(&["TEXT"]) {
        Some(ColumnType::Varchar)
    } else if is(&["BOOLEAN"]) {
        Some(ColumnType::Boolean)
    } else if is(&["DATE"]) {
        Some(ColumnType::Date)
    } else if is(&["DATETIME"]) {
        Some(ColumnType::DateTime)
    } else if is(&["BLOB"]) {
        Some(ColumnType::Blob)
    } else if geometry_type_from_str(s).is_ok() {
        Some(ColumnType::Geometry)
    } else {
        None
    }
}
