use crate::geometry::GeometryKind;

/// Declared type of a layer column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Varchar,
    Double,
    Integer,
    Date,
    DateTime,
    Blob,
    Geometry,
}

impl ColumnType {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Varchar => "text",
            Self::Double => "double",
            Self::Integer => "integer",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Blob => "blob",
            Self::Geometry => "geometry",
        }
    }
}

/// A named, typed column of a layer schema.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    /// Identity column assigned by the store. Never written by an append run.
    pub primary_key: bool,
    pub not_null: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            not_null: false,
        }
    }

    /// Declare the column `NOT NULL` when creating a table.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// Geometry type declared for a layer in `gpkg_geometry_columns`.
///
/// `Geometry` is the generic type name: any geometry may be stored, and an
/// append run keeps source geometries as they are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryType {
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    /// Topological kind of the declared type.
    pub fn kind(self) -> GeometryKind {
        match self {
            Self::Point | Self::MultiPoint => GeometryKind::Point,
            Self::LineString | Self::MultiLineString => GeometryKind::Line,
            Self::Polygon | Self::MultiPolygon => GeometryKind::Polygon,
            Self::Geometry | Self::GeometryCollection => GeometryKind::Unknown,
        }
    }

    pub fn is_multi(self) -> bool {
        matches!(
            self,
            Self::MultiPoint | Self::MultiLineString | Self::MultiPolygon | Self::GeometryCollection
        )
    }
}

#[cfg(test)]
mod tests {
    use super::GeometryType;
    use crate::geometry::GeometryKind;

    #[test]
    fn declared_types_split_into_kind_and_multiplicity() {
        assert_eq!(GeometryType::MultiPolygon.kind(), GeometryKind::Polygon);
        assert!(GeometryType::MultiPolygon.is_multi());
        assert_eq!(GeometryType::LineString.kind(), GeometryKind::Line);
        assert!(!GeometryType::LineString.is_multi());
        assert_eq!(GeometryType::Geometry.kind(), GeometryKind::Unknown);
    }
}
