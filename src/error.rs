use std::error::Error;
use std::fmt;

/// Crate error type for GeoPackage access and append runs.
#[derive(Debug)]
pub enum AppendError {
    /// Wraps errors returned by `rusqlite`.
    Sql(rusqlite::Error),
    /// Wraps errors returned by the `wkb` crate.
    Wkb(wkb::error::WkbError),
    /// Free-form message, mostly for file handling.
    Message(String),
    /// A geometry type in metadata could not be mapped to a supported geometry type.
    UnsupportedGeometryType(String),
    /// A column type declared in SQLite metadata is not supported by this crate.
    UnsupportedColumnType {
        column: String,
        declared_type: String,
    },
    /// Invalid or mixed `z` / `m` dimension flags in GeoPackage metadata.
    InvalidDimension { z: i8, m: i8 },
    /// Invalid GeoPackage geometry flags byte.
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob is too short for the fixed header.
    InvalidGpkgGeometryLength { len: usize, minimum: usize },
    /// GeoPackage geometry blob is too short for the declared envelope payload.
    InvalidGpkgGeometryEnvelope { len: usize, required: usize },
    /// Dynamic `Value` type did not match the expected conversion target.
    ValueTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Numeric conversion failed because the value is out of range.
    ValueOutOfRange { target: &'static str },
    /// A layer with the same name already exists.
    LayerAlreadyExists { layer_name: String },
    /// Referenced `srs_id` does not exist in `gpkg_spatial_ref_sys`.
    MissingSpatialRefSysId { srs_id: u32 },
    /// Layer schema has multiple primary key columns, which is unsupported.
    CompositePrimaryKeyUnsupported { layer_name: String },
    /// Layer schema has no primary key column.
    MissingPrimaryKeyColumn { layer_name: String },
    /// Attribute index does not exist in the layer schema.
    InvalidFieldIndex { index: usize, field_count: usize },
    /// Write attempted through a read-only connection.
    ReadOnly,

    // Run configuration errors. These abort an append run before anything is read.
    /// Only one of the two comparison fields was given.
    AsymmetricComparisonFields,
    /// Comparison fields were given but the action is `NoAction`.
    ActionRequired,
    /// An action on duplicates was chosen without both comparison fields.
    ComparisonFieldsRequired,
    /// A comparison field does not exist in its layer.
    MissingField { field: String, side: &'static str },
    /// The target store cannot accept new features.
    InsertNotSupported { layer_name: String },
    /// The target store cannot change attribute values.
    UpdateNotSupported { layer_name: String },
    /// The target store cannot change geometries, or has none to change.
    GeometryUpdateNotSupported { layer_name: String },
    /// The target is already inside an edit session opened by the caller.
    TargetIsEditing { layer_name: String },
    /// The target declares Z or M coordinates, which cannot be written.
    ZmGeometryUnsupported { layer_name: String },
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(err) => write!(f, "{err}"),
            Self::Wkb(err) => write!(f, "{err}"),
            Self::Message(message) => write!(f, "{message}"),
            Self::UnsupportedGeometryType(ty) => write!(f, "unsupported geometry type: {ty}"),
            Self::UnsupportedColumnType {
                column,
                declared_type,
            } => write!(
                f,
                "unsupported column type for column '{column}': {declared_type}"
            ),
            Self::InvalidDimension { z, m } => {
                write!(f, "invalid or mixed geometry dimension (z={z}, m={m})")
            }
            Self::InvalidGpkgGeometryFlags(flags) => {
                write!(f, "invalid gpkg geometry flags: {flags:#04x}")
            }
            Self::InvalidGpkgGeometryLength { len, minimum } => write!(
                f,
                "invalid gpkg geometry length: got {len} bytes, expected at least {minimum}"
            ),
            Self::InvalidGpkgGeometryEnvelope { len, required } => write!(
                f,
                "invalid gpkg geometry envelope length: got {len} bytes, required {required}"
            ),
            Self::ValueTypeMismatch { expected, actual } => {
                write!(f, "expected {expected}, got {actual}")
            }
            Self::ValueOutOfRange { target } => write!(f, "value out of range for {target}"),
            Self::LayerAlreadyExists { layer_name } => {
                write!(f, "layer already exists: {layer_name}")
            }
            Self::MissingSpatialRefSysId { srs_id } => {
                write!(f, "srs_id {srs_id} not found in gpkg_spatial_ref_sys")
            }
            Self::CompositePrimaryKeyUnsupported { layer_name } => write!(
                f,
                "composite primary keys are not supported for layer: {layer_name}"
            ),
            Self::MissingPrimaryKeyColumn { layer_name } => {
                write!(f, "no primary key column found for layer: {layer_name}")
            }
            Self::InvalidFieldIndex { index, field_count } => write!(
                f,
                "field index {index} is out of bounds for a schema of {field_count} fields"
            ),
            Self::ReadOnly => write!(f, "operation not allowed on read-only connection"),
            Self::AsymmetricComparisonFields => write!(
                f,
                "both source and target comparison fields must be given, or neither"
            ),
            Self::ActionRequired => write!(
                f,
                "since you have chosen source and target fields to compare, you need to choose \
                 a valid action to apply on duplicate features"
            ),
            Self::ComparisonFieldsRequired => write!(
                f,
                "since you have chosen an action on duplicate features, you need to choose both \
                 source and target fields for comparing values"
            ),
            Self::MissingField { field, side } => {
                write!(f, "'{field}' field not found in {side} layer")
            }
            Self::InsertNotSupported { layer_name } => write!(
                f,
                "the target layer '{layer_name}' does not support appending features to it"
            ),
            Self::UpdateNotSupported { layer_name } => write!(
                f,
                "the target layer '{layer_name}' does not support updating its features"
            ),
            Self::GeometryUpdateNotSupported { layer_name } => write!(
                f,
                "the target layer '{layer_name}' does not support updating its geometries"
            ),
            Self::TargetIsEditing { layer_name } => write!(
                f,
                "you need to close the edit session on layer '{layer_name}' before appending"
            ),
            Self::ZmGeometryUnsupported { layer_name } => write!(
                f,
                "the target layer '{layer_name}' stores Z or M coordinates, which cannot be \
                 written; only XY geometries are supported"
            ),
        }
    }
}

impl Error for AppendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sql(err) => Some(err),
            Self::Wkb(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for AppendError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

impl From<wkb::error::WkbError> for AppendError {
    fn from(err: wkb::error::WkbError) -> Self {
        Self::Wkb(err)
    }
}

impl AppendError {
    /// Whether this is a run configuration error, raised before any data is read.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::AsymmetricComparisonFields
                | Self::ActionRequired
                | Self::ComparisonFieldsRequired
                | Self::MissingField { .. }
                | Self::InsertNotSupported { .. }
                | Self::UpdateNotSupported { .. }
                | Self::GeometryUpdateNotSupported { .. }
                | Self::TargetIsEditing { .. }
                | Self::ZmGeometryUnsupported { .. }
        )
    }

    /// Whether the underlying SQLite error is a constraint violation
    /// (NOT NULL, UNIQUE, CHECK, ...).
    pub(crate) fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Sql(err) => {
                err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppendError>;
