use crate::error::{AppendError, Result};
use crate::geometry::GeometryKind;
use crate::store::{FeatureSink, FeatureSource};
use crate::types::ColumnType;

use super::{ActionOnDuplicate, AppendParameters};

/// The resolved pair of comparison fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Comparison {
    pub source_index: usize,
    pub source_type: ColumnType,
    pub target_index: usize,
    pub target_type: ColumnType,
}

impl Comparison {
    pub fn types_differ(&self) -> bool {
        self.source_type != self.target_type
    }
}

/// Check a run configuration against both layers before anything is read.
///
/// Returns the comparison fields when duplicate detection is requested.
pub(crate) fn validate<S, T>(
    source: &S,
    target: &T,
    params: &AppendParameters,
) -> Result<Option<Comparison>>
where
    S: FeatureSource + ?Sized,
    T: FeatureSink + ?Sized,
{
    let source_field = resolve_field(source, params.source_field.as_deref(), "source")?;
    let target_field = resolve_field(target, params.target_field.as_deref(), "target")?;
    let action = params.action_on_duplicate;

    let comparison = match (source_field, target_field) {
        (Some((source_index, source_type)), Some((target_index, target_type))) => {
            if action == ActionOnDuplicate::NoAction {
                return Err(AppendError::ActionRequired);
            }
            Some(Comparison {
                source_index,
                source_type,
                target_index,
                target_type,
            })
        }
        (None, None) => {
            if action != ActionOnDuplicate::NoAction {
                return Err(AppendError::ComparisonFieldsRequired);
            }
            None
        }
        _ => return Err(AppendError::AsymmetricComparisonFields),
    };

    let layer_name = || target.name().to_string();
    let capabilities = target.capabilities();
    if !capabilities.can_insert {
        return Err(AppendError::InsertNotSupported {
            layer_name: layer_name(),
        });
    }
    match action {
        ActionOnDuplicate::UpdateExistingFeature => {
            if !capabilities.can_update_attributes {
                return Err(AppendError::UpdateNotSupported {
                    layer_name: layer_name(),
                });
            }
            // Attribute-only targets have no geometry to update.
            if target.is_spatial() && !capabilities.can_update_geometry {
                return Err(AppendError::UpdateNotSupported {
                    layer_name: layer_name(),
                });
            }
        }
        ActionOnDuplicate::UpdateGeometryOnly => {
            if !target.is_spatial() || !capabilities.can_update_geometry {
                return Err(AppendError::GeometryUpdateNotSupported {
                    layer_name: layer_name(),
                });
            }
        }
        ActionOnDuplicate::NoAction | ActionOnDuplicate::SkipFeature => {}
    }

    // Only a source without geometries can feed a Z/M target: nulls carry no
    // coordinates.
    if target.is_spatial()
        && target.has_z_or_m()
        && source.geometry_kind() != GeometryKind::Null
    {
        return Err(AppendError::ZmGeometryUnsupported {
            layer_name: layer_name(),
        });
    }

    if target.is_editing() {
        return Err(AppendError::TargetIsEditing {
            layer_name: layer_name(),
        });
    }

    Ok(comparison)
}

fn resolve_field<L: FeatureSource + ?Sized>(
    layer: &L,
    name: Option<&str>,
    side: &'static str,
) -> Result<Option<(usize, ColumnType)>> {
    let Some(name) = name.filter(|name| !name.is_empty()) else {
        return Ok(None);
    };
    let index = layer
        .field_index(name)
        .ok_or_else(|| AppendError::MissingField {
            field: name.to_string(),
            side,
        })?;
    Ok(Some((index, layer.fields()[index].column_type)))
}
