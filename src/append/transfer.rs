use crate::error::Result;
use crate::feedback::Feedback;
use crate::geometry::{AvoidIntersectionLayer, GeometryKind, avoid_intersections, convert_to_type};
use crate::store::{
    AttributeMap, Feature, FeatureId, FeatureRequest, FeatureSink, FeatureSource, NewFeature,
};
use geo_types::Geometry;
use std::collections::{BTreeMap, BTreeSet};

use super::index::DuplicateIndex;
use super::mapping::FieldMapping;
use super::{ActionOnDuplicate, AppendParameters};

/// Changes collected from one pass over the source, applied by `commit`.
#[derive(Debug, Default)]
pub(crate) struct Batches {
    pub inserts: Vec<NewFeature>,
    /// Keyed by target identifier; a later source feature replaces an
    /// earlier one.
    pub attribute_updates: BTreeMap<FeatureId, AttributeMap>,
    pub geometry_updates: BTreeMap<FeatureId, Option<Geometry<f64>>>,
    /// Distinct target identifiers matched for an update.
    pub duplicates: BTreeSet<FeatureId>,
    pub skipped: u64,
    /// Source features read before the pass ended.
    pub read: u64,
}

impl Batches {
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.len() as u64
    }
}

/// Per-run settings used to classify each source feature.
struct Collector<'r> {
    mapping: &'r FieldMapping,
    index: Option<&'r DuplicateIndex>,
    action: ActionOnDuplicate,
    avoid: &'r [AvoidIntersectionLayer],
    /// Both layers have geometries, so source geometries are carried over.
    copy_geometry: bool,
    target_kind: GeometryKind,
    target_multi: bool,
}

impl Collector<'_> {
    fn collect(&self, feature: Feature, batches: &mut Batches) {
        let duplicates = self.index.and_then(|index| {
            feature
                .attribute(index.source_index())
                .and_then(|value| index.lookup(value))
        });

        if let (Some(ids), ActionOnDuplicate::SkipFeature) = (duplicates, self.action) {
            batches.skipped += ids.len() as u64;
            return;
        }

        let Some(geometry) = self.prepare_geometry(feature.geometry.as_ref()) else {
            tracing::trace!(
                feature_id = feature.id,
                "geometry not representable in target; dropped"
            );
            return;
        };

        match duplicates {
            Some(ids) if self.action.updates() => {
                let attributes = self
                    .action
                    .updates_attributes()
                    .then(|| self.mapping.attributes(&feature));
                for &id in ids {
                    batches.duplicates.insert(id);
                    if let Some(attributes) = &attributes {
                        batches.attribute_updates.insert(id, attributes.clone());
                    }
                    if self.copy_geometry {
                        batches.geometry_updates.insert(id, geometry.clone());
                    }
                }
            }
            _ => batches.inserts.push(NewFeature {
                attributes: self.mapping.attributes(&feature),
                geometry,
            }),
        }
    }

    /// Geometry to write for a source feature. The outer `None` means the
    /// geometry cannot be represented in the target and the feature is
    /// dropped; the inner `None` writes a null geometry.
    fn prepare_geometry(
        &self,
        geometry: Option<&Geometry<f64>>,
    ) -> Option<Option<Geometry<f64>>> {
        let Some(geometry) = geometry.filter(|_| self.copy_geometry) else {
            return Some(None);
        };

        let geometry = match self.target_kind {
            GeometryKind::Unknown => geometry.clone(),
            kind => convert_to_type(geometry, kind, self.target_multi)?,
        };
        Some(Some(avoid_intersections(geometry, self.avoid)))
    }
}

/// Read every source feature once and sort it into inserts, updates or
/// skips.
///
/// Cancellation is checked before each feature. Features collected before
/// it are kept.
pub(crate) fn transfer<S, T, F>(
    source: &S,
    target: &T,
    mapping: &FieldMapping,
    index: Option<&DuplicateIndex>,
    params: &AppendParameters,
    feedback: &mut F,
) -> Result<Batches>
where
    S: FeatureSource + ?Sized,
    T: FeatureSink + ?Sized,
    F: Feedback + ?Sized,
{
    let collector = Collector {
        mapping,
        index,
        action: params.action_on_duplicate,
        avoid: &params.avoid_intersections,
        copy_geometry: source.geometry_kind() != GeometryKind::Null && target.is_spatial(),
        target_kind: target.geometry_kind(),
        target_multi: target.is_multi_part(),
    };

    let total = source.feature_count()?;
    let mut request = FeatureRequest::all();
    if !collector.copy_geometry {
        request = request.no_geometry();
    }

    let mut batches = Batches::default();
    for feature in source.features(&request)? {
        if feedback.is_canceled() {
            tracing::info!(read = batches.read, total, "append run canceled");
            break;
        }

        collector.collect(feature?, &mut batches);
        batches.read += 1;

        if total > 0 {
            feedback.set_progress(progress(batches.read, total));
        }
    }

    tracing::debug!(
        read = batches.read,
        inserts = batches.inserts.len(),
        attribute_updates = batches.attribute_updates.len(),
        geometry_updates = batches.geometry_updates.len(),
        skipped = batches.skipped,
        "collected changes"
    );
    Ok(batches)
}

fn progress(done: u64, total: u64) -> u8 {
    (done.saturating_mul(100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::progress;

    #[test]
    fn progress_rounds_down_and_saturates() {
        assert_eq!(progress(1, 3), 33);
        assert_eq!(progress(2, 3), 66);
        assert_eq!(progress(3, 3), 100);
        // The count may be stale when the source grows during the run.
        assert_eq!(progress(5, 3), 100);
    }
}
