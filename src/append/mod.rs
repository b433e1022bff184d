//! Append source features to a target layer, optionally detecting
//! duplicates on a pair of comparison fields.
//!
//! A run goes through four stages: parameter validation, schema mapping, a
//! duplicate index over the target, and a single pass over the source. The
//! changes collected by that pass are applied inside one edit session on the
//! target.
//!
//! ```no_run
//! use gpkg_append::{ActionOnDuplicate, AppendParameters, Gpkg, LogFeedback, append_features};
//!
//! let source_gpkg = Gpkg::open_read_only("survey.gpkg")?;
//! let target_gpkg = Gpkg::open("cadastre.gpkg")?;
//! let source = source_gpkg.open_layer("parcels")?;
//! let mut target = target_gpkg.open_layer("parcels")?;
//!
//! let params = AppendParameters {
//!     source_field: Some("parcel_id".to_string()),
//!     target_field: Some("parcel_id".to_string()),
//!     action_on_duplicate: ActionOnDuplicate::UpdateExistingFeature,
//!     ..Default::default()
//! };
//! let report = append_features(&source, &mut target, &params, &mut LogFeedback::new());
//! println!("appended {:?}, updated {:?}", report.appended, report.updated_features);
//! # Ok::<(), gpkg_append::AppendError>(())
//! ```

mod commit;
mod index;
mod mapping;
mod transfer;
mod validate;

#[cfg(test)]
mod tests;

use crate::error::AppendError;
use crate::feedback::Feedback;
use crate::geometry::AvoidIntersectionLayer;
use crate::store::{FeatureSink, FeatureSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use commit::{Outcome, commit};
use index::DuplicateIndex;
use mapping::FieldMapping;
use transfer::transfer;
use validate::validate;

/// What to do with a source feature whose comparison value already exists
/// in the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOnDuplicate {
    /// No duplicate detection: every source feature is appended.
    #[default]
    #[serde(alias = "none")]
    NoAction,
    #[serde(alias = "skip")]
    SkipFeature,
    /// Overwrite attributes and geometry of every matching target feature.
    #[serde(alias = "update")]
    UpdateExistingFeature,
    /// Overwrite only the geometry of every matching target feature.
    UpdateGeometryOnly,
}

impl ActionOnDuplicate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoAction => "no_action",
            Self::SkipFeature => "skip_feature",
            Self::UpdateExistingFeature => "update_existing_feature",
            Self::UpdateGeometryOnly => "update_geometry_only",
        }
    }

    pub(crate) fn updates_attributes(self) -> bool {
        self == Self::UpdateExistingFeature
    }

    pub(crate) fn updates(self) -> bool {
        matches!(self, Self::UpdateExistingFeature | Self::UpdateGeometryOnly)
    }
}

impl fmt::Display for ActionOnDuplicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the snake_case names, their short aliases and the numeric codes
/// `0` to `3`, case-insensitively. `-` is read as `_`.
impl FromStr for ActionOnDuplicate {
    type Err = AppendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "0" | "none" | "no_action" => Ok(Self::NoAction),
            "1" | "skip" | "skip_feature" => Ok(Self::SkipFeature),
            "2" | "update" | "update_existing_feature" => Ok(Self::UpdateExistingFeature),
            "3" | "update_geometry_only" => Ok(Self::UpdateGeometryOnly),
            _ => Err(AppendError::Message(format!(
                "unknown action on duplicate: '{s}'"
            ))),
        }
    }
}

/// Configuration of one append run.
///
/// Intersection avoidance layers hold geometries, so they are never read from
/// a configuration file and must be attached by the caller.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppendParameters {
    /// Comparison field in the source layer.
    pub source_field: Option<String>,
    /// Comparison field in the target layer.
    pub target_field: Option<String>,
    pub action_on_duplicate: ActionOnDuplicate,
    /// Polygons that appended polygon geometries are cut against.
    #[serde(skip)]
    pub avoid_intersections: Vec<AvoidIntersectionLayer>,
}

/// Outcome of an append run.
///
/// A counter is `None` when it does not apply to the run: `skipped` is only
/// set with [`ActionOnDuplicate::SkipFeature`], `updated_features` with
/// [`ActionOnDuplicate::UpdateExistingFeature`] and `updated_only_geometry`
/// with [`ActionOnDuplicate::UpdateGeometryOnly`]. A run that was refused or
/// failed as a whole returns an empty report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppendReport {
    /// Name of the target layer, set once the run got past validation.
    pub target: Option<String>,
    pub appended: Option<u64>,
    pub updated_features: Option<u64>,
    pub updated_only_geometry: Option<u64>,
    pub skipped: Option<u64>,
}

impl AppendReport {
    /// Whether nothing was reported, which is the case after a refused or
    /// failed run.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Append the features of `source` to `target` according to `params`.
///
/// Errors never escape: configuration problems and store failures are sent
/// to `feedback` and yield an empty [`AppendReport`]. Cancellation through
/// `feedback` stops reading the source, and what was collected up to that
/// point is still written.
pub fn append_features<S, T, F>(
    source: &S,
    target: &mut T,
    params: &AppendParameters,
    feedback: &mut F,
) -> AppendReport
where
    S: FeatureSource + ?Sized,
    T: FeatureSink + ?Sized,
    F: Feedback + ?Sized,
{
    let comparison = match validate(source, &*target, params) {
        Ok(comparison) => comparison,
        Err(err) => {
            tracing::warn!(target_layer = target.name(), error = %err, "append run refused");
            feedback.report_error(&format!("WARNING: {err}"));
            return AppendReport::default();
        }
    };

    tracing::info!(
        source_layer = source.name(),
        target_layer = target.name(),
        action = %params.action_on_duplicate,
        "appending features"
    );

    let mapping = FieldMapping::new(source.fields(), &*target);
    tracing::debug!(mapped_fields = mapping.len(), "built field mapping");

    let index = match comparison {
        Some(comparison) => {
            if comparison.types_differ() {
                feedback.push_info(
                    "WARNING: Source and target fields to compare have different field types.",
                );
            }
            match DuplicateIndex::build(&*target, comparison) {
                Ok(index) => Some(index),
                Err(err) => {
                    feedback.report_error(&format!(
                        "ERROR: Could not read the features of '{}': {err}",
                        target.name()
                    ));
                    return AppendReport::default();
                }
            }
        }
        None => None,
    };

    let batches = match transfer(source, &*target, &mapping, index.as_ref(), params, feedback) {
        Ok(batches) => batches,
        Err(err) => {
            feedback.report_error(&format!(
                "ERROR: Could not read the features of '{}': {err}",
                source.name()
            ));
            return AppendReport::default();
        }
    };

    let outcome = match commit(target, &batches, feedback) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(target_layer = target.name(), error = %err, "append run rolled back");
            feedback.report_error(&format!(
                "ERROR: No features could be appended/updated to/in '{}', because of the \
                 following error:\n{err}",
                target.name()
            ));
            return AppendReport::default();
        }
    };

    let report = summarize(
        &*target,
        source,
        params.action_on_duplicate,
        &batches,
        &outcome,
        feedback,
    );
    tracing::info!(
        target_layer = target.name(),
        appended = ?report.appended,
        updated_features = ?report.updated_features,
        updated_only_geometry = ?report.updated_only_geometry,
        skipped = ?report.skipped,
        "append run finished"
    );
    report
}

fn summarize<T, S, F>(
    target: &T,
    source: &S,
    action: ActionOnDuplicate,
    batches: &transfer::Batches,
    outcome: &Outcome,
    feedback: &mut F,
) -> AppendReport
where
    T: FeatureSink + ?Sized,
    S: FeatureSource + ?Sized,
    F: Feedback + ?Sized,
{
    let name = target.name();
    let mut report = AppendReport {
        target: Some(name.to_string()),
        appended: Some(0),
        ..AppendReport::default()
    };

    match action {
        ActionOnDuplicate::SkipFeature => {
            feedback.push_info(&format!(
                "SKIPPED FEATURES: {} duplicate features were skipped while copying features \
                 to '{name}'!",
                batches.skipped
            ));
            report.skipped = Some(batches.skipped);
        }
        ActionOnDuplicate::UpdateExistingFeature => {
            feedback.push_info(&format!(
                "UPDATED FEATURES: {} out of {} duplicate features were updated while copying \
                 features to '{name}'!",
                outcome.updated_attributes,
                batches.duplicate_count()
            ));
            report.updated_features = Some(outcome.updated_attributes);
        }
        ActionOnDuplicate::UpdateGeometryOnly => {
            feedback.push_info(&format!(
                "UPDATED FEATURES: {} out of {} duplicate features had their geometry updated \
                 while copying features to '{name}'!",
                outcome.updated_geometries,
                batches.duplicate_count()
            ));
            report.updated_only_geometry = Some(outcome.updated_geometries);
        }
        ActionOnDuplicate::NoAction => {}
    }

    let total = source
        .feature_count()
        .map_or_else(|_| batches.read.to_string(), |count| count.to_string());
    if batches.inserts.is_empty() {
        feedback.push_info(&format!(
            "FINISHED WITHOUT APPENDED FEATURES: There were no features to append to '{name}'."
        ));
    } else if outcome.inserted {
        feedback.push_info(&format!(
            "APPENDED FEATURES: {} out of {total} features from input layer were successfully \
             appended to '{name}'!",
            batches.inserts.len()
        ));
        report.appended = Some(batches.inserts.len() as u64);
    } else {
        feedback.report_error(&format!(
            "ERROR: The {total} features from input layer could not be appended to '{name}'. \
             Sometimes this might be due to NOT NULL constraints that are not met."
        ));
    }

    report
}
