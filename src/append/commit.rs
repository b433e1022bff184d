use crate::error::Result;
use crate::feedback::Feedback;
use crate::store::{AttributeMap, FeatureSink};

use super::transfer::Batches;

/// What the edit session managed to write.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub updated_attributes: u64,
    pub updated_geometries: u64,
    /// Whether the insert batch went in; `true` when there was nothing to insert.
    pub inserted: bool,
}

/// Apply the collected changes in one edit session: attribute updates,
/// then geometry updates, then the insert batch.
///
/// A refused update is reported and the session goes on. A store error rolls
/// the whole session back and is returned.
pub(crate) fn commit<T, F>(target: &mut T, batches: &Batches, feedback: &mut F) -> Result<Outcome>
where
    T: FeatureSink + ?Sized,
    F: Feedback + ?Sized,
{
    target.begin_edit()?;

    // Any failure, a failed COMMIT included, ends in a rollback.
    let result = apply(target, batches, feedback)
        .and_then(|outcome| target.commit_edit().map(|()| outcome));
    if let Err(err) = &result {
        tracing::debug!(error = %err, "rolling back edit session");
        if let Err(rollback_err) = target.rollback_edit() {
            tracing::error!(error = %rollback_err, "rollback failed");
        }
    }
    result
}

fn apply<T, F>(target: &mut T, batches: &Batches, feedback: &mut F) -> Result<Outcome>
where
    T: FeatureSink + ?Sized,
    F: Feedback + ?Sized,
{
    let mut outcome = Outcome::default();

    for (&id, attributes) in &batches.attribute_updates {
        if target.change_attribute_values(id, attributes)? {
            outcome.updated_attributes += 1;
        } else {
            feedback.report_error(&format!(
                "ERROR: Target feature (id={id}) couldn't be updated to the following \
                 attributes: {}.",
                describe(attributes)
            ));
        }
    }

    for (&id, geometry) in &batches.geometry_updates {
        if target.change_geometry(id, geometry.as_ref())? {
            outcome.updated_geometries += 1;
        } else {
            feedback.report_error(&format!(
                "ERROR: Target feature's geometry (id={id}) couldn't be updated."
            ));
        }
    }

    outcome.inserted = batches.inserts.is_empty() || target.add_features(&batches.inserts)?;
    Ok(outcome)
}

/// `{1: a, 3: 2.5}`
fn describe(attributes: &AttributeMap) -> String {
    let pairs = attributes
        .iter()
        .map(|(index, value)| format!("{index}: {value}"))
        .collect::<Vec<String>>()
        .join(", ");
    format!("{{{pairs}}}")
}
