use super::{ActionOnDuplicate, AppendParameters, AppendReport, append_features};
use crate::error::{AppendError, Result};
use crate::feedback::Feedback;
use crate::geometry::{AvoidIntersectionLayer, GeometryKind, to_geo_geometry};
use crate::gpkg::{Gpkg, GpkgLayer};
use crate::store::{
    AttributeMap, Capabilities, Feature, FeatureId, FeatureIter, FeatureRequest, FeatureSink,
    FeatureSource, NewFeature, StorageKind,
};
use crate::types::{ColumnSpec, ColumnType, GeometryType};
use crate::value::Value;
use chrono::NaiveDate;
use geo::Area;
use geo_types::{Geometry, LineString, Polygon, polygon};
use std::str::FromStr;
use wkt::Wkt;

#[derive(Debug, Default)]
struct RecordingFeedback {
    progress: Vec<u8>,
    infos: Vec<String>,
    errors: Vec<String>,
    /// Cancel once this many progress updates were seen.
    cancel_after: Option<usize>,
}

impl RecordingFeedback {
    fn has_info(&self, needle: &str) -> bool {
        self.infos.iter().any(|info| info.contains(needle))
    }

    fn has_error(&self, needle: &str) -> bool {
        self.errors.iter().any(|error| error.contains(needle))
    }
}

impl Feedback for RecordingFeedback {
    fn is_canceled(&self) -> bool {
        self.cancel_after
            .is_some_and(|after| self.progress.len() >= after)
    }

    fn set_progress(&mut self, percent: u8) {
        self.progress.push(percent);
    }

    fn push_info(&mut self, message: &str) {
        self.infos.push(message.to_string());
    }

    fn report_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

/// A GeoPackage layer whose inserts or COMMIT fail at the store level, or
/// whose updates are all refused.
struct FlakySink<'a> {
    layer: GpkgLayer<'a>,
    fail_inserts: bool,
    fail_commit: bool,
    refuse_updates: bool,
}

impl FeatureSource for FlakySink<'_> {
    fn name(&self) -> &str {
        self.layer.name()
    }

    fn fields(&self) -> &[ColumnSpec] {
        self.layer.fields()
    }

    fn geometry_kind(&self) -> GeometryKind {
        self.layer.geometry_kind()
    }

    fn feature_count(&self) -> Result<u64> {
        self.layer.feature_count()
    }

    fn features(&self, request: &FeatureRequest) -> Result<FeatureIter<'_>> {
        self.layer.features(request)
    }
}

impl FeatureSink for FlakySink<'_> {
    fn storage_kind(&self) -> StorageKind {
        self.layer.storage_kind()
    }

    fn capabilities(&self) -> Capabilities {
        self.layer.capabilities()
    }

    fn is_multi_part(&self) -> bool {
        self.layer.is_multi_part()
    }

    fn has_z_or_m(&self) -> bool {
        self.layer.has_z_or_m()
    }

    fn is_editing(&self) -> bool {
        self.layer.is_editing()
    }

    fn begin_edit(&mut self) -> Result<()> {
        self.layer.begin_edit()
    }

    fn change_attribute_values(&mut self, id: FeatureId, values: &AttributeMap) -> Result<bool> {
        if self.refuse_updates {
            return Ok(false);
        }
        self.layer.change_attribute_values(id, values)
    }

    fn change_geometry(&mut self, id: FeatureId, geometry: Option<&Geometry<f64>>) -> Result<bool> {
        if self.refuse_updates {
            return Ok(false);
        }
        self.layer.change_geometry(id, geometry)
    }

    fn add_features(&mut self, features: &[NewFeature]) -> Result<bool> {
        if self.fail_inserts {
            return Err(AppendError::Message("disk I/O error".to_string()));
        }
        self.layer.add_features(features)
    }

    fn commit_edit(&mut self) -> Result<()> {
        if self.fail_commit {
            return Err(AppendError::Message("database is locked".to_string()));
        }
        self.layer.commit_edit()
    }

    fn rollback_edit(&mut self) -> Result<()> {
        self.layer.rollback_edit()
    }
}

fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
    polygon![
        (x: x0, y: y0),
        (x: x0 + size, y: y0),
        (x: x0 + size, y: y0 + size),
        (x: x0, y: y0 + size),
        (x: x0, y: y0),
    ]
}

fn from_wkt(wkt: &str) -> Geometry<f64> {
    let wkt = Wkt::<f64>::from_str(wkt).expect("valid wkt");
    to_geo_geometry(&wkt).expect("non-empty geometry")
}

fn parcel_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("name", ColumnType::Varchar),
        ColumnSpec::new("code", ColumnType::Integer),
    ]
}

/// A polygon layer with `name` and `code`. The n-th parcel is a 5 x 5 square
/// at x = 10 n.
fn parcels<'g>(gpkg: &'g Gpkg, layer_name: &str, rows: &[(&str, i64)]) -> Result<GpkgLayer<'g>> {
    let mut layer = gpkg.create_layer(
        layer_name,
        "geom",
        GeometryType::Polygon,
        4326,
        &parcel_columns(),
    )?;
    let batch: Vec<NewFeature> = rows
        .iter()
        .enumerate()
        .map(|(i, (name, code))| {
            NewFeature::new(Some(Geometry::Polygon(square(i as f64 * 10.0, 0.0, 5.0))))
                .with_attribute(1, *name)
                .with_attribute(2, *code)
        })
        .collect();
    layer.add_features(&batch)?;
    Ok(layer)
}

fn read_all<L: FeatureSource>(layer: &L) -> Result<Vec<Feature>> {
    layer.features(&FeatureRequest::all())?.collect()
}

fn names<L: FeatureSource>(layer: &L) -> Result<Vec<Value>> {
    Ok(read_all(layer)?
        .into_iter()
        .map(|feature| feature.attributes[1].clone())
        .collect())
}

fn on_code(action: ActionOnDuplicate) -> AppendParameters {
    AppendParameters {
        source_field: Some("code".to_string()),
        target_field: Some("code".to_string()),
        action_on_duplicate: action,
        ..Default::default()
    }
}

#[test]
fn appends_everything_on_every_run_without_comparison_fields() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1), ("b", 2), ("c", 3)])?;
    let mut target = parcels(&gpkg, "target", &[])?;

    for run in 1..=2u64 {
        let mut feedback = RecordingFeedback::default();
        let report = append_features(
            &source,
            &mut target,
            &AppendParameters::default(),
            &mut feedback,
        );
        assert_eq!(
            report,
            AppendReport {
                target: Some("target".to_string()),
                appended: Some(3),
                ..AppendReport::default()
            }
        );
        assert_eq!(target.feature_count()?, 3 * run);
        assert_eq!(feedback.progress, vec![33, 66, 100]);
        assert!(feedback.has_info(
            "APPENDED FEATURES: 3 out of 3 features from input layer were successfully appended to 'target'!"
        ));
        assert!(feedback.errors.is_empty());
    }
    Ok(())
}

#[test]
fn skips_duplicates_without_touching_the_target() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("new a", 1), ("new b", 2)])?;
    let mut target = parcels(&gpkg, "target", &[("old a", 1), ("old b", 2)])?;

    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::SkipFeature),
        &mut feedback,
    );

    assert_eq!(report.appended, Some(0));
    assert_eq!(report.skipped, Some(2));
    assert_eq!(report.updated_features, None);
    assert_eq!(report.updated_only_geometry, None);
    assert_eq!(target.feature_count()?, 2);
    assert_eq!(
        names(&target)?,
        vec![Value::from("old a"), Value::from("old b")]
    );
    assert!(feedback.has_info(
        "SKIPPED FEATURES: 2 duplicate features were skipped while copying features to 'target'!"
    ));
    assert!(feedback.has_info(
        "FINISHED WITHOUT APPENDED FEATURES: There were no features to append to 'target'."
    ));
    Ok(())
}

#[test]
fn a_skipped_feature_counts_every_matching_target_feature() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("x", 1), ("y", 9)])?;
    let mut target = parcels(&gpkg, "target", &[("t1", 1), ("t2", 1)])?;

    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::SkipFeature),
        &mut RecordingFeedback::default(),
    );
    assert_eq!(report.skipped, Some(2));
    assert_eq!(report.appended, Some(1));
    assert_eq!(target.feature_count()?, 3);
    Ok(())
}

#[test]
fn updates_every_target_feature_sharing_the_value() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("fresh", 7)])?;
    let mut target = parcels(&gpkg, "target", &[("old 1", 7), ("old 2", 7), ("other", 8)])?;

    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::UpdateExistingFeature),
        &mut feedback,
    );

    assert_eq!(report.updated_features, Some(2));
    assert_eq!(report.appended, Some(0));
    assert_eq!(report.skipped, None);
    assert_eq!(target.feature_count()?, 3);

    let features = read_all(&target)?;
    assert_eq!(features[0].attributes[1], Value::from("fresh"));
    assert_eq!(features[1].attributes[1], Value::from("fresh"));
    assert_eq!(features[2].attributes[1], Value::from("other"));
    // Geometries follow the source feature too.
    let source_square = Some(Geometry::Polygon(square(0.0, 0.0, 5.0)));
    assert_eq!(features[1].geometry, source_square);
    assert_eq!(
        features[2].geometry,
        Some(Geometry::Polygon(square(20.0, 0.0, 5.0)))
    );
    assert!(feedback.has_info(
        "UPDATED FEATURES: 2 out of 2 duplicate features were updated while copying features to 'target'!"
    ));
    Ok(())
}

#[test]
fn later_source_features_win_for_the_same_target_feature() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("first", 5), ("second", 5)])?;
    let mut target = parcels(&gpkg, "target", &[("old", 5)])?;

    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::UpdateExistingFeature),
        &mut RecordingFeedback::default(),
    );

    assert_eq!(report.updated_features, Some(1));
    assert_eq!(report.appended, Some(0));
    assert_eq!(names(&target)?, vec![Value::from("second")]);
    assert_eq!(
        read_all(&target)?[0].geometry,
        Some(Geometry::Polygon(square(10.0, 0.0, 5.0)))
    );
    Ok(())
}

#[test]
fn converts_comparison_values_between_field_types() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1), ("b", 3)])?;
    let mut target = gpkg.create_layer(
        "target",
        "geom",
        GeometryType::Polygon,
        4326,
        &[
            ColumnSpec::new("name", ColumnType::Varchar),
            ColumnSpec::new("code", ColumnType::Varchar),
        ],
    )?;
    target.add_features(&[NewFeature::new(None)
        .with_attribute(1, "text code")
        .with_attribute(2, "1")])?;

    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::SkipFeature),
        &mut feedback,
    );

    assert_eq!(report.skipped, Some(1));
    assert_eq!(report.appended, Some(1));
    let warnings = feedback
        .infos
        .iter()
        .filter(|info| info.contains("different field types"))
        .count();
    assert_eq!(warnings, 1);
    Ok(())
}

#[test]
fn unconvertible_comparison_values_are_never_duplicates() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 20240301), ("b", 1)])?;
    let mut target = gpkg.create_layer(
        "target",
        "geom",
        GeometryType::Polygon,
        4326,
        &[ColumnSpec::new("code", ColumnType::Date)],
    )?;
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date");
    target.add_features(&[NewFeature::new(None).with_attribute(1, date)])?;

    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::SkipFeature),
        &mut RecordingFeedback::default(),
    );

    assert_eq!(report.skipped, Some(0));
    assert_eq!(report.appended, Some(2));
    assert_eq!(target.feature_count()?, 3);
    Ok(())
}

#[test]
fn null_comparison_values_are_appended() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let mut source = parcels(&gpkg, "source", &[])?;
    source.add_features(&[NewFeature::new(None).with_attribute(1, "no code")])?;
    let mut target = parcels(&gpkg, "target", &[])?;
    target.add_features(&[NewFeature::new(None).with_attribute(1, "no code either")])?;

    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::SkipFeature),
        &mut RecordingFeedback::default(),
    );
    assert_eq!(report.skipped, Some(0));
    assert_eq!(report.appended, Some(1));
    Ok(())
}

#[test]
fn drops_geometries_the_target_type_cannot_hold() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let mut source = gpkg.create_layer("source", "geom", GeometryType::Polygon, 4326, &[])?;
    source.add_features(&[
        NewFeature::new(Some(from_wkt("POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))"))),
        NewFeature::new(Some(from_wkt(
            "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0), (2 2, 4 2, 4 4, 2 4, 2 2))",
        ))),
    ])?;
    let mut target = gpkg.create_layer("target", "geom", GeometryType::LineString, 4326, &[])?;

    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &AppendParameters::default(),
        &mut feedback,
    );

    assert_eq!(report.appended, Some(1));
    assert_eq!(target.feature_count()?, 1);
    assert_eq!(
        read_all(&target)?[0].geometry,
        Some(Geometry::LineString(LineString::from(vec![
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (0.0, 10.0),
            (0.0, 0.0),
        ])))
    );
    assert!(feedback.has_info("APPENDED FEATURES: 1 out of 2 features"));
    Ok(())
}

#[test]
fn refused_runs_change_nothing() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1)])?;
    let mut target = parcels(&gpkg, "target", &[("b", 2)])?;

    let params = AppendParameters {
        source_field: Some("code".to_string()),
        action_on_duplicate: ActionOnDuplicate::SkipFeature,
        ..Default::default()
    };
    let mut feedback = RecordingFeedback::default();
    let report = append_features(&source, &mut target, &params, &mut feedback);

    assert!(report.is_empty());
    assert_eq!(report.target, None);
    assert_eq!(target.feature_count()?, 1);
    assert_eq!(feedback.errors.len(), 1);
    assert!(feedback.errors[0].starts_with("WARNING:"));
    assert!(feedback.progress.is_empty());
    Ok(())
}

#[test]
fn refuses_targets_whose_coordinates_would_be_truncated() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1)])?;
    parcels(&gpkg, "target", &[])?;
    gpkg.connection().execute(
        "UPDATE gpkg_geometry_columns SET z = 1 WHERE table_name = 'target'",
        [],
    )?;
    let mut target = gpkg.open_layer("target")?;

    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &AppendParameters::default(),
        &mut feedback,
    );

    assert!(report.is_empty());
    assert_eq!(target.feature_count()?, 0);
    assert!(feedback.has_error("WARNING: the target layer 'target' stores Z or M coordinates"));
    Ok(())
}

#[test]
fn refuses_to_run_inside_an_open_edit_session() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1)])?;
    let mut target = parcels(&gpkg, "target", &[])?;

    target.begin_edit()?;
    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &AppendParameters::default(),
        &mut feedback,
    );
    assert!(report.is_empty());
    assert!(feedback.has_error("close the edit session on layer 'target'"));
    // The caller's session is left alone.
    assert!(target.is_editing());
    target.rollback_edit()?;
    assert_eq!(target.feature_count()?, 0);
    Ok(())
}

#[test]
fn identity_columns_stay_store_assigned() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let mut source = parcels(&gpkg, "source", &[])?;
    source.add_features(&[
        NewFeature::new(Some(Geometry::Polygon(square(0.0, 0.0, 1.0))))
            .with_attribute(0, 100)
            .with_attribute(1, "a")
            .with_attribute(2, 1),
        NewFeature::new(Some(Geometry::Polygon(square(5.0, 0.0, 1.0))))
            .with_attribute(0, 200)
            .with_attribute(1, "b")
            .with_attribute(2, 2),
    ])?;
    let mut target = parcels(&gpkg, "target", &[("t", 1)])?;

    let report = append_features(
        &source,
        &mut target,
        &AppendParameters::default(),
        &mut RecordingFeedback::default(),
    );
    assert_eq!(report.appended, Some(2));

    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::UpdateExistingFeature),
        &mut RecordingFeedback::default(),
    );
    // Code 1 matches the original feature and the copy of "a", code 2 the
    // copy of "b".
    assert_eq!(report.updated_features, Some(3));
    assert_eq!(report.appended, Some(0));

    let ids: Vec<FeatureId> = read_all(&target)?.iter().map(|feature| feature.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    for feature in read_all(&target)? {
        assert_eq!(feature.attributes[0], Value::Integer(feature.id));
    }
    Ok(())
}

#[test]
fn geometry_only_updates_keep_target_attributes() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("s1", 1), ("s2", 2)])?;
    let mut target = parcels(&gpkg, "target", &[])?;
    target.add_features(&[NewFeature::new(None)
        .with_attribute(0, 2)
        .with_attribute(1, "DEF")
        .with_attribute(2, 20)])?;

    let params = AppendParameters {
        source_field: Some("fid".to_string()),
        target_field: Some("fid".to_string()),
        action_on_duplicate: ActionOnDuplicate::UpdateGeometryOnly,
        ..Default::default()
    };
    let report = append_features(
        &source,
        &mut target,
        &params,
        &mut RecordingFeedback::default(),
    );

    assert_eq!(report.appended, Some(1));
    assert_eq!(report.updated_features, None);
    assert_eq!(report.updated_only_geometry, Some(1));
    assert_eq!(report.skipped, None);
    assert_eq!(target.feature_count()?, 2);

    let updated = target
        .features(&FeatureRequest::with_ids([2]))?
        .next()
        .expect("feature 2")?;
    assert_eq!(
        updated.geometry,
        Some(Geometry::Polygon(square(10.0, 0.0, 5.0)))
    );
    assert_eq!(
        updated.attributes,
        vec![Value::Integer(2), Value::from("DEF"), Value::Integer(20)]
    );
    Ok(())
}

#[test]
fn attribute_sources_update_attributes_only() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let mut source = gpkg.create_attribute_table("source", &parcel_columns())?;
    source.add_features(&[NewFeature::default()
        .with_attribute(1, "renamed")
        .with_attribute(2, 4)])?;
    let mut target = parcels(&gpkg, "target", &[("old", 4)])?;

    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::UpdateExistingFeature),
        &mut RecordingFeedback::default(),
    );

    assert_eq!(report.updated_features, Some(1));
    let features = read_all(&target)?;
    assert_eq!(features[0].attributes[1], Value::from("renamed"));
    assert_eq!(
        features[0].geometry,
        Some(Geometry::Polygon(square(0.0, 0.0, 5.0)))
    );
    Ok(())
}

#[test]
fn spatial_sources_append_into_attribute_tables() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1), ("b", 2)])?;
    let mut target = gpkg.create_attribute_table("target", &parcel_columns())?;

    let report = append_features(
        &source,
        &mut target,
        &AppendParameters::default(),
        &mut RecordingFeedback::default(),
    );
    assert_eq!(report.appended, Some(2));
    assert_eq!(names(&target)?, vec![Value::from("a"), Value::from("b")]);
    Ok(())
}

#[test]
fn cancellation_keeps_what_was_collected() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1), ("b", 2), ("c", 3)])?;
    let mut target = parcels(&gpkg, "target", &[])?;

    let mut feedback = RecordingFeedback {
        cancel_after: Some(1),
        ..RecordingFeedback::default()
    };
    let report = append_features(
        &source,
        &mut target,
        &AppendParameters::default(),
        &mut feedback,
    );

    assert_eq!(report.appended, Some(1));
    assert_eq!(names(&target)?, vec![Value::from("a")]);
    assert_eq!(feedback.progress, vec![33]);
    assert!(feedback.has_info("APPENDED FEATURES: 1 out of 3 features"));
    Ok(())
}

#[test]
fn store_errors_roll_back_the_whole_run() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("fresh", 1), ("new", 2)])?;
    parcels(&gpkg, "target", &[("old", 1)])?;
    let mut target = FlakySink {
        layer: gpkg.open_layer("target")?,
        fail_inserts: true,
        fail_commit: false,
        refuse_updates: false,
    };

    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::UpdateExistingFeature),
        &mut feedback,
    );

    assert!(report.is_empty());
    assert!(!target.is_editing());
    // The attribute update applied before the failure is gone as well.
    assert_eq!(names(&target)?, vec![Value::from("old")]);
    assert!(feedback.has_error(
        "No features could be appended/updated to/in 'target', because of the following error:\ndisk I/O error"
    ));
    Ok(())
}

#[test]
fn a_failed_commit_leaves_the_target_ready_for_the_next_run() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("fresh", 1), ("new", 2)])?;
    parcels(&gpkg, "target", &[("old", 1)])?;
    let mut target = FlakySink {
        layer: gpkg.open_layer("target")?,
        fail_inserts: false,
        fail_commit: true,
        refuse_updates: false,
    };
    let params = on_code(ActionOnDuplicate::UpdateExistingFeature);

    let mut feedback = RecordingFeedback::default();
    let report = append_features(&source, &mut target, &params, &mut feedback);

    assert!(report.is_empty());
    assert!(!target.is_editing());
    assert_eq!(names(&target)?, vec![Value::from("old")]);
    assert!(feedback.has_error("because of the following error:\ndatabase is locked"));

    target.fail_commit = false;
    let mut feedback = RecordingFeedback::default();
    let report = append_features(&source, &mut target, &params, &mut feedback);

    assert!(feedback.errors.is_empty(), "{:?}", feedback.errors);
    assert_eq!(report.updated_features, Some(1));
    assert_eq!(report.appended, Some(1));
    assert_eq!(names(&target)?, vec![Value::from("fresh"), Value::from("new")]);
    Ok(())
}

#[test]
fn refused_updates_are_reported_one_by_one() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("fresh", 1), ("new", 2)])?;
    parcels(&gpkg, "target", &[("old", 1)])?;
    let mut target = FlakySink {
        layer: gpkg.open_layer("target")?,
        fail_inserts: false,
        fail_commit: false,
        refuse_updates: true,
    };

    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &on_code(ActionOnDuplicate::UpdateExistingFeature),
        &mut feedback,
    );

    assert_eq!(report.updated_features, Some(0));
    assert_eq!(report.appended, Some(1));
    assert!(feedback.has_error(
        "ERROR: Target feature (id=1) couldn't be updated to the following attributes: {1: fresh, 2: 1}."
    ));
    assert!(feedback.has_error("ERROR: Target feature's geometry (id=1) couldn't be updated."));
    assert!(feedback.has_info(
        "UPDATED FEATURES: 0 out of 1 duplicate features were updated while copying features to 'target'!"
    ));
    assert_eq!(target.feature_count()?, 2);
    Ok(())
}

#[test]
fn rejected_insert_batches_append_nothing() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1), ("b", 2)])?;
    let mut target = gpkg.create_layer(
        "target",
        "geom",
        GeometryType::Polygon,
        4326,
        &[
            ColumnSpec::new("name", ColumnType::Varchar),
            ColumnSpec::new("owner", ColumnType::Varchar).not_null(),
        ],
    )?;

    let mut feedback = RecordingFeedback::default();
    let report = append_features(
        &source,
        &mut target,
        &AppendParameters::default(),
        &mut feedback,
    );

    assert_eq!(report.appended, Some(0));
    assert_eq!(report.target.as_deref(), Some("target"));
    assert_eq!(target.feature_count()?, 0);
    assert!(feedback.has_error(
        "ERROR: The 2 features from input layer could not be appended to 'target'. Sometimes this might be due to NOT NULL constraints that are not met."
    ));
    Ok(())
}

#[test]
fn appended_polygons_avoid_configured_layers() -> Result<()> {
    let gpkg = Gpkg::new_in_memory()?;
    let source = parcels(&gpkg, "source", &[("a", 1)])?;
    let mut target = parcels(&gpkg, "target", &[])?;
    let mut protected = gpkg.create_layer("protected", "geom", GeometryType::Polygon, 4326, &[])?;
    protected.add_features(&[
        NewFeature::new(Some(Geometry::Polygon(square(-5.0, -5.0, 7.5)))),
        NewFeature::new(Some(from_wkt("LINESTRING (0 0, 5 5)"))),
    ])?;

    let avoid = AvoidIntersectionLayer::from_layer(&protected)?;
    assert_eq!(avoid.name, "protected");
    assert_eq!(avoid.polygons.0.len(), 1);

    let params = AppendParameters {
        avoid_intersections: vec![avoid],
        ..Default::default()
    };
    let report = append_features(
        &source,
        &mut target,
        &params,
        &mut RecordingFeedback::default(),
    );
    assert_eq!(report.appended, Some(1));

    let geometry = read_all(&target)?[0].geometry.clone().expect("geometry");
    assert!(matches!(geometry, Geometry::Polygon(_)));
    assert!((geometry.unsigned_area() - 18.75).abs() < 1e-9);
    Ok(())
}

#[test]
fn parses_actions_from_names_and_codes() {
    assert_eq!(
        ActionOnDuplicate::from_str("skip").ok(),
        Some(ActionOnDuplicate::SkipFeature)
    );
    assert_eq!(
        ActionOnDuplicate::from_str("Update-Existing-Feature").ok(),
        Some(ActionOnDuplicate::UpdateExistingFeature)
    );
    assert_eq!(
        ActionOnDuplicate::from_str("3").ok(),
        Some(ActionOnDuplicate::UpdateGeometryOnly)
    );
    assert_eq!(
        ActionOnDuplicate::from_str(" 0 ").ok(),
        Some(ActionOnDuplicate::NoAction)
    );
    assert!(ActionOnDuplicate::from_str("merge").is_err());
    assert_eq!(ActionOnDuplicate::UpdateGeometryOnly.to_string(), "update_geometry_only");
}

#[cfg(feature = "cli")]
#[test]
fn reads_parameters_from_toml() {
    let params: AppendParameters = toml::from_str(
        r#"
            source_field = "code"
            target_field = "parcel_code"
            action_on_duplicate = "update"
        "#,
    )
    .expect("valid parameters");
    assert_eq!(params.source_field.as_deref(), Some("code"));
    assert_eq!(params.target_field.as_deref(), Some("parcel_code"));
    assert_eq!(
        params.action_on_duplicate,
        ActionOnDuplicate::UpdateExistingFeature
    );
    assert!(params.avoid_intersections.is_empty());

    let defaults: AppendParameters = toml::from_str("").expect("empty parameters");
    assert_eq!(defaults.action_on_duplicate, ActionOnDuplicate::NoAction);

    assert!(toml::from_str::<AppendParameters>("unknown = 1").is_err());
}
