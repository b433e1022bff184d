use crate::error::Result;
use crate::store::{FeatureId, FeatureRequest, FeatureSource};
use crate::types::ColumnType;
use crate::value::{Value, try_convert};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

use super::validate::Comparison;

/// Hashable form of a comparison value.
///
/// Reals are keyed by bit pattern, so equality is exact. `Null` and NaN have
/// no key and never match anything.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum IndexKey {
    Integer(i64),
    Real(u64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Blob(Vec<u8>),
}

impl IndexKey {
    fn new(value: &Value) -> Option<Self> {
        let key = match value {
            Value::Null => return None,
            Value::Real(v) if v.is_nan() => return None,
            // -0.0 == 0.0
            Value::Real(v) if *v == 0.0 => Self::Real(0.0f64.to_bits()),
            Value::Real(v) => Self::Real(v.to_bits()),
            Value::Integer(v) => Self::Integer(*v),
            Value::Text(v) => Self::Text(v.clone()),
            Value::Boolean(v) => Self::Boolean(*v),
            Value::Date(v) => Self::Date(*v),
            Value::DateTime(v) => Self::DateTime(*v),
            Value::Blob(v) => Self::Blob(v.clone()),
        };
        Some(key)
    }
}

/// Target comparison values and the identifiers of the features holding
/// them, in the order the target returned them.
///
/// Built once per run and never updated afterwards, so features appended by
/// the run itself are not seen as duplicates.
#[derive(Debug)]
pub(crate) struct DuplicateIndex {
    ids: HashMap<IndexKey, Vec<FeatureId>>,
    source_index: usize,
    /// Set when source values must be converted before lookup.
    convert_to: Option<ColumnType>,
}

impl DuplicateIndex {
    pub fn build<T: FeatureSource + ?Sized>(target: &T, comparison: Comparison) -> Result<Self> {
        let mut ids: HashMap<IndexKey, Vec<FeatureId>> = HashMap::new();
        let mut scanned = 0u64;
        for feature in target.features(&FeatureRequest::all().no_geometry())? {
            let feature = feature?;
            scanned += 1;
            if let Some(key) = feature
                .attribute(comparison.target_index)
                .and_then(IndexKey::new)
            {
                ids.entry(key).or_default().push(feature.id);
            }
        }

        tracing::debug!(
            target_layer = target.name(),
            scanned,
            distinct_values = ids.len(),
            "built duplicate index"
        );
        Ok(Self {
            ids,
            source_index: comparison.source_index,
            convert_to: comparison
                .types_differ()
                .then_some(comparison.target_type),
        })
    }

    /// Target identifiers whose comparison value equals `value`.
    ///
    /// When the field types differ, `value` is first converted to the target
    /// type. A value that cannot be converted has no duplicates.
    pub fn lookup(&self, value: &Value) -> Option<&[FeatureId]> {
        let key = match self.convert_to {
            None => IndexKey::new(value)?,
            Some(column_type) => IndexKey::new(&try_convert(value, column_type)?)?,
        };
        self.ids.get(&key).map(Vec::as_slice)
    }

    /// Source attribute position holding the comparison value.
    pub fn source_index(&self) -> usize {
        self.source_index
    }
}

#[cfg(test)]
mod tests {
    use super::{DuplicateIndex, IndexKey};
    use crate::append::validate::Comparison;
    use crate::gpkg::Gpkg;
    use crate::store::{FeatureSink, NewFeature};
    use crate::types::{ColumnSpec, ColumnType};
    use crate::value::Value;
    use chrono::NaiveDate;

    #[test]
    fn keys_compare_exactly() {
        assert_eq!(IndexKey::new(&Value::Real(-0.0)), IndexKey::new(&Value::Real(0.0)));
        assert_ne!(
            IndexKey::new(&Value::Real(0.1 + 0.2)),
            IndexKey::new(&Value::Real(0.3))
        );
        assert_eq!(IndexKey::new(&Value::Real(f64::NAN)), None);
        assert_eq!(IndexKey::new(&Value::Null), None);
    }

    fn target_with_codes(gpkg: &Gpkg, codes: &[Value]) -> crate::Result<()> {
        let mut target =
            gpkg.create_attribute_table("target", &[ColumnSpec::new("code", ColumnType::Varchar)])?;
        let batch: Vec<NewFeature> = codes
            .iter()
            .map(|code| NewFeature::new(None).with_attribute(1, code.clone()))
            .collect();
        target.add_features(&batch)?;
        Ok(())
    }

    #[test]
    fn groups_identifiers_by_value() -> crate::Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        target_with_codes(
            &gpkg,
            &[
                Value::from("a"),
                Value::from("b"),
                Value::from("a"),
                Value::Null,
            ],
        )?;
        let target = gpkg.open_layer("target")?;

        let index = DuplicateIndex::build(
            &target,
            Comparison {
                source_index: 1,
                source_type: ColumnType::Varchar,
                target_index: 1,
                target_type: ColumnType::Varchar,
            },
        )?;
        assert_eq!(index.lookup(&Value::from("a")), Some(&[1, 3][..]));
        assert_eq!(index.lookup(&Value::from("b")), Some(&[2][..]));
        assert_eq!(index.lookup(&Value::from("c")), None);
        assert_eq!(index.lookup(&Value::Null), None);
        Ok(())
    }

    #[test]
    fn converts_source_values_when_types_differ() -> crate::Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        target_with_codes(&gpkg, &[Value::from("42"), Value::from("2024-03-01")])?;
        let target = gpkg.open_layer("target")?;

        let from_integer = DuplicateIndex::build(
            &target,
            Comparison {
                source_index: 1,
                source_type: ColumnType::Integer,
                target_index: 1,
                target_type: ColumnType::Varchar,
            },
        )?;
        assert_eq!(from_integer.lookup(&Value::Integer(42)), Some(&[1][..]));
        assert_eq!(from_integer.lookup(&Value::Integer(7)), None);

        let from_date = DuplicateIndex::build(
            &target,
            Comparison {
                source_index: 1,
                source_type: ColumnType::Date,
                target_index: 1,
                target_type: ColumnType::Varchar,
            },
        )?;
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date");
        assert_eq!(from_date.lookup(&Value::Date(date)), Some(&[2][..]));
        Ok(())
    }
}
