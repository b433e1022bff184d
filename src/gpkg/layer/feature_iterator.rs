use crate::Result;
use crate::ogc_sql::RowFilter;
use crate::store::{Feature, FeatureId, FeatureRequest};
use rusqlite::OptionalExtension;

use super::GpkgLayer;

const PAGE_SIZE: u32 = 1000;

/// Iterator over the features of a [`GpkgLayer`].
///
/// Rows are fetched in pages of `PAGE_SIZE` keyed on the primary key, so the
/// whole layer is never held in memory. With an identifier list, each
/// identifier is looked up in turn and unknown ones are skipped.
pub struct GpkgFeatureIterator<'l, 'a> {
    layer: &'l GpkgLayer<'a>,
    /// Identifier lookup, or the following pages of a scan.
    sql: String,
    /// Empty with an identifier list.
    first_page_sql: String,
    with_geometry: bool,
    ids: Option<std::vec::IntoIter<FeatureId>>,
    buffer: std::vec::IntoIter<Feature>,
    last_id: Option<FeatureId>,
    end_or_invalid_state: bool,
}

impl<'l, 'a> GpkgFeatureIterator<'l, 'a> {
    pub(super) fn new(layer: &'l GpkgLayer<'a>, request: &FeatureRequest) -> Self {
        let with_geometry = request.wants_geometry();
        let (sql, first_page_sql) = if request.ids().is_some() {
            (layer.select_sql(with_geometry, RowFilter::ById), String::new())
        } else {
            (
                layer.select_sql(with_geometry, RowFilter::NextPage),
                layer.select_sql(with_geometry, RowFilter::FirstPage),
            )
        };

        Self {
            layer,
            sql,
            first_page_sql,
            with_geometry,
            ids: request.ids().map(|ids| ids.to_vec().into_iter()),
            buffer: Vec::new().into_iter(),
            last_id: None,
            end_or_invalid_state: false,
        }
    }

    fn fetch(&mut self) -> Result<()> {
        let layer = self.layer;
        let with_geometry = self.with_geometry;
        let to_feature = |row: &rusqlite::Row<'_>| layer.row_to_feature(row, with_geometry);

        let sql = match (&self.ids, self.last_id) {
            (None, None) => &self.first_page_sql,
            _ => &self.sql,
        };
        let mut stmt = layer.connection().prepare_cached(sql)?;

        let features: Vec<Feature> = match self.ids.as_mut() {
            Some(ids) => {
                let Some(id) = ids.next() else {
                    self.end_or_invalid_state = true;
                    return Ok(());
                };
                stmt.query_row([id], to_feature)
                    .optional()?
                    .into_iter()
                    .collect()
            }
            None => {
                let features = match self.last_id {
                    Some(last_id) => stmt
                        .query_map(rusqlite::params![last_id, PAGE_SIZE], to_feature)?
                        .collect::<rusqlite::Result<Vec<Feature>>>()?,
                    None => stmt
                        .query_map([PAGE_SIZE], to_feature)?
                        .collect::<rusqlite::Result<Vec<Feature>>>()?,
                };

                // A short page means we reached the end.
                if features.len() < PAGE_SIZE as usize {
                    self.end_or_invalid_state = true;
                }
                if let Some(last) = features.last() {
                    self.last_id = Some(last.id);
                }
                features
            }
        };

        self.buffer = features.into_iter();
        Ok(())
    }
}

impl Iterator for GpkgFeatureIterator<'_, '_> {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(feature) = self.buffer.next() {
                return Some(Ok(feature));
            }
            if self.end_or_invalid_state {
                return None;
            }
            if let Err(err) = self.fetch() {
                // Not recoverable: stop after reporting it.
                self.end_or_invalid_state = true;
                return Some(Err(err));
            }
        }
    }
}
