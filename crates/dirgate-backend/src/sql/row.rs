//! Row shaping: column coercion and grouping of rows into entries

use crate::traits::QueryResult;
use sqlx::any::AnyRow;
use sqlx::{Column, Row};

/// How result columns relate to the projected LDAP attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// `%s` was replaced by the column list; columns map back by position
    Template,
    /// Columns are already named after LDAP attributes
    Aliased,
}

/// Collects rows into one [`QueryResult`] per distinct RDN value
pub(super) struct RowCollector<'a> {
    rdn_attribute: &'a str,
    projected: &'a [String],
    projection: Projection,
    /// Column index -> index into `projected`, resolved from the first row
    columns: Option<Vec<(usize, usize)>>,
    entries: Vec<(String, QueryResult)>,
}

impl<'a> RowCollector<'a> {
    pub(super) fn new(rdn_attribute: &'a str, projected: &'a [String], projection: Projection) -> Self {
        Self {
            rdn_attribute,
            projected,
            projection,
            columns: None,
            entries: Vec::new(),
        }
    }

    pub(super) fn add(&mut self, row: &AnyRow) -> Result<(), sqlx::Error> {
        if self.columns.is_none() {
            self.columns = Some(self.resolve_columns(row));
        }
        let columns = self.columns.as_deref().unwrap_or_default();

        let mut values = Vec::with_capacity(columns.len());
        for &(column, attribute) in columns {
            values.push((attribute, column_text(row, column)?));
        }

        let key = values
            .iter()
            .find(|(attribute, value)| {
                value.is_some() && self.projected[*attribute].eq_ignore_ascii_case(self.rdn_attribute)
            })
            .and_then(|(_, value)| value.clone())
            .unwrap_or_default();

        let index = match self.entries.iter().position(|(existing, _)| *existing == key) {
            Some(index) => index,
            None => {
                self.entries.push((key, QueryResult::new()));
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index].1;

        for (attribute, value) in values {
            let name = self.projected[attribute].as_str();
            match value {
                Some(value) => entry.push(name, value),
                None => {
                    entry.touch(name);
                }
            }
        }

        Ok(())
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(super) fn finish(self) -> Vec<QueryResult> {
        self.entries.into_iter().map(|(_, entry)| entry).collect()
    }

    fn resolve_columns(&self, row: &AnyRow) -> Vec<(usize, usize)> {
        match self.projection {
            Projection::Template => (0..row.len().min(self.projected.len()))
                .map(|i| (i, i))
                .collect(),
            Projection::Aliased => row
                .columns()
                .iter()
                .filter_map(|column| {
                    self.projected
                        .iter()
                        .position(|name| name.eq_ignore_ascii_case(column.name()))
                        .map(|attribute| (column.ordinal(), attribute))
                })
                .collect(),
        }
    }
}

/// Render a column as text. `NULL` yields `None`; blobs are decoded as lossy UTF-8.
pub(super) fn column_text(row: &AnyRow, index: usize) -> Result<Option<String>, sqlx::Error> {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<i16>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<f32>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }

    row.try_get::<Option<Vec<u8>>, _>(index)
        .map(|value| value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}
