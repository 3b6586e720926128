//! Row → per-model record routing.

use std::collections::HashMap;

use crate::inference::ClassifyOptions;
use crate::types::{FieldType, Model, Record, Row};

use super::parse::parse_value;

/// One extracted row split into a record per target model.
///
/// Entries are `(model index, record)`, ordered by model index.
pub type RoutedRow = Vec<(usize, Record)>;

/// Maps source columns to the model fields they feed.
///
/// Built once when the model set is final, so routing a row is a hash lookup per column rather
/// than a scan over every model.
#[derive(Debug, Clone)]
pub struct FieldRouter {
    routes: HashMap<String, Vec<Route>>,
    model_count: usize,
    formats: ClassifyOptions,
}

#[derive(Debug, Clone)]
struct Route {
    model: usize,
    name: String,
    field_type: FieldType,
}

impl FieldRouter {
    pub fn new(models: &[Model], formats: ClassifyOptions) -> Self {
        let mut routes: HashMap<String, Vec<Route>> = HashMap::new();
        for (model, m) in models.iter().enumerate() {
            for field in &m.fields {
                if let Some(source) = &field.source_column {
                    routes.entry(source.clone()).or_default().push(Route {
                        model,
                        name: field.name.clone(),
                        field_type: field.field_type,
                    });
                }
            }
        }
        Self {
            routes,
            model_count: models.len(),
            formats,
        }
    }

    /// Number of distinct source columns with at least one destination.
    pub fn routed_columns(&self) -> usize {
        self.routes.len()
    }

    /// Transform `row` into typed records.
    ///
    /// Columns without a modeled field are ignored. Returns `None` when no column of the row maps
    /// to any field (an empty or malformed row).
    pub fn route(&self, row: &Row) -> Option<RoutedRow> {
        let mut per_model: Vec<Option<Record>> = vec![None; self.model_count];

        for (column, raw) in row {
            let Some(targets) = self.routes.get(column) else { continue };
            for route in targets {
                let value = parse_value(raw, route.field_type, &self.formats);
                per_model[route.model]
                    .get_or_insert_with(Record::new)
                    .insert(route.name.clone(), value);
            }
        }

        let routed: RoutedRow = per_model
            .into_iter()
            .enumerate()
            .filter_map(|(mi, record)| record.map(|r| (mi, r)))
            .collect();

        if routed.is_empty() { None } else { Some(routed) }
    }
}
