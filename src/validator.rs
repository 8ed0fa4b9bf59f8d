//! Entity assembly and per-entity validation.
//!
//! Parent rows become [`ImportEntity`]s with their child rows grouped by
//! relation sheet, then every field group runs to completion: a failure in
//! one group never suppresses checks in another. An entity ends up with
//! either zero errors (valid) or the full accumulated list (invalid), never
//! a partial report.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::config::{Cardinality, CompiledTemplate, RelationSpec};
use crate::directory::{ContactIndex, ContactKind};
use crate::report::{ImportEntity, RowRef, ValidationError};
use crate::rules::{run_rule, CompiledFieldRule};
use crate::workbook::ParsedWorkbook;

/// Group parent and child rows into entities.
///
/// The first row declaring a Reference ID owns it: children attach there.
/// Every later row with the same ID becomes its own entity carrying a
/// seed error on the reference column, with no children attached. A parent
/// row with a blank Reference ID is still built (and fails the reference
/// column's required rule downstream).
pub fn assemble_entities(
    workbook: &ParsedWorkbook,
    template: &CompiledTemplate,
) -> Vec<(ImportEntity, Vec<ValidationError>)> {
    let parent = &template.template.parent;
    let parent_sheet = match workbook.sheet(&parent.sheet) {
        Some(s) => s,
        None => return Vec::new(),
    };

    let mut entities: Vec<(ImportEntity, Vec<ValidationError>)> = Vec::new();
    // Reference ID -> (entity index, declaring row) for the first occurrence.
    let mut declared: HashMap<String, (usize, u32)> = HashMap::new();

    for row in &parent_sheet.rows {
        let reference_id = row
            .get(&parent.reference_column)
            .unwrap_or_default()
            .to_string();
        let mut seeds = Vec::new();

        if !reference_id.is_empty() {
            match declared.get(&reference_id) {
                Some((_, first_row)) => seeds.push(ValidationError::validation(
                    &parent.sheet,
                    RowRef::Row(row.row),
                    &parent.reference_column,
                    format!(
                        "Duplicate Reference ID '{}'; first declared at row {}",
                        reference_id, first_row
                    ),
                )),
                None => {
                    declared.insert(reference_id.clone(), (entities.len(), row.row));
                }
            }
        }

        entities.push((
            ImportEntity {
                reference_id,
                record: row.clone(),
                children: BTreeMap::new(),
            },
            seeds,
        ));
    }

    for relation in &template.template.relations {
        let sheet = match workbook.sheet(&relation.sheet) {
            Some(s) => s,
            None => continue,
        };
        for row in &sheet.rows {
            let reference = match row.get(&relation.reference_column) {
                Some(r) => r,
                None => continue,
            };
            if let Some((index, _)) = declared.get(reference) {
                entities[*index]
                    .0
                    .children
                    .entry(relation.sheet.clone())
                    .or_default()
                    .push(row.clone());
            }
        }
    }

    debug!(
        "Assembled {} entities from sheet '{}'",
        entities.len(),
        parent.sheet
    );
    entities
}

/// Run every field group for one entity and return the accumulated errors.
pub fn validate_entity(
    entity: &ImportEntity,
    template: &CompiledTemplate,
    existing: &ContactIndex,
    today: NaiveDate,
) -> Vec<ValidationError> {
    let parent = &template.template.parent;
    let mut errors = Vec::new();

    for rule in &template.parent_rules {
        errors.extend(run_rule(rule, &entity.record, &parent.sheet, existing, today));
    }

    for (relation, rules) in template
        .template
        .relations
        .iter()
        .zip(&template.relation_rules)
    {
        validate_relation(entity, relation, rules, existing, today, &mut errors);
    }

    errors
}

fn validate_relation(
    entity: &ImportEntity,
    relation: &RelationSpec,
    rules: &[CompiledFieldRule],
    existing: &ContactIndex,
    today: NaiveDate,
    errors: &mut Vec<ValidationError>,
) {
    let rows = entity
        .children
        .get(&relation.sheet)
        .map(|r| r.as_slice())
        .unwrap_or(&[]);

    match relation.cardinality {
        Cardinality::Any => {}
        Cardinality::AtLeastOne => {
            if rows.is_empty() {
                errors.push(ValidationError::validation(
                    &relation.sheet,
                    RowRef::NotApplicable,
                    &relation.sheet,
                    format!("At least one row in '{}' is required", relation.sheet),
                ));
            }
        }
        Cardinality::ExactlyOne => {
            if rows.is_empty() {
                errors.push(ValidationError::validation(
                    &relation.sheet,
                    RowRef::NotApplicable,
                    &relation.sheet,
                    format!("Exactly one row in '{}' is required; found none", relation.sheet),
                ));
            } else if rows.len() > 1 {
                errors.push(ValidationError::validation(
                    &relation.sheet,
                    RowRef::NotApplicable,
                    &relation.sheet,
                    format!(
                        "Exactly one row in '{}' is required; found {}",
                        relation.sheet,
                        rows.len()
                    ),
                ));
            }
        }
    }

    if let Some(primary_column) = &relation.primary_column {
        if !rows.is_empty() {
            let primaries = rows
                .iter()
                .filter(|row| is_truthy(row.get(primary_column)))
                .count();
            if primaries == 0 {
                errors.push(ValidationError::validation(
                    &relation.sheet,
                    RowRef::NotApplicable,
                    primary_column,
                    format!("Exactly one row in '{}' must be marked primary; none are", relation.sheet),
                ));
            } else if primaries > 1 {
                errors.push(ValidationError::validation(
                    &relation.sheet,
                    RowRef::NotApplicable,
                    primary_column,
                    format!(
                        "Exactly one row in '{}' must be marked primary; found {}",
                        relation.sheet, primaries
                    ),
                ));
            }
        }
    }

    for row in rows {
        for rule in rules {
            errors.extend(run_rule(rule, row, &relation.sheet, existing, today));
        }
    }

    if !relation.dedup_columns.is_empty() {
        let mut seen: HashSet<Vec<&str>> = HashSet::new();
        for row in rows {
            // Rows missing part of the key are handled by the per-row
            // required checks, not flagged as duplicates of each other.
            let key: Option<Vec<&str>> = relation
                .dedup_columns
                .iter()
                .map(|c| row.get(c))
                .collect();
            let Some(key) = key else { continue };
            if !seen.insert(key.clone()) {
                errors.push(ValidationError::validation(
                    &relation.sheet,
                    RowRef::Row(row.row),
                    &relation.dedup_columns.join("+"),
                    format!(
                        "Duplicate ({}) combination ({})",
                        relation.dedup_columns.join(", "),
                        key.join(", ")
                    ),
                ));
            }
        }
    }
}

/// Well-formed phone/email values to test against the persisted store, in
/// one batch for the whole upload. Malformed values are excluded: they
/// already fail their pattern check and must not report a duplicate too.
pub fn collect_contacts(
    entities: &[(ImportEntity, Vec<ValidationError>)],
    template: &CompiledTemplate,
) -> (Vec<String>, Vec<String>) {
    let mut phones: HashSet<String> = HashSet::new();
    let mut emails: HashSet<String> = HashSet::new();

    for rule in &template.parent_rules {
        let Some(kind) = rule.unique_kind() else { continue };
        for (entity, _) in entities {
            let Some(value) = entity.record.get(&rule.field) else {
                continue;
            };
            if !rule.is_well_formed(value) {
                continue;
            }
            match kind {
                ContactKind::Phone => phones.insert(value.to_string()),
                ContactKind::Email => emails.insert(value.to_string()),
            };
        }
    }

    let mut phones: Vec<String> = phones.into_iter().collect();
    let mut emails: Vec<String> = emails.into_iter().collect();
    phones.sort();
    emails.sort();
    (phones, emails)
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("yes") | Some("y") | Some("true") | Some("1")
    )
}
