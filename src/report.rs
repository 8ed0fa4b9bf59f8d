//! Error taxonomy and batch report types for bulk upload validation.
//!
//! Every error the pipeline can emit is one of a closed set of kinds, so the
//! report-rendering boundary can match exhaustively. The wire shape of a
//! single error is `{ type, sheet, row, field, message }` with `row` either a
//! 1-based source row number or the literal string `"N/A"` for violations
//! that concern a parent as a whole.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::workbook::RawRow;

/// Closed set of error kinds emitted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "MISSING_SHEET")]
    MissingSheet,
    #[serde(rename = "MISSING_COLUMN")]
    MissingColumn,
    #[serde(rename = "RELATIONAL_INTEGRITY")]
    RelationalIntegrity,
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "DUPLICATE_ERROR")]
    Duplicate,
    #[serde(rename = "STRUCTURE_VALIDATION_FAILED")]
    StructureValidationFailed,
    #[serde(rename = "PARSE_ERROR")]
    Parse,
}

impl ErrorKind {
    /// Stable wire string, also used as the error-breakdown histogram key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingSheet => "MISSING_SHEET",
            ErrorKind::MissingColumn => "MISSING_COLUMN",
            ErrorKind::RelationalIntegrity => "RELATIONAL_INTEGRITY",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Duplicate => "DUPLICATE_ERROR",
            ErrorKind::StructureValidationFailed => "STRUCTURE_VALIDATION_FAILED",
            ErrorKind::Parse => "PARSE_ERROR",
        }
    }
}

/// Source row a violation points at. `NotApplicable` covers whole-parent
/// violations (e.g. "must have exactly one primary address").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRef {
    Row(u32),
    NotApplicable,
}

impl Serialize for RowRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RowRef::Row(n) => serializer.serialize_u32(*n),
            RowRef::NotApplicable => serializer.serialize_str("N/A"),
        }
    }
}

/// A single row-addressable unit of validation feedback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub sheet: String,
    pub row: RowRef,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn missing_sheet(sheet: &str) -> Self {
        Self {
            kind: ErrorKind::MissingSheet,
            sheet: sheet.to_string(),
            row: RowRef::NotApplicable,
            field: "N/A".to_string(),
            message: format!("Required sheet '{}' is missing from the workbook", sheet),
        }
    }

    pub fn missing_column(sheet: &str, column: &str) -> Self {
        Self {
            kind: ErrorKind::MissingColumn,
            sheet: sheet.to_string(),
            row: RowRef::NotApplicable,
            field: column.to_string(),
            message: format!("Required column '{}' is missing from sheet '{}'", column, sheet),
        }
    }

    pub fn relational(sheet: &str, row: u32, field: &str, message: String) -> Self {
        Self {
            kind: ErrorKind::RelationalIntegrity,
            sheet: sheet.to_string(),
            row: RowRef::Row(row),
            field: field.to_string(),
            message,
        }
    }

    pub fn validation(sheet: &str, row: RowRef, field: &str, message: String) -> Self {
        Self {
            kind: ErrorKind::Validation,
            sheet: sheet.to_string(),
            row,
            field: field.to_string(),
            message,
        }
    }

    pub fn duplicate(sheet: &str, row: u32, field: &str, message: String) -> Self {
        Self {
            kind: ErrorKind::Duplicate,
            sheet: sheet.to_string(),
            row: RowRef::Row(row),
            field: field.to_string(),
            message,
        }
    }
}

/// One fully assembled parent record with its child rows grouped by relation
/// sheet. Carries the original data so invalid entities can be rendered next
/// to their errors.
#[derive(Debug, Clone, Serialize)]
pub struct ImportEntity {
    pub reference_id: String,
    pub record: RawRow,
    pub children: BTreeMap<String, Vec<RawRow>>,
}

/// An entity that failed validation, with every accumulated error.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidEntity {
    pub entity: ImportEntity,
    pub errors: Vec<ValidationError>,
}

/// Batch totals. `valid_count + invalid_count == total` always holds.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub error_breakdown: BTreeMap<&'static str, usize>,
}

/// Final report handed back to the caller. Deterministic for a given input:
/// no timestamps or generated ids live here (the HTTP envelope adds those).
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub template: String,
    pub source_file: String,
    pub content_hash: String,
    pub valid: Vec<ImportEntity>,
    pub invalid: Vec<InvalidEntity>,
    /// Relational errors whose Reference ID matched no parent row at all.
    /// Surfaced here so orphaned child rows are never silently dropped.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unmatched_references: Vec<ValidationError>,
    pub summary: Summary,
}

/// Partition validated entities into valid/invalid buckets and tally the
/// error-type histogram. Single pass; a parent with three errors of one kind
/// contributes three to that bucket.
pub fn aggregate(
    template: &str,
    source_file: &str,
    content_hash: String,
    results: Vec<(ImportEntity, Vec<ValidationError>)>,
    unmatched_references: Vec<ValidationError>,
) -> BatchReport {
    let total = results.len();
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    let mut error_breakdown: BTreeMap<&'static str, usize> = BTreeMap::new();

    for (entity, errors) in results {
        if errors.is_empty() {
            valid.push(entity);
        } else {
            for e in &errors {
                *error_breakdown.entry(e.kind.as_str()).or_insert(0) += 1;
            }
            invalid.push(InvalidEntity { entity, errors });
        }
    }

    for e in &unmatched_references {
        *error_breakdown.entry(e.kind.as_str()).or_insert(0) += 1;
    }

    let summary = Summary {
        total,
        valid_count: valid.len(),
        invalid_count: invalid.len(),
        error_breakdown,
    };

    BatchReport {
        template: template.to_string(),
        source_file: source_file.to_string(),
        content_hash,
        valid,
        invalid,
        unmatched_references,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(reference_id: &str) -> ImportEntity {
        ImportEntity {
            reference_id: reference_id.to_string(),
            record: RawRow {
                row: 2,
                fields: BTreeMap::new(),
            },
            children: BTreeMap::new(),
        }
    }

    #[test]
    fn test_error_wire_shape() {
        let err = ValidationError::validation(
            "Driver_Basic_Info",
            RowRef::Row(4),
            "Full_Name",
            "Full_Name must be at least 2 characters".to_string(),
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "VALIDATION_ERROR");
        assert_eq!(json["sheet"], "Driver_Basic_Info");
        assert_eq!(json["row"], 4);
        assert_eq!(json["field"], "Full_Name");
    }

    #[test]
    fn test_whole_parent_row_serializes_as_na() {
        let err = ValidationError::validation(
            "Driver_Addresses",
            RowRef::NotApplicable,
            "Is_Primary",
            "exactly one primary address required".to_string(),
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["row"], "N/A");
    }

    #[test]
    fn test_aggregate_partitions_every_entity() {
        let results = vec![
            (entity("D1"), vec![]),
            (
                entity("D2"),
                vec![ValidationError::validation(
                    "s",
                    RowRef::Row(3),
                    "f",
                    "bad".to_string(),
                )],
            ),
            (entity("D3"), vec![]),
        ];
        let report = aggregate("driver", "drivers.xlsx", "abc".to_string(), results, vec![]);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.valid_count, 2);
        assert_eq!(report.summary.invalid_count, 1);
        assert_eq!(
            report.summary.valid_count + report.summary.invalid_count,
            report.summary.total
        );
    }

    #[test]
    fn test_histogram_counts_instances_not_entities() {
        let errors = vec![
            ValidationError::validation("s", RowRef::Row(2), "a", "x".to_string()),
            ValidationError::validation("s", RowRef::Row(2), "b", "y".to_string()),
            ValidationError::duplicate("s", 2, "Phone_Number", "taken".to_string()),
        ];
        let report = aggregate(
            "driver",
            "drivers.xlsx",
            "abc".to_string(),
            vec![(entity("D1"), errors)],
            vec![],
        );
        assert_eq!(report.summary.error_breakdown["VALIDATION_ERROR"], 2);
        assert_eq!(report.summary.error_breakdown["DUPLICATE_ERROR"], 1);
    }

    #[test]
    fn test_unmatched_references_counted_in_breakdown() {
        let orphan = ValidationError::relational(
            "Driver_Addresses",
            5,
            "Driver_Ref_ID",
            "no parent declares 'D999'".to_string(),
        );
        let report = aggregate(
            "driver",
            "drivers.xlsx",
            "abc".to_string(),
            vec![(entity("D1"), vec![])],
            vec![orphan],
        );
        assert_eq!(report.summary.error_breakdown["RELATIONAL_INTEGRITY"], 1);
        assert_eq!(report.unmatched_references.len(), 1);
        // Orphans do not shift the entity partition
        assert_eq!(report.summary.valid_count, 1);
        assert_eq!(report.summary.invalid_count, 0);
    }
}
