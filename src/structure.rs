//! Structural validation gate.
//!
//! Runs before any row-level work. Phase 1 confirms every required sheet is
//! present; Phase 2 confirms every required column is present in each
//! sheet's header row. Phase 2 only runs once Phase 1 passes, since column
//! checks on a missing sheet are meaningless. Any non-empty result aborts
//! the pipeline.

use crate::config::CompiledTemplate;
use crate::report::ValidationError;
use crate::workbook::ParsedWorkbook;

/// Validate sheet and column presence. Empty result means proceed.
pub fn validate_structure(
    workbook: &ParsedWorkbook,
    template: &CompiledTemplate,
) -> Vec<ValidationError> {
    // Phase 1: required sheets. Sheet names are exact matches.
    let missing_sheets: Vec<ValidationError> = template
        .required_sheets()
        .iter()
        .filter(|name| workbook.sheet(name).is_none())
        .map(|name| ValidationError::missing_sheet(name))
        .collect();

    if !missing_sheets.is_empty() {
        return missing_sheets;
    }

    // Phase 2: required columns per sheet.
    let mut errors = Vec::new();
    for sheet_name in template.required_sheets() {
        let sheet = match workbook.sheet(sheet_name) {
            Some(s) => s,
            None => continue,
        };
        for column in template.required_columns(sheet_name) {
            if !sheet.headers.iter().any(|h| h == column) {
                errors.push(ValidationError::missing_column(sheet_name, column));
            }
        }
    }

    errors
}
