//! Batch-local referential integrity.
//!
//! Every child row's Reference ID must resolve to a parent row declared in
//! the same workbook. Dangling references are emitted in child-row order,
//! child sheets processed in template order, keyed by the dangling ID so the
//! pipeline can merge them into the owning entity's error list (or surface
//! them as unmatched when no such parent exists). Rows whose reference cell
//! is null are not the integrity checker's concern.

use std::collections::{BTreeMap, HashSet};

use crate::config::CompiledTemplate;
use crate::report::ValidationError;
use crate::workbook::ParsedWorkbook;

/// Map from Reference ID to the integrity errors attributed to it.
pub fn check_references(
    workbook: &ParsedWorkbook,
    template: &CompiledTemplate,
) -> BTreeMap<String, Vec<ValidationError>> {
    let parent = &template.template.parent;

    let declared: HashSet<&str> = workbook
        .sheet(&parent.sheet)
        .map(|sheet| {
            sheet
                .rows
                .iter()
                .filter_map(|row| row.get(&parent.reference_column))
                .collect()
        })
        .unwrap_or_default();

    let mut errors: BTreeMap<String, Vec<ValidationError>> = BTreeMap::new();

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
            if !declared.contains(reference) {
                errors.entry(reference.to_string()).or_default().push(
                    ValidationError::relational(
                        &relation.sheet,
                        row.row,
                        &relation.reference_column,
                        format!(
                            "Reference ID '{}' does not match any row in '{}'",
                            reference, parent.sheet
                        ),
                    ),
                );
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{driver_template, CompiledTemplate};
    use crate::workbook::{RawRow, RawSheet};
    use std::collections::BTreeMap as Fields;

    fn row(n: u32, pairs: &[(&str, &str)]) -> RawRow {
        let mut fields = Fields::new();
        for (k, v) in pairs {
            fields.insert(k.to_string(), Some(v.to_string()));
        }
        RawRow { row: n, fields }
    }

    fn workbook(parents: Vec<&str>, address_refs: Vec<&str>) -> ParsedWorkbook {
        let parent_rows = parents
            .iter()
            .enumerate()
            .map(|(i, id)| row(i as u32 + 2, &[("Driver_Ref_ID", id)]))
            .collect();
        let address_rows = address_refs
            .iter()
            .enumerate()
            .map(|(i, id)| row(i as u32 + 2, &[("Driver_Ref_ID", id)]))
            .collect();
        ParsedWorkbook {
            sheets: vec![
                RawSheet {
                    name: "Driver_Basic_Info".to_string(),
                    headers: vec!["Driver_Ref_ID".to_string()],
                    rows: parent_rows,
                },
                RawSheet {
                    name: "Driver_Addresses".to_string(),
                    headers: vec!["Driver_Ref_ID".to_string()],
                    rows: address_rows,
                },
                RawSheet {
                    name: "Driver_Documents".to_string(),
                    headers: vec!["Driver_Ref_ID".to_string()],
                    rows: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_resolving_references_emit_nothing() {
        let wb = workbook(vec!["D1", "D2"], vec!["D1", "D2", "D1"]);
        let errors = check_references(&wb, &CompiledTemplate::compile(driver_template()));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_dangling_reference_keyed_by_id() {
        let wb = workbook(vec!["D1"], vec!["D1", "D999"]);
        let errors = check_references(&wb, &CompiledTemplate::compile(driver_template()));
        assert_eq!(errors.len(), 1);
        let dangling = &errors["D999"];
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].sheet, "Driver_Addresses");
        assert_eq!(dangling[0].field, "Driver_Ref_ID");
        assert!(dangling[0].message.contains("D999"));
        // 1-based provenance: second address row sits at sheet row 3
        assert_eq!(dangling[0].row, crate::report::RowRef::Row(3));
    }

    #[test]
    fn test_repeated_dangling_reference_groups_under_one_key() {
        let wb = workbook(vec!["D1"], vec!["D7", "D7"]);
        let errors = check_references(&wb, &CompiledTemplate::compile(driver_template()));
        assert_eq!(errors["D7"].len(), 2);
    }

    #[test]
    fn test_null_reference_cells_skipped() {
        let mut wb = workbook(vec!["D1"], vec![]);
        let mut fields = Fields::new();
        fields.insert("Driver_Ref_ID".to_string(), None);
        fields.insert("City".to_string(), Some("Pune".to_string()));
        wb.sheets[1].rows.push(RawRow { row: 2, fields });

        let errors = check_references(&wb, &CompiledTemplate::compile(driver_template()));
        assert!(errors.is_empty());
    }
}
