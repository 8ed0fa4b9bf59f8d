//! Field-level validation rules.
//!
//! Rules are declared on upload templates as tagged [`FieldCheck`] variants
//! and compiled once per template; checks with invalid regexes are skipped
//! with a warning. Evaluation accumulates every violation for a row instead
//! of stopping at the first.

use chrono::{Months, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::directory::{ContactIndex, ContactKind};
use crate::report::{RowRef, ValidationError};
use crate::workbook::RawRow;

/// A single declarative check on one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum FieldCheck {
    Required,
    MinLen { len: usize },
    MaxLen { len: usize },
    /// Value must match `pattern`; `expects` is the human phrasing used in
    /// the error message ("a valid 10-digit mobile number").
    Matches { pattern: String, expects: String },
    /// Date-of-birth style check: must be a past date and the age measured in
    /// full years/months/days must fall in `[min, max]` inclusive.
    AgeBetween { min: u32, max: u32 },
    /// Must parse as a date strictly after today (expiry dates).
    AfterToday,
    /// Batched existence check against the persisted store.
    Unique { kind: ContactKind },
}

/// All checks declared for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    pub checks: Vec<FieldCheck>,
}

/// Compiled counterpart of [`FieldCheck`] with regexes ready to match.
#[derive(Debug, Clone)]
pub enum CompiledCheck {
    Required,
    MinLen(usize),
    MaxLen(usize),
    Matches { regex: Regex, expects: String },
    AgeBetween { min: u32, max: u32 },
    AfterToday,
    Unique(ContactKind),
}

#[derive(Debug, Clone)]
pub struct CompiledFieldRule {
    pub field: String,
    pub checks: Vec<CompiledCheck>,
}

impl CompiledFieldRule {
    /// Store-uniqueness kind declared on this rule, if any.
    pub fn unique_kind(&self) -> Option<ContactKind> {
        self.checks.iter().find_map(|c| match c {
            CompiledCheck::Unique(kind) => Some(*kind),
            _ => None,
        })
    }

    /// True when every pattern check on this rule matches the value. Used to
    /// keep malformed values out of uniqueness lookups.
    pub fn is_well_formed(&self, value: &str) -> bool {
        self.checks.iter().all(|c| match c {
            CompiledCheck::Matches { regex, .. } => regex.is_match(value),
            _ => true,
        })
    }
}

/// Compile a rule set. Checks with unparseable patterns are dropped with a
/// warning rather than failing the whole template.
pub fn compile_rules(rules: &[FieldRule]) -> Vec<CompiledFieldRule> {
    rules
        .iter()
        .map(|rule| {
            let checks = rule
                .checks
                .iter()
                .filter_map(|check| match check {
                    FieldCheck::Required => Some(CompiledCheck::Required),
                    FieldCheck::MinLen { len } => Some(CompiledCheck::MinLen(*len)),
                    FieldCheck::MaxLen { len } => Some(CompiledCheck::MaxLen(*len)),
                    FieldCheck::Matches { pattern, expects } => match Regex::new(pattern) {
                        Ok(regex) => Some(CompiledCheck::Matches {
                            regex,
                            expects: expects.clone(),
                        }),
                        Err(e) => {
                            warn!(
                                "Skipping invalid pattern for field '{}' ({}): {}",
                                rule.field, pattern, e
                            );
                            None
                        }
                    },
                    FieldCheck::AgeBetween { min, max } => Some(CompiledCheck::AgeBetween {
                        min: *min,
                        max: *max,
                    }),
                    FieldCheck::AfterToday => Some(CompiledCheck::AfterToday),
                    FieldCheck::Unique { kind } => Some(CompiledCheck::Unique(*kind)),
                })
                .collect();
            CompiledFieldRule {
                field: rule.field.clone(),
                checks,
            }
        })
        .collect()
}

/// Run one field rule against one row, appending every violation.
///
/// A null value fails only the `Required` check; the remaining checks need a
/// value to inspect. Uniqueness is only consulted for well-formed values, so
/// a malformed phone number never reports both a format and a duplicate
/// error.
pub fn run_rule(
    rule: &CompiledFieldRule,
    row: &RawRow,
    sheet: &str,
    existing: &ContactIndex,
    today: NaiveDate,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let row_ref = RowRef::Row(row.row);

    let value = match row.get(&rule.field) {
        Some(v) => v,
        None => {
            if rule
                .checks
                .iter()
                .any(|c| matches!(c, CompiledCheck::Required))
            {
                errors.push(ValidationError::validation(
                    sheet,
                    row_ref,
                    &rule.field,
                    format!("{} is required", rule.field),
                ));
            }
            return errors;
        }
    };

    let mut format_ok = true;

    for check in &rule.checks {
        match check {
            CompiledCheck::Required => {}
            CompiledCheck::MinLen(len) => {
                if value.chars().count() < *len {
                    errors.push(ValidationError::validation(
                        sheet,
                        row_ref,
                        &rule.field,
                        format!("{} must be at least {} characters", rule.field, len),
                    ));
                }
            }
            CompiledCheck::MaxLen(len) => {
                if value.chars().count() > *len {
                    errors.push(ValidationError::validation(
                        sheet,
                        row_ref,
                        &rule.field,
                        format!("{} must be at most {} characters", rule.field, len),
                    ));
                }
            }
            CompiledCheck::Matches { regex, expects } => {
                if !regex.is_match(value) {
                    format_ok = false;
                    errors.push(ValidationError::validation(
                        sheet,
                        row_ref,
                        &rule.field,
                        format!("{} must be {}", rule.field, expects),
                    ));
                }
            }
            CompiledCheck::AgeBetween { min, max } => {
                match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
                    Err(_) => errors.push(ValidationError::validation(
                        sheet,
                        row_ref,
                        &rule.field,
                        format!("{} must be a valid date in YYYY-MM-DD format", rule.field),
                    )),
                    Ok(dob) if dob >= today => errors.push(ValidationError::validation(
                        sheet,
                        row_ref,
                        &rule.field,
                        format!("{} must be a date in the past", rule.field),
                    )),
                    Ok(dob) => {
                        let floor = dob.checked_add_months(Months::new(min * 12));
                        let ceil = dob.checked_add_months(Months::new(max * 12));
                        if let (Some(floor), Some(ceil)) = (floor, ceil) {
                            // floor/ceil are the min-th and max-th birthdays;
                            // both anniversaries count as inside the window.
                            if floor > today || ceil < today {
                                errors.push(ValidationError::validation(
                                    sheet,
                                    row_ref,
                                    &rule.field,
                                    format!("Age must be between {} and {} years", min, max),
                                ));
                            }
                        }
                    }
                }
            }
            CompiledCheck::AfterToday => {
                match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
                    Err(_) => errors.push(ValidationError::validation(
                        sheet,
                        row_ref,
                        &rule.field,
                        format!("{} must be a valid date in YYYY-MM-DD format", rule.field),
                    )),
                    Ok(date) if date <= today => errors.push(ValidationError::validation(
                        sheet,
                        row_ref,
                        &rule.field,
                        format!("{} must be a date in the future", rule.field),
                    )),
                    Ok(_) => {}
                }
            }
            CompiledCheck::Unique(kind) => {
                if format_ok && existing.contains(*kind, value) {
                    errors.push(ValidationError::duplicate(
                        sheet,
                        row.row,
                        &rule.field,
                        format!("{} '{}' already exists", rule.field, value),
                    ));
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const SHEET: &str = "Driver_Basic_Info";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn row_with(field: &str, value: Option<&str>) -> RawRow {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), value.map(|v| v.to_string()));
        RawRow { row: 2, fields }
    }

    fn compiled(field: &str, checks: Vec<FieldCheck>) -> CompiledFieldRule {
        compile_rules(&[FieldRule {
            field: field.to_string(),
            checks,
        }])
        .remove(0)
    }

    fn run(rule: &CompiledFieldRule, row: &RawRow) -> Vec<ValidationError> {
        run_rule(rule, row, SHEET, &ContactIndex::default(), today())
    }

    #[test]
    fn test_required_null_value() {
        let rule = compiled("Full_Name", vec![FieldCheck::Required, FieldCheck::MinLen { len: 2 }]);
        let errors = run(&rule, &row_with("Full_Name", None));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("required"));
    }

    #[test]
    fn test_optional_null_value_passes() {
        let rule = compiled(
            "Email",
            vec![FieldCheck::Matches {
                pattern: r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$".to_string(),
                expects: "a valid email address".to_string(),
            }],
        );
        assert!(run(&rule, &row_with("Email", None)).is_empty());
    }

    #[test]
    fn test_length_bounds() {
        let rule = compiled(
            "Full_Name",
            vec![FieldCheck::MinLen { len: 2 }, FieldCheck::MaxLen { len: 10 }],
        );
        assert_eq!(run(&rule, &row_with("Full_Name", Some("A"))).len(), 1);
        assert_eq!(
            run(&rule, &row_with("Full_Name", Some("much too long a name"))).len(),
            1
        );
        assert!(run(&rule, &row_with("Full_Name", Some("Asha"))).is_empty());
    }

    #[test]
    fn test_phone_pattern() {
        let rule = compiled(
            "Phone_Number",
            vec![FieldCheck::Matches {
                pattern: r"^[6-9][0-9]{9}$".to_string(),
                expects: "a valid 10-digit mobile number".to_string(),
            }],
        );
        assert!(run(&rule, &row_with("Phone_Number", Some("9876543210"))).is_empty());
        assert_eq!(run(&rule, &row_with("Phone_Number", Some("1234567890"))).len(), 1);
        assert_eq!(run(&rule, &row_with("Phone_Number", Some("98765"))).len(), 1);
    }

    #[test]
    fn test_unique_phone_reports_duplicate() {
        let rule = compiled(
            "Phone_Number",
            vec![
                FieldCheck::Matches {
                    pattern: r"^[6-9][0-9]{9}$".to_string(),
                    expects: "a valid 10-digit mobile number".to_string(),
                },
                FieldCheck::Unique {
                    kind: ContactKind::Phone,
                },
            ],
        );
        let mut existing = ContactIndex::default();
        existing.phones.insert("9876543210".to_string());

        let errors = run_rule(
            &rule,
            &row_with("Phone_Number", Some("9876543210")),
            SHEET,
            &existing,
            today(),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, crate::report::ErrorKind::Duplicate);
    }

    #[test]
    fn test_unique_skipped_for_malformed_value() {
        let rule = compiled(
            "Phone_Number",
            vec![
                FieldCheck::Matches {
                    pattern: r"^[6-9][0-9]{9}$".to_string(),
                    expects: "a valid 10-digit mobile number".to_string(),
                },
                FieldCheck::Unique {
                    kind: ContactKind::Phone,
                },
            ],
        );
        let mut existing = ContactIndex::default();
        existing.phones.insert("12345".to_string());

        let errors = run_rule(
            &rule,
            &row_with("Phone_Number", Some("12345")),
            SHEET,
            &existing,
            today(),
        );
        // Only the format error; no duplicate check on a malformed value
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, crate::report::ErrorKind::Validation);
    }

    #[test]
    fn test_age_lower_boundary() {
        let rule = compiled("Date_Of_Birth", vec![FieldCheck::AgeBetween { min: 18, max: 65 }]);
        // 18th birthday exactly today: valid
        assert!(run(&rule, &row_with("Date_Of_Birth", Some("2008-03-10"))).is_empty());
        // 17 years 364 days: invalid
        assert_eq!(run(&rule, &row_with("Date_Of_Birth", Some("2008-03-11"))).len(), 1);
    }

    #[test]
    fn test_age_upper_boundary() {
        let rule = compiled("Date_Of_Birth", vec![FieldCheck::AgeBetween { min: 18, max: 65 }]);
        // 65th birthday exactly today: valid
        assert!(run(&rule, &row_with("Date_Of_Birth", Some("1961-03-10"))).is_empty());
        // 65 years and one day: invalid
        assert_eq!(run(&rule, &row_with("Date_Of_Birth", Some("1961-03-09"))).len(), 1);
    }

    #[test]
    fn test_dob_must_be_past() {
        let rule = compiled("Date_Of_Birth", vec![FieldCheck::AgeBetween { min: 18, max: 65 }]);
        let errors = run(&rule, &row_with("Date_Of_Birth", Some("2026-03-10")));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("past"));
    }

    #[test]
    fn test_dob_unparseable() {
        let rule = compiled("Date_Of_Birth", vec![FieldCheck::AgeBetween { min: 18, max: 65 }]);
        let errors = run(&rule, &row_with("Date_Of_Birth", Some("12/04/1990")));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_after_today() {
        let rule = compiled("License_Expiry_Date", vec![FieldCheck::AfterToday]);
        assert!(run(&rule, &row_with("License_Expiry_Date", Some("2027-01-01"))).is_empty());
        assert_eq!(
            run(&rule, &row_with("License_Expiry_Date", Some("2026-03-10"))).len(),
            1
        );
        assert_eq!(
            run(&rule, &row_with("License_Expiry_Date", Some("2020-01-01"))).len(),
            1
        );
    }

    #[test]
    fn test_invalid_pattern_dropped_at_compile() {
        let rules = compile_rules(&[FieldRule {
            field: "X".to_string(),
            checks: vec![FieldCheck::Matches {
                pattern: "[unclosed".to_string(),
                expects: "anything".to_string(),
            }],
        }]);
        assert!(rules[0].checks.is_empty());
    }
}
