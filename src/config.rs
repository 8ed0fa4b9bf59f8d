//! Upload template system.
//!
//! A template is the declarative schema of one bulk-upload entity type:
//! which sheets the workbook must contain, which columns each sheet must
//! carry, how child sheets relate back to the parent sheet, and the field
//! rules applied to every row. Driver, transporter, and vehicle templates
//! are built in; JSON templates loaded from a directory can add to or
//! override them. The in-memory cache is backed by `RwLock`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::directory::ContactKind;
use crate::rules::{compile_rules, CompiledFieldRule, FieldCheck, FieldRule};

const PHONE_PATTERN: &str = r"^[6-9][0-9]{9}$";
const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$";
const PINCODE_PATTERN: &str = r"^[0-9]{6}$";
const GST_PATTERN: &str = r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z]$";
const REGISTRATION_PATTERN: &str = r"^[A-Z]{2}[0-9]{2}[A-Z]{1,2}[0-9]{4}$";

/// Declarative schema for one bulk-upload entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTemplate {
    pub name: String,
    pub description: String,
    pub parent: ParentSpec,
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
}

/// The basic-info sheet that declares the parent records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentSpec {
    pub sheet: String,
    /// Batch-scoped identifier column child sheets refer back to.
    pub reference_column: String,
    /// Every required column of the sheet, reference column included.
    pub columns: Vec<String>,
    #[serde(default)]
    pub rules: Vec<FieldRule>,
    /// Where store-uniqueness checks resolve, if the entity has any.
    #[serde(default)]
    pub lookup: Option<ContactLookup>,
}

/// Persisted-store location for phone/email uniqueness checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactLookup {
    pub table: String,
    #[serde(default)]
    pub phone_column: Option<String>,
    #[serde(default)]
    pub email_column: Option<String>,
}

/// How many child rows a parent may have in one relation sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    Any,
    AtLeastOne,
    ExactlyOne,
}

/// A child sheet tied to the parent by its reference column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSpec {
    pub sheet: String,
    pub reference_column: String,
    /// Every required column of the sheet, reference column included.
    pub columns: Vec<String>,
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Truthy-flag column of which exactly one child row must be marked,
    /// when present (e.g. `Is_Primary` on addresses).
    #[serde(default)]
    pub primary_column: Option<String>,
    #[serde(default)]
    pub rules: Vec<FieldRule>,
    /// Columns forming an in-batch uniqueness key; a repeated combination
    /// within one parent is flagged on its second occurrence.
    #[serde(default)]
    pub dedup_columns: Vec<String>,
}

/// A template with its field-rule regexes compiled, ready to validate.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub template: UploadTemplate,
    pub parent_rules: Vec<CompiledFieldRule>,
    /// One compiled rule set per entry of `template.relations`.
    pub relation_rules: Vec<Vec<CompiledFieldRule>>,
}

impl CompiledTemplate {
    pub fn compile(template: UploadTemplate) -> Self {
        let parent_rules = compile_rules(&template.parent.rules);
        let relation_rules = template
            .relations
            .iter()
            .map(|r| compile_rules(&r.rules))
            .collect();
        Self {
            template,
            parent_rules,
            relation_rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }

    /// Required sheets in configured order: parent first, then relations.
    pub fn required_sheets(&self) -> Vec<&str> {
        let mut sheets = vec![self.template.parent.sheet.as_str()];
        sheets.extend(self.template.relations.iter().map(|r| r.sheet.as_str()));
        sheets
    }

    /// Required columns of one sheet, empty for unknown sheets.
    pub fn required_columns(&self, sheet: &str) -> &[String] {
        if self.template.parent.sheet == sheet {
            return &self.template.parent.columns;
        }
        self.template
            .relations
            .iter()
            .find(|r| r.sheet == sheet)
            .map(|r| r.columns.as_slice())
            .unwrap_or(&[])
    }
}

/// In-memory store for all loaded templates.
#[derive(Debug)]
pub struct TemplateStore {
    templates: RwLock<HashMap<String, CompiledTemplate>>,
}

impl TemplateStore {
    /// Store seeded with the built-in driver/transporter/vehicle templates.
    pub fn with_builtin() -> Self {
        let mut templates = HashMap::new();
        for template in [driver_template(), transporter_template(), vehicle_template()] {
            templates.insert(template.name.clone(), CompiledTemplate::compile(template));
        }
        Self {
            templates: RwLock::new(templates),
        }
    }

    /// Load JSON templates from a directory on top of the built-ins.
    /// A file whose `name` matches a built-in replaces it.
    pub fn load_from_dir(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            anyhow::bail!("Template directory does not exist: {:?}", dir);
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read template: {:?}", path))?;

                let template: UploadTemplate = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse template: {:?}", path))?;

                info!("Loaded template: {} from {:?}", template.name, path);
                self.templates
                    .write()
                    .unwrap()
                    .insert(template.name.clone(), CompiledTemplate::compile(template));
            }
        }

        Ok(())
    }

    /// Get a template by name (returns clone).
    pub fn get(&self, name: &str) -> Option<CompiledTemplate> {
        self.templates.read().unwrap().get(name).cloned()
    }

    /// All template names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

fn rule(field: &str, checks: Vec<FieldCheck>) -> FieldRule {
    FieldRule {
        field: field.to_string(),
        checks,
    }
}

fn matches(pattern: &str, expects: &str) -> FieldCheck {
    FieldCheck::Matches {
        pattern: pattern.to_string(),
        expects: expects.to_string(),
    }
}

fn address_relation(sheet: &str, reference_column: &str) -> RelationSpec {
    RelationSpec {
        sheet: sheet.to_string(),
        reference_column: reference_column.to_string(),
        columns: [
            reference_column,
            "Address_Line",
            "City",
            "State",
            "Country",
            "Pincode",
            "Is_Primary",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect(),
        cardinality: Cardinality::AtLeastOne,
        primary_column: Some("Is_Primary".to_string()),
        rules: vec![
            rule("Address_Line", vec![FieldCheck::Required]),
            rule("City", vec![FieldCheck::Required]),
            rule("State", vec![FieldCheck::Required]),
            rule("Country", vec![FieldCheck::Required]),
            rule(
                "Pincode",
                vec![
                    FieldCheck::Required,
                    matches(PINCODE_PATTERN, "a 6-digit postal code"),
                ],
            ),
        ],
        dedup_columns: vec![],
    }
}

fn document_relation(sheet: &str, reference_column: &str) -> RelationSpec {
    RelationSpec {
        sheet: sheet.to_string(),
        reference_column: reference_column.to_string(),
        columns: [reference_column, "Document_Type", "Document_Number", "Expiry_Date"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        cardinality: Cardinality::Any,
        primary_column: None,
        rules: vec![
            rule("Document_Type", vec![FieldCheck::Required]),
            rule("Document_Number", vec![FieldCheck::Required]),
            rule("Expiry_Date", vec![FieldCheck::AfterToday]),
        ],
        dedup_columns: vec!["Document_Type".to_string(), "Document_Number".to_string()],
    }
}

/// Built-in driver bulk-upload template.
pub fn driver_template() -> UploadTemplate {
    UploadTemplate {
        name: "driver".to_string(),
        description: "Bulk driver master-data upload".to_string(),
        parent: ParentSpec {
            sheet: "Driver_Basic_Info".to_string(),
            reference_column: "Driver_Ref_ID".to_string(),
            columns: [
                "Driver_Ref_ID",
                "Full_Name",
                "Date_Of_Birth",
                "Phone_Number",
                "Email",
                "License_Number",
                "License_Expiry_Date",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            rules: vec![
                rule("Driver_Ref_ID", vec![FieldCheck::Required]),
                rule(
                    "Full_Name",
                    vec![
                        FieldCheck::Required,
                        FieldCheck::MinLen { len: 2 },
                        FieldCheck::MaxLen { len: 100 },
                    ],
                ),
                rule(
                    "Date_Of_Birth",
                    vec![FieldCheck::Required, FieldCheck::AgeBetween { min: 18, max: 65 }],
                ),
                rule(
                    "Phone_Number",
                    vec![
                        FieldCheck::Required,
                        matches(PHONE_PATTERN, "a valid 10-digit mobile number"),
                        FieldCheck::Unique {
                            kind: ContactKind::Phone,
                        },
                    ],
                ),
                rule(
                    "Email",
                    vec![
                        matches(EMAIL_PATTERN, "a valid email address"),
                        FieldCheck::Unique {
                            kind: ContactKind::Email,
                        },
                    ],
                ),
                rule(
                    "License_Number",
                    vec![
                        FieldCheck::Required,
                        FieldCheck::MinLen { len: 4 },
                        FieldCheck::MaxLen { len: 20 },
                    ],
                ),
                rule(
                    "License_Expiry_Date",
                    vec![FieldCheck::Required, FieldCheck::AfterToday],
                ),
            ],
            lookup: Some(ContactLookup {
                table: "drivers".to_string(),
                phone_column: Some("phone_number".to_string()),
                email_column: Some("email".to_string()),
            }),
        },
        relations: vec![
            address_relation("Driver_Addresses", "Driver_Ref_ID"),
            document_relation("Driver_Documents", "Driver_Ref_ID"),
        ],
    }
}

/// Built-in transporter bulk-upload template.
pub fn transporter_template() -> UploadTemplate {
    UploadTemplate {
        name: "transporter".to_string(),
        description: "Bulk transporter master-data upload".to_string(),
        parent: ParentSpec {
            sheet: "Transporter_Basic_Info".to_string(),
            reference_column: "Transporter_Ref_ID".to_string(),
            columns: [
                "Transporter_Ref_ID",
                "Company_Name",
                "Phone_Number",
                "Email",
                "GST_Number",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            rules: vec![
                rule("Transporter_Ref_ID", vec![FieldCheck::Required]),
                rule(
                    "Company_Name",
                    vec![
                        FieldCheck::Required,
                        FieldCheck::MinLen { len: 2 },
                        FieldCheck::MaxLen { len: 150 },
                    ],
                ),
                rule(
                    "Phone_Number",
                    vec![
                        FieldCheck::Required,
                        matches(PHONE_PATTERN, "a valid 10-digit mobile number"),
                        FieldCheck::Unique {
                            kind: ContactKind::Phone,
                        },
                    ],
                ),
                rule(
                    "Email",
                    vec![
                        matches(EMAIL_PATTERN, "a valid email address"),
                        FieldCheck::Unique {
                            kind: ContactKind::Email,
                        },
                    ],
                ),
                rule(
                    "GST_Number",
                    vec![
                        FieldCheck::Required,
                        matches(GST_PATTERN, "a valid 15-character GSTIN"),
                    ],
                ),
            ],
            lookup: Some(ContactLookup {
                table: "transporters".to_string(),
                phone_column: Some("phone_number".to_string()),
                email_column: Some("email".to_string()),
            }),
        },
        relations: vec![
            address_relation("Transporter_Addresses", "Transporter_Ref_ID"),
            RelationSpec {
                sheet: "Transporter_Contacts".to_string(),
                reference_column: "Transporter_Ref_ID".to_string(),
                columns: ["Transporter_Ref_ID", "Contact_Name", "Contact_Phone"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                cardinality: Cardinality::Any,
                primary_column: None,
                rules: vec![
                    rule(
                        "Contact_Name",
                        vec![
                            FieldCheck::Required,
                            FieldCheck::MinLen { len: 2 },
                            FieldCheck::MaxLen { len: 100 },
                        ],
                    ),
                    rule(
                        "Contact_Phone",
                        vec![
                            FieldCheck::Required,
                            matches(PHONE_PATTERN, "a valid 10-digit mobile number"),
                        ],
                    ),
                ],
                dedup_columns: vec!["Contact_Name".to_string(), "Contact_Phone".to_string()],
            },
        ],
    }
}

/// Built-in vehicle bulk-upload template.
pub fn vehicle_template() -> UploadTemplate {
    UploadTemplate {
        name: "vehicle".to_string(),
        description: "Bulk vehicle master-data upload".to_string(),
        parent: ParentSpec {
            sheet: "Vehicle_Basic_Info".to_string(),
            reference_column: "Vehicle_Ref_ID".to_string(),
            columns: [
                "Vehicle_Ref_ID",
                "Registration_Number",
                "Vehicle_Type",
                "Make",
                "Model",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            rules: vec![
                rule("Vehicle_Ref_ID", vec![FieldCheck::Required]),
                rule(
                    "Registration_Number",
                    vec![
                        FieldCheck::Required,
                        matches(
                            REGISTRATION_PATTERN,
                            "a valid registration number (e.g. KA01AB1234)",
                        ),
                    ],
                ),
                rule(
                    "Vehicle_Type",
                    vec![
                        FieldCheck::Required,
                        FieldCheck::MinLen { len: 2 },
                        FieldCheck::MaxLen { len: 50 },
                    ],
                ),
                rule(
                    "Make",
                    vec![
                        FieldCheck::Required,
                        FieldCheck::MinLen { len: 2 },
                        FieldCheck::MaxLen { len: 50 },
                    ],
                ),
                rule("Model", vec![FieldCheck::MaxLen { len: 50 }]),
            ],
            lookup: None,
        },
        relations: vec![
            RelationSpec {
                sheet: "Vehicle_Specifications".to_string(),
                reference_column: "Vehicle_Ref_ID".to_string(),
                columns: ["Vehicle_Ref_ID", "Capacity_Tons", "Axle_Count"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                cardinality: Cardinality::ExactlyOne,
                primary_column: None,
                rules: vec![
                    rule(
                        "Capacity_Tons",
                        vec![
                            FieldCheck::Required,
                            matches(r"^[0-9]+(\.[0-9]{1,2})?$", "a number of tons"),
                        ],
                    ),
                    rule(
                        "Axle_Count",
                        vec![
                            FieldCheck::Required,
                            matches(r"^[0-9]{1,2}$", "a whole number of axles"),
                        ],
                    ),
                ],
                dedup_columns: vec![],
            },
            document_relation("Vehicle_Documents", "Vehicle_Ref_ID"),
        ],
    }
}
