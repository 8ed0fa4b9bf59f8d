//! Bulk upload validation pipeline.
//!
//! One invocation per uploaded workbook: parse, gate on structure, assemble
//! entities, check batch-local referential integrity, run one batched
//! duplicate lookup, validate every entity to completion, aggregate. Nothing
//! is persisted here; the caller inserts the valid bucket afterwards.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::config::CompiledTemplate;
use crate::directory::{ContactDirectory, ContactIndex};
use crate::relational::check_references;
use crate::report::{aggregate, BatchReport, ValidationError};
use crate::structure::validate_structure;
use crate::validator::{assemble_entities, collect_contacts, validate_entity};
use crate::workbook::{parse_workbook, ParsedWorkbook};

/// Whole-batch failures. Per-entity failures never abort the batch; they
/// travel inside the report.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Workbook unreadable or unparseable; no partial report.
    #[error("Failed to parse workbook: {0}")]
    Parse(String),
    /// Required sheet or column missing; carries the specific list.
    #[error("Structure validation failed with {} error(s)", .0.len())]
    Structure(Vec<ValidationError>),
    /// The duplicate-lookup backend failed; infrastructure, not data.
    #[error("Duplicate lookup failed: {0}")]
    Directory(anyhow::Error),
}

/// Pipeline orchestrator. Holds the directory used for batched phone/email
/// existence checks.
pub struct ImportPipeline {
    directory: Arc<dyn ContactDirectory>,
}

impl ImportPipeline {
    pub fn new(directory: Arc<dyn ContactDirectory>) -> Self {
        Self { directory }
    }

    /// Validate one uploaded workbook end to end.
    pub async fn validate(
        &self,
        filename: &str,
        data: &[u8],
        template: &CompiledTemplate,
    ) -> Result<BatchReport, UploadError> {
        info!(
            "Validating upload: {} ({} bytes) with template: {}",
            filename,
            data.len(),
            template.name()
        );

        let content_hash = {
            let mut hasher = Sha256::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        };

        let workbook = parse_workbook(filename, data)
            .map_err(|e| UploadError::Parse(format!("{:#}", e)))?;

        self.validate_workbook(filename, content_hash, &workbook, template)
            .await
    }

    /// Validation stages after parsing. Split out so callers holding an
    /// already-parsed workbook can reuse the pipeline.
    pub async fn validate_workbook(
        &self,
        filename: &str,
        content_hash: String,
        workbook: &ParsedWorkbook,
        template: &CompiledTemplate,
    ) -> Result<BatchReport, UploadError> {
        let structural = validate_structure(workbook, template);
        if !structural.is_empty() {
            return Err(UploadError::Structure(structural));
        }

        let entities = assemble_entities(workbook, template);
        let mut relational = check_references(workbook, template);

        // One batched existence query for the whole upload.
        let existing = match &template.template.parent.lookup {
            Some(lookup) => {
                let (phones, emails) = collect_contacts(&entities, template);
                if phones.is_empty() && emails.is_empty() {
                    ContactIndex::default()
                } else {
                    self.directory
                        .existing_contacts(lookup, &phones, &emails)
                        .await
                        .map_err(UploadError::Directory)?
                }
            }
            None => ContactIndex::default(),
        };

        let today = Utc::now().date_naive();
        let results: Vec<(crate::report::ImportEntity, Vec<ValidationError>)> = entities
            .into_iter()
            .map(|(entity, seeds)| {
                // Relational errors computed for this Reference ID come
                // first, verbatim; then assembly seeds, then field groups.
                let mut errors = relational.remove(&entity.reference_id).unwrap_or_default();
                errors.extend(seeds);
                errors.extend(validate_entity(&entity, template, &existing, today));
                (entity, errors)
            })
            .collect();

        let unmatched_references: Vec<ValidationError> =
            relational.into_values().flatten().collect();

        let report = aggregate(
            template.name(),
            filename,
            content_hash,
            results,
            unmatched_references,
        );
        info!(
            "Validation complete: {} total, {} valid, {} invalid",
            report.summary.total, report.summary.valid_count, report.summary.invalid_count
        );
        Ok(report)
    }
}
