//! Duplicate-contact lookup against the persisted store.
//!
//! Defines the [`ContactDirectory`] trait so backends can be swapped: an
//! in-memory directory for tests and local runs, and a Supabase/PostgREST
//! directory for deployments. The pipeline issues exactly one batched
//! existence query per upload ("which of these phones/emails already
//! exist"), never one round-trip per row.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ContactLookup;

/// Which contact column a uniqueness rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Phone,
    Email,
}

/// Result of a batched existence query: the subset of submitted values that
/// already exist in the store.
#[derive(Debug, Clone, Default)]
pub struct ContactIndex {
    pub phones: HashSet<String>,
    pub emails: HashSet<String>,
}

impl ContactIndex {
    pub fn contains(&self, kind: ContactKind, value: &str) -> bool {
        match kind {
            ContactKind::Phone => self.phones.contains(value),
            ContactKind::Email => self.emails.contains(value),
        }
    }
}

/// Read-only existence checks against persisted parent records.
#[async_trait::async_trait]
pub trait ContactDirectory: Send + Sync {
    fn name(&self) -> &str;

    /// Return which of the given phone numbers / email addresses already
    /// exist in the store the template points at.
    async fn existing_contacts(
        &self,
        lookup: &ContactLookup,
        phones: &[String],
        emails: &[String],
    ) -> Result<ContactIndex>;
}

/// In-memory directory backed by `RwLock`ed sets. Used by tests and by local
/// runs without a configured store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    phones: Arc<RwLock<HashSet<String>>>,
    emails: Arc<RwLock<HashSet<String>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_phone(&self, phone: &str) {
        self.phones.write().unwrap().insert(phone.to_string());
    }

    pub fn insert_email(&self, email: &str) {
        self.emails.write().unwrap().insert(email.to_string());
    }
}

#[async_trait::async_trait]
impl ContactDirectory for MemoryDirectory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn existing_contacts(
        &self,
        _lookup: &ContactLookup,
        phones: &[String],
        emails: &[String],
    ) -> Result<ContactIndex> {
        let known_phones = self.phones.read().unwrap();
        let known_emails = self.emails.read().unwrap();
        Ok(ContactIndex {
            phones: phones
                .iter()
                .filter(|p| known_phones.contains(*p))
                .cloned()
                .collect(),
            emails: emails
                .iter()
                .filter(|e| known_emails.contains(*e))
                .cloned()
                .collect(),
        })
    }
}

/// Directory backed by Supabase's PostgREST API.
#[derive(Clone)]
pub struct SupabaseDirectory {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseDirectory {
    /// Create a new Supabase directory from environment variables.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("SUPABASE_URL").map_err(|_| anyhow!("SUPABASE_URL not set"))?;
        let service_role_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .map_err(|_| anyhow!("SUPABASE_SERVICE_ROLE_KEY not set"))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            service_role_key,
        })
    }

    /// Query one column with an `in.(...)` filter and collect the values that
    /// came back.
    async fn existing_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<HashSet<String>> {
        if values.is_empty() {
            return Ok(HashSet::new());
        }

        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let filter = format!(
            "in.({})",
            values
                .iter()
                .map(|v| format!("\"{}\"", v))
                .collect::<Vec<_>>()
                .join(",")
        );

        debug!(
            "Directory lookup: {} values against {}.{}",
            values.len(),
            table,
            column
        );

        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .query(&[("select", column), (column, filter.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Directory lookup on {}.{} failed: {} - {}",
                table,
                column,
                status,
                text
            ));
        }

        let rows: Vec<serde_json::Value> = resp.json().await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(column).and_then(|v| v.as_str()))
            .map(|v| v.to_string())
            .collect())
    }
}

#[async_trait::async_trait]
impl ContactDirectory for SupabaseDirectory {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn existing_contacts(
        &self,
        lookup: &ContactLookup,
        phones: &[String],
        emails: &[String],
    ) -> Result<ContactIndex> {
        let mut index = ContactIndex::default();

        if let Some(column) = &lookup.phone_column {
            index.phones = self.existing_values(&lookup.table, column, phones).await?;
        }
        if let Some(column) = &lookup.email_column {
            index.emails = self.existing_values(&lookup.table, column, emails).await?;
        }

        Ok(index)
    }
}
