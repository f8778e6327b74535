//! Two-phase import of external servers into one partition.
//!
//! 1. [`ImportPipeline::validate`] adapts the request's payload into
//!    canonical records and asks an [`ImportValidator`] to check each one
//!    against what the partition already holds.
//! 2. [`ImportPipeline::apply`] runs validation again, then creates,
//!    updates or skips each selected valid record according to the
//!    override policy.
//!
//! Records are applied independently. A record that fails to convert or
//! persist is reported as failed in the response and the batch carries on.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::adaptor::{AdaptRequest, ExternalAdaptor, ImportType};
use crate::endpoint::to_endpoint_spec;
use crate::error::RegistryResult;
use crate::index::ServerIndex;
use crate::models::CanonicalRecord;
use crate::store::RecordWriter;

pub const CONFLICT_EXISTING: &str = "existing";
pub const CONFLICT_DUPLICATE_NAME: &str = "duplicate_name";
pub const CONFLICT_ID_MISMATCH: &str = "id_conflict";

/// What the caller wants imported and how.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    /// `file`, `json` or `url`.
    pub import_type: String,
    pub data: String,
    pub override_existing: bool,
    pub skip_invalid: bool,
    /// Record ids to apply. Empty applies every valid record.
    pub selected_servers: Vec<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

impl ImportRequest {
    pub fn new(import_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            import_type: import_type.into(),
            data: data.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Valid,
    Invalid,
}

/// One validated record, alive only between validation and apply.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportItem {
    pub record: CanonicalRecord,
    pub exists_already: bool,
    pub status: ItemStatus,
    pub conflict_reason: Option<String>,
}

impl ImportItem {
    pub fn valid(record: CanonicalRecord, exists_already: bool) -> Self {
        Self {
            record,
            exists_already,
            status: ItemStatus::Valid,
            conflict_reason: None,
        }
    }

    pub fn invalid(record: CanonicalRecord, exists_already: bool, reason: impl Into<String>) -> Self {
        Self {
            record,
            exists_already,
            status: ItemStatus::Invalid,
            conflict_reason: Some(reason.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == ItemStatus::Valid
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub items: Vec<ImportItem>,
}

impl ValidationResult {
    /// Aggregate verdict from itemized results.
    pub fn from_items(items: Vec<ImportItem>) -> Self {
        let errors: Vec<String> = items
            .iter()
            .filter(|i| !i.is_valid())
            .map(|i| {
                format!(
                    "{}: {}",
                    i.record.name,
                    i.conflict_reason.as_deref().unwrap_or("invalid")
                )
            })
            .collect();
        Self {
            valid: errors.is_empty(),
            errors,
            items,
        }
    }

    /// A result carrying only an aggregate error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
            items: Vec::new(),
        }
    }

    pub fn valid_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_valid()).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.items.len() - self.valid_count()
    }
}

/// Checks adapted records against the target partition.
#[async_trait]
pub trait ImportValidator: Send + Sync {
    async fn validate(&self, partition: &str, records: Vec<CanonicalRecord>) -> Result<ValidationResult>;
}

/// Validator that resolves existence through a [`ServerIndex`].
///
/// - blank names and names repeated within the batch are invalid
/// - a name already registered in the partition under another id is invalid
/// - a record found by name or by id in the partition already exists
pub struct IndexValidator {
    index: Arc<dyn ServerIndex>,
}

impl IndexValidator {
    pub fn new(index: Arc<dyn ServerIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ImportValidator for IndexValidator {
    async fn validate(&self, partition: &str, records: Vec<CanonicalRecord>) -> Result<ValidationResult> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut items = Vec::with_capacity(records.len());

        for record in records {
            if record.name.trim().is_empty() {
                items.push(ImportItem::invalid(record, false, "Server name is required"));
                continue;
            }
            if !seen.insert(record.name.clone()) {
                items.push(ImportItem::invalid(record, false, CONFLICT_DUPLICATE_NAME));
                continue;
            }

            let by_name = self.index.get_by_name(partition, &record.name).await?;
            let by_id = self
                .index
                .get_by_id(&record.id)
                .await?
                .filter(|e| e.partition == partition);
            let exists = by_name.is_some() || by_id.is_some();

            match by_name {
                Some(entry) if entry.id != record.id => {
                    items.push(ImportItem::invalid(record, exists, CONFLICT_ID_MISMATCH));
                }
                _ => items.push(ImportItem::valid(record, exists)),
            }
        }
        Ok(ValidationResult::from_items(items))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub server_id: String,
    pub server_name: String,
    pub status: ImportStatus,
    pub conflict_type: Option<String>,
    pub error_message: Option<String>,
}

impl ImportResult {
    fn new(record: &CanonicalRecord, status: ImportStatus) -> Self {
        Self {
            server_id: record.id.clone(),
            server_name: record.name.clone(),
            status,
            conflict_type: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub success: bool,
    pub total_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub results: Vec<ImportResult>,
    pub error_message: Option<String>,
}

impl ImportResponse {
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(msg.into()),
            ..Self::default()
        }
    }

    fn from_results(results: Vec<ImportResult>) -> Self {
        let count = |s: ImportStatus| results.iter().filter(|r| r.status == s).count();
        let success_count = count(ImportStatus::Success);
        let failed_count = count(ImportStatus::Failed);
        let skipped_count = count(ImportStatus::Skipped);
        Self {
            success: failed_count == 0,
            total_count: results.len(),
            success_count,
            failed_count,
            skipped_count,
            results,
            error_message: None,
        }
    }
}

pub struct ImportPipeline {
    adaptor: ExternalAdaptor,
    validator: Arc<dyn ImportValidator>,
    writer: Arc<dyn RecordWriter>,
    index: Arc<dyn ServerIndex>,
}

impl ImportPipeline {
    pub fn new(
        adaptor: ExternalAdaptor,
        validator: Arc<dyn ImportValidator>,
        writer: Arc<dyn RecordWriter>,
        index: Arc<dyn ServerIndex>,
    ) -> Self {
        Self {
            adaptor,
            validator,
            writer,
            index,
        }
    }

    /// Adapt and validate. Only an unknown import type is an error; every
    /// other failure folds into an invalid result.
    pub async fn validate(&self, partition: &str, request: &ImportRequest) -> RegistryResult<ValidationResult> {
        let import_type = ImportType::parse(&request.import_type)?;
        let adapt = AdaptRequest {
            import_type,
            data: &request.data,
            cursor: request.cursor.as_deref(),
            limit: request.limit,
            search: request.search.as_deref(),
        };

        let records = match self.adaptor.adapt(&adapt).await {
            Ok(records) => records,
            Err(e) => {
                warn!(partition, error = %e, "Import adaptation failed");
                return Ok(ValidationResult::failed(format!(
                    "Import validation failed: {}",
                    e
                )));
            }
        };
        match self.validator.validate(partition, records).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(partition, error = %e, "Import validation failed");
                Ok(ValidationResult::failed(format!(
                    "Import validation failed: {:#}",
                    e
                )))
            }
        }
    }

    /// Validate, then write the selected valid records.
    pub async fn apply(&self, partition: &str, request: &ImportRequest) -> RegistryResult<ImportResponse> {
        let validation = self.validate(partition, request).await?;
        Ok(self.apply_items(partition, &validation, request).await)
    }

    /// Write already-validated items according to the request's policy.
    pub async fn apply_items(
        &self,
        partition: &str,
        validation: &ValidationResult,
        request: &ImportRequest,
    ) -> ImportResponse {
        if !validation.valid && !request.skip_invalid {
            return ImportResponse::error(format!(
                "Import validation failed: {}",
                validation.errors.join(", ")
            ));
        }

        let selected: HashSet<&str> = request.selected_servers.iter().map(String::as_str).collect();
        let mut results = Vec::new();
        for item in validation
            .items
            .iter()
            .filter(|i| i.is_valid())
            .filter(|i| selected.is_empty() || selected.contains(i.record.id.as_str()))
        {
            results.push(self.apply_one(partition, item, request.override_existing).await);
        }

        let response = ImportResponse::from_results(results);
        info!(
            partition,
            total = response.total_count,
            success = response.success_count,
            failed = response.failed_count,
            skipped = response.skipped_count,
            "Import applied"
        );
        response
    }

    async fn apply_one(&self, partition: &str, item: &ImportItem, override_existing: bool) -> ImportResult {
        let record = &item.record;
        if item.exists_already && !override_existing {
            let mut result = ImportResult::new(record, ImportStatus::Skipped);
            result.conflict_type = Some(CONFLICT_EXISTING.to_string());
            return result;
        }

        let written = match to_endpoint_spec(record) {
            Ok(endpoint) => {
                if item.exists_already {
                    self.writer.update(partition, record, endpoint.as_ref()).await
                } else {
                    self.writer.create(partition, record, endpoint.as_ref()).await
                }
            }
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                self.index.remove_by_name(partition, &record.name);
                self.index.remove_by_id(&record.id);
                ImportResult::new(record, ImportStatus::Success)
            }
            Err(e) => {
                warn!(partition, server = %record.name, error = %e, "Failed to import server");
                let mut result = ImportResult::new(record, ImportStatus::Failed);
                result.error_message = Some(format!("Failed to import server: {:#}", e));
                result
            }
        }
    }
}
