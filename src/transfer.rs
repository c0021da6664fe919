//! CSV / JSON export and import for the admin screens.
//!
//! CSV rows are double-quoted, comma-separated, with no escaping of embedded
//! quotes. Line breaks inside values are flattened to spaces on export so
//! each record stays on one line.

use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Campaign, CampaignStatus, ImageRecord, Lead, LeadStatus};
use crate::store::{generate_id, Record, RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("import file is empty")]
    Empty,

    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON array of records")]
    NotAnArray,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A record that can be written to and read from a CSV row.
pub trait CsvRecord: Record {
    const CSV_HEADER: &'static [&'static str];

    fn to_csv_row(&self) -> Vec<String>;

    /// Build a record from a row keyed by header name.
    fn from_csv_row(row: &HashMap<&str, &str>) -> Self;

    /// Minimal acceptance check: a name plus one identifying field.
    fn import_check(&self) -> Result<(), String>;
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct ImportRejection {
    pub row: usize,
    pub reason: String,
}

#[derive(serde::Serialize, Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub accepted: usize,
    pub rejected: Vec<ImportRejection>,
}

pub fn export_csv<T: CsvRecord>(records: &[T]) -> String {
    let mut out = T::CSV_HEADER.join(",");
    out.push('\n');
    for record in records {
        let row: Vec<String> = record
            .to_csv_row()
            .into_iter()
            .map(|field| format!("\"{}\"", field.replace(['\r', '\n'], " ")))
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

pub fn export_json<T: Record>(records: &[T]) -> Result<String, TransferError> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Split one CSV line. Quoted fields are taken up to the next `",`; fields
/// cannot contain that sequence.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = vec![];
    let mut rest = line.trim_end_matches(['\r', '\n']);
    loop {
        if let Some(quoted) = rest.strip_prefix('"') {
            match quoted.find("\",") {
                Some(end) => {
                    fields.push(quoted[..end].to_string());
                    rest = &quoted[end + 2..];
                }
                None => {
                    fields.push(quoted.strip_suffix('"').unwrap_or(quoted).to_string());
                    break;
                }
            }
        } else {
            match rest.find(',') {
                Some(end) => {
                    fields.push(rest[..end].trim().to_string());
                    rest = &rest[end + 1..];
                }
                None => {
                    fields.push(rest.trim().to_string());
                    break;
                }
            }
        }
    }
    fields
}

/// Parse CSV text into records; rows failing `import_check` are reported, not returned.
pub fn parse_csv<T: CsvRecord>(text: &str) -> Result<(Vec<T>, Vec<ImportRejection>), TransferError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = parse_csv_line(lines.next().ok_or(TransferError::Empty)?);
    let header: Vec<&str> = header.iter().map(|h| h.trim()).collect();
    let first = T::CSV_HEADER[0];
    if !header.iter().any(|h| h.eq_ignore_ascii_case(first)) {
        return Err(TransferError::MissingColumn(first));
    }

    let mut records = vec![];
    let mut rejected = vec![];
    for (index, line) in lines.enumerate() {
        let values = parse_csv_line(line);
        let mut row: HashMap<&str, &str> = HashMap::new();
        for (name, value) in header.iter().zip(values.iter()) {
            // Normalize header case to the canonical column names
            let key = T::CSV_HEADER
                .iter()
                .find(|c| c.eq_ignore_ascii_case(name))
                .copied()
                .unwrap_or(*name);
            row.insert(key, value.as_str());
        }
        let record = T::from_csv_row(&row);
        match record.import_check() {
            Ok(()) => records.push(record),
            Err(reason) => rejected.push(ImportRejection { row: index + 2, reason }),
        }
    }
    Ok((records, rejected))
}

pub fn parse_json<T: CsvRecord>(text: &str) -> Result<(Vec<T>, Vec<ImportRejection>), TransferError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(items) = value else {
        return Err(TransferError::NotAnArray);
    };

    let mut records = vec![];
    let mut rejected = vec![];
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<T>(item) {
            Ok(record) => match record.import_check() {
                Ok(()) => records.push(record),
                Err(reason) => rejected.push(ImportRejection { row: index + 1, reason }),
            },
            Err(e) => rejected.push(ImportRejection {
                row: index + 1,
                reason: e.to_string(),
            }),
        }
    }
    Ok((records, rejected))
}

/// Put the imported records on top of the store in file order, with one
/// write. Rows whose id is missing or already taken get a fresh id.
pub fn import_into<T: Record>(
    store: &mut RecordStore<T>,
    records: Vec<T>,
    rejected: Vec<ImportRejection>,
) -> Result<ImportReport, TransferError> {
    let now = Utc::now();
    let mut taken: HashSet<String> = store.all().iter().map(|r| r.id().to_string()).collect();
    let mut imported = Vec::with_capacity(records.len() + store.len());
    for mut record in records {
        if record.id().is_empty() || taken.contains(record.id()) {
            let mut id = generate_id(T::ID_PREFIX, now);
            while taken.contains(&id) {
                id = generate_id(T::ID_PREFIX, now);
            }
            record.set_id(id);
        }
        if record.created_at().is_none() {
            record.set_created_at(now);
        }
        taken.insert(record.id().to_string());
        imported.push(record);
    }

    let accepted = imported.len();
    if accepted > 0 {
        imported.extend(store.all().iter().cloned());
        store.replace_all(imported)?;
    }
    if !rejected.is_empty() {
        warn!(kind = T::KIND, rejected = rejected.len(), "import skipped rows");
    }
    debug!(kind = T::KIND, accepted, "import finished");
    Ok(ImportReport { accepted, rejected })
}

fn field<'a>(row: &HashMap<&str, &'a str>, name: &str) -> &'a str {
    row.get(name).copied().unwrap_or("").trim()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([';', '|'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl CsvRecord for Lead {
    const CSV_HEADER: &'static [&'static str] = &[
        "Name", "Email", "Phone", "Company", "Service", "Source", "Status", "Budget", "Timeline",
        "Message", "Created",
    ];

    fn to_csv_row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.email.clone(),
            self.phone.clone(),
            self.company.clone(),
            self.service.clone(),
            self.source.clone(),
            self.status.as_str().to_string(),
            self.budget.clone(),
            self.timeline.clone(),
            self.message.clone(),
            self.created_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ]
    }

    fn from_csv_row(row: &HashMap<&str, &str>) -> Self {
        Lead {
            name: field(row, "Name").to_string(),
            email: field(row, "Email").to_lowercase(),
            phone: field(row, "Phone").to_string(),
            company: field(row, "Company").to_string(),
            service: field(row, "Service").to_string(),
            source: match field(row, "Source") {
                "" => "import".to_string(),
                s => s.to_string(),
            },
            status: field(row, "Status").parse::<LeadStatus>().unwrap_or_default(),
            budget: field(row, "Budget").to_string(),
            timeline: field(row, "Timeline").to_string(),
            message: field(row, "Message").to_string(),
            created_at: chrono::DateTime::parse_from_rfc3339(field(row, "Created"))
                .ok()
                .map(|t| t.with_timezone(&chrono::Utc)),
            ..Default::default()
        }
    }

    fn import_check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("missing name".to_string());
        }
        if self.email.trim().is_empty() && self.phone.trim().is_empty() {
            return Err("missing email or phone".to_string());
        }
        Ok(())
    }
}

impl CsvRecord for Campaign {
    const CSV_HEADER: &'static [&'static str] = &[
        "Name", "Type", "Status", "Budget", "Target Audience", "Start Date", "End Date",
        "Description",
    ];

    fn to_csv_row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.campaign_type.clone(),
            self.status.as_str().to_string(),
            self.budget.to_string(),
            self.target_audience.join("; "),
            self.start_date.clone(),
            self.end_date.clone(),
            self.description.clone(),
        ]
    }

    fn from_csv_row(row: &HashMap<&str, &str>) -> Self {
        let status = field(row, "Status").parse::<CampaignStatus>().unwrap_or_default();
        Campaign {
            name: field(row, "Name").to_string(),
            campaign_type: field(row, "Type").to_string(),
            active: status == CampaignStatus::Active,
            status,
            budget: field(row, "Budget").parse().unwrap_or(0.0),
            target_audience: split_list(field(row, "Target Audience")),
            start_date: field(row, "Start Date").to_string(),
            end_date: field(row, "End Date").to_string(),
            description: field(row, "Description").to_string(),
            ..Default::default()
        }
    }

    fn import_check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("missing name".to_string());
        }
        if self.campaign_type.trim().is_empty() && self.start_date.trim().is_empty() {
            return Err("missing type or start date".to_string());
        }
        Ok(())
    }
}

impl CsvRecord for ImageRecord {
    const CSV_HEADER: &'static [&'static str] =
        &["Filename", "Category", "Width", "Height", "Alt", "Title"];

    fn to_csv_row(&self) -> Vec<String> {
        vec![
            self.filename.clone(),
            self.category.clone(),
            self.width.to_string(),
            self.height.to_string(),
            self.alt.clone(),
            self.title.clone(),
        ]
    }

    fn from_csv_row(row: &HashMap<&str, &str>) -> Self {
        ImageRecord {
            filename: field(row, "Filename").to_string(),
            category: field(row, "Category").to_string(),
            width: field(row, "Width").parse().unwrap_or(0),
            height: field(row, "Height").parse().unwrap_or(0),
            alt: field(row, "Alt").to_string(),
            title: field(row, "Title").to_string(),
            ..Default::default()
        }
    }

    fn import_check(&self) -> Result<(), String> {
        if self.filename.trim().is_empty() {
            return Err("missing filename".to_string());
        }
        Ok(())
    }
}
