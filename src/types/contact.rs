//! Contact record types for CSV import functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One contact row as mapped from CSV.
///
/// Field names are matched against lowercased CSV headers, so uploads may
/// use any header casing (`ContactGUID`, `contactguid`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(rename = "contactguid")]
    pub contact_guid: Uuid,
    #[serde(rename = "contactcreated", default)]
    pub contact_created: Option<DateTime<Utc>>,
    #[serde(rename = "contactfirstname", default)]
    pub first_name: Option<String>,
    #[serde(rename = "contactmiddlename", default)]
    pub middle_name: Option<String>,
    #[serde(rename = "contactlastname", default)]
    pub last_name: Option<String>,
    #[serde(rename = "contactemail", default)]
    pub email: Option<String>,
    #[serde(rename = "contactaddress1", default)]
    pub address_line: Option<String>,
    #[serde(rename = "contactage", default)]
    pub age: Option<i32>,
}

/// Reduced row shape for delete imports: only the identity key is read.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactDeleteRecord {
    #[serde(rename = "contactguid")]
    pub contact_guid: Uuid,
}

/// A resolved contact group the import can link contacts into.
#[derive(Debug, Clone)]
pub struct ContactGroup {
    pub id: i64,
    pub guid: Uuid,
    pub name: String,
}

/// Outcome of processing a single record. The hot path only tracks counts;
/// per-record results currently surface for failures.
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub success: bool,
    pub contact_guid: Option<Uuid>,
    pub message: Option<String>,
}

impl ImportResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            contact_guid: None,
            message: Some(message.into()),
        }
    }
}
