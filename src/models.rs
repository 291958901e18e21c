use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Classification assigned to an email by the extraction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailType {
    Confirmation,
    Rejection,
    Other,
}

impl EmailType {
    /// Unknown labels fall through to `Other` so they produce no record.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "confirmation" => EmailType::Confirmation,
            "rejection" => EmailType::Rejection,
            _ => EmailType::Other,
        }
    }
}

/// Structured fields pulled out of one email. Transient - routed into a
/// ledger row or dropped, never stored as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEmailData {
    pub email_type: EmailType,
    pub company: String,
    pub position: String,
    pub location: Option<String>,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Applied,
    Rejected,
}

impl ApplicationStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Applied" => Some(ApplicationStatus::Applied),
            "Rejected" => Some(ApplicationStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "Applied",
            ApplicationStatus::Rejected => "Rejected",
        }
    }
}

/// One row in the Applications ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: i64,
    pub position: String,
    pub job_id: Option<String>,
    pub company: String,
    pub location: Option<String>,
    pub applied_date: NaiveDate,
    pub salary_range: Option<String>, // user-entered, never written by the pipeline
    pub email_link: String,
    pub notes: String,
    pub status: ApplicationStatus,
    pub last_updated: NaiveDate,
}

/// One row in the Rejections ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub id: i64,
    pub received_date: NaiveDate,
    pub company: String,
    pub position: String,
    pub job_id: Option<String>,
    pub email_link: String,
    pub notes: String,
}
