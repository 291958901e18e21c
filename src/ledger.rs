use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::{ApplicationRecord, ApplicationStatus, ExtractedEmailData, RejectionRecord};

/// Initial note on every rejection row, replaced by the matched marker
/// once reconciliation links it to an application.
pub const REJECTION_DEFAULT_NOTE: &str = "Match to main sheet manually";

/// Dedup keys are the thread identifiers embedded in stored email links.
const THREAD_ID_PATTERN: &str = r"inbox/([a-zA-Z0-9]+)";

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger at {}", path.display()))?;
        ensure_tables(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        ensure_tables(&conn)?;
        Ok(Self { conn })
    }

    fn default_path() -> Result<PathBuf> {
        // XDG data directory or fallback to the working directory
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "apptrack") {
            Ok(proj_dirs.data_dir().join("tracker.db"))
        } else {
            Ok(PathBuf::from("tracker.db"))
        }
    }

    // --- Appends ---

    pub fn append_application(
        &self,
        data: &ExtractedEmailData,
        date: NaiveDate,
        email_link: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO applications
                (position, job_id, company, location, applied_date,
                 salary_range, email_link, notes, status, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, '', ?7, ?8)",
            params![
                data.position,
                data.job_id,
                data.company,
                data.location,
                date,
                email_link,
                ApplicationStatus::Applied.as_str(),
                date,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn append_rejection(
        &self,
        data: &ExtractedEmailData,
        date: NaiveDate,
        email_link: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO rejections
                (received_date, company, position, job_id, email_link, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                date,
                data.company,
                data.position,
                data.job_id,
                email_link,
                REJECTION_DEFAULT_NOTE,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // --- Full-table reads, in insertion order ---

    pub fn applications(&self) -> Result<Vec<ApplicationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, position, job_id, company, location, applied_date,
                    salary_range, email_link, notes, status, last_updated
             FROM applications ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_application)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read applications")
    }

    pub fn rejections(&self) -> Result<Vec<RejectionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, received_date, company, position, job_id, email_link, notes
             FROM rejections ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_rejection)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read rejections")
    }

    // --- Targeted updates ---

    /// Status/last-updated always change together; the email link is only
    /// overwritten when the caller supplies a replacement.
    pub fn update_application_status(
        &self,
        id: i64,
        status: ApplicationStatus,
        last_updated: NaiveDate,
        email_link: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE applications SET status = ?1, last_updated = ?2 WHERE id = ?3",
            params![status.as_str(), last_updated, id],
        )?;
        if let Some(link) = email_link {
            self.conn.execute(
                "UPDATE applications SET email_link = ?1 WHERE id = ?2",
                params![link, id],
            )?;
        }
        Ok(())
    }

    pub fn mark_rejection_matched(&self, id: i64, note: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE rejections SET notes = ?1 WHERE id = ?2",
            params![note, id],
        )?;
        Ok(())
    }

    // --- Dedup keys ---

    /// Thread identifiers already recorded in either ledger, extracted from
    /// the email-link columns.
    pub fn existing_thread_ids(&self) -> Result<HashSet<String>> {
        let re = Regex::new(THREAD_ID_PATTERN)?;
        let mut ids = HashSet::new();

        for table in ["applications", "rejections"] {
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT email_link FROM {table}"))?;
            let links = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for link in links {
                if let Some(caps) = re.captures(&link?) {
                    ids.insert(caps[1].to_string());
                }
            }
        }

        Ok(ids)
    }
}

/// Both tables are created lazily the first time a ledger is opened.
/// Column order mirrors the published sheet layouts:
/// Applications = Position | Job ID | Company | Location | Date |
/// Salary Range | Email Link | Notes | Status | Last Updated;
/// Rejections = Date Received | Company | Position | Job ID | Email Link | Notes.
fn ensure_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS applications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            position TEXT NOT NULL,
            job_id TEXT,
            company TEXT NOT NULL,
            location TEXT,
            applied_date TEXT NOT NULL,
            salary_range TEXT,
            email_link TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'Applied' CHECK (status IN ('Applied', 'Rejected')),
            last_updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rejections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            received_date TEXT NOT NULL,
            company TEXT NOT NULL,
            position TEXT NOT NULL,
            job_id TEXT,
            email_link TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT ''
        );
        "#,
    )?;
    Ok(())
}

fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<ApplicationRecord> {
    let status_raw: String = row.get(9)?;
    let status = ApplicationStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown status '{status_raw}'").into(),
        )
    })?;
    Ok(ApplicationRecord {
        id: row.get(0)?,
        position: row.get(1)?,
        job_id: row.get(2)?,
        company: row.get(3)?,
        location: row.get(4)?,
        applied_date: row.get(5)?,
        salary_range: row.get(6)?,
        email_link: row.get(7)?,
        notes: row.get(8)?,
        status,
        last_updated: row.get(10)?,
    })
}

fn row_to_rejection(row: &rusqlite::Row) -> rusqlite::Result<RejectionRecord> {
    Ok(RejectionRecord {
        id: row.get(0)?,
        received_date: row.get(1)?,
        company: row.get(2)?,
        position: row.get(3)?,
        job_id: row.get(4)?,
        email_link: row.get(5)?,
        notes: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailType;

    fn confirmation(company: &str, position: &str) -> ExtractedEmailData {
        ExtractedEmailData {
            email_type: EmailType::Confirmation,
            company: company.to_string(),
            position: position.to_string(),
            location: Some("Remote".to_string()),
            job_id: Some("R42".to_string()),
        }
    }

    fn rejection(company: &str, position: &str) -> ExtractedEmailData {
        ExtractedEmailData {
            email_type: EmailType::Rejection,
            company: company.to_string(),
            position: position.to_string(),
            location: None,
            job_id: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_append_and_read_application() {
        let ledger = Ledger::open_in_memory().unwrap();
        let id = ledger
            .append_application(
                &confirmation("Acme", "Engineer"),
                date("2026-08-01"),
                "https://mail.google.com/mail/u/0/#inbox/18c2f3ab",
            )
            .unwrap();

        let apps = ledger.applications().unwrap();
        assert_eq!(apps.len(), 1);
        let app = &apps[0];
        assert_eq!(app.id, id);
        assert_eq!(app.company, "Acme");
        assert_eq!(app.position, "Engineer");
        assert_eq!(app.job_id, Some("R42".to_string()));
        assert_eq!(app.status, ApplicationStatus::Applied);
        assert_eq!(app.applied_date, date("2026-08-01"));
        assert_eq!(app.last_updated, date("2026-08-01"));
        assert_eq!(app.salary_range, None);
        assert_eq!(app.notes, "");
    }

    #[test]
    fn test_append_and_read_rejection() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .append_rejection(
                &rejection("Acme", "Engineer"),
                date("2026-08-02"),
                "https://mail.google.com/mail/u/0/#inbox/19aa00ff",
            )
            .unwrap();

        let rejs = ledger.rejections().unwrap();
        assert_eq!(rejs.len(), 1);
        assert_eq!(rejs[0].received_date, date("2026-08-02"));
        assert_eq!(rejs[0].notes, REJECTION_DEFAULT_NOTE);
    }

    #[test]
    fn test_reads_preserve_insertion_order() {
        let ledger = Ledger::open_in_memory().unwrap();
        for name in ["First", "Second", "Third"] {
            ledger
                .append_application(
                    &confirmation(name, "Engineer"),
                    date("2026-08-01"),
                    &format!("https://mail.google.com/mail/u/0/#inbox/{name}"),
                )
                .unwrap();
        }
        let companies: Vec<String> = ledger
            .applications()
            .unwrap()
            .into_iter()
            .map(|a| a.company)
            .collect();
        assert_eq!(companies, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn test_existing_thread_ids_scans_both_tables() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .append_application(
                &confirmation("Acme", "Engineer"),
                date("2026-08-01"),
                "https://mail.google.com/mail/u/0/#inbox/aaa111",
            )
            .unwrap();
        ledger
            .append_rejection(
                &rejection("Beta", "Analyst"),
                date("2026-08-02"),
                "https://mail.google.com/mail/u/0/#inbox/bbb222",
            )
            .unwrap();

        let ids = ledger.existing_thread_ids().unwrap();
        assert!(ids.contains("aaa111"));
        assert!(ids.contains("bbb222"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_existing_thread_ids_ignores_unparseable_links() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .append_application(
                &confirmation("Acme", "Engineer"),
                date("2026-08-01"),
                "not a permalink",
            )
            .unwrap();
        assert!(ledger.existing_thread_ids().unwrap().is_empty());
    }

    #[test]
    fn test_update_application_status_and_link() {
        let ledger = Ledger::open_in_memory().unwrap();
        let id = ledger
            .append_application(
                &confirmation("Acme", "Engineer"),
                date("2026-08-01"),
                "https://mail.google.com/mail/u/0/#inbox/orig",
            )
            .unwrap();

        ledger
            .update_application_status(
                id,
                ApplicationStatus::Rejected,
                date("2026-08-05"),
                Some("https://mail.google.com/mail/u/0/#inbox/newer"),
            )
            .unwrap();

        let app = &ledger.applications().unwrap()[0];
        assert_eq!(app.status, ApplicationStatus::Rejected);
        assert_eq!(app.last_updated, date("2026-08-05"));
        assert_eq!(app.email_link, "https://mail.google.com/mail/u/0/#inbox/newer");
        // the applied date and user column stay put
        assert_eq!(app.applied_date, date("2026-08-01"));
        assert_eq!(app.salary_range, None);
    }

    #[test]
    fn test_update_without_link_keeps_original() {
        let ledger = Ledger::open_in_memory().unwrap();
        let id = ledger
            .append_application(
                &confirmation("Acme", "Engineer"),
                date("2026-08-01"),
                "https://mail.google.com/mail/u/0/#inbox/orig",
            )
            .unwrap();

        ledger
            .update_application_status(id, ApplicationStatus::Rejected, date("2026-08-05"), None)
            .unwrap();

        let app = &ledger.applications().unwrap()[0];
        assert_eq!(app.email_link, "https://mail.google.com/mail/u/0/#inbox/orig");
    }

    #[test]
    fn test_mark_rejection_matched() {
        let ledger = Ledger::open_in_memory().unwrap();
        let id = ledger
            .append_rejection(
                &rejection("Acme", "Engineer"),
                date("2026-08-02"),
                "https://mail.google.com/mail/u/0/#inbox/x1",
            )
            .unwrap();

        ledger
            .mark_rejection_matched(id, "\u{2713} Matched (Job ID)")
            .unwrap();
        assert_eq!(ledger.rejections().unwrap()[0].notes, "\u{2713} Matched (Job ID)");
    }

    #[test]
    fn test_stored_dates_have_no_time_component() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .append_application(
                &confirmation("Acme", "Engineer"),
                date("2026-08-01"),
                "https://mail.google.com/mail/u/0/#inbox/t1",
            )
            .unwrap();

        let raw: String = ledger
            .conn
            .query_row("SELECT applied_date FROM applications", [], |row| row.get(0))
            .unwrap();
        assert_eq!(raw, "2026-08-01");
    }
}
