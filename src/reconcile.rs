use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashSet;

use crate::ledger::Ledger;
use crate::models::{ApplicationRecord, ApplicationStatus, RejectionRecord};

/// Notes-field marker proving a rejection has been reconciled. This is the
/// only idempotency guard for the matching pass.
pub const MATCH_MARKER: &str = "\u{2713} Matched";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    JobId,
    CompanyPosition,
}

impl MatchKind {
    pub fn label(self) -> &'static str {
        match self {
            MatchKind::JobId => "Job ID",
            MatchKind::CompanyPosition => "Company+Position",
        }
    }
}

/// One planned link between a rejection row and an application row.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchUpdate {
    pub application_id: i64,
    pub rejection_id: i64,
    pub kind: MatchKind,
    pub received_date: NaiveDate,
    pub email_link: String,
    pub company: String,
    pub position: String,
}

/// Compute the one-to-one matching of unreconciled rejections to open
/// applications. Pure - callers apply the updates.
///
/// For each rejection (in insertion order), applications are scanned in
/// insertion order; per application a Job ID equality is tried before the
/// Company+Position comparison, and the first qualifying application wins.
/// An application can be claimed by at most one rejection per pass.
pub fn plan_matches(
    applications: &[ApplicationRecord],
    rejections: &[RejectionRecord],
) -> Vec<MatchUpdate> {
    let mut claimed: HashSet<i64> = HashSet::new();
    let mut updates = Vec::new();

    for rejection in rejections {
        if rejection.notes.contains(MATCH_MARKER) {
            continue;
        }

        for application in applications {
            if application.status == ApplicationStatus::Rejected
                || claimed.contains(&application.id)
            {
                continue;
            }

            if let Some(kind) = match_kind(application, rejection) {
                claimed.insert(application.id);
                updates.push(MatchUpdate {
                    application_id: application.id,
                    rejection_id: rejection.id,
                    kind,
                    received_date: rejection.received_date,
                    email_link: rejection.email_link.clone(),
                    company: rejection.company.clone(),
                    position: rejection.position.clone(),
                });
                break;
            }
        }
    }

    updates
}

fn match_kind(application: &ApplicationRecord, rejection: &RejectionRecord) -> Option<MatchKind> {
    // Priority 1: requisition identifier, the most reliable signal
    if let (Some(app_id), Some(rej_id)) = (&application.job_id, &rejection.job_id) {
        let app_id = app_id.trim();
        let rej_id = rej_id.trim();
        if !app_id.is_empty() && !rej_id.is_empty() && app_id == rej_id {
            return Some(MatchKind::JobId);
        }
    }

    // Priority 2: company and position, trimmed and case-folded
    let app_company = application.company.trim();
    let app_position = application.position.trim();
    let rej_company = rejection.company.trim();
    let rej_position = rejection.position.trim();
    if !app_company.is_empty()
        && !app_position.is_empty()
        && !rej_company.is_empty()
        && !rej_position.is_empty()
        && app_company.to_lowercase() == rej_company.to_lowercase()
        && app_position.to_lowercase() == rej_position.to_lowercase()
    {
        return Some(MatchKind::CompanyPosition);
    }

    None
}

/// Load both ledgers, plan the matching, and apply each update.
///
/// Updates are written as they are planned, not batched; a failure mid-pass
/// leaves the already-applied rows in place, and the marker makes a re-run
/// pick up exactly where this one stopped.
pub fn run_reconcile(ledger: &Ledger) -> Result<usize> {
    let applications = ledger.applications()?;
    let rejections = ledger.rejections()?;

    if applications.is_empty() {
        println!("No applications to match.");
        return Ok(0);
    }
    if rejections.is_empty() {
        println!("No rejections to match.");
        return Ok(0);
    }

    println!(
        "Found {} applications and {} rejections to check.",
        applications.len(),
        rejections.len()
    );

    let updates = plan_matches(&applications, &rejections);

    for update in &updates {
        let link = if update.email_link.is_empty() {
            None
        } else {
            Some(update.email_link.as_str())
        };
        ledger.update_application_status(
            update.application_id,
            ApplicationStatus::Rejected,
            update.received_date,
            link,
        )?;
        ledger.mark_rejection_matched(
            update.rejection_id,
            &format!("{} ({})", MATCH_MARKER, update.kind.label()),
        )?;
        println!(
            "  Updated: {} - {} -> Rejected ({})",
            update.company,
            update.position,
            update.kind.label()
        );
    }

    println!("\n=== Matching Complete ===");
    println!("Matched {} rejections to applications.", updates.len());

    Ok(updates.len())
}
