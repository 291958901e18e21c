use anyhow::Result;
use std::collections::HashSet;

use crate::config::Config;
use crate::extract::{classify, CompletionProvider};
use crate::ledger::Ledger;
use crate::mail::{permalink, MailThread, Mailbox};
use crate::models::EmailType;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

enum ThreadOutcome {
    Recorded,
    Duplicate,
    Skipped,
}

/// One bounded ingestion pass: search, classify, route, label.
///
/// A failing thread never aborts the batch; failures before the loop
/// (search, dedup-key scan) propagate to the caller.
pub fn run_ingest(
    mailbox: &mut dyn Mailbox,
    provider: &dyn CompletionProvider,
    ledger: &Ledger,
    config: &Config,
) -> Result<IngestStats> {
    let seen = ledger.existing_thread_ids()?;
    let threads = mailbox.search(&config.search_query, config.max_per_run)?;

    if threads.is_empty() {
        println!("No new job application emails found.");
        return Ok(IngestStats::default());
    }

    println!("Found {} emails to process.", threads.len());

    let mut stats = IngestStats {
        total: threads.len(),
        ..Default::default()
    };

    for (index, thread) in threads.iter().enumerate() {
        let outcome = process_thread(
            mailbox,
            provider,
            ledger,
            config,
            thread,
            &seen,
            index,
            stats.total,
        );
        match outcome {
            Ok(ThreadOutcome::Recorded) => stats.processed += 1,
            Ok(ThreadOutcome::Duplicate) | Ok(ThreadOutcome::Skipped) => stats.skipped += 1,
            Err(e) => {
                eprintln!("Error processing thread {}: {e:#}", thread.id);
                stats.errors += 1;
            }
        }
    }

    println!("\n=== Processing Complete ===");
    println!("Processed: {}", stats.processed);
    println!("Skipped:   {}", stats.skipped);
    println!("Errors:    {}", stats.errors);
    println!("Total emails: {}", stats.total);

    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
fn process_thread(
    mailbox: &mut dyn Mailbox,
    provider: &dyn CompletionProvider,
    ledger: &Ledger,
    config: &Config,
    thread: &MailThread,
    seen: &HashSet<String>,
    index: usize,
    total: usize,
) -> Result<ThreadOutcome> {
    if seen.contains(&thread.id) {
        // Replay guard: already in a ledger, so just label it to keep it
        // out of future candidate sets.
        println!("Skipping duplicate thread: {}", thread.id);
        mailbox.add_label(&thread.id, &config.label_name)?;
        return Ok(ThreadOutcome::Duplicate);
    }

    println!("Processing email {}/{}: {}", index + 1, total, thread.subject);

    let data = match classify(provider, &thread.subject, &thread.body) {
        Ok(data) => data,
        Err(failure) => {
            println!("No data for thread {}: {}", thread.id, failure);
            return Ok(ThreadOutcome::Skipped);
        }
    };

    let link = permalink(&thread.id);
    let date = thread.date.date_naive();

    match data.email_type {
        EmailType::Confirmation => {
            ledger.append_application(&data, date, &link)?;
            println!("  Added confirmation: {} - {}", data.company, data.position);
            mailbox.add_label(&thread.id, &config.label_name)?;
            Ok(ThreadOutcome::Recorded)
        }
        EmailType::Rejection => {
            ledger.append_rejection(&data, date, &link)?;
            println!("  Added rejection: {} - {}", data.company, data.position);
            mailbox.add_label(&thread.id, &config.label_name)?;
            Ok(ThreadOutcome::Recorded)
        }
        EmailType::Other => {
            // Deliberately left unlabeled so it can be reprocessed later.
            println!("  Skipped 'other' email: {}", thread.subject);
            Ok(ThreadOutcome::Skipped)
        }
    }
}
