mod config;
mod extract;
mod ledger;
mod mail;
mod models;
mod notify;
mod pipeline;
mod reconcile;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use extract::GeminiProvider;
use ledger::Ledger;
use mail::{GmailMailbox, MailConfig, Mailbox};

#[derive(Parser)]
#[command(name = "apptrack")]
#[command(about = "Job application email tracker - classify emails, record them, match rejections")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct MailArgs {
    /// Gmail address
    #[arg(short, long)]
    username: String,

    /// Path to app password file
    #[arg(short, long, default_value = "~/.gmail.app_password.txt")]
    password_file: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Daily automation: process new emails, then match rejections
    Run {
        #[command(flatten)]
        mail: MailArgs,

        /// Number of days to look back
        #[arg(short, long, default_value = "7")]
        days: u32,

        /// Maximum emails to process per run
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Process new emails only
    Ingest {
        #[command(flatten)]
        mail: MailArgs,

        /// Number of days to look back
        #[arg(short, long, default_value = "7")]
        days: u32,

        /// Maximum emails to process per run
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Match recorded rejections to applications
    Match,

    /// Show ledger contents
    List {
        /// Show the rejections ledger instead of applications
        #[arg(long)]
        rejections: bool,
    },

    /// Store the Gemini API key (one-time setup)
    SetupKey {
        /// API key to store
        key: String,
    },

    /// Verify the stored API key with a tiny completion
    TestKey,

    /// List models available to the stored API key
    Models,

    /// Remove the tracking label everywhere so emails get reprocessed
    ResetLabels {
        #[command(flatten)]
        mail: MailArgs,

        /// Actually remove the labels (without this, only counts)
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { mail, days, limit } => {
            let config = build_config(&mail, days, limit)?;
            let ledger = Ledger::open_default()?;
            ingest_with_alert(&config, &ledger)?;
            println!();
            println!("Starting rejection matching...");
            reconcile::run_reconcile(&ledger)?;
        }

        Commands::Ingest { mail, days, limit } => {
            let config = build_config(&mail, days, limit)?;
            let ledger = Ledger::open_default()?;
            ingest_with_alert(&config, &ledger)?;
        }

        Commands::Match => {
            let ledger = Ledger::open_default()?;
            println!("Starting rejection matching...");
            reconcile::run_reconcile(&ledger)?;
        }

        Commands::List { rejections } => {
            let ledger = Ledger::open_default()?;
            if rejections {
                list_rejections(&ledger)?;
            } else {
                list_applications(&ledger)?;
            }
        }

        Commands::SetupKey { key } => {
            let path = config::store_api_key(&key)?;
            println!("API key stored at {}", path.display());
        }

        Commands::TestKey => {
            let api_key = config::load_api_key()?;
            println!("Testing API key...");
            let provider = GeminiProvider::new(api_key, extract::DEFAULT_MODEL.to_string());
            let reply = extract::self_test(&provider)?;
            println!("API key works. Model said: {}", reply.trim());
        }

        Commands::Models => {
            let api_key = config::load_api_key()?;
            let models = extract::list_models(&api_key)?;
            if models.is_empty() {
                println!("No models returned.");
            } else {
                println!("Available models:");
                for model in models {
                    println!("- {}", model.name);
                    if !model.supported_generation_methods.is_empty() {
                        println!("  Methods: {}", model.supported_generation_methods.join(", "));
                    }
                }
            }
        }

        Commands::ResetLabels { mail, yes } => {
            let mail_config = mail_config(&mail)?;
            println!("Connecting to Gmail as {}...", mail_config.username);
            let mut mailbox = GmailMailbox::connect(&mail_config)?;

            let label = config::DEFAULT_LABEL;
            let threads = mailbox.labeled_threads(label)?;
            if threads.is_empty() {
                println!("No threads carry the '{label}' label.");
                return Ok(());
            }

            if !yes {
                println!(
                    "{} threads carry the '{label}' label. Re-run with --yes to remove it; \
                     all of them will be reprocessed on the next run.",
                    threads.len()
                );
                return Ok(());
            }

            println!("Removing label from {} threads...", threads.len());
            for thread_id in &threads {
                mailbox.remove_label(thread_id, label)?;
            }
            mailbox.logout()?;
            println!("Done. All labels removed.");
        }
    }

    Ok(())
}

fn mail_config(mail: &MailArgs) -> Result<MailConfig> {
    let password_path = config::expand_home(&mail.password_file);
    MailConfig::from_gmail_password_file(&mail.username, &password_path)
}

fn build_config(mail: &MailArgs, days: u32, limit: usize) -> Result<Config> {
    let mail_config = mail_config(mail)?;
    let gemini_api_key = config::load_api_key()?;
    let label_name = config::DEFAULT_LABEL.to_string();

    Ok(Config {
        search_query: config::default_search_query(&label_name, days),
        label_name,
        max_per_run: limit,
        username: mail_config.username,
        app_password: mail_config.password,
        gemini_api_key,
        model_id: extract::DEFAULT_MODEL.to_string(),
    })
}

/// Run one ingestion pass; on a fatal failure, alert the operator's own
/// mailbox before propagating. Reconciliation failures deliberately skip
/// the alert - they abort only the matching pass.
fn ingest_with_alert(config: &Config, ledger: &Ledger) -> Result<()> {
    match ingest_pass(config, ledger) {
        Ok(()) => Ok(()),
        Err(error) => {
            eprintln!("Run failed: {error:#}");
            if let Err(notify_error) = notify::send_failure_alert(config, &format!("{error:#}")) {
                eprintln!("Could not send failure alert: {notify_error:#}");
            }
            Err(error)
        }
    }
}

fn ingest_pass(config: &Config, ledger: &Ledger) -> Result<()> {
    println!("Starting job application processing...");

    let provider = GeminiProvider::new(config.gemini_api_key.clone(), config.model_id.clone());
    let mail_config = MailConfig::gmail(&config.username, &config.app_password);

    println!("Connecting to Gmail as {}...", config.username);
    let mut mailbox =
        GmailMailbox::connect(&mail_config).context("Could not reach the mailbox")?;

    pipeline::run_ingest(&mut mailbox, &provider, ledger, config)?;

    mailbox.logout()?;
    Ok(())
}

fn list_applications(ledger: &Ledger) -> Result<()> {
    let apps = ledger.applications()?;
    if apps.is_empty() {
        println!("No applications recorded.");
        return Ok(());
    }

    println!(
        "{:<6} {:<10} {:<22} {:<26} {:<12} {:<12}",
        "ID", "STATUS", "COMPANY", "POSITION", "APPLIED", "UPDATED"
    );
    println!("{}", "-".repeat(92));
    for app in apps {
        println!(
            "{:<6} {:<10} {:<22} {:<26} {:<12} {:<12}",
            app.id,
            app.status.as_str(),
            truncate(&app.company, 20),
            truncate(&app.position, 24),
            app.applied_date,
            app.last_updated
        );
    }
    Ok(())
}

fn list_rejections(ledger: &Ledger) -> Result<()> {
    let rejections = ledger.rejections()?;
    if rejections.is_empty() {
        println!("No rejections recorded.");
        return Ok(());
    }

    println!(
        "{:<6} {:<12} {:<22} {:<26} {:<24}",
        "ID", "RECEIVED", "COMPANY", "POSITION", "NOTES"
    );
    println!("{}", "-".repeat(94));
    for rejection in rejections {
        println!(
            "{:<6} {:<12} {:<22} {:<26} {:<24}",
            rejection.id,
            rejection.received_date,
            truncate(&rejection.company, 20),
            truncate(&rejection.position, 24),
            truncate(&rejection.notes, 22)
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(truncate("Acme", 10), "Acme");
    }

    #[test]
    fn test_truncate_long_string_gets_ellipsis() {
        assert_eq!(truncate("A very long company name", 10), "A very ...");
    }
}
