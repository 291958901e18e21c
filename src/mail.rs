use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use mailparse::{parse_mail, MailHeaderMap};
use scraper::Html;
use std::fs;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

/// One searchable mail conversation. The pipeline only ever looks at the
/// first message, so that is all we carry.
#[derive(Debug, Clone)]
pub struct MailThread {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub date: DateTime<Utc>,
}

/// Mailbox operations the pipeline needs. Implemented over Gmail IMAP in
/// production and by an in-memory fake in tests.
pub trait Mailbox {
    /// Bounded search; the query uses Gmail search syntax.
    fn search(&mut self, query: &str, limit: usize) -> Result<Vec<MailThread>>;
    fn add_label(&mut self, thread_id: &str, label: &str) -> Result<()>;
    fn remove_label(&mut self, thread_id: &str, label: &str) -> Result<()>;
    /// Thread ids currently carrying the label, account-wide.
    fn labeled_threads(&mut self, label: &str) -> Result<Vec<String>>;
}

/// Reference string recorded in the ledgers; the embedded thread id is the
/// dedup key recovered later by `Ledger::existing_thread_ids`.
pub fn permalink(thread_id: &str) -> String {
    format!("https://mail.google.com/mail/u/0/#inbox/{thread_id}")
}

pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl MailConfig {
    pub fn gmail(username: &str, app_password: &str) -> Self {
        Self {
            server: "imap.gmail.com".to_string(),
            port: 993,
            username: username.to_string(),
            password: app_password.trim().to_string(),
        }
    }

    pub fn from_gmail_password_file(username: &str, password_file: &Path) -> Result<Self> {
        let password = fs::read_to_string(password_file)
            .with_context(|| format!("Failed to read password file: {:?}", password_file))?;
        Ok(Self::gmail(username, &password))
    }
}

type TlsSession = imap::Session<native_tls::TlsStream<TcpStream>>;

pub struct GmailMailbox {
    session: TlsSession,
}

impl GmailMailbox {
    pub fn connect(config: &MailConfig) -> Result<Self> {
        let tls = native_tls::TlsConnector::builder().build()?;

        let addr = (config.server.as_str(), config.port);
        let tcp = TcpStream::connect(addr).context("Failed to connect to IMAP server")?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;
        tcp.set_write_timeout(Some(Duration::from_secs(30)))?;
        let tls_stream = tls.connect(&config.server, tcp)?;

        let client = imap::Client::new(tls_stream);
        let mut session = client
            .login(&config.username, &config.password)
            .map_err(|e| anyhow!("Login failed: {}", e.0))?;

        session.select("INBOX")?;
        Ok(Self { session })
    }

    pub fn logout(mut self) -> Result<()> {
        self.session.logout()?;
        Ok(())
    }
}

impl Mailbox for GmailMailbox {
    fn search(&mut self, query: &str, limit: usize) -> Result<Vec<MailThread>> {
        let found = self.session.uid_search(gm_raw_query(query))?;
        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        uids.truncate(limit);

        let mut threads = Vec::new();
        for uid in uids {
            let messages = self.session.uid_fetch(uid.to_string(), "RFC822")?;
            for message in messages.iter() {
                if let Some(raw) = message.body() {
                    match parse_thread(uid, raw) {
                        Ok(thread) => threads.push(thread),
                        Err(e) => eprintln!("  Skipping unreadable message {uid}: {e}"),
                    }
                }
            }
        }

        Ok(threads)
    }

    fn add_label(&mut self, thread_id: &str, label: &str) -> Result<()> {
        self.session
            .uid_store(thread_id, format!("+X-GM-LABELS (\"{label}\")"))?;
        Ok(())
    }

    fn remove_label(&mut self, thread_id: &str, label: &str) -> Result<()> {
        self.session
            .uid_store(thread_id, format!("-X-GM-LABELS (\"{label}\")"))?;
        Ok(())
    }

    fn labeled_threads(&mut self, label: &str) -> Result<Vec<String>> {
        // Labeled mail may be archived, so look beyond the inbox. Later
        // remove_label calls use uids from this same mailbox selection.
        self.session.select("[Gmail]/All Mail")?;
        let found = self
            .session
            .uid_search(gm_raw_query(&format!("label:{label}")))?;
        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        Ok(uids.into_iter().map(|uid| uid.to_string()).collect())
    }
}

/// Wrap a Gmail-syntax query for the X-GM-RAW IMAP extension.
fn gm_raw_query(query: &str) -> String {
    let escaped = query.replace('\\', "\\\\").replace('"', "\\\"");
    format!("X-GM-RAW \"{escaped}\"")
}

fn parse_thread(uid: u32, raw: &[u8]) -> Result<MailThread> {
    let parsed = parse_mail(raw)?;

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_default();

    // Undated messages fall back to the fetch time; ingestion only keeps
    // the calendar date anyway.
    let date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    let body = extract_text_body(&parsed)?;

    Ok(MailThread {
        id: uid.to_string(),
        subject,
        body,
        date,
    })
}

/// Plain-text body of the message, preferring text/plain parts and falling
/// back to flattened HTML.
fn extract_text_body(parsed: &mailparse::ParsedMail) -> Result<String> {
    if parsed.subparts.is_empty() {
        // Single part email
        let content_type = parsed
            .headers
            .get_first_value("Content-Type")
            .unwrap_or_default();
        let body = parsed.get_body()?;
        if content_type.contains("text/html") {
            return Ok(flatten_html(&body));
        }
        return Ok(body);
    }

    for part in &parsed.subparts {
        let content_type = part
            .headers
            .get_first_value("Content-Type")
            .unwrap_or_default();
        if content_type.contains("text/plain") {
            return Ok(part.get_body()?);
        }
    }

    for part in &parsed.subparts {
        let content_type = part
            .headers
            .get_first_value("Content-Type")
            .unwrap_or_default();
        if content_type.contains("text/html") {
            return Ok(flatten_html(&part.get_body()?));
        }
    }

    // Last resort - first part
    if let Some(part) = parsed.subparts.first() {
        return Ok(part.get_body()?);
    }

    Err(anyhow!("No email body found"))
}

fn flatten_html(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permalink_embeds_thread_id() {
        assert_eq!(
            permalink("18c2f3ab"),
            "https://mail.google.com/mail/u/0/#inbox/18c2f3ab"
        );
    }

    #[test]
    fn test_gm_raw_query_escapes_quotes() {
        let wrapped = gm_raw_query(r#"subject:"thank you" -label:Tracked"#);
        assert_eq!(
            wrapped,
            "X-GM-RAW \"subject:\\\"thank you\\\" -label:Tracked\""
        );
    }

    #[test]
    fn test_parse_thread_plain_text() {
        let raw = b"Subject: Thank you for applying\r\n\
            Date: Mon, 3 Aug 2026 14:22:05 +0000\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            We received your application.";
        let thread = parse_thread(42, raw).unwrap();
        assert_eq!(thread.id, "42");
        assert_eq!(thread.subject, "Thank you for applying");
        assert!(thread.body.contains("We received your application."));
        assert_eq!(thread.date.date_naive().to_string(), "2026-08-03");
    }

    #[test]
    fn test_extract_text_body_prefers_plain_part() {
        let raw = b"Subject: test\r\n\
            Content-Type: multipart/alternative; boundary=\"sep\"\r\n\
            \r\n\
            --sep\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            plain body\r\n\
            --sep\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <html><body><p>html body</p></body></html>\r\n\
            --sep--\r\n";
        let parsed = parse_mail(raw).unwrap();
        let body = extract_text_body(&parsed).unwrap();
        assert!(body.contains("plain body"));
        assert!(!body.contains("html"));
    }

    #[test]
    fn test_extract_text_body_flattens_html_only_mail() {
        let raw = b"Subject: test\r\n\
            Content-Type: multipart/alternative; boundary=\"sep\"\r\n\
            \r\n\
            --sep\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <html><body><p>Unfortunately, we have decided</p><p>to pursue other candidates.</p></body></html>\r\n\
            --sep--\r\n";
        let parsed = parse_mail(raw).unwrap();
        let body = extract_text_body(&parsed).unwrap();
        assert!(body.contains("Unfortunately, we have decided"));
        assert!(!body.contains("<p>"));
    }

    #[test]
    fn test_flatten_html_single_part() {
        let raw = b"Subject: test\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <div>application <b>received</b></div>";
        let parsed = parse_mail(raw).unwrap();
        let body = extract_text_body(&parsed).unwrap();
        assert!(body.contains("application"));
        assert!(body.contains("received"));
        assert!(!body.contains('<'));
    }
}
