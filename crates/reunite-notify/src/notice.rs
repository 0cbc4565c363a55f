use chrono::{DateTime, Utc};
use reunite_core::{Location, MatchDecision, MissingChildRecord, UploadCandidate};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

const ADMIN_SUBJECT: &str = "Match Found in Missing Child Database";
const REPORTER_SUBJECT: &str = "Possible Match Found for Missing Child";

/// Addresses and sign-off used when composing notices.
#[derive(Debug, Clone)]
pub struct NoticeConfig {
    pub admin_email: String,
    pub from_email: String,
    pub signature: String,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            admin_email: "admin@localhost".into(),
            from_email: "noreply@localhost".into(),
            signature: "Missing Child Detection System".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipient {
    Admin,
    Reporter,
}

/// One outgoing message, ready for a transport.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub id: Uuid,
    pub recipient: Recipient,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Upload photo and matched reference photo, when they exist on disk.
    pub attachments: Vec<PathBuf>,
    pub upload_id: Uuid,
    pub record_id: u64,
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

/// Notices owed for one upload's decision, admin first.
///
/// Empty unless the decision is `Matched`.
pub fn plan_notices(decision: &MatchDecision, upload: &UploadCandidate, config: &NoticeConfig) -> Vec<Notice> {
    let MatchDecision::Matched { record, score } = decision else {
        return Vec::new();
    };

    let attachments: Vec<PathBuf> = [upload.photo.existing_file(), record.photo.existing_file()]
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .collect();

    let notice = |recipient, to: &str, subject: &str, body: String| Notice {
        id: Uuid::new_v4(),
        recipient,
        from: config.from_email.clone(),
        to: to.to_string(),
        subject: subject.to_string(),
        body,
        attachments: attachments.clone(),
        upload_id: upload.id,
        record_id: record.id,
        score: *score,
        created_at: Utc::now(),
    };

    let mut notices = vec![notice(
        Recipient::Admin,
        &config.admin_email,
        ADMIN_SUBJECT,
        admin_body(record, *score, upload, &config.signature),
    )];

    match record.reporter.email() {
        Some(email) => notices.push(notice(
            Recipient::Reporter,
            email,
            REPORTER_SUBJECT,
            reporter_body(record, &upload.location, &config.signature),
        )),
        None => tracing::info!(record = record.id, "reporter email missing; admin notice only"),
    }

    notices
}

fn admin_body(record: &MissingChildRecord, score: f32, upload: &UploadCandidate, signature: &str) -> String {
    let mut body = String::new();
    body.push_str("A possible match has been found!\n\n");
    let _ = writeln!(body, "Child Name: {}", record.child_name);
    let _ = writeln!(body, "Age: {}", record.age);
    let _ = writeln!(body, "Last Seen Area: {}", record.last_seen_area);
    let _ = writeln!(body, "Similarity: {score:.2}");
    let _ = writeln!(
        body,
        "Photo submitted by: {} ({})\n",
        upload.uploader_name, upload.uploader_contact
    );
    body.push_str("Upload Location Details:\n");
    push_location(&mut body, &upload.location);
    body.push_str("\nPlease verify the details in the admin dashboard.\n\n");
    let _ = write!(body, "-- {signature}");
    body
}

fn reporter_body(record: &MissingChildRecord, location: &Location, signature: &str) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Dear {},\n", record.reporter.name);
    body.push_str("Our system has found a possible match related to the missing child you reported.\n\n");
    let _ = writeln!(body, "Child Name: {}", record.child_name);
    let _ = writeln!(body, "Approx. Age: {}", record.age);
    let _ = writeln!(body, "Last Seen Area: {}\n", record.last_seen_area);
    body.push_str("Upload Location:\n");
    push_location(&mut body, location);
    body.push_str("\nOur team has been notified and will review the match shortly.\n");
    body.push_str("Thank you for helping us in the search for missing children.\n\n");
    let _ = write!(body, "-- {signature}");
    body
}

fn push_location(body: &mut String, location: &Location) {
    let coord = |c: Option<f64>| c.map_or_else(|| "unknown".to_string(), |v| format!("{v:.6}"));
    let _ = writeln!(body, "Address: {}", location.address.as_deref().unwrap_or("unknown"));
    let _ = writeln!(body, "Latitude: {}", coord(location.latitude));
    let _ = writeln!(body, "Longitude: {}", coord(location.longitude));
}
