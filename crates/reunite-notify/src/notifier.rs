//! Notice delivery: the `Notifier` seam, log and outbox transports, and `notify`.

use crate::notice::{plan_notices, Notice, NoticeConfig, Recipient};
use reunite_core::{MatchDecision, UploadCandidate};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("outbox {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize notice: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport rejected notice to {to}: {reason}")]
    Transport { to: String, reason: String },
}

/// Delivery seam for notices. Implementations must not retry.
pub trait Notifier {
    fn deliver(&self, notice: &Notice) -> Result<(), NotifyError>;
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
        (**self).deliver(notice)
    }
}

/// Writes notices to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
        tracing::info!(
            id = %notice.id,
            recipient = ?notice.recipient,
            to = %notice.to,
            subject = %notice.subject,
            attachments = ?notice.attachments,
            "notice"
        );
        tracing::debug!(id = %notice.id, body = %notice.body, "notice body");
        Ok(())
    }
}

/// Drops each notice as `<id>.json` into a directory for a mailer to pick up.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, NotifyError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| NotifyError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Notifier for OutboxNotifier {
    fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
        let path = self.dir.join(format!("{}.json", notice.id));
        let json = serde_json::to_vec_pretty(notice)?;
        std::fs::write(&path, json).map_err(|source| NotifyError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), to = %notice.to, "notice queued in outbox");
        Ok(())
    }
}

/// What [`notify`] delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: Vec<Recipient>,
}

impl DispatchSummary {
    pub fn admin_notified(&self) -> bool {
        self.delivered.contains(&Recipient::Admin)
    }

    pub fn reporter_notified(&self) -> bool {
        self.delivered.contains(&Recipient::Reporter)
    }
}

/// Deliver the notices owed for one upload's decision.
///
/// Call once per processed upload. Delivers nothing unless `decision` is a
/// match. The first delivery failure is returned and later notices are not
/// attempted.
pub fn notify<N: Notifier>(
    notifier: &N,
    decision: &MatchDecision,
    upload: &UploadCandidate,
    config: &NoticeConfig,
) -> Result<DispatchSummary, NotifyError> {
    let mut summary = DispatchSummary::default();

    for notice in plan_notices(decision, upload, config) {
        notifier.deliver(&notice)?;
        summary.delivered.push(notice.recipient);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reunite_core::{Location, MissingChildRecord, Photo, ReportStatus, ReporterContact};
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recording {
        sent: RefCell<Vec<Notice>>,
        fail_for: Option<Recipient>,
    }

    impl Notifier for Recording {
        fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
            if self.fail_for == Some(notice.recipient) {
                return Err(NotifyError::Transport {
                    to: notice.to.clone(),
                    reason: "mailbox unavailable".into(),
                });
            }
            self.sent.borrow_mut().push(notice.clone());
            Ok(())
        }
    }

    fn matched(email: Option<&str>) -> MatchDecision {
        MatchDecision::Matched {
            record: MissingChildRecord {
                id: 7,
                child_name: "Arjun".into(),
                age: 9,
                last_seen_area: "Railway Station".into(),
                distinguishing_marks: String::new(),
                dress_color: "green".into(),
                reporter: ReporterContact {
                    name: "Priya".into(),
                    relation: "aunt".into(),
                    phone: "555-0111".into(),
                    email: email.map(String::from),
                },
                photo: Photo::Missing,
                embedding: None,
                status: ReportStatus::Missing,
                submitted_at: Utc::now(),
            },
            score: 0.71,
        }
    }

    fn upload() -> UploadCandidate {
        UploadCandidate::new(Photo::Missing, "Sam", "555-0122", Location::default())
    }

    #[test]
    fn test_no_match_sends_nothing() {
        let notifier = Recording::default();
        let summary = notify(&notifier, &MatchDecision::NoMatch, &upload(), &NoticeConfig::default()).unwrap();
        assert_eq!(summary, DispatchSummary::default());
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn test_match_sends_admin_and_reporter() {
        let notifier = Recording::default();
        let summary = notify(&notifier, &matched(Some("priya@example.org")), &upload(), &NoticeConfig::default()).unwrap();
        assert!(summary.admin_notified());
        assert!(summary.reporter_notified());

        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].recipient, Recipient::Admin);
        assert_eq!(sent[1].to, "priya@example.org");
    }

    #[test]
    fn test_missing_reporter_email_is_not_fatal() {
        let notifier = Recording::default();
        let summary = notify(&notifier, &matched(None), &upload(), &NoticeConfig::default()).unwrap();
        assert_eq!(summary.delivered, vec![Recipient::Admin]);
    }

    #[test]
    fn test_admin_failure_stops_dispatch() {
        let notifier = Recording {
            fail_for: Some(Recipient::Admin),
            ..Recording::default()
        };
        let err = notify(&notifier, &matched(Some("priya@example.org")), &upload(), &NoticeConfig::default())
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport { .. }));
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn test_outbox_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxNotifier::new(dir.path().join("outbox")).unwrap();
        let summary = notify(&outbox, &matched(Some("priya@example.org")), &upload(), &NoticeConfig::default()).unwrap();
        assert_eq!(summary.delivered.len(), 2);

        let files: Vec<_> = std::fs::read_dir(outbox.dir()).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(files.len(), 2);

        let raw = std::fs::read_to_string(files[0].path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["record_id"], 7);
        assert!(value["subject"].as_str().unwrap().contains("Match"));
    }

    #[test]
    fn test_log_notifier_accepts_notice() {
        let summary = notify(&LogNotifier, &matched(None), &upload(), &NoticeConfig::default()).unwrap();
        assert!(summary.admin_notified());
    }
}
