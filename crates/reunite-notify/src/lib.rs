//! reunite-notify: notices sent when an upload matches a filed report.
//!
//! A [`MatchDecision`](reunite_core::MatchDecision) is the only gate: a match
//! yields an administrator notice and, when the reporter left an email, a
//! reporter notice. Nothing is produced for any other outcome.

pub mod notice;
pub mod notifier;

pub use notice::{plan_notices, Notice, NoticeConfig, Recipient};
pub use notifier::{notify, DispatchSummary, LogNotifier, Notifier, NotifyError, OutboxNotifier};
