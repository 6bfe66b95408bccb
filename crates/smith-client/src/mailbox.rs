//! Persisted mailbox.
//!
//! While the probe is disconnected the agent appends undeliverable messages to
//! `<mailbox_dir>/<pid>.json` as a JSON array in the wire schema. The client
//! drains that file once per reconnect, before the new connection carries any
//! live traffic.

use std::io;
use std::path::{Path, PathBuf};

use crate::bridge::protocol::Message;
use crate::dispatch::{Dispatcher, MessageHandler};

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("failed to read mailbox {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse mailbox {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to remove mailbox {}: {source}", .path.display())]
    Remove { path: PathBuf, source: io::Error },
}

/// Outcome of a drain that read the file successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dispatched: usize,
    /// Messages whose payload failed to decode. They do not block deletion.
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Mailbox {
    path: PathBuf,
}

impl Mailbox {
    pub fn new(dir: impl AsRef<Path>, pid: u32) -> Self {
        Self {
            path: dir.as_ref().join(format!("{pid}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dispatch every queued message in file order, then delete the file.
    ///
    /// A missing file is an empty mailbox. On a read or parse failure nothing
    /// is dispatched and the file is left in place.
    pub async fn drain<H: MessageHandler>(
        &self,
        dispatcher: &Dispatcher<H>,
    ) -> Result<DrainReport, MailboxError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No mailbox to drain");
                return Ok(DrainReport::default());
            }
            Err(source) => {
                return Err(MailboxError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let messages: Vec<Message> =
            serde_json::from_slice(&bytes).map_err(|source| MailboxError::Parse {
                path: self.path.clone(),
                source,
            })?;

        tracing::info!(path = %self.path.display(), count = messages.len(), "Draining mailbox");

        let mut report = DrainReport::default();
        for message in messages {
            match dispatcher.dispatch(message) {
                Ok(()) => report.dispatched += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable mailbox message");
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            tracing::warn!(
                failed = report.failed,
                "Mailbox contained undecodable messages"
            );
        }

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(MailboxError::Remove {
                    path: self.path.clone(),
                    source,
                });
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, RecordingHandler};
    use std::sync::Arc;

    fn setup() -> (tempfile::TempDir, Mailbox, Dispatcher<RecordingHandler>, Arc<RecordingHandler>) {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = Mailbox::new(dir.path(), 4242);
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = Dispatcher::new(Arc::clone(&handler));
        (dir, mailbox, dispatcher, handler)
    }

    #[test]
    fn path_is_keyed_by_pid() {
        let mailbox = Mailbox::new("/var/run/elkeid_rasp", 1234);
        assert_eq!(mailbox.path(), Path::new("/var/run/elkeid_rasp/1234.json"));
    }

    #[tokio::test]
    async fn absent_mailbox_is_noop() {
        let (_dir, mailbox, dispatcher, handler) = setup();

        let report = mailbox.drain(&dispatcher).await.unwrap();

        assert_eq!(report, DrainReport::default());
        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn drains_in_file_order_then_removes() {
        let (_dir, mailbox, dispatcher, handler) = setup();
        std::fs::write(
            mailbox.path(),
            r#"[
                {"operate":"config","data":{"config":"first"}},
                {"operate":"config","data":{"config":"second"}}
            ]"#,
        )
        .unwrap();

        let report = mailbox.drain(&dispatcher).await.unwrap();

        assert_eq!(report.dispatched, 2);
        assert_eq!(
            handler.calls(),
            vec![
                Call::Config("first".to_string()),
                Call::Config("second".to_string())
            ]
        );
        assert!(!mailbox.path().exists());
    }

    #[tokio::test]
    async fn parse_failure_preserves_file() {
        let (_dir, mailbox, dispatcher, handler) = setup();
        std::fs::write(mailbox.path(), "{not json").unwrap();

        let result = mailbox.drain(&dispatcher).await;

        assert!(matches!(result, Err(MailboxError::Parse { .. })));
        assert!(handler.calls().is_empty());
        assert!(mailbox.path().exists());
    }

    #[tokio::test]
    async fn undecodable_entry_does_not_block_deletion() {
        let (_dir, mailbox, dispatcher, handler) = setup();
        std::fs::write(
            mailbox.path(),
            r#"[
                {"operate":"limit","data":{"limits":[]}},
                {"operate":"control","data":{"action":1}},
                {"operate":"unheard_of","data":null}
            ]"#,
        )
        .unwrap();

        let report = mailbox.drain(&dispatcher).await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                dispatched: 2,
                failed: 1
            }
        );
        assert_eq!(handler.calls(), vec![Call::Control(1)]);
        assert!(!mailbox.path().exists());
    }
}
