//! Helpers shared by the integration tests.

#![allow(dead_code)]

use futures::future::BoxFuture;
use idle_notifier::notify::{BackendKind, NotificationTarget, Notifier, TargetSlot};
use idle_notifier::{Account, AccountId, DedupStore, Password, SessionContext, StatusBoard, TlsMode};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const USER: &str = "testuser";
pub const PASSWORD: &str = "testpass";

/// A minimal RFC 5322 message.
pub fn raw_message(from: &str, subject: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: testuser@example.com\r\n\
         Subject: {subject}\r\n\
         Date: Mon, 01 Jan 2024 12:00:00 +0000\r\n\
         Message-ID: <{subject}@fake.test>\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Hello."
    )
    .into_bytes()
}

/// Notification target that records calls in memory.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    fail: bool,
}

impl Recorder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn notifier(&self) -> Notifier {
        Notifier::new(vec![Arc::new(TargetSlot::new(self.clone(), Duration::ZERO))])
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until at least `n` calls were recorded. Panics after 10s.
    pub async fn wait_for_calls(&self, n: usize) -> Vec<(String, String)> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let calls = self.calls();
            if calls.len() >= n {
                return calls;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} notification(s), got {calls:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl NotificationTarget for Recorder {
    fn kind(&self) -> BackendKind {
        BackendKind::Custom
    }

    fn label(&self) -> String {
        "recorder".to_string()
    }

    fn send<'a>(
        &'a self,
        sender: &'a str,
        subject: &'a str,
    ) -> BoxFuture<'a, idle_notifier::Result<()>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((sender.to_string(), subject.to_string()));
            if self.fail {
                Err(idle_notifier::Error::Notify("recorder told to fail".into()))
            } else {
                Ok(())
            }
        })
    }
}

pub fn pair(sender: &str, subject: &str) -> (String, String) {
    (sender.to_string(), subject.to_string())
}

/// An account pointed at a fake server on `port`.
pub fn account(port: u16, folder: &str, notifier: Notifier) -> Arc<Account> {
    Arc::new(Account {
        id: AccountId::new(USER, "127.0.0.1", folder),
        password: Password::new(PASSWORD),
        port,
        tls: TlsMode::Implicit,
        accept_invalid_certs: true,
        notifier: Arc::new(notifier),
    })
}

pub fn context(store: Arc<DedupStore>) -> Arc<SessionContext> {
    Arc::new(SessionContext {
        store,
        status: StatusBoard::new(),
        idle_timeout: Duration::from_secs(60),
        retention: Duration::from_secs(7 * 24 * 60 * 60),
    })
}

pub fn memory_store() -> Arc<DedupStore> {
    Arc::new(DedupStore::open_in_memory().unwrap())
}

/// Trigger that makes recording UID 2 fail.
pub const REJECT_UID_2: &str = "
    CREATE TRIGGER reject_uid_2 BEFORE INSERT ON processed_emails
    WHEN NEW.uid = 2
    BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;";

/// Trigger that makes every delete fail.
pub const REJECT_DELETES: &str = "
    CREATE TRIGGER reject_deletes BEFORE DELETE ON processed_emails
    BEGIN SELECT RAISE(ABORT, 'attempt to write a readonly database'); END;";

/// A store at `path` with `sql` applied through a second connection.
pub fn store_with(path: &Path, sql: &str) -> Arc<DedupStore> {
    let store = DedupStore::open(path).unwrap();
    rusqlite::Connection::open(path)
        .unwrap()
        .execute_batch(sql)
        .unwrap();
    Arc::new(store)
}
