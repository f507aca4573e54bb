//! Account supervisor
//!
//! Runs one task per monitored folder. Each task keeps a [`Session`]
//! alive: recoverable failures reconnect after a delay, fatal ones
//! alert operators and either stop the account or restart it,
//! depending on [`FatalPolicy`]. Cancelling the token handed to
//! [`Supervisor::run`] stops every task; `run` returns once all of
//! them have exited.

use crate::account::Account;
use crate::backoff::Backoff;
use crate::error::{Error, ErrorKind};
use crate::session::{Session, SessionContext};
use crate::status::{SessionState, StatusBoard};
use crate::store::{DEFAULT_RETENTION, DedupStore};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What to do after an account hits a non-recoverable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FatalPolicy {
    /// Stop monitoring the account.
    #[default]
    GiveUp,
    /// Treat it like a lost connection and reconnect after the delay.
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub reconnect_delay: Duration,
    /// 1 keeps the delay fixed.
    pub backoff_factor: u32,
    pub max_reconnect_delay: Duration,
    pub idle_timeout: Duration,
    pub retention: Duration,
    pub on_fatal: FatalPolicy,
    /// Send "Script Error" notifications for fatal errors.
    pub alert_operators: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(30),
            backoff_factor: 1,
            max_reconnect_delay: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(480),
            retention: DEFAULT_RETENTION,
            on_fatal: FatalPolicy::GiveUp,
            alert_operators: true,
        }
    }
}

impl SupervisorSettings {
    fn backoff(&self) -> Backoff {
        if self.backoff_factor <= 1 {
            return Backoff::fixed(self.reconnect_delay);
        }
        Backoff::new(
            self.reconnect_delay,
            self.backoff_factor,
            self.max_reconnect_delay,
        )
    }
}

/// How a supervised account task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountExit {
    Cancelled,
    Failed,
}

/// Tally of account exits after [`Supervisor::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cancelled: usize,
    pub failed: usize,
}

pub struct Supervisor {
    accounts: Vec<Arc<Account>>,
    settings: SupervisorSettings,
    store: Arc<DedupStore>,
    status: StatusBoard,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        accounts: Vec<Arc<Account>>,
        settings: SupervisorSettings,
        store: Arc<DedupStore>,
    ) -> Self {
        Self {
            accounts,
            settings,
            store,
            status: StatusBoard::new(),
        }
    }

    /// Report into an existing board, e.g. one that outlives a reload.
    #[must_use]
    pub fn with_status(mut self, status: StatusBoard) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Spawn one task per account and wait for all of them.
    pub async fn run(self, cancel: CancellationToken) -> RunSummary {
        let ctx = Arc::new(SessionContext {
            store: self.store,
            status: self.status,
            idle_timeout: self.settings.idle_timeout,
            retention: self.settings.retention,
        });
        let settings = Arc::new(self.settings);

        let mut join_set = JoinSet::new();
        for account in self.accounts {
            ctx.status.register(&account.id);
            join_set.spawn(supervise(
                account,
                Arc::clone(&ctx),
                Arc::clone(&settings),
                cancel.clone(),
            ));
        }

        let mut summary = RunSummary::default();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(AccountExit::Cancelled) => summary.cancelled += 1,
                Ok(AccountExit::Failed) => summary.failed += 1,
                Err(e) => {
                    error!("Account task aborted: {}", e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

/// Keep one account's session running until cancellation or a fatal
/// error under [`FatalPolicy::GiveUp`].
pub async fn supervise(
    account: Arc<Account>,
    ctx: Arc<SessionContext>,
    settings: Arc<SupervisorSettings>,
    cancel: CancellationToken,
) -> AccountExit {
    let id = &account.id;
    info!(account = %id, "Monitoring account");
    let mut backoff = settings.backoff();

    loop {
        let mut session = Session::new(Arc::clone(&account), Arc::clone(&ctx));
        let result = AssertUnwindSafe(session.run(&cancel)).catch_unwind().await;
        let connected = session.has_connected();
        drop(session);

        let error = match result {
            Ok(Ok(())) => {
                info!(account = %id, "Stopped monitoring account");
                return AccountExit::Cancelled;
            }
            Ok(Err(e)) => e,
            Err(panic) => Error::Internal(format!("session panicked: {}", panic_message(&*panic))),
        };

        if connected {
            backoff.reset();
        }
        ctx.status.record_error(id, &error.to_string());

        if error.is_recoverable() {
            warn!(account = %id, "{}; reconnecting in {:?}", error, backoff.peek());
        } else {
            error!(account = %id, "{}", error);
            if settings.alert_operators {
                account.notifier.alert(&alert_message(&error)).await;
            }
            if settings.on_fatal == FatalPolicy::GiveUp {
                ctx.status.set_state(id, SessionState::Failed);
                warn!(account = %id, "Giving up on account");
                return AccountExit::Failed;
            }
            info!(account = %id, "Restarting account in {:?}", backoff.peek());
        }

        if !sleep_or_cancel(backoff.advance(), &cancel).await {
            info!(account = %id, "Stopped monitoring account");
            return AccountExit::Cancelled;
        }
        ctx.status.record_reconnect(id);
    }
}

/// False if `cancel` fired first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

fn alert_message(error: &Error) -> String {
    match error {
        Error::Auth(_) | Error::Tls(_) => format!("Cannot connect: {error}"),
        other if other.kind() == ErrorKind::Fatal => {
            format!("An unexpected error occurred: {error}")
        }
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
