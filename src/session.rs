//! One protocol session per monitored folder
//!
//! A [`Session`] owns its IMAP connection exclusively. It alternates
//! between waiting in IDLE and running a processing pass over the
//! folder's unseen messages until it is cancelled or the connection
//! fails. Retrying is left to the supervisor.

use crate::account::Account;
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use crate::headers::Summary;
use crate::idle::{self, IdleEvent};
use crate::status::{SessionState, StatusBoard};
use crate::store::DedupStore;
use async_imap::extensions::idle::IdleResponse;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Upper bound on the DONE/LOGOUT exchange during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Collaborators shared by every session of one generation.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub store: Arc<DedupStore>,
    pub status: StatusBoard,
    /// Longest silence tolerated while idling.
    pub idle_timeout: Duration,
    /// Age after which dedup records are swept.
    pub retention: Duration,
}

/// How one IDLE wait ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    NewMail,
    Cancelled,
}

/// Counters for one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub unseen: usize,
    pub notified: usize,
    pub already_notified: usize,
    pub failed: usize,
}

enum MessageOutcome {
    Notified,
    AlreadyNotified,
}

pub struct Session {
    account: Arc<Account>,
    ctx: Arc<SessionContext>,
    imap: Option<ImapSession>,
    state: SessionState,
    last_wait: Option<DateTime<Utc>>,
    connected_once: bool,
    /// The server reported new mail outside IDLE.
    mail_pending: bool,
}

impl Session {
    #[must_use]
    pub fn new(account: Arc<Account>, ctx: Arc<SessionContext>) -> Self {
        ctx.status.register(&account.id);
        Self {
            account,
            ctx,
            imap: None,
            state: SessionState::Disconnected,
            last_wait: None,
            connected_once: false,
            mail_pending: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// When the last IDLE wait completed with new mail.
    #[must_use]
    pub const fn last_wait(&self) -> Option<DateTime<Utc>> {
        self.last_wait
    }

    /// Whether [`connect`](Self::connect) ever succeeded on this session.
    #[must_use]
    pub const fn has_connected(&self) -> bool {
        self.connected_once
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.ctx.status.set_state(&self.account.id, state);
    }

    /// Drop the connection without saying goodbye.
    fn disconnect(&mut self) {
        self.imap = None;
        self.set_state(SessionState::Disconnected);
    }

    /// Open the connection and select the folder.
    pub async fn connect(&mut self) -> Result<()> {
        self.set_state(SessionState::Connecting);
        match connection::open(&self.account).await {
            Ok(imap) => {
                self.imap = Some(imap);
                self.connected_once = true;
                self.mail_pending = false;
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Enter IDLE and block until new mail arrives, the connection
    /// fails, or `cancel` fires.
    ///
    /// Unrelated pushes (`EXPUNGE`, flag updates, keepalives) keep the
    /// wait going. A `BYE`, end of stream, or `idle_timeout` of silence
    /// is reported as [`Error::ConnectionLost`].
    ///
    /// Returns [`WaitOutcome::NewMail`] without waiting when the server
    /// already announced new mail during the last pass or while IDLE
    /// was being entered.
    pub async fn wait_for_mail(&mut self, cancel: &CancellationToken) -> Result<WaitOutcome> {
        let Some(imap) = self.imap.take() else {
            return Err(Error::ConnectionLost("not connected".into()));
        };
        if cancel.is_cancelled() {
            self.imap = Some(imap);
            self.terminate().await;
            return Ok(WaitOutcome::Cancelled);
        }
        if std::mem::take(&mut self.mail_pending) {
            debug!(account = %self.account.id, "New mail arrived during the last pass");
            self.imap = Some(imap);
            self.last_wait = Some(Utc::now());
            self.ctx.status.touch(&self.account.id);
            return Ok(WaitOutcome::NewMail);
        }

        let queued = imap.unsolicited_responses.clone();
        let mut idle = imap.idle();
        if let Err(e) = idle.init().await {
            self.disconnect();
            return Err(Error::from_imap("IDLE", e));
        }
        debug!(account = %self.account.id, "Waiting for new mail");

        let outcome = if idle::announces_new_mail(std::iter::from_fn(|| queued.try_recv().ok())) {
            debug!(account = %self.account.id, "New mail announced before IDLE started");
            Ok(WaitOutcome::NewMail)
        } else {
            loop {
                let (wait, _stop) = idle.wait_with_timeout(self.ctx.idle_timeout);
                let response = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    response = wait => Some(response),
                };

                match response {
                    None => break Ok(WaitOutcome::Cancelled),
                    Some(Ok(IdleResponse::NewData(data))) => {
                        match IdleEvent::classify(data.parsed()) {
                            IdleEvent::NewMail => break Ok(WaitOutcome::NewMail),
                            IdleEvent::PeerAbort => {
                                break Err(Error::ConnectionLost("server sent BYE".into()));
                            }
                            IdleEvent::Other => {
                                trace!(account = %self.account.id, "Ignoring response while idling");
                            }
                        }
                    }
                    Some(Ok(IdleResponse::Timeout)) => {
                        break Err(Error::ConnectionLost(format!(
                            "no data for {:?} while idling",
                            self.ctx.idle_timeout
                        )));
                    }
                    Some(Ok(IdleResponse::ManualInterrupt)) => {
                        break Err(Error::ConnectionLost("connection closed while idling".into()));
                    }
                    Some(Err(e)) => break Err(Error::from_imap("IDLE", e)),
                }
            }
        };

        match outcome {
            Ok(WaitOutcome::NewMail) => match idle.done().await {
                Ok(imap) => {
                    self.imap = Some(imap);
                    self.last_wait = Some(Utc::now());
                    self.ctx.status.touch(&self.account.id);
                    Ok(WaitOutcome::NewMail)
                }
                Err(e) => {
                    self.disconnect();
                    Err(Error::from_imap("DONE", e))
                }
            },
            Ok(WaitOutcome::Cancelled) => {
                self.set_state(SessionState::Terminating);
                match tokio::time::timeout(SHUTDOWN_GRACE, idle.done()).await {
                    Ok(Ok(imap)) => {
                        self.imap = Some(imap);
                        self.terminate().await;
                    }
                    Ok(Err(e)) => debug!("DONE failed during shutdown: {}", e),
                    Err(_) => debug!("DONE timed out during shutdown"),
                }
                self.imap = None;
                Ok(WaitOutcome::Cancelled)
            }
            Err(e) => {
                drop(idle);
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Notify about every unseen message that has not been notified
    /// before, then sweep old dedup records.
    ///
    /// A failure on one message is logged and counted. A lost
    /// connection ends the pass early with [`Error::ConnectionLost`].
    pub async fn process_unseen(&mut self) -> Result<PassReport> {
        self.set_state(SessionState::Processing);
        let Some(imap) = self.imap.as_mut() else {
            self.set_state(SessionState::Disconnected);
            return Err(Error::ConnectionLost("not connected".into()));
        };

        let result = process_pass(imap, &self.account, &self.ctx).await;
        match &result {
            Ok(report) => {
                self.mail_pending = idle::announces_new_mail(std::iter::from_fn(|| {
                    imap.unsolicited_responses.try_recv().ok()
                }));
                info!(
                    account = %self.account.id,
                    unseen = report.unseen,
                    notified = report.notified,
                    failed = report.failed,
                    "Processing pass finished"
                );
                self.ctx.status.touch(&self.account.id);
                self.set_state(SessionState::Ready);
            }
            Err(_) => self.disconnect(),
        }
        result
    }

    /// Connect, then alternate between waiting and processing until
    /// cancelled. Returns `Ok(())` only after cancellation.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.set_state(SessionState::Terminating);
                return Ok(());
            }
            result = self.connect() => result?,
        }

        loop {
            match self.wait_for_mail(cancel).await? {
                WaitOutcome::Cancelled => return Ok(()),
                WaitOutcome::NewMail => {
                    self.process_unseen().await?;
                }
            }
        }
    }

    /// LOGOUT (bounded, best-effort) and release the connection.
    pub async fn terminate(&mut self) {
        self.set_state(SessionState::Terminating);
        if let Some(mut imap) = self.imap.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, connection::logout(&mut imap))
                .await
                .is_err()
        {
            debug!(account = %self.account.id, "LOGOUT timed out");
        }
        info!(account = %self.account.id, "Session closed");
    }
}

async fn process_pass(
    imap: &mut ImapSession,
    account: &Account,
    ctx: &SessionContext,
) -> Result<PassReport> {
    let key = account.store_key();
    let uids = connection::unseen_uids(imap).await?;
    debug!(account = %account.id, count = uids.len(), "Unseen messages");

    let mut report = PassReport {
        unseen: uids.len(),
        ..PassReport::default()
    };

    for uid in uids {
        match process_message(imap, account, ctx, &key, uid).await {
            Ok(MessageOutcome::Notified) => report.notified += 1,
            Ok(MessageOutcome::AlreadyNotified) => report.already_notified += 1,
            Err(e) if e.is_recoverable() => return Err(e),
            Err(e) => {
                warn!(account = %account.id, uid, "Skipping message: {}", e);
                ctx.status.record_error(&account.id, &format!("UID {uid}: {e}"));
                report.failed += 1;
            }
        }
    }

    match ctx.store.sweep_older_than(ctx.retention) {
        Ok(0) => {}
        Ok(removed) => debug!(removed, "Swept old dedup records"),
        Err(e) => {
            error!(account = %account.id, "Retention sweep failed: {}", e);
            ctx.status.record_error(&account.id, &format!("Retention sweep failed: {e}"));
        }
    }

    Ok(report)
}

async fn process_message(
    imap: &mut ImapSession,
    account: &Account,
    ctx: &SessionContext,
    key: &str,
    uid: u32,
) -> Result<MessageOutcome> {
    if ctx.store.is_notified(key, uid)? {
        trace!(account = %account.id, uid, "Already notified");
        return Ok(MessageOutcome::AlreadyNotified);
    }

    let header = connection::fetch_header(imap, uid).await?;
    let summary = Summary::from_raw(&header);
    info!(
        account = %account.id,
        uid,
        from = summary.from.as_deref().unwrap_or_default(),
        subject = summary.subject.as_deref().unwrap_or_default(),
        "New message"
    );

    let fan_out = account
        .notifier
        .send(summary.from.as_deref(), summary.subject.as_deref())
        .await;
    if !fan_out.all_delivered() {
        warn!(
            account = %account.id,
            uid,
            failed = fan_out.failed,
            "Some notification targets failed"
        );
    }

    ctx.store.mark_notified(key, uid)?;
    ctx.status.record_notified(&account.id);
    Ok(MessageOutcome::Notified)
}
