//! Settings file and resolution into runnable accounts
//!
//! The settings file is TOML. [`Settings::load`] also reads a `.env`
//! file if present, so `password_env` can point at variables defined
//! there. [`Settings::resolve`] turns the raw settings into an
//! immutable [`Resolved`] snapshot: one [`Account`] per configured
//! folder, each bound to its notification targets.

use crate::account::{Account, AccountId, Password, TlsMode};
use crate::error::{Error, Result};
use crate::notify::{BackendKind, Gotify, Notifier, Ntfy, Pushover, TargetSlot, gotify};
use crate::store::DEFAULT_RETENTION;
use crate::supervisor::{FatalPolicy, SupervisorSettings};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DAY_SECS: u64 = 24 * 60 * 60;

/// Raw contents of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub supervisor: SupervisorFileSettings,
    /// Default targets for accounts that do not list their own.
    #[serde(default)]
    pub targets: Vec<TargetSettings>,
    #[serde(default)]
    pub accounts: Vec<AccountSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub retention_days: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("processed_emails.db"),
            retention_days: DEFAULT_RETENTION.as_secs() / DAY_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SupervisorFileSettings {
    pub reconnect_delay_secs: u64,
    pub reconnect_backoff_factor: u32,
    pub reconnect_max_delay_secs: u64,
    pub idle_timeout_secs: u64,
    pub on_fatal: FatalPolicy,
    pub alert_operators: bool,
}

impl Default for SupervisorFileSettings {
    fn default() -> Self {
        let defaults = SupervisorSettings::default();
        Self {
            reconnect_delay_secs: defaults.reconnect_delay.as_secs(),
            reconnect_backoff_factor: defaults.backoff_factor,
            reconnect_max_delay_secs: defaults.max_reconnect_delay.as_secs(),
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            on_fatal: defaults.on_fatal,
            alert_operators: defaults.alert_operators,
        }
    }
}

const fn default_ntfy_interval() -> u64 {
    5
}

const fn default_gotify_priority() -> u8 {
    gotify::DEFAULT_PRIORITY
}

/// One notification target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetSettings {
    Ntfy {
        url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_ntfy_interval")]
        min_interval_secs: u64,
    },
    Pushover {
        api_token: String,
        user_key: String,
        #[serde(default)]
        api_url: Option<String>,
        #[serde(default)]
        min_interval_secs: u64,
    },
    Gotify {
        url: String,
        token: String,
        #[serde(default = "default_gotify_priority")]
        priority: u8,
        #[serde(default)]
        min_interval_secs: u64,
    },
}

impl TargetSettings {
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Ntfy { .. } => BackendKind::Ntfy,
            Self::Pushover { .. } => BackendKind::Pushover,
            Self::Gotify { .. } => BackendKind::Gotify,
        }
    }

    fn build(&self, client: &reqwest::Client) -> Result<TargetSlot> {
        let slot = match self {
            Self::Ntfy {
                url,
                token,
                min_interval_secs,
            } => TargetSlot::new(
                Ntfy::new(client.clone(), non_empty("ntfy url", url)?, token.clone()),
                Duration::from_secs(*min_interval_secs),
            ),
            Self::Pushover {
                api_token,
                user_key,
                api_url,
                min_interval_secs,
            } => TargetSlot::new(
                Pushover::new(
                    client.clone(),
                    api_url.clone(),
                    non_empty("pushover api_token", api_token)?,
                    non_empty("pushover user_key", user_key)?,
                ),
                Duration::from_secs(*min_interval_secs),
            ),
            Self::Gotify {
                url,
                token,
                priority,
                min_interval_secs,
            } => TargetSlot::new(
                Gotify::new(
                    client.clone(),
                    non_empty("gotify url", url)?,
                    non_empty("gotify token", token)?,
                    *priority,
                ),
                Duration::from_secs(*min_interval_secs),
            ),
        };
        Ok(slot)
    }
}

fn default_folders() -> Vec<String> {
    vec!["INBOX".to_string()]
}

/// One IMAP login and the folders watched with it.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountSettings {
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Name of an environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
    /// Replaces the global targets for this account.
    #[serde(default)]
    pub targets: Option<Vec<TargetSettings>>,
}

impl fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSettings")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_env", &self.password_env)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("folders", &self.folders)
            .finish_non_exhaustive()
    }
}

impl AccountSettings {
    fn resolve_password(&self, env: &impl Fn(&str) -> Option<String>) -> Result<Password> {
        if let Some(password) = &self.password {
            return Ok(Password::new(password.clone()));
        }
        if let Some(var) = &self.password_env {
            return env(var).map(Password::new).ok_or_else(|| {
                Error::Config(format!("{}: environment variable {var} is not set", self.user))
            });
        }
        Err(Error::Config(format!("{}: no password configured", self.user)))
    }
}

/// The set of notification backends in use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities(BTreeSet<BackendKind>);

impl Capabilities {
    #[must_use]
    pub fn contains(&self, kind: BackendKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<String> = self.iter().map(|k| k.to_string()).collect();
        f.write_str(&names.join(", "))
    }
}

/// An immutable configuration snapshot ready to run.
#[derive(Debug)]
pub struct Resolved {
    pub accounts: Vec<Arc<Account>>,
    pub supervisor: SupervisorSettings,
    pub store_path: PathBuf,
    pub capabilities: Capabilities,
}

impl Settings {
    /// Read `.env` (if any) and parse the settings file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Loaded settings file");
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<Resolved> {
        self.resolve_with(|var| std::env::var(var).ok())
    }

    /// Resolve with an explicit environment lookup.
    ///
    /// Fails when no account is configured, an account has no
    /// password or no targets, or two entries watch the same
    /// `(user, host, folder)`.
    pub fn resolve_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<Resolved> {
        if self.accounts.is_empty() {
            return Err(Error::Config("no accounts configured".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut capabilities = BTreeSet::new();
        let global = Arc::new(build_notifier(&self.targets, &client, &mut capabilities)?);

        let mut seen = HashSet::new();
        let mut accounts = Vec::new();
        for settings in &self.accounts {
            if settings.host.trim().is_empty() {
                return Err(Error::Config(format!("{}: host is empty", settings.user)));
            }
            if settings.folders.is_empty() {
                return Err(Error::Config(format!("{}: no folders configured", settings.user)));
            }
            let password = settings.resolve_password(&env)?;

            let notifier = match &settings.targets {
                Some(targets) => Arc::new(build_notifier(targets, &client, &mut capabilities)?),
                None => Arc::clone(&global),
            };
            if notifier.is_empty() {
                return Err(Error::Config(format!(
                    "{}: no notification targets configured",
                    settings.user
                )));
            }

            for folder in &settings.folders {
                let id = AccountId::new(&settings.user, &settings.host, folder);
                if !seen.insert(id.clone()) {
                    return Err(Error::Config(format!("{id} is configured twice")));
                }
                accounts.push(Arc::new(Account {
                    id,
                    password: password.clone(),
                    port: settings.port.unwrap_or_else(|| settings.tls.default_port()),
                    tls: settings.tls,
                    accept_invalid_certs: settings.accept_invalid_certs,
                    notifier: Arc::clone(&notifier),
                }));
            }
        }

        let s = &self.supervisor;
        let supervisor = SupervisorSettings {
            reconnect_delay: Duration::from_secs(s.reconnect_delay_secs),
            backoff_factor: s.reconnect_backoff_factor,
            max_reconnect_delay: Duration::from_secs(s.reconnect_max_delay_secs),
            idle_timeout: Duration::from_secs(s.idle_timeout_secs),
            retention: Duration::from_secs(self.store.retention_days.saturating_mul(DAY_SECS)),
            on_fatal: s.on_fatal,
            alert_operators: s.alert_operators,
        };

        Ok(Resolved {
            accounts,
            supervisor,
            store_path: self.store.path.clone(),
            capabilities: Capabilities(capabilities),
        })
    }
}

fn build_notifier(
    targets: &[TargetSettings],
    client: &reqwest::Client,
    capabilities: &mut BTreeSet<BackendKind>,
) -> Result<Notifier> {
    let slots = targets
        .iter()
        .map(|t| {
            capabilities.insert(t.kind());
            t.build(client).map(Arc::new)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Notifier::new(slots))
}

fn non_empty(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::Config(format!("{field} is empty")))
    } else {
        Ok(trimmed.to_string())
    }
}
