//! IMAP connection and mailbox commands
//!
//! Opens TLS-wrapped sessions (implicit TLS or STARTTLS), logs in,
//! checks for IDLE support, and selects the monitored folder. Also
//! provides the per-message commands a processing pass needs.

use crate::account::{Account, TlsMode};
use crate::error::{Error, Result};
use async_imap::Session;
use futures::StreamExt;
use rustls::pki_types::{CertificateDer, ServerName};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

/// A TLS-wrapped IMAP session.
pub type ImapSession = Session<Compat<TlsStream<TcpStream>>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a TLS connector.
///
/// Verifies against the platform's root certificates unless
/// `accept_invalid_certs` is set, in which case any certificate is
/// accepted (self-signed local bridges).
fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let builder = rustls::ClientConfig::builder();
    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let rustls_native_certs::CertificateResult { certs, errors, .. } =
            rustls_native_certs::load_native_certs();
        if certs.is_empty()
            && let Some(err) = errors.into_iter().next()
        {
            return Err(Error::Tls(format!("Cannot load root certificates: {err}")));
        }
        builder
            .with_root_certificates(root_store(certs))
            .with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Trust anchors from the platform store. Certificates rustls cannot
/// parse are skipped.
fn root_store(certs: Vec<CertificateDer<'static>>) -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!(added, ignored, "Loaded native root certificates");
    roots
}

/// A rejected certificate surfaces as `InvalidData`; anything else
/// is the network.
fn handshake_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::InvalidData {
        Error::Tls(e.to_string())
    } else {
        Error::ConnectionLost(format!("TLS handshake failed: {e}"))
    }
}

async fn tls_handshake(account: &Account, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
    let connector = tls_connector(account.accept_invalid_certs)?;
    let server_name = ServerName::try_from(account.id.host.clone())
        .map_err(|e| Error::Config(format!("Invalid server name: {e}")))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(handshake_error)
}

/// Open the transport, authenticate, and select the account's folder.
///
/// Network failures come back as recoverable errors. A rejected login
/// is [`Error::Auth`]; a missing folder or a server without IDLE is
/// [`Error::Config`].
pub async fn open(account: &Account) -> Result<ImapSession> {
    let addr = (account.id.host.as_str(), account.port);
    debug!(
        host = %account.id.host,
        port = account.port,
        tls = ?account.tls,
        "Connecting to IMAP server"
    );

    let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::ConnectionLost(format!("Connect to {}:{} timed out", addr.0, addr.1)))??;

    let tls_stream = match account.tls {
        TlsMode::Implicit => tls_handshake(account, tcp).await?,
        TlsMode::StartTls => {
            let mut client = async_imap::Client::new(tcp.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| Error::from_imap("STARTTLS", e))?;
            let tcp = client.into_inner().into_inner();
            tls_handshake(account, tcp).await?
        }
    };

    let client = async_imap::Client::new(tls_stream.compat());
    let mut session = client
        .login(&account.id.user, account.password.as_str())
        .await
        .map_err(|(e, _)| match e {
            async_imap::error::Error::No(msg) => Error::Auth(msg),
            other => Error::from_imap("LOGIN", other),
        })?;

    let capabilities = session
        .capabilities()
        .await
        .map_err(|e| Error::from_imap("CAPABILITY", e))?;
    if !capabilities.has_str("IDLE") {
        logout(&mut session).await;
        return Err(Error::Config(format!(
            "{} does not advertise IDLE",
            account.id.host
        )));
    }

    if let Err(e) = select(&mut session, &account.id.folder).await {
        logout(&mut session).await;
        return Err(e);
    }

    info!(account = %account.id, "Connected to IMAP server");
    Ok(session)
}

/// SELECT a folder on an existing session.
pub async fn select(session: &mut ImapSession, folder: &str) -> Result<()> {
    session.select(folder).await.map_err(|e| match e {
        async_imap::error::Error::No(msg) => {
            Error::Config(format!("Failed to select {folder}: {msg}"))
        }
        other => Error::from_imap(&format!("SELECT {folder}"), other),
    })?;
    Ok(())
}

/// UIDs of every message in the selected folder without `\Seen`,
/// lowest first.
pub async fn unseen_uids(session: &mut ImapSession) -> Result<Vec<u32>> {
    let uids = session
        .uid_search("UNSEEN")
        .await
        .map_err(|e| Error::from_imap("UID SEARCH", e))?;

    let mut uid_list: Vec<u32> = uids.into_iter().collect();
    uid_list.sort_unstable();
    Ok(uid_list)
}

/// Fetch the header block of one message without setting `\Seen`.
///
/// The whole response is drained before returning so the session is
/// ready for the next command.
pub async fn fetch_header(session: &mut ImapSession, uid: u32) -> Result<Vec<u8>> {
    let uid_set = format!("{uid}");
    let mut messages = session
        .uid_fetch(&uid_set, "(UID BODY.PEEK[HEADER])")
        .await
        .map_err(|e| Error::from_imap("UID FETCH", e))?;

    let mut header = None;
    while let Some(msg_result) = messages.next().await {
        let msg = msg_result.map_err(|e| Error::from_imap("UID FETCH", e))?;
        if header.is_none() {
            header = msg.header().map(<[u8]>::to_vec);
        }
    }
    drop(messages);

    header.ok_or_else(|| Error::Imap(format!("No header returned for UID {uid}")))
}

/// LOGOUT, ignoring failures.
pub async fn logout(session: &mut ImapSession) {
    if let Err(e) = session.logout().await {
        warn!("Logout failed: {}", e);
    }
}

/// Certificate verifier that accepts all certificates.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
