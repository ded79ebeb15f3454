//! Retrieves data over Gemini and applies the TOFU system.
//!
//! The TLS layer accepts any certificate the server presents: identity is
//! pinned by the trust store after the handshake, not validated against a
//! certificate authority. A trust mismatch still hands the response back to
//! the caller, so an explicit user override can continue with it instead of
//! re-fetching.

use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::config::{GEMINI_DEFAULT_PORT, META_MAX_LENGTH, URL_MAX_LENGTH};
use crate::error::FetchError;
use crate::stream::RestartableStream;
use crate::tofu::TrustStore;

/// Maximum length in bytes of a response header line:
/// status (2) + space + META + CRLF.
const HEADER_MAX_LENGTH: usize = 2 + 1 + META_MAX_LENGTH + 2;

/// The replayable body of a response.
pub type Body = RestartableStream<Box<dyn AsyncRead + Send + Unpin>>;

/// Installs the process-default TLS cryptography provider. Call once at
/// startup; calling it again is harmless.
pub fn init_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Certificate verifier that defers identity checking to the TOFU store.
///
/// Handshake signatures are still verified; only the chain-of-trust step is
/// skipped, since Gemini servers use self-signed certificates.
#[derive(Debug)]
struct TofuVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for TofuVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        // Identity is checked against the trust store after the handshake
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Broad classification of a Gemini status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)] // Variant names mirror the protocol's own terms
pub enum StatusClass {
    Input,
    Success,
    Redirect,
    TemporaryFailure,
    PermanentFailure,
    CertificateRequired,
    Unknown,
}

impl StatusClass {
    /// Classifies a two-digit status code by its first digit.
    pub fn from_status(status: u8) -> Self {
        match status / 10 {
            1 => StatusClass::Input,
            2 => StatusClass::Success,
            3 => StatusClass::Redirect,
            4 => StatusClass::TemporaryFailure,
            5 => StatusClass::PermanentFailure,
            6 => StatusClass::CertificateRequired,
            _ => StatusClass::Unknown,
        }
    }
}

/// Short human-readable description of a status code, suitable for error
/// titles.
pub fn status_description(status: u8) -> &'static str {
    match status {
        10 => "Input",
        11 => "Sensitive input",
        20 => "Success",
        30 => "Redirect",
        31 => "Permanent redirect",
        40 => "Temporary failure",
        41 => "Server unavailable",
        42 => "CGI error",
        43 => "Proxy failure",
        44 => "Slow down",
        50 => "Permanent failure",
        51 => "Not found",
        52 => "Gone",
        53 => "Proxy request refused",
        59 => "Bad request",
        60 => "Client certificate required",
        61 => "Certificate not authorised",
        62 => "Certificate not valid",
        _ => "Unknown status",
    }
}

/// A Gemini response: the parsed header plus a replayable body stream.
pub struct Response {
    /// Two-digit status code.
    pub status: u8,
    /// META field: a prompt, a redirect target, a media type, or an error
    /// message, depending on the status.
    pub meta: String,
    /// The certificate the server presented during the handshake.
    pub cert: CertificateDer<'static>,
    /// Replayable body stream. Empty for non-success statuses.
    pub body: Body,
}

impl Response {
    /// Broad classification of this response's status code.
    pub fn status_class(&self) -> StatusClass {
        StatusClass::from_status(self.status)
    }

    /// Whether this is a status-11 input request (e.g. a password).
    pub fn is_sensitive_input(&self) -> bool {
        self.status == 11
    }

    /// Whether this is a status-31 permanent redirect, the only kind the
    /// redirect cache records.
    pub fn is_permanent_redirect(&self) -> bool {
        self.status == 31
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("meta", &self.meta)
            .field("buffered", &self.body.buffered())
            .finish()
    }
}

/// Result of a fetch whose connection succeeded.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The server's certificate matched the trust store (or was pinned on
    /// first use).
    Success(Response),
    /// The certificate differs from the pinned one before its expiry. The
    /// response is carried along so that an explicit override can
    /// [`TrustStore::reset`] the record and continue without re-fetching.
    TrustMismatch {
        /// The response, usable after an override.
        response: Response,
        /// Host the trust check ran against (the proxy when proxying).
        host: String,
        /// Port the trust check ran against.
        port: u16,
        /// Expiry of the conflicting stored record.
        expiry: Option<DateTime<Utc>>,
    },
}

/// Parses a response header line of the form `<status><space><meta>`.
fn parse_header(line: &[u8]) -> Result<(u8, String), FetchError> {
    let line = std::str::from_utf8(line).map_err(|_| FetchError::MalformedHeader)?;
    let line = line.trim_end_matches(['\r', '\n']);
    let digits = line.get(..2).ok_or(FetchError::MalformedHeader)?;
    let status: u8 = digits.parse().map_err(|_| FetchError::MalformedHeader)?;
    let meta = line[2..].trim_start_matches([' ', '\t']);
    if meta.len() > META_MAX_LENGTH {
        return Err(FetchError::MalformedHeader);
    }
    Ok((status, meta.to_string()))
}

/// Strips the brackets an URL host string carries around IPv6 literals.
fn unbracket(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Fetches URLs over the Gemini protocol, verifying server identity against
/// an injected trust store.
pub struct GeminiClient {
    trust: Arc<TrustStore>,
    tls_config: Arc<ClientConfig>,
}

impl GeminiClient {
    /// Creates a client that checks server identities against `trust`.
    pub fn new(trust: Arc<TrustStore>) -> Self {
        let provider = CryptoProvider::get_default().cloned().unwrap_or_else(|| {
            Arc::new(rustls::crypto::aws_lc_rs::default_provider())
        });
        let tls_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(TofuVerifier { provider }))
            .with_no_client_auth();
        GeminiClient {
            trust,
            tls_config: Arc::new(tls_config),
        }
    }

    /// The trust store this client verifies against.
    pub fn trust_store(&self) -> &Arc<TrustStore> {
        &self.trust
    }

    /// Fetches a URL, connecting directly to its host.
    ///
    /// # Errors
    ///
    /// [`FetchError::MalformedAddress`] when the URL cannot be parsed or is
    /// over the protocol's length limit, [`FetchError::Network`] for
    /// connect/read/write failures, and [`FetchError::MalformedHeader`]
    /// when the response header is unusable. A certificate mismatch is not
    /// an error here; it is returned as [`FetchOutcome::TrustMismatch`].
    pub async fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        let parsed =
            Url::parse(url).map_err(|_| FetchError::MalformedAddress(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::MalformedAddress(url.to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(GEMINI_DEFAULT_PORT);
        self.fetch_with_host(unbracket(&host), port, url).await
    }

    /// Same as [`fetch`](GeminiClient::fetch), but connects through a
    /// Gemini proxy. The returned certificate is associated with the proxy,
    /// not the requested host.
    pub async fn fetch_via_proxy(
        &self,
        proxy_host: &str,
        proxy_port: u16,
        url: &str,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch_with_host(unbracket(proxy_host), proxy_port, url)
            .await
    }

    async fn fetch_with_host(
        &self,
        host: &str,
        port: u16,
        url: &str,
    ) -> Result<FetchOutcome, FetchError> {
        if url.len() > URL_MAX_LENGTH {
            return Err(FetchError::MalformedAddress(url.to_string()));
        }

        debug!("connecting to {host}:{port} for {url}");
        let tcp = TcpStream::connect((host, port)).await?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| FetchError::MalformedAddress(url.to_string()))?;
        let connector = TlsConnector::from(Arc::clone(&self.tls_config));
        let mut tls = connector.connect(server_name, tcp).await?;

        tls.write_all(format!("{url}\r\n").as_bytes()).await?;
        tls.flush().await?;

        let cert = tls
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.clone().into_owned())
            .ok_or_else(|| {
                FetchError::Network(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "server presented no certificate",
                ))
            })?;

        let mut reader = BufReader::new(tls);
        let mut header = Vec::new();
        (&mut reader)
            .take(HEADER_MAX_LENGTH as u64)
            .read_until(b'\n', &mut header)
            .await?;
        if !header.ends_with(b"\n") {
            // Either EOF before a header line, or a header over the limit
            return Err(FetchError::MalformedHeader);
        }
        let (status, meta) = parse_header(&header)?;
        debug!("{host}:{port} answered {status} {meta}");

        let body = RestartableStream::new(Box::new(reader) as Box<dyn AsyncRead + Send + Unpin>);
        let response = Response {
            status,
            meta,
            cert,
            body,
        };

        if self.trust.verify(host, port, response.cert.as_ref()) {
            Ok(FetchOutcome::Success(response))
        } else {
            Ok(FetchOutcome::TrustMismatch {
                expiry: self.trust.expiry(host, port),
                host: host.to_string(),
                port,
                response,
            })
        }
    }
}
