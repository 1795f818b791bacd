use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{HeaderValue, HOST, USER_AGENT};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::sync::Semaphore;
use tracing::debug;
use url::{Position, Url};

use crate::error::{ConfigError, ReplayError, TransportError};
use crate::metrics::ReplayStats;
use crate::parser::RequestDescriptor;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONNS_PER_HOST: usize = 250;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type HttpClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Scheme, host and port every replayed request is rewritten to.
    pub target: Url,
    pub timeout: Duration,
    pub max_conns_per_host: usize,
}

/// Replays descriptors against the target and books each outcome in
/// [`ReplayStats`].  Cheap to share: workers hold it behind an `Arc`.
pub struct Sender {
    // hyper never follows redirects, so the first answer is final
    client: HttpClient,
    target: Url,
    host_header: HeaderValue,
    timeout: Duration,
    // Permits bound simultaneous connections to the target; the pool may
    // reuse idle ones but never opens more than this many at once.
    connections: Semaphore,
    stats: Arc<ReplayStats>,
}

impl Sender {
    pub fn new(config: SenderConfig, stats: Arc<ReplayStats>) -> Result<Self, ConfigError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(CONNECT_TIMEOUT));
        http.set_keepalive(Some(TCP_KEEPALIVE));

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(insecure_tls_config()?)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(config.max_conns_per_host)
            .pool_timer(TokioTimer::new())
            .build(https);

        let authority = &config.target[Position::BeforeHost..Position::AfterPort];
        let host_header = HeaderValue::from_str(authority)
            .map_err(|_| ConfigError::TargetHost(config.target.to_string()))?;

        Ok(Self {
            client,
            host_header,
            timeout: config.timeout,
            connections: Semaphore::new(config.max_conns_per_host.max(1)),
            target: config.target,
            stats,
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Send one replayed request and drain its body.
    ///
    /// Exactly one of success/failure is recorded.  Any response is `Ok`
    /// (a 404 still counts as a failure); errors mean the request never got
    /// a complete response.
    pub async fn send(&self, descriptor: RequestDescriptor) -> Result<StatusCode, ReplayError> {
        let request = match self.build_request(&descriptor) {
            Ok(request) => request,
            Err(e) => {
                self.stats.record_unsendable();
                return Err(e);
            }
        };
        let url = request.uri().to_string();

        let _permit = self
            .connections
            .acquire()
            .await
            .map_err(|_| ReplayError::Cancelled)?;

        debug!("Sending {} {url}", request.method());
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        };
        let latency = start.elapsed();

        match result {
            Ok(status) => {
                debug!("Response: {status} for {url}");
                if status.is_success() {
                    self.stats.record_success(latency);
                } else {
                    self.stats.record_failure(latency);
                }
                Ok(status)
            }
            Err(source) => {
                self.stats.record_failure(latency);
                Err(ReplayError::Transport { url, source })
            }
        }
    }

    fn build_request(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<Request<Empty<Bytes>>, ReplayError> {
        let dispatch_err = |reason: String| ReplayError::Dispatch {
            url: descriptor.url.clone(),
            reason,
        };

        let uri = rewrite_url(&self.target, &descriptor.url)?;
        let method = Method::from_bytes(descriptor.method.as_bytes())
            .map_err(|e| dispatch_err(e.to_string()))?;
        let user_agent = HeaderValue::from_str(&descriptor.user_agent)
            .map_err(|e| dispatch_err(format!("user agent: {e}")))?;

        Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_AGENT, user_agent)
            .header(HOST, self.host_header.clone())
            .body(Empty::new())
            .map_err(|e| dispatch_err(e.to_string()))
    }

    /// Status of the response once its whole body has been read, so the
    /// connection goes back to the pool.
    async fn exchange(
        &self,
        request: Request<Empty<Bytes>>,
    ) -> Result<StatusCode, TransportError> {
        let response = self.client.request(request).await?;
        let status = response.status();
        let mut body = response.into_body();
        while let Some(frame) = body.frame().await {
            frame?;
        }
        Ok(status)
    }
}

/// Point a logged request URL at `target`: scheme, host and port change,
/// path and query go out byte for byte as logged (dot segments included).
/// Origin-relative URLs are appended to the target origin.
pub fn rewrite_url(target: &Url, raw: &str) -> Result<Uri, ReplayError> {
    let dispatch_err = |reason: String| ReplayError::Dispatch {
        url: raw.to_owned(),
        reason,
    };

    let path_and_query = request_target(raw)
        .ok_or_else(|| dispatch_err("neither an absolute URL nor an absolute path".to_owned()))?;
    let origin = &target[..Position::BeforePath];

    format!("{origin}{path_and_query}")
        .parse::<Uri>()
        .map_err(|e| dispatch_err(e.to_string()))
}

/// Everything after the authority of `raw`, minus any fragment.  An empty
/// path becomes `/`.
fn request_target(raw: &str) -> Option<Cow<'_, str>> {
    let rest = if raw.starts_with('/') {
        raw
    } else {
        let (_scheme, after_scheme) = raw.split_once("://")?;
        let authority_end = after_scheme
            .find(|c: char| matches!(c, '/' | '?' | '#'))
            .unwrap_or(after_scheme.len());
        &after_scheme[authority_end..]
    };
    let rest = rest.split_once('#').map_or(rest, |(before, _)| before);

    if rest.starts_with('/') {
        Some(Cow::Borrowed(rest))
    } else {
        Some(Cow::Owned(format!("/{rest}")))
    }
}

// ─── TLS ─────────────────────────────────────────────────────────

/// Replay targets are often staging hosts with self-signed certificates, so
/// the chain is never checked.  Handshake signatures still are.
fn insecure_tls_config() -> Result<ClientConfig, ConfigError> {
    let provider = Arc::new(ring::default_provider());
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(ConfigError::Tls)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth();
    Ok(config)
}

#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
