use std::path::Path;

use native_tls::{Certificate, Identity};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::{TlsConnector as TokioTlsConnector, TlsStream};
use x509_parser::parse_x509_certificate;

use crate::config::TlsConfig;
use crate::context::ProbeContext;
use crate::error::ProbeError;

fn read_file(kind: &str, path: &Path) -> Result<Vec<u8>, ProbeError> {
    std::fs::read(path).map_err(|err| {
        ProbeError::Config(format!("unable to read {kind} {}: {err}", path.display()))
    })
}

/// Splits a PEM bundle into its individual certificates.
fn pem_certificates(bundle: &[u8]) -> Result<Vec<Certificate>, ProbeError> {
    const END: &str = "-----END CERTIFICATE-----";
    let text = String::from_utf8_lossy(bundle);
    let mut certs = Vec::new();
    for block in text.split_inclusive(END).filter(|b| b.contains(END)) {
        let cert = Certificate::from_pem(block.trim().as_bytes())
            .map_err(|err| ProbeError::Config(format!("invalid CA certificate: {err}")))?;
        certs.push(cert);
    }
    if certs.is_empty() {
        return Err(ProbeError::Config("CA file contains no certificates".to_string()));
    }
    Ok(certs)
}

/// Builds a TLS connector from a module's TLS settings.
///
/// A configured CA file replaces the system trust store rather than
/// extending it.
pub fn build_connector(config: &TlsConfig) -> Result<TokioTlsConnector, ProbeError> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(config.insecure_skip_verify);

    if let Some(ca_file) = &config.ca_file {
        builder.disable_built_in_roots(true);
        for cert in pem_certificates(&read_file("CA file", ca_file)?)? {
            builder.add_root_certificate(cert);
        }
    }

    match (&config.cert_file, &config.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let cert = read_file("client certificate", cert_file)?;
            let key = read_file("client key", key_file)?;
            let identity = Identity::from_pkcs8(&cert, &key)
                .map_err(|err| ProbeError::Config(format!("invalid client certificate: {err}")))?;
            builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(ProbeError::Config(
                "cert_file and key_file must be set together".to_string(),
            ));
        }
    }

    let connector = builder
        .build()
        .map_err(|err| ProbeError::Config(format!("unable to build TLS connector: {err}")))?;
    Ok(TokioTlsConnector::from(connector))
}

/// Runs the client handshake under the probe deadline.
pub async fn handshake<S>(
    ctx: &ProbeContext,
    connector: &TokioTlsConnector,
    config: &TlsConfig,
    host: &str,
    stream: S,
) -> Result<TlsStream<S>, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_name = config
        .server_name
        .as_deref()
        .unwrap_or_else(|| host.trim_start_matches('[').trim_end_matches(']'));
    ctx.run(connector.connect(server_name, stream))
        .await?
        .map_err(|source| ProbeError::Tls {
            server_name: server_name.to_string(),
            source,
        })
}

/// `notAfter` of the peer's certificate as a unix timestamp.
pub fn peer_cert_expiry<S>(stream: &TlsStream<S>) -> Option<i64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let cert = stream.get_ref().peer_certificate().ok().flatten()?;
    let cert_der = cert.to_der().ok()?;
    let (_, parsed) = parse_x509_certificate(&cert_der).ok()?;
    Some(parsed.validity().not_after.timestamp())
}
