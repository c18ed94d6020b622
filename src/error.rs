use std::fmt::Write;
use std::time::Duration;

use crate::config::IpProtocol;

/// Everything that can cut a probe attempt short.
///
/// None of these escape a prober: they are logged through [`report`] and
/// collapse into a `false` outcome.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid regular expression {pattern:?}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("error resolving target {host:?}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no {family} address found for {host:?}")]
    NoAddress { host: String, family: IpProtocol },

    #[error("error dialing {addr}")]
    Connect {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {server_name:?} failed")]
    Tls {
        server_name: String,
        #[source]
        source: native_tls::Error,
    },

    #[error("HTTP exchange failed")]
    Http(#[from] hyper::Error),

    #[error("invalid HTTP request")]
    Request(#[from] hyper::http::Error),

    #[error("failed to read response body")]
    Body(#[source] std::io::Error),

    #[error("response body exceeds limit of {0} bytes")]
    BodyTooLarge(u64),

    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),

    #[error("invalid redirect location {0:?}")]
    Redirect(String),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("malformed DNS message")]
    Dns(#[from] trust_dns_resolver::proto::error::ProtoError),

    #[error("DNS response id {got} does not match query id {expected}")]
    DnsIdMismatch { expected: u16, got: u16 },

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("probe cancelled")]
    Cancelled,
}

/// Renders an error and its whole `source()` chain on one string.
pub fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, ": {}", src);
        err = src;
    }
    s
}
