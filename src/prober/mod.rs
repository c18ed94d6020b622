use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::Deserialize;

use crate::config::Module;
use crate::context::ProbeContext;
use crate::logger::ProbeLogger;
use crate::sink::{PROBE_DURATION_METRIC, PROBE_SUCCESS_METRIC, ResultSink};

mod cookies;
pub mod dns;
pub mod http;
pub mod icmp;
pub mod tcp;
mod tls;
pub mod trace;
mod utils;
mod validate;

pub use dns::probe_dns;
pub use http::probe_http;
pub use icmp::probe_icmp;
pub use tcp::probe_tcp;

/// The protocol a module probes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prober {
    Http,
    Tcp,
    Dns,
    Icmp,
}

impl Prober {
    pub fn as_str(self) -> &'static str {
        match self {
            Prober::Http => "http",
            Prober::Tcp => "tcp",
            Prober::Dns => "dns",
            Prober::Icmp => "icmp",
        }
    }

    /// Runs one attempt of this prober against `target`.
    pub async fn probe(
        self,
        ctx: &ProbeContext,
        target: &str,
        module: &Module,
        sink: &mut ResultSink,
        logger: &ProbeLogger,
    ) -> bool {
        match self {
            Prober::Http => probe_http(ctx, target, module, sink, logger).await,
            Prober::Tcp => probe_tcp(ctx, target, module, sink, logger).await,
            Prober::Dns => probe_dns(ctx, target, module, sink, logger).await,
            Prober::Icmp => probe_icmp(ctx, target, module, sink, logger).await,
        }
    }
}

impl FromStr for Prober {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Prober::Http),
            "tcp" => Ok(Prober::Tcp),
            "dns" => Ok(Prober::Dns),
            "icmp" => Ok(Prober::Icmp),
            other => Err(format!("unknown prober {other:?}")),
        }
    }
}

impl fmt::Display for Prober {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the module's prober and publishes the overall outcome alongside
/// the prober's own samples.
pub async fn run_module(
    ctx: &ProbeContext,
    target: &str,
    module: &Module,
    sink: &mut ResultSink,
    logger: &ProbeLogger,
) -> bool {
    logger.info(format_args!("Beginning probe probe={} timeout_seconds={}", module.prober, module.timeout.as_secs_f64()));
    let started = Instant::now();
    let success = module.prober.probe(ctx, target, module, sink, logger).await;
    let elapsed = started.elapsed().as_secs_f64();

    sink.set(PROBE_DURATION_METRIC, elapsed);
    sink.set_bool(PROBE_SUCCESS_METRIC, success);
    if success {
        logger.info(format_args!("Probe succeeded duration_seconds={}", elapsed));
    } else {
        logger.error(format_args!("Probe failed duration_seconds={}", elapsed));
    }
    success
}
