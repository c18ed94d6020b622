use std::net::IpAddr;
use std::time::Instant;

use crate::config::IpProtocol;
use crate::context::ProbeContext;
use crate::error::ProbeError;
use crate::logger::ProbeLogger;
use crate::sink::{PROBE_DNS_LOOKUP_TIME_METRIC, PROBE_IP_PROTOCOL_METRIC, ResultSink};

fn family(ip: &IpAddr) -> IpProtocol {
    match ip {
        IpAddr::V4(_) => IpProtocol::Ip4,
        IpAddr::V6(_) => IpProtocol::Ip6,
    }
}

/// Resolves `host` and picks one address of the preferred family, falling
/// back to the other family when allowed.
///
/// Publishes `probe_dns_lookup_time_seconds` whether or not resolution
/// succeeds, and `probe_ip_protocol` once an address is chosen.
pub async fn choose_address(
    ctx: &ProbeContext,
    host: &str,
    ip_protocol: IpProtocol,
    fallback: bool,
    sink: &mut ResultSink,
    logger: &ProbeLogger,
) -> Result<IpAddr, ProbeError> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    logger.info(format_args!(
        "Resolving target address host={} ip_protocol={}",
        host, ip_protocol
    ));

    let start = Instant::now();
    let resolved = match host.parse::<IpAddr>() {
        Ok(ip) => Ok(vec![ip]),
        Err(_) => ctx
            .run(tokio::net::lookup_host((host, 0)))
            .await
            .and_then(|res| {
                res.map(|addrs| addrs.map(|a| a.ip()).collect::<Vec<_>>())
                    .map_err(|source| ProbeError::Resolve {
                        host: host.to_string(),
                        source,
                    })
            }),
    };
    sink.set(PROBE_DNS_LOOKUP_TIME_METRIC, start.elapsed().as_secs_f64());
    let addrs = resolved?;

    let pick = |wanted: IpProtocol| addrs.iter().find(|ip| family(ip) == wanted).copied();
    let chosen = match pick(ip_protocol) {
        Some(ip) => ip,
        None if fallback => pick(ip_protocol.other()).ok_or_else(|| ProbeError::NoAddress {
            host: host.to_string(),
            family: ip_protocol.other(),
        })?,
        None => {
            return Err(ProbeError::NoAddress {
                host: host.to_string(),
                family: ip_protocol,
            });
        }
    };

    sink.set(PROBE_IP_PROTOCOL_METRIC, family(&chosen).version() as f64);
    logger.info(format_args!("Resolved target address ip={}", chosen));
    Ok(chosen)
}

/// Splits `host:port`, accepting bracketed IPv6 literals. A missing port
/// falls back to `default_port` when one is given.
pub fn split_host_port(target: &str, default_port: Option<u16>) -> Result<(String, u16), ProbeError> {
    let invalid = || ProbeError::Config(format!("invalid target {target:?}, expected host:port"));

    if let Some(rest) = target.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match after.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None if after.is_empty() => default_port.ok_or_else(invalid)?,
            None => return Err(invalid()),
        };
        return Ok((host.to_string(), port));
    }

    match target.rsplit_once(':') {
        // A bare IPv6 literal has several colons and no port.
        Some((host, _)) if host.contains(':') => match default_port {
            Some(port) => Ok((target.to_string(), port)),
            None => Err(invalid()),
        },
        Some((host, port)) if !host.is_empty() => {
            Ok((host.to_string(), port.parse().map_err(|_| invalid())?))
        }
        Some(_) => Err(invalid()),
        None => match default_port {
            Some(port) if !target.is_empty() => Ok((target.to_string(), port)),
            _ => Err(invalid()),
        },
    }
}
