use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::bytes::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use trust_dns_resolver::proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use trust_dns_resolver::proto::rr::{Name, RData, Record, RecordType};

use super::trace::{PhaseTracer, TraceListener};
use super::utils::{choose_address, split_host_port};
use super::validate::compile_all;
use crate::config::{DnsProbe, DnsRrValidator, DnsTransport, Module};
use crate::context::ProbeContext;
use crate::error::{ProbeError, report};
use crate::logger::ProbeLogger;
use crate::sink::ResultSink;

pub const PROBE_DNS_DURATION_METRIC: &str = "probe_dns_duration_seconds";
pub const PROBE_DNS_ANSWER_RRS_METRIC: &str = "probe_dns_answer_rrs";
pub const PROBE_DNS_AUTHORITY_RRS_METRIC: &str = "probe_dns_authority_rrs";
pub const PROBE_DNS_ADDITIONAL_RRS_METRIC: &str = "probe_dns_additional_rrs";
pub const PROBE_DNS_SERIAL_METRIC: &str = "probe_dns_serial";

const DEFAULT_DNS_PORT: u16 = 53;

struct RrValidator {
    fail_if_matches: Vec<Regex>,
    fail_if_not_matches: Vec<Regex>,
    fail_if_all_match: Vec<Regex>,
    fail_if_none_matches: Vec<Regex>,
}

impl RrValidator {
    fn compile(config: &DnsRrValidator) -> Result<Self, ProbeError> {
        Ok(RrValidator {
            fail_if_matches: compile_all(&config.fail_if_matches_regexp)?,
            fail_if_not_matches: compile_all(&config.fail_if_not_matches_regexp)?,
            fail_if_all_match: compile_all(&config.fail_if_all_match_regexp)?,
            fail_if_none_matches: compile_all(&config.fail_if_none_matches_regexp)?,
        })
    }

    fn check(&self, section: &str, rrs: &[String], logger: &ProbeLogger) -> bool {
        if rrs.is_empty() && !(self.fail_if_not_matches.is_empty() && self.fail_if_none_matches.is_empty()) {
            logger.error(format_args!("{} section is empty but a match is required", section));
            return false;
        }

        let mut all_match = true;
        let mut any_match = false;
        for rr in rrs {
            let rr_bytes = rr.as_bytes();
            for re in &self.fail_if_matches {
                if re.is_match(rr_bytes) {
                    logger.error(format_args!("{} RR matched regexp regexp={} rr={:?}", section, re, rr));
                    return false;
                }
            }
            for re in &self.fail_if_not_matches {
                if !re.is_match(rr_bytes) {
                    logger.error(format_args!("{} RR did not match regexp regexp={} rr={:?}", section, re, rr));
                    return false;
                }
            }
            all_match &= self.fail_if_all_match.iter().all(|re| re.is_match(rr_bytes));
            any_match |= self.fail_if_none_matches.iter().any(|re| re.is_match(rr_bytes));
        }

        if !self.fail_if_all_match.is_empty() && all_match {
            logger.error(format_args!("All {} RRs matched fail_if_all_match_regexp", section));
            return false;
        }
        if !self.fail_if_none_matches.is_empty() && !any_match {
            logger.error(format_args!("No {} RR matched fail_if_none_matches_regexp", section));
            return false;
        }
        true
    }
}

struct Validators {
    answer: RrValidator,
    authority: RrValidator,
    additional: RrValidator,
}

impl Validators {
    fn compile(config: &DnsProbe) -> Result<Self, ProbeError> {
        Ok(Validators {
            answer: RrValidator::compile(&config.validate_answer_rrs)?,
            authority: RrValidator::compile(&config.validate_authority_rrs)?,
            additional: RrValidator::compile(&config.validate_additional_rrs)?,
        })
    }
}

/// Renders a record the way zone files show it, tab separated.
fn render(record: &Record) -> String {
    let data = record.data().map(|d| d.to_string()).unwrap_or_default();
    format!(
        "{}\t{}\t{}\t{}\t{}",
        record.name(),
        record.ttl(),
        record.dns_class(),
        record.record_type(),
        data
    )
}

fn rcode_name(code: ResponseCode) -> String {
    let name = match u16::from(code) {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        6 => "YXDOMAIN",
        7 => "YXRRSET",
        8 => "NXRRSET",
        9 => "NOTAUTH",
        10 => "NOTZONE",
        other => return other.to_string(),
    };
    name.to_string()
}

fn build_query(config: &DnsProbe) -> Result<Message, ProbeError> {
    if config.query_name.is_empty() {
        return Err(ProbeError::Config("query_name must be set".to_string()));
    }
    let name = Name::from_ascii(&config.query_name)?;
    let record_type = RecordType::from_str(&config.query_type.to_ascii_uppercase())
        .map_err(|_| ProbeError::Config(format!("invalid query_type {:?}", config.query_type)))?;

    // Only needs to tell our reply apart from strays on the same socket.
    let id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u16)
        .unwrap_or_default();

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(config.recursion_desired)
        .add_query(Query::query(name, record_type));
    Ok(message)
}

async fn exchange_udp(addr: SocketAddr, query: &Message) -> Result<Message, ProbeError> {
    let bind: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket
        .connect(addr)
        .await
        .map_err(|source| ProbeError::Connect { addr, source })?;
    socket.send(&query.to_vec()?).await?;

    let mut buf = vec![0u8; u16::MAX as usize];
    loop {
        let n = socket.recv(&mut buf).await?;
        // Stray or malformed datagrams are skipped until the deadline.
        let Ok(response) = Message::from_vec(&buf[..n]) else {
            continue;
        };
        if response.id() == query.id() {
            return Ok(response);
        }
    }
}

async fn exchange_tcp(addr: SocketAddr, query: &Message) -> Result<Message, ProbeError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ProbeError::Connect { addr, source })?;
    let payload = query.to_vec()?;
    let len = u16::try_from(payload.len())
        .map_err(|_| ProbeError::Config("DNS query too large for TCP framing".to_string()))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&payload).await?;

    let len = stream.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    let response = Message::from_vec(&buf)?;
    if response.id() != query.id() {
        return Err(ProbeError::DnsIdMismatch {
            expected: query.id(),
            got: response.id(),
        });
    }
    Ok(response)
}

async fn query_server(
    ctx: &ProbeContext,
    target: &str,
    config: &DnsProbe,
    validators: &Validators,
    tracer: &mut PhaseTracer,
    sink: &mut ResultSink,
    logger: &ProbeLogger,
) -> Result<bool, ProbeError> {
    let query = build_query(config)?;
    let (host, port) = split_host_port(target, Some(DEFAULT_DNS_PORT))?;
    let ip = choose_address(ctx, &host, config.ip_protocol, config.ip_protocol_fallback, sink, logger).await?;
    let addr = SocketAddr::new(ip, port);

    logger.info(format_args!(
        "Making DNS query target={} name={} type={} transport={:?}",
        addr, config.query_name, config.query_type, config.transport_protocol
    ));
    tracer.start_hop();
    tracer.resolve_start();
    let response = match config.transport_protocol {
        DnsTransport::Udp => ctx.run(exchange_udp(addr, &query)).await??,
        DnsTransport::Tcp => ctx.run(exchange_tcp(addr, &query)).await??,
    };
    tracer.resolve_done();
    logger.info(format_args!("Got response rcode={}", rcode_name(response.response_code())));

    sink.set(PROBE_DNS_ANSWER_RRS_METRIC, response.answers().len() as f64);
    sink.set(PROBE_DNS_AUTHORITY_RRS_METRIC, response.name_servers().len() as f64);
    sink.set(PROBE_DNS_ADDITIONAL_RRS_METRIC, response.additionals().len() as f64);
    if let Some(serial) = response.answers().iter().find_map(|rr| match rr.data() {
        Some(RData::SOA(soa)) => Some(soa.serial()),
        _ => None,
    }) {
        sink.set(PROBE_DNS_SERIAL_METRIC, serial as f64);
    }

    let rcode = rcode_name(response.response_code());
    if !config.valid_rcodes.iter().any(|valid| valid.eq_ignore_ascii_case(&rcode)) {
        logger.error(format_args!("Rcode is not one of the valid rcodes rcode={}", rcode));
        return Ok(false);
    }

    let answers: Vec<String> = response.answers().iter().map(render).collect();
    let authority: Vec<String> = response.name_servers().iter().map(render).collect();
    let additional: Vec<String> = response.additionals().iter().map(render).collect();

    let ok = validators.answer.check("Answer", &answers, logger)
        && validators.authority.check("Authority", &authority, logger)
        && validators.additional.check("Additional", &additional, logger);
    Ok(ok)
}

/// Sends one query to the DNS server named by `target` and validates the
/// response code and record sections.
pub async fn probe_dns(
    ctx: &ProbeContext,
    target: &str,
    module: &Module,
    sink: &mut ResultSink,
    logger: &ProbeLogger,
) -> bool {
    let config = &module.dns;

    let validators = match Validators::compile(config) {
        Ok(validators) => validators,
        Err(err) => {
            logger.error(format_args!("Could not compile regular expressions err={}", report(&err)));
            return false;
        }
    };

    let mut tracer = PhaseTracer::new();
    let result = query_server(ctx, target, config, &validators, &mut tracer, sink, logger).await;
    tracer.record(sink, PROBE_DNS_DURATION_METRIC);

    match result {
        Ok(success) => success,
        Err(err) => {
            logger.error(format_args!("Error while sending a DNS query err={}", report(&err)));
            false
        }
    }
}
