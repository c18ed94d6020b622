use std::net::SocketAddr;

use regex::bytes::{Captures, Regex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::tls;
use super::trace::{PhaseTracer, TraceListener};
use super::utils::{choose_address, split_host_port};
use super::validate::compile;
use crate::config::{Module, TcpProbe};
use crate::context::ProbeContext;
use crate::error::{ProbeError, report};
use crate::logger::ProbeLogger;
use crate::sink::{PROBE_FAILED_DUE_TO_REGEX_METRIC, PROBE_SSL_EARLIEST_EXPIRY_METRIC, ResultSink};

pub const PROBE_TCP_DURATION_METRIC: &str = "probe_tcp_duration_seconds";

/// Any byte stream a TCP conversation can run over, plain or TLS.
pub trait ProbeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProbeStream for T {}

type Conversation = BufReader<Box<dyn ProbeStream>>;

/// Compiled form of one `query_response` step.
struct Step<'a> {
    expect: Option<Regex>,
    send: Option<&'a str>,
    starttls: bool,
}

fn compile_steps(config: &TcpProbe) -> Result<Vec<Step<'_>>, ProbeError> {
    config
        .query_response
        .iter()
        .map(|qr| {
            Ok::<_, ProbeError>(Step {
                expect: qr.expect.as_deref().map(compile).transpose()?,
                send: qr.send.as_deref(),
                starttls: qr.starttls,
            })
        })
        .collect()
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Reads lines until one matches `re`. `Ok(None)` means the peer closed
/// the stream first.
async fn expect_line(
    ctx: &ProbeContext,
    reader: &mut Conversation,
    re: &Regex,
    logger: &ProbeLogger,
) -> Result<Option<Vec<u8>>, ProbeError> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = ctx.run(reader.read_until(b'\n', &mut line)).await??;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = trim_line(&line);
        logger.debug(format_args!("Read line line={:?}", String::from_utf8_lossy(trimmed)));
        if re.is_match(trimmed) {
            return Ok(Some(trimmed.to_vec()));
        }
    }
}

fn expand(send: &str, captures: Option<&Captures<'_>>) -> Vec<u8> {
    let mut out = Vec::new();
    match captures {
        Some(caps) => caps.expand(send.as_bytes(), &mut out),
        None => out.extend_from_slice(send.as_bytes()),
    }
    out.push(b'\n');
    out
}

async fn converse(
    ctx: &ProbeContext,
    host: &str,
    port: u16,
    config: &TcpProbe,
    steps: &[Step<'_>],
    tracer: &mut PhaseTracer,
    sink: &mut ResultSink,
    logger: &ProbeLogger,
) -> Result<bool, ProbeError> {
    let connector = if config.tls || steps.iter().any(|s| s.starttls) {
        Some(tls::build_connector(&config.tls_config)?)
    } else {
        None
    };

    let ip = choose_address(ctx, host, config.ip_protocol, config.ip_protocol_fallback, sink, logger).await?;
    let addr = SocketAddr::new(ip, port);

    logger.info(format_args!("Dialing TCP address={}", addr));
    tracer.start_hop();
    tracer.connect_start();
    let tcp = ctx
        .run(TcpStream::connect(addr))
        .await?
        .map_err(|source| ProbeError::Connect { addr, source })?;
    tracer.connect_done();
    logger.info(format_args!("Successfully dialed"));

    let mut stream: Box<dyn ProbeStream> = Box::new(tcp);
    if let Some(connector) = connector.as_ref().filter(|_| config.tls) {
        tracer.tls_start();
        let tls_stream = tls::handshake(ctx, connector, &config.tls_config, host, stream).await?;
        tracer.tls_done();
        if let Some(expiry) = tls::peer_cert_expiry(&tls_stream) {
            sink.set(PROBE_SSL_EARLIEST_EXPIRY_METRIC, expiry as f64);
        }
        stream = Box::new(tls_stream);
    }

    let mut reader: Conversation = BufReader::new(stream);
    for (i, step) in steps.iter().enumerate() {
        let mut matched: Option<Vec<u8>> = None;
        if let Some(re) = &step.expect {
            logger.debug(format_args!("Processing query response entry entry_number={}", i));
            match expect_line(ctx, &mut reader, re, logger).await? {
                Some(line) => matched = Some(line),
                None => {
                    logger.error(format_args!("Did not find expected regexp regexp={}", re));
                    sink.set_bool(PROBE_FAILED_DUE_TO_REGEX_METRIC, true);
                    return Ok(false);
                }
            }
        }

        if let Some(send) = step.send {
            let captures = match (&step.expect, &matched) {
                (Some(re), Some(line)) => re.captures(line),
                _ => None,
            };
            let payload = expand(send, captures.as_ref());
            logger.debug(format_args!("Sending line line={:?}", String::from_utf8_lossy(&payload)));
            let stream = reader.get_mut();
            ctx.run(stream.write_all(&payload)).await??;
            ctx.run(stream.flush()).await??;
        }

        if step.starttls {
            let Some(connector) = connector.as_ref() else {
                return Err(ProbeError::Config("STARTTLS requested without a TLS connector".to_string()));
            };
            logger.debug(format_args!("Upgrading connection with STARTTLS"));
            let plain = reader.into_inner();
            tracer.tls_start();
            let tls_stream = tls::handshake(ctx, connector, &config.tls_config, host, plain).await?;
            tracer.tls_done();
            if let Some(expiry) = tls::peer_cert_expiry(&tls_stream) {
                sink.set(PROBE_SSL_EARLIEST_EXPIRY_METRIC, expiry as f64);
            }
            reader = BufReader::new(Box::new(tls_stream));
        }
    }

    Ok(true)
}

/// Probes a `host:port` target by connecting, optionally over TLS, and
/// running the configured line-oriented conversation.
pub async fn probe_tcp(
    ctx: &ProbeContext,
    target: &str,
    module: &Module,
    sink: &mut ResultSink,
    logger: &ProbeLogger,
) -> bool {
    let config = &module.tcp;
    sink.set_bool(PROBE_FAILED_DUE_TO_REGEX_METRIC, false);

    let steps = match compile_steps(config) {
        Ok(steps) => steps,
        Err(err) => {
            logger.error(format_args!("Could not compile regular expressions err={}", report(&err)));
            return false;
        }
    };
    let (host, port) = match split_host_port(target, None) {
        Ok(parts) => parts,
        Err(err) => {
            logger.error(format_args!("Error splitting target address and port err={}", report(&err)));
            return false;
        }
    };

    let mut tracer = PhaseTracer::new();
    let result = converse(ctx, &host, port, config, &steps, &mut tracer, sink, logger).await;
    tracer.record(sink, PROBE_TCP_DURATION_METRIC);

    match result {
        Ok(success) => success,
        Err(err) => {
            logger.error(format_args!("Error during TCP probe err={}", report(&err)));
            false
        }
    }
}
