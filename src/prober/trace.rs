use std::time::{Duration, Instant};

use crate::sink::{PHASE_LABEL, ResultSink};

/// A named sub-interval of one probe attempt, in the order they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Resolve,
    Connect,
    Tls,
    Processing,
    Transfer,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Resolve,
        Phase::Connect,
        Phase::Tls,
        Phase::Processing,
        Phase::Transfer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Resolve => "resolve",
            Phase::Connect => "connect",
            Phase::Tls => "tls",
            Phase::Processing => "processing",
            Phase::Transfer => "transfer",
        }
    }
}

/// Lifecycle events of one request/response exchange.
///
/// Probers call these around their own resolve, dial, handshake and read
/// steps, which keeps phase timing independent of the networking stack.
pub trait TraceListener {
    fn resolve_start(&mut self);
    fn resolve_done(&mut self);
    fn connect_start(&mut self);
    fn connect_done(&mut self);
    fn tls_start(&mut self);
    fn tls_done(&mut self);
    /// The connection is ready and the request is about to be written.
    fn got_conn(&mut self);
    fn first_response_byte(&mut self);
    fn body_done(&mut self);
}

#[derive(Debug, Default, Clone)]
struct HopTrace {
    resolve_start: Option<Instant>,
    resolve_done: Option<Instant>,
    connect_start: Option<Instant>,
    connect_done: Option<Instant>,
    tls_start: Option<Instant>,
    tls_done: Option<Instant>,
    got_conn: Option<Instant>,
    first_response_byte: Option<Instant>,
    body_done: Option<Instant>,
}

impl HopTrace {
    fn bounds(&self, phase: Phase) -> (Option<Instant>, Option<Instant>) {
        match phase {
            Phase::Resolve => (self.resolve_start, self.resolve_done),
            Phase::Connect => (self.connect_start, self.connect_done),
            Phase::Tls => (self.tls_start, self.tls_done),
            Phase::Processing => (self.got_conn, self.first_response_byte),
            Phase::Transfer => (self.first_response_byte, self.body_done),
        }
    }

    fn duration(&self, phase: Phase) -> Option<Duration> {
        match self.bounds(phase) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

/// Collects phase boundaries for every hop of an attempt.
///
/// Durations accumulate across hops: a redirect chain reports the total
/// time spent in each phase over all of its exchanges. A phase only
/// appears once it has both a start and an end on at least one hop.
#[derive(Debug, Default)]
pub struct PhaseTracer {
    hops: Vec<HopTrace>,
}

impl PhaseTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording a new request/response exchange.
    pub fn start_hop(&mut self) {
        self.hops.push(HopTrace::default());
    }

    fn current(&mut self) -> &mut HopTrace {
        if self.hops.is_empty() {
            self.start_hop();
        }
        let last = self.hops.len() - 1;
        &mut self.hops[last]
    }

    /// Writes one `metric{phase="..."}` sample per completed phase, summed
    /// over every hop that completed it.
    pub fn record(&self, sink: &mut ResultSink, metric: &str) {
        for hop in &self.hops {
            for phase in Phase::ALL {
                if let Some(d) = hop.duration(phase) {
                    sink.add_labeled(metric, &[(PHASE_LABEL, phase.as_str())], d.as_secs_f64());
                }
            }
        }
    }

    #[cfg(test)]
    fn hops(&self) -> usize {
        self.hops.len()
    }

    #[cfg(test)]
    fn durations(&self) -> Vec<(Phase, Duration)> {
        Phase::ALL
            .iter()
            .filter_map(|&phase| {
                let mut total: Option<Duration> = None;
                for hop in &self.hops {
                    if let Some(d) = hop.duration(phase) {
                        total = Some(total.unwrap_or_default() + d);
                    }
                }
                total.map(|d| (phase, d))
            })
            .collect()
    }
}

impl TraceListener for PhaseTracer {
    fn resolve_start(&mut self) {
        self.current().resolve_start = Some(Instant::now());
    }

    fn resolve_done(&mut self) {
        self.current().resolve_done = Some(Instant::now());
    }

    fn connect_start(&mut self) {
        self.current().connect_start = Some(Instant::now());
    }

    fn connect_done(&mut self) {
        self.current().connect_done = Some(Instant::now());
    }

    fn tls_start(&mut self) {
        self.current().tls_start = Some(Instant::now());
    }

    fn tls_done(&mut self) {
        self.current().tls_done = Some(Instant::now());
    }

    fn got_conn(&mut self) {
        self.current().got_conn = Some(Instant::now());
    }

    fn first_response_byte(&mut self) {
        self.current().first_response_byte = Some(Instant::now());
    }

    fn body_done(&mut self) {
        self.current().body_done = Some(Instant::now());
    }
}
