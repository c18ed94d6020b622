use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::prober::Prober;

/// A named probe configuration: which prober to run and how.
///
/// Only the sub-configuration matching `prober` is read during a probe.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Module {
    pub prober: Prober,

    /// Hard upper bound for the whole attempt, enforced through the probe
    /// context's deadline.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    pub http: HttpProbe,
    pub tcp: TcpProbe,
    pub dns: DnsProbe,
    pub icmp: IcmpProbe,
}

impl Default for Module {
    fn default() -> Self {
        Module {
            prober: Prober::Http,
            timeout: Duration::from_secs(5),
            http: HttpProbe::default(),
            tcp: TcpProbe::default(),
            dns: DnsProbe::default(),
            icmp: IcmpProbe::default(),
        }
    }
}

/// Address family to resolve a target to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum IpProtocol {
    #[serde(rename = "ip4")]
    Ip4,
    #[default]
    #[serde(rename = "ip6")]
    Ip6,
}

impl IpProtocol {
    pub fn other(self) -> Self {
        match self {
            IpProtocol::Ip4 => IpProtocol::Ip6,
            IpProtocol::Ip6 => IpProtocol::Ip4,
        }
    }

    pub fn version(self) -> u8 {
        match self {
            IpProtocol::Ip4 => 4,
            IpProtocol::Ip6 => 6,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Ip4 => write!(f, "ip4"),
            IpProtocol::Ip6 => write!(f, "ip6"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// CA bundle that replaces the system trust store.
    pub ca_file: Option<PathBuf>,
    /// Client certificate and PKCS#8 key, both PEM.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Name to verify the peer certificate against. Defaults to the host
    /// being connected to.
    pub server_name: Option<String>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub tls_config: TlsConfig,
    pub basic_auth: Option<BasicAuth>,
    pub bearer_token: Option<String>,
}

/// A regular expression applied to every value of one response header.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderMatch {
    pub header: String,
    pub regexp: String,
    #[serde(default)]
    pub allow_missing: bool,
}

impl HeaderMatch {
    pub fn new(header: &str, regexp: &str, allow_missing: bool) -> Self {
        HeaderMatch {
            header: header.to_string(),
            regexp: regexp.to_string(),
            allow_missing,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpProbe {
    pub ip_protocol: IpProtocol,
    pub ip_protocol_fallback: bool,

    /// Accepted status codes. Empty means any 2xx.
    pub valid_status_codes: Vec<u16>,
    /// Accepted protocol versions such as `HTTP/1.1`. Empty means any.
    pub valid_http_versions: Vec<String>,

    pub no_follow_redirects: bool,
    pub method: String,

    /// Request headers in document order. `Host` sets the request authority.
    #[serde(deserialize_with = "deserialize_ordered_headers")]
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub body_size_limit: Option<u64>,

    pub http_client_config: HttpClientConfig,

    pub fail_if_ssl: bool,
    pub fail_if_not_ssl: bool,
    pub fail_if_body_matches_regexp: Vec<String>,
    pub fail_if_body_not_matches_regexp: Vec<String>,
    pub fail_if_header_matches_regexp: Vec<HeaderMatch>,
    pub fail_if_header_not_matches_regexp: Vec<HeaderMatch>,
}

impl Default for HttpProbe {
    fn default() -> Self {
        HttpProbe {
            ip_protocol: IpProtocol::Ip6,
            ip_protocol_fallback: true,
            valid_status_codes: Vec::new(),
            valid_http_versions: Vec::new(),
            no_follow_redirects: false,
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            body_size_limit: None,
            http_client_config: HttpClientConfig::default(),
            fail_if_ssl: false,
            fail_if_not_ssl: false,
            fail_if_body_matches_regexp: Vec::new(),
            fail_if_body_not_matches_regexp: Vec::new(),
            fail_if_header_matches_regexp: Vec::new(),
            fail_if_header_not_matches_regexp: Vec::new(),
        }
    }
}

/// One step of a TCP conversation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryResponse {
    /// Read lines until one matches; capture groups feed `send`.
    pub expect: Option<String>,
    pub send: Option<String>,
    pub starttls: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpProbe {
    pub ip_protocol: IpProtocol,
    pub ip_protocol_fallback: bool,
    pub tls: bool,
    pub tls_config: TlsConfig,
    pub query_response: Vec<QueryResponse>,
}

impl Default for TcpProbe {
    fn default() -> Self {
        TcpProbe {
            ip_protocol: IpProtocol::Ip6,
            ip_protocol_fallback: true,
            tls: false,
            tls_config: TlsConfig::default(),
            query_response: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsTransport {
    #[default]
    Udp,
    Tcp,
}

/// Regex checks over the records of one section of a DNS response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DnsRrValidator {
    pub fail_if_matches_regexp: Vec<String>,
    pub fail_if_not_matches_regexp: Vec<String>,
    pub fail_if_all_match_regexp: Vec<String>,
    pub fail_if_none_matches_regexp: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsProbe {
    pub ip_protocol: IpProtocol,
    pub ip_protocol_fallback: bool,
    pub transport_protocol: DnsTransport,
    pub query_name: String,
    pub query_type: String,
    pub recursion_desired: bool,
    pub valid_rcodes: Vec<String>,
    pub validate_answer_rrs: DnsRrValidator,
    pub validate_authority_rrs: DnsRrValidator,
    pub validate_additional_rrs: DnsRrValidator,
}

impl Default for DnsProbe {
    fn default() -> Self {
        DnsProbe {
            ip_protocol: IpProtocol::Ip6,
            ip_protocol_fallback: true,
            transport_protocol: DnsTransport::Udp,
            query_name: String::new(),
            query_type: "ANY".to_string(),
            recursion_desired: true,
            valid_rcodes: vec!["NOERROR".to_string()],
            validate_answer_rrs: DnsRrValidator::default(),
            validate_authority_rrs: DnsRrValidator::default(),
            validate_additional_rrs: DnsRrValidator::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IcmpProbe {
    pub ip_protocol: IpProtocol,
    pub ip_protocol_fallback: bool,
    /// Bytes of payload after the echo header.
    pub payload_size: usize,
}

impl Default for IcmpProbe {
    fn default() -> Self {
        IcmpProbe {
            ip_protocol: IpProtocol::Ip6,
            ip_protocol_fallback: true,
            payload_size: 36,
        }
    }
}

/// Parses `500ms`, `5s`, `1m`, `1h`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    let seconds = match unit {
        "ms" => number / 1000.0,
        "" | "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return Err(format!("unknown duration unit in {s:?}")),
    };
    Ok(Duration::from_secs_f64(seconds))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_yaml::Value::deserialize(deserializer)?;
    let text = match raw {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        other => return Err(serde::de::Error::custom(format!("invalid duration {other:?}"))),
    };
    parse_duration(&text).map_err(serde::de::Error::custom)
}

struct OrderedHeaders;

impl<'de> Visitor<'de> for OrderedHeaders {
    type Value = Vec<(String, String)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of header names to values")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut headers = Vec::new();
        while let Some((name, value)) = map.next_entry::<String, String>()? {
            headers.push((name, value));
        }
        Ok(headers)
    }
}

fn deserialize_ordered_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_map(OrderedHeaders)
}
