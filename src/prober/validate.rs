use hyper::HeaderMap;
use regex::bytes::Regex;

use crate::config::{HeaderMatch, HttpProbe};
use crate::error::ProbeError;
use crate::logger::ProbeLogger;

pub fn compile(pattern: &str) -> Result<Regex, ProbeError> {
    Regex::new(pattern).map_err(|source| ProbeError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

pub fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, ProbeError> {
    patterns.iter().map(|p| compile(p)).collect()
}

/// A header rule with its expression compiled.
#[derive(Debug)]
pub struct HeaderRule {
    pub header: String,
    pub regexp: Regex,
    pub allow_missing: bool,
}

impl HeaderRule {
    fn compile(rule: &HeaderMatch) -> Result<Self, ProbeError> {
        Ok(HeaderRule {
            header: rule.header.clone(),
            regexp: compile(&rule.regexp)?,
            allow_missing: rule.allow_missing,
        })
    }
}

/// Every regular expression of an HTTP module, compiled before the attempt
/// starts so a bad pattern fails the probe without touching the network.
#[derive(Debug)]
pub struct HttpValidations {
    pub body_matches: Vec<Regex>,
    pub body_not_matches: Vec<Regex>,
    pub header_matches: Vec<HeaderRule>,
    pub header_not_matches: Vec<HeaderRule>,
}

impl HttpValidations {
    pub fn compile(config: &HttpProbe) -> Result<Self, ProbeError> {
        Ok(HttpValidations {
            body_matches: compile_all(&config.fail_if_body_matches_regexp)?,
            body_not_matches: compile_all(&config.fail_if_body_not_matches_regexp)?,
            header_matches: config
                .fail_if_header_matches_regexp
                .iter()
                .map(HeaderRule::compile)
                .collect::<Result<_, _>>()?,
            header_not_matches: config
                .fail_if_header_not_matches_regexp
                .iter()
                .map(HeaderRule::compile)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Runs every body and header rule; `false` means at least one failed.
    pub fn check(&self, body: &[u8], headers: &HeaderMap, logger: &ProbeLogger) -> bool {
        let body_ok = body_rules_pass(body, &self.body_matches, &self.body_not_matches, logger);
        let headers_ok = header_rules_pass(headers, &self.header_matches, &self.header_not_matches, logger);
        body_ok && headers_ok
    }
}

/// Empty `valid` means any 2xx.
pub fn status_code_valid(code: u16, valid: &[u16]) -> bool {
    if valid.is_empty() {
        (200..300).contains(&code)
    } else {
        valid.contains(&code)
    }
}

/// Empty `valid` accepts any version.
pub fn http_version_valid(version: &str, valid: &[String]) -> bool {
    valid.is_empty() || valid.iter().any(|v| v == version)
}

pub fn body_rules_pass(
    body: &[u8],
    fail_if_matches: &[Regex],
    fail_if_not_matches: &[Regex],
    logger: &ProbeLogger,
) -> bool {
    let mut ok = true;
    for re in fail_if_matches {
        if re.is_match(body) {
            logger.error(format_args!("Body matched regular expression regexp={}", re));
            ok = false;
        }
    }
    for re in fail_if_not_matches {
        if !re.is_match(body) {
            logger.error(format_args!("Body did not match regular expression regexp={}", re));
            ok = false;
        }
    }
    ok
}

pub fn header_rules_pass(
    headers: &HeaderMap,
    fail_if_matches: &[HeaderRule],
    fail_if_not_matches: &[HeaderRule],
    logger: &ProbeLogger,
) -> bool {
    let mut ok = true;

    for rule in fail_if_matches {
        let values: Vec<&[u8]> = headers.get_all(rule.header.as_str()).iter().map(|v| v.as_bytes()).collect();
        if values.is_empty() {
            if !rule.allow_missing {
                logger.error(format_args!("Missing required header header={}", rule.header));
                ok = false;
            }
            continue;
        }
        if values.iter().any(|v| rule.regexp.is_match(v)) {
            logger.error(format_args!(
                "Header matched regular expression header={} regexp={}",
                rule.header, rule.regexp
            ));
            ok = false;
        }
    }

    for rule in fail_if_not_matches {
        let values: Vec<&[u8]> = headers.get_all(rule.header.as_str()).iter().map(|v| v.as_bytes()).collect();
        if values.is_empty() {
            if !rule.allow_missing {
                logger.error(format_args!("Missing required header header={}", rule.header));
                ok = false;
            }
            continue;
        }
        if !values.iter().any(|v| rule.regexp.is_match(v)) {
            logger.error(format_args!(
                "Header did not match regular expression header={} regexp={}",
                rule.header, rule.regexp
            ));
            ok = false;
        }
    }

    ok
}
