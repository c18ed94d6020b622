use cookie_store::CookieStore;
use hyper::header::HeaderValue;
use url::Url;

/// Cookie store scoped to a single attempt, so cookies set on one hop of
/// a redirect chain are presented on the next.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: CookieStore,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the `Set-Cookie` values of a response received from `url`.
    /// Cookies the store rejects (foreign domain, unparsable) are dropped.
    pub fn store<'a>(&mut self, url: &Url, set_cookies: impl Iterator<Item = &'a HeaderValue>) {
        for raw in set_cookies {
            let Ok(raw) = raw.to_str() else { continue };
            let _ = self.store.parse(raw, url);
        }
    }

    /// The `Cookie` header value to send to `url`, if any cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let pairs: Vec<String> = self
            .store
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}
