//! Content identifier detection for IPFS-addressed URIs.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// CIDv0 (base58btc, 46 chars starting with `Qm`) or CIDv1 base32 (`b...`).
const CID_PATTERN: &str = r"(Qm[1-9A-HJ-NP-Za-km-z]{44}|b[a-z2-7]{50,})";

/// Any URL with an `/ipfs/<cid>` segment, at any depth.
static GATEWAY_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^https?://[^/?#]+(?:/[^/?#]*)*?/ipfs/{}(/[^?#]*)?",
        CID_PATTERN
    ))
    .unwrap()
});

static SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^https?://{}\.ipfs\.[^/]+(/[^?#]*)?", CID_PATTERN)).unwrap()
});

static BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^{}(/[^?#]*)?$", CID_PATTERN)).unwrap());

/// A content identifier plus an optional path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentAddress {
    pub cid: String,
    /// Either empty or starting with `/`.
    pub path: String,
}

impl ContentAddress {
    /// Detect a content identifier in `uri`.
    ///
    /// Recognizes `ipfs://<cid>[/path]`, `ipfs://ipfs/<cid>`, gateway URLs with an
    /// `/ipfs/<cid>` segment, subdomain gateways (`<cid>.ipfs.<host>`), and bare
    /// CIDs. Returns `None` for anything else, including ordinary CDN URLs.
    pub fn parse(uri: &str) -> Option<Self> {
        let uri = uri.trim();

        if let Some(rest) = strip_prefix_ignore_case(uri, "ipfs://") {
            let rest = rest.strip_prefix("ipfs/").unwrap_or(rest);
            let rest = rest.split(['?', '#']).next().unwrap_or_default();
            let (cid, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            if cid.is_empty() {
                return None;
            }
            return Some(Self::new(cid, path));
        }

        for pattern in [&*GATEWAY_PATH, &*SUBDOMAIN, &*BARE] {
            if let Some(caps) = pattern.captures(uri) {
                let cid = caps.get(1)?.as_str();
                let path = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                return Some(Self::new(cid, path));
            }
        }

        None
    }

    fn new(cid: &str, path: &str) -> Self {
        let path = path.trim_end_matches('/');
        Self {
            cid: cid.to_string(),
            path: path.to_string(),
        }
    }

    /// Path-style URL for this address on the given gateway.
    pub fn gateway_url(&self, gateway: &str) -> String {
        format!(
            "{}/ipfs/{}{}",
            gateway.trim_end_matches('/'),
            self.cid,
            self.path
        )
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
