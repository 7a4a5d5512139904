/*!
Tor flow heuristic.

Tor servers present a single small self-generated RSA-1024 certificate
whose validity starts at UTC midnight and whose subject/issuer common
names follow a `www.<base32>.net|com` pattern. Without a reverse flow the
client SNI pattern plus the empty-renegotiation SCSV serves as a weaker
fallback.
*/
use regex::Regex;

use super::{PkeyType, TlsFlow};

/// Tor certificates are small; anything bigger is not Tor.
const TOR_MAX_CERT_LEN: u32 = 512;

const BASE32: &str = "abcdefghijklmnopqrstuvwxyz234567";

pub struct TorDetector {
    subject_re: Regex,
    issuer_re: Regex,
    request_re: Regex,
    oneline: bool,
}

impl TorDetector {
    /// `oneline` selects the single-line certificate-subject rendition and
    /// its matching patterns.
    pub fn new(oneline: bool) -> TorDetector {
        let (subject, issuer) = if oneline {
            (
                format!("^CN=www\\.[{BASE32}]{{8,20}}\\.net$"),
                format!("^CN=www\\.[{BASE32}]{{8,20}}\\.(net|com)$"),
            )
        } else {
            (
                format!("^www\\.[{BASE32}]{{8,20}}\\.net$"),
                format!("^www\\.[{BASE32}]{{8,20}}\\.(net|com)$"),
            )
        };
        TorDetector {
            subject_re: Regex::new(&subject).unwrap(),
            issuer_re: Regex::new(&issuer).unwrap(),
            request_re: Regex::new(&format!("^www\\.[{BASE32}]{{4,25}}\\.com$")).unwrap(),
            oneline,
        }
    }

    /// Server-to-client detection based on the certificate content.
    pub fn matches_certificate(&self, f: &TlsFlow, cert_len: u32, single_cert: bool) -> bool {
        if !single_cert || cert_len > TOR_MAX_CERT_LEN {
            return false;
        }
        if f.cert.pkey_type != PkeyType::Rsa || f.cert.pkey_size != 1024 {
            return false;
        }

        let (Some(nb), Some(na)) = (f.cert.not_before, f.cert.not_after) else {
            return false;
        };
        let start = nb.timestamp();
        let lifetime = na.timestamp() - start;
        // validity starts at midnight (since ~2013); earlier certificates
        // were valid for exactly one year
        if start % (24 * 3600) != 0 && lifetime != 365 * 24 * 3600 {
            return false;
        }

        // must not be self signed
        let (subject, issuer) = if self.oneline {
            (&f.cert.subject.oneline, &f.cert.issuer.oneline)
        } else {
            (&f.cert.subject.common, &f.cert.issuer.common)
        };
        if subject.is_empty() || issuer.is_empty() || subject == issuer {
            return false;
        }

        if !self.oneline && (!f.cert.subject.org.is_empty() || !f.cert.issuer.org.is_empty()) {
            return false;
        }

        self.subject_re.is_match(subject) && self.issuer_re.is_match(issuer)
    }

    /// Client-side fallback on the requested server name.
    pub fn matches_client_sni(&self, server_name: &str) -> bool {
        !server_name.is_empty() && self.request_re.is_match(server_name)
    }
}
