/*!
Certificate-message mining.

Only the first certificate of the chain is parsed: version, subject and
issuer name fields, serial, SHA-1 fingerprint, validity period, signature
algorithm and public key type/size. Subsequent certificates are skipped.
*/
use chrono::{DateTime, Utc};
use log::debug;
use sha1::{Digest, Sha1};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::buffer::ByteCursor;
use crate::models::tls::*;
use crate::models::{FlowIndex, LeafType, Schema};
use crate::output::OutputBuffer;

use super::{tls_read, TlsAnalyzer, TlsConfig};

/// Public-key algorithm of the leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PkeyType {
    #[default]
    Undef,
    Rsa,
    Dsa,
    Ec,
}

impl PkeyType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PkeyType::Rsa => "RSA",
            PkeyType::Dsa => "DSA",
            PkeyType::Ec => "ECDSA",
            PkeyType::Undef => "UNDEF",
        }
    }
}

/// Distinguished-name fields kept per certificate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameInfo {
    pub oneline: String,
    pub common: String,
    pub org: String,
    pub org_unit: String,
    pub locality: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, Default)]
pub struct CertInfo {
    /// X.509 version plus one; zero while no certificate was seen.
    pub version: u8,
    pub serial: String,
    /// SHA-1 over the DER encoding, lowercase hex.
    pub fingerprint: String,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub sig_alg: String,
    pub pkey_type: PkeyType,
    pub pkey_size: u16,
    pub subject: NameInfo,
    pub issuer: NameInfo,
}

/// Parse the Certificate handshake message. Returns false when the packet
/// is snapped.
pub(super) fn process_certificate(
    a: &mut TlsAnalyzer,
    buf: &mut ByteCursor,
    idx: FlowIndex,
    single_cert: &mut bool,
) -> bool {
    let f = &mut a.flows[idx];

    let total_len = tls_read!(f, buf, read_u24);
    if total_len == 0 {
        return true;
    }

    let cert_len = tls_read!(f, buf, read_u24);
    if cert_len == 0 {
        return true;
    }

    let avail = (cert_len as usize).min(buf.left());
    let der = buf.peek_bytes(avail).unwrap_or(&[]);
    let parsed = X509Certificate::from_der(der).ok();
    buf.skip_n(avail);

    let Some((_, cert)) = parsed else {
        debug!("failed to parse certificate");
        return true;
    };

    // Tor servers send a single small certificate
    *single_cert = total_len == cert_len + 3;

    f.cert.version = cert.version().0 as u8 + 1;
    f.cert.subject = name_info(cert.subject());
    f.cert.issuer = name_info(cert.issuer());
    f.cert.serial = hex::encode_upper(cert.raw_serial());
    f.cert.sig_alg = sig_alg_name(&cert.signature_algorithm.algorithm);

    if let Ok(key) = cert.public_key().parsed() {
        f.cert.pkey_type = match key {
            PublicKey::RSA(_) => PkeyType::Rsa,
            PublicKey::EC(_) => PkeyType::Ec,
            PublicKey::DSA(_) => PkeyType::Dsa,
            _ => PkeyType::Undef,
        };
        let bits = key.key_size();
        f.cert.pkey_size = bits as u16;
        if bits > 0 && bits < 1024 {
            f.stat |= TlsStat::WEAK_KEY;
        }
    }

    f.cert.not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0);
    f.cert.not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0);

    let mut hasher = Sha1::new();
    hasher.update(der);
    f.cert.fingerprint = hex::encode(hasher.finalize());

    if let Some(blist) = &a.lists.blist {
        if let Some(cat) = blist.lookup(&f.cert.fingerprint) {
            f.blist_cat = cat.to_string();
            f.stat |= TlsStat::BLIST;
        }
    }

    if let Some(tor) = &a.tor {
        if tor.matches_certificate(f, cert_len, *single_cert) {
            f.is_tor = true;
        }
    }

    true
}

fn name_attr(iter: impl Iterator<Item = impl AsRef<str>>, cap: usize) -> String {
    iter.map(|a| {
        let mut s = a.as_ref().to_string();
        s.truncate(cap);
        s
    })
    .next()
    .unwrap_or_default()
}

fn name_info(name: &X509Name) -> NameInfo {
    NameInfo {
        oneline: name.to_string(),
        common: name_attr(
            name.iter_common_name().filter_map(|a| a.as_str().ok()),
            TLS_CERT_NAME_MAX_LEN,
        ),
        org: name_attr(
            name.iter_organization().filter_map(|a| a.as_str().ok()),
            TLS_CERT_NAME_MAX_LEN,
        ),
        org_unit: name_attr(
            name.iter_organizational_unit().filter_map(|a| a.as_str().ok()),
            TLS_CERT_NAME_MAX_LEN,
        ),
        locality: name_attr(
            name.iter_locality().filter_map(|a| a.as_str().ok()),
            TLS_CERT_NAME_MAX_LEN,
        ),
        state: name_attr(
            name.iter_state_or_province().filter_map(|a| a.as_str().ok()),
            TLS_CERT_NAME_MAX_LEN,
        ),
        country: name_attr(name.iter_country().filter_map(|a| a.as_str().ok()), 3),
    }
}

/// Short name of the most common signature algorithms, the dotted OID
/// otherwise.
fn sig_alg_name(oid: &x509_parser::der_parser::Oid) -> String {
    match oid.to_id_string().as_str() {
        "1.2.840.113549.1.1.4" => "md5WithRSAEncryption".to_string(),
        "1.2.840.113549.1.1.5" => "sha1WithRSAEncryption".to_string(),
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption".to_string(),
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption".to_string(),
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption".to_string(),
        "1.2.840.113549.1.1.10" => "rsassaPss".to_string(),
        "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256".to_string(),
        "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384".to_string(),
        "1.2.840.10045.4.3.4" => "ecdsa-with-SHA512".to_string(),
        "1.3.101.112" => "ED25519".to_string(),
        other => other.to_string(),
    }
}

/// Certificate columns of the output schema.
pub(super) fn append_cert_columns(bv: &mut Schema, cfg: &TlsConfig) {
    bv.append_u8_r("sslCertVersion", "SSL certificate version");
    bv.append_strc_r("sslCertSerial", "SSL certificate serial number");
    bv.append_strc_r("sslCertSha1FP", "SSL certificate SHA1 fingerprint");
    bv.append_tuple_r(
        "sslCNotValidBefore_after_lifetime",
        "SSL certificate validity period (not valid before/after, lifetime (seconds))",
        &[LeafType::Timestamp, LeafType::Timestamp, LeafType::UInt64],
    );
    bv.append_str_r("sslCSigAlg", "SSL certificate signature algorithm");
    bv.append_tuple_r(
        "sslCPKeyType_Size",
        "SSL certificate public key type, size (bits)",
        &[LeafType::StringClass, LeafType::UInt16],
    );
    if cfg.cert_subject_oneline {
        bv.append_str_r("sslCSubject", "SSL certificate subject");
        bv.append_str_r("sslCIssuer", "SSL certificate issuer");
    } else {
        bv.append_str_r("sslCSubjectCommonName", "SSL certificate subject common name");
        bv.append_str_r("sslCSubjectOrgName", "SSL certificate subject organization name");
        bv.append_str_r("sslCSubjectOrgUnit", "SSL certificate subject organizational unit name");
        bv.append_str_r("sslCSubjectLocality", "SSL certificate subject locality name");
        bv.append_str_r("sslCSubjectState", "SSL certificate subject state or province name");
        bv.append_strc_r("sslCSubjectCountry", "SSL certificate subject country name");
        bv.append_str_r("sslCIssuerCommonName", "SSL certificate issuer common name");
        bv.append_str_r("sslCIssuerOrgName", "SSL certificate issuer organization name");
        bv.append_str_r("sslCIssuerOrgUnit", "SSL certificate issuer organizational unit name");
        bv.append_str_r("sslCIssuerLocality", "SSL certificate issuer locality name");
        bv.append_str_r("sslCIssuerState", "SSL certificate issuer state or province name");
        bv.append_strc_r("sslCIssuerCountry", "SSL certificate issuer country name");
    }
}

/// Zero-repeat placeholders for flows without a valid TLS version.
pub(super) fn append_cert_empty(out: &mut OutputBuffer, cfg: &TlsConfig) {
    let columns = if cfg.cert_subject_oneline { 6 + 2 } else { 6 + 12 };
    for _ in 0..columns {
        out.append_count(0);
    }
}

/// Certificate values in schema order.
pub(super) fn append_cert_values(out: &mut OutputBuffer, cert: &CertInfo, cfg: &TlsConfig) {
    if cert.version == 0 {
        out.append_count(0);
    } else {
        out.append_count(1);
        out.append_u8(cert.version);
    }
    out.append_opt_str(&cert.serial);
    out.append_opt_str(&cert.fingerprint);

    match (cert.not_before, cert.not_after) {
        (Some(nb), Some(na)) => {
            out.append_count(1);
            out.append_timestamp(nb.timestamp() as u64, 0);
            out.append_timestamp(na.timestamp() as u64, 0);
            out.append_u64((na.timestamp() - nb.timestamp()).max(0) as u64);
        }
        _ => out.append_count(0),
    }

    out.append_opt_str(&cert.sig_alg);

    if cert.pkey_type == PkeyType::Undef && cert.pkey_size == 0 {
        out.append_count(0);
    } else {
        out.append_count(1);
        out.append_str(cert.pkey_type.as_str());
        out.append_u16(cert.pkey_size);
    }

    if cfg.cert_subject_oneline {
        out.append_opt_str(&cert.subject.oneline);
        out.append_opt_str(&cert.issuer.oneline);
    } else {
        for name in [&cert.subject, &cert.issuer] {
            out.append_opt_str(&name.common);
            out.append_opt_str(&name.org);
            out.append_opt_str(&name.org_unit);
            out.append_opt_str(&name.locality);
            out.append_opt_str(&name.state);
            out.append_opt_str(&name.country);
        }
    }
}
