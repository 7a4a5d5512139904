/*!
ClientHello/ServerHello extension parsing.

Each extension parses by its declared length and never overruns the
extension span; unknown types are skipped.
*/
use crate::buffer::ByteCursor;
use crate::models::tls::*;
use crate::models::FlowIndex;

use super::{push_bounded, tls_read, TlsAnalyzer};

/// Parse one extension. Returns false when the packet is snapped.
pub(super) fn process_hello_extension(
    a: &mut TlsAnalyzer,
    buf: &mut ByteCursor,
    idx: FlowIndex,
    handshake_type: u8,
    non_tor_ext: &mut bool,
) -> bool {
    let f = &mut a.flows[idx];

    let ext_type = tls_read!(f, buf, read_u16);
    let ext_len = tls_read!(f, buf, read_u16);

    push_bounded(&mut f.ext_list, ext_type, TLS_MAX_EXT, &mut f.stat, TlsStat::EXTL_TRUNC);
    f.num_ext += 1;

    match ext_type {
        TLS_EXT_SERVER_NAME => {
            if ext_len == 0 {
                return true;
            }
            buf.skip_u16(); // server name list length

            let typ = tls_read!(f, buf, read_u8);
            if typ != 0 {
                // only HOST_NAME (0) is valid
                f.stat |= TlsStat::MALFORMED;
                return true;
            }

            let name_len = tls_read!(f, buf, read_u16) as usize;
            let stored = name_len.min(TLS_SNI_MAX_LEN);
            if let Some(name) = buf.peek_bytes(stored) {
                f.server_name = String::from_utf8_lossy(name).into_owned();
            }
            buf.skip_n(name_len);
        }

        TLS_EXT_SIG_ALGS => {
            if ext_len == 0 {
                return true;
            }
            let mut left = ext_len as i32;
            buf.skip_u16(); // signature hash algorithms length
            left -= 2;
            while left >= 2 {
                let alg = tls_read!(f, buf, read_u16);
                push_bounded(
                    &mut f.sig_alg,
                    alg,
                    TLS_MAX_SIG_ALG,
                    &mut f.stat,
                    TlsStat::SIG_ALG_TRUNC,
                );
                f.num_sig_alg += 1;
                left -= 2;
            }
        }

        TLS_EXT_USE_SRTP => {
            f.proto |= TlsProto::RTP;
            buf.skip_n(ext_len as usize);
        }

        TLS_EXT_HEARTBEAT => {
            let flag = tls_read!(f, buf, peek_u8);
            if flag == TLS_HB_EXT_NOT_ALLOWED {
                f.stat |= TlsStat::NO_HEARTBEAT;
            } else if flag != TLS_HB_EXT_ALLOWED {
                f.stat |= TlsStat::MALFORMED;
            }
            buf.skip_n(ext_len as usize);
        }

        TLS_EXT_ALPN | TLS_EXT_ALPS => {
            *non_tor_ext = true;
            // the protocol list carries its own length prefix
            let inner_len = tls_read!(f, buf, read_u16);
            if !process_protocol_list(f, buf, inner_len, ext_type) {
                return false;
            }
        }

        TLS_EXT_NPN => {
            *non_tor_ext = true;
            if !process_protocol_list(f, buf, ext_len, ext_type) {
                return false;
            }
        }

        TLS_EXT_SUPPORTED_VERSIONS => {
            if ext_len == 0 {
                return true;
            }
            if handshake_type == TLS_HT_SERVER_HELLO {
                // the single negotiated version; the flow version is fixed
                // up at flow termination
                let v = tls_read!(f, buf, read_u16);
                push_bounded(
                    &mut f.supp_ver,
                    v,
                    TLS_MAX_SUPP_VER,
                    &mut f.stat,
                    TlsStat::SUPP_VER_TRUNC,
                );
                f.num_supp_ver += 1;
            } else {
                let mut left = ext_len as i32;
                buf.skip_u8(); // supported versions length
                left -= 1;
                while left > 0 {
                    let v = tls_read!(f, buf, read_u16);
                    push_bounded(
                        &mut f.supp_ver,
                        v,
                        TLS_MAX_SUPP_VER,
                        &mut f.stat,
                        TlsStat::SUPP_VER_TRUNC,
                    );
                    f.num_supp_ver += 1;
                    left -= 2;
                }
            }
        }

        TLS_EXT_RENEG_INFO => {
            f.stat |= TlsStat::RENEGOTIATION;
            *non_tor_ext = true;
            buf.skip_n(ext_len as usize);
        }

        TLS_EXT_ELLIPTIC_CURVES => {
            if ext_len == 0 {
                return true;
            }
            let mut left = ext_len as i32;
            buf.skip_u16(); // curve list length
            left -= 2;
            while left > 0 {
                let curve = tls_read!(f, buf, read_u16);
                push_bounded(&mut f.ec, curve, TLS_MAX_EC, &mut f.stat, TlsStat::EC_TRUNC);
                f.num_ec += 1;
                left -= 2;
            }
        }

        TLS_EXT_EC_POINT_FORMATS => {
            if ext_len == 0 {
                return true;
            }
            let mut left = ext_len as i32;
            buf.skip_u8(); // format list length
            left -= 1;
            while left > 0 {
                let fmt = tls_read!(f, buf, read_u8);
                push_bounded(
                    &mut f.ec_formats,
                    fmt,
                    TLS_MAX_EC_FORMATS,
                    &mut f.stat,
                    TlsStat::EC_TRUNC,
                );
                f.num_ec_formats = f.num_ec_formats.saturating_add(1);
                left -= 1;
            }
        }

        _ => {
            buf.skip_n(ext_len as usize);
        }
    }

    true
}

/// Walk an ALPN/ALPS/NPN protocol-name list, flag the well-known protocol
/// identifiers and store the names.
fn process_protocol_list(
    f: &mut super::TlsFlow,
    buf: &mut ByteCursor,
    mut ext_len: u16,
    ext_type: u16,
) -> bool {
    while ext_len != 0 {
        let proto_len = tls_read!(f, buf, read_u8) as usize;
        if proto_len > buf.left() {
            f.stat |= TlsStat::SNAP;
            return false;
        }
        if proto_len == 0 {
            break;
        }

        let id = buf.peek_bytes(proto_len).unwrap();

        if proto_len >= 2 {
            let first = u16::from_be_bytes([id[0], id[1]]);
            if tls_is_grease(first) {
                f.proto |= TlsProto::GREASE;
                break;
            }
        }

        f.proto |= tls_proto_from_id(id);

        let (list, num, max) = match ext_type {
            TLS_EXT_ALPN => (&mut f.alpn_list, &mut f.num_alpn, TLS_MAX_PROTO),
            TLS_EXT_ALPS => (&mut f.alps_list, &mut f.num_alps, TLS_MAX_PROTO),
            _ => (&mut f.npn_list, &mut f.num_npn, TLS_MAX_PROTO),
        };
        if list.len() >= max {
            f.stat |= TlsStat::PROTOL_TRUNC;
        } else {
            let stored = proto_len.min(TLS_PROTO_LEN);
            if stored < proto_len {
                f.stat |= TlsStat::PROTON_TRUNC;
            }
            list.push(String::from_utf8_lossy(&id[..stored]).into_owned());
        }
        *num += 1;

        buf.skip_n(proto_len);
        ext_len = ext_len.saturating_sub(proto_len as u16 + 1);
    }

    true
}
