/*!
OpenVPN control-channel detection.

A 2-byte length equal to the wire payload length minus two, followed by a
valid opcode in the high 5 bits of the next byte, identifies the OpenVPN
framing; the TLS handshake follows inside CONTROL_V1 messages.
*/
use crate::buffer::ByteCursor;
use crate::models::tls::*;
use crate::models::PacketView;

use super::TlsFlow;

/// Same contract as `tls_read!`, usable where the enclosing function
/// returns bool with false meaning "stop".
macro_rules! tls_read_bool {
    ($f:expr, $buf:expr, $m:ident) => {
        match $buf.$m() {
            Some(v) => v,
            None => {
                $f.stat |= TlsStat::SNAP;
                return false;
            }
        }
    };
}

/// Cheap pre-check before committing to OpenVPN processing.
pub(super) fn is_openvpn(buf: &mut ByteCursor, packet: &PacketView, f: &TlsFlow) -> bool {
    if f.proto.contains(TlsProto::OVPN) {
        return true;
    }
    if buf.left() < 16 {
        return false;
    }
    match buf.peek_u16() {
        Some(length) => length == packet.l7_len.wrapping_sub(2),
        None => false,
    }
}

/// Consume the OpenVPN framing. Returns true when a TLS record may follow
/// (CONTROL_V1), false when the packet holds no further TLS content.
pub(super) fn process_openvpn(buf: &mut ByteCursor, f: &mut TlsFlow) -> bool {
    buf.skip_u16(); // packet length

    // opcode(5) / key_id(3)
    let opcode = tls_read_bool!(f, buf, read_u8);
    let opcode = (opcode & 0xf8) >> 3;
    if !ovpn_opcode_is_valid(opcode) {
        return false;
    }
    f.ovpn_type |= 1 << opcode;
    f.proto |= TlsProto::OVPN;

    if opcode == OVPN_DATA_V1 || opcode == OVPN_DATA_V2 {
        // encrypted data channel
        return false;
    }

    if f.ovpn_sess_id == 0 {
        f.ovpn_sess_id = tls_read_bool!(f, buf, read_u64);
    } else {
        buf.skip_u64();
    }

    if opcode != OVPN_CONTROL_V1 {
        return false;
    }

    // message packet-id array
    let len = tls_read_bool!(f, buf, read_u8);
    if len > 0 {
        buf.skip_n(len as usize * 4);
    }

    // remote session id, absent in the first message
    let rsid = tls_read_bool!(f, buf, peek_u16);
    if rsid != 0 {
        buf.skip_u64();
    }

    // message packet-id
    buf.skip_u32();

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::L4Proto;

    fn packet(l7: &[u8]) -> PacketView {
        PacketView {
            l7,
            l7_len: l7.len() as u16,
            ts_secs: 1_700_000_000,
            ts_usecs: 0,
            l4_proto: L4Proto::Udp,
            first_fragment: true,
            pkt_num: 1,
        }
    }

    #[test]
    fn test_control_v1_framing() {
        // len | opcode CONTROL_V1 (4 << 3) | session id | pid array len 0 |
        // remote session id (0 = absent as u16 peek) | packet id
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0x00, 0x00]); // patched below
        bytes.push(OVPN_CONTROL_V1 << 3);
        bytes.extend_from_slice(&0x1122_3344_5566_7788u64.to_be_bytes());
        bytes.push(0); // packet-id array length
        bytes.extend_from_slice(&0u32.to_be_bytes()); // message packet id
        bytes.extend_from_slice(&[0u8; 8]); // padding so the peek works
        let len = (bytes.len() - 2) as u16;
        bytes[..2].copy_from_slice(&len.to_be_bytes());

        let pkt = packet(&bytes);
        let mut f = TlsFlow::default();
        let mut buf = ByteCursor::new(&bytes);
        assert!(is_openvpn(&mut buf, &pkt, &f));
        assert!(process_openvpn(&mut buf, &mut f));
        assert!(f.proto.contains(TlsProto::OVPN));
        assert_eq!(f.ovpn_sess_id, 0x1122_3344_5566_7788);
        assert_eq!(f.ovpn_type, 1 << OVPN_CONTROL_V1);
    }

    #[test]
    fn test_data_channel_stops_processing() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0x00, 0x00]);
        bytes.push(OVPN_DATA_V2 << 3);
        bytes.extend_from_slice(&[0u8; 24]);
        let len = (bytes.len() - 2) as u16;
        bytes[..2].copy_from_slice(&len.to_be_bytes());

        let pkt = packet(&bytes);
        let mut f = TlsFlow::default();
        let mut buf = ByteCursor::new(&bytes);
        assert!(is_openvpn(&mut buf, &pkt, &f));
        assert!(!process_openvpn(&mut buf, &mut f));
        assert!(f.proto.contains(TlsProto::OVPN));
    }

    #[test]
    fn test_non_openvpn_payload() {
        let bytes = [0x16, 0x03, 0x03, 0x00, 0x20, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let pkt = packet(&bytes);
        let f = TlsFlow::default();
        let mut buf = ByteCursor::new(&bytes);
        assert!(!is_openvpn(&mut buf, &pkt, &f));
    }
}
