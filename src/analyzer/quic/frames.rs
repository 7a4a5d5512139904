/*!
QUIC variable-length integers and frame skipping.

A varint carries a 2-bit length class in its top bits and the value in the
remaining 6/14/30/62 bits. Frame skipping walks a decrypted Initial payload
frame by frame so a CRYPTO frame can be located.
*/
use crate::buffer::ByteCursor;
use crate::models::quic::*;

pub trait QuicBufExt {
    fn read_quic_varint(&mut self) -> Option<u64>;
    fn skip_quic_varint(&mut self) -> bool;
    /// Skip one frame, PADDING runs coalesced. Returns false on truncation
    /// or an unknown frame type.
    fn skip_quic_frame(&mut self) -> bool;
}

impl QuicBufExt for ByteCursor<'_> {
    fn read_quic_varint(&mut self) -> Option<u64> {
        let b1 = self.peek_u8()?;
        match b1 >> 6 {
            0 => {
                self.skip_u8();
                Some(b1 as u64 & 0x3f)
            }
            1 => Some(self.read_u16()? as u64 & 0x3fff),
            2 => Some(self.read_u32()? as u64 & 0x3fff_ffff),
            _ => Some(self.read_u64()? & 0x3fff_ffff_ffff_ffff),
        }
    }

    fn skip_quic_varint(&mut self) -> bool {
        let Some(b1) = self.peek_u8() else {
            return false;
        };
        match b1 >> 6 {
            0 => self.skip_u8(),
            1 => self.skip_u16(),
            2 => self.skip_u32(),
            _ => self.skip_u64(),
        }
    }

    fn skip_quic_frame(&mut self) -> bool {
        let Some(frame_type) = self.read_u8() else {
            return false;
        };

        match frame_type {
            QUIC_FT_PADDING => {
                // swallow the whole PADDING run in one go
                while let Some(next) = self.peek_u8() {
                    if next != QUIC_FT_PADDING {
                        return true;
                    }
                    self.skip_u8();
                }
                false
            }

            QUIC_FT_PING => true,

            QUIC_FT_ACK | QUIC_FT_ACK_ECN => {
                if !self.skip_quic_varint() {
                    return false; // Largest Acknowledged
                }
                if !self.skip_quic_varint() {
                    return false; // ACK Delay
                }
                let Some(mut count) = self.read_quic_varint() else {
                    return false; // ACK Range Count
                };
                if !self.skip_quic_varint() {
                    return false; // First ACK Range
                }
                while count > 0 {
                    if !self.skip_quic_varint() || !self.skip_quic_varint() {
                        return false; // Gap, ACK Range
                    }
                    count -= 1;
                }
                if frame_type == QUIC_FT_ACK_ECN {
                    // ECT(0), ECT(1), ECN-CE counts
                    if !self.skip_quic_varint()
                        || !self.skip_quic_varint()
                        || !self.skip_quic_varint()
                    {
                        return false;
                    }
                }
                true
            }

            QUIC_FT_RESET_STREAM => {
                self.skip_quic_varint() // Stream ID
                    && self.skip_quic_varint() // Application Error Code
                    && self.skip_quic_varint() // Final Size
            }

            QUIC_FT_STOP_SENDING => {
                self.skip_quic_varint() // Stream ID
                    && self.skip_quic_varint() // Application Error Code
            }

            QUIC_FT_CRYPTO => {
                let (Some(_offset), Some(length)) =
                    (self.read_quic_varint(), self.read_quic_varint())
                else {
                    return false;
                };
                self.skip_n(length as usize)
            }

            QUIC_FT_NEW_TOKEN => {
                let Some(length) = self.read_quic_varint() else {
                    return false;
                };
                self.skip_n(length as usize)
            }

            t if quic_frame_is_stream(t) => {
                if !self.skip_quic_varint() {
                    return false; // Stream ID
                }
                if quic_stream_has_off(t) && !self.skip_quic_varint() {
                    return false; // Offset
                }
                if quic_stream_has_len(t) {
                    let Some(length) = self.read_quic_varint() else {
                        return false;
                    };
                    return self.skip_n(length as usize);
                }
                // no Length field: the stream data consumes everything
                self.skip_n(self.left())
            }

            QUIC_FT_MAX_DATA => self.skip_quic_varint(),

            QUIC_FT_MAX_STREAM_DATA => self.skip_quic_varint() && self.skip_quic_varint(),

            QUIC_FT_MAX_STREAMS_BI | QUIC_FT_MAX_STREAMS_UNI => self.skip_quic_varint(),

            QUIC_FT_DATA_BLOCKED => self.skip_quic_varint(),

            QUIC_FT_STREAM_DATA_BLOCKED => self.skip_quic_varint() && self.skip_quic_varint(),

            QUIC_FT_STREAMS_BLOCKED_BI | QUIC_FT_STREAMS_BLOCKED_UNI => self.skip_quic_varint(),

            QUIC_FT_NEW_CONNECTION_ID => {
                if !self.skip_quic_varint() {
                    return false; // Sequence Number
                }
                if !self.skip_quic_varint() {
                    return false; // Retire Prior To
                }
                let Some(length) = self.read_u8() else {
                    return false; // Connection ID Length
                };
                self.skip_n(length as usize) // Connection ID
                    && self.skip_n(16) // Stateless Reset Token
            }

            QUIC_FT_RETIRE_CONNECTION_ID => self.skip_quic_varint(),

            QUIC_FT_PATH_CHALLENGE | QUIC_FT_PATH_RESPONSE => self.skip_u64(),

            QUIC_FT_CONNECTION_CLOSE_TPT | QUIC_FT_CONNECTION_CLOSE_APP => {
                if !self.skip_quic_varint() {
                    return false; // Error Code
                }
                if frame_type == QUIC_FT_CONNECTION_CLOSE_TPT && !self.skip_quic_varint() {
                    return false; // Frame Type
                }
                let Some(length) = self.read_quic_varint() else {
                    return false; // Reason Phrase Length
                };
                self.skip_n(length as usize)
            }

            _ => false, // unknown frame type
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_classes() {
        let data = [
            0x25, // 1-byte: 37
            0x7b, 0xbd, // 2-byte: 15293
            0x9d, 0x7f, 0x3e, 0x7d, // 4-byte: 494878333
            0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c, // 8-byte
        ];
        let mut buf = ByteCursor::new(&data);
        assert_eq!(buf.read_quic_varint(), Some(37));
        assert_eq!(buf.read_quic_varint(), Some(15293));
        assert_eq!(buf.read_quic_varint(), Some(494_878_333));
        assert_eq!(buf.read_quic_varint(), Some(151_288_809_941_952_652));
        assert_eq!(buf.read_quic_varint(), None);
    }

    #[test]
    fn test_skip_padding_run() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x01, 0xff];
        let mut buf = ByteCursor::new(&data);
        assert!(buf.skip_quic_frame());
        assert_eq!(buf.peek_u8(), Some(0x06));
    }

    #[test]
    fn test_skip_ack_then_crypto_is_reachable() {
        // ACK: largest 5, delay 0, range count 1, first range 0, gap/range 0/0
        // then a CRYPTO frame of 3 bytes
        let data = [
            0x02, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, // ACK
            0x06, 0x00, 0x03, 0xaa, 0xbb, 0xcc, // CRYPTO off=0 len=3
        ];
        let mut buf = ByteCursor::new(&data);
        assert!(buf.skip_quic_frame());
        assert_eq!(buf.peek_u8(), Some(0x06));
        assert!(buf.skip_quic_frame());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_frame_type_fails() {
        let data = [0x21, 0x00];
        let mut buf = ByteCursor::new(&data);
        assert!(!buf.skip_quic_frame());
    }

    #[test]
    fn test_truncated_crypto_fails() {
        let data = [0x06, 0x00, 0x10, 0xaa]; // claims 16 bytes, has 1
        let mut buf = ByteCursor::new(&data);
        assert!(!buf.skip_quic_frame());
    }
}
