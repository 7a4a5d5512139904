/*!
Binary→text translator: one line per flow, columns in schema order.

Repeating elements are joined with `;`, the members of a compound column
with `_`. The header line is prefixed with `%`.
*/
use std::io::{self, Write};

use crate::models::{LeafType, Schema, Subvalue};
use crate::output::value_fmt as vf;
use crate::output::{sanitize_utf8, RowReader, TextFormat};

pub struct TextTranslator {
    fmt: TextFormat,
}

impl TextTranslator {
    pub fn new(fmt: TextFormat) -> TextTranslator {
        TextTranslator { fmt }
    }

    /// `%`-prefixed column-name line.
    pub fn write_header(&self, schema: &Schema, w: &mut dyn Write) -> io::Result<()> {
        let names: Vec<&str> = schema.values.iter().map(|v| v.name.as_str()).collect();
        writeln!(w, "%{}", names.join(&self.fmt.separator))
    }

    /// Column name and description reference, one line per column.
    pub fn write_description(&self, schema: &Schema, w: &mut dyn Write) -> io::Result<()> {
        for v in &schema.values {
            writeln!(w, "{}{}{}", v.name, self.fmt.separator, v.description)?;
        }
        Ok(())
    }

    /// Translate one encoded row. Returns `Ok(false)` when the row bytes do
    /// not match the schema (the caller counts corrupt flows).
    pub fn write_row(&self, schema: &Schema, row: &[u8], w: &mut dyn Write) -> io::Result<bool> {
        let mut r = RowReader::new(row);
        let mut line = String::with_capacity(row.len() * 2);
        for (i, bv) in schema.values.iter().enumerate() {
            if i > 0 {
                line.push_str(&self.fmt.separator);
            }
            let repeats = if bv.repeating { r.get_u32() } else { 1 };
            for rep in 0..repeats {
                if rep > 0 {
                    line.push(';');
                }
                self.subvals(&mut r, &bv.subvals, &mut line);
            }
            if r.is_corrupt() {
                return Ok(false);
            }
        }
        writeln!(w, "{line}")?;
        Ok(true)
    }

    fn subvals(&self, r: &mut RowReader, subvals: &[Subvalue], out: &mut String) {
        for (j, sv) in subvals.iter().enumerate() {
            if j > 0 {
                out.push('_');
            }
            if sv.leaf == LeafType::Compound {
                let repeats = if sv.repeating { r.get_u32() } else { 1 };
                for rep in 0..repeats {
                    if rep > 0 {
                        out.push(';');
                    }
                    self.subvals(r, &sv.children, out);
                }
            } else {
                self.leaf(r, sv.leaf, out);
            }
            if r.is_corrupt() {
                return;
            }
        }
    }

    fn leaf(&self, r: &mut RowReader, leaf: LeafType, out: &mut String) {
        let fmt = &self.fmt;
        match leaf {
            LeafType::Int8 => out.push_str(&r.get_i8().to_string()),
            LeafType::Int16 => out.push_str(&r.get_i16().to_string()),
            LeafType::Int32 => out.push_str(&r.get_i32().to_string()),
            LeafType::Int64 => out.push_str(&r.get_i64().to_string()),
            LeafType::Int128 => out.push_str(&r.get_i128().to_string()),
            LeafType::UInt8 => out.push_str(&r.get_u8().to_string()),
            LeafType::UInt16 => out.push_str(&r.get_u16().to_string()),
            LeafType::UInt32 => out.push_str(&r.get_u32().to_string()),
            LeafType::UInt64 => out.push_str(&r.get_u64().to_string()),
            LeafType::UInt128 => out.push_str(&r.get_u128().to_string()),
            LeafType::Hex8 => out.push_str(&vf::hex8(fmt, r.get_u8())),
            LeafType::Hex16 => out.push_str(&vf::hex16(fmt, r.get_u16())),
            LeafType::Hex32 => out.push_str(&vf::hex32(fmt, r.get_u32())),
            LeafType::Hex64 => out.push_str(&vf::hex64(fmt, r.get_u64())),
            LeafType::Hex128 => out.push_str(&vf::hex128(fmt, r.get_u128())),
            LeafType::Int256 | LeafType::UInt256 | LeafType::Hex256 => {
                out.push_str(&vf::hex_bytes(fmt, r.get_bytes(32)));
            }
            LeafType::Float => out.push_str(&vf::double(r.get_f32() as f64)),
            LeafType::Double | LeafType::LongDouble => out.push_str(&vf::double(r.get_f64())),
            LeafType::Char => out.push(r.get_u8() as char),
            LeafType::FlowDirection => out.push(if r.get_u8() == 0 { 'A' } else { 'B' }),
            LeafType::String | LeafType::StringClass => {
                sanitize_utf8(r.get_cstr(), out, false);
            }
            LeafType::MacAddr => {
                let b = r.get_bytes(6);
                if b.len() == 6 {
                    out.push_str(&vf::mac(fmt, b.try_into().unwrap()));
                }
            }
            LeafType::Ip4Addr => {
                let b = r.get_bytes(4);
                if b.len() == 4 {
                    out.push_str(&vf::ip4(fmt, b.try_into().unwrap()));
                }
            }
            LeafType::Ip6Addr => {
                let b = r.get_bytes(16);
                if b.len() == 16 {
                    out.push_str(&vf::ip6(fmt, b.try_into().unwrap()));
                }
            }
            LeafType::IpxAddr => match r.get_u8() {
                4 => {
                    let b = r.get_bytes(4);
                    if b.len() == 4 {
                        out.push_str(&vf::ip4(fmt, b.try_into().unwrap()));
                    }
                }
                6 => {
                    let b = r.get_bytes(16);
                    if b.len() == 16 {
                        out.push_str(&vf::ip6(fmt, b.try_into().unwrap()));
                    }
                }
                _ => out.push_str(&fmt.non_ip_str),
            },
            LeafType::Timestamp => {
                let (s, f) = (r.get_u64(), r.get_u32());
                out.push_str(&vf::timestamp(fmt, s, f, false));
            }
            LeafType::Duration => {
                let (s, f) = (r.get_u64(), r.get_u32());
                out.push_str(&vf::timestamp(fmt, s, f, true));
            }
            LeafType::Compound => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Schema;
    use crate::output::OutputBuffer;

    fn render(schema: &Schema, out: &OutputBuffer) -> String {
        let tr = TextTranslator::new(TextFormat::default());
        let mut bytes = Vec::new();
        assert!(tr.write_row(schema, out.as_slice(), &mut bytes).unwrap());
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_scalar_row() {
        let mut schema = Schema::new();
        schema
            .append_h16("stat", "status")
            .append_u32("count", "a count")
            .append_str("name", "a name");

        let mut out = OutputBuffer::new();
        out.append_u16(0x0102);
        out.append_u32(7);
        out.append_str("srv1");

        assert_eq!(render(&schema, &out), "0x0102\t7\tsrv1\n");
    }

    #[test]
    fn test_repeating_and_tuple() {
        let mut schema = Schema::new();
        schema
            .append_u16_r("vals", "repeated values")
            .append_tuple("pair", "two parts", &[LeafType::UInt8, LeafType::UInt8]);

        let mut out = OutputBuffer::new();
        out.append_count(3);
        for v in [1u16, 2, 3] {
            out.append_u16(v);
        }
        out.append_u8(4);
        out.append_u8(5);

        assert_eq!(render(&schema, &out), "1;2;3\t4_5\n");
    }

    #[test]
    fn test_corrupt_row_reported() {
        let mut schema = Schema::new();
        schema.append_u64("wide", "too wide");
        let mut out = OutputBuffer::new();
        out.append_u16(1);
        let tr = TextTranslator::new(TextFormat::default());
        let mut sink = Vec::new();
        assert!(!tr.write_row(&schema, out.as_slice(), &mut sink).unwrap());
        assert!(sink.is_empty());
    }
}
