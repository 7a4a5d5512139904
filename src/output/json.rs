/*!
Binary→JSON translator: one object per flow with the schema names as keys.

Deselected and (optionally) empty fields are still consumed from the row so
the reader stays aligned with the schema; only their emission is skipped.
*/
use std::io::{self, Write};

use crate::models::{LeafType, Schema, Subvalue};
use crate::output::value_fmt as vf;
use crate::output::{sanitize_utf8, JsonFormat, RowReader, TextFormat};

pub struct JsonTranslator {
    fmt: TextFormat,
    json: JsonFormat,
}

impl JsonTranslator {
    pub fn new(fmt: TextFormat, json: JsonFormat) -> JsonTranslator {
        JsonTranslator { fmt, json }
    }

    /// Translate one encoded row. Returns `Ok(false)` when the row bytes do
    /// not match the schema (the caller counts corrupt flows).
    pub fn write_row(&self, schema: &Schema, row: &[u8], w: &mut dyn Write) -> io::Result<bool> {
        let sp = if self.json.pretty { " " } else { "" };
        let mut r = RowReader::new(row);
        let mut obj = String::with_capacity(row.len() * 2);
        obj.push('{');
        let mut first = true;
        for bv in &schema.values {
            let selected = self
                .json
                .select
                .as_ref()
                .map_or(true, |sel| sel.contains(&bv.name));

            let mut val = String::new();
            let mut empty = false;
            if bv.repeating {
                let repeats = r.get_u32();
                empty = repeats == 0;
                val.push('[');
                for rep in 0..repeats {
                    if rep > 0 {
                        val.push(',');
                        val.push_str(sp);
                    }
                    self.subvals(&mut r, &bv.subvals, &mut val, sp);
                }
                val.push(']');
            } else {
                self.subvals(&mut r, &bv.subvals, &mut val, sp);
            }
            if r.is_corrupt() {
                return Ok(false);
            }

            if !selected || (empty && !self.json.keep_empty) {
                continue;
            }
            if !first {
                obj.push(',');
                obj.push_str(sp);
            }
            first = false;
            obj.push('"');
            obj.push_str(&bv.name);
            obj.push_str("\":");
            obj.push_str(sp);
            obj.push_str(&val);
        }
        obj.push('}');
        writeln!(w, "{obj}")?;
        Ok(true)
    }

    fn subvals(&self, r: &mut RowReader, subvals: &[Subvalue], out: &mut String, sp: &str) {
        let wrap = subvals.len() > 1;
        if wrap {
            out.push('[');
        }
        for (j, sv) in subvals.iter().enumerate() {
            if j > 0 {
                out.push(',');
                out.push_str(sp);
            }
            if sv.leaf == LeafType::Compound {
                let repeats = if sv.repeating { r.get_u32() } else { 1 };
                out.push('[');
                for rep in 0..repeats {
                    if rep > 0 {
                        out.push(',');
                        out.push_str(sp);
                    }
                    self.subvals(r, &sv.children, out, sp);
                }
                out.push(']');
            } else {
                self.leaf(r, sv.leaf, out);
            }
            if r.is_corrupt() {
                return;
            }
        }
        if wrap {
            out.push(']');
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
            LeafType::Hex8 => quoted(out, &vf::hex8(fmt, r.get_u8())),
            LeafType::Hex16 => quoted(out, &vf::hex16(fmt, r.get_u16())),
            LeafType::Hex32 => quoted(out, &vf::hex32(fmt, r.get_u32())),
            LeafType::Hex64 => quoted(out, &vf::hex64(fmt, r.get_u64())),
            LeafType::Hex128 => quoted(out, &vf::hex128(fmt, r.get_u128())),
            LeafType::Int256 | LeafType::UInt256 | LeafType::Hex256 => {
                quoted(out, &vf::hex_bytes(fmt, r.get_bytes(32)));
            }
            LeafType::Float => out.push_str(&vf::double(r.get_f32() as f64)),
            LeafType::Double | LeafType::LongDouble => out.push_str(&vf::double(r.get_f64())),
            LeafType::Char => {
                out.push('"');
                sanitize_utf8(&[r.get_u8()], out, true);
                out.push('"');
            }
            LeafType::FlowDirection => {
                quoted(out, if r.get_u8() == 0 { "A" } else { "B" });
            }
            LeafType::String | LeafType::StringClass => {
                out.push('"');
                sanitize_utf8(r.get_cstr(), out, true);
                out.push('"');
            }
            LeafType::MacAddr => {
                let b = r.get_bytes(6);
                if b.len() == 6 {
                    quoted(out, &vf::mac(fmt, b.try_into().unwrap()));
                }
            }
            LeafType::Ip4Addr => {
                let b = r.get_bytes(4);
                if b.len() == 4 {
                    self.push_ip4(out, b.try_into().unwrap());
                }
            }
            LeafType::Ip6Addr => {
                let b = r.get_bytes(16);
                if b.len() == 16 {
                    quoted(out, &vf::ip6(fmt, b.try_into().unwrap()));
                }
            }
            LeafType::IpxAddr => match r.get_u8() {
                4 => {
                    let b = r.get_bytes(4);
                    if b.len() == 4 {
                        self.push_ip4(out, b.try_into().unwrap());
                    }
                }
                6 => {
                    let b = r.get_bytes(16);
                    if b.len() == 16 {
                        quoted(out, &vf::ip6(fmt, b.try_into().unwrap()));
                    }
                }
                _ => quoted(out, &fmt.non_ip_str),
            },
            LeafType::Timestamp => {
                let (s, f) = (r.get_u64(), r.get_u32());
                quoted(out, &vf::timestamp(fmt, s, f, false));
            }
            LeafType::Duration => {
                let (s, f) = (r.get_u64(), r.get_u32());
                quoted(out, &vf::timestamp(fmt, s, f, true));
            }
            LeafType::Compound => {}
        }
    }

    fn push_ip4(&self, out: &mut String, o: [u8; 4]) {
        let s = vf::ip4(&self.fmt, o);
        // the u32 rendition is a bare number, everything else a string
        if matches!(self.fmt.ip4, super::Ip4Format::Uint32) {
            out.push_str(&s);
        } else {
            quoted(out, &s);
        }
    }
}

fn quoted(out: &mut String, s: &str) {
    out.push('"');
    out.push_str(s);
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Schema;
    use crate::output::OutputBuffer;

    fn render(schema: &Schema, out: &OutputBuffer, json: JsonFormat) -> String {
        let tr = JsonTranslator::new(TextFormat::default(), json);
        let mut bytes = Vec::new();
        assert!(tr.write_row(schema, out.as_slice(), &mut bytes).unwrap());
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_object_row() {
        let mut schema = Schema::new();
        schema
            .append_h8("stat", "status")
            .append_str("name", "server name")
            .append_u16_r("list", "some values");

        let mut out = OutputBuffer::new();
        out.append_u8(0x42);
        out.append_str("a\"b");
        out.append_count(2);
        out.append_u16(10);
        out.append_u16(20);

        assert_eq!(
            render(&schema, &out, JsonFormat::default()),
            "{\"stat\":\"0x42\",\"name\":\"a\\\"b\",\"list\":[10,20]}\n"
        );
    }

    #[test]
    fn test_empty_repeating_suppressed_but_consumed() {
        let mut schema = Schema::new();
        schema.append_u16_r("list", "values").append_u8("after", "trailer");
        let mut out = OutputBuffer::new();
        out.append_count(0);
        out.append_u8(9);

        // suppressed by default...
        assert_eq!(
            render(&schema, &out, JsonFormat::default()),
            "{\"after\":9}\n"
        );
        // ...kept on demand
        let keep = JsonFormat { keep_empty: true, ..Default::default() };
        assert_eq!(render(&schema, &out, keep), "{\"list\":[],\"after\":9}\n");
    }

    #[test]
    fn test_selection_keeps_alignment() {
        let mut schema = Schema::new();
        schema.append_u32("skipme", "first").append_u8("keep", "second");
        let mut out = OutputBuffer::new();
        out.append_u32(0xdeadbeef);
        out.append_u8(5);

        let select = JsonFormat {
            select: Some(["keep".to_string()].into_iter().collect()),
            ..Default::default()
        };
        assert_eq!(render(&schema, &out, select), "{\"keep\":5}\n");
    }
}
