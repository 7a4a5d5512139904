/*!
Binary flow-file header: a self-describing schema blob, optionally guarded
by a length+CRC32 prefix and preceded by a host-info preamble, so offline
translators can consume files produced by a binary sink.

All multi-byte header fields are little-endian; only the rows that follow
use host order.
*/
use std::io::{self, Read, Write};

use crate::error::ParserError;
use crate::models::{BinaryValue, LeafType, Schema, Subvalue};

const MAGIC: u32 = 0x464c_4231; // "FLB1"
const F_HOST_INFO: u8 = 0x01;
const F_CHECKSUM: u8 = 0x02;

/// Capture-host preamble of a binary flow file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostInfo {
    pub sensor_id: u32,
    pub secs: u64,
    pub usecs: u32,
    pub host: String,
}

/// Serialize the schema (and optional host info) as a file header.
pub fn write_schema(
    w: &mut dyn Write,
    schema: &Schema,
    host_info: Option<&HostInfo>,
    with_checksum: bool,
) -> io::Result<()> {
    let mut flags = 0u8;
    if host_info.is_some() {
        flags |= F_HOST_INFO;
    }
    if with_checksum {
        flags |= F_CHECKSUM;
    }
    w.write_all(&MAGIC.to_le_bytes())?;
    w.write_all(&[flags])?;

    if let Some(hi) = host_info {
        w.write_all(&hi.sensor_id.to_le_bytes())?;
        w.write_all(&hi.secs.to_le_bytes())?;
        w.write_all(&hi.usecs.to_le_bytes())?;
        w.write_all(hi.host.as_bytes())?;
        w.write_all(&[0])?;
    }

    let blob = schema_blob(schema);
    if with_checksum {
        w.write_all(&(blob.len() as u32).to_le_bytes())?;
        w.write_all(&crc32(&blob).to_le_bytes())?;
    }
    w.write_all(&blob)
}

/// Parse a header produced by [`write_schema`].
pub fn read_schema(r: &mut dyn Read) -> Result<(Schema, Option<HostInfo>), ParserError> {
    let magic = read_u32(r)?;
    if magic != MAGIC {
        return Err(ParserError::ParseError(format!(
            "not a flow file (magic 0x{magic:08x})"
        )));
    }
    let flags = read_u8(r)?;

    let host_info = if flags & F_HOST_INFO != 0 {
        Some(HostInfo {
            sensor_id: read_u32(r)?,
            secs: read_u64(r)?,
            usecs: read_u32(r)?,
            host: read_cstr(r)?,
        })
    } else {
        None
    };

    let blob = if flags & F_CHECKSUM != 0 {
        let len = read_u32(r)? as usize;
        let want = read_u32(r)?;
        let mut blob = vec![0u8; len];
        r.read_exact(&mut blob)?;
        let got = crc32(&blob);
        if got != want {
            return Err(ParserError::ParseError(format!(
                "flow file header checksum mismatch (0x{got:08x} != 0x{want:08x})"
            )));
        }
        blob
    } else {
        let mut blob = Vec::new();
        r.read_to_end(&mut blob)?;
        blob
    };

    let mut pos = 0usize;
    let schema = blob_schema(&blob, &mut pos)?;
    Ok((schema, host_info))
}

fn schema_blob(schema: &Schema) -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(&(schema.values.len() as u32).to_le_bytes());
    for bv in &schema.values {
        blob.extend_from_slice(bv.name.as_bytes());
        blob.push(0);
        blob.extend_from_slice(bv.description.as_bytes());
        blob.push(0);
        blob.push(bv.repeating as u8);
        put_subvals(&mut blob, &bv.subvals);
    }
    blob
}

fn put_subvals(blob: &mut Vec<u8>, subvals: &[Subvalue]) {
    blob.extend_from_slice(&(subvals.len() as u32).to_le_bytes());
    for sv in subvals {
        blob.extend_from_slice(&u32::from(sv.leaf).to_le_bytes());
        if sv.leaf == LeafType::Compound {
            blob.push(sv.repeating as u8);
            put_subvals(blob, &sv.children);
        }
    }
}

fn blob_schema(blob: &[u8], pos: &mut usize) -> Result<Schema, ParserError> {
    let count = take_u32(blob, pos)?;
    let mut schema = Schema::new();
    for _ in 0..count {
        let name = take_cstr(blob, pos)?;
        let description = take_cstr(blob, pos)?;
        let repeating = take_u8(blob, pos)? != 0;
        let subvals = take_subvals(blob, pos)?;
        schema.values.push(BinaryValue { name, description, repeating, subvals });
    }
    Ok(schema)
}

fn take_subvals(blob: &[u8], pos: &mut usize) -> Result<Vec<Subvalue>, ParserError> {
    let count = take_u32(blob, pos)?;
    let mut subvals = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = take_u32(blob, pos)?;
        let leaf = LeafType::try_from(tag)
            .map_err(|_| ParserError::ParseError(format!("unknown leaf type tag {tag}")))?;
        if leaf == LeafType::Compound {
            let repeating = take_u8(blob, pos)? != 0;
            let children = take_subvals(blob, pos)?;
            subvals.push(Subvalue::compound(children, repeating));
        } else {
            subvals.push(Subvalue::leaf(leaf));
        }
    }
    Ok(subvals)
}

/// CRC32 (IEEE, reflected) over the schema blob.
pub fn crc32(input: &[u8]) -> u32 {
    let mut table = [0u32; 256];
    let polynomial = 0xedb8_8320u32;
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ polynomial;
            } else {
                crc >>= 1;
            }
        }
        *entry = crc;
    }

    let mut crc = !0u32;
    for byte in input {
        let index = ((crc ^ (*byte as u32)) & 0xff) as usize;
        crc = (crc >> 8) ^ table[index];
    }
    !crc
}

fn read_u8(r: &mut dyn Read) -> Result<u8, ParserError> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u32(r: &mut dyn Read) -> Result<u32, ParserError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(r: &mut dyn Read) -> Result<u64, ParserError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn read_cstr(r: &mut dyn Read) -> Result<String, ParserError> {
    let mut bytes = Vec::new();
    loop {
        let b = read_u8(r)?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    String::from_utf8(bytes).map_err(|e| ParserError::ParseError(e.to_string()))
}

fn take_u8(blob: &[u8], pos: &mut usize) -> Result<u8, ParserError> {
    let b = *blob
        .get(*pos)
        .ok_or_else(|| ParserError::TruncatedMsg("truncated schema blob".to_string()))?;
    *pos += 1;
    Ok(b)
}

fn take_u32(blob: &[u8], pos: &mut usize) -> Result<u32, ParserError> {
    if blob.len() < *pos + 4 {
        return Err(ParserError::TruncatedMsg("truncated schema blob".to_string()));
    }
    let v = u32::from_le_bytes(blob[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn take_cstr(blob: &[u8], pos: &mut usize) -> Result<String, ParserError> {
    let rest = &blob[*pos..];
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ParserError::TruncatedMsg("unterminated string in schema blob".to_string()))?;
    let s = String::from_utf8(rest[..end].to_vec())
        .map_err(|e| ParserError::ParseError(e.to_string()))?;
    *pos += end + 1;
    Ok(s)
}
