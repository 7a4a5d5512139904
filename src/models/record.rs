/*!
Typed record schema published by each analyzer at startup.

A schema is an ordered list of named [`BinaryValue`] nodes. Each node carries
a recursive subvalue tree whose leaves are [`LeafType`] tags; a node (or a
nested compound) may be marked repeating, in which case the encoded form is
prefixed by a `u32` element count. Sinks read the schema once and can then
reconstruct every row by walking it left-to-right.
*/
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Leaf type tags. The discriminants are the on-disk tags used in binary
/// flow-file headers.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[repr(u32)]
pub enum LeafType {
    Compound = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Int128 = 5,
    Int256 = 6,
    UInt8 = 7,
    UInt16 = 8,
    UInt32 = 9,
    UInt64 = 10,
    UInt128 = 11,
    UInt256 = 12,
    Hex8 = 13,
    Hex16 = 14,
    Hex32 = 15,
    Hex64 = 16,
    Hex128 = 17,
    Hex256 = 18,
    Float = 19,
    Double = 20,
    LongDouble = 21,
    Char = 22,
    FlowDirection = 23,
    String = 24,
    /// Fixed-class string: same wire format as [`LeafType::String`], but the
    /// content is machine-generated (hashes, hex ids) rather than free text.
    StringClass = 25,
    Timestamp = 26,
    Duration = 27,
    MacAddr = 28,
    Ip4Addr = 29,
    Ip6Addr = 30,
    IpxAddr = 31,
}

impl LeafType {
    /// Fixed encoded width in bytes, `None` for variable-width leaves
    /// (strings and IpX addresses).
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            LeafType::Int8 | LeafType::UInt8 | LeafType::Hex8 | LeafType::Char => Some(1),
            LeafType::FlowDirection => Some(1),
            LeafType::Int16 | LeafType::UInt16 | LeafType::Hex16 => Some(2),
            LeafType::Int32 | LeafType::UInt32 | LeafType::Hex32 | LeafType::Float => Some(4),
            LeafType::Int64 | LeafType::UInt64 | LeafType::Hex64 | LeafType::Double => Some(8),
            LeafType::Int128 | LeafType::UInt128 | LeafType::Hex128 => Some(16),
            LeafType::Int256 | LeafType::UInt256 | LeafType::Hex256 => Some(32),
            // stored as an f64; the tag only widens the printed precision
            LeafType::LongDouble => Some(8),
            LeafType::Timestamp | LeafType::Duration => Some(12), // u64 secs + u32 frac
            LeafType::MacAddr => Some(6),
            LeafType::Ip4Addr => Some(4),
            LeafType::Ip6Addr => Some(16),
            LeafType::String | LeafType::StringClass | LeafType::IpxAddr | LeafType::Compound => {
                None
            }
        }
    }
}

/// One element of a subvalue tree: either a leaf or a nested compound.
#[derive(Debug, Clone, PartialEq)]
pub struct Subvalue {
    pub leaf: LeafType,
    /// Only non-empty when `leaf == LeafType::Compound`.
    pub children: Vec<Subvalue>,
    /// A nested compound may itself repeat (u32 count prefix).
    pub repeating: bool,
}

impl Subvalue {
    pub fn leaf(leaf: LeafType) -> Subvalue {
        Subvalue { leaf, children: Vec::new(), repeating: false }
    }

    pub fn compound(children: Vec<Subvalue>, repeating: bool) -> Subvalue {
        Subvalue { leaf: LeafType::Compound, children, repeating }
    }
}

/// A named top-level output column.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryValue {
    pub name: String,
    pub description: String,
    pub repeating: bool,
    pub subvals: Vec<Subvalue>,
}

/// Ordered list of output columns published by one analyzer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub values: Vec<BinaryValue>,
}

macro_rules! append_leaf {
    ($name:ident, $name_r:ident, $leaf:expr) => {
        pub fn $name(&mut self, name: &str, description: &str) -> &mut Self {
            self.append(name, description, false, vec![Subvalue::leaf($leaf)])
        }

        pub fn $name_r(&mut self, name: &str, description: &str) -> &mut Self {
            self.append(name, description, true, vec![Subvalue::leaf($leaf)])
        }
    };
}

impl Schema {
    pub fn new() -> Schema {
        Schema::default()
    }

    pub fn append(
        &mut self,
        name: &str,
        description: &str,
        repeating: bool,
        subvals: Vec<Subvalue>,
    ) -> &mut Self {
        self.values.push(BinaryValue {
            name: name.to_string(),
            description: description.to_string(),
            repeating,
            subvals,
        });
        self
    }

    append_leaf!(append_i8, append_i8_r, LeafType::Int8);
    append_leaf!(append_u8, append_u8_r, LeafType::UInt8);
    append_leaf!(append_u16, append_u16_r, LeafType::UInt16);
    append_leaf!(append_u32, append_u32_r, LeafType::UInt32);
    append_leaf!(append_u64, append_u64_r, LeafType::UInt64);
    append_leaf!(append_h8, append_h8_r, LeafType::Hex8);
    append_leaf!(append_h16, append_h16_r, LeafType::Hex16);
    append_leaf!(append_h32, append_h32_r, LeafType::Hex32);
    append_leaf!(append_h64, append_h64_r, LeafType::Hex64);
    append_leaf!(append_flt, append_flt_r, LeafType::Float);
    append_leaf!(append_dbl, append_dbl_r, LeafType::Double);
    append_leaf!(append_str, append_str_r, LeafType::String);
    append_leaf!(append_strc, append_strc_r, LeafType::StringClass);
    append_leaf!(append_timestamp, append_timestamp_r, LeafType::Timestamp);
    append_leaf!(append_duration, append_duration_r, LeafType::Duration);
    append_leaf!(append_mac, append_mac_r, LeafType::MacAddr);
    append_leaf!(append_ip4, append_ip4_r, LeafType::Ip4Addr);
    append_leaf!(append_ip6, append_ip6_r, LeafType::Ip6Addr);
    append_leaf!(append_ipx, append_ipx_r, LeafType::IpxAddr);

    /// Append a non-repeating tuple of leaves written as one column.
    pub fn append_tuple(
        &mut self,
        name: &str,
        description: &str,
        leaves: &[LeafType],
    ) -> &mut Self {
        self.append(
            name,
            description,
            false,
            leaves.iter().copied().map(Subvalue::leaf).collect(),
        )
    }

    /// Append a repeating tuple (u32 count, then count repetitions of the
    /// leaf sequence).
    pub fn append_tuple_r(
        &mut self,
        name: &str,
        description: &str,
        leaves: &[LeafType],
    ) -> &mut Self {
        self.append(
            name,
            description,
            true,
            leaves.iter().copied().map(Subvalue::leaf).collect(),
        )
    }

    /// Concatenate the columns of several analyzers into one row schema.
    pub fn extend(&mut self, other: Schema) -> &mut Self {
        self.values.extend(other.values);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_tag_round_trip() {
        for tag in 0u32..=31 {
            let leaf = LeafType::try_from(tag).unwrap();
            assert_eq!(u32::from(leaf), tag);
        }
        assert!(LeafType::try_from(32u32).is_err());
    }

    #[test]
    fn test_builder_shapes() {
        let mut schema = Schema::new();
        schema
            .append_h16("bgpStat", "BGP status")
            .append_tuple(
                "bgpSrcAS_dstAS",
                "BGP source and destination AS",
                &[LeafType::UInt32, LeafType::UInt32],
            )
            .append_str_r("sslServerName", "SSL server name");
        assert_eq!(schema.values.len(), 3);
        assert!(!schema.values[0].repeating);
        assert_eq!(schema.values[1].subvals.len(), 2);
        assert!(schema.values[2].repeating);
    }
}
