/*!
Sorted fingerprint lookup tables.

A list file starts with a `% <count>` line, followed by
`<fingerprint>\t<description>` rows sorted by fingerprint. Comment and
blank lines are skipped. Lookups are a binary search over the first
`hash_len` bytes. Used for JA3, JA4, JA4S and certificate-blacklist
name resolution.
*/
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::warn;

use crate::error::ParserError;

pub struct FingerprintList {
    hash_len: usize,
    entries: Vec<(String, String)>,
}

impl FingerprintList {
    /// Load a list file; `hash_len` is the significant fingerprint prefix,
    /// `desc_len` caps the stored description.
    pub fn load(path: &Path, hash_len: usize, desc_len: usize) -> Result<FingerprintList, ParserError> {
        let file = BufReader::new(File::open(path)?);
        let mut lines = file.lines();

        let first = lines
            .next()
            .ok_or_else(|| ParserError::ParseError("empty fingerprint file".to_string()))??;
        let count: u32 = first
            .strip_prefix('%')
            .map(str::trim)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                ParserError::ParseError(format!(
                    "expected leading '%' followed by number of rows, found '{first}'"
                ))
            })?;

        let mut entries = Vec::with_capacity(count as usize);
        for line in lines {
            let line = line?;
            if line.is_empty() || line.starts_with('#') || line.starts_with(char::is_whitespace) {
                continue;
            }
            let Some((hash, desc)) = line.split_once('\t') else {
                warn!("failed to parse fingerprint line '{line}'");
                continue;
            };
            if entries.len() < count as usize {
                let mut hash = hash.to_string();
                hash.truncate(hash_len);
                let mut desc = desc.trim_end().to_string();
                desc.truncate(desc_len);
                entries.push((hash, desc));
            }
        }

        if entries.len() < count as usize {
            warn!("read {} fingerprints, expected {count}", entries.len());
        }

        Ok(FingerprintList { hash_len, entries })
    }

    /// In-memory list, used by tests.
    pub fn from_entries(hash_len: usize, mut entries: Vec<(String, String)>) -> FingerprintList {
        entries.sort();
        FingerprintList { hash_len, entries }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Description of `hash`, if listed.
    pub fn lookup(&self, hash: &str) -> Option<&str> {
        let key = &hash.as_bytes()[..hash.len().min(self.hash_len)];
        self.entries
            .binary_search_by(|(h, _)| {
                let hb = &h.as_bytes()[..h.len().min(self.hash_len)];
                hb.cmp(key)
            })
            .ok()
            .map(|i| self.entries[i].1.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_and_lookup() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "% 3").unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "1111aaaa\tfirst entry").unwrap();
        writeln!(f, "2222bbbb\tsecond entry").unwrap();
        writeln!(f, "3333cccc\tthird entry").unwrap();
        f.flush().unwrap();

        let list = FingerprintList::load(f.path(), 8, 64).unwrap();
        assert_eq!(list.count(), 3);
        assert_eq!(list.lookup("2222bbbb"), Some("second entry"));
        assert_eq!(list.lookup("ffffffff"), None);
    }

    #[test]
    fn test_missing_header_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "1111aaaa\tno header").unwrap();
        f.flush().unwrap();
        assert!(FingerprintList::load(f.path(), 8, 64).is_err());
    }
}
