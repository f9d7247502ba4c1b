use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Version of the checksum algorithm. Stored checksums carry it as a prefix so
/// a future algorithm change can be told apart from real content drift.
pub const CHECKSUM_VERSION: u32 = 1;

/// Deterministic content hash, rendered as `<version>:<hex sha-256>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckSum {
    version: u32,
    hash: String,
}

impl CheckSum {
    /// Hash arbitrary text with the current algorithm version.
    pub fn compute(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self {
            version: CHECKSUM_VERSION,
            hash: hex::encode(hasher.finalize()),
        }
    }

    /// Hash the concatenation of already computed checksums, in order.
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a CheckSum>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.hash.as_bytes());
            hasher.update(b":");
        }
        Self {
            version: CHECKSUM_VERSION,
            hash: hex::encode(hasher.finalize()),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for CheckSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.version, self.hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid checksum '{0}'")]
pub struct InvalidCheckSum(pub String);

impl FromStr for CheckSum {
    type Err = InvalidCheckSum;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (version, hash) = s
            .split_once(':')
            .ok_or_else(|| InvalidCheckSum(s.to_string()))?;
        let version = version
            .parse::<u32>()
            .map_err(|_| InvalidCheckSum(s.to_string()))?;
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidCheckSum(s.to_string()));
        }
        Ok(Self {
            version,
            hash: hash.to_ascii_lowercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_is_stable() {
        let a = CheckSum::compute("addColumn NEWCOL");
        let b = CheckSum::compute("addColumn NEWCOL");
        assert_eq!(a, b);
        assert_eq!(a.version(), CHECKSUM_VERSION);
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_compute_differs_on_content() {
        assert_ne!(CheckSum::compute("a"), CheckSum::compute("b"));
    }

    #[test]
    fn test_combine_is_order_sensitive() {
        let a = CheckSum::compute("a");
        let b = CheckSum::compute("b");
        assert_ne!(CheckSum::combine([&a, &b]), CheckSum::combine([&b, &a]));
        assert_eq!(CheckSum::combine([&a, &b]), CheckSum::combine([&a, &b]));
    }

    #[test]
    fn test_combine_empty_is_defined() {
        let empty: Vec<&CheckSum> = Vec::new();
        assert_eq!(CheckSum::combine(empty.clone()), CheckSum::combine(empty));
    }

    #[test]
    fn test_parse_display() {
        let sum = CheckSum::compute("create table");
        let parsed: CheckSum = sum.to_string().parse().unwrap();
        assert_eq!(parsed, sum);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("nocolon".parse::<CheckSum>().is_err());
        assert!("x:abc".parse::<CheckSum>().is_err());
        assert!("1:".parse::<CheckSum>().is_err());
        assert!("1:zz".parse::<CheckSum>().is_err());
    }
}
