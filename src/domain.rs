//! Domain-set utilities: parsing, joining, and canonical hashing of the
//! `;`-separated domain lists carried on `ProxyEntry.domains`.

use sha2::{Digest, Sha256};

/// Split on `;`, trim, drop empties, preserve input order.
pub fn parse(s: &str) -> Vec<String> {
    s.split(';')
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(|d| d.to_string())
        .collect()
}

/// Inverse of `parse`: join with `;`, no trailing separator.
pub fn join(domains: &[String]) -> String {
    domains.join(";")
}

/// Stable SHA-256 over the sorted, deduplicated, lowercased domain set, hex-encoded.
///
/// Stable across permutation and duplication of the input: callers rely on
/// `hash(d) == hash(perm(d)) == hash(d ++ d)`.
pub fn hash(domains: &[String]) -> String {
    let mut normalized: Vec<String> = domains.iter().map(|d| d.trim().to_lowercase()).collect();
    normalized.sort();
    normalized.dedup();
    let canonical = normalized.join(";");
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_trims_drops_empties() {
        assert_eq!(
            parse(" a.com ;b.com; ;c.com"),
            vec!["a.com", "b.com", "c.com"]
        );
    }

    #[test]
    fn parse_empty_string_yields_empty_vec() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn join_is_inverse_of_parse_modulo_whitespace() {
        let s = "a.com;b.com;c.com";
        assert_eq!(join(&parse(s)), s);
    }

    #[test]
    fn hash_is_stable_across_permutation() {
        let a = vec!["a.com".to_string(), "b.com".to_string()];
        let b = vec!["b.com".to_string(), "a.com".to_string()];
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn hash_is_stable_across_duplication() {
        let a = vec!["a.com".to_string(), "b.com".to_string()];
        let dup = vec![
            "a.com".to_string(),
            "b.com".to_string(),
            "a.com".to_string(),
        ];
        assert_eq!(hash(&a), hash(&dup));
    }

    #[test]
    fn hash_is_case_insensitive() {
        let a = vec!["A.com".to_string()];
        let b = vec!["a.com".to_string()];
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn empty_set_hashes_to_hash_of_empty_string() {
        let empty: Vec<String> = vec![];
        let expected = hex::encode(Sha256::digest(b""));
        assert_eq!(hash(&empty), expected);
    }
}
