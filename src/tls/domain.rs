//! Normalization of requested server names into certificate identities

use crate::error::{Error, Result};

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Names whose leaf files would land on the CA's `ca-cert.pem`/`ca-key.pem`.
const RESERVED_NAMES: &[&str] = &["ca"];

/// Lowercase `raw`, drop a trailing root dot and make sure the result is a
/// plain DNS name that is also safe to use as a file name prefix.
pub fn normalize_domain(raw: &str) -> Result<String> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();

    if domain.is_empty() {
        return Err(Error::invalid_domain(raw, "empty name"));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(Error::invalid_domain(raw, "name longer than 253 bytes"));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(Error::invalid_domain(raw, "empty label"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(Error::invalid_domain(raw, "label longer than 63 bytes"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::invalid_domain(
                raw,
                "label starts or ends with a hyphen",
            ));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::invalid_domain(
                raw,
                format!("unexpected character {:?}", c),
            ));
        }
    }

    if RESERVED_NAMES.contains(&domain.as_str()) {
        return Err(Error::invalid_domain(raw, "name is reserved for the CA files"));
    }

    Ok(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_report;

    #[test]
    fn test_normalizes_case_and_root_dot() {
        let t = test_report!("Names are lowercased and lose the root dot");
        t.assert_eq(
            "mixed case",
            &normalize_domain("App.LocalHost").unwrap().as_str(),
            &"app.localhost",
        );
        t.assert_eq(
            "root dot",
            &normalize_domain("api.test.").unwrap().as_str(),
            &"api.test",
        );
        t.assert_eq(
            "single label",
            &normalize_domain("localhost").unwrap().as_str(),
            &"localhost",
        );
        t.assert_eq(
            "underscore",
            &normalize_domain("my_service.test").unwrap().as_str(),
            &"my_service.test",
        );
    }

    #[test]
    fn test_rejects_path_escapes() {
        let t = test_report!("Names that could escape the storage directory are rejected");
        for bad in ["../etc/passwd", "a/b", "a\\b", ".hidden", "a..b", "*.test"] {
            t.action(format!("normalize {:?}", bad));
            let result = normalize_domain(bad);
            t.assert_true(
                &format!("{} rejected", bad),
                matches!(result, Err(Error::InvalidDomain { .. })),
            );
        }
    }

    #[test]
    fn test_rejects_malformed_labels() {
        let t = test_report!("Empty, hyphenated and oversized labels are rejected");
        let long_label = "a".repeat(64);
        for bad in ["", "   ", "-a.test", "a-.test", long_label.as_str()] {
            t.assert_true(
                &format!("{:?} rejected", bad),
                normalize_domain(bad).is_err(),
            );
        }
    }

    #[test]
    fn test_rejects_ca_file_prefix() {
        let t = test_report!("A name sharing the CA's file prefix is rejected");
        for bad in ["ca", "CA", "ca."] {
            t.assert_true(
                &format!("{:?} rejected", bad),
                matches!(normalize_domain(bad), Err(Error::InvalidDomain { .. })),
            );
        }
        t.assert_eq(
            "subdomain allowed",
            &normalize_domain("ca.test").unwrap().as_str(),
            &"ca.test",
        );
    }
}
