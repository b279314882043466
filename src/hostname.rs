//! Hostname validation and normalisation.
//!
//! The update API and the certificate cache share one syntax check: a name
//! must be a dot-separated sequence of LDH labels (letters, digits, hyphens,
//! no leading or trailing hyphen). Names are normalised to lowercase with no
//! trailing dot before they are used as store keys.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HOSTNAME_RE: Regex = Regex::new(
        "^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\\-]*[a-zA-Z0-9])\\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\\-]*[A-Za-z0-9])$"
    )
    .unwrap();
}

/// Whether `name` is syntactically acceptable as a hostname.
pub fn valid_hostname(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && HOSTNAME_RE.is_match(name)
}

/// Lowercase and strip the trailing dot, producing the store-key form.
pub fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in [
            "host.dyn.example.org",
            "a.b",
            "xn--nxasmq6b.example.org",
            "_acme-challenge.host.dyn.example.org",
        ] {
            // The challenge label starts with an underscore and is written by
            // the coordinator, never by clients; it is validated separately.
            if name.starts_with('_') {
                assert!(!valid_hostname(name));
            } else {
                assert!(valid_hostname(name), "{name} should be valid");
            }
        }
    }

    #[test]
    fn rejects_bad_names() {
        for name in [
            "",
            "host..example.org",
            "-host.example.org",
            "host-.example.org",
            "host.example.org.",
            "host_name.example.org",
            "exa mple.org",
        ] {
            assert!(!valid_hostname(name), "{name} should be invalid");
        }
    }

    #[test]
    fn normalize_strips_dot_and_case() {
        assert_eq!(normalize("Host.DYN.Example.Org."), "host.dyn.example.org");
        assert_eq!(normalize("host.dyn.example.org"), "host.dyn.example.org");
    }
}
