use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;

/// At most this many hostnames per update request.
pub(super) const MAX_UPDATE_HOSTNAMES: usize = 20;

#[derive(Deserialize, Debug, Clone, Default)]
pub(super) struct UpdateQuery {
    #[serde(default)]
    pub hostname: Vec<String>,
    #[serde(default)]
    pub myip: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub(super) struct CertificateQuery {
    #[serde(default)]
    pub hostname: Vec<String>,
}

/// Split repeated query parameters that each may carry a comma-separated
/// list into one flat list.
pub(super) fn flatten_params(params: &[String]) -> Vec<String> {
    params
        .iter()
        .flat_map(|param| param.split(','))
        .map(str::to_string)
        .collect()
}

/// Parse every value as an IP literal; any failure rejects the whole set.
pub(super) fn parse_ips(values: &[String]) -> Option<Vec<IpAddr>> {
    values.iter().map(|v| v.parse().ok()).collect()
}

/// Set comparison: insertion order and duplicates don't count as a change.
pub(super) fn addrs_changed(original: &[IpAddr], updated: &[IpAddr]) -> bool {
    let original: HashSet<IpAddr> = original.iter().copied().collect();
    let updated: HashSet<IpAddr> = updated.iter().copied().collect();
    original != updated
}

pub(super) fn join_ips(ips: &[IpAddr]) -> String {
    ips.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(addrs: &[&str]) -> Vec<IpAddr> {
        addrs.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[test]
    fn flatten_splits_commas_and_repeats() {
        let params = vec!["a.example.org,b.example.org".to_string(), "c.example.org".to_string()];
        assert_eq!(
            flatten_params(&params),
            vec!["a.example.org", "b.example.org", "c.example.org"]
        );
        assert!(flatten_params(&[]).is_empty());
        // An empty parameter value survives as an empty entry and fails the
        // hostname check downstream, like the original protocol.
        assert_eq!(flatten_params(&["".to_string()]), vec![""]);
    }

    #[test]
    fn parse_ips_is_all_or_nothing() {
        assert_eq!(
            parse_ips(&["203.0.113.7".to_string(), "2001:db8::1".to_string()]).unwrap(),
            ips(&["203.0.113.7", "2001:db8::1"])
        );
        assert!(parse_ips(&["203.0.113.7".to_string(), "nonsense".to_string()]).is_none());
    }

    #[test]
    fn change_detection_ignores_order_and_duplicates() {
        let stored = ips(&["203.0.113.7", "2001:db8::1"]);
        let same = ips(&["2001:db8::1", "203.0.113.7", "203.0.113.7"]);
        let different = ips(&["203.0.113.8"]);
        assert!(!addrs_changed(&stored, &same));
        assert!(addrs_changed(&stored, &different));
        assert!(addrs_changed(&[], &different));
        assert!(!addrs_changed(&[], &[]));
    }

    #[test]
    fn join_renders_comma_separated() {
        assert_eq!(
            join_ips(&ips(&["203.0.113.7", "2001:db8::1"])),
            "203.0.113.7,2001:db8::1"
        );
    }
}
