//! Challenge propagation probe.
//!
//! Before the CA is told a DNS-01 challenge is ready, the freshly installed
//! TXT record must be answerable by the zone's own nameserver. The probe
//! queries that nameserver directly (not a recursive resolver) until the
//! expected value appears, so validation is never polled against a record
//! the zone cannot yet serve.

use crate::acme::challenge::ChallengeCoordinator;
use crate::error::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use trust_dns_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Total time allowed for the record to appear.
const PROPAGATION_CAP: Duration = Duration::from_secs(30);
/// Cadence between probe queries.
const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Queries one authoritative nameserver for challenge TXT values.
pub struct PropagationProbe {
    resolver: TokioAsyncResolver,
    nameserver: SocketAddr,
}

impl PropagationProbe {
    /// Build a probe pinned to `nameserver`, with caching disabled so every
    /// query observes the zone's current state.
    pub fn new(nameserver: SocketAddr) -> Result<Self, Error> {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(nameserver, Protocol::Udp));
        let mut opts = ResolverOpts::default();
        opts.cache_size = 0;
        opts.timeout = Duration::from_secs(2);
        opts.attempts = 1;
        let resolver = TokioAsyncResolver::tokio(config, opts)
            .map_err(|err| Error::Transient(err.to_string()))?;
        Ok(PropagationProbe {
            resolver,
            nameserver,
        })
    }

    /// Wait until `_acme-challenge.<name>` answers with `expected`.
    ///
    /// Polls every two seconds with a 30 second cap; cap expiry is an error
    /// because the probe reads the same zone the CA will, so a record that
    /// never appears here will never validate either.
    pub async fn wait_for_txt(&self, name: &str, expected: &str) -> Result<(), Error> {
        let record = ChallengeCoordinator::challenge_name(name);
        let deadline = Instant::now() + PROPAGATION_CAP;
        debug!(%record, nameserver = %self.nameserver, "waiting for challenge propagation");

        loop {
            match self.resolver.txt_lookup(format!("{record}.")).await {
                Ok(lookup) => {
                    let values: Vec<String> = lookup
                        .iter()
                        .map(|txt| {
                            txt.txt_data()
                                .iter()
                                .map(|seg| String::from_utf8_lossy(seg).into_owned())
                                .collect::<String>()
                        })
                        .collect();
                    if txt_value_present(&values, expected) {
                        debug!(%record, "challenge record propagated");
                        return Ok(());
                    }
                    trace!(%record, ?values, "challenge value not served yet");
                }
                Err(err) => {
                    // NXDOMAIN/NODATA before the write lands is expected;
                    // anything else is still worth retrying until the cap.
                    trace!(%record, error = %err, "probe lookup failed");
                }
            }

            if Instant::now() + PROBE_INTERVAL > deadline {
                warn!(%record, "challenge record did not propagate within the cap");
                return Err(Error::Transient(format!(
                    "challenge record for {record} did not propagate"
                )));
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }
}

fn txt_value_present(values: &[String], expected: &str) -> bool {
    values.iter().any(|v| v == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_match_is_exact() {
        let values = vec!["other".to_string(), "abc123".to_string()];
        assert!(txt_value_present(&values, "abc123"));
        assert!(!txt_value_present(&values, "abc"));
        assert!(!txt_value_present(&[], "abc123"));
    }
}
