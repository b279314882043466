use crate::error::Error;
use crate::hostname;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use trust_dns_server::client::rr::{LowerName, Name};

pub type SharedConfig = Arc<Config>;

/// Let's Encrypt production directory URL.
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL.
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

// RFC 1035 answers below this TTL invite hammering from badly behaved
// clients; the original service enforces the same floor.
const MIN_RECORD_TTL: u32 = 300;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub dns: DnsConfig,
    pub db: DbConfig,
    pub contact: ContactConfig,
    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct DnsConfig {
    /// Apex of the delegated zone, e.g. `dyn.example.org`.
    pub domain: LowerName,
    /// SOA RNAME mailbox, either DNS form or `user@host`.
    pub nsadmin: String,
    /// NS set for the zone; the first entry is the SOA MNAME.
    pub nameservers: Vec<LowerName>,
    #[serde(default = "default_record_ttl")]
    pub record_ttl: u32,
    #[serde(default = "default_dns_bind_addr")]
    pub udp_bind_addr: SocketAddr,
    #[serde(default = "default_dns_bind_addr")]
    pub tcp_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_dns_tcp_timeout")]
    pub tcp_timeout: Duration,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DbConfig {
    /// Directory holding the file-backed store, created mode 0700.
    pub directory: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ContactConfig {
    /// Mailbox registered with the ACME account.
    pub email: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AcmeConfig {
    #[serde(default = "default_directory_url")]
    pub directory_url: String,
    /// Renew once the leaf is within this many days of `notAfter`.
    #[serde(default = "default_renew_before_days")]
    pub renew_before_days: i64,
    /// Nameserver probed for challenge propagation. Defaults to loopback at
    /// the DNS UDP port, i.e. this process.
    pub probe_addr: Option<SocketAddr>,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_api_timeout")]
    pub timeout: Duration,
}

fn default_record_ttl() -> u32 {
    MIN_RECORD_TTL
}

fn default_dns_bind_addr() -> SocketAddr {
    "0.0.0.0:53".parse().unwrap()
}

fn default_dns_tcp_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_directory_url() -> String {
    LETS_ENCRYPT_PRODUCTION.to_string()
}

fn default_renew_before_days() -> i64 {
    30
}

fn default_api_bind_addr() -> SocketAddr {
    "0.0.0.0:443".parse().unwrap()
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for AcmeConfig {
    fn default() -> Self {
        AcmeConfig {
            directory_url: default_directory_url(),
            renew_before_days: default_renew_before_days(),
            probe_addr: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            bind_addr: default_api_bind_addr(),
            timeout: default_api_timeout(),
        }
    }
}

impl Config {
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(p)?;
        Self::try_from_toml(&raw)
    }

    pub fn try_from_toml(raw: &str) -> Result<Self, Error> {
        let mut conf: Config = toml::from_str(raw).map_err(|err| Error::Config(err.to_string()))?;
        if conf.dns.nameservers.is_empty() {
            return Err(Error::Config(
                "dns.nameservers must list at least one nameserver".to_string(),
            ));
        }
        if conf.dns.record_ttl < MIN_RECORD_TTL {
            conf.dns.record_ttl = MIN_RECORD_TTL;
        }
        Ok(conf)
    }

    /// Apex of the delegated zone.
    pub fn apex(&self) -> &LowerName {
        &self.dns.domain
    }

    /// The primary nameserver, used as the SOA MNAME.
    pub fn primary_ns(&self) -> &LowerName {
        &self.dns.nameservers[0]
    }

    /// The SOA RNAME mailbox in DNS name form.
    pub fn ns_admin(&self) -> Result<Name, Error> {
        Ok(Name::from_str(&self.sanitized_ns_admin())?)
    }

    fn sanitized_ns_admin(&self) -> Cow<str> {
        match self.dns.nsadmin.split_once('@') {
            Some((user, domain)) => {
                let user = user.replace('.', "\\.");
                Cow::Owned(format!("{user}.{domain}"))
            }
            _ => Cow::Borrowed(&self.dns.nsadmin),
        }
    }

    /// Whether the operator authorises certificate acquisition for `name`.
    ///
    /// Allowed: the apex itself, any configured nameserver, or any name
    /// under the apex. `name` must already be normalised.
    pub fn cert_allowed(&self, name: &str) -> bool {
        let apex = hostname::normalize(&self.dns.domain.to_string());
        if name == apex || name.ends_with(&format!(".{apex}")) {
            return true;
        }
        self.dns
            .nameservers
            .iter()
            .any(|ns| hostname::normalize(&ns.to_string()) == name)
    }
}
