use crate::aead::SymmetricKey;
use crate::workload::{Parallelism, AD_SIZE, BLOCK_SIZE, TOTAL_BLOCKS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Size of a single random string handed out by the prefetch buffer. This matches the nonce size
/// of the filesystem being tuned.
pub const REQUEST_SIZE: usize = 16;

/// Prefetch block sizes measured when none are configured.
pub const DEFAULT_CAPACITIES: [usize; 8] = [64, 128, 256, 512, 1024, 2048, 4096, 40960];

/// The full configuration for both harnesses. Every value has a default matching the fixed
/// parameters of the filesystem being tuned, so an empty (or absent) config file is valid.
///
/// These values are read once at startup and never change while measurements run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Parameters of the parallel AEAD harness.
    #[serde(default)]
    aead: AeadConfig,
    /// Parameters of the entropy prefetch harness.
    #[serde(default)]
    prefetch: PrefetchConfig,
}

/// Configuration of the parallel sealing harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AeadConfig {
    /// Key used by both backends.
    key: SymmetricKey,
    /// Size of a single plaintext block.
    block_size: usize,
    /// Size of the associated data bound to every block.
    ad_size: usize,
    /// Amount of blocks sealed per measurement iteration, split over all workers.
    total_blocks: usize,
    /// Backends to measure.
    backends: Vec<Backend>,
    /// Worker configurations to measure.
    parallelism: Vec<Parallelism>,
}

impl Default for AeadConfig {
    fn default() -> Self {
        AeadConfig {
            key: SymmetricKey::zero(),
            block_size: BLOCK_SIZE,
            ad_size: AD_SIZE,
            total_blocks: TOTAL_BLOCKS,
            backends: vec![Backend::Native, Backend::Openssl],
            parallelism: vec![
                Parallelism::Threads(1),
                Parallelism::Cooperative,
                Parallelism::Threads(2),
                Parallelism::Threads(4),
                Parallelism::Threads(8),
            ],
        }
    }
}

/// Configuration of the entropy prefetch harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PrefetchConfig {
    /// Size of every request served from the buffer.
    request_size: usize,
    /// Prefetch block sizes to measure.
    capacities: Vec<usize>,
    /// Whether to also measure reading the entropy source without a buffer.
    direct: bool,
    /// The entropy source backing the buffer.
    source: EntropyConfig,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        PrefetchConfig {
            request_size: REQUEST_SIZE,
            capacities: DEFAULT_CAPACITIES.to_vec(),
            direct: true,
            source: EntropyConfig::Os,
        }
    }
}

/// AEAD implementations which can be measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// AES-256-GCM in pure software, from the `aes-gcm` crate.
    Native,
    /// AES-256-GCM from OpenSSL.
    Openssl,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Backend::Native => "native",
                Backend::Openssl => "openssl",
            }
        )
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Backend::Native),
            "openssl" => Ok(Backend::Openssl),
            _ => Err(format!("unknown backend {:?}, expected native or openssl", s).into()),
        }
    }
}

/// Configuration for the entropy source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum EntropyConfig {
    /// The operating system CSPRNG (getrandom, falling back to /dev/urandom).
    Os,
    /// A random device file which is kept open for the process lifetime.
    Device {
        /// Path of the device, e.g. `/dev/urandom`.
        path: PathBuf,
    },
}

impl Config {
    /// validate the config. Worker counts must split the total work evenly, and every prefetch
    /// capacity must be able to serve at least one request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let aead = &self.aead;
        if aead.block_size == 0 || aead.total_blocks == 0 {
            return Err("block_size and total_blocks must be non zero"
                .to_string()
                .into());
        }
        if aead.backends.is_empty() {
            return Err("at least 1 backend must be configured".to_string().into());
        }
        for p in &aead.parallelism {
            let workers = p.workers();
            if workers == 0 || aead.total_blocks % workers != 0 {
                return Err(format!(
                    "parallelism {} does not evenly divide {} blocks",
                    p, aead.total_blocks
                )
                .into());
            }
        }

        let prefetch = &self.prefetch;
        if prefetch.request_size == 0 {
            return Err("request_size must be non zero".to_string().into());
        }
        if let Some(capacity) = prefetch
            .capacities
            .iter()
            .find(|&&capacity| capacity < prefetch.request_size)
        {
            return Err(format!(
                "prefetch capacity {} is smaller than the request size {}",
                capacity, prefetch.request_size
            )
            .into());
        }

        Ok(())
    }

    /// Return the sealing harness configuration.
    pub fn aead(&self) -> &AeadConfig {
        &self.aead
    }

    /// Return the prefetch harness configuration.
    pub fn prefetch(&self) -> &PrefetchConfig {
        &self.prefetch
    }

    /// Restrict the sealing harness to the given backends and parallelism. Empty filters keep the
    /// configured values.
    pub fn restrict_aead(&mut self, backends: &[Backend], parallelism: &[Parallelism]) {
        if !backends.is_empty() {
            self.aead.backends = backends.to_vec();
        }
        if !parallelism.is_empty() {
            self.aead.parallelism = parallelism.to_vec();
        }
    }

    /// Restrict the prefetch harness to the given capacities. An empty filter keeps the
    /// configured capacities.
    pub fn restrict_prefetch(&mut self, capacities: &[usize]) {
        if !capacities.is_empty() {
            self.prefetch.capacities = capacities.to_vec();
        }
    }
}

impl AeadConfig {
    /// Key used by both backends.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Size of a single plaintext block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Size of the associated data.
    pub fn ad_size(&self) -> usize {
        self.ad_size
    }

    /// Total amount of blocks per iteration.
    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// Backends to measure.
    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// Worker configurations to measure.
    pub fn parallelism(&self) -> &[Parallelism] {
        &self.parallelism
    }
}

impl PrefetchConfig {
    /// Size of a single request.
    pub fn request_size(&self) -> usize {
        self.request_size
    }

    /// Prefetch block sizes to measure.
    pub fn capacities(&self) -> &[usize] {
        &self.capacities
    }

    /// Whether the unbuffered baseline is measured.
    pub fn direct(&self) -> bool {
        self.direct
    }

    /// The configured entropy source.
    pub fn source(&self) -> &EntropyConfig {
        &self.source
    }
}

/// An error in the configuration
#[derive(Debug)]
pub struct ConfigError {
    msg: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

// default impls are fine here
impl std::error::Error for ConfigError {}

impl From<String> for ConfigError {
    fn from(s: String) -> Self {
        ConfigError { msg: s }
    }
}

#[cfg(test)]
mod tests {
    use super::{Backend, Config, EntropyConfig};
    use crate::workload::Parallelism;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
        assert!(cfg.validate().is_ok());

        assert_eq!(cfg.aead().block_size(), 4096);
        assert_eq!(cfg.aead().ad_size(), 24);
        assert_eq!(cfg.aead().total_blocks(), 32);
        assert_eq!(cfg.aead().key()[..], [0u8; 32]);
        assert_eq!(cfg.aead().parallelism().len(), 5);
        assert_eq!(cfg.prefetch().request_size(), 16);
        assert_eq!(cfg.prefetch().capacities().first(), Some(&64));
        assert_eq!(cfg.prefetch().capacities().last(), Some(&40960));
    }

    #[test]
    fn decoding() {
        let input = r#"[aead]
backends = ["openssl"]
parallelism = ["2coop", "4"]

[prefetch]
capacities = [512, 4096]
direct = false

[prefetch.source]
type = "device"
path = "/dev/urandom"
"#;
        let cfg: Config = toml::from_str(input).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.aead().backends(), &[Backend::Openssl]);
        assert_eq!(
            cfg.aead().parallelism(),
            &[Parallelism::Cooperative, Parallelism::Threads(4)]
        );
        assert_eq!(cfg.aead().total_blocks(), 32);
        assert_eq!(cfg.prefetch().capacities(), &[512, 4096]);
        assert!(!cfg.prefetch().direct());
        assert_eq!(
            cfg.prefetch().source(),
            &EntropyConfig::Device {
                path: "/dev/urandom".into()
            }
        );
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("[aead]\nnonce_size = 12\n").is_err());
        assert!(toml::from_str::<Config>("[aead]\nbackends = [\"ring\"]\n").is_err());
    }

    #[test]
    fn uneven_parallelism_rejected() {
        let cfg: Config = toml::from_str("[aead]\nparallelism = [\"3\"]\n").unwrap();
        assert!(cfg.validate().is_err());

        let cfg: Config =
            toml::from_str("[aead]\ntotal_blocks = 6\nparallelism = [\"3\", \"2coop\"]\n").unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn small_capacity_rejected() {
        let cfg: Config = toml::from_str("[prefetch]\ncapacities = [8]\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn restrict() {
        let mut cfg = Config::default();
        cfg.restrict_aead(&[Backend::Native], &[]);
        cfg.restrict_prefetch(&[4096]);
        assert_eq!(cfg.aead().backends(), &[Backend::Native]);
        assert_eq!(cfg.aead().parallelism().len(), 5);
        assert_eq!(cfg.prefetch().capacities(), &[4096]);
    }

    #[test]
    fn roundtrip_through_toml() {
        let cfg = Config::default();
        let encoded = toml::to_string(&cfg).unwrap();
        assert_eq!(toml::from_str::<Config>(&encoded).unwrap(), cfg);
    }
}
