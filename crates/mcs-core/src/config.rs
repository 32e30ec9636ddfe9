//! mcs.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{CloudType, ResSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub ga: GaConfig,
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    /// Static inventory for the in-memory cloud backends.
    #[serde(default)]
    pub clouds: Vec<CloudConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

/// Tunables of the refinement pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// CPU allocation granularity and per-app floor, in cores.
    #[serde(default = "default_cpu_core_step")]
    pub cpu_core_step: f64,
    #[serde(default = "default_bigger_vm_res_pct")]
    pub bigger_vm_res_pct: f64,
    #[serde(default = "default_smaller_vm_res_pct")]
    pub smaller_vm_res_pct: f64,
    /// RTTs at or above this value count as unreachable.
    #[serde(default = "default_max_acc_rtt_ms")]
    pub max_acc_rtt_ms: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            cpu_core_step: default_cpu_core_step(),
            bigger_vm_res_pct: default_bigger_vm_res_pct(),
            smaller_vm_res_pct: default_smaller_vm_res_pct(),
            max_acc_rtt_ms: default_max_acc_rtt_ms(),
        }
    }
}

/// Genetic search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaConfig {
    #[serde(default = "default_chromosomes")]
    pub chromosomes: usize,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_crossover_prob")]
    pub crossover_prob: f64,
    #[serde(default = "default_mutation_prob")]
    pub mutation_prob: f64,
    #[serde(default = "default_stop_no_update")]
    pub stop_no_update: usize,
    #[serde(default = "default_algorithm")]
    pub default_algorithm: String,
    /// Fixed RNG seed. A fresh seed is drawn per request when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            chromosomes: default_chromosomes(),
            iterations: default_iterations(),
            crossover_prob: default_crossover_prob(),
            mutation_prob: default_mutation_prob(),
            stop_no_update: default_stop_no_update(),
            default_algorithm: default_algorithm(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gc_interval")]
    pub interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_gc_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Return the computed plan without creating VMs or deployments.
    #[serde(default)]
    pub dry_run: bool,
}

/// One cloud of the static inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub cloud_type: CloudType,
    pub limit: ResSet,
    #[serde(default)]
    pub in_use: ResSet,
}

fn default_port() -> u16 {
    20000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/mcs")
}

fn default_cpu_core_step() -> f64 {
    0.1
}

fn default_bigger_vm_res_pct() -> f64 {
    0.5
}

fn default_smaller_vm_res_pct() -> f64 {
    0.3
}

fn default_max_acc_rtt_ms() -> f64 {
    20000.0
}

fn default_chromosomes() -> usize {
    100
}

fn default_iterations() -> usize {
    5000
}

fn default_crossover_prob() -> f64 {
    0.7
}

fn default_mutation_prob() -> f64 {
    0.2
}

fn default_stop_no_update() -> usize {
    200
}

fn default_algorithm() -> String {
    "Mcssga".to_string()
}

fn default_true() -> bool {
    true
}

fn default_gc_interval() -> u64 {
    600
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the scheduling core cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.placement;
        if p.cpu_core_step <= 0.0 {
            anyhow::bail!("placement.cpu_core_step must be positive, got {}", p.cpu_core_step);
        }
        if !(0.0..=1.0).contains(&p.smaller_vm_res_pct)
            || !(0.0..=1.0).contains(&p.bigger_vm_res_pct)
            || p.smaller_vm_res_pct > p.bigger_vm_res_pct
        {
            anyhow::bail!(
                "placement VM percentages must satisfy 0 <= smaller ({}) <= bigger ({}) <= 1",
                p.smaller_vm_res_pct,
                p.bigger_vm_res_pct
            );
        }
        let ga = &self.ga;
        if ga.chromosomes == 0 {
            anyhow::bail!("ga.chromosomes must be at least 1");
        }
        for (name, prob) in [("crossover_prob", ga.crossover_prob), ("mutation_prob", ga.mutation_prob)] {
            if !(0.0..=1.0).contains(&prob) {
                anyhow::bail!("ga.{name} must be within [0, 1], got {prob}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_roundtrip() {
        let config = SchedulerConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("cpu_core_step"));
        assert!(toml_str.contains("Mcssga"));
    }

    #[test]
    fn test_parse_minimal() {
        let config: SchedulerConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 20000);
        assert_eq!(config.ga.chromosomes, 100);
        assert_eq!(config.ga.iterations, 5000);
        assert!((config.placement.cpu_core_step - 0.1).abs() < f64::EPSILON);
        assert!(config.clouds.is_empty());
    }

    #[test]
    fn test_parse_clouds() {
        let toml_str = r#"
[ga]
iterations = 50
seed = 7

[[clouds]]
name = "NOKIA4"
type = "proxmox"
limit = { vcpu = 56, ram = 128796.75, storage = 1396.52, vm = -1, volume = -1, port = -1 }
in_use = { vcpu = 26, ram = 59392, storage = 629 }

[[clouds]]
name = "CLAAUDIA"
type = "openstack"
limit = { vcpu = 32, ram = 65536, storage = 500 }
"#;
        let config: SchedulerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.ga.iterations, 50);
        assert_eq!(config.ga.seed, Some(7));
        assert_eq!(config.clouds.len(), 2);
        assert!(config.clouds[0].cloud_type.supports_vm_creation());
        assert_eq!(config.clouds[0].in_use.vcpu, 26.0);
        assert!(!config.clouds[1].cloud_type.supports_vm_creation());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_step() {
        let mut config = SchedulerConfig::default();
        config.placement.cpu_core_step = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcs.toml");
        std::fs::write(&path, "[server]\nport = 9000\n").unwrap();
        let config = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9000);
    }
}
