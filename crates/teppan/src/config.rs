//! Service configuration.
//!
//! A [`ServiceConfig`] fixes everything that cannot change over the lifetime
//! of a service instance: its instance index, the client arena size, the
//! batch capacity, the compute backend and the slot geometry. It can be built
//! in code or read from a TOML file:
//!
//! ```toml
//! nnet_id = 0
//! max_clients = 64
//! size_batch = 16
//!
//! [backend]
//! kind = "gpu"
//! device_id = 0
//! use_half = true
//! ```

use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::{Result, ServiceError};

/// Maximum number of service instances per host process.
pub const MAX_NNET: u32 = 64;

/// Maximum number of clients a single service instance can serve.
pub const MAX_CLIENTS: usize = 512;

/// Default ceiling on accumulators submitted to the executor but not yet collected.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Compute backend, chosen once when the service is constructed.
///
/// Every reset rebuilds the executor for the same backend with the new weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Host numeric library, parallelised over `thread_num` threads.
    CpuBlas {
        #[serde(default = "default_thread_num")]
        thread_num: u32,
    },
    /// Accelerator kernel pipeline on device `device_id`.
    Gpu {
        #[serde(default)]
        device_id: u32,
        #[serde(default)]
        use_half: bool,
    },
}

impl Backend {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::CpuBlas { .. } => "cpu_blas",
            Backend::Gpu { .. } => "gpu",
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::CpuBlas { thread_num: default_thread_num() }
    }
}

fn default_thread_num() -> u32 {
    1
}

/// Fixed sizes of the per-client request and response records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Number of floats in one input tensor
    pub size_input: usize,
    /// Maximum number of candidate moves per request
    pub maxsize_moves: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        // 362 feature planes over a 9x9 board, 593 is the legal move ceiling.
        Self {
            size_input: 362 * 81,
            maxsize_moves: 593,
        }
    }
}

/// Prefixes of the named IPC objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Names {
    pub sem_lock: String,
    pub sem: String,
    pub mmap: String,
    pub seq_prn: String,
}

impl Default for Names {
    fn default() -> Self {
        Self {
            sem_lock: "/teppan_sem_lock_nnet".to_string(),
            sem: "/teppan_sem_nnet".to_string(),
            mmap: "/teppan_mmap_nnet".to_string(),
            seq_prn: "/teppan_seq_prn".to_string(),
        }
    }
}

/// Static parameters of one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Index of this instance among the host's services
    pub nnet_id: u32,
    /// Number of client slots
    pub max_clients: usize,
    /// Capacity of one accumulator
    pub size_batch: usize,
    /// Ceiling on in-flight accumulators before only full batches are dispatched
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub geometry: Geometry,
    #[serde(default)]
    pub names: Names,
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

impl ServiceConfig {
    pub fn new(nnet_id: u32, max_clients: usize, size_batch: usize, backend: Backend) -> Self {
        Self {
            nnet_id,
            max_clients,
            size_batch,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            backend,
            geometry: Geometry::default(),
            names: Names::default(),
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Rejects configurations the service cannot be constructed with.
    pub fn validate(&self) -> Result<()> {
        if self.nnet_id >= MAX_NNET {
            return Err(ServiceError::Config(format!(
                "too many nnets: nnet_id {} must be below {}", self.nnet_id, MAX_NNET
            )));
        }
        if self.max_clients == 0 || self.max_clients > MAX_CLIENTS {
            return Err(ServiceError::Config(format!(
                "too many processes: max_clients {} must be in 1..={}", self.max_clients, MAX_CLIENTS
            )));
        }
        if self.size_batch == 0 {
            return Err(ServiceError::Config("size_batch must be positive".to_string()));
        }
        if self.geometry.size_input == 0 || self.geometry.maxsize_moves == 0 {
            return Err(ServiceError::Config("slot geometry must be non-empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_gpu_backend() {
        let config = ServiceConfig::from_toml_str(
            r#"
            nnet_id = 2
            max_clients = 8
            size_batch = 4

            [backend]
            kind = "gpu"
            device_id = 1
            use_half = true
            "#,
        ).unwrap();

        assert_eq!(config.nnet_id, 2);
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.backend, Backend::Gpu { device_id: 1, use_half: true });
        assert_eq!(config.geometry, Geometry::default());
    }

    #[test]
    fn test_backend_defaults_to_cpu() {
        let config = ServiceConfig::from_toml_str(
            "nnet_id = 0\nmax_clients = 1\nsize_batch = 1\n",
        ).unwrap();
        assert_eq!(config.backend, Backend::CpuBlas { thread_num: 1 });
        assert_eq!(config.backend.name(), "cpu_blas");
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let too_many = ServiceConfig::new(0, MAX_CLIENTS + 1, 4, Backend::default());
        assert!(matches!(too_many.validate(), Err(ServiceError::Config(_))));

        let bad_instance = ServiceConfig::new(MAX_NNET, 4, 4, Backend::default());
        assert!(bad_instance.validate().is_err());

        let empty_batch = ServiceConfig::new(0, 4, 0, Backend::default());
        assert!(empty_batch.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_is_a_config_error() {
        let err = ServiceConfig::from_toml_str(
            "nnet_id = 0\nmax_clients = 1\nsize_batch = 1\n[backend]\nkind = \"tpu\"\n",
        ).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nnet_id = 1\nmax_clients = 3\nsize_batch = 2\nmax_in_flight = 4").unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_clients, 3);
        assert_eq!(config.max_in_flight, 4);
    }
}
