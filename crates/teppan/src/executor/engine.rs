use std::path::Path;
use tracing::info;
use super::{Executor, ExecutorBuilder, WeightLoader};
use crate::config::{Backend, Geometry};
use crate::error::Result;

/// Produces a ready executor from a model file, for the configured backend.
///
/// The service calls this from its intake stage on every reset.
pub trait ExecutorFactory: Send + Sync {
    fn create(
        &self,
        path: &Path,
        backend: &Backend,
        size_batch: usize,
        geometry: &Geometry,
    ) -> Result<Box<dyn Executor>>;
}

/// An [`ExecutorFactory`] pairing a weight loader with an executor builder.
pub struct Engine<L, B> {
    loader: L,
    builder: B,
}

impl<L, B> Engine<L, B> {
    pub fn new(loader: L, builder: B) -> Self {
        Self { loader, builder }
    }
}

impl<L, B> ExecutorFactory for Engine<L, B>
where
    L: WeightLoader,
    B: ExecutorBuilder<Weights = L::Weights>,
{
    fn create(
        &self,
        path: &Path,
        backend: &Backend,
        size_batch: usize,
        geometry: &Geometry,
    ) -> Result<Box<dyn Executor>> {
        let loaded = self.loader.load(path)?;
        info!(
            file = %path.display(),
            version = loaded.version,
            digest = %format!("{:016x}", loaded.digest),
            backend = backend.name(),
            "loaded weights"
        );

        match *backend {
            Backend::CpuBlas { thread_num } => {
                self.builder.cpu_blas(size_batch, geometry, loaded.weights, thread_num)
            }
            Backend::Gpu { device_id, use_half } => {
                info!(device_id, use_half, size_batch, "tuning feed-forward engine");
                self.builder.gpu(size_batch, geometry, loaded.weights, device_id, use_half)
            }
        }
    }
}
