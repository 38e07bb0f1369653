use std::path::Path;
use crate::config::Geometry;
use crate::error::{Result, ServiceError};

/// Opaque token for one submitted batch.
///
/// Returned by [`Executor::submit`] and consumed by value by
/// [`Executor::wait`], so a handle can be awaited exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct ExecHandle(u64);

impl ExecHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Borrowed view of the first `size` rows of an accumulator.
///
/// Rows are laid out contiguously: row `u` of `input` starts at
/// `u * geometry.size_input`, row `u` of `nnmoves` at
/// `u * geometry.maxsize_moves` and holds `sizes_nnmove[u]` meaningful ids.
#[derive(Debug, Clone, Copy)]
pub struct BatchInput<'a> {
    pub size: usize,
    pub geometry: Geometry,
    pub input: &'a [f32],
    pub sizes_nnmove: &'a [u32],
    pub nnmoves: &'a [u16],
}

impl<'a> BatchInput<'a> {
    /// Input features of row `u`.
    pub fn row_input(&self, u: usize) -> &'a [f32] {
        let size = self.geometry.size_input;
        &self.input[u * size..(u + 1) * size]
    }

    /// Candidate move ids of row `u`.
    pub fn row_moves(&self, u: usize) -> &'a [u16] {
        let start = u * self.geometry.maxsize_moves;
        &self.nnmoves[start..start + self.sizes_nnmove[u] as usize]
    }
}

/// The compute backend evaluating batches.
///
/// `submit` must not block on the computation; `wait` blocks until the batch
/// behind `handle` is done and writes its outputs: one value per row into
/// `values`, and for row `u` the probabilities of its candidate moves into
/// `probs[u * maxsize_moves..]`.
pub trait Executor: Send + Sync {
    /// Starts evaluating a batch.
    ///
    /// # Parameters
    ///
    /// * `batch` - Rows to evaluate; borrowed only for the call, so the
    ///   executor copies what it needs
    ///
    /// # Returns
    ///
    /// A handle to pass to [`Executor::wait`]
    fn submit(&self, batch: BatchInput<'_>) -> Result<ExecHandle>;

    /// Blocks until the batch behind `handle` is done.
    ///
    /// # Parameters
    ///
    /// * `handle` - Returned by `submit` on this executor
    /// * `probs` - At least `size * maxsize_moves` entries; row `u` receives
    ///   its move probabilities at `u * maxsize_moves`
    /// * `values` - At least `size` entries, one value per row
    fn wait(&self, handle: ExecHandle, probs: &mut [f32], values: &mut [f32]) -> Result<()>;
}

/// Weights read from a model file.
#[derive(Debug, Clone)]
pub struct ModelWeights<W> {
    pub weights: W,
    pub version: u32,
    pub digest: u64,
}

/// Reads model files.
pub trait WeightLoader: Send + Sync {
    type Weights;

    fn load(&self, path: &Path) -> Result<ModelWeights<Self::Weights>>;
}

/// Builds executors for each backend from loaded weights.
///
/// A builder only implements the backends its binary supports; the default
/// methods report the backend as unsupported.
pub trait ExecutorBuilder: Send + Sync {
    type Weights;

    fn cpu_blas(
        &self,
        _size_batch: usize,
        _geometry: &Geometry,
        _weights: Self::Weights,
        _thread_num: u32,
    ) -> Result<Box<dyn Executor>> {
        Err(ServiceError::UnsupportedBackend("cpu_blas"))
    }

    fn gpu(
        &self,
        _size_batch: usize,
        _geometry: &Geometry,
        _weights: Self::Weights,
        _device_id: u32,
        _use_half: bool,
    ) -> Result<Box<dyn Executor>> {
        Err(ServiceError::UnsupportedBackend("gpu"))
    }
}
