use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use candle_core::{DType, Device, Tensor};
use parking_lot::Mutex;
use tracing::info;
use super::{BatchInput, ExecHandle, Executor, ExecutorBuilder, ModelWeights, WeightLoader};
use crate::config::Geometry;
use crate::error::{Result, ServiceError};

/// Named tensors of a model file.
pub type Tensors = HashMap<String, Tensor>;

/// Logit added to padding columns before the softmax.
const MASKED_LOGIT: f32 = -1.0e9;

impl From<candle_core::Error> for ServiceError {
    fn from(e: candle_core::Error) -> Self {
        ServiceError::Executor(e.to_string())
    }
}

/// A policy / value network on candle tensors.
pub trait Network: Send + Sync {
    /// Maps `input` of shape `[batch, size_input]` to policy logits of shape
    /// `[batch, num_moves]` and values of shape `[batch]`.
    fn forward(&self, input: &Tensor) -> candle_core::Result<(Tensor, Tensor)>;
}

/// Loads weights from a safetensors file.
///
/// The version is read from an optional scalar `version` tensor; the digest
/// is a hash of the raw file.
pub struct SafetensorsLoader;

impl WeightLoader for SafetensorsLoader {
    type Weights = Tensors;

    fn load(&self, path: &Path) -> Result<ModelWeights<Tensors>> {
        let bytes = std::fs::read(path)?;
        let weights = candle_core::safetensors::load_buffer(&bytes, &Device::Cpu)
            .map_err(|e| ServiceError::Weights { path: path.to_path_buf(), reason: e.to_string() })?;

        let version = match weights.get("version") {
            Some(tensor) => tensor
                .to_dtype(DType::U32)?
                .flatten_all()?
                .to_vec1::<u32>()?
                .first()
                .copied()
                .unwrap_or(0),
            None => 0,
        };
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Ok(ModelWeights { weights, version, digest: hasher.finish() })
    }
}

/// Builds [`CandleExecutor`]s, constructing the network with `build` once
/// the weights sit on the target device.
pub struct CandleBuilder<F> {
    build: F,
}

impl<F> CandleBuilder<F>
where
    F: Fn(Tensors, &Device) -> candle_core::Result<Box<dyn Network>> + Send + Sync,
{
    pub fn new(build: F) -> Self {
        Self { build }
    }

    fn executor(&self, weights: Tensors, device: Device, dtype: DType, geometry: &Geometry) -> Result<Box<dyn Executor>> {
        let weights = weights
            .into_iter()
            .map(|(name, tensor)| {
                let tensor = tensor.to_device(&device)?;
                let tensor = if tensor.dtype().is_float() { tensor.to_dtype(dtype)? } else { tensor };
                Ok((name, tensor))
            })
            .collect::<candle_core::Result<Tensors>>()?;
        let network = (self.build)(weights, &device)?;
        Ok(Box::new(CandleExecutor::new(network, device, dtype, *geometry)))
    }
}

impl<F> ExecutorBuilder for CandleBuilder<F>
where
    F: Fn(Tensors, &Device) -> candle_core::Result<Box<dyn Network>> + Send + Sync,
{
    type Weights = Tensors;

    fn cpu_blas(&self, size_batch: usize, geometry: &Geometry, weights: Tensors, thread_num: u32) -> Result<Box<dyn Executor>> {
        // candle's CPU kernels size their own thread pool
        info!(size_batch, thread_num, "building cpu executor");
        self.executor(weights, Device::Cpu, DType::F32, geometry)
    }

    fn gpu(
        &self,
        size_batch: usize,
        geometry: &Geometry,
        weights: Tensors,
        device_id: u32,
        use_half: bool,
    ) -> Result<Box<dyn Executor>> {
        let device = Device::new_cuda(device_id as usize)?;
        let dtype = if use_half { DType::F16 } else { DType::F32 };
        info!(size_batch, device_id, use_half, "building gpu executor");
        self.executor(weights, device, dtype, geometry)
    }
}

/// Device-side outputs of one submitted batch.
struct Pending {
    probs: Tensor,
    values: Tensor,
}

/// Runs a [`Network`] on a candle device.
///
/// `submit` queues the forward pass and the masked softmax over each row's
/// candidate moves on the device; `wait` copies the outputs to the host.
pub struct CandleExecutor {
    network: Box<dyn Network>,
    device: Device,
    dtype: DType,
    geometry: Geometry,
    next: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
}

impl CandleExecutor {
    pub fn new(network: Box<dyn Network>, device: Device, dtype: DType, geometry: Geometry) -> Self {
        Self {
            network,
            device,
            dtype,
            geometry,
            next: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn evaluate(&self, batch: &BatchInput<'_>) -> candle_core::Result<Pending> {
        let size = batch.size;
        let maxm = self.geometry.maxsize_moves;
        let input = Tensor::from_slice(batch.input, (size, self.geometry.size_input), &self.device)?
            .to_dtype(self.dtype)?;
        let (logits, values) = self.network.forward(&input)?;

        // padding columns point at move 0 and are masked out
        let mut index = vec![0u32; size * maxm];
        let mut mask = vec![MASKED_LOGIT; size * maxm];
        for u in 0..size {
            for (k, &m) in batch.row_moves(u).iter().enumerate() {
                index[u * maxm + k] = m as u32;
                mask[u * maxm + k] = 0.0;
            }
        }
        let index = Tensor::from_vec(index, (size, maxm), &self.device)?;
        let mask = Tensor::from_vec(mask, (size, maxm), &self.device)?;

        let logits = logits.to_dtype(DType::F32)?.contiguous()?.gather(&index, 1)?.add(&mask)?;
        let max = logits.max_keepdim(1)?;
        let exp = logits.broadcast_sub(&max)?.exp()?;
        let probs = exp.broadcast_div(&exp.sum_keepdim(1)?)?;
        let values = values.to_dtype(DType::F32)?.flatten_all()?;
        Ok(Pending { probs, values })
    }
}

impl Executor for CandleExecutor {
    fn submit(&self, batch: BatchInput<'_>) -> Result<ExecHandle> {
        let pending = self.evaluate(&batch)?;
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(id, pending);
        Ok(ExecHandle::new(id))
    }

    fn wait(&self, handle: ExecHandle, probs: &mut [f32], values: &mut [f32]) -> Result<()> {
        let pending = self.pending
            .lock()
            .remove(&handle.id())
            .ok_or_else(|| ServiceError::Executor(format!("unknown handle {}", handle.id())))?;

        let host_probs = pending.probs.flatten_all()?.to_vec1::<f32>()?;
        let host_values = pending.values.to_vec1::<f32>()?;
        if host_probs.len() > probs.len() || host_values.len() > values.len() {
            return Err(ServiceError::Executor(format!(
                "batch of {} rows does not fit the result buffers", host_values.len()
            )));
        }
        probs[..host_probs.len()].copy_from_slice(&host_probs);
        values[..host_values.len()].copy_from_slice(&host_values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::executor::{Engine, ExecutorFactory};

    const GEOMETRY: Geometry = Geometry { size_input: 2, maxsize_moves: 3 };

    /// Linear policy head and a value equal to the feature sum.
    struct Linear {
        policy: Tensor,
    }

    impl Network for Linear {
        fn forward(&self, input: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
            let logits = input.matmul(&self.policy)?;
            let values = input.sum(1)?;
            Ok((logits, values))
        }
    }

    fn build(weights: Tensors, _device: &Device) -> candle_core::Result<Box<dyn Network>> {
        let policy = weights
            .get("policy")
            .cloned()
            .ok_or_else(|| candle_core::Error::Msg("missing policy".to_string()))?;
        Ok(Box::new(Linear { policy }))
    }

    fn write_model(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("model.safetensors");
        // four moves; move m scores m * feature0
        let policy = Tensor::from_vec(vec![0f32, 1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0], (2, 4), &Device::Cpu).unwrap();
        let version = Tensor::from_vec(vec![5u32], 1, &Device::Cpu).unwrap();
        let tensors: Tensors = [("policy".to_string(), policy), ("version".to_string(), version)].into();
        candle_core::safetensors::save(&tensors, &path).unwrap();
        path
    }

    #[test]
    fn test_loader_reads_version_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_model(&dir);
        let first = SafetensorsLoader.load(&path).unwrap();
        let second = SafetensorsLoader.load(&path).unwrap();
        assert_eq!(first.version, 5);
        assert_eq!(first.digest, second.digest);
        assert!(first.weights.contains_key("policy"));
    }

    #[test]
    fn test_loader_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.safetensors");
        std::fs::write(&path, b"not a model").unwrap();
        assert!(matches!(SafetensorsLoader.load(&path), Err(ServiceError::Weights { .. })));
    }

    #[test]
    fn test_softmax_over_legal_moves() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_model(&dir);
        let engine = Engine::new(SafetensorsLoader, CandleBuilder::new(build));
        let executor = engine
            .create(&path, &Backend::CpuBlas { thread_num: 1 }, 2, &GEOMETRY)
            .unwrap();

        let input = [1.0f32, 0.5, 2.0, 0.0];
        let sizes = [2u32, 3];
        let nnmoves = [3u16, 1, 0, 0, 2, 3];
        let handle = executor
            .submit(BatchInput { size: 2, geometry: GEOMETRY, input: &input, sizes_nnmove: &sizes, nnmoves: &nnmoves })
            .unwrap();

        let mut probs = [0.0f32; 6];
        let mut values = [0.0f32; 2];
        executor.wait(handle, &mut probs, &mut values).unwrap();

        assert_eq!(values, [1.5, 2.0]);
        // row 0: logits 3 and 1 over its two moves; padding gets nothing
        let expected = 1.0 / (1.0 + (-2.0f32).exp());
        assert!((probs[0] - expected).abs() < 1e-5);
        assert!((probs[0] + probs[1] - 1.0).abs() < 1e-5);
        assert!(probs[2].abs() < 1e-6);
        // row 1: logits 0, 4, 6
        assert!((probs[3..6].iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(probs[5] > probs[4] && probs[4] > probs[3]);
    }

    #[test]
    fn test_gpu_backend_without_device() {
        if candle_core::utils::cuda_is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_model(&dir);
        let engine = Engine::new(SafetensorsLoader, CandleBuilder::new(build));
        let result = engine.create(&path, &Backend::Gpu { device_id: 0, use_half: true }, 2, &GEOMETRY);
        assert!(matches!(result, Err(ServiceError::Executor(_))));
    }
}
