#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use teppan::config::{Backend, Geometry};
use teppan::error::{Result, ServiceError};
use teppan::executor::{BatchInput, ExecHandle, Executor, ExecutorFactory};

/// Blocks executor waits while closed.
#[derive(Default)]
pub struct Gate {
    closed: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn close(&self) {
        *self.closed.lock() = true;
    }

    pub fn open(&self) {
        *self.closed.lock() = false;
        self.opened.notify_all();
    }

    fn pass(&self) {
        let mut closed = self.closed.lock();
        self.opened.wait_while(&mut closed, |closed| *closed);
    }
}

/// What the executors built by one [`ScaleFactory`] have seen.
#[derive(Default)]
pub struct Record {
    pub gate: Gate,
    pub batches: Mutex<Vec<usize>>,
    pub loads: Mutex<Vec<PathBuf>>,
}

/// Model whose weight file holds a single number: the value of a row is its
/// first feature times that number, its policy is uniform over its moves.
pub struct ScaleExecutor {
    scale: f32,
    geometry: Geometry,
    record: Arc<Record>,
    next: AtomicU64,
    pending: Mutex<HashMap<u64, (Vec<f32>, Vec<f32>)>>,
}

impl Executor for ScaleExecutor {
    fn submit(&self, batch: BatchInput<'_>) -> Result<ExecHandle> {
        let maxm = self.geometry.maxsize_moves;
        let mut probs = vec![0.0; batch.size * maxm];
        let mut values = vec![0.0; batch.size];
        for u in 0..batch.size {
            values[u] = batch.row_input(u)[0] * self.scale;
            let moves = batch.row_moves(u);
            for k in 0..moves.len() {
                probs[u * maxm + k] = 1.0 / moves.len() as f32;
            }
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().insert(id, (probs, values));
        self.record.batches.lock().push(batch.size);
        Ok(ExecHandle::new(id))
    }

    fn wait(&self, handle: ExecHandle, probs: &mut [f32], values: &mut [f32]) -> Result<()> {
        self.record.gate.pass();
        let (p, v) = self.pending
            .lock()
            .remove(&handle.id())
            .ok_or_else(|| ServiceError::Executor("unknown handle".to_string()))?;
        probs[..p.len()].copy_from_slice(&p);
        values[..v.len()].copy_from_slice(&v);
        Ok(())
    }
}

pub struct ScaleFactory {
    pub record: Arc<Record>,
}

impl ScaleFactory {
    pub fn new() -> (Self, Arc<Record>) {
        let record = Arc::new(Record::default());
        (Self { record: record.clone() }, record)
    }
}

impl ExecutorFactory for ScaleFactory {
    fn create(
        &self,
        path: &Path,
        _backend: &Backend,
        _size_batch: usize,
        geometry: &Geometry,
    ) -> Result<Box<dyn Executor>> {
        let text = std::fs::read_to_string(path)?;
        let scale = text.trim().parse::<f32>().map_err(|e| ServiceError::Weights {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.record.loads.lock().push(path.to_path_buf());
        Ok(Box::new(ScaleExecutor {
            scale,
            geometry: *geometry,
            record: self.record.clone(),
            next: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }))
    }
}

/// Writes a weight file holding `scale`.
pub fn model(dir: &tempfile::TempDir, name: &str, scale: f32) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, scale.to_string()).unwrap();
    path
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached");
        std::thread::sleep(Duration::from_millis(2));
    }
}
