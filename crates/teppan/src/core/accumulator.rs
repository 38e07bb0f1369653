use crate::communication::{IpcView, SharedIpc};
use crate::config::Geometry;
use crate::error::{Result, ServiceError};
use crate::executor::{BatchInput, ExecHandle, Executor};
use crate::ipc::{NameScheme, Namespace, Segment, Semaphore};

/// One client's slot record and result-ready semaphore, as held by the service.
pub(crate) struct ClientSlot {
    pub segment: Segment<SharedIpc>,
    pub semaphore: Semaphore,
}

impl ClientSlot {
    /// Creates the slot objects of client index `client`.
    pub fn create(namespace: &Namespace, scheme: &NameScheme, client: usize, geometry: &Geometry) -> Result<Self> {
        Ok(Self {
            segment: Segment::create(namespace, &scheme.client_segment(client), *geometry)?,
            semaphore: Semaphore::open(namespace, &scheme.client_semaphore(client), true, 0)?,
        })
    }

    /// Runs `f` on the slot record.
    ///
    /// Only called while the service owns the slot: after dequeuing the
    /// client's job and before posting the answer to it.
    pub fn with<R>(&self, f: impl FnOnce(&mut IpcView<'_>) -> R) -> Result<R> {
        // SAFETY: the client is blocked on its semaphore until the post
        let mut ipc = unsafe { self.segment.view() }?;
        Ok(f(&mut ipc))
    }
}

/// A fixed-capacity micro-batch.
///
/// Packs up to `capacity` client requests into contiguous arrays for a single
/// executor call, remembers which client each row came from, and scatters
/// the results back to those clients once the executor is done. Accumulators
/// are pooled: after [`Accumulator::collect`] the rows are logically empty and
/// the next [`Accumulator::add`] overwrites them.
pub(crate) struct Accumulator {
    geometry: Geometry,
    input: Box<[f32]>,
    sizes_nnmove: Box<[u32]>,
    nnmoves: Box<[u16]>,
    probs: Box<[f32]>,
    values: Box<[f32]>,
    ids: Box<[usize]>,
    filled: usize,
    capacity: usize,
    handle: Option<ExecHandle>,
}

impl Accumulator {
    /// Creates an empty accumulator with zeroed row storage.
    ///
    /// # Parameters
    ///
    /// * `capacity` - Maximum number of rows, the configured batch size
    /// * `geometry` - Row layout: features per input, moves per row
    pub fn new(capacity: usize, geometry: Geometry) -> Self {
        Self {
            geometry,
            input: vec![0.0; capacity * geometry.size_input].into_boxed_slice(),
            sizes_nnmove: vec![0; capacity].into_boxed_slice(),
            nnmoves: vec![0; capacity * geometry.maxsize_moves].into_boxed_slice(),
            probs: vec![0.0; capacity * geometry.maxsize_moves].into_boxed_slice(),
            values: vec![0.0; capacity].into_boxed_slice(),
            ids: vec![0; capacity].into_boxed_slice(),
            filled: 0,
            capacity,
            handle: None,
        }
    }

    /// Appends one request as the next row.
    ///
    /// # Parameters
    ///
    /// * `input` - Feature vector; only the first `size_input` values are read
    /// * `size_nnmove` - Number of candidate moves in `nnmoves`
    /// * `nnmoves` - Candidate move ids, at least `size_nnmove` of them
    /// * `client` - Index of the slot the result goes back to
    ///
    /// # Errors
    ///
    /// [`ServiceError::AccumulatorFull`] when every row is taken,
    /// [`ServiceError::RequestShape`] when the request exceeds the geometry.
    pub fn add(&mut self, input: &[f32], size_nnmove: usize, nnmoves: &[u16], client: usize) -> Result<()> {
        if self.is_full() {
            return Err(ServiceError::AccumulatorFull { capacity: self.capacity });
        }
        let size_input = self.geometry.size_input;
        let maxm = self.geometry.maxsize_moves;
        if input.len() < size_input || size_nnmove > maxm || size_nnmove > nnmoves.len() {
            return Err(ServiceError::RequestShape(format!(
                "client {client}: {} inputs, {size_nnmove} moves", input.len()
            )));
        }

        let u = self.filled;
        self.input[u * size_input..(u + 1) * size_input].copy_from_slice(&input[..size_input]);
        self.nnmoves[u * maxm..u * maxm + size_nnmove].copy_from_slice(&nnmoves[..size_nnmove]);
        self.sizes_nnmove[u] = size_nnmove as u32;
        self.ids[u] = client;
        self.filled += 1;
        Ok(())
    }

    /// Hands the filled rows to the executor without waiting for the result.
    ///
    /// The handle is kept until [`Accumulator::collect`].
    ///
    /// # Errors
    ///
    /// Fails on an empty accumulator, on one already submitted, and with
    /// whatever the executor reports.
    pub fn submit(&mut self, executor: &dyn Executor) -> Result<()> {
        if self.is_empty() {
            return Err(ServiceError::AccumulatorEmpty);
        }
        if self.handle.is_some() {
            return Err(ServiceError::AccumulatorState("already submitted"));
        }
        let n = self.filled;
        let batch = BatchInput {
            size: n,
            geometry: self.geometry,
            input: &self.input[..n * self.geometry.size_input],
            sizes_nnmove: &self.sizes_nnmove[..n],
            nnmoves: &self.nnmoves[..n * self.geometry.maxsize_moves],
        };
        self.handle = Some(executor.submit(batch)?);
        Ok(())
    }

    /// Waits for the submitted batch and delivers each row to its client.
    ///
    /// Every origin client gets its value and its `size_nnmove` probabilities
    /// written into its slot, then exactly one post on its semaphore. The
    /// accumulator is empty afterwards.
    ///
    /// # Parameters
    ///
    /// * `executor` - The executor the batch was submitted to
    /// * `clients` - All client slots, indexed by client id
    pub fn collect(&mut self, executor: &dyn Executor, clients: &[ClientSlot]) -> Result<()> {
        let handle = self.handle
            .take()
            .ok_or(ServiceError::AccumulatorState("not submitted"))?;
        executor.wait(handle, &mut self.probs, &mut self.values)?;

        let maxm = self.geometry.maxsize_moves;
        for u in 0..self.filled {
            let id = self.ids[u];
            let size_nnmove = self.sizes_nnmove[u] as usize;
            let client = clients
                .get(id)
                .ok_or(ServiceError::InvalidJobId { id: id as u32, max_clients: clients.len() })?;
            let probs = &self.probs[u * maxm..u * maxm + size_nnmove];
            let value = self.values[u];
            client.with(|ipc| ipc.write_response(value, probs))??;
            client.semaphore.inc()?;
        }
        self.filled = 0;
        Ok(())
    }

    /// Whether every row is taken.
    pub fn is_full(&self) -> bool {
        self.filled == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Number of rows taken.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Origin clients of the filled rows, in row order.
    pub fn clients(&self) -> &[usize] {
        &self.ids[..self.filled]
    }
}
