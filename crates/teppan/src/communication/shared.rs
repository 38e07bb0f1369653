use std::alloc::Layout;
use super::Job;
use crate::config::Geometry;
use crate::error::{Result, ServiceError};
use crate::ipc::{Bytes, Plain, Record};

/// Header of the service segment, followed by `capacity` [`Job`]s.
///
/// Only touched while holding the queue-lock semaphore.
#[repr(C)]
#[derive(Debug)]
pub struct SharedService {
    capacity: u32,
    njob: u32,
    /// Next client index handed out at registration
    id_ipc_next: u32,
    _reserved: u32,
}

unsafe impl Plain for SharedService {}

/// Byte offset of the job array for `capacity` jobs, and the total size.
fn service_layout(capacity: usize) -> Result<(usize, usize)> {
    let (layout, jobs) = Layout::new::<SharedService>().extend(Layout::array::<Job>(capacity)?)?;
    Ok((jobs, layout.size()))
}

impl Record for SharedService {
    type Shape = usize;
    type View<'a> = ServiceView<'a>;

    fn size(capacity: &usize) -> Result<usize> {
        Ok(service_layout(*capacity)?.1)
    }

    unsafe fn init(bytes: Bytes<'_>, capacity: &usize) -> Result<()> {
        let capacity = u32::try_from(*capacity).map_err(|_| bytes.error("queue capacity exceeds u32"))?;
        let header = unsafe { bytes.value::<SharedService>(0)? };
        header.capacity = capacity;
        Ok(())
    }

    unsafe fn shape(bytes: Bytes<'_>) -> Result<usize> {
        Ok(unsafe { bytes.value_ref::<SharedService>(0)? }.capacity as usize)
    }

    unsafe fn view<'a>(bytes: Bytes<'a>, capacity: &usize) -> Result<ServiceView<'a>> {
        let (jobs, _) = service_layout(*capacity)?;
        Ok(ServiceView {
            header: unsafe { bytes.value(0)? },
            jobs: unsafe { bytes.slice(jobs, *capacity)? },
        })
    }
}

/// The service segment: a bounded FIFO of jobs plus the client id counter.
pub struct ServiceView<'a> {
    header: &'a mut SharedService,
    jobs: &'a mut [Job],
}

impl ServiceView<'_> {
    pub fn capacity(&self) -> usize {
        self.jobs.len()
    }

    /// Number of queued jobs, clamped to the capacity.
    pub fn njob(&self) -> usize {
        (self.header.njob as usize).min(self.capacity())
    }

    pub fn id_ipc_next(&self) -> u32 {
        self.header.id_ipc_next
    }

    pub fn set_id_ipc_next(&mut self, id: u32) {
        self.header.id_ipc_next = id;
    }

    /// Appends `job`, failing when the array is full.
    pub fn push(&mut self, job: Job) -> Result<()> {
        let njob = self.njob();
        if njob >= self.capacity() {
            return Err(ServiceError::QueueFull { capacity: self.capacity() });
        }
        self.jobs[njob] = job;
        self.header.njob = njob as u32 + 1;
        Ok(())
    }

    /// Removes the front job, shifting the rest down.
    pub fn pop_front(&mut self) -> Option<Job> {
        let njob = self.njob();
        if njob == 0 {
            return None;
        }
        let front = self.jobs[0];
        self.jobs.copy_within(1..njob, 0);
        self.header.njob = njob as u32 - 1;
        Some(front)
    }
}

/// Marks a client slot nobody has claimed yet.
pub const UNCLAIMED: u32 = u32::MAX;

/// Header of one client's request / response record.
///
/// The header is followed by `size_input` input floats, then
/// `maxsize_moves` probabilities and `maxsize_moves` move ids. The client
/// writes `nnet_id`, the input, `size_nnmove` and the moves; the service
/// writes the probabilities and `value`. Only the first `size_nnmove` moves
/// and probabilities are meaningful.
#[repr(C)]
#[derive(Debug)]
pub struct SharedIpc {
    nnet_id: u32,
    size_input: u32,
    maxsize_moves: u32,
    size_nnmove: u32,
    value: f32,
    _reserved: u32,
}

unsafe impl Plain for SharedIpc {}

struct IpcLayout {
    input: usize,
    probs: usize,
    nnmoves: usize,
    size: usize,
}

impl IpcLayout {
    fn new(geometry: &Geometry) -> Result<Self> {
        let header = Layout::new::<SharedIpc>();
        let (layout, input) = header.extend(Layout::array::<f32>(geometry.size_input)?)?;
        let (layout, probs) = layout.extend(Layout::array::<f32>(geometry.maxsize_moves)?)?;
        let (layout, nnmoves) = layout.extend(Layout::array::<u16>(geometry.maxsize_moves)?)?;
        Ok(Self { input, probs, nnmoves, size: layout.size() })
    }
}

impl Record for SharedIpc {
    type Shape = Geometry;
    type View<'a> = IpcView<'a>;

    fn size(geometry: &Geometry) -> Result<usize> {
        Ok(IpcLayout::new(geometry)?.size)
    }

    unsafe fn init(bytes: Bytes<'_>, geometry: &Geometry) -> Result<()> {
        let too_large = || bytes.error("slot geometry exceeds u32");
        let header = unsafe { bytes.value::<SharedIpc>(0)? };
        header.nnet_id = UNCLAIMED;
        header.size_input = u32::try_from(geometry.size_input).map_err(|_| too_large())?;
        header.maxsize_moves = u32::try_from(geometry.maxsize_moves).map_err(|_| too_large())?;
        Ok(())
    }

    unsafe fn shape(bytes: Bytes<'_>) -> Result<Geometry> {
        let header = unsafe { bytes.value_ref::<SharedIpc>(0)? };
        Ok(Geometry {
            size_input: header.size_input as usize,
            maxsize_moves: header.maxsize_moves as usize,
        })
    }

    unsafe fn view<'a>(bytes: Bytes<'a>, geometry: &Geometry) -> Result<IpcView<'a>> {
        let layout = IpcLayout::new(geometry)?;
        Ok(IpcView {
            header: unsafe { bytes.value(0)? },
            input: unsafe { bytes.slice(layout.input, geometry.size_input)? },
            probs: unsafe { bytes.slice(layout.probs, geometry.maxsize_moves)? },
            nnmoves: unsafe { bytes.slice(layout.nnmoves, geometry.maxsize_moves)? },
        })
    }
}

/// One client's slot.
pub struct IpcView<'a> {
    header: &'a mut SharedIpc,
    input: &'a mut [f32],
    probs: &'a mut [f32],
    nnmoves: &'a mut [u16],
}

impl IpcView<'_> {
    pub fn nnet_id(&self) -> u32 {
        self.header.nnet_id
    }

    pub fn set_nnet_id(&mut self, nnet_id: u32) {
        self.header.nnet_id = nnet_id;
    }

    /// Copies a request into the client-owned fields.
    pub fn write_request(&mut self, input: &[f32], nnmoves: &[u16]) -> Result<()> {
        if input.len() != self.input.len() {
            return Err(ServiceError::RequestShape(format!(
                "input has {} values, slot takes {}", input.len(), self.input.len()
            )));
        }
        if nnmoves.len() > self.nnmoves.len() {
            return Err(ServiceError::RequestShape(format!(
                "{} moves exceed the slot maximum of {}", nnmoves.len(), self.nnmoves.len()
            )));
        }
        self.input.copy_from_slice(input);
        self.nnmoves[..nnmoves.len()].copy_from_slice(nnmoves);
        self.header.size_nnmove = nnmoves.len() as u32;
        Ok(())
    }

    pub fn input(&self) -> &[f32] {
        &self.input[..]
    }

    /// Number of requested moves as written by the client, unchecked.
    pub fn size_nnmove(&self) -> usize {
        self.header.size_nnmove as usize
    }

    /// The whole move array; only the first `size_nnmove` ids are meaningful.
    pub fn nnmoves(&self) -> &[u16] {
        &self.nnmoves[..]
    }

    /// Writes the service-owned fields.
    pub fn write_response(&mut self, value: f32, probs: &[f32]) -> Result<()> {
        let slot = self.probs
            .get_mut(..probs.len())
            .ok_or_else(|| ServiceError::RequestShape(format!("{} probabilities exceed the slot", probs.len())))?;
        slot.copy_from_slice(probs);
        self.header.value = value;
        Ok(())
    }

    pub fn value(&self) -> f32 {
        self.header.value
    }

    /// Probabilities of the requested moves.
    pub fn probs(&self) -> &[f32] {
        &self.probs[..self.size_nnmove().min(self.probs.len())]
    }
}
