use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;
use crossbeam_utils::Backoff;
use super::record::{Bytes, Plain, Record};
use super::{Namespace, Segment};
use crate::error::{Result, ServiceError};

/// Sleep between polls once spinning has not produced a permit.
const PARK: Duration = Duration::from_micros(100);

/// Mapped state of a semaphore.
#[repr(C)]
pub struct SemaphoreRecord {
    count: AtomicU32,
    shut_down: AtomicU32,
}

unsafe impl Plain for SemaphoreRecord {}

impl Record for SemaphoreRecord {
    type Shape = ();
    type View<'a> = &'a SemaphoreRecord;

    fn size(_: &()) -> Result<usize> {
        Ok(size_of::<SemaphoreRecord>())
    }

    unsafe fn init(_: Bytes<'_>, _: &()) -> Result<()> {
        Ok(())
    }

    unsafe fn shape(_: Bytes<'_>) -> Result<()> {
        Ok(())
    }

    unsafe fn view<'a>(bytes: Bytes<'a>, _: &()) -> Result<&'a SemaphoreRecord> {
        unsafe { bytes.value_ref(0) }
    }
}

impl SemaphoreRecord {
    fn try_take(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .is_ok()
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire) != 0
    }
}

/// A named counting semaphore.
///
/// Mirrors the host primitive: `open` creates or attaches by name, `inc`
/// posts, `dec_wait` blocks until a permit is available, `close` drops this
/// handle (and unlinks the name when the handle created it). Operations on a
/// closed handle fail.
///
/// A permit posted by `inc` happens-before the `dec_wait` that takes it, so
/// writes to shared records made before posting are visible to the waiter.
/// Once [`Semaphore::shut_down`] marks it, waiters drain the permits posted
/// before the mark and then fail with [`ServiceError::ServiceClosed`].
pub struct Semaphore {
    segment: Segment<SemaphoreRecord>,
}

impl Semaphore {
    /// Creates `name` with `init` permits, or attaches to an existing one.
    pub fn open(namespace: &Namespace, name: &str, create: bool, init: u32) -> Result<Self> {
        let semaphore = if create {
            let semaphore = Self { segment: Segment::create(namespace, name, ())? };
            semaphore.record()?.count.store(init, Ordering::Release);
            semaphore
        } else {
            Self { segment: Segment::attach(namespace, name)? }
        };
        Ok(semaphore)
    }

    pub fn ok(&self) -> bool {
        self.segment.ok()
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    fn record(&self) -> Result<&SemaphoreRecord> {
        // SAFETY: the record is only ever touched through atomics
        unsafe { self.segment.view() }
    }

    /// Posts one permit.
    pub fn inc(&self) -> Result<()> {
        self.record()?.count.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Blocks until a permit is available and takes it.
    pub fn dec_wait(&self) -> Result<()> {
        let record = self.record()?;
        let backoff = Backoff::new();
        while !record.try_take() {
            if record.is_shut_down() {
                // the mark is stored after the last post, so that post is visible here
                return if record.try_take() { Ok(()) } else { Err(ServiceError::ServiceClosed) };
            }
            if backoff.is_completed() {
                thread::sleep(PARK);
            } else {
                backoff.snooze();
            }
        }
        Ok(())
    }

    /// Takes a permit if one is available.
    pub fn try_dec(&self) -> Result<bool> {
        Ok(self.record()?.try_take())
    }

    /// Current permit count.
    pub fn value(&self) -> Result<u32> {
        Ok(self.record()?.count.load(Ordering::Acquire))
    }

    /// Marks the semaphore as belonging to a stopped service; blocked and
    /// later waiters wake once the remaining permits are taken.
    pub fn shut_down(&self) -> Result<()> {
        self.record()?.shut_down.store(1, Ordering::Release);
        Ok(())
    }

    /// Whether [`Semaphore::shut_down`] was called through any handle.
    pub fn is_shut_down(&self) -> Result<bool> {
        Ok(self.record()?.is_shut_down())
    }

    /// Closes this handle; the creating handle also unlinks the name.
    pub fn close(&mut self) {
        self.segment.close();
    }
}
