use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64};
use crate::error::{Result, ServiceError};

/// Values that may be placed in a mapping shared with another process.
///
/// # Safety
///
/// Implementors are primitives or `#[repr(C)]` aggregates of `Plain` fields,
/// hold no pointers and are valid for every bit pattern: the other side of a
/// mapping can write anything.
pub unsafe trait Plain {}

unsafe impl Plain for u16 {}
unsafe impl Plain for u32 {}
unsafe impl Plain for u64 {}
unsafe impl Plain for f32 {}
unsafe impl Plain for AtomicU32 {}
unsafe impl Plain for AtomicU64 {}

/// The bytes of one live mapping, as handed to [`Record`] implementations.
///
/// Accessors check bounds and alignment; who may touch which bytes when is
/// up to the protocol layered on top.
#[derive(Clone, Copy)]
pub struct Bytes<'a> {
    base: NonNull<u8>,
    len: usize,
    name: &'a str,
    _mapping: PhantomData<&'a [u8]>,
}

impl<'a> Bytes<'a> {
    /// # Safety
    ///
    /// `base..base + len` must stay mapped for `'a`.
    pub(crate) unsafe fn new(base: NonNull<u8>, len: usize, name: &'a str) -> Self {
        Self { base, len, name, _mapping: PhantomData }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// An IPC error naming this mapping.
    pub fn error(&self, reason: &'static str) -> ServiceError {
        ServiceError::Ipc { name: self.name.to_string(), reason }
    }

    fn locate<T: Plain>(&self, offset: usize, count: usize) -> Result<NonNull<T>> {
        let end = size_of::<T>()
            .checked_mul(count)
            .and_then(|size| size.checked_add(offset))
            .ok_or_else(|| self.error("record out of bounds"))?;
        if end > self.len {
            return Err(self.error("record out of bounds"));
        }
        // in bounds: checked above
        let ptr = unsafe { self.base.add(offset) }.cast::<T>();
        if !ptr.as_ptr().is_aligned() {
            return Err(self.error("misaligned record"));
        }
        Ok(ptr)
    }

    /// The `T` at `offset`, for exclusive use.
    ///
    /// # Safety
    ///
    /// No other reference to these bytes, from this or any other process,
    /// may be live during `'a`.
    pub unsafe fn value<T: Plain>(self, offset: usize) -> Result<&'a mut T> {
        let ptr = self.locate::<T>(offset, 1)?;
        Ok(unsafe { &mut *ptr.as_ptr() })
    }

    /// The `T` at `offset`, shared.
    ///
    /// # Safety
    ///
    /// Nobody may write these bytes during `'a` except through atomics.
    pub unsafe fn value_ref<T: Plain>(self, offset: usize) -> Result<&'a T> {
        let ptr = self.locate::<T>(offset, 1)?;
        Ok(unsafe { &*ptr.as_ptr() })
    }

    /// `count` values of `T` starting at `offset`, for exclusive use.
    ///
    /// # Safety
    ///
    /// As for [`Bytes::value`].
    pub unsafe fn slice<T: Plain>(self, offset: usize, count: usize) -> Result<&'a mut [T]> {
        let ptr = self.locate::<T>(offset, count)?;
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), count) })
    }

    /// `count` values of `T` starting at `offset`, shared.
    ///
    /// # Safety
    ///
    /// As for [`Bytes::value_ref`].
    pub unsafe fn slice_ref<T: Plain>(self, offset: usize, count: usize) -> Result<&'a [T]> {
        let ptr = self.locate::<T>(offset, count)?;
        Ok(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), count) })
    }
}

/// A fixed-layout record stored at the start of a [`Segment`](super::Segment).
///
/// A record is a `#[repr(C)]` header followed by arrays whose lengths, the
/// record's shape, are fixed when the segment is created. The header stores
/// the shape, so attaching needs only the name.
pub trait Record {
    /// Lengths of the trailing arrays
    type Shape: Copy + PartialEq + std::fmt::Debug + Send + Sync + 'static;

    /// Typed access to a mapping
    type View<'a>;

    /// Bytes needed for a record of `shape`.
    fn size(shape: &Self::Shape) -> Result<usize>;

    /// Writes the header of a freshly created, zeroed mapping.
    ///
    /// # Safety
    ///
    /// The caller has exclusive access to the mapping.
    unsafe fn init(bytes: Bytes<'_>, shape: &Self::Shape) -> Result<()>;

    /// Reads the shape back from the header.
    ///
    /// # Safety
    ///
    /// Nobody writes the header concurrently.
    unsafe fn shape(bytes: Bytes<'_>) -> Result<Self::Shape>;

    /// Builds a view over a mapping of at least `size(shape)` bytes.
    ///
    /// # Safety
    ///
    /// The caller holds the record for `'a` under the IPC protocol, with the
    /// exclusivity the view's references require.
    unsafe fn view<'a>(bytes: Bytes<'a>, shape: &Self::Shape) -> Result<Self::View<'a>>;
}
