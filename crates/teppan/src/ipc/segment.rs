use std::marker::PhantomData;
use super::namespace::Region;
use super::record::{Bytes, Record};
use super::Namespace;
use crate::error::{Result, ServiceError};

/// A named shared record.
///
/// The creating side sizes the mapping for the record's shape and writes its
/// header; other parties attach by name and read the shape back. Access goes
/// through [`Segment::view`], whose exclusivity is guaranteed by the
/// semaphore protocol layered on top rather than by the segment itself.
pub struct Segment<R: Record> {
    name: String,
    region: Option<Region>,
    shape: R::Shape,
    namespace: Namespace,
    owner: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Segment<R> {
    /// Creates `name` holding a record of `shape`, replacing any stale object.
    pub fn create(namespace: &Namespace, name: &str, shape: R::Shape) -> Result<Self> {
        let region = namespace.create(name, R::size(&shape)?)?;
        let segment = Self {
            name: name.to_string(),
            region: Some(region),
            shape,
            namespace: namespace.clone(),
            owner: true,
            _record: PhantomData,
        };
        // SAFETY: nobody attached to the fresh mapping has been told it exists yet
        unsafe { R::init(segment.bytes()?, &shape)? };
        Ok(segment)
    }

    /// Attaches to an existing record.
    pub fn attach(namespace: &Namespace, name: &str) -> Result<Self> {
        let region = namespace.attach(name)?;
        // SAFETY: the region outlives `bytes`; headers are written once, at creation
        let shape = unsafe { R::shape(Bytes::new(region.base(), region.len(), name))? };
        if R::size(&shape)? > region.len() {
            return Err(ServiceError::Ipc { name: name.to_string(), reason: "mapping smaller than its record" });
        }
        Ok(Self {
            name: name.to_string(),
            region: Some(region),
            shape,
            namespace: namespace.clone(),
            owner: false,
            _record: PhantomData,
        })
    }

    pub fn ok(&self) -> bool {
        self.region.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shape the record was created with.
    pub fn shape(&self) -> R::Shape {
        self.shape
    }

    fn bytes(&self) -> Result<Bytes<'_>> {
        let region = self.region
            .as_ref()
            .ok_or_else(|| ServiceError::Ipc { name: self.name.clone(), reason: "closed" })?;
        // SAFETY: the region stays mapped while `self` is borrowed
        Ok(unsafe { Bytes::new(region.base(), region.len(), &self.name) })
    }

    /// Typed view of the record.
    ///
    /// # Safety
    ///
    /// The caller holds the record under the IPC protocol for as long as the
    /// view lives: no other handle, in this or another process, touches the
    /// bytes the view hands out mutably.
    pub unsafe fn view(&self) -> Result<R::View<'_>> {
        unsafe { R::view(self.bytes()?, &self.shape) }
    }

    /// Closes this mapping; the creating side also unlinks the name.
    pub fn close(&mut self) {
        if let Some(region) = self.region.take() {
            if self.owner {
                self.namespace.unlink(&self.name, &region);
            }
        }
    }
}

impl<R: Record> Drop for Segment<R> {
    fn drop(&mut self) {
        self.close();
    }
}
