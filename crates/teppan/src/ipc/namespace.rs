use std::cell::UnsafeCell;
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::Arc;
use parking_lot::Mutex;
use shared_memory::{Shmem, ShmemConf, ShmemError};
use tracing::debug;
use crate::error::{Result, ServiceError};

/// Zeroed, 8-byte aligned heap memory standing in for a host mapping.
pub(crate) struct Heap {
    words: Box<[UnsafeCell<u64>]>,
}

// SAFETY: the words are only reached through raw pointers, and access is
// ordered by the IPC protocol exactly as for a host mapping.
unsafe impl Sync for Heap {}

impl Heap {
    fn new(size: usize) -> Self {
        Self { words: (0..size.div_ceil(8)).map(|_| UnsafeCell::new(0)).collect() }
    }

    fn base(&self) -> NonNull<u8> {
        NonNull::from(&self.words[..]).cast()
    }
}

/// A host shared-memory mapping.
pub(crate) struct Mapping {
    shmem: Shmem,
    base: NonNull<u8>,
}

// SAFETY: the mapping stays valid until drop, and access to its bytes is
// ordered by the IPC protocol.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn new(shmem: Shmem, name: &str) -> Result<Self> {
        let base = NonNull::new(shmem.as_ptr())
            .ok_or_else(|| ServiceError::Ipc { name: name.to_string(), reason: "null mapping" })?;
        Ok(Self { shmem, base })
    }
}

/// Backing memory of one handle to a named object.
pub(crate) enum Region {
    Heap(Arc<Heap>),
    Host(Mapping),
}

impl Region {
    pub fn base(&self) -> NonNull<u8> {
        match self {
            Region::Heap(heap) => heap.base(),
            Region::Host(mapping) => mapping.base,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Region::Heap(heap) => heap.words.len() * 8,
            Region::Host(mapping) => mapping.shmem.len(),
        }
    }
}

enum Table {
    /// Objects live on the heap and are shared by cloned handles
    Local(Mutex<HashMap<String, Arc<Heap>>>),
    /// Objects are host shared memory; the set holds the names created
    /// through this namespace and not yet unlinked
    Host(Mutex<HashSet<String>>),
}

/// The table IPC objects are created in and attached from by name.
///
/// [`Namespace::host`] maps objects into host shared memory, so clients can
/// live in other processes. [`Namespace::new`] keeps them on the heap of the
/// current process, for clients running as threads and for tests. Cloning
/// yields another handle to the same table.
#[derive(Clone)]
pub struct Namespace {
    table: Arc<Table>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self { table: Arc::new(Table::Local(Mutex::new(HashMap::new()))) }
    }
}

impl Namespace {
    /// Creates an empty, process-local namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// The host's shared-memory namespace.
    pub fn host() -> Self {
        Self { table: Arc::new(Table::Host(Mutex::new(HashSet::new()))) }
    }

    /// Creates `name` with `size` zeroed bytes, replacing any stale object of
    /// that name.
    pub(crate) fn create(&self, name: &str, size: usize) -> Result<Region> {
        match &*self.table {
            Table::Local(objects) => {
                let heap = Arc::new(Heap::new(size));
                if objects.lock().insert(name.to_string(), heap.clone()).is_some() {
                    debug!(name, "replaced stale ipc object");
                }
                Ok(Region::Heap(heap))
            }
            Table::Host(names) => {
                let shmem = match create_shmem(name, size) {
                    Err(ShmemError::MappingIdExists) => {
                        // left behind by a crashed server
                        if let Ok(mut stale) = ShmemConf::new().os_id(name).open() {
                            stale.set_owner(true);
                        }
                        debug!(name, "replaced stale ipc object");
                        create_shmem(name, size)
                    }
                    created => created,
                };
                let shmem = shmem.map_err(|err| {
                    debug!(name, error = %err, "shared memory create failed");
                    ServiceError::Ipc { name: name.to_string(), reason: "cannot create shared memory" }
                })?;
                names.lock().insert(name.to_string());
                Ok(Region::Host(Mapping::new(shmem, name)?))
            }
        }
    }

    /// Maps the object registered under `name`.
    pub(crate) fn attach(&self, name: &str) -> Result<Region> {
        let not_found = || ServiceError::Ipc { name: name.to_string(), reason: "not found" };
        match &*self.table {
            Table::Local(objects) => {
                let heap = objects.lock().get(name).cloned().ok_or_else(not_found)?;
                Ok(Region::Heap(heap))
            }
            Table::Host(_) => {
                let shmem = ShmemConf::new().os_id(name).open().map_err(|_| not_found())?;
                Ok(Region::Host(Mapping::new(shmem, name)?))
            }
        }
    }

    /// Removes `name` if it still refers to `region`, the creating handle.
    ///
    /// A host object is unlinked when its creating mapping drops.
    pub(crate) fn unlink(&self, name: &str, region: &Region) {
        match (&*self.table, region) {
            (Table::Local(objects), Region::Heap(heap)) => {
                let mut objects = objects.lock();
                if objects.get(name).is_some_and(|o| Arc::ptr_eq(o, heap)) {
                    objects.remove(name);
                }
            }
            (Table::Host(names), Region::Host(_)) => {
                names.lock().remove(name);
            }
            _ => debug!(name, "region belongs to another namespace"),
        }
    }

    /// Whether an object is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        match &*self.table {
            Table::Local(objects) => objects.lock().contains_key(name),
            Table::Host(_) => ShmemConf::new().os_id(name).open().is_ok(),
        }
    }

    /// Number of live objects created through this namespace.
    pub fn len(&self) -> usize {
        match &*self.table {
            Table::Local(objects) => objects.lock().len(),
            Table::Host(names) => names.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn create_shmem(name: &str, size: usize) -> std::result::Result<Shmem, ShmemError> {
    ShmemConf::new().os_id(name).size(size).create()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u64(region: &Region) -> u64 {
        unsafe { region.base().cast::<u64>().read() }
    }

    fn write_u64(region: &Region, value: u64) {
        unsafe { region.base().cast::<u64>().write(value) }
    }

    #[test]
    fn test_attach_sees_created_object() {
        let ns = Namespace::new();
        let created = ns.create("/a", 12).unwrap();
        assert_eq!(created.len(), 16);
        assert_eq!(read_u64(&created), 0);

        write_u64(&created, 5);
        let attached = ns.attach("/a").unwrap();
        assert_eq!(read_u64(&attached), 5);
        assert!(ns.contains("/a"));
    }

    #[test]
    fn test_attach_missing() {
        let ns = Namespace::new();
        assert!(matches!(
            ns.attach("/missing"),
            Err(ServiceError::Ipc { reason: "not found", .. })
        ));
    }

    #[test]
    fn test_unlink_ignores_replaced_object() {
        let ns = Namespace::new();
        let old = ns.create("/a", 8).unwrap();
        let new = ns.create("/a", 8).unwrap();
        write_u64(&new, 2);

        ns.unlink("/a", &old);
        assert_eq!(read_u64(&ns.attach("/a").unwrap()), 2);
        ns.unlink("/a", &new);
        assert!(ns.is_empty());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let a = Namespace::new();
        let b = Namespace::new();
        a.create("/x", 8).unwrap();
        assert!(!b.contains("/x"));
        assert!(a.clone().contains("/x"));
    }

    #[test]
    fn test_host_objects_are_shared_memory() {
        let ns = Namespace::host();
        let name = format!("/teppan_test_ns.{:07}", std::process::id());
        let created = ns.create(&name, 64).unwrap();
        assert!(created.len() >= 64);
        write_u64(&created, 11);

        // a second mapping of the same object
        let attached = Namespace::host().attach(&name).unwrap();
        assert_eq!(read_u64(&attached), 11);
        assert_eq!(ns.len(), 1);

        ns.unlink(&name, &created);
        drop(created);
        assert!(ns.is_empty());
        assert!(!ns.contains(&name));
    }
}
