use std::alloc::Layout;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use crate::config::Names;
use crate::error::{Result, ServiceError};
use crate::ipc::{Bytes, NameScheme, Namespace, Plain, Record, Segment};

/// Seed of the shared sequence. Fixed so that every server run hands its
/// clients the same numbers.
pub const SEQ_PRN_SEED: u64 = 7;

/// Default number of entries in the shared sequence.
pub const DEFAULT_SEQ_PRN_LEN: usize = 1 << 16;

/// Header of the sequence segment, followed by `len` words.
#[repr(C)]
pub struct SeqPrn {
    len: u64,
}

unsafe impl Plain for SeqPrn {}

fn seq_prn_layout(len: usize) -> Result<(usize, usize)> {
    let (layout, words) = Layout::new::<SeqPrn>().extend(Layout::array::<u64>(len)?)?;
    Ok((words, layout.size()))
}

impl Record for SeqPrn {
    type Shape = usize;
    type View<'a> = &'a [u64];

    fn size(len: &usize) -> Result<usize> {
        Ok(seq_prn_layout(*len)?.1)
    }

    /// Generates the whole sequence; the record is read-only afterwards.
    unsafe fn init(bytes: Bytes<'_>, len: &usize) -> Result<()> {
        let (words, _) = seq_prn_layout(*len)?;
        unsafe { bytes.value::<SeqPrn>(0)? }.len = *len as u64;
        let mut rng = StdRng::seed_from_u64(SEQ_PRN_SEED);
        for word in unsafe { bytes.slice::<u64>(words, *len)? } {
            *word = rng.next_u64();
        }
        Ok(())
    }

    unsafe fn shape(bytes: Bytes<'_>) -> Result<usize> {
        let len = unsafe { bytes.value_ref::<SeqPrn>(0)? }.len;
        usize::try_from(len).map_err(|_| bytes.error("sequence length exceeds usize"))
    }

    unsafe fn view<'a>(bytes: Bytes<'a>, len: &usize) -> Result<&'a [u64]> {
        let (words, _) = seq_prn_layout(*len)?;
        unsafe { bytes.slice_ref(words, *len) }
    }
}

/// A fixed pseudo-random `u64` sequence published once per server process.
///
/// Clients read it to derive reproducible per-game randomness without each
/// seeding their own generator.
pub struct SeqPrnService {
    segment: Segment<SeqPrn>,
}

impl SeqPrnService {
    /// Generates the sequence and publishes it under `{seq_prn}.{pid:07}`.
    ///
    /// # Parameters
    ///
    /// * `namespace` - Where the segment is created
    /// * `names` - Name prefixes; only `seq_prn` is used
    /// * `pid` - Process id the name is derived from
    /// * `len` - Number of entries
    pub fn create(namespace: &Namespace, names: &Names, pid: u32, len: usize) -> Result<Self> {
        let name = NameScheme::new(names.clone(), pid, 0).seq_prn();
        let segment = Segment::create(namespace, &name, len)?;
        tracing::debug!(name = %name, len, "published pseudo-random sequence");
        Ok(Self { segment })
    }

    /// Attaches to the sequence published by server process `pid`.
    pub fn attach(namespace: &Namespace, names: &Names, pid: u32) -> Result<Self> {
        let name = NameScheme::new(names.clone(), pid, 0).seq_prn();
        Ok(Self { segment: Segment::attach(namespace, &name)? })
    }

    pub fn len(&self) -> usize {
        self.segment.shape()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry `index` of the sequence.
    pub fn get(&self, index: usize) -> Result<u64> {
        // SAFETY: nobody writes the words after creation
        let seq = unsafe { self.segment.view() }?;
        seq.get(index).copied().ok_or_else(|| ServiceError::Ipc {
            name: self.segment.name().to_string(),
            reason: "index past the end of the sequence",
        })
    }
}
