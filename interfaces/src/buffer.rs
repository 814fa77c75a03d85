//! Packet Buffers
//! 
//! Scatter-gather packets made of owned byte segments and reference-counted
//! external buffers. External buffers are attached without copying, so a
//! large beamforming weight set can be shared by every in-flight packet that
//! refers to it.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::InterfaceError;

/// Callback run once when the last holder of an external buffer releases it
pub type FreeCallback = Box<dyn FnOnce(&Bytes) + Send>;

struct ExtInner {
    data: Bytes,
    holders: AtomicUsize,
    free_cb: Mutex<Option<FreeCallback>>,
}

impl ExtInner {
    fn release(&self) {
        if self.holders.fetch_sub(1, Ordering::AcqRel) == 1 {
            trace!("External buffer of {} bytes released by last holder", self.data.len());
            let callback = match self.free_cb.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(callback) = callback {
                callback(&self.data);
            }
        }
    }
}

/// Externally owned bytes with an explicit holder count
///
/// The count tracks attachments only; cloning the `SharedExtBuffer` handle
/// itself does not change it.
#[derive(Clone)]
pub struct SharedExtBuffer {
    inner: Arc<ExtInner>,
}

impl SharedExtBuffer {
    /// Wrap bytes without a free callback
    pub fn new(data: Bytes) -> Self {
        Self {
            inner: Arc::new(ExtInner {
                data,
                holders: AtomicUsize::new(0),
                free_cb: Mutex::new(None),
            }),
        }
    }

    /// Wrap bytes and run `callback` once all holders have released them
    pub fn with_free_callback(data: Bytes, callback: FreeCallback) -> Self {
        let buffer = Self::new(data);
        if let Ok(mut guard) = buffer.inner.free_cb.lock() {
            *guard = Some(callback);
        }
        buffer
    }

    /// Take a new holder reference, incrementing the count by one
    pub fn attach(&self) -> ExtBufferRef {
        self.inner.holders.fetch_add(1, Ordering::AcqRel);
        ExtBufferRef { inner: Arc::clone(&self.inner) }
    }

    /// Current number of holders
    pub fn refcnt(&self) -> usize {
        self.inner.holders.load(Ordering::Acquire)
    }

    /// Buffer length in bytes
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// The wrapped bytes
    pub fn bytes(&self) -> &Bytes {
        &self.inner.data
    }
}

impl fmt::Debug for SharedExtBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedExtBuffer")
            .field("len", &self.len())
            .field("refcnt", &self.refcnt())
            .finish()
    }
}

impl PartialEq for SharedExtBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.inner.data == other.inner.data
    }
}

impl Eq for SharedExtBuffer {}

/// One holder reference to a [`SharedExtBuffer`], released on drop
pub struct ExtBufferRef {
    inner: Arc<ExtInner>,
}

impl ExtBufferRef {
    /// The referenced bytes
    pub fn bytes(&self) -> &Bytes {
        &self.inner.data
    }

    /// Whether this reference points at the same storage as `buffer`
    pub fn is_attached_to(&self, buffer: &SharedExtBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &buffer.inner)
    }
}

impl Clone for ExtBufferRef {
    fn clone(&self) -> Self {
        self.inner.holders.fetch_add(1, Ordering::AcqRel);
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl Drop for ExtBufferRef {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl fmt::Debug for ExtBufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtBufferRef")
            .field("len", &self.inner.data.len())
            .finish()
    }
}

/// A packet segment
#[derive(Debug, Clone)]
pub enum Segment {
    /// Bytes owned by the packet
    Owned(Bytes),
    /// An attached external buffer
    External(ExtBufferRef),
}

impl Segment {
    /// Segment bytes
    pub fn bytes(&self) -> &Bytes {
        match self {
            Segment::Owned(bytes) => bytes,
            Segment::External(ext) => ext.bytes(),
        }
    }
}

/// Scatter-gather packet
#[derive(Debug, Default)]
pub struct CpPacket {
    segments: Vec<Segment>,
    slot: Option<PoolSlot>,
}

impl CpPacket {
    /// Create an empty packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty packet accounted against `pool`
    pub fn from_pool(pool: &BufferPool) -> Result<Self, InterfaceError> {
        Ok(Self {
            segments: Vec::new(),
            slot: Some(pool.alloc()?),
        })
    }

    /// Append owned bytes; empty input is ignored
    pub fn append(&mut self, bytes: Bytes) {
        if !bytes.is_empty() {
            self.segments.push(Segment::Owned(bytes));
        }
    }

    /// Insert owned bytes in front of every other segment
    pub fn prepend(&mut self, bytes: Bytes) {
        self.segments.insert(0, Segment::Owned(bytes));
    }

    /// Attach an external buffer without copying it
    pub fn attach_external(&mut self, buffer: &SharedExtBuffer) {
        debug!("Attaching external buffer of {} bytes", buffer.len());
        self.segments.push(Segment::External(buffer.attach()));
    }

    /// Total length in bytes
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.bytes().len()).sum()
    }

    /// Whether the packet carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packet segments in wire order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of attached external segments
    pub fn external_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::External(_)))
            .count()
    }

    /// Bytes owned by the packet itself, excluding external segments
    pub fn owned_len(&self) -> usize {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Owned(bytes) => Some(bytes.len()),
                Segment::External(_) => None,
            })
            .sum()
    }

    /// Linearize the packet as it appears on the wire
    pub fn to_contiguous(&self) -> Bytes {
        if let [Segment::Owned(bytes)] = self.segments.as_slice() {
            return bytes.clone();
        }
        let mut out = BytesMut::with_capacity(self.len());
        for segment in &self.segments {
            out.extend_from_slice(segment.bytes());
        }
        out.freeze()
    }
}

struct PoolInner {
    capacity: usize,
    in_use: AtomicUsize,
    allocs: AtomicUsize,
    frees: AtomicUsize,
}

/// Bounded accounting of in-flight packet buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool admitting at most `capacity` buffers at once
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                in_use: AtomicUsize::new(0),
                allocs: AtomicUsize::new(0),
                frees: AtomicUsize::new(0),
            }),
        }
    }

    /// Reserve one buffer slot
    pub fn alloc(&self) -> Result<PoolSlot, InterfaceError> {
        let reserved = self.inner.in_use.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            if n < self.inner.capacity {
                Some(n + 1)
            } else {
                None
            }
        });
        match reserved {
            Ok(_) => {
                self.inner.allocs.fetch_add(1, Ordering::Relaxed);
                Ok(PoolSlot { pool: Arc::clone(&self.inner) })
            }
            Err(in_use) => Err(InterfaceError::BufferFull(in_use)),
        }
    }

    /// Buffers currently in flight
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Total allocations and frees so far
    pub fn counters(&self) -> (usize, usize) {
        (
            self.inner.allocs.load(Ordering::Relaxed),
            self.inner.frees.load(Ordering::Relaxed),
        )
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A reserved pool slot, returned on drop
pub struct PoolSlot {
    pool: Arc<PoolInner>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
        self.pool.frees.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for PoolSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PoolSlot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    
    #[test]
    fn test_attach_counts_holders() {
        let shared = SharedExtBuffer::new(Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(shared.refcnt(), 0);
        
        let first = shared.attach();
        assert_eq!(shared.refcnt(), 1);
        let second = first.clone();
        assert_eq!(shared.refcnt(), 2);
        assert!(second.is_attached_to(&shared));
        
        drop(first);
        drop(second);
        assert_eq!(shared.refcnt(), 0);
    }
    
    #[test]
    fn test_free_callback_runs_once() {
        let freed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&freed);
        let shared = SharedExtBuffer::with_free_callback(
            Bytes::from_static(&[9; 16]),
            Box::new(move |data| {
                assert_eq!(data.len(), 16);
                assert!(!flag.swap(true, Ordering::SeqCst));
            }),
        );
        
        let mut packet = CpPacket::new();
        packet.append(Bytes::from_static(&[0xAA; 4]));
        packet.attach_external(&shared);
        assert_eq!(packet.len(), 20);
        assert_eq!(packet.owned_len(), 4);
        assert_eq!(packet.external_count(), 1);
        assert!(!freed.load(Ordering::SeqCst));
        
        drop(packet);
        assert!(freed.load(Ordering::SeqCst));
        assert_eq!(shared.refcnt(), 0);
    }
    
    #[test]
    fn test_packet_linearize() {
        let shared = SharedExtBuffer::new(Bytes::from_static(&[3, 4]));
        let mut packet = CpPacket::new();
        packet.append(Bytes::from_static(&[1, 2]));
        packet.attach_external(&shared);
        packet.append(Bytes::from_static(&[5]));
        packet.prepend(Bytes::from_static(&[0]));
        assert_eq!(packet.to_contiguous().as_ref(), &[0, 1, 2, 3, 4, 5]);
    }
    
    #[test]
    fn test_pool_exhaustion() {
        let pool = BufferPool::new(1);
        let packet = CpPacket::from_pool(&pool).unwrap();
        assert_eq!(pool.in_use(), 1);
        assert!(matches!(CpPacket::from_pool(&pool), Err(InterfaceError::BufferFull(1))));
        
        drop(packet);
        assert_eq!(pool.in_use(), 0);
        assert!(CpPacket::from_pool(&pool).is_ok());
        assert_eq!(pool.counters(), (2, 2));
    }
}
