//! Bounded pool of reusable pixel buffers
//!
//! The pool keeps up to `capacity` slots, each holding the storage for one picture of a
//! given (width, height, format) shape plus an explicit borrow counter. A slot is
//! handed out only while its counter is zero; the [`BufferLease`] (and, after
//! freezing, the last [`PixelBuffer`](crate::buffer::PixelBuffer) clone holding it)
//! gives the storage back and decrements the counter when dropped.
//!
//! Every pool operation runs under one exclusive lock. Critical sections are linear in
//! the number of slots, perform no I/O and never call out to consumer code.
//!
//! # Example
//!
//! ```rust
//! use rtcsource_media::{BufferPool, PixelFormat};
//!
//! let pool = BufferPool::new(2);
//! let first = pool.acquire(640, 480, PixelFormat::I420).unwrap();
//! let slot = first.slot_id();
//! drop(first);
//!
//! // Same shape again: the same slot comes back
//! let again = pool.acquire(640, 480, PixelFormat::I420).unwrap();
//! assert_eq!(again.slot_id(), slot);
//! ```

use crate::buffer::{tight_layout, Plane, PixelBuffer};
use crate::error::{MediaError, MediaResult};
use crate::format::PixelFormat;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Statistics about pool usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Maximum number of live slots
    pub capacity: usize,
    /// Slots currently held by the pool
    pub live: usize,
    /// Live slots currently lent out
    pub borrowed: usize,
    /// Acquisitions served by an existing slot
    pub reused: u64,
    /// Acquisitions that allocated a new slot
    pub allocated: u64,
    /// Acquisitions that failed with `PoolExhausted`
    pub exhausted: u64,
}

/// Pool of reusable pixel buffers keyed by shape
pub struct BufferPool {
    state: Mutex<PoolState>,
}

struct PoolState {
    capacity: usize,
    slots: Vec<Slot>,
    next_slot_id: u64,
    reused: u64,
    allocated: u64,
    exhausted: u64,
}

struct Slot {
    id: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    shared: Arc<SlotShared>,
}

impl Slot {
    fn matches(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }

    fn is_borrowed(&self) -> bool {
        self.shared.borrow_count.load(Ordering::Acquire) > 0
    }
}

/// State shared between a slot and the lease currently borrowing it
pub(crate) struct SlotShared {
    borrow_count: AtomicUsize,
    /// Storage parked here while the slot is not lent out
    storage: Mutex<Option<Vec<u8>>>,
}

impl BufferPool {
    /// Create an empty pool that will hold at most `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                capacity,
                slots: Vec::with_capacity(capacity),
                next_slot_id: 1,
                reused: 0,
                allocated: 0,
                exhausted: 0,
            }),
        }
    }

    /// Borrow a buffer of the given shape
    ///
    /// Slots of any other shape are purged first. Returns
    /// [`MediaError::PoolExhausted`] when every matching slot is borrowed and the pool
    /// is full; the caller then falls back to [`BufferLease::unpooled`] or drops work.
    pub fn acquire(&self, width: u32, height: u32, format: PixelFormat) -> MediaResult<BufferLease> {
        check_shape(width, height, format)?;
        let (planes, size) = tight_layout(format, width, height);

        let mut state = self.state.lock();
        state.slots.retain(|slot| slot.matches(width, height, format));

        if let Some(slot) = state.slots.iter().find(|slot| !slot.is_borrowed()) {
            slot.shared.borrow_count.fetch_add(1, Ordering::AcqRel);
            let storage = slot
                .shared
                .storage
                .lock()
                .take()
                .filter(|data| data.len() == size)
                .unwrap_or_else(|| vec![0; size]);
            let lease = BufferLease {
                width,
                height,
                format,
                planes,
                data: storage,
                slot: Some(SlotRef {
                    id: slot.id,
                    shared: slot.shared.clone(),
                }),
            };
            state.reused += 1;
            return Ok(lease);
        }

        if state.slots.len() < state.capacity {
            let id = state.next_slot_id;
            state.next_slot_id += 1;
            let shared = Arc::new(SlotShared {
                borrow_count: AtomicUsize::new(1),
                storage: Mutex::new(None),
            });
            state.slots.push(Slot {
                id,
                width,
                height,
                format,
                shared: shared.clone(),
            });
            state.allocated += 1;
            trace!("Allocated pool slot {} for {}x{} {:?}", id, width, height, format);
            return Ok(BufferLease {
                width,
                height,
                format,
                planes,
                data: vec![0; size],
                slot: Some(SlotRef { id, shared }),
            });
        }

        state.exhausted += 1;
        Err(MediaError::PoolExhausted {
            capacity: state.capacity,
        })
    }

    /// Borrow from the pool, falling back to an unpooled allocation when exhausted
    pub fn acquire_or_unpooled(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> MediaResult<BufferLease> {
        match self.acquire(width, height, format) {
            Err(MediaError::PoolExhausted { .. }) => {
                debug!("Pool exhausted, using unpooled {}x{} buffer", width, height);
                BufferLease::unpooled(format, width, height)
            }
            other => other,
        }
    }

    /// Change the capacity
    ///
    /// Fails without side effects when more slots are borrowed than `new_capacity`.
    /// Otherwise evicts unborrowed slots until the live count fits.
    pub fn resize(&self, new_capacity: usize) -> bool {
        let mut state = self.state.lock();
        let borrowed = state.slots.iter().filter(|slot| slot.is_borrowed()).count();
        if borrowed > new_capacity {
            debug!(
                "Refusing pool resize to {}: {} slots borrowed",
                new_capacity, borrowed
            );
            return false;
        }

        state.capacity = new_capacity;
        while state.slots.len() > new_capacity {
            match state.slots.iter().position(|slot| !slot.is_borrowed()) {
                Some(index) => {
                    state.slots.remove(index);
                }
                // Unreachable while borrowed <= new_capacity; borrows only start under
                // this lock.
                None => break,
            }
        }
        true
    }

    /// Drop every slot, borrowed or not
    ///
    /// Outstanding leases stay valid; their storage is freed instead of returned.
    pub fn release(&self) {
        let mut state = self.state.lock();
        let dropped = state.slots.len();
        state.slots.clear();
        if dropped > 0 {
            debug!("Released {} pool slots", dropped);
        }
    }

    /// Maximum number of live slots
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: state.capacity,
            live: state.slots.len(),
            borrowed: state.slots.iter().filter(|slot| slot.is_borrowed()).count(),
            reused: state.reused,
            allocated: state.allocated,
            exhausted: state.exhausted,
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}

fn check_shape(width: u32, height: u32, format: PixelFormat) -> MediaResult<()> {
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidConfiguration {
            message: format!("Invalid buffer dimensions {}x{}", width, height),
        });
    }
    if format == PixelFormat::Native {
        return Err(MediaError::UnsupportedFormat {
            format: "native buffers cannot be allocated in memory".to_string(),
        });
    }
    Ok(())
}

struct SlotRef {
    id: u64,
    shared: Arc<SlotShared>,
}

/// Writable picture storage, pooled or not
///
/// Producers fill the planes and then [`freeze`](BufferLease::freeze) the lease into an
/// immutable [`PixelBuffer`].
pub struct BufferLease {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: [Plane; 3],
    data: Vec<u8>,
    slot: Option<SlotRef>,
}

impl BufferLease {
    /// Allocate a tightly packed buffer that never returns to a pool
    pub fn unpooled(format: PixelFormat, width: u32, height: u32) -> MediaResult<Self> {
        check_shape(width, height, format)?;
        let (planes, size) = tight_layout(format, width, height);
        Ok(Self {
            width,
            height,
            format,
            planes,
            data: vec![0; size],
            slot: None,
        })
    }

    /// Wrap caller-provided bytes with an explicit plane layout
    pub(crate) fn from_parts(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: [Plane; 3],
        data: Vec<u8>,
    ) -> Self {
        Self {
            width,
            height,
            format,
            planes,
            data,
            slot: None,
        }
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel format
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Row length of `plane` in bytes (0 for planes the format lacks)
    pub fn stride(&self, plane: usize) -> usize {
        self.plane_layout(plane).map(|p| p.stride).unwrap_or(0)
    }

    /// Read access to `plane`
    pub fn plane(&self, plane: usize) -> &[u8] {
        match self.plane_layout(plane) {
            Some(p) => &self.data[p.offset..p.offset + p.len],
            None => &[],
        }
    }

    /// Write access to `plane`
    pub fn plane_mut(&mut self, plane: usize) -> &mut [u8] {
        match self.plane_layout(plane) {
            Some(p) => &mut self.data[p.offset..p.offset + p.len],
            None => &mut [],
        }
    }

    /// Identity of the pool slot backing this lease
    pub fn slot_id(&self) -> Option<u64> {
        self.slot.as_ref().map(|slot| slot.id)
    }

    /// Whether the storage returns to a pool
    pub fn is_pooled(&self) -> bool {
        self.slot.is_some()
    }

    /// Freeze into an immutable, shareable buffer
    pub fn freeze(self) -> PixelBuffer {
        PixelBuffer::from_lease(self)
    }

    pub(crate) fn plane_layout(&self, plane: usize) -> Option<Plane> {
        (plane < self.format.plane_count()).then(|| self.planes[plane])
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            *slot.shared.storage.lock() = Some(std::mem::take(&mut self.data));
            slot.shared.borrow_count.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferLease")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("slot", &self.slot_id())
            .finish()
    }
}
