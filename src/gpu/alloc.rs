//! Buffered device memory allocation
//!
//! Device arrays grow but never shrink: a reallocation only happens when the
//! requested logical size exceeds the current capacity, and the new capacity
//! is over-allocated geometrically so that n appends cost O(log n)
//! reallocations. Shrinking only updates the logical size.
//!
//! Buffer lifecycle is an explicit three-state machine
//! (`Uninitialized → Allocated → Released`) instead of the sentinel counts
//! the host engine tracks; a use after free or before first allocation is an
//! error, not a sentinel comparison.

use super::GpuDevice;
use anyhow::Result;
use bytemuck::Pod;
use std::marker::PhantomData;
use thiserror::Error;

/// Geometric over-allocation factor
///
/// Capacity grows by ~20% over the request, so repeated growth to n elements
/// triggers O(log n) reallocations.
const OVER_ALLOC_FACTOR: f64 = 1.19;

/// Compute the over-allocated capacity for a requested element count
///
/// Guarantees `over_alloc(n) >= n`, monotonicity in `n`, and `over_alloc(0) == 0`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn over_alloc(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    (n as f64 * OVER_ALLOC_FACTOR).ceil() as usize
}

/// Device buffer allocation errors
#[derive(Debug, Error)]
pub enum AllocError {
    /// Requested allocation exceeds what the device can provide
    #[error("Device allocation of {requested} bytes for '{label}' exceeds limit of {limit} bytes")]
    ExceedsDeviceLimit {
        /// Buffer label
        label: String,
        /// Requested size in bytes
        requested: u64,
        /// Device buffer size limit in bytes
        limit: u64,
    },

    /// Buffer accessed before its first allocation
    #[error("Device buffer '{label}' used before first allocation")]
    Uninitialized {
        /// Buffer label
        label: String,
    },

    /// Buffer accessed after release
    #[error("Device buffer '{label}' used after release")]
    UseAfterFree {
        /// Buffer label
        label: String,
    },
}

/// Allocation state of a device buffer
#[derive(Debug)]
enum BufferState {
    /// No device memory has ever been allocated
    Uninitialized,
    /// Device memory is live; `capacity` is the allocated element count
    Allocated {
        buf: wgpu::Buffer,
        capacity: usize,
    },
    /// Device memory has been released at owner teardown
    Released,
}

/// A growable device-resident array of POD elements
///
/// The logical element count `len` tracks what the current step uses;
/// `capacity` tracks what is allocated (`len <= capacity` always). A buffer
/// is never read before at least one write covering its logical size has
/// been enqueued.
///
/// Growth releases the old region, so any bind group referencing this buffer
/// must be rebuilt after a call to [`DeviceBuffer::realloc_buffered`] that
/// returns `true`.
#[derive(Debug)]
pub struct DeviceBuffer<T: Pod> {
    label: String,
    usage: wgpu::BufferUsages,
    state: BufferState,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> DeviceBuffer<T> {
    /// Create an uninitialized buffer; no device memory is allocated yet
    #[must_use]
    pub fn new(label: impl Into<String>, usage: wgpu::BufferUsages) -> Self {
        Self {
            label: label.into(),
            usage,
            state: BufferState::Uninitialized,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Logical element count
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical size is zero
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity in elements, if live
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        match self.state {
            BufferState::Allocated { capacity, .. } => Some(capacity),
            _ => None,
        }
    }

    /// Whether device memory is currently live
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        matches!(self.state, BufferState::Allocated { .. })
    }

    /// Size of one element in bytes
    #[must_use]
    pub const fn stride() -> usize {
        std::mem::size_of::<T>()
    }

    /// Buffered reallocation, optionally followed by an async H2D copy
    ///
    /// No allocation happens when `req_len` fits the current capacity; the
    /// logical size is updated unconditionally. On growth the old region is
    /// released first and the new capacity is [`over_alloc`]`(req_len)`.
    /// When `host_src` is given, its first `req_len` elements are enqueued
    /// for upload; ordering against later submissions on the same queue is
    /// preserved.
    ///
    /// Returns `true` when a (re)allocation took place — cached bind groups
    /// referencing this buffer are stale from that point.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ExceedsDeviceLimit`] when the over-allocated
    /// byte size cannot be provided by the device. This is fatal for the
    /// caller: the step cannot proceed without its working set.
    pub fn realloc_buffered(
        &mut self,
        device: &GpuDevice,
        host_src: Option<&[T]>,
        req_len: usize,
    ) -> Result<bool, AllocError> {
        let grew = if req_len > self.capacity().unwrap_or(0) {
            // Release before allocating; capacity never shrinks back.
            let capacity = over_alloc(req_len);
            let bytes = (capacity * Self::stride()) as u64;
            let limit = device.device().limits().max_buffer_size;
            if bytes > limit {
                return Err(AllocError::ExceedsDeviceLimit {
                    label: self.label.clone(),
                    requested: bytes,
                    limit,
                });
            }
            tracing::debug!(
                label = %self.label,
                capacity,
                bytes,
                "growing device buffer"
            );
            let buf = device.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some(&self.label),
                size: bytes,
                usage: self.usage,
                mapped_at_creation: false,
            });
            self.state = BufferState::Allocated { buf, capacity };
            true
        } else {
            false
        };

        // Size can change without an actual reallocation.
        self.len = req_len;

        if let Some(src) = host_src {
            self.upload(device, &src[..req_len], 0)?;
        }

        Ok(grew)
    }

    /// Enqueue an async H2D copy of `data` starting at `elem_offset`
    ///
    /// # Errors
    ///
    /// Returns an error when the buffer is not live.
    pub fn upload(
        &self,
        device: &GpuDevice,
        data: &[T],
        elem_offset: usize,
    ) -> Result<(), AllocError> {
        if data.is_empty() {
            return Ok(());
        }
        let buf = self.raw()?;
        let offset = (elem_offset * Self::stride()) as u64;
        device
            .queue()
            .write_buffer(buf, offset, bytemuck::cast_slice(data));
        Ok(())
    }

    /// Enqueue a zero-fill of the whole allocated capacity
    ///
    /// Used after a growth event so stale data can never leak into an
    /// accumulator that is only partially rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error when the buffer is not live.
    pub fn clear_all(
        &self,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<(), AllocError> {
        let buf = self.raw()?;
        encoder.clear_buffer(buf, 0, None);
        Ok(())
    }

    /// Release the device memory; the buffer can only be reused through
    /// [`DeviceBuffer::realloc_buffered`]
    pub fn free(&mut self) {
        if matches!(self.state, BufferState::Allocated { .. }) {
            // Dropping the wgpu handle releases the region.
            self.state = BufferState::Released;
        }
        self.len = 0;
    }

    /// Access the underlying wgpu buffer
    ///
    /// # Errors
    ///
    /// Returns an error when uninitialized or released.
    pub fn raw(&self) -> Result<&wgpu::Buffer, AllocError> {
        match &self.state {
            BufferState::Allocated { buf, .. } => Ok(buf),
            BufferState::Uninitialized => Err(AllocError::Uninitialized {
                label: self.label.clone(),
            }),
            BufferState::Released => Err(AllocError::UseAfterFree {
                label: self.label.clone(),
            }),
        }
    }

    /// Bind-group resource for the whole buffer
    ///
    /// # Errors
    ///
    /// Returns an error when the buffer is not live.
    pub fn binding(&self) -> Result<wgpu::BindingResource<'_>, AllocError> {
        Ok(self.raw()?.as_entire_binding())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
        .union(wgpu::BufferUsages::COPY_DST)
        .union(wgpu::BufferUsages::COPY_SRC);

    #[test]
    fn over_alloc_covers_request() {
        for n in [0, 1, 7, 100, 1000, 1_000_000] {
            assert!(over_alloc(n) >= n, "over_alloc({n}) must cover the request");
        }
        assert_eq!(over_alloc(0), 0);
    }

    #[test]
    fn over_alloc_growth_is_geometric() {
        // Growing one element at a time to 100k must reallocate only
        // logarithmically often.
        let mut capacity = 0usize;
        let mut growths = 0usize;
        for n in 1..=100_000 {
            if n > capacity {
                capacity = over_alloc(n);
                growths += 1;
            }
        }
        assert!(growths < 100, "expected O(log n) growths, got {growths}");
    }

    #[test]
    fn uninitialized_buffer_has_no_capacity() {
        let buf: DeviceBuffer<f32> = DeviceBuffer::new("test", STORAGE);
        assert_eq!(buf.capacity(), None);
        assert_eq!(buf.len(), 0);
        assert!(!buf.is_allocated());
        assert!(matches!(buf.raw(), Err(AllocError::Uninitialized { .. })));
    }

    #[test]
    fn stride_matches_element_type() {
        assert_eq!(DeviceBuffer::<f32>::stride(), 4);
        assert_eq!(DeviceBuffer::<[f32; 4]>::stride(), 16);
    }

    #[tokio::test]
    async fn growth_is_monotone_and_shrink_is_free() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping growth_is_monotone_and_shrink_is_free: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut buf: DeviceBuffer<f32> = DeviceBuffer::new("mono", STORAGE);

        let grew = buf.realloc_buffered(&device, None, 1000).unwrap();
        assert!(grew);
        let cap = buf.capacity().unwrap();
        assert!(cap >= 1000);
        assert_eq!(buf.len(), 1000);

        // Shrinking updates the logical size only.
        let grew = buf.realloc_buffered(&device, None, 500).unwrap();
        assert!(!grew);
        assert_eq!(buf.capacity().unwrap(), cap);
        assert_eq!(buf.len(), 500);

        // Growing within capacity is also free.
        let grew = buf.realloc_buffered(&device, None, cap).unwrap();
        assert!(!grew);
        assert_eq!(buf.capacity().unwrap(), cap);
    }

    #[tokio::test]
    async fn upload_on_realloc_keeps_logical_size() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping upload_on_realloc_keeps_logical_size: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut buf: DeviceBuffer<u32> = DeviceBuffer::new("upload", STORAGE);

        let host: Vec<u32> = (0..256).collect();
        buf.realloc_buffered(&device, Some(&host), host.len()).unwrap();
        assert_eq!(buf.len(), 256);
        assert!(buf.capacity().unwrap() >= 256);
    }

    #[tokio::test]
    async fn free_makes_buffer_unusable() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping free_makes_buffer_unusable: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut buf: DeviceBuffer<f32> = DeviceBuffer::new("freed", STORAGE);
        buf.realloc_buffered(&device, None, 16).unwrap();
        buf.free();
        assert!(!buf.is_allocated());
        assert_eq!(buf.len(), 0);
        assert!(matches!(buf.raw(), Err(AllocError::UseAfterFree { .. })));
    }

    #[tokio::test]
    async fn oversized_request_is_fatal_with_size() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping oversized_request_is_fatal_with_size: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let mut buf: DeviceBuffer<[f32; 4]> = DeviceBuffer::new("huge", STORAGE);
        let limit = device.device().limits().max_buffer_size;
        let too_many = usize::try_from(limit / 16).unwrap() + 1;

        let err = buf.realloc_buffered(&device, None, too_many).unwrap_err();
        match err {
            AllocError::ExceedsDeviceLimit { requested, .. } => {
                assert!(requested > limit);
            }
            other => panic!("expected ExceedsDeviceLimit, got {other}"),
        }
    }
}
