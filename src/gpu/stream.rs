//! Per-region execution streams and completion waits
//!
//! One stream exists per active interaction region. Work submitted through
//! one stream executes in submission order; nothing here introduces
//! ordering between the two regions, so non-local force work overlaps
//! local-region communication. Enqueuing never blocks — only the explicit
//! waits at step boundaries do.

use super::GpuDevice;
use crate::config::SyncMode;
use anyhow::{Context, Result};
use bytemuck::Pod;

/// Submission context for one interaction region
#[derive(Debug, Clone, Copy)]
pub struct RegionStream {
    sync: SyncMode,
}

impl RegionStream {
    /// Create a stream with the run's completion-wait discipline
    #[must_use]
    pub const fn new(sync: SyncMode) -> Self {
        Self { sync }
    }

    /// Completion-wait discipline in effect
    #[must_use]
    pub const fn sync_mode(&self) -> SyncMode {
        self.sync
    }

    /// Submit an encoded command buffer; returns immediately
    pub fn submit(&self, device: &GpuDevice, encoder: wgpu::CommandEncoder) {
        device.queue().submit(Some(encoder.finish()));
    }

    /// Flush staged uploads without submitting new work
    pub fn flush(&self, device: &GpuDevice) {
        device.queue().submit(std::iter::empty());
    }

    /// Block until all submitted work for this stream has completed
    ///
    /// `BlockingWait` parks in the driver; `BusyPoll` spins on queue-empty
    /// polls, trading CPU for the blocking-wait penalty some platforms
    /// carry.
    pub fn wait(&self, device: &GpuDevice) {
        match self.sync {
            SyncMode::BlockingWait => {
                device.device().poll(wgpu::Maintain::Wait);
            }
            SyncMode::BusyPoll => loop {
                if device.device().poll(wgpu::Maintain::Poll).is_queue_empty() {
                    break;
                }
                std::hint::spin_loop();
            },
        }
    }
}

/// Copy a device buffer back to host memory
///
/// Stages the first `elems` elements through a mapped staging buffer. The
/// copy is submitted immediately; the await completes once the map is
/// ready. Callers choose where this blocks by where they await.
///
/// # Errors
///
/// Returns an error when the staging copy or the mapping fails.
pub async fn read_back<T: Pod>(
    device: &GpuDevice,
    src: &wgpu::Buffer,
    elems: usize,
) -> Result<Vec<T>> {
    let size = (elems * std::mem::size_of::<T>()) as u64;
    let staging = device.create_buffer(
        "readback staging",
        size,
        wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
    )?;

    let mut encoder = device
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    device.queue().submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device.device().poll(wgpu::Maintain::Wait);
    rx.receive()
        .await
        .context("Failed to receive map result")?
        .context("Buffer mapping failed")?;

    let data = slice.get_mapped_range();
    let out: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_records_sync_mode() {
        let stream = RegionStream::new(SyncMode::BusyPoll);
        assert_eq!(stream.sync_mode(), SyncMode::BusyPoll);
    }

    #[tokio::test]
    async fn readback_roundtrips_uploaded_data() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping readback_roundtrips_uploaded_data: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();
        let host: Vec<u32> = (0..128).collect();
        let buffer = device
            .create_buffer_init(
                "roundtrip",
                bytemuck::cast_slice(&host),
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            )
            .unwrap();

        let back: Vec<u32> = read_back(&device, &buffer, host.len()).await.unwrap();
        assert_eq!(back, host);
    }

    #[tokio::test]
    async fn both_wait_disciplines_drain_the_queue() {
        if !GpuDevice::is_gpu_available().await {
            eprintln!("⚠️  Skipping both_wait_disciplines_drain_the_queue: GPU not available");
            return;
        }
        let device = GpuDevice::new().await.unwrap();

        for sync in [SyncMode::BlockingWait, SyncMode::BusyPoll] {
            let stream = RegionStream::new(sync);
            let encoder = device
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
            stream.submit(&device, encoder);
            stream.wait(&device);
        }
    }
}
