use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const PENDING: u8 = 0;
const READY: u8 = 1;
const FAILED: u8 = 2;

/// Where the counter readback currently is. At most one copy is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadbackState {
    Idle,
    CopyRecorded,
    Mapping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowEvent {
    Started(u32),
    Cleared,
}

/// Turns the stream of per-frame truncated-cluster counts into transitions,
/// so the log gets one line when truncation starts and one when it stops.
#[derive(Debug, Default)]
pub struct OverflowTracker {
    last: u32,
}

impl OverflowTracker {
    pub fn observe(&mut self, overflowed: u32) -> Option<OverflowEvent> {
        let event = match (self.last, overflowed) {
            (0, 0) => None,
            (0, n) => Some(OverflowEvent::Started(n)),
            (_, 0) => Some(OverflowEvent::Cleared),
            _ => None,
        };
        self.last = overflowed;
        event
    }
}

/// GPU counter of clusters whose light list was truncated, read back
/// asynchronously a frame or more later.
pub struct OverflowProbe {
    counter: wgpu::Buffer,
    staging: wgpu::Buffer,
    state: ReadbackState,
    status: Arc<AtomicU8>,
    tracker: OverflowTracker,
}

impl OverflowProbe {
    pub fn new(device: &wgpu::Device) -> Self {
        let counter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ClusterOverflowCounter"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ClusterOverflowReadback"),
            size: 4,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            counter,
            staging,
            state: ReadbackState::Idle,
            status: Arc::new(AtomicU8::new(PENDING)),
            tracker: OverflowTracker::default(),
        }
    }

    pub fn counter(&self) -> &wgpu::Buffer {
        &self.counter
    }

    pub fn record_copy(&mut self, encoder: &mut wgpu::CommandEncoder) {
        if self.state != ReadbackState::Idle {
            return;
        }
        encoder.copy_buffer_to_buffer(&self.counter, 0, &self.staging, 0, 4);
        self.state = ReadbackState::CopyRecorded;
    }

    pub fn begin_map(&mut self) {
        if self.state != ReadbackState::CopyRecorded {
            return;
        }
        let status = Arc::clone(&self.status);
        self.staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let value = if result.is_ok() { READY } else { FAILED };
                status.store(value, Ordering::Release);
            });
        self.state = ReadbackState::Mapping;
    }

    pub fn poll(&mut self, device: &wgpu::Device, cap: u32) {
        if self.state != ReadbackState::Mapping {
            return;
        }
        if let Err(err) = device.poll(wgpu::PollType::Poll) {
            log::warn!("Device poll for cluster overflow failed: {err}");
        }

        match self.status.load(Ordering::Acquire) {
            PENDING => return,
            READY => {
                let overflowed = {
                    let view = self.staging.slice(..).get_mapped_range();
                    bytemuck::pod_read_unaligned::<u32>(&view[..4])
                };
                self.staging.unmap();
                match self.tracker.observe(overflowed) {
                    Some(OverflowEvent::Started(n)) => log::warn!(
                        "{} clusters exceed the {}-light cap; extra lights are dropped",
                        n,
                        cap
                    ),
                    Some(OverflowEvent::Cleared) => {
                        log::info!("Cluster light lists fit within the cap again")
                    }
                    None => {}
                }
            }
            _ => log::warn!("Cluster overflow readback failed"),
        }
        self.status.store(PENDING, Ordering::Release);
        self.state = ReadbackState::Idle;
    }

    pub fn release(self) {
        self.counter.destroy();
        self.staging.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_reports_transitions_only() {
        let mut tracker = OverflowTracker::default();
        assert_eq!(tracker.observe(0), None);
        assert_eq!(tracker.observe(3), Some(OverflowEvent::Started(3)));
        assert_eq!(tracker.observe(5), None);
        assert_eq!(tracker.observe(0), Some(OverflowEvent::Cleared));
        assert_eq!(tracker.observe(0), None);
    }
}
