use std::marker::PhantomData;
use std::mem;

use bytemuck::Pod;

pub struct UniformBuffer<T: Pod> {
    buffer: wgpu::Buffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    pub fn new(device: &wgpu::Device, label: &str) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: mem::size_of::<T>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            _marker: PhantomData,
        }
    }

    pub fn write(&self, queue: &wgpu::Queue, value: &T) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(value));
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    pub fn release(self) {
        self.buffer.destroy();
    }
}

/// Growable array of `T` in a storage buffer. Capacity only grows; callers
/// rebuild bind groups when [`StorageBuffer::write`] reports a reallocation.
pub struct StorageBuffer<T: Pod> {
    buffer: wgpu::Buffer,
    capacity: u32,
    len: u32,
    label: &'static str,
    _marker: PhantomData<T>,
}

impl<T: Pod> StorageBuffer<T> {
    pub fn new(device: &wgpu::Device, label: &'static str, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Self::allocate(device, label, capacity),
            capacity,
            len: 0,
            label,
            _marker: PhantomData,
        }
    }

    fn allocate(device: &wgpu::Device, label: &str, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity as u64 * mem::size_of::<T>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Uploads `items`, growing first if needed. Returns `true` when the
    /// underlying buffer was replaced.
    pub fn write(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, items: &[T]) -> bool {
        let required = items.len() as u32;
        let grew = required > self.capacity;
        if grew {
            let new_capacity = required.max(self.capacity * 2).max(1);
            log::info!(
                "Growing {}: {} -> {}",
                self.label,
                self.capacity,
                new_capacity
            );
            self.buffer.destroy();
            self.buffer = Self::allocate(device, self.label, new_capacity);
            self.capacity = new_capacity;
        }

        if !items.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(items));
        }
        self.len = required;
        grew
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    pub fn release(self) {
        self.buffer.destroy();
    }
}
