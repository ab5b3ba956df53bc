use super::{
    error::{DeviceIndexOutOfRange, DeviceUnavailable},
    BufferUsage, DeviceEngine, DeviceEngineBuffer, DeviceEngineImage, DeviceEngineKernel,
    DeviceInfo, DeviceLost, DeviceOptions, EngineArg, ImageUsage, KernelDesc,
};
use crate::{
    buffer::{Extent3d, MappedBytes},
    module::spvmap::ArgKind,
    pixel::PixelType,
    scalar::ComponentType,
};
use anyhow::{anyhow, bail, Error, Result};
use bytemuck::{Pod, Zeroable};
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};
use vulkano::{
    buffer::{Buffer as VkBuffer, BufferCreateInfo, BufferUsage as VkBufferUsage, Subbuffer},
    command_buffer::{
        allocator::StandardCommandBufferAllocator, AutoCommandBufferBuilder, CommandBufferUsage,
        CopyBufferToImageInfo, CopyImageToBufferInfo, PrimaryAutoCommandBuffer,
        PrimaryCommandBufferAbstract,
    },
    descriptor_set::{
        allocator::StandardDescriptorSetAllocator,
        layout::{
            DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo,
            DescriptorType,
        },
        PersistentDescriptorSet, WriteDescriptorSet,
    },
    device::{Device, DeviceCreateInfo, Queue, QueueCreateInfo, QueueFlags},
    format::{Format, FormatFeatures},
    image::{
        view::ImageView, ImageCreateFlags, ImageDimensions, ImageUsage as VkImageUsage,
        StorageImage,
    },
    instance::{Instance, InstanceCreateInfo},
    library::VulkanLibrary,
    memory::allocator::{AllocationCreateInfo, MemoryUsage, StandardMemoryAllocator},
    pipeline::{
        layout::{PipelineLayout, PipelineLayoutCreateInfo},
        ComputePipeline, Pipeline, PipelineBindPoint,
    },
    shader::{ShaderModule, SpecializationConstants, SpecializationMapEntry},
    sync::GpuFuture,
};

fn vulkan_format(format: PixelType) -> Format {
    use ComponentType::*;
    match (format.component(), format.channels()) {
        (U8, 1) => Format::R8_UNORM,
        (U8, 2) => Format::R8G8_UNORM,
        (U8, _) => Format::R8G8B8A8_UNORM,
        (F16, 1) => Format::R16_SFLOAT,
        (F16, 2) => Format::R16G16_SFLOAT,
        (F16, _) => Format::R16G16B16A16_SFLOAT,
        (F32, 1) => Format::R32_SFLOAT,
        (F32, 2) => Format::R32G32_SFLOAT,
        (F32, _) => Format::R32G32B32A32_SFLOAT,
    }
}

pub(crate) struct Engine {
    info: Arc<DeviceInfo>,
    storage_formats: HashSet<Format>,
    sampled_formats: HashSet<Format>,
    memory_allocator: StandardMemoryAllocator,
    command_buffer_allocator: StandardCommandBufferAllocator,
    descriptor_set_allocator: StandardDescriptorSetAllocator,
    queue: Arc<Queue>,
    _instance: Arc<Instance>,
}

impl Engine {
    pub(crate) fn new(options: DeviceOptions) -> Result<Arc<Self>> {
        let DeviceOptions { index } = options;
        let library = VulkanLibrary::new().map_err(|e| Error::new(DeviceUnavailable).context(e))?;
        let instance = Instance::new(
            library,
            InstanceCreateInfo {
                enumerate_portability: true,
                ..InstanceCreateInfo::application_from_cargo_toml()
            },
        )?;
        let mut physical_devices = instance.enumerate_physical_devices()?;
        let devices = physical_devices.len();
        let physical_device = if let Some(physical_device) = physical_devices.nth(index) {
            physical_device
        } else {
            return Err(DeviceIndexOutOfRange { index, devices }.into());
        };
        let properties = physical_device.properties();
        let name = properties.device_name.clone();
        let max_workgroup_size = properties.max_compute_work_group_size;
        let max_workgroup_invocations = properties.max_compute_work_group_invocations;
        let mut storage_formats = HashSet::new();
        let mut sampled_formats = HashSet::new();
        for component in [ComponentType::U8, ComponentType::F16, ComponentType::F32] {
            for channels in [1, 2, 4] {
                let Some(pixel_type) = PixelType::new(component, channels) else {
                    continue;
                };
                let format = vulkan_format(pixel_type);
                let features = physical_device
                    .format_properties(format)?
                    .optimal_tiling_features;
                if features.intersects(FormatFeatures::STORAGE_IMAGE) {
                    storage_formats.insert(format);
                }
                if features.intersects(FormatFeatures::SAMPLED_IMAGE) {
                    sampled_formats.insert(format);
                }
            }
        }
        let compute_family = physical_device
            .queue_family_properties()
            .iter()
            .position(|x| {
                x.queue_flags.contains(QueueFlags::COMPUTE)
                    && !x.queue_flags.contains(QueueFlags::GRAPHICS)
            })
            .or_else(|| {
                physical_device
                    .queue_family_properties()
                    .iter()
                    .position(|x| x.queue_flags.contains(QueueFlags::COMPUTE))
            })
            .map(|x| x as u32)
            .ok_or_else(|| anyhow!("{name} has no compute queue"))?;
        let (device, mut queues) = Device::new(
            physical_device,
            DeviceCreateInfo {
                queue_create_infos: vec![QueueCreateInfo {
                    queue_family_index: compute_family,
                    queues: vec![1f32],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )?;
        let queue = queues
            .next()
            .ok_or_else(|| anyhow!("{name} created no queues"))?;
        let memory_allocator = StandardMemoryAllocator::new_default(device.clone());
        let command_buffer_allocator =
            StandardCommandBufferAllocator::new(device.clone(), Default::default());
        let descriptor_set_allocator = StandardDescriptorSetAllocator::new(device);
        tracing::info!(index, %name, "created vulkan device");
        let info = Arc::new(DeviceInfo {
            index: Some(index),
            name,
            max_workgroup_size,
            max_workgroup_invocations,
        });
        Ok(Arc::new(Self {
            info,
            storage_formats,
            sampled_formats,
            memory_allocator,
            command_buffer_allocator,
            descriptor_set_allocator,
            queue,
            _instance: instance,
        }))
    }
    fn command_buffer_builder(&self) -> Result<AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>> {
        Ok(AutoCommandBufferBuilder::primary(
            &self.command_buffer_allocator,
            self.queue.queue_family_index(),
            CommandBufferUsage::OneTimeSubmit,
        )?)
    }
    fn submit(&self, builder: AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>) -> Result<()> {
        let command_buffer = builder.build()?;
        command_buffer
            .execute(self.queue.clone())?
            .then_signal_fence_and_flush()?
            .wait(None)?;
        Ok(())
    }
    fn device(&self) -> &Arc<Device> {
        self.queue.device()
    }
}

impl DeviceEngine for Engine {
    type Buffer = Buffer;
    type Image = Image;
    type Kernel = Kernel;
    fn info(&self) -> &Arc<DeviceInfo> {
        &self.info
    }
    fn supports_format_use(&self, format: PixelType, usage: ImageUsage) -> bool {
        let format = vulkan_format(format);
        match usage {
            ImageUsage::ReadOnly => self.sampled_formats.contains(&format),
            ImageUsage::WriteOnly | ImageUsage::ReadWrite => self.storage_formats.contains(&format),
        }
    }
    fn copy_image_to_buffer(&self, src: &Image, dst: &Buffer) -> Result<()> {
        if dst.len < src.len {
            bail!(
                "buffer of {} bytes is too small for an image of {} bytes",
                dst.len,
                src.len
            );
        }
        let mut builder = self.command_buffer_builder()?;
        builder.copy_image_to_buffer(CopyImageToBufferInfo::image_buffer(
            src.inner.clone(),
            dst.inner.clone(),
        ))?;
        self.submit(builder)
    }
    fn copy_buffer_to_image(&self, src: &Buffer, dst: &Image) -> Result<()> {
        if src.len < dst.len {
            bail!(
                "buffer of {} bytes is too small for an image of {} bytes",
                src.len,
                dst.len
            );
        }
        let mut builder = self.command_buffer_builder()?;
        builder.copy_buffer_to_image(CopyBufferToImageInfo::buffer_image(
            src.inner.clone(),
            dst.inner.clone(),
        ))?;
        self.submit(builder)
    }
    fn wait(&self) -> Result<(), DeviceLost> {
        self.queue
            .with(|mut queue| queue.wait_idle())
            .map_err(|_| DeviceLost {
                index: self.info.index,
            })
    }
}

pub(crate) struct Buffer {
    inner: Subbuffer<[u8]>,
    len: usize,
}

impl Buffer {
    fn from_bytes(engine: &Engine, bytes: &[u8], usage: VkBufferUsage) -> Result<Self> {
        let len = bytes.len().max(4);
        let inner = VkBuffer::new_slice::<u8>(
            &engine.memory_allocator,
            BufferCreateInfo {
                usage,
                ..Default::default()
            },
            AllocationCreateInfo {
                usage: MemoryUsage::Upload,
                ..Default::default()
            },
            len as u64,
        )?;
        inner.write()?[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { inner, len })
    }
}

impl DeviceEngineBuffer for Buffer {
    type Engine = Engine;
    fn new(engine: &Arc<Engine>, len: usize, usage: BufferUsage) -> Result<Self> {
        if len == 0 {
            bail!("device buffers can not be empty");
        }
        let (buffer_usage, memory_usage) = match usage {
            BufferUsage::Storage => (
                VkBufferUsage::STORAGE_BUFFER
                    | VkBufferUsage::TRANSFER_SRC
                    | VkBufferUsage::TRANSFER_DST,
                MemoryUsage::Upload,
            ),
            BufferUsage::Staging => (
                VkBufferUsage::TRANSFER_SRC | VkBufferUsage::TRANSFER_DST,
                MemoryUsage::Download,
            ),
        };
        let inner = VkBuffer::new_slice::<u8>(
            &engine.memory_allocator,
            BufferCreateInfo {
                usage: buffer_usage,
                ..Default::default()
            },
            AllocationCreateInfo {
                usage: memory_usage,
                ..Default::default()
            },
            len as u64,
        )?;
        Ok(Self { inner, len })
    }
    fn len(&self) -> usize {
        self.len
    }
    fn map(&self) -> Result<MappedBytes<'_>> {
        Ok(MappedBytes::Device(self.inner.write()?))
    }
}

pub(crate) struct Image {
    inner: Arc<StorageImage>,
    view: Arc<ImageView<StorageImage>>,
    len: usize,
}

impl DeviceEngineImage for Image {
    type Engine = Engine;
    fn new(
        engine: &Arc<Engine>,
        extent: Extent3d,
        format: PixelType,
        usage: ImageUsage,
    ) -> Result<Self> {
        let Extent3d {
            width,
            height,
            depth,
        } = extent;
        let dimensions = if depth > 1 {
            ImageDimensions::Dim3d {
                width,
                height,
                depth,
            }
        } else {
            ImageDimensions::Dim2d {
                width,
                height,
                array_layers: 1,
            }
        };
        let kernel_usage = match usage {
            ImageUsage::ReadOnly => VkImageUsage::SAMPLED,
            ImageUsage::WriteOnly | ImageUsage::ReadWrite => VkImageUsage::STORAGE,
        };
        let inner = StorageImage::with_usage(
            &engine.memory_allocator,
            dimensions,
            vulkan_format(format),
            kernel_usage | VkImageUsage::TRANSFER_SRC | VkImageUsage::TRANSFER_DST,
            ImageCreateFlags::empty(),
            [engine.queue.queue_family_index()],
        )?;
        let view = ImageView::new_default(inner.clone())?;
        Ok(Self {
            inner,
            view,
            len: extent.len() * format.size(),
        })
    }
}

/// The workgroup size, as specialization constants 0, 1, and 2.
#[derive(Clone, Copy, Zeroable, Pod)]
#[repr(C)]
struct WorkgroupSizeConstants {
    x: u32,
    y: u32,
    z: u32,
}

unsafe impl SpecializationConstants for WorkgroupSizeConstants {
    fn descriptors() -> &'static [SpecializationMapEntry] {
        static DESCRIPTORS: [SpecializationMapEntry; 3] = [
            SpecializationMapEntry {
                constant_id: 0,
                offset: 0,
                size: 4,
            },
            SpecializationMapEntry {
                constant_id: 1,
                offset: 4,
                size: 4,
            },
            SpecializationMapEntry {
                constant_id: 2,
                offset: 8,
                size: 4,
            },
        ];
        &DESCRIPTORS
    }
}

/// Where one kernel argument is bound.
struct Binding {
    set: u32,
    binding: u32,
    kind: ArgKind,
}

pub(crate) struct Kernel {
    engine: Arc<Engine>,
    pipeline: Arc<ComputePipeline>,
    bindings: Vec<Binding>,
}

impl DeviceEngineKernel for Kernel {
    type Engine = Engine;
    fn new(engine: &Arc<Engine>, desc: &KernelDesc) -> Result<Self> {
        let device = engine.device();
        let mut bindings = Vec::with_capacity(desc.spec.args().len());
        let mut set_bindings = BTreeMap::<u32, BTreeMap<u32, DescriptorSetLayoutBinding>>::new();
        for arg in desc.spec.args() {
            let descriptor_type = match arg.kind() {
                ArgKind::Buffer | ArgKind::Pod => DescriptorType::StorageBuffer,
                ArgKind::PodUbo => DescriptorType::UniformBuffer,
                ArgKind::ReadOnlyImage => DescriptorType::SampledImage,
                ArgKind::WriteOnlyImage => DescriptorType::StorageImage,
                ArgKind::Sampler | ArgKind::Local => {
                    bail!(
                        "argument {:?} of kind {} is not supported",
                        arg.name(),
                        arg.kind()
                    );
                }
            };
            set_bindings.entry(arg.descriptor_set()).or_default().insert(
                arg.binding(),
                DescriptorSetLayoutBinding {
                    stages: vulkano::shader::ShaderStages::COMPUTE,
                    ..DescriptorSetLayoutBinding::descriptor_type(descriptor_type)
                },
            );
            bindings.push(Binding {
                set: arg.descriptor_set(),
                binding: arg.binding(),
                kind: arg.kind(),
            });
        }
        let num_sets = set_bindings.keys().last().map_or(0, |set| set + 1);
        let set_layouts = (0..num_sets)
            .map(|set| {
                DescriptorSetLayout::new(
                    device.clone(),
                    DescriptorSetLayoutCreateInfo {
                        bindings: set_bindings.remove(&set).unwrap_or_default(),
                        ..Default::default()
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pipeline_layout = PipelineLayout::new(
            device.clone(),
            PipelineLayoutCreateInfo {
                set_layouts,
                ..Default::default()
            },
        )?;
        let shader_module = unsafe { ShaderModule::from_words(device.clone(), desc.spirv)? };
        let entry_point = shader_module
            .entry_point(desc.spec.name())
            .ok_or_else(|| anyhow!("entry point {:?} not found", desc.spec.name()))?;
        let [x, y, z] = desc.workgroup_size.to_array();
        let pipeline = ComputePipeline::with_pipeline_layout(
            device.clone(),
            entry_point,
            &WorkgroupSizeConstants { x, y, z },
            pipeline_layout,
            None,
        )?;
        tracing::debug!(entry_point = desc.spec.name(), "created pipeline");
        Ok(Self {
            engine: engine.clone(),
            pipeline,
            bindings,
        })
    }
    fn dispatch(&self, groups: [u32; 3], args: &[EngineArg<Engine>]) -> Result<()> {
        let engine = &self.engine;
        let mut pod_buffers = Vec::new();
        let mut writes = BTreeMap::<u32, Vec<WriteDescriptorSet>>::new();
        for (binding, arg) in self.bindings.iter().zip(args) {
            let write = match arg {
                EngineArg::Buffer(buffer) => {
                    WriteDescriptorSet::buffer(binding.binding, buffer.inner.clone())
                }
                EngineArg::Image(image) => {
                    WriteDescriptorSet::image_view(binding.binding, image.view.clone())
                }
                EngineArg::Pod(bytes) => {
                    let usage = if binding.kind == ArgKind::PodUbo {
                        VkBufferUsage::UNIFORM_BUFFER
                    } else {
                        VkBufferUsage::STORAGE_BUFFER
                    };
                    let buffer = Buffer::from_bytes(engine, bytes, usage)?;
                    let write = WriteDescriptorSet::buffer(binding.binding, buffer.inner.clone());
                    pod_buffers.push(buffer);
                    write
                }
            };
            writes.entry(binding.set).or_default().push(write);
        }
        let layout = self.pipeline.layout();
        let mut builder = engine.command_buffer_builder()?;
        builder.bind_pipeline_compute(self.pipeline.clone());
        for (set, set_layout) in layout.set_layouts().iter().enumerate() {
            let set = set as u32;
            let descriptor_set = PersistentDescriptorSet::new(
                &engine.descriptor_set_allocator,
                set_layout.clone(),
                writes.remove(&set).unwrap_or_default(),
            )?;
            builder.bind_descriptor_sets(
                PipelineBindPoint::Compute,
                layout.clone(),
                set,
                descriptor_set,
            );
        }
        builder.dispatch(groups)?;
        engine.submit(builder)?;
        drop(pod_buffers);
        Ok(())
    }
}
