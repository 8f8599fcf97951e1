use ash::vk;
use slotmap::SlotMap;

use crate::render_graph::buffer_resource::RgBufferResource;
use crate::render_graph::image_resource::RgImageResource;
use crate::render_graph::resource_handle::{
    RgBufferHandle, RgBufferKey, RgBufferView, RgImageHandle, RgImageKey, RgImageView,
};

/// 资源注册表
///
/// 管理 RenderGraph 中所有声明的资源，提供虚拟句柄到资源信息的映射。
/// 资源存放在 SlotMap 中，只会追加，不会删除；注册顺序另外记录，供按顺序迭代和反查句柄。
pub struct RgResourceRegistry {
    /// 所属 graph 的 id，用于拦截其他 graph 的句柄
    graph: u32,
    /// 图像资源表
    images: SlotMap<RgImageKey, RgImageResource>,
    /// 缓冲区资源表
    buffers: SlotMap<RgBufferKey, RgBufferResource>,
    /// 按注册顺序排列的 key，下标即句柄的 id
    image_order: Vec<RgImageKey>,
    buffer_order: Vec<RgBufferKey>,
}

// new & init
impl RgResourceRegistry {
    pub fn new(graph: u32) -> Self {
        Self {
            graph,
            images: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            image_order: Vec::new(),
            buffer_order: Vec::new(),
        }
    }
}

// register
impl RgResourceRegistry {
    pub fn register_image(&mut self, rg_image_resource: RgImageResource) -> RgImageHandle {
        let key = self.images.insert(rg_image_resource);
        let id = self.image_order.len() as u32;
        self.image_order.push(key);
        RgImageHandle::new(key, id, self.graph)
    }

    pub fn register_buffer(&mut self, rg_buffer_resource: RgBufferResource) -> RgBufferHandle {
        let key = self.buffers.insert(rg_buffer_resource);
        let id = self.buffer_order.len() as u32;
        self.buffer_order.push(key);
        RgBufferHandle::new(key, id, self.graph)
    }
}

// getter & iter
impl RgResourceRegistry {
    #[inline]
    pub fn graph_id(&self) -> u32 {
        self.graph
    }

    #[inline]
    pub fn contains_image(&self, handle: RgImageHandle) -> bool {
        handle.graph == self.graph && self.images.contains_key(handle.key)
    }

    #[inline]
    pub fn contains_buffer(&self, handle: RgBufferHandle) -> bool {
        handle.graph == self.graph && self.buffers.contains_key(handle.key)
    }

    /// 获取图像资源
    ///
    /// # Panics
    /// 句柄属于其他 graph 或者不在表中
    pub fn image(&self, handle: RgImageHandle) -> &RgImageResource {
        self.check_graph(handle.graph, &handle);
        self.images
            .get(handle.key)
            .unwrap_or_else(|| panic!("{:?} is not registered in graph g{}", handle, self.graph))
    }

    pub fn image_mut(&mut self, handle: RgImageHandle) -> &mut RgImageResource {
        self.check_graph(handle.graph, &handle);
        let graph = self.graph;
        self.images
            .get_mut(handle.key)
            .unwrap_or_else(|| panic!("{:?} is not registered in graph g{}", handle, graph))
    }

    /// 获取缓冲区资源
    ///
    /// # Panics
    /// 句柄属于其他 graph 或者不在表中
    pub fn buffer(&self, handle: RgBufferHandle) -> &RgBufferResource {
        self.check_graph(handle.graph, &handle);
        self.buffers
            .get(handle.key)
            .unwrap_or_else(|| panic!("{:?} is not registered in graph g{}", handle, self.graph))
    }

    pub fn buffer_mut(&mut self, handle: RgBufferHandle) -> &mut RgBufferResource {
        self.check_graph(handle.graph, &handle);
        let graph = self.graph;
        self.buffers
            .get_mut(handle.key)
            .unwrap_or_else(|| panic!("{:?} is not registered in graph g{}", handle, graph))
    }

    /// 按注册顺序反查句柄
    ///
    /// # Panics
    /// id 超出已注册的图像数量
    #[inline]
    pub fn image_handle(&self, id: u32) -> RgImageHandle {
        RgImageHandle::new(self.image_order[id as usize], id, self.graph)
    }

    /// 按注册顺序反查句柄
    ///
    /// # Panics
    /// id 超出已注册的缓冲区数量
    #[inline]
    pub fn buffer_handle(&self, id: u32) -> RgBufferHandle {
        RgBufferHandle::new(self.buffer_order[id as usize], id, self.graph)
    }

    /// 把 view 的 mip 范围解析为 `(base, count)`
    ///
    /// # Panics
    /// mip 范围超出 image 的 mip 数量
    pub fn resolve_image_view(&self, view: RgImageView) -> (u32, u32) {
        let resource = self.image(view.image);
        view.mips.resolve(resource.desc.mip_levels).unwrap_or_else(|| {
            panic!(
                "mip range {:?} is out of bounds for image \"{}\" with {} mips",
                view.mips, resource.name, resource.desc.mip_levels
            )
        })
    }

    /// 把 view 的字节范围解析为 `(offset, size)`
    ///
    /// # Panics
    /// 字节范围超出 buffer 大小
    pub fn resolve_buffer_view(&self, view: RgBufferView) -> (vk::DeviceSize, vk::DeviceSize) {
        let resource = self.buffer(view.buffer);
        view.range.resolve(resource.size()).unwrap_or_else(|| {
            panic!(
                "byte range {:?} is out of bounds for buffer \"{}\" of {} bytes",
                view.range,
                resource.name,
                resource.size()
            )
        })
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// 按注册顺序迭代所有图像资源
    pub fn iter_images(&self) -> impl Iterator<Item = (RgImageHandle, &RgImageResource)> {
        let graph = self.graph;
        self.image_order
            .iter()
            .enumerate()
            .map(move |(id, &key)| (RgImageHandle::new(key, id as u32, graph), &self.images[key]))
    }

    /// 按注册顺序迭代所有缓冲区资源
    pub fn iter_buffers(&self) -> impl Iterator<Item = (RgBufferHandle, &RgBufferResource)> {
        let graph = self.graph;
        self.buffer_order
            .iter()
            .enumerate()
            .map(move |(id, &key)| (RgBufferHandle::new(key, id as u32, graph), &self.buffers[key]))
    }
}

// tools
impl RgResourceRegistry {
    fn check_graph(&self, graph: u32, handle: &dyn std::fmt::Debug) {
        assert_eq!(
            graph, self.graph,
            "{:?} belongs to another render graph (current graph: g{})",
            handle, self.graph
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::buffer_resource::RgBufferDesc;
    use crate::render_graph::image_resource::RgImageDesc;

    fn registry_with_image() -> (RgResourceRegistry, RgImageHandle) {
        let mut registry = RgResourceRegistry::new(42);
        let desc = RgImageDesc::new_2d(256, 256, vk::Format::R16G16B16A16_SFLOAT, vk::ImageUsageFlags::STORAGE)
            .with_full_mip_chain();
        let handle = registry.register_image(RgImageResource::transient("hdr", &desc));
        (registry, handle)
    }

    #[test]
    fn test_register_and_lookup() {
        let (mut registry, image) = registry_with_image();
        let buffer = registry.register_buffer(RgBufferResource::transient("counters", &RgBufferDesc::storage(64), true));

        assert_eq!(registry.image(image).name, "hdr");
        assert_eq!(registry.image(image).desc.mip_levels, 9);
        assert_eq!(registry.buffer(buffer).size(), 64);
        assert_eq!(registry.iter_images().count(), 1);
        assert!(registry.contains_image(image));
        assert_eq!(registry.image_handle(image.id()), image);
    }

    #[test]
    fn test_iteration_follows_registration_order() {
        let mut registry = RgResourceRegistry::new(5);
        let desc = RgImageDesc::new_2d(16, 16, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
        let handles: Vec<_> = ["albedo", "normal", "roughness"]
            .into_iter()
            .map(|name| registry.register_image(RgImageResource::transient(name, &desc)))
            .collect();

        let names: Vec<_> = registry.iter_images().map(|(_, image)| image.name.as_str()).collect();
        assert_eq!(names, vec!["albedo", "normal", "roughness"]);
        let ids: Vec<_> = registry.iter_images().map(|(handle, _)| handle.id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(registry.iter_images().map(|(handle, _)| handle).collect::<Vec<_>>(), handles);
    }

    #[test]
    fn test_resolve_views() {
        let (mut registry, image) = registry_with_image();
        let buffer = registry.register_buffer(RgBufferResource::transient("args", &RgBufferDesc::storage(64), false));

        assert_eq!(registry.resolve_image_view(image.full()), (0, 9));
        assert_eq!(registry.resolve_image_view(image.mip(4)), (4, 1));
        assert_eq!(registry.resolve_buffer_view(buffer.range(16, 16)), (16, 16));
    }

    #[test]
    #[should_panic(expected = "belongs to another render graph")]
    fn test_foreign_handle() {
        let (_registry, image) = registry_with_image();
        let other = RgResourceRegistry::new(7);
        other.image(image);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_mip_out_of_bounds() {
        let (registry, image) = registry_with_image();
        registry.resolve_image_view(image.mip(9));
    }
}
