use slotmap::new_key_type;

// 物理资源句柄，由 GfxResourceFactory / GfxPipelineCompiler 分配
//
// 渲染图内部的虚拟句柄（RgImageHandle 等）与这些物理句柄分离。
new_key_type! {
    /// 物理 Image 句柄
    pub struct GfxImageHandle;
    /// 物理 Buffer 句柄
    pub struct GfxBufferHandle;
    /// Sampler 句柄
    pub struct GfxSamplerHandle;
    /// 用于放置 transient 资源的显存堆
    pub struct GfxHeapHandle;
    /// GPU 侧的 descriptor set
    pub struct GfxDescriptorSetHandle;
    /// 编译后的 shader
    pub struct GfxShaderId;
    /// 编译后的 pipeline（shader + 固定管线状态）
    pub struct GfxPipelineId;
}
