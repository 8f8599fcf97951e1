/// debug label 使用的颜色
pub struct LabelColor;
impl LabelColor {
    const GREEN: glam::Vec4 = glam::vec4(0.0, 1.0, 0.0, 1.0);
    const BLUE: glam::Vec4 = glam::vec4(0.0, 0.0, 1.0, 1.0);
    const YELLOW: glam::Vec4 = glam::vec4(1.0, 1.0, 0.0, 1.0);
    const MAGENTA: glam::Vec4 = glam::vec4(1.0, 0.0, 1.0, 1.0);
    const GRAY: glam::Vec4 = glam::vec4(0.5, 0.5, 0.5, 1.0);

    /// 普通 compute / render 节点
    pub const COLOR_PASS: glam::Vec4 = Self::BLUE;
    /// render pass 内部的 subpass
    pub const COLOR_SUBPASS: glam::Vec4 = Self::YELLOW;
    /// copy / blit / fill / clear 等传输节点
    pub const COLOR_TRANSFER: glam::Vec4 = Self::GRAY;
    /// 整个 graph 的外层 label
    pub const COLOR_GRAPH: glam::Vec4 = Self::GREEN;
    /// graph 结尾的导出 barrier
    pub const COLOR_EXPORT: glam::Vec4 = Self::MAGENTA;
}
