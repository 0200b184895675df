use ash::vk;
use itertools::Itertools;

/// 一次 dynamic rendering 的静态描述：附件格式和渲染范围
///
/// 创建 pipeline 和录制 secondary buffer 都只需要这份描述，
/// 不需要实际的 image view
#[derive(Clone, Debug)]
pub struct RenderPassDesc {
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub extent: vk::Extent2D,
    /// 渲染内容是否由 secondary command buffer 提供
    pub use_secondary_buffers: bool,
}

/// 附件的实际 image view，数量必须和 [`RenderPassDesc`] 一致
#[derive(Clone, Debug, Default)]
pub struct RenderAttachments {
    pub color_views: Vec<vk::ImageView>,
    pub depth_view: Option<vk::ImageView>,
}

impl RenderPassDesc {
    /// 校验 desc 自身以及和附件的匹配关系
    ///
    /// 返回第一个发现的问题，调用方通常直接 assert
    pub fn validate(&self, attachments: &RenderAttachments) -> Result<(), String> {
        if self.color_formats.is_empty() && self.depth_format.is_none() {
            return Err("render pass needs at least one attachment".to_string());
        }
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(format!("render area is empty: {}x{}", self.extent.width, self.extent.height));
        }
        if self.color_formats.len() != attachments.color_views.len() {
            return Err(format!(
                "color attachment count mismatch: desc has {}, got {} views",
                self.color_formats.len(),
                attachments.color_views.len()
            ));
        }
        if self.depth_format.is_some() != attachments.depth_view.is_some() {
            return Err(format!(
                "depth attachment mismatch: desc expects depth = {}, view present = {}",
                self.depth_format.is_some(),
                attachments.depth_view.is_some()
            ));
        }
        Ok(())
    }
}

/// vk::RenderingInfo 的封装，持有附件信息的内存
pub struct RenderingInfo {
    color_attach_info: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attach_info: Option<vk::RenderingAttachmentInfo<'static>>,
    range: vk::Rect2D,
    flags: vk::RenderingFlags,
}

impl RenderingInfo {
    pub fn new(desc: &RenderPassDesc, attachments: &RenderAttachments) -> Self {
        let flags = if desc.use_secondary_buffers {
            vk::RenderingFlags::CONTENTS_SECONDARY_COMMAND_BUFFERS
        } else {
            vk::RenderingFlags::empty()
        };
        Self {
            color_attach_info: attachments.color_views.iter().map(|view| Self::color_attachment(*view)).collect_vec(),
            depth_attach_info: attachments.depth_view.map(Self::depth_attachment),
            range: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: desc.extent,
            },
            flags,
        }
    }

    pub fn rendering_info(&self) -> vk::RenderingInfo<'_> {
        let mut info = vk::RenderingInfo::default()
            .flags(self.flags)
            .layer_count(1)
            .render_area(self.range)
            .color_attachments(&self.color_attach_info);
        if let Some(depth_attach) = &self.depth_attach_info {
            info = info.depth_attachment(depth_attach)
        }
        info
    }

    fn color_attachment(image_view: vk::ImageView) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .image_view(image_view)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0_f32, 0_f32, 0_f32, 1_f32],
                },
            })
    }

    fn depth_attachment(depth_image_view: vk::ImageView) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .image_view(depth_image_view)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1_f32, // 1 表示无限远
                    stencil: 0,
                },
            })
    }
}

/// secondary command buffer 录制时需要继承的渲染状态
///
/// 只包含格式信息，primary 侧实际绑定哪些 image view 与 secondary 无关
pub struct RenderInheritance {
    color_formats: Vec<vk::Format>,
    depth_format: vk::Format,
}

impl RenderInheritance {
    pub fn new(desc: &RenderPassDesc) -> Self {
        Self {
            color_formats: desc.color_formats.clone(),
            depth_format: desc.depth_format.unwrap_or(vk::Format::UNDEFINED),
        }
    }

    pub fn inheritance_rendering_info(&self) -> vk::CommandBufferInheritanceRenderingInfo<'_> {
        vk::CommandBufferInheritanceRenderingInfo::default()
            .color_attachment_formats(&self.color_formats)
            .depth_attachment_format(self.depth_format)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> RenderPassDesc {
        RenderPassDesc {
            color_formats: vec![vk::Format::R8G8B8A8_UNORM],
            depth_format: Some(vk::Format::D32_SFLOAT),
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            use_secondary_buffers: false,
        }
    }

    fn views() -> RenderAttachments {
        use vk::Handle;
        RenderAttachments {
            color_views: vec![vk::ImageView::from_raw(1)],
            depth_view: Some(vk::ImageView::from_raw(2)),
        }
    }

    #[test]
    fn matching_desc_and_views_pass() {
        assert!(desc().validate(&views()).is_ok());
    }

    /// 附件数量必须一致
    #[test]
    fn color_count_mismatch_is_rejected() {
        let mut attachments = views();
        attachments.color_views.clear();
        assert!(desc().validate(&attachments).is_err());
    }

    /// desc 声明了 depth 就必须提供 depth view，反之亦然
    #[test]
    fn depth_presence_must_match() {
        let mut attachments = views();
        attachments.depth_view = None;
        assert!(desc().validate(&attachments).is_err());

        let mut no_depth = desc();
        no_depth.depth_format = None;
        assert!(no_depth.validate(&views()).is_err());
    }

    /// 空渲染区域和零附件都是错误
    #[test]
    fn degenerate_passes_are_rejected() {
        let mut empty = desc();
        empty.extent.width = 0;
        assert!(empty.validate(&views()).is_err());

        let mut bare = desc();
        bare.color_formats.clear();
        bare.depth_format = None;
        assert!(bare.validate(&RenderAttachments::default()).is_err());
    }
}
