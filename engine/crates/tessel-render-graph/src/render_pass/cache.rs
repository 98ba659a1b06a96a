//! render pass 与 framebuffer 缓存
//!
//! 两者都以结构化描述为 key，在所有 recording 之间共享。

use std::collections::HashSet;

use ash::vk;
use tessel_gfx::commands::render_pass::{GfxFramebufferDesc, GfxRenderPassDesc};
use tessel_gfx::device::GfxDevice;

use crate::cache::RgObjectCache;
use crate::error::RgResult;

pub struct RgRenderPassCache {
    render_passes: RgObjectCache<GfxRenderPassDesc, vk::RenderPass>,
    framebuffers: RgObjectCache<GfxFramebufferDesc, vk::Framebuffer>,
}

impl Default for RgRenderPassCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RgRenderPassCache {
    pub fn new() -> Self {
        Self {
            render_passes: RgObjectCache::new("render pass"),
            framebuffers: RgObjectCache::new("framebuffer"),
        }
    }

    pub fn render_pass(
        &self,
        device: &dyn GfxDevice,
        desc: &GfxRenderPassDesc,
        frame_id: u64,
    ) -> RgResult<vk::RenderPass> {
        self.render_passes.get_or_create(desc, frame_id, |desc| {
            log::debug!(
                "create render pass: {} attachments, {} subpasses",
                desc.attachments.len(),
                desc.subpass_count()
            );
            Ok(device.create_render_pass(desc)?)
        })
    }

    pub fn framebuffer(
        &self,
        device: &dyn GfxDevice,
        desc: &GfxFramebufferDesc,
        frame_id: u64,
    ) -> RgResult<vk::Framebuffer> {
        self.framebuffers.get_or_create(desc, frame_id, |desc| Ok(device.create_framebuffer(desc)?))
    }

    /// 销毁引用了已销毁 image view 的 framebuffer
    pub fn invalidate_views(&self, device: &dyn GfxDevice, views: &[vk::ImageView]) -> usize {
        if views.is_empty() {
            return 0;
        }
        let views: HashSet<vk::ImageView> = views.iter().copied().collect();
        self.framebuffers.remove_where(
            |desc| desc.attachments.iter().any(|view| views.contains(view)),
            |_, framebuffer| device.destroy_framebuffer(framebuffer),
        )
    }

    /// 回收长期未使用的对象，framebuffer 先于它引用的 render pass 销毁
    pub fn garbage_collect(&self, device: &dyn GfxDevice, frame_id: u64, max_unused_frames: u64) -> usize {
        let mut collected =
            self.framebuffers
                .garbage_collect(frame_id, max_unused_frames, |_, fb| device.destroy_framebuffer(fb));

        let mut dead_passes = HashSet::new();
        collected += self.render_passes.garbage_collect(frame_id, max_unused_frames, |_, render_pass| {
            dead_passes.insert(render_pass);
            device.destroy_render_pass(render_pass);
        });
        if !dead_passes.is_empty() {
            collected += self.framebuffers.remove_where(
                |desc| dead_passes.contains(&desc.render_pass),
                |_, fb| device.destroy_framebuffer(fb),
            );
        }
        collected
    }

    pub fn destroy_all(&self, device: &dyn GfxDevice) {
        self.framebuffers.drain(|_, fb| device.destroy_framebuffer(fb));
        self.render_passes.drain(|_, render_pass| device.destroy_render_pass(render_pass));
    }

    #[inline]
    pub fn render_pass_count(&self) -> usize {
        self.render_passes.len()
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}

#[cfg(test)]
mod tests {
    use tessel_gfx::commands::render_pass::{GfxAttachmentDesc, GfxAttachmentRef, GfxSubpassDesc};
    use tessel_gfx::headless::HeadlessDevice;

    use super::*;

    fn single_color_pass(format: vk::Format) -> GfxRenderPassDesc {
        GfxRenderPassDesc {
            attachments: vec![GfxAttachmentDesc {
                format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
            subpasses: vec![GfxSubpassDesc {
                color_attachments: vec![GfxAttachmentRef {
                    attachment: 0,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                }],
                ..Default::default()
            }],
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn test_identical_desc_shares_render_pass() {
        let device = HeadlessDevice::new();
        let cache = RgRenderPassCache::new();
        let a = cache.render_pass(&device, &single_color_pass(vk::Format::R8G8B8A8_UNORM), 0).unwrap();
        let b = cache.render_pass(&device, &single_color_pass(vk::Format::R8G8B8A8_UNORM), 1).unwrap();
        let c = cache.render_pass(&device, &single_color_pass(vk::Format::R16G16B16A16_SFLOAT), 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(device.render_pass_create_count(), 2);
    }

    #[test]
    fn test_framebuffers_follow_views_and_render_passes() {
        let device = HeadlessDevice::new();
        let cache = RgRenderPassCache::new();
        let render_pass = cache.render_pass(&device, &single_color_pass(vk::Format::R8G8B8A8_UNORM), 0).unwrap();
        let view = {
            use ash::vk::Handle;
            vk::ImageView::from_raw(0x77)
        };
        let fb_desc = GfxFramebufferDesc {
            render_pass,
            attachments: vec![view],
            width: 64,
            height: 64,
            layers: 1,
        };
        cache.framebuffer(&device, &fb_desc, 0).unwrap();
        assert_eq!(cache.framebuffer_count(), 1);
        assert_eq!(cache.invalidate_views(&device, &[view]), 1);
        assert_eq!(cache.framebuffer_count(), 0);

        cache.framebuffer(&device, &fb_desc, 0).unwrap();
        assert_eq!(cache.garbage_collect(&device, 5, 8), 0);
        assert_eq!(cache.garbage_collect(&device, 9, 8), 2);
        assert_eq!(cache.render_pass_count(), 0);
    }
}
