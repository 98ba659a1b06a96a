use ash::vk;

/// sampler 描述，浮点字段以 bit 形式保存，便于作为缓存 key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub max_anisotropy_bits: u32,
    pub min_lod_bits: u32,
    pub max_lod_bits: u32,
    pub compare_op: Option<vk::CompareOp>,
    pub border_color: vk::BorderColor,
}

impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy_bits: 0.0f32.to_bits(),
            min_lod_bits: 0.0f32.to_bits(),
            max_lod_bits: vk::LOD_CLAMP_NONE.to_bits(),
            compare_op: None,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        }
    }
}

impl GfxSamplerDesc {
    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_anisotropy(mut self, max_anisotropy: f32) -> Self {
        self.max_anisotropy_bits = max_anisotropy.to_bits();
        self
    }

    #[inline]
    pub fn max_anisotropy(&self) -> f32 {
        f32::from_bits(self.max_anisotropy_bits)
    }

    pub fn to_vk(&self) -> vk::SamplerCreateInfo<'static> {
        let max_anisotropy = self.max_anisotropy();
        vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy)
            .compare_enable(self.compare_op.is_some())
            .compare_op(self.compare_op.unwrap_or(vk::CompareOp::NEVER))
            .min_lod(f32::from_bits(self.min_lod_bits))
            .max_lod(f32::from_bits(self.max_lod_bits))
            .border_color(self.border_color)
    }
}
