//! Disney principled BRDF and its Lambert/GGX/Plastic/Blend subsets.

use core::f32::consts::{FRAC_1_PI, PI};
use glam::Vec3;
#[cfg(target_arch = "spirv")]
use spirv_std::num_traits::Float;

use crate::random::RandomStream;
use crate::sampling::{rotate_to_normal, sample_cosine_hemisphere, sample_ggx_half_vector};
use crate::MaterialParams;

/// Material with the per-class derived terms resolved for shading
#[derive(Copy, Clone, Debug)]
pub struct ShadingMaterial {
    pub emittance: Vec3,
    pub base_color: Vec3,
    pub class: u32,
    pub roughness: f32,
    pub specular: f32,
    pub metallic: f32,
    pub subsurface: f32,
    pub specular_tint: f32,
    pub sheen: f32,
    pub sheen_tint: f32,
    pub clearcoat: f32,
    pub clearcoat_gloss: f32,
    pub alpha2: f32,
    pub specular_importance: f32,
    pub specular_color: Vec3,
    pub diffuse_fresnel: bool,
    pub specular_fresnel: bool,
}

impl ShadingMaterial {
    /// `base_color` is already resolved (constant or texture lookup)
    pub fn resolve(params: &MaterialParams, base_color: Vec3) -> Self {
        let alpha = (params.roughness * params.roughness).max(0.001);
        let class = params.class();

        let (specular_importance, specular_color) = if class == MaterialParams::LAMBERT {
            (0.0, Vec3::ZERO)
        } else if class == MaterialParams::GGX {
            (1.0, base_color)
        } else if class == MaterialParams::BLEND {
            (params.specular, Vec3::ONE)
        } else {
            (0.5, Vec3::splat(params.specular * 0.08))
        };

        Self {
            emittance: Vec3::from_array(params.emittance),
            base_color,
            class,
            roughness: params.roughness,
            specular: params.specular,
            metallic: params.metallic,
            subsurface: params.subsurface,
            specular_tint: params.specular_tint,
            sheen: params.sheen,
            sheen_tint: params.sheen_tint,
            clearcoat: params.clearcoat,
            clearcoat_gloss: params.clearcoat_gloss,
            alpha2: alpha * alpha,
            specular_importance,
            specular_color,
            diffuse_fresnel: params.kind & MaterialParams::FRESNEL_DIFFUSE != 0,
            specular_fresnel: params.kind & MaterialParams::FRESNEL_SPECULAR != 0,
        }
    }
}

pub fn schlick_fresnel(u: f32) -> f32 {
    let m = (1.0 - u).clamp(0.0, 1.0);
    let m2 = m * m;
    m2 * m2 * m
}

pub fn gtr1(hn: f32, alpha: f32) -> f32 {
    if alpha >= 1.0 {
        return FRAC_1_PI;
    }
    let alpha2 = alpha * alpha;
    let t = 1.0 + (alpha2 - 1.0) * hn * hn;
    (alpha2 - 1.0) / (PI * alpha2.ln() * t)
}

pub fn smith_g_ggx(vn: f32, alpha2: f32) -> f32 {
    let b = vn * vn;
    1.0 / (vn + (alpha2 + b - alpha2 * b).sqrt())
}

/// GGX normal distribution from cos²θh
pub fn trowbridge_reitz(cos2: f32, alpha2: f32) -> f32 {
    let x = cos2 * (alpha2 - 1.0) + 1.0;
    alpha2 / (PI * x * x)
}

/// Height-correlated Smith masking-shadowing for GGX
pub fn smith_trowbridge_reitz(vn: f32, ln: f32, vh: f32, alpha2: f32) -> f32 {
    if vh <= 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + smith_lambda(vn, alpha2) + smith_lambda(ln, alpha2))
}

fn smith_lambda(cos: f32, alpha2: f32) -> f32 {
    let cos2 = cos * cos;
    0.5 * (-1.0 + (1.0 + alpha2 * (1.0 - cos2) / cos2).sqrt())
}

/// Cosines describing one (V, L) pair around a normal
#[derive(Copy, Clone, Debug)]
pub struct BrdfAngles {
    pub vn: f32,
    pub ln: f32,
    pub hn: f32,
    pub vh: f32,
    pub d: f32,
}

impl BrdfAngles {
    pub fn new(m: &ShadingMaterial, n: Vec3, v: Vec3, l: Vec3) -> Self {
        let h = (v + l).normalize();
        let hn = h.dot(n);
        Self {
            vn: v.dot(n),
            ln: l.dot(n),
            hn,
            vh: v.dot(h),
            d: trowbridge_reitz(hn * hn, m.alpha2),
        }
    }
}

pub fn evaluate_ggx(m: &ShadingMaterial, a: &BrdfAngles) -> Vec3 {
    let g = smith_trowbridge_reitz(a.vn, a.ln, a.vh, m.alpha2);
    let f = if m.specular_fresnel {
        m.specular_color.lerp(Vec3::ONE, schlick_fresnel(a.vh))
    } else {
        m.specular_color
    };
    f * (a.d * g / (4.0 * a.vn * a.ln))
}

pub fn evaluate_disney(m: &ShadingMaterial, a: &BrdfAngles) -> Vec3 {
    let cd_lin = m.base_color;
    let cd_lum = 0.3 * cd_lin.x + 0.6 * cd_lin.y + 0.1 * cd_lin.z;
    let c_tint = if cd_lum > 0.0 { cd_lin / cd_lum } else { Vec3::ONE };
    let c_spec0 = (Vec3::ONE.lerp(c_tint, m.specular_tint) * (m.specular * 0.08)).lerp(cd_lin, m.metallic);
    let c_sheen = Vec3::ONE.lerp(c_tint, m.sheen_tint);

    // Diffuse fresnel with roughness-driven retro-reflection
    let fl = schlick_fresnel(a.ln);
    let fv = schlick_fresnel(a.vn);
    let fd90 = 0.5 + 2.0 * a.vh * a.vh * m.roughness;
    let fd = if m.diffuse_fresnel {
        lerp(1.0, fd90, fl) * lerp(1.0, fd90, fv)
    } else {
        1.0
    };

    // Hanrahan-Krueger subsurface approximation
    let fss90 = a.vh * a.vh * m.roughness;
    let fss = lerp(1.0, fss90, fl) * lerp(1.0, fss90, fv);
    let ss = 1.25 * (fss * (1.0 / (a.ln + a.vn) - 0.5) + 0.5);

    let fh = schlick_fresnel(a.vh);
    let fs = if m.specular_fresnel { c_spec0.lerp(Vec3::ONE, fh) } else { c_spec0 };
    let gs = smith_g_ggx(a.ln, m.alpha2) * smith_g_ggx(a.vn, m.alpha2);

    let f_sheen = c_sheen * (fh * m.sheen);

    // Clearcoat, ior 1.5
    let dr = gtr1(a.hn, lerp(0.1, 0.001, m.clearcoat_gloss));
    let fr = lerp(0.04, 1.0, fh);
    let gr = smith_g_ggx(a.ln, 0.0625) * smith_g_ggx(a.vn, 0.0625);

    fs * (gs * a.d)
        + Vec3::splat(0.25 * m.clearcoat * gr * fr * dr)
        + (cd_lin * (lerp(fd, ss, m.subsurface) * FRAC_1_PI) + f_sheen) * (1.0 - m.metallic)
}

/// BRDF value; assumes `vn > 0` and `ln > 0`
pub fn evaluate_angles(m: &ShadingMaterial, a: &BrdfAngles) -> Vec3 {
    if m.class == MaterialParams::DISNEY {
        return evaluate_disney(m, a);
    }
    let diffuse = m.base_color * FRAC_1_PI;
    if m.class == MaterialParams::LAMBERT {
        return diffuse;
    }
    let specular = evaluate_ggx(m, a);
    if m.class == MaterialParams::GGX {
        specular
    } else if m.class == MaterialParams::PLASTIC {
        diffuse + specular
    } else {
        diffuse * (1.0 - m.specular) + specular * m.specular
    }
}

pub fn evaluate(m: &ShadingMaterial, n: Vec3, v: Vec3, l: Vec3) -> Vec3 {
    evaluate_angles(m, &BrdfAngles::new(m, n, v, l))
}

/// Mixture density of the cosine and GGX half-vector lobes
pub fn reflection_pdf(m: &ShadingMaterial, n: Vec3, v: Vec3, l: Vec3) -> f32 {
    let a = BrdfAngles::new(m, n, v, l);
    mixture_pdf(m, &a)
}

fn mixture_pdf(m: &ShadingMaterial, a: &BrdfAngles) -> f32 {
    (1.0 - m.specular_importance) * (FRAC_1_PI * a.ln)
        + m.specular_importance * (a.d * a.hn / (4.0 * a.vh).abs())
}

#[derive(Copy, Clone, Debug)]
pub struct ReflectionSample {
    pub direction: Vec3,
    pub angles: BrdfAngles,
    pub pdf: f32,
}

/// Picks the next bounce direction, choosing the lobe by `specular_importance`
pub fn sample_reflection(m: &ShadingMaterial, n: Vec3, v: Vec3, rng: &mut RandomStream) -> ReflectionSample {
    let sample_half_vector = rng.next() < m.specular_importance;
    let u = rng.next_vec2();

    let local = if sample_half_vector {
        sample_ggx_half_vector(u, m.alpha2)
    } else {
        sample_cosine_hemisphere(u)
    };
    let mut h = rotate_to_normal(n, local);

    let l = if sample_half_vector {
        h * (2.0 * v.dot(h)) - v
    } else {
        let l = h;
        h = (v + l).normalize();
        l
    };

    let hn = h.dot(n);
    let angles = BrdfAngles {
        vn: v.dot(n),
        ln: l.dot(n),
        hn,
        vh: v.dot(h),
        d: trowbridge_reitz(hn * hn, m.alpha2),
    };

    ReflectionSample {
        direction: l,
        pdf: mixture_pdf(m, &angles),
        angles,
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
