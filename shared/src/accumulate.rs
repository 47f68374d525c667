use glam::{Vec3, Vec4};

/// Running mean of per-frame samples; NaN samples leave the pixel untouched
pub fn accumulate(previous: [f32; 4], sample: Vec3, accumulated_frames: u32) -> [f32; 4] {
    if sample.is_nan() {
        return previous;
    }
    if accumulated_frames == 0 {
        return sample.extend(1.0).to_array();
    }
    let prev = Vec4::from_array(previous).truncate();
    let mean = prev + (sample - prev) / (accumulated_frames as f32 + 1.0);
    mean.extend(1.0).to_array()
}
