/// Running per-pixel average across frames. The backend folds each new
/// sample into `texels`; `frames` counts how many are already averaged.
#[derive(Clone, Debug)]
pub struct ProgressiveAccumulator {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
    frames: u32,
}

impl ProgressiveAccumulator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![[0.0; 4]; width as usize * height as usize],
            frames: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Next frame overwrites history instead of averaging into it
    pub fn reset(&mut self) {
        self.frames = 0;
    }

    /// Number of frames already averaged; goes into the uniform block
    pub fn frame_index(&self) -> u32 {
        self.frames
    }

    pub fn advance(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        *self = Self::new(width, height);
    }

    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    pub fn texels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.texels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;
    use vivid_shared::accumulate::accumulate;

    fn fold(acc: &mut ProgressiveAccumulator, sample: f32) {
        let frames = acc.frame_index();
        for texel in acc.texels_mut() {
            *texel = accumulate(*texel, Vec3::splat(sample), frames);
        }
        acc.advance();
    }

    #[test]
    fn reset_makes_next_frame_authoritative() {
        let mut acc = ProgressiveAccumulator::new(2, 1);
        fold(&mut acc, 1.0);
        fold(&mut acc, 3.0);
        assert_relative_eq!(acc.texels()[0][0], 2.0);

        acc.reset();
        assert_eq!(acc.frame_index(), 0);
        fold(&mut acc, 7.0);
        assert_eq!(acc.texels()[1][0], 7.0);
    }

    #[test]
    fn running_mean_matches_recurrence() {
        let mut acc = ProgressiveAccumulator::new(1, 1);
        let samples = [0.5, 2.0, 1.25, 4.0, 0.0];
        let mut expected: f32 = 0.0;
        for (n, &s) in samples.iter().enumerate() {
            fold(&mut acc, s);
            expected = if n == 0 { s } else { expected + (s - expected) / (n as f32 + 1.0) };
            assert_relative_eq!(acc.texels()[0][0], expected, epsilon = 1e-6);
        }
        assert_relative_eq!(acc.texels()[0][0], 7.75 / 5.0, epsilon = 1e-6);
    }

    #[test]
    fn nan_samples_leave_history_untouched() {
        let mut acc = ProgressiveAccumulator::new(1, 1);
        fold(&mut acc, 2.0);
        fold(&mut acc, f32::NAN);
        assert_eq!(acc.texels()[0][0], 2.0);
    }

    #[test]
    fn resize_reallocates_and_resets() {
        let mut acc = ProgressiveAccumulator::new(2, 2);
        fold(&mut acc, 1.0);
        acc.resize(3, 1);
        assert_eq!(acc.texels().len(), 3);
        assert_eq!(acc.frame_index(), 0);
        assert_eq!((acc.width(), acc.height()), (3, 1));
    }
}
