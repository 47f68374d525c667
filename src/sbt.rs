//! Shader binding table layout: a ray generation record, the miss records and
//! one hit record per traceable primitive, each region aligned for the device.

use log::info;
use vivid_shared::sbt::ShaderTable;
use vivid_shared::ShaderTableRegions;

use crate::backend::DeviceLimits;
use crate::error::{RenderError, Result};

fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Program groups and inline data, in the order the table is written
#[derive(Clone, Debug)]
pub struct TableLayout {
    pub raygen_group: u32,
    pub miss_groups: Vec<u32>,
    /// Inline words per hit record
    pub inline_words: u32,
    hit_groups: Vec<u32>,
    hit_words: Vec<u32>,
}

impl TableLayout {
    pub fn new(raygen_group: u32, miss_groups: Vec<u32>, inline_words: u32) -> Self {
        Self {
            raygen_group,
            miss_groups,
            inline_words,
            hit_groups: Vec::new(),
            hit_words: Vec::new(),
        }
    }

    /// Appends a hit record; missing words are zero-filled, extra ones dropped
    pub fn push_hit(&mut self, group: u32, words: &[u32]) {
        self.hit_groups.push(group);
        let n = self.inline_words as usize;
        self.hit_words.extend(words.iter().copied().chain(std::iter::repeat(0)).take(n));
    }

    pub fn hit_count(&self) -> usize {
        self.hit_groups.len()
    }
}

/// Packed table, stored as little-endian words
#[derive(Clone, Debug)]
pub struct ShaderBindingTable {
    words: Vec<u32>,
    regions: ShaderTableRegions,
    stride_bytes: u32,
}

impl ShaderBindingTable {
    pub fn build(limits: &DeviceLimits, handles: &[Vec<u8>], layout: &TableLayout) -> Result<Self> {
        RenderError::check_limit("hit records", layout.hit_count(), limits.max_hit_records)?;
        if limits.handle_size % 4 != 0 || limits.handle_alignment % 4 != 0 || limits.base_alignment % 4 != 0 {
            return Err(RenderError::backend("shader table sizes must be whole words"));
        }
        if limits.handle_size < 4 {
            return Err(RenderError::backend(format!(
                "shader group handles of {} bytes cannot hold a group index",
                limits.handle_size
            )));
        }

        let handle_words = |group: u32| -> Result<Vec<u32>> {
            let handle = handles.get(group as usize).ok_or(RenderError::UnknownHandle {
                kind: "shader group",
                index: group,
            })?;
            if handle.len() != limits.handle_size as usize {
                return Err(RenderError::backend(format!(
                    "shader group handle of {} bytes, expected {}",
                    handle.len(),
                    limits.handle_size
                )));
            }
            Ok(handle
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect())
        };

        let stride_bytes = align_up(limits.handle_size + 4 * layout.inline_words, limits.handle_alignment);
        let stride = stride_bytes / 4;
        let miss_count = layout.miss_groups.len() as u32;
        let hit_count = layout.hit_count() as u32;

        let raygen_offset = 0;
        let miss_offset = align_up(raygen_offset + stride_bytes, limits.base_alignment) / 4;
        let hit_offset = align_up((miss_offset + miss_count * stride) * 4, limits.base_alignment) / 4;
        let total = align_up((hit_offset + hit_count * stride) * 4, limits.base_alignment) / 4;

        let mut words = vec![0u32; total as usize];
        let mut write_handle = |offset: u32, group: u32| -> Result<()> {
            let handle = handle_words(group)?;
            let start = offset as usize;
            words[start..start + handle.len()].copy_from_slice(&handle);
            Ok(())
        };

        write_handle(raygen_offset, layout.raygen_group)?;
        for (i, &group) in layout.miss_groups.iter().enumerate() {
            write_handle(miss_offset + i as u32 * stride, group)?;
        }
        for (i, &group) in layout.hit_groups.iter().enumerate() {
            write_handle(hit_offset + i as u32 * stride, group)?;
        }

        let handle_words = limits.handle_size / 4;
        let n = layout.inline_words as usize;
        if n > 0 {
            for (i, data) in layout.hit_words.chunks_exact(n).enumerate() {
                let start = (hit_offset + i as u32 * stride + handle_words) as usize;
                words[start..start + n].copy_from_slice(data);
            }
        }

        info!(
            "Shader table: {} hit records, stride {} bytes, {} bytes total",
            hit_count,
            stride_bytes,
            words.len() * 4
        );

        Ok(Self {
            words,
            regions: ShaderTableRegions {
                raygen_offset,
                miss_offset,
                miss_count,
                hit_offset,
                hit_count,
                stride,
                handle_words,
                _padding: 0,
            },
            stride_bytes,
        })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn regions(&self) -> ShaderTableRegions {
        self.regions
    }

    /// Record stride in bytes
    pub fn stride(&self) -> u32 {
        self.stride_bytes
    }

    pub fn record_count(&self) -> u32 {
        self.regions.hit_count
    }

    pub fn view(&self) -> ShaderTable<'_> {
        ShaderTable::new(&self.words, self.regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::indexed_group_handles;

    #[test]
    fn stride_and_regions_respect_alignment() {
        let limits = DeviceLimits {
            handle_size: 32,
            handle_alignment: 32,
            base_alignment: 64,
            ..DeviceLimits::default()
        };
        let handles = indexed_group_handles(&limits, 4);
        let mut layout = TableLayout::new(0, vec![1, 2], 3);
        for part in 0..5u32 {
            layout.push_hit(3, &[part * 10, u32::MAX, part]);
        }

        let table = ShaderBindingTable::build(&limits, &handles, &layout).unwrap();
        // 32 + 12 bytes rounds up to 64
        assert_eq!(table.stride(), 64);
        assert_eq!(table.stride() % limits.handle_alignment, 0);
        assert_eq!(table.record_count(), 5);

        let regions = table.regions();
        assert_eq!((regions.miss_offset * 4) % limits.base_alignment, 0);
        assert_eq!((regions.hit_offset * 4) % limits.base_alignment, 0);
        assert!(regions.hit_offset >= regions.miss_offset + 2 * regions.stride);
        assert_eq!(table.bytes().len() % limits.base_alignment as usize, 0);

        let view = table.view();
        assert_eq!(view.raygen_group(), 0);
        assert_eq!(view.miss_group(1), 2);
        assert_eq!(view.hit_group(4), 3);
        assert_eq!(view.hit_word(2, 0), 20);
        assert_eq!(view.hit_word(2, 1), u32::MAX);
        assert_eq!(view.hit_word(4, 2), 4);
    }

    #[test]
    fn tight_stride_when_data_fits_alignment() {
        let limits = DeviceLimits {
            handle_size: 16,
            handle_alignment: 16,
            base_alignment: 16,
            ..DeviceLimits::default()
        };
        let handles = indexed_group_handles(&limits, 3);
        let mut layout = TableLayout::new(0, vec![1], 4);
        layout.push_hit(2, &[1, 2]);

        let table = ShaderBindingTable::build(&limits, &handles, &layout).unwrap();
        assert_eq!(table.stride(), 32);
        // Short inline data is zero padded
        assert_eq!(table.view().hit_word(0, 1), 2);
        assert_eq!(table.view().hit_word(0, 3), 0);
    }

    #[test]
    fn too_many_records_is_a_build_error() {
        let limits = DeviceLimits {
            max_hit_records: 2,
            ..DeviceLimits::default()
        };
        let handles = indexed_group_handles(&limits, 3);
        let mut layout = TableLayout::new(0, vec![1], 1);
        for i in 0..3 {
            layout.push_hit(2, &[i]);
        }
        assert!(matches!(
            ShaderBindingTable::build(&limits, &handles, &layout),
            Err(RenderError::ResourceExhausted { requested: 3, limit: 2, .. })
        ));
    }

    #[test]
    fn unknown_group_is_rejected() {
        let limits = DeviceLimits::default();
        let handles = indexed_group_handles(&limits, 2);
        let mut layout = TableLayout::new(0, vec![1], 1);
        layout.push_hit(5, &[0]);
        assert!(matches!(
            ShaderBindingTable::build(&limits, &handles, &layout),
            Err(RenderError::UnknownHandle { index: 5, .. })
        ));
    }

    #[test]
    fn handles_shorter_than_a_word_are_rejected() {
        for handle_size in [0, 2] {
            let limits = DeviceLimits {
                handle_size,
                ..DeviceLimits::default()
            };
            let handles = indexed_group_handles(&limits, 2);
            assert!(handles.iter().all(|h| h.len() == handle_size as usize));
            let layout = TableLayout::new(0, vec![1], 1);
            assert!(matches!(
                ShaderBindingTable::build(&limits, &handles, &layout),
                Err(RenderError::Backend(_))
            ));
        }
    }
}
