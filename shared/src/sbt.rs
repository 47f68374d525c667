//! Read access to a packed shader binding table.
//!
//! Every record starts with its group handle, whose first word is the index of
//! the program group in the pipeline, followed by the record's inline words.

use crate::ShaderTableRegions;

#[derive(Copy, Clone)]
pub struct ShaderTable<'a> {
    words: &'a [u32],
    regions: ShaderTableRegions,
}

impl<'a> ShaderTable<'a> {
    pub fn new(words: &'a [u32], regions: ShaderTableRegions) -> Self {
        Self { words, regions }
    }

    pub fn regions(&self) -> &ShaderTableRegions {
        &self.regions
    }

    /// Program group referenced by the ray generation record
    pub fn raygen_group(&self) -> u32 {
        self.words[self.regions.raygen_offset as usize]
    }

    pub fn miss_group(&self, miss_index: u32) -> u32 {
        self.words[(self.regions.miss_offset + miss_index * self.regions.stride) as usize]
    }

    pub fn hit_group(&self, record: u32) -> u32 {
        self.words[(self.regions.hit_offset + record * self.regions.stride) as usize]
    }

    /// Inline word `n` of hit record `record`
    pub fn hit_word(&self, record: u32, n: u32) -> u32 {
        let base = self.regions.hit_offset + record * self.regions.stride + self.regions.handle_words;
        self.words[(base + n) as usize]
    }

    pub fn hit_record_count(&self) -> u32 {
        self.regions.hit_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_handles_and_inline_words() {
        // handle = 2 words, stride = 4 words
        let words = [
            7, 0, 0, 0, // raygen
            3, 0, 0, 0, // miss 0
            5, 0, 10, 11, // hit 0
            5, 0, 20, 21, // hit 1
        ];
        let regions = ShaderTableRegions {
            raygen_offset: 0,
            miss_offset: 4,
            miss_count: 1,
            hit_offset: 8,
            hit_count: 2,
            stride: 4,
            handle_words: 2,
            _padding: 0,
        };
        let table = ShaderTable::new(&words, regions);
        assert_eq!(table.raygen_group(), 7);
        assert_eq!(table.miss_group(0), 3);
        assert_eq!(table.hit_group(1), 5);
        assert_eq!(table.hit_word(0, 0), 10);
        assert_eq!(table.hit_word(1, 1), 21);
        assert_eq!(table.hit_record_count(), 2);
    }
}
