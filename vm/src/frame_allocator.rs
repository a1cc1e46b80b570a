use std::collections::VecDeque;

/// Free list of physical frame numbers, shared by every process.
#[derive(Debug)]
pub struct FrameAllocator {
    free_frames: VecDeque<usize>,
    num_frames: usize,
}

impl FrameAllocator {
    pub fn new(num_frames: usize) -> Self {
        FrameAllocator {
            free_frames: (0..num_frames).collect(),
            num_frames,
        }
    }

    pub fn allocate(&mut self) -> Option<usize> {
        self.free_frames.pop_front()
    }

    pub fn free(&mut self, ppn: usize) {
        assert!(ppn < self.num_frames, "frame {} out of range", ppn);
        debug_assert!(!self.free_frames.contains(&ppn), "double free of frame {}", ppn);

        self.free_frames.push_back(ppn);
    }

    pub fn is_free(&self, ppn: usize) -> bool {
        self.free_frames.contains(&ppn)
    }

    pub fn free_count(&self) -> usize {
        self.free_frames.len()
    }
}
