//! Where in the core map a new allocation goes.

use super::CoreMapEntry;
use core::ops::Range;

pub trait PlacementAlgorithm: Default {
    /// Picks `frames_requested` contiguous free frames, or [`None`] if no run
    /// that long is free.
    fn place(&mut self, core_map: &[CoreMapEntry], frames_requested: usize)
        -> Option<Range<usize>>;
}

/// Resumes searching where the previous allocation ended, wrapping once.
#[derive(Default)]
pub struct NextFit {
    position: usize,
}

/// Always searches from frame zero.
#[derive(Default)]
pub struct FirstFit;

/// Length of the free run starting at `start`, capped at `limit`.
fn free_run(core_map: &[CoreMapEntry], start: usize, limit: usize) -> usize {
    core_map[start..]
        .iter()
        .take(limit)
        .take_while(|entry| !entry.allocated())
        .count()
}

/// First fitting run whose start lies in `starts`.
fn search(
    core_map: &[CoreMapEntry],
    frames_requested: usize,
    starts: Range<usize>,
) -> Option<Range<usize>> {
    let mut start = starts.start;
    while start < starts.end && start + frames_requested <= core_map.len() {
        let run = free_run(core_map, start, frames_requested);
        if run == frames_requested {
            return Some(start..start + run);
        }
        // Skip the allocated frame that ended the run as well.
        start += run + 1;
    }
    None
}

impl PlacementAlgorithm for NextFit {
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Option<Range<usize>> {
        let total_frames = core_map.len();
        if frames_requested == 0 || frames_requested > total_frames {
            return None;
        }

        let position = self.position.min(total_frames);
        let range = search(core_map, frames_requested, position..total_frames)
            .or_else(|| search(core_map, frames_requested, 0..position))?;

        self.position = range.end % total_frames;
        Some(range)
    }
}

impl PlacementAlgorithm for FirstFit {
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Option<Range<usize>> {
        if frames_requested == 0 {
            return None;
        }
        search(core_map, frames_requested, 0..core_map.len())
    }
}
