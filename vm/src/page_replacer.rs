use rand::Rng;
use serde::Deserialize;

use crate::{
    mmu::TranslationEntry,
    page_table::{InvertedPageTable, Vp},
};

/// How a resident page is chosen for eviction when no frame is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementPolicy {
    /// Second chance over the `used` bits.
    #[default]
    Clock,
    /// Uniform over resident frames.
    Random,
}

impl ReplacementPolicy {
    pub fn pick_victim<R: Rng>(
        &self,
        table: &mut InvertedPageTable,
        rng: &mut R,
    ) -> Option<(Vp, TranslationEntry)> {
        match self {
            ReplacementPolicy::Clock => table.select_victim(),
            ReplacementPolicy::Random => table.select_random_victim(rng),
        }
    }
}
