use std::{fs, path::Path, path::PathBuf};

use serde::Deserialize;

use crate::{
    error::{Result, VmError},
    page_replacer::ReplacementPolicy,
};

/// Machine and paging parameters, read from a TOML file.
///
/// ```toml
/// page_size = 1024
/// num_frames = 16
/// tlb_size = 4
/// stack_pages = 8
/// swap_path = ".swap"
/// replacement = "clock"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Bytes per page and per frame.
    pub page_size: usize,
    /// Physical frames in the simulated machine.
    pub num_frames: usize,
    /// TLB slots.
    pub tlb_size: usize,
    /// Stack pages given to every process.
    pub stack_pages: usize,
    /// Where the backing store lives. Deleted on shutdown.
    pub swap_path: PathBuf,
    pub replacement: ReplacementPolicy,
    /// Fixed seed for TLB and random-victim choices.
    pub tlb_seed: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            page_size: 1024,
            num_frames: 16,
            tlb_size: 4,
            stack_pages: 8,
            swap_path: PathBuf::from(".swap"),
            replacement: ReplacementPolicy::Clock,
            tlb_seed: None,
        }
    }
}

impl VmConfig {
    pub fn from_toml_str(text: &str) -> Result<VmConfig> {
        let config: VmConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<VmConfig> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| VmError::Config(format!("{}: {}", path.as_ref().display(), e)))?;

        VmConfig::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(VmError::Config(format!(
                "page_size must be a power of two, got {}",
                self.page_size
            )));
        }
        if self.num_frames == 0 {
            return Err(VmError::Config("num_frames must be at least 1".into()));
        }
        if self.tlb_size == 0 {
            return Err(VmError::Config("tlb_size must be at least 1".into()));
        }

        Ok(())
    }
}
