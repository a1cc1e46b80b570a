use crate::error::{Result, VmError};

/// One section of an executable image, as the loader exposes it.
pub trait Section: Send + Sync {
    fn name(&self) -> &str;

    fn first_vpn(&self) -> usize;

    fn page_count(&self) -> usize;

    fn read_only(&self) -> bool;

    /// Copies page `index` of the section into `frame`, which is exactly one page.
    fn load_page(&self, index: usize, frame: &mut [u8]) -> Result<()>;
}

/// A section held in memory. Bytes past the end of the data read as zero.
#[derive(Debug, Clone)]
pub struct MemorySection {
    name: String,
    first_vpn: usize,
    page_size: usize,
    read_only: bool,
    data: Vec<u8>,
}

impl MemorySection {
    pub fn new(name: &str, first_vpn: usize, page_size: usize, read_only: bool, data: Vec<u8>) -> Self {
        MemorySection {
            name: name.to_string(),
            first_vpn,
            page_size,
            read_only,
            data,
        }
    }
}

impl Section for MemorySection {
    fn name(&self) -> &str {
        &self.name
    }

    fn first_vpn(&self) -> usize {
        self.first_vpn
    }

    fn page_count(&self) -> usize {
        self.data.len().div_ceil(self.page_size).max(1)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn load_page(&self, index: usize, frame: &mut [u8]) -> Result<()> {
        if index >= self.page_count() || frame.len() != self.page_size {
            return Err(VmError::SectionLoad {
                section: self.name.clone(),
                page: index,
                reason: format!("frame of {} bytes", frame.len()),
            });
        }

        let start = (index * self.page_size).min(self.data.len());
        let end = ((index + 1) * self.page_size).min(self.data.len());
        let bytes = &self.data[start..end];

        frame[..bytes.len()].copy_from_slice(bytes);
        frame[bytes.len()..].fill(0);

        Ok(())
    }
}
