//! FileSection - an executable section whose pages are read straight out of a
//! file on the host.
//!
//! The file is taken as a raw image: page `i` of the section is the
//! `page_size` bytes starting at `i * page_size`. The last page is padded
//! with zeros, like the tail of a real text segment.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use parking_lot::Mutex;
use vm::{page_loader::Section, Result, VmError};

#[derive(Debug)]
pub struct FileSection {
    name: String,
    first_vpn: usize,
    page_size: usize,
    len: usize,
    /// `load_page` only gets `&self`; seeking needs the file mutably.
    file: Mutex<File>,
}

impl FileSection {
    pub fn open<P: AsRef<Path>>(path: P, name: &str, first_vpn: usize, page_size: usize) -> Result<FileSection> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;

        Ok(FileSection {
            name: name.to_string(),
            first_vpn,
            page_size,
            len,
            file: Mutex::new(file),
        })
    }
}

impl Section for FileSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn first_vpn(&self) -> usize {
        self.first_vpn
    }

    fn page_count(&self) -> usize {
        self.len.div_ceil(self.page_size).max(1)
    }

    fn read_only(&self) -> bool {
        true
    }

    fn load_page(&self, index: usize, frame: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();

        let start = index * self.page_size;
        let count = self.len.saturating_sub(start).min(frame.len());

        file.seek(SeekFrom::Start(start as u64))
            .and_then(|_| file.read_exact(&mut frame[..count]))
            .map_err(|e| VmError::SectionLoad {
                section: self.name.clone(),
                page: index,
                reason: e.to_string(),
            })?;

        // past the end of the file
        frame[count..].fill(0);

        Ok(())
    }
}
