//! Per-process layout: which virtual pages exist and where their first
//! contents come from.
//!
//! Pages are contiguous from vpn 0: executable sections, then the stack,
//! then one page for the program arguments.

use crate::{
    error::{Result, VmError},
    page_loader::Section,
    page_table::Vp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrigin {
    /// Page `page` of section `section`; reloadable from the image.
    Section {
        section: usize,
        page: usize,
        read_only: bool,
    },
    /// Anonymous, zero until written.
    Stack,
    /// Anonymous, filled with `argv` at spawn.
    Argument,
}

impl PageOrigin {
    pub fn read_only(&self) -> bool {
        matches!(self, PageOrigin::Section { read_only: true, .. })
    }
}

pub struct AddressSpace {
    pid: u32,
    sections: Vec<Box<dyn Section>>,
    origins: Vec<PageOrigin>,
}

impl AddressSpace {
    /// Lays out `sections` followed by `stack_pages` of stack and one argument
    /// page. Sections must tile the pages from vpn 0 without gaps.
    pub fn build(pid: u32, sections: Vec<Box<dyn Section>>, stack_pages: usize) -> Result<AddressSpace> {
        let mut origins = Vec::new();

        for (index, section) in sections.iter().enumerate() {
            if section.first_vpn() != origins.len() {
                return Err(VmError::BadExecutable(format!(
                    "fragmented executable: section `{}` starts at page {}, expected {}",
                    section.name(),
                    section.first_vpn(),
                    origins.len()
                )));
            }

            origins.extend((0..section.page_count()).map(|page| PageOrigin::Section {
                section: index,
                page,
                read_only: section.read_only(),
            }));
        }

        origins.extend(std::iter::repeat(PageOrigin::Stack).take(stack_pages));
        origins.push(PageOrigin::Argument);

        Ok(AddressSpace {
            pid,
            sections,
            origins,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn num_pages(&self) -> usize {
        self.origins.len()
    }

    pub fn origin(&self, vpn: usize) -> Option<PageOrigin> {
        self.origins.get(vpn).copied()
    }

    pub fn section(&self, index: usize) -> &dyn Section {
        self.sections[index].as_ref()
    }

    /// First page past the stack, i.e. the argument page.
    pub fn argument_vpn(&self) -> usize {
        self.origins.len() - 1
    }

    /// Every page of the process, in vpn order.
    pub fn vps(&self) -> impl Iterator<Item = Vp> + '_ {
        (0..self.origins.len()).map(move |vpn| Vp::new(vpn, self.pid))
    }
}
