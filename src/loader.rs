//! Offline image loading.
//!
//! Maps a PE file from disk into an `ImageHost` the way the Windows loader
//! would lay it out: headers at the image base, each section at its virtual
//! address with page protections taken from the section characteristics.
//! The result can be marked exactly like a module in a live process.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use object::read::{Object, ObjectSection, ObjectSymbol};
use object::{Architecture, BinaryFormat, SectionFlags};
use tracing::{debug, warn};

use crate::error::{Result, XfgError};
use crate::host::image::PAGE_SIZE;
use crate::host::{ImageHost, ModuleImage, PageProtection};
use crate::pe::{AddressWidth, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE};

/// Resource limits for loading images from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    /// Largest file accepted.
    pub max_file_size: u64,
    /// Largest mapped image accepted.
    pub max_image_size: u64,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            max_file_size: 256 * 1024 * 1024,  // 256MB
            max_image_size: 512 * 1024 * 1024, // 512MB
        }
    }
}

/// A PE image mapped into a simulated process.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub host: ImageHost,
    pub module: ModuleImage,
    pub width: AddressWidth,
    /// Symbols registered from the export table and COFF symbol table
    pub symbol_count: usize,
}

fn round_up_to_page(value: u64) -> u64 {
    value.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

fn protection_for(characteristics: u32) -> PageProtection {
    let mut p = PageProtection::empty();
    if characteristics & IMAGE_SCN_MEM_READ != 0 {
        p |= PageProtection::READ;
    }
    if characteristics & IMAGE_SCN_MEM_WRITE != 0 {
        p |= PageProtection::WRITE;
    }
    if characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
        p |= PageProtection::EXECUTE | PageProtection::READ;
    }
    p
}

fn address_width(arch: Architecture, is_64: bool) -> AddressWidth {
    match arch {
        Architecture::I386 => AddressWidth::Bits32,
        Architecture::X86_64 => AddressWidth::Bits64,
        other => {
            warn!(arch = ?other, "unexpected architecture, using header width");
            if is_64 {
                AddressWidth::Bits64
            } else {
                AddressWidth::Bits32
            }
        }
    }
}

/// Map the PE file at `path`.
pub fn load_pe_file<P: AsRef<Path>>(path: P, limits: LoadLimits) -> Result<LoadedImage> {
    let path = path.as_ref();
    let load_err = |e: std::io::Error| XfgError::Load(format!("{}: {}", path.display(), e));

    let file = File::open(path).map_err(load_err)?;
    let file_size = file.metadata().map_err(load_err)?.len();
    debug!(path = %path.display(), size = file_size, "opening image");

    if file_size > limits.max_file_size {
        return Err(XfgError::Load(format!(
            "{}: file is too large ({} bytes, limit {})",
            path.display(),
            file_size,
            limits.max_file_size
        )));
    }
    if file_size == 0 {
        return Err(XfgError::Load(format!("{}: file is empty", path.display())));
    }

    // Safety: read-only map of a regular file; the mapping is dropped before return.
    let mmap = unsafe { Mmap::map(&file) }.map_err(load_err)?;
    load_pe_bytes(&mmap, limits)
}

/// Map a PE file held in memory.
pub fn load_pe_bytes(data: &[u8], limits: LoadLimits) -> Result<LoadedImage> {
    let obj = object::read::File::parse(data)
        .map_err(|e| XfgError::Load(format!("failed to parse image: {}", e)))?;
    if obj.format() != BinaryFormat::Pe {
        return Err(XfgError::Load(format!(
            "unsupported format {:?}, expected PE",
            obj.format()
        )));
    }

    let width = address_width(obj.architecture(), obj.is_64());
    let base = obj.relative_address_base();

    // extent of the mapped image
    let mut end = round_up_to_page(data.len().min(PAGE_SIZE as usize) as u64);
    for section in obj.sections() {
        let rva = section.address().wrapping_sub(base);
        let file_len = section.file_range().map(|(_, len)| len).unwrap_or(0);
        end = end.max(rva.saturating_add(section.size().max(file_len)));
    }
    let image_size = round_up_to_page(end);
    if image_size > limits.max_image_size {
        return Err(XfgError::Load(format!(
            "image is too large ({} bytes, limit {})",
            image_size, limits.max_image_size
        )));
    }
    let module = ModuleImage::new(base, image_size);

    let mut host = ImageHost::new();
    host.add_module(module);

    let header_len = data.len().min(PAGE_SIZE as usize);
    host.map(base, PAGE_SIZE, PageProtection::READ);
    host.write(base, &data[..header_len])
        .map_err(|e| XfgError::Load(format!("failed to map headers: {}", e)))?;

    for section in obj.sections() {
        let name = section.name().unwrap_or("<invalid>");
        let address = section.address();
        let characteristics = match section.flags() {
            SectionFlags::Coff { characteristics } => characteristics,
            _ => 0,
        };
        let mut protection = protection_for(characteristics);
        if protection.is_empty() {
            protection = PageProtection::READ;
        }

        let bytes = section.data().unwrap_or(&[]);
        let virtual_size = section.size().max(bytes.len() as u64);
        if virtual_size == 0 {
            continue;
        }
        host.map(address, round_up_to_page(virtual_size), protection);
        if let Err(e) = host.write(address, bytes) {
            warn!(section = name, "failed to map section data: {}", e);
            continue;
        }
        debug!(
            section = name,
            address = format_args!("{:#x}", address),
            size = virtual_size,
            rights = %protection.rights_string(),
            "mapped section"
        );
    }

    let mut symbol_count = 0;
    match obj.exports() {
        Ok(exports) => {
            for export in exports {
                let name = String::from_utf8_lossy(export.name()).into_owned();
                if !name.is_empty() && module.contains(export.address()) {
                    host.add_symbol(export.address(), name);
                    symbol_count += 1;
                }
            }
        }
        Err(e) => debug!("no usable export table: {}", e),
    }
    for symbol in obj.symbols() {
        let Ok(name) = symbol.name() else { continue };
        if name.is_empty() || !module.contains(symbol.address()) {
            continue;
        }
        host.add_symbol(symbol.address(), name);
        symbol_count += 1;
    }

    host.select(base);
    debug!(
        base = format_args!("{:#x}", base),
        size = image_size,
        %width,
        symbols = symbol_count,
        "image loaded"
    );

    Ok(LoadedImage {
        host,
        module,
        width,
        symbol_count,
    })
}
