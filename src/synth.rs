//! Synthetic XFG modules for tests and demonstrations.
//!
//! `SyntheticModule` lays out a minimal PE image inside an `ImageHost`:
//!
//! ```text
//! rva 0x0000  headers            (R)
//! rva 0x1000  load config        (R)
//! rva 0x1100  guard table        (R)
//! rva 0x10000 code               (RX)
//! ```
//!
//! Function RVAs passed to the builder must point into the code range.

use crate::host::{ImageHost, ModuleImage, PageProtection};
use crate::pe::*;

const E_LFANEW: u32 = 0x80;
const LOAD_CONFIG_RVA: u32 = 0x1000;
const GUARD_TABLE_RVA: u32 = 0x1100;
/// Start of the executable range
pub const CODE_RVA: u32 = 0x10000;
const DEFAULT_CODE_SIZE: u32 = 0x4000;

#[derive(Debug, Clone)]
pub struct SyntheticModule {
    base: u64,
    width: AddressWidth,
    guard_flags: u32,
    metadata_size: u8,
    entries: Vec<(u32, u8)>,
    hashes: Vec<(u32, u64)>,
    code: Vec<(u32, Vec<u8>)>,
    symbols: Vec<(u32, String)>,
    code_size: u32,
    data_directory_count: u32,
    load_config: bool,
    declared_size: Option<u32>,
}

impl SyntheticModule {
    /// An XFG-enabled module with a one-byte metadata stride and no entries.
    pub fn new(base: u64, width: AddressWidth) -> Self {
        Self {
            base,
            width,
            guard_flags: IMAGE_GUARD_CF_INSTRUMENTED
                | IMAGE_GUARD_CF_FUNCTION_TABLE_PRESENT
                | IMAGE_GUARD_XFG_ENABLED,
            metadata_size: 1,
            entries: Vec::new(),
            hashes: Vec::new(),
            code: Vec::new(),
            symbols: Vec::new(),
            code_size: DEFAULT_CODE_SIZE,
            data_directory_count: 16,
            load_config: true,
            declared_size: None,
        }
    }

    /// Set the per-entry metadata size encoded in the guard flags.
    pub fn metadata_size(mut self, size: u8) -> Self {
        self.metadata_size = size & 0xF;
        self
    }

    /// Replace the guard flags; the metadata size is still OR-ed in.
    pub fn guard_flags(mut self, flags: u32) -> Self {
        self.guard_flags = flags & !IMAGE_GUARD_CF_FUNCTION_TABLE_SIZE_MASK;
        self
    }

    /// Size of the executable range in bytes (rounded up to pages).
    pub fn code_size(mut self, size: u32) -> Self {
        self.code_size = size;
        self
    }

    pub fn data_directory_count(mut self, count: u32) -> Self {
        self.data_directory_count = count;
        self
    }

    pub fn without_load_config(mut self) -> Self {
        self.load_config = false;
        self
    }

    /// Override the `Size` field at the start of the load-config structure.
    pub fn load_config_declared_size(mut self, size: u32) -> Self {
        self.declared_size = Some(size);
        self
    }

    /// Guard-table entry flagged for XFG, with `hash` stored 8 bytes below.
    pub fn xfg_function(mut self, rva: u32, hash: u64) -> Self {
        self.entries.push((rva, IMAGE_GUARD_FLAG_FID_XFG));
        self.hashes.push((rva, hash));
        self
    }

    /// Guard-table entry without the XFG flag.
    pub fn cfg_function(mut self, rva: u32) -> Self {
        self.entries.push((rva, 0));
        self
    }

    /// `mov r10, imm64` loading `hash` at `rva`.
    pub fn hash_load(self, rva: u32, hash: u64) -> Self {
        let mut bytes = X64_HASH_LOAD_PREFIX.to_vec();
        bytes.extend_from_slice(&hash.to_le_bytes());
        self.code(rva, &bytes)
    }

    /// Raw bytes placed at `rva`.
    pub fn code(mut self, rva: u32, bytes: &[u8]) -> Self {
        self.code.push((rva, bytes.to_vec()));
        self
    }

    pub fn symbol(mut self, rva: u32, name: impl Into<String>) -> Self {
        self.symbols.push((rva, name.into()));
        self
    }

    pub fn guard_table_address(&self) -> u64 {
        self.base + GUARD_TABLE_RVA as u64
    }

    pub fn image_size(&self) -> u64 {
        let code_pages = (self.code_size as u64).div_ceil(0x1000).max(1);
        CODE_RVA as u64 + code_pages * 0x1000
    }

    pub fn module(&self) -> ModuleImage {
        ModuleImage::new(self.base, self.image_size())
    }

    /// Materialize the module in a fresh host, selected in the CPU view.
    pub fn build(&self) -> ImageHost {
        let mut host = ImageHost::new();
        self.build_into(&mut host);
        host.select(self.base);
        host
    }

    /// Map the module into `host` without touching the selection.
    pub fn build_into(&self, host: &mut ImageHost) {
        let base = self.base;
        let image = self.image_bytes();

        host.map(base, CODE_RVA as u64, PageProtection::READ);
        host.map(
            base + CODE_RVA as u64,
            self.image_size() - CODE_RVA as u64,
            PageProtection::READ | PageProtection::EXECUTE,
        );
        host.add_module(self.module());
        // the mapping above covers the whole image
        let _ = host.write(base, &image);

        for (rva, name) in &self.symbols {
            host.add_symbol(base + *rva as u64, name.clone());
        }
    }

    /// The module as a PE file. Section and file alignment are both one page,
    /// so file offsets equal RVAs and the file is the mapped image.
    pub fn to_pe_file(&self) -> Vec<u8> {
        self.image_bytes()
    }

    fn image_bytes(&self) -> Vec<u8> {
        let width = self.width;
        let ptr = width.pointer_size();
        let image_size = self.image_size();
        let code_bytes = image_size - CODE_RVA as u64;
        let mut image = vec![0u8; image_size as usize];

        let mut put = |rva: u64, bytes: &[u8]| {
            let start = rva as usize;
            if let Some(dst) = image.get_mut(start..start + bytes.len()) {
                dst.copy_from_slice(bytes);
            }
        };
        let pointer = |v: u64| -> Vec<u8> { v.to_le_bytes()[..ptr].to_vec() };

        // DOS header
        put(0, b"MZ");
        put(DOS_E_LFANEW_OFFSET, &E_LFANEW.to_le_bytes());

        // NT signature and file header
        let nt = E_LFANEW as u64;
        let (machine, magic, characteristics) = match width {
            AddressWidth::Bits32 => (
                IMAGE_FILE_MACHINE_I386,
                IMAGE_NT_OPTIONAL_HDR32_MAGIC,
                0x0102u16,
            ),
            AddressWidth::Bits64 => (
                IMAGE_FILE_MACHINE_AMD64,
                IMAGE_NT_OPTIONAL_HDR64_MAGIC,
                0x0022u16,
            ),
        };
        put(nt, b"PE\0\0");
        let fh = nt + 4;
        put(fh, &machine.to_le_bytes());
        put(fh + 2, &2u16.to_le_bytes());
        put(fh + 16, &(width.optional_header_size() as u16).to_le_bytes());
        put(fh + 18, &characteristics.to_le_bytes());

        // optional header
        let oh = nt + NT_SIGNATURE_AND_FILE_HEADER_SIZE;
        put(oh, &magic.to_le_bytes());
        put(oh + 4, &(code_bytes as u32).to_le_bytes());
        put(oh + 16, &CODE_RVA.to_le_bytes());
        put(oh + 20, &CODE_RVA.to_le_bytes());
        match width {
            AddressWidth::Bits32 => put(oh + 28, &(self.base as u32).to_le_bytes()),
            AddressWidth::Bits64 => put(oh + 24, &self.base.to_le_bytes()),
        }
        put(oh + 32, &0x1000u32.to_le_bytes());
        put(oh + 36, &0x1000u32.to_le_bytes());
        put(oh + 40, &6u16.to_le_bytes());
        put(oh + 48, &6u16.to_le_bytes());
        put(oh + 56, &(image_size as u32).to_le_bytes());
        put(oh + 60, &0x1000u32.to_le_bytes());
        // IMAGE_SUBSYSTEM_WINDOWS_CUI
        put(oh + 68, &3u16.to_le_bytes());
        put(
            nt + width.rva_and_sizes_count_offset(),
            &self.data_directory_count.to_le_bytes(),
        );

        let struct_size = (width.guard_fields_offset() + width.guard_fields_size()) as u32;
        if self.load_config {
            let dir = nt
                + width.data_directories_offset()
                + IMAGE_DIRECTORY_ENTRY_LOAD_CONFIG as u64 * DATA_DIRECTORY_ENTRY_SIZE;
            put(dir, &LOAD_CONFIG_RVA.to_le_bytes());
            put(dir + 4, &struct_size.to_le_bytes());
        }

        // section table
        let sections = [
            (
                *b".rdata\0\0",
                LOAD_CONFIG_RVA,
                CODE_RVA - LOAD_CONFIG_RVA,
                IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
            ),
            (
                *b".text\0\0\0",
                CODE_RVA,
                code_bytes as u32,
                IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
            ),
        ];
        let table = oh + width.optional_header_size();
        for (i, (name, rva, size, flags)) in sections.iter().enumerate() {
            let sh = table + i as u64 * IMAGE_SIZEOF_SECTION_HEADER;
            put(sh, name);
            put(sh + 8, &size.to_le_bytes());
            put(sh + 12, &rva.to_le_bytes());
            put(sh + 16, &size.to_le_bytes());
            put(sh + 20, &rva.to_le_bytes());
            put(sh + 36, &flags.to_le_bytes());
        }

        // load config with the guard block
        let lc = LOAD_CONFIG_RVA as u64;
        put(lc, &self.declared_size.unwrap_or(struct_size).to_le_bytes());

        let flags = self.guard_flags
            | ((self.metadata_size as u32) << IMAGE_GUARD_CF_FUNCTION_TABLE_SIZE_SHIFT);
        let mut fields = Vec::new();
        fields.extend(pointer(0));
        fields.extend(pointer(0));
        fields.extend(pointer(self.guard_table_address()));
        fields.extend(pointer(self.entries.len() as u64));
        fields.extend_from_slice(&flags.to_le_bytes());
        put(lc + width.guard_fields_offset(), &fields);

        let stride = 4 + self.metadata_size as u64;
        for (i, (rva, meta)) in self.entries.iter().enumerate() {
            let slot = GUARD_TABLE_RVA as u64 + i as u64 * stride;
            put(slot, &rva.to_le_bytes());
            if self.metadata_size > 0 {
                put(slot + 4, &[*meta]);
            }
        }

        for (rva, hash) in &self.hashes {
            put((*rva as u64).wrapping_sub(XFG_HASH_SIZE), &hash.to_le_bytes());
        }
        for (rva, bytes) in &self.code {
            put(*rva as u64, bytes);
        }

        image
    }
}
