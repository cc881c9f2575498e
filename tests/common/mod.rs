//! Shared fixtures for integration tests.

#![allow(dead_code)]

use xfg_marker::synth::{SyntheticModule, CODE_RVA};
use xfg_marker::AddressWidth;

pub const BASE: u64 = 0x1_4000_0000;

pub const H1: u64 = 0x1122_3344_5566_7788;
pub const H2: u64 = 0x0A0B_0C0D_0E0F_1010;

pub const F1: u32 = CODE_RVA + 0x100;
pub const F2: u32 = CODE_RVA + 0x200;
pub const F3: u32 = CODE_RVA + 0x300;

pub const SITE1: u32 = CODE_RVA + 0x1000;
pub const SITE2: u32 = CODE_RVA + 0x1100;
pub const SITE3: u32 = CODE_RVA + 0x1200;

pub fn va(rva: u32) -> u64 {
    BASE + rva as u64
}

/// Three XFG targets: F1 and F2 share H1 (F2 with the low bit set), F3 has
/// H2. Two sites load H1 and one loads H2.
pub fn scenario_a() -> SyntheticModule {
    SyntheticModule::new(BASE, AddressWidth::Bits64)
        .xfg_function(F1, H1)
        .cfg_function(CODE_RVA + 0x180)
        .xfg_function(F2, H1 | 1)
        .xfg_function(F3, H2)
        .hash_load(SITE1, H1)
        .hash_load(SITE2, H1 | 1)
        .hash_load(SITE3, H2)
        // unrelated immediate load
        .hash_load(CODE_RVA + 0x1300, 0xDEAD_BEEF)
        .symbol(F1, "_ZN6Button7onClickEi")
        .symbol(F2, "HandleClick")
}
