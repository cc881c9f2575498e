#![no_main]
use libfuzzer_sys::fuzz_target;
use xfg_marker::loader::{load_pe_bytes, LoadLimits};
use xfg_marker::{MarkerConfig, XfgMarker};

fuzz_target!(|data: &[u8]| {
    let limits = LoadLimits {
        max_file_size: 1 << 20,
        max_image_size: 16 << 20,
    };
    if let Ok(mut loaded) = load_pe_bytes(data, limits) {
        let _ = XfgMarker::new(loaded.width).run(&mut loaded.host, &MarkerConfig::default());
    }
});
