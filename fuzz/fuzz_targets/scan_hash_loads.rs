#![no_main]
use libfuzzer_sys::fuzz_target;
use xfg_marker::pe::X64_HASH_LOAD_PREFIX;
use xfg_marker::xfg::find_hash_loads;

fuzz_target!(|data: &[u8]| {
    let mut last = None;
    for hit in find_hash_loads(data, &X64_HASH_LOAD_PREFIX) {
        assert!(hit.offset + 10 <= data.len());
        assert_eq!(hit.hash & 1, 0);
        if let Some(prev) = last {
            assert!(hit.offset >= prev + 10);
        }
        last = Some(hit.offset);
    }
});
