#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 16384 { return; }
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = aqlbridge::query::compile_json(s);
    }
});
