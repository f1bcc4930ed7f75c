#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(data) {
        // Parsing and rendering must reject bad shapes without panicking
        let _ = aqlbridge::query::render_filter(&v);
    }
});
