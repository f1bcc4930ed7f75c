#![no_main]
use aqlbridge::query::{UpdateMode, normalize};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(data) {
        for mode in [UpdateMode::Value, UpdateMode::SetExpression, UpdateMode::Insert] {
            if let Ok(n) = normalize(&v, mode) {
                let _ = n.render_object();
            }
        }
    }
});
