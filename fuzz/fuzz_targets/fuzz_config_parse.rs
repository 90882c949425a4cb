#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = convoy::Config::from_toml(text) {
            // Anything that parses and validates must build a pool.
            assert!(config.pool.queue_capacity > 0);
            let _ = convoy::create_task_pool::<u64>(&config.pool).expect("validated config");
        }
    }
});
