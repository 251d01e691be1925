//! Deferred startup callbacks.
//!
//! Subsystems that need configuration before they can finish wiring
//! register a named callback at process start; the daemon runs the
//! whole set exactly once after the configuration is loaded, in
//! registration order.

use std::sync::{Mutex, OnceLock};

use crate::config::ServerConfig;

type Callback = fn(&ServerConfig);

fn callbacks() -> &'static Mutex<Vec<(String, Callback)>> {
    static CALLBACKS: OnceLock<Mutex<Vec<(String, Callback)>>> = OnceLock::new();
    CALLBACKS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Registers a deferred callback. Call before [`run`]; callbacks
/// registered afterwards wait for the next process start.
pub fn register(name: &str, callback: Callback) {
    let mut table = match callbacks().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    table.push((name.to_string(), callback));
}

/// Runs every registered callback once, in registration order.
///
/// Later invocations are no-ops; the table is drained on first run.
pub fn run(config: &ServerConfig) {
    let drained: Vec<(String, Callback)> = {
        let mut table = match callbacks().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *table)
    };
    for (name, callback) in drained {
        tracing::debug!(callback = %name, "running startup callback");
        callback(config);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static FIRES: AtomicUsize = AtomicUsize::new(0);

    fn count_fire(_config: &ServerConfig) {
        FIRES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn callbacks_fire_once_in_order() {
        register("first", count_fire);
        register("second", count_fire);

        let config = ServerConfig::default();
        run(&config);
        assert_eq!(FIRES.load(Ordering::SeqCst), 2);

        // The table drained; running again fires nothing.
        run(&config);
        assert_eq!(FIRES.load(Ordering::SeqCst), 2);
    }
}
