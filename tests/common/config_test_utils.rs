use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

/// Variables the config tests read or set.
const TOUCHED_VARS: &[&str] = &[
    "QRDROP_PORT",
    "QRDROP_INTERFACE",
    "QRDROP_KEEP_ALIVE",
    "QRDROP_TLS_MIN_VERSION",
    "QRDROP_SHUTDOWN_GRACE_SECS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvRestore {
    fn capture() -> Self {
        let saved = TOUCHED_VARS
            .iter()
            .map(|name| (*name, std::env::var_os(name)))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}

/// Run `f` with a config file holding `config_toml` and exactly the given
/// `QRDROP_*` variables set. The environment is restored afterwards.
pub fn with_config_env<T>(
    config_toml: &str,
    env: &[(&str, &str)],
    f: impl FnOnce(PathBuf) -> T,
) -> T {
    let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, config_toml).expect("write config");

    let restore = EnvRestore::capture();
    for name in TOUCHED_VARS {
        std::env::remove_var(name);
    }
    for (name, value) in env {
        std::env::set_var(name, value);
    }

    let result = f(path);
    drop(restore);
    result
}
