use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const CONFIG_FILE: &str = "config.yaml";

pub fn gridsync_root(home: &Path) -> PathBuf {
    home.join(".gridsync")
}

pub fn socket_path(home: &Path) -> PathBuf {
    gridsync_root(home).join(DAEMON_SOCKET)
}

pub fn config_path(home: &Path) -> PathBuf {
    gridsync_root(home).join(CONFIG_FILE)
}
