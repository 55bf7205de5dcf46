use std::path::PathBuf;

pub const BACK_TCP_PORT: u16 = 12001;
const BACK_TCP_HOST: &str = "127.0.0.1";

pub fn back_address() -> String {
    format!("{}:{}", BACK_TCP_HOST, BACK_TCP_PORT)
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/launcher on every unix, macOS included
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("launcher")
    }
    #[cfg(windows)]
    {
        // Portable installs keep data beside the executable
        if let Some(dir) = exe_dir() {
            let portable_data = dir.join("data");
            if portable_data.exists() {
                return portable_data;
            }
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("launcher")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(dir) = exe_dir() {
            if dir.join("config.toml").exists() {
                return dir;
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("launcher")
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("launcher")
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn cache_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(temp_dir)
            .join(".cache")
            .join("launcher")
    }
    #[cfg(windows)]
    {
        dirs::cache_dir().unwrap_or_else(temp_dir).join("launcher")
    }
}

fn exe_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(|p| p.to_path_buf())
}

#[cfg(unix)]
fn extractor_binary_names() -> &'static [&'static str] {
    &["7z", "7za", "bsdtar", "tar"]
}

#[cfg(windows)]
fn extractor_binary_names() -> &'static [&'static str] {
    &["7z.exe", "7za.exe", "tar.exe"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let dir = exe_dir()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        for name in names {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find an archive extractor for upgrade packages.
///
/// Searches in order:
/// 1. LAUNCHER_EXTRACTOR environment variable
/// 2. Beside the current executable (or its `external/` folder)
/// 3. PATH
pub fn find_extractor_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("LAUNCHER_EXTRACTOR") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(p) = find_beside_exe(extractor_binary_names()) {
        return Some(p);
    }

    find_on_path(extractor_binary_names())
}
