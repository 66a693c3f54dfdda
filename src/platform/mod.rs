use std::path::PathBuf;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
mod linux;

pub mod pose;

/// Platform abstraction trait for locating and launching the pose worker
pub trait Platform: Send + Sync {
    /// Get the operating system name
    fn get_os_name(&self) -> String;

    /// Bundled worker binaries, relative to a search root, most preferred first
    fn worker_binary_candidates(&self) -> Vec<PathBuf>;

    /// Virtualenv interpreters, relative to a search root, most preferred first
    fn venv_python_candidates(&self) -> Vec<PathBuf>;

    /// Interpreters probed on PATH when no virtualenv is present
    fn system_python_candidates(&self) -> Vec<&'static str>;

    /// Separator used when extending PATH for a virtualenv child
    fn path_separator(&self) -> char {
        ':'
    }
}

/// Get the current platform implementation
pub fn get_platform() -> Box<dyn Platform> {
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::MacOSPlatform::new())
    }

    #[cfg(target_os = "windows")]
    {
        Box::new(windows::WindowsPlatform::new())
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Box::new(linux::LinuxPlatform::new())
    }
}
