use super::Platform;
use std::path::PathBuf;
use std::process::Command;

pub struct MacOSPlatform;

impl MacOSPlatform {
    pub fn new() -> Self {
        Self
    }

    /// Get the product name using sw_vers command
    fn get_sw_vers_output(&self, flag: &str) -> String {
        Command::new("sw_vers")
            .arg(flag)
            .output()
            .ok()
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "macOS".to_string())
    }
}

impl Platform for MacOSPlatform {
    fn get_os_name(&self) -> String {
        self.get_sw_vers_output("-productName")
    }

    fn worker_binary_candidates(&self) -> Vec<PathBuf> {
        vec![
            PathBuf::from("pose_server.app/Contents/MacOS/pose_server"),
            PathBuf::from("pose_server"),
            PathBuf::from("dist/pose_server.app/Contents/MacOS/pose_server"),
            PathBuf::from("dist/pose_server"),
        ]
    }

    fn venv_python_candidates(&self) -> Vec<PathBuf> {
        let bin = PathBuf::from("venv").join("bin");
        vec![bin.join("python3.11"), bin.join("python")]
    }

    fn system_python_candidates(&self) -> Vec<&'static str> {
        vec!["python3.11", "python3.10", "python3.9", "python3"]
    }
}
