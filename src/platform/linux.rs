use super::Platform;
use std::path::PathBuf;

pub struct LinuxPlatform;

impl LinuxPlatform {
    pub fn new() -> Self {
        Self
    }

    /// Distribution name from /etc/os-release
    fn read_distro_name(&self) -> Option<String> {
        let content = std::fs::read_to_string("/etc/os-release").ok()?;
        content.lines().find_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key == "NAME").then(|| value.trim_matches('"').to_string())
        })
    }
}

impl Platform for LinuxPlatform {
    fn get_os_name(&self) -> String {
        match self.read_distro_name() {
            Some(name) => format!("Linux ({})", name),
            None => "Linux".to_string(),
        }
    }

    fn worker_binary_candidates(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("pose_server"), PathBuf::from("dist").join("pose_server")]
    }

    fn venv_python_candidates(&self) -> Vec<PathBuf> {
        let bin = PathBuf::from("venv").join("bin");
        vec![bin.join("python3.11"), bin.join("python")]
    }

    fn system_python_candidates(&self) -> Vec<&'static str> {
        vec!["python3.11", "python3.10", "python3.9", "python3"]
    }
}
