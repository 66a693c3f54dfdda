use super::Platform;
use std::path::PathBuf;

pub struct WindowsPlatform;

impl WindowsPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for WindowsPlatform {
    fn get_os_name(&self) -> String {
        "Windows".to_string()
    }

    fn worker_binary_candidates(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("pose_server.exe"), PathBuf::from("dist").join("pose_server.exe")]
    }

    fn venv_python_candidates(&self) -> Vec<PathBuf> {
        let scripts = PathBuf::from("venv").join("Scripts");
        vec![scripts.join("python.exe")]
    }

    fn system_python_candidates(&self) -> Vec<&'static str> {
        vec!["python"]
    }

    fn path_separator(&self) -> char {
        ';'
    }
}
