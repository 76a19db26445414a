//! Per-harvest virtual display for POSIX hosts.

use std::process::{Child, Command};
use tracing::{info, warn};

const DISPLAY_NUMBER: &str = ":99";
const SCREEN_GEOMETRY: &str = "800x600x24";

/// Owns an Xvfb child process for the duration of one harvest. The child is
/// killed and reaped on drop, so a failed harvest cannot leak it.
pub struct VirtualDisplay {
    child: Option<Child>,
}

impl VirtualDisplay {
    /// Start a virtual display where one is needed. On non-Linux hosts, or
    /// when Xvfb is unavailable, the harvest proceeds without one (the
    /// browser runs headless either way).
    pub fn start() -> Self {
        if !cfg!(target_os = "linux") {
            return Self { child: None };
        }
        match Command::new("Xvfb")
            .args([DISPLAY_NUMBER, "-screen", "0", SCREEN_GEOMETRY])
            .spawn()
        {
            Ok(child) => {
                std::env::set_var("DISPLAY", DISPLAY_NUMBER);
                info!("Virtual display started on {}", DISPLAY_NUMBER);
                Self { child: Some(child) }
            }
            Err(err) => {
                warn!("Could not start Xvfb, continuing without it: {}", err);
                Self { child: None }
            }
        }
    }
}

impl Drop for VirtualDisplay {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
