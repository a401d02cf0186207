//! Launch artifact generation.
//!
//! The server is not spawned directly: a platform-specific launch script is
//! generated and that script is executed as the child process. The script
//! carries the environment the server binary expects.
//!
//! Platform differences (script format, server binary name, permission
//! semantics) live in [`LaunchPlan`], selected once at construction.

use std::path::{Path, PathBuf};
use tracing::info;
use valman_common::{ServerOptions, SupervisorError, SupervisorResult};

/// Platform capability bundle for launching the server.
#[derive(Debug, Clone, Copy)]
pub struct LaunchPlan {
    /// Name the server process shows up as in the process table.
    pub process_name: &'static str,
    /// File name of the generated launch script.
    pub launch_file_name: &'static str,
}

/// The launch plan for the platform this binary was built for.
pub fn native_plan() -> LaunchPlan {
    #[cfg(windows)]
    {
        LaunchPlan {
            process_name: "valheim_server.exe",
            launch_file_name: "launcher.bat",
        }
    }

    #[cfg(not(windows))]
    {
        LaunchPlan {
            process_name: "valheim_server.x86_64",
            launch_file_name: "launcher.sh",
        }
    }
}

impl LaunchPlan {
    /// Full path of the launch script inside the server directory.
    pub fn launch_file(&self, server_dir: &Path) -> PathBuf {
        server_dir.join(self.launch_file_name)
    }

    /// Generate the launch script for `server`.
    ///
    /// Returns whether the artifact carries the expected executable
    /// permissions. Callers should not attempt a start when this returns
    /// `false`.
    pub fn generate(&self, server: &ServerOptions) -> SupervisorResult<bool> {
        info!("generating the launch file");

        let launch_file = self.launch_file(&server.server_location);
        let server_binary = server.server_location.join(self.process_name);

        #[cfg(windows)]
        {
            generate_windows_launcher(&launch_file, &server_binary, server)
        }

        #[cfg(not(windows))]
        {
            generate_unix_launcher(&launch_file, &server_binary, server)
        }
    }
}

/// Write the shell launch script and verify its mode is 0o755.
#[cfg(not(windows))]
fn generate_unix_launcher(
    launch_file: &Path,
    server_binary: &Path,
    server: &ServerOptions,
) -> SupervisorResult<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mut content = String::new();
    content.push_str("\n# Launch file generated by valman. Not intended for manual interaction.");
    content.push_str("\nexport TERM=xterm");
    content.push_str("\nexport templdpath=$LD_LIBRARY_PATH");
    content.push_str("\nexport LD_LIBRARY_PATH=./linux64:$LD_LIBRARY_PATH");
    content.push_str("\nexport SteamAppId=892970");
    content.push_str(&format!(
        "\n{} -name \"{}\" -port {} -world \"{}\"",
        server_binary.display(),
        server.name,
        server.port,
        server.world
    ));
    if !server.password.is_empty() {
        content.push_str(&format!(" -password \"{}\"", server.password));
    }
    content.push_str("\nexport LD_LIBRARY_PATH=$templdpath\n");

    std::fs::write(launch_file, content)
        .map_err(|e| SupervisorError::launch_artifact(format!("failed to write launch file: {}", e)))?;

    let mut permissions = std::fs::metadata(launch_file)
        .map_err(|e| SupervisorError::launch_artifact(format!("failed to stat launch file: {}", e)))?
        .permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(launch_file, permissions).map_err(|e| {
        SupervisorError::launch_artifact(format!("failed to set launch file permissions: {}", e))
    })?;

    let mode = std::fs::metadata(launch_file)
        .map_err(|e| SupervisorError::launch_artifact(format!("failed to stat launch file: {}", e)))?
        .permissions()
        .mode();

    Ok(mode & 0o7777 == 0o755)
}

/// Write the batch launch script. Windows has no mode bits to verify, so a
/// non-empty file counts as a usable artifact.
#[cfg(windows)]
fn generate_windows_launcher(
    launch_file: &Path,
    server_binary: &Path,
    server: &ServerOptions,
) -> SupervisorResult<bool> {
    let mut content = String::new();
    content.push_str("\nREM Launch file generated by valman. Not intended for manual interaction.");
    content.push_str("\nset SteamAppId=892970");
    content.push_str(&format!(
        "\n\"{}\" -nographics -batchmode -name \"{}\" -port {} -world \"{}\"",
        server_binary.display(),
        server.name,
        server.port,
        server.world
    ));
    if !server.password.is_empty() {
        content.push_str(&format!(" -password \"{}\"", server.password));
    }
    content.push('\n');

    std::fs::write(launch_file, content)
        .map_err(|e| SupervisorError::launch_artifact(format!("failed to write launch file: {}", e)))?;

    let metadata = std::fs::metadata(launch_file)
        .map_err(|e| SupervisorError::launch_artifact(format!("failed to stat launch file: {}", e)))?;

    Ok(metadata.len() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_server(dir: &Path, password: &str) -> ServerOptions {
        ServerOptions {
            name: "My Server".to_string(),
            port: 2456,
            world: "Midgard".to_string(),
            password: password.to_string(),
            server_location: dir.to_path_buf(),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_generate_writes_script_with_expected_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let plan = native_plan();
        let server = sample_server(dir.path(), "hunter2");

        let verified = plan.generate(&server).unwrap();
        assert!(verified);

        let launch_file = plan.launch_file(dir.path());
        let content = std::fs::read_to_string(&launch_file).unwrap();
        assert!(content.contains("-world \"Midgard\""));
        assert!(content.contains("-port 2456"));
        assert!(content.contains("-password \"hunter2\""));
        assert!(content.contains("SteamAppId=892970"));

        let mode = std::fs::metadata(&launch_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);
    }

    #[test]
    fn test_empty_password_omits_flag() {
        let dir = tempfile::tempdir().unwrap();
        let plan = native_plan();
        let server = sample_server(dir.path(), "");

        plan.generate(&server).unwrap();

        let content = std::fs::read_to_string(plan.launch_file(dir.path())).unwrap();
        assert!(!content.contains("-password"));
    }
}
