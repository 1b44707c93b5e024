//! Executable resolution: turn a descriptor path into a runnable command.
//!
//! Servers are shipped as scripts; the file extension decides which
//! interpreter launches them (`.js` → node, `.py` → python, ...).

use std::path::{Path, PathBuf};

use super::errors::McpError;

// ─── Launcher ────────────────────────────────────────────────────────────────

/// Interpreter invocation for one server script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    /// Program to execute (looked up on `PATH`).
    pub program: String,
    /// Arguments placed before the script path.
    pub leading_args: Vec<String>,
}

impl Launcher {
    fn new(program: &str, leading_args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            leading_args: leading_args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Full argument vector: leading args followed by the script path.
    pub fn args_for(&self, script: &Path) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push(script.to_string_lossy().into_owned());
        args
    }
}

// ─── Platform Helpers ────────────────────────────────────────────────────────

/// Platform-correct npx command (`npx.cmd` on Windows).
fn default_npx_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "npx.cmd"
    } else {
        "npx"
    }
}

/// Platform-correct Python command.
///
/// macOS 12.3+ ships only `python3`; Windows installs `python.exe`.
fn default_python_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}

/// Map a script's extension to its interpreter.
pub fn launcher_for(server: &str, script: &Path) -> Result<Launcher, McpError> {
    let ext = script
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "js" | "mjs" | "cjs" => Ok(Launcher::new("node", &[])),
        "py" => Ok(Launcher::new(default_python_command(), &[])),
        "ts" => Ok(Launcher::new(default_npx_command(), &["tsx"])),
        "sh" => Ok(Launcher::new("sh", &[])),
        "" => Err(McpError::config(
            server,
            format!("'{}' has no file extension; cannot pick an interpreter", script.display()),
        )),
        other => Err(McpError::config(
            server,
            format!("unsupported server file type '.{other}'"),
        )),
    }
}

// ─── Path Resolution ─────────────────────────────────────────────────────────

/// Resolve a descriptor's executable path to an absolute regular file.
///
/// The literal path is tried first (relative paths against the current
/// directory); if nothing exists there, the path is retried relative to
/// `working_root`.
pub fn resolve_executable(
    server: &str,
    raw_path: &str,
    working_root: &Path,
) -> Result<PathBuf, McpError> {
    let trimmed = raw_path.trim();
    if trimmed.is_empty() {
        return Err(McpError::config(server, "executable path is empty"));
    }

    let literal = absolutize(Path::new(trimmed), server)?;
    let resolved = if literal.exists() {
        literal
    } else {
        let fallback = absolutize(&working_root.join(trimmed), server)?;
        if !fallback.exists() {
            return Err(McpError::config(
                server,
                format!(
                    "executable '{trimmed}' not found (also tried {})",
                    fallback.display()
                ),
            ));
        }
        fallback
    };

    let meta = std::fs::metadata(&resolved).map_err(|e| {
        McpError::config(server, format!("cannot stat {}: {e}", resolved.display()))
    })?;
    if !meta.is_file() {
        return Err(McpError::config(
            server,
            format!("{} is not a regular file", resolved.display()),
        ));
    }

    Ok(resolved)
}

fn absolutize(path: &Path, server: &str) -> Result<PathBuf, McpError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| {
        McpError::config(server, format!("cannot read current directory: {e}"))
    })?;
    Ok(cwd.join(path))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_launcher_for_known_extensions() {
        assert_eq!(launcher_for("s", Path::new("a/index.js")).unwrap().program, "node");
        assert_eq!(launcher_for("s", Path::new("a/index.MJS")).unwrap().program, "node");
        assert_eq!(
            launcher_for("s", Path::new("srv.py")).unwrap().program,
            default_python_command()
        );
        let ts = launcher_for("s", Path::new("src/index.ts")).unwrap();
        assert_eq!(ts.program, default_npx_command());
        assert_eq!(ts.leading_args, vec!["tsx"]);
    }

    #[test]
    fn test_launcher_unsupported_extension() {
        let err = launcher_for("s", Path::new("server.exe")).unwrap_err();
        assert!(err.to_string().contains("unsupported server file type '.exe'"));
    }

    #[test]
    fn test_launcher_no_extension() {
        assert!(launcher_for("s", Path::new("server")).is_err());
    }

    #[test]
    fn test_args_for_appends_script() {
        let ts = launcher_for("s", Path::new("index.ts")).unwrap();
        assert_eq!(ts.args_for(Path::new("/srv/index.ts")), vec!["tsx", "/srv/index.ts"]);
    }

    #[test]
    fn test_resolve_absolute_existing_file() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("index.js");
        std::fs::write(&script, "// server").unwrap();

        let resolved = resolve_executable("s", script.to_str().unwrap(), Path::new("/nowhere")).unwrap();
        assert_eq!(resolved, script);
    }

    #[test]
    fn test_resolve_falls_back_to_working_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("servers/weather")).unwrap();
        let script = tmp.path().join("servers/weather/index.js");
        std::fs::write(&script, "// server").unwrap();

        let resolved =
            resolve_executable("weather", "servers/weather/index.js", tmp.path()).unwrap();
        assert_eq!(resolved, script);
    }

    #[test]
    fn test_resolve_missing_path() {
        let tmp = TempDir::new().unwrap();
        let err = resolve_executable("ghost", "does/not/exist.js", tmp.path()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_resolve_directory_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = resolve_executable("dir", tmp.path().to_str().unwrap(), tmp.path()).unwrap_err();
        assert!(err.to_string().contains("not a regular file"));
    }

    #[test]
    fn test_resolve_empty_path() {
        assert!(resolve_executable("s", "  ", Path::new(".")).is_err());
    }
}
