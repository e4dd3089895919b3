pub mod admin_token;
pub mod deployment;
pub mod error;

pub use admin_token::{AdminToken, StoredToken, load_or_synthesize, token_file_path};
pub use deployment::{
    DeploymentConfig, NOT_CONFIGURED, is_unset, validate_prefix, validate_region,
};
pub use error::*;

use std::io::Write;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file directly
pub const CONFIG_ENV: &str = "AIRBRX_CONFIG";

/// Environment variable overriding the deployments directory
pub const CONFIG_DIR_ENV: &str = "AIRBRX_CONFIG_DIR";

/// Get the airbrx configuration root (`~/.config/airbrx` on Linux)
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("airbrx");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Directory holding one `{prefix}.env` document per deployment
pub fn deployments_dir() -> Result<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
        _ => Ok(get_config_dir()?.join("deployments")),
    }
}

/// Directory holding the run state and lock of one deployment
pub fn state_dir(prefix: &str) -> Result<PathBuf> {
    Ok(get_config_dir()?.join("state").join(prefix))
}

/// Every `*.env` document in `dir`, sorted
pub fn list_config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "env"))
        .collect();
    files.sort();
    Ok(files)
}

/// Find the configuration document of the deployment to operate on
///
/// Search order:
/// 1. An explicit path (`--config`)
/// 2. The `AIRBRX_CONFIG` environment variable
/// 3. The single `*.env` file in `AIRBRX_CONFIG_DIR` or
///    `~/.config/airbrx/deployments/`
///
/// Several candidates in step 3 yield `ConfigError::Ambiguous`; the CLI turns
/// that into a selection prompt.
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return existing(PathBuf::from(path));
        }
    }

    let dir = deployments_dir()?;
    let mut candidates = list_config_files(&dir)?;
    match candidates.len() {
        0 => Err(ConfigError::ConfigNotFound {
            searched: dir.display().to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(ConfigError::Ambiguous { candidates }),
    }
}

fn existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(ConfigError::ConfigFileMissing(path))
    }
}

/// Write a file readable by its owner only, creating parent directories
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;

    // mode() only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let result = get_config_dir();
        assert!(result.is_ok());

        let config_dir = result.unwrap();
        assert!(config_dir.ends_with("airbrx"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_explicit_path_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let explicit = temp_dir.path().join("custom.env");
        fs::write(&explicit, "# test").unwrap();

        temp_env::with_var(CONFIG_ENV, Some("/nonexistent/other.env"), || {
            assert_eq!(find_config_file(Some(&explicit)).unwrap(), explicit);
        });
    }

    #[test]
    #[serial]
    fn test_env_var_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("acme-dev.env");
        fs::write(&config_path, "# test").unwrap();

        temp_env::with_var(CONFIG_ENV, Some(config_path.to_str().unwrap()), || {
            assert_eq!(find_config_file(None).unwrap(), config_path);
        });
    }

    #[test]
    #[serial]
    fn test_single_candidate_in_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("acme-dev.env"), "# test").unwrap();
        fs::write(temp_dir.path().join("acme-dev.god-pat.json"), "{}").unwrap();

        temp_env::with_vars(
            [
                (CONFIG_ENV, None),
                (CONFIG_DIR_ENV, Some(temp_dir.path().to_str().unwrap())),
            ],
            || {
                let found = find_config_file(None).unwrap();
                assert!(found.ends_with("acme-dev.env"));
            },
        );
    }

    #[test]
    #[serial]
    fn test_several_candidates_are_ambiguous() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("acme-dev.env"), "# test").unwrap();
        fs::write(temp_dir.path().join("acme-prod.env"), "# test").unwrap();

        temp_env::with_vars(
            [
                (CONFIG_ENV, None),
                (CONFIG_DIR_ENV, Some(temp_dir.path().to_str().unwrap())),
            ],
            || match find_config_file(None) {
                Err(ConfigError::Ambiguous { candidates }) => {
                    assert_eq!(candidates.len(), 2);
                    assert!(candidates[0].ends_with("acme-dev.env"));
                }
                other => panic!("Expected Ambiguous error, got {:?}", other),
            },
        );
    }

    #[test]
    #[serial]
    fn test_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();

        temp_env::with_vars(
            [
                (CONFIG_ENV, None),
                (CONFIG_DIR_ENV, Some(temp_dir.path().to_str().unwrap())),
            ],
            || {
                assert!(matches!(
                    find_config_file(None),
                    Err(ConfigError::ConfigNotFound { .. })
                ));
            },
        );
    }

    #[test]
    fn test_missing_explicit_path() {
        let result = find_config_file(Some(Path::new("/nonexistent/acme.env")));
        assert!(matches!(result, Err(ConfigError::ConfigFileMissing(_))));
    }
}
