use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    fs,
    path::PathBuf,
};

pub fn default_data_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".guild-dash"))
}

/// Expand a `--data-dir` value, falling back to [`default_data_dir`].
pub fn expand_data_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => Ok(PathBuf::from(shellexpand::tilde(raw).into_owned())),
        None => default_data_dir(),
    }
}

pub fn resolve_data_dir(dir: Option<&str>) -> Result<PathBuf> {
    let dir = expand_data_dir(dir)?;
    fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("failed to create data directory {}", dir.display()))?;
    Ok(dir)
}

/// Sled database holding the last selected guild.
pub fn preferences_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("preferences")
}
