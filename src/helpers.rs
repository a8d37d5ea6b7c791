use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;

pub fn read_data(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => bail!("{} is a directory", path.display()),
        Ok(_) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error).with_context(|| format!("reading {}", path.display())),
    }

    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;

    Ok(Some(data))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = read_data(path)?.with_context(|| format!("{} does not exist", path.display()))?;

    serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
}

pub fn write_data(path: &Path, data: String) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    fs::write(path, format!("{data}\n")).with_context(|| format!("writing {}", path.display()))?;

    Ok(())
}

pub fn remove_data(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != ErrorKind::NotFound => {
            Err(error).with_context(|| format!("removing {}", path.display()))
        }
        _ => Ok(()),
    }
}
