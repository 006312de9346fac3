use crate::config::EmberchatConfig;
use anyhow::Result;
use std::fs;

pub struct BootstrapResources {
    pub directories_created: Vec<String>,
}

pub fn initialize(config: &EmberchatConfig) -> Result<BootstrapResources> {
    let mut directories_created = Vec::new();
    create_dir_if_missing(&config.paths.files_dir, &mut directories_created)?;
    create_dir_if_missing(&config.paths.public_dir, &mut directories_created)?;
    create_dir_if_missing(&config.paths.archive_dir, &mut directories_created)?;

    Ok(BootstrapResources {
        directories_created,
    })
}

fn create_dir_if_missing(path: &std::path::Path, created: &mut Vec<String>) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        created.push(path.display().to_string());
    }
    Ok(())
}
