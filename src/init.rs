use std::path::PathBuf;

use anyhow::bail;
use tome_core::Config;

/// Write a default config file for editing.
pub fn run(output: Option<PathBuf>) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(|| PathBuf::from("tome.toml"));
    if path.exists() {
        bail!(
            "{} already exists; delete it first or pass --output",
            path.display()
        );
    }

    let toml_str = toml::to_string_pretty(&Config::default())?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &toml_str)?;

    println!("Config written to {}", path.display());
    println!("\nNext steps:");
    println!("  1. Review {} (provider, models, paths)", path.display());
    println!("  2. Ingest something: tome add --title \"Notes\" notes.txt");
    println!("  3. Ask a question:   tome ask \"what do my notes say about X?\"");
    Ok(())
}
