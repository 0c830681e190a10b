//! `adm config` – show the effective configuration.

use anyhow::Result;

pub fn run_config(path_only: bool) -> Result<()> {
    if path_only {
        println!("{}", adm_core::config::config_path()?.display());
        return Ok(());
    }
    let cfg = adm_core::config::load_or_init()?;
    print!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}
