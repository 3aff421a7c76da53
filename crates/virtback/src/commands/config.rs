//! Config command

use anyhow::{anyhow, Result};
use camino::Utf8Path;
use std::fs;
use virtback_core::config::CONFIG_FILE_NAME;
use virtback_core::RuntimeConfig;

use crate::cli::{ConfigCommands, ConfigInitArgs, ConfigShowArgs};
use crate::commands::{config_loader, Outcome};
use crate::output;

pub fn run(cmd: ConfigCommands, config_dir: Option<&Utf8Path>) -> Result<Outcome> {
    match cmd {
        ConfigCommands::Init(args) => init(args, config_dir),
        ConfigCommands::Show(args) => show(args, config_dir),
        ConfigCommands::Path => {
            let loader = config_loader(config_dir)?;
            println!("{}", loader.config_dir().join(CONFIG_FILE_NAME));
            Ok(Outcome::default())
        }
    }
}

fn init(args: ConfigInitArgs, config_dir: Option<&Utf8Path>) -> Result<Outcome> {
    let loader = config_loader(config_dir)?;
    let path = loader.config_dir().join(CONFIG_FILE_NAME);

    // Check if file exists
    if path.exists() && !args.force {
        return Err(anyhow!(
            "File {} already exists. Use --force to overwrite.",
            path
        ));
    }

    fs::create_dir_all(loader.config_dir())?;
    let content = serde_yaml_ng::to_string(&RuntimeConfig::default())?;
    fs::write(&path, content)?;

    output::success(&format!("Created {}", path));
    Ok(Outcome::default())
}

fn show(args: ConfigShowArgs, config_dir: Option<&Utf8Path>) -> Result<Outcome> {
    let config = config_loader(config_dir)?.load_runtime_config()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", serde_yaml_ng::to_string(&config)?);
    }

    Ok(Outcome::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap().join("cfg");

        init(ConfigInitArgs { force: false }, Some(&dir)).unwrap();
        let written = dir.join(CONFIG_FILE_NAME);
        assert!(written.exists());

        let parsed: RuntimeConfig =
            serde_yaml_ng::from_str(&fs::read_to_string(&written).unwrap()).unwrap();
        assert_eq!(parsed.backup.checkpoint_prefix, "virtback");

        assert!(init(ConfigInitArgs { force: false }, Some(&dir)).is_err());
        assert!(init(ConfigInitArgs { force: true }, Some(&dir)).is_ok());
    }
}
