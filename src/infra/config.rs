//! Configuration: `buster.toml` plus `BUSTER_`-prefixed environment
//! variables, with CLI flags layered on top by the command handlers.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cli::{AppContext, InitArgs};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hash prefix length embedded into filenames; unset keeps full hashes.
    pub hash_length: Option<usize>,

    /// Origin to rebase rewritten references and manifest entries onto.
    pub base_url: Option<String>,

    /// Regenerate source maps alongside content rewrites.
    pub source_maps: bool,

    /// Process `.d.ts` companions in lockstep with their primaries.
    pub dts: bool,

    /// Asset manifest filename, written into the build directory.
    pub manifest: String,

    /// Optional path for a JSON dump of the final registry (debugging).
    pub registry_dump: Option<Utf8PathBuf>,

    /// Fail on extensionless specifiers that resolve to nothing instead of
    /// dropping them as probable client-side routes.
    pub strict_extensionless: bool,

    /// Ignore patterns applied while walking the build directory (in
    /// addition to gitignore rules).
    pub ignore_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_length: None,
            base_url: None,
            source_maps: true,
            dts: true,
            manifest: "asset-manifest.json".to_string(),
            registry_dump: None,
            strict_extensionless: false,
            ignore_patterns: vec!["*.LICENSE.txt".to_string()],
        }
    }
}

pub fn load_config() -> Result<Config> {
    let mut builder = config::Config::builder();

    let config_paths = ["buster.toml", ".buster.toml"];
    for path in &config_paths {
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // BUSTER_HASH_LENGTH=8, BUSTER_BASE_URL=..., etc.
    builder = builder.add_source(config::Environment::with_prefix("BUSTER"));

    let cfg = builder.build().context("failed to load configuration")?;
    let parsed: Config = cfg.try_deserialize().context("failed to parse configuration")?;
    Ok(parsed)
}

pub fn init(args: InitArgs, ctx: &AppContext) -> Result<()> {
    let config_path = args.path.join("buster.toml");

    if config_path.exists() && !args.force {
        anyhow::bail!("config file already exists at {config_path}; use --force to overwrite");
    }

    let config = Config::default();
    let toml_string = toml::to_string_pretty(&config).context("failed to serialize default config")?;

    std::fs::write(&config_path, toml_string)
        .with_context(|| format!("failed to write {config_path}"))?;

    if !ctx.quiet {
        println!("Created config file at {config_path}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert!(config.source_maps);
        assert!(config.dts);
        assert!(!config.strict_extensionless);
        assert_eq!(config.manifest, "asset-manifest.json");
        assert_eq!(config.hash_length, None);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let parsed: Config = toml::from_str("hash_length = 12\nsource_maps = false\n").unwrap();
        assert_eq!(parsed.hash_length, Some(12));
        assert!(!parsed.source_maps);
        assert_eq!(parsed.manifest, "asset-manifest.json");
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = Config::default();
        let s = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.manifest, config.manifest);
        assert_eq!(back.ignore_patterns, config.ignore_patterns);
    }
}
