use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "buster")]
#[command(
    about = "Content-addressed cache busting for built static assets: hash, rename, rewrite"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Show what would be done without touching the filesystem
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Hash a build directory: rename assets and rewrite references
    Hash(HashArgs),

    /// Initialize a buster.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser)]
pub struct HashArgs {
    /// Build directory to process
    #[arg(default_value = ".")]
    pub directory: Utf8PathBuf,

    /// Truncate embedded hashes to this many characters
    #[arg(long)]
    pub hash_length: Option<usize>,

    /// Rebase rewritten references onto this origin (e.g. a CDN URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Skip source map recomposition
    #[arg(long)]
    pub no_source_maps: bool,

    /// Skip .d.ts companion processing
    #[arg(long)]
    pub no_dts: bool,

    /// Fail on extensionless specifiers that resolve to nothing
    #[arg(long)]
    pub strict_extensionless: bool,

    /// Asset manifest filename, relative to the build directory
    #[arg(long)]
    pub manifest: Option<String>,

    /// Write a JSON dump of the final document registry to this path
    #[arg(long)]
    pub registry_dump: Option<Utf8PathBuf>,

    /// Additional glob patterns to ignore while walking
    #[arg(short, long)]
    pub ignore: Vec<String>,
}

impl HashArgs {
    /// Layer CLI flags over file/environment configuration.
    pub fn apply_to(&self, config: &mut crate::infra::config::Config) {
        if self.hash_length.is_some() {
            config.hash_length = self.hash_length;
        }
        if self.base_url.is_some() {
            config.base_url = self.base_url.clone();
        }
        if self.no_source_maps {
            config.source_maps = false;
        }
        if self.no_dts {
            config.dts = false;
        }
        if self.strict_extensionless {
            config.strict_extensionless = true;
        }
        if let Some(manifest) = &self.manifest {
            config.manifest = manifest.clone();
        }
        if self.registry_dump.is_some() {
            config.registry_dump = self.registry_dump.clone();
        }
        config.ignore_patterns.extend(self.ignore.iter().cloned());
    }
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: Utf8PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<Utf8PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}
