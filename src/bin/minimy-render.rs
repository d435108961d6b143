use anyhow::Context as _;
use clap::Parser;
use minimy_template::error::ErrorChain;
use minimy_template::{Environment, ViewConfig};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minimy-render")]
#[command(about = "Render a minimy template with JSON data")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Template name relative to the views directory, or source text with --inline
    template: String,

    /// Treat TEMPLATE as template source instead of a name
    #[arg(short, long)]
    inline: bool,

    /// Views directory (overrides the configuration)
    #[arg(long)]
    views: Option<PathBuf>,

    /// JSON file holding the render context
    #[arg(short, long, conflicts_with = "json")]
    data: Option<PathBuf>,

    /// Render context given as a JSON string
    #[arg(short, long)]
    json: Option<String>,

    /// TOML configuration file with a [views] table
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail on expressions that cannot be resolved
    #[arg(long)]
    strict: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let mut config = match &cli.config {
        Some(path) => ViewConfig::from_file(path)?,
        None => ViewConfig::load_with_base_dir(".")?,
    };
    if let Some(views) = &cli.views {
        config.directory = views.to_string_lossy().into_owned();
    }
    if cli.strict {
        config.strict_undefined = true;
    }

    let data: Value = match (&cli.data, &cli.json) {
        (Some(path), _) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?
        }
        (None, Some(json)) => serde_json::from_str(json).context("--json is not valid JSON")?,
        (None, None) => Value::Null,
    };

    let env = Environment::from_config(config);
    let result = if cli.inline {
        env.render_str(&cli.template, &data)
    } else {
        env.render(&cli.template, &data)
    };

    match result {
        Ok(output) => {
            print!("{}", output);
            Ok(())
        }
        Err(e) => {
            log::debug!("render failed: {}", ErrorChain::new(&e).format_for_log());
            anyhow::bail!("{}", ErrorChain::new(&e))
        }
    }
}
