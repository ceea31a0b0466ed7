//! keptler - Generate secrets declared in an env template
//!
//! Commands:
//! - generate: Materialize annotated secrets into an env file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use keptler::config::state_path_for;
use keptler::{Config, Materializer, Template};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keptler")]
#[command(about = "Generate secrets from an annotated env template, kept in age-encrypted state")]
#[command(version)]
#[command(after_help = r#"TEMPLATE ANNOTATIONS:
    # keptler: random length=40 charset=urlsafe
    SESSION_KEY=
    SIGNING_KEY= # keptler: rsa-private-key bits=4096 format=pkcs8

RULES:
    random            length (32), charset: alnum | hex | base64 | urlsafe
    rsa-private-key   bits (2048), format: pkcs1 | pkcs8
    derive            source: name of another secret

STATE:
    Values are kept in .keptler.state.age next to the output file,
    encrypted with the passphrase in KEPTLER_STATE_PASSPHRASE."#)]
struct Cli {
    /// Suppress non-error output
    #[arg(long, global = true)]
    quiet: bool,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Disable ANSI colours
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate secrets from a template
    Generate {
        /// Template file
        #[arg(short = 'f', long = "file", default_value = "env.example")]
        template: PathBuf,

        /// Output file
        #[arg(short = 'o', long = "output", default_value = "secret.env")]
        output: PathBuf,

        /// State file (default: .keptler.state.age next to the output file)
        #[arg(long)]
        state: Option<PathBuf>,

        /// Fall back to the legacy built-in passphrase when
        /// KEPTLER_STATE_PASSPHRASE is unset (insecure)
        #[arg(long)]
        insecure_default_passphrase: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Generate {
            template,
            output,
            state,
            insecure_default_passphrase,
        } => cmd_generate(
            &template,
            &output,
            state,
            insecure_default_passphrase,
            cli.quiet,
            cli.json,
        ),
    }
}

/// Materialize the template into the output file
fn cmd_generate(
    template: &Path,
    output: &Path,
    state: Option<PathBuf>,
    insecure_default_passphrase: bool,
    quiet: bool,
    json: bool,
) -> Result<()> {
    let config = Config::from_env(insecure_default_passphrase)?;

    let tmpl = Template::load(template).context("parse template")?;
    if tmpl.is_empty() && !json {
        if !quiet {
            println!("No keptler annotations in {}", template.display());
        }
        return Ok(());
    }

    let state_path = state.unwrap_or_else(|| state_path_for(output));

    let values = Materializer::new(config).materialize(&tmpl, output, &state_path)?;

    if json {
        let names: Vec<&str> = values.keys().map(String::as_str).collect();
        let report = serde_json::json!({
            "secrets": names,
            "destination": output.display().to_string(),
            "state": state_path.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if quiet {
        return Ok(());
    }

    for name in values.keys() {
        println!("{} {}", "generated".green(), name);
    }

    Ok(())
}
