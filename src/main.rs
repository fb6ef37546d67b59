//! tektonc CLI - render + expand Tekton templates with loop nodes

use std::fs;
use std::io::{self, Read, Write};

use clap::{CommandFactory, Parser};
use colored::Colorize;
use tracing::info;

use tektonc::{explain_table, Compiler, FixSuggestion, Scope, TaskNaming, TektoncError};

const STDIN: &str = "-";

#[derive(Parser)]
#[command(name = "tektonc")]
#[command(about = "Render + expand Tekton templates with loop nodes")]
#[command(version)]
struct Cli {
    /// Template file (use - for stdin)
    #[arg(short, long)]
    template: String,

    /// YAML/JSON values file (use - for stdin)
    #[arg(short = 'f', long)]
    values: String,

    /// Output YAML file (default: stdout)
    #[arg(short, long)]
    out: Option<String>,

    /// Print name/runAfter table to stderr after expansion
    #[arg(long)]
    explain: bool,

    /// How tasks emitted by loops are named
    #[arg(long, value_enum, default_value_t = TaskNaming::LoopIndex)]
    naming: TaskNaming,
}

fn main() {
    // Logs go to stderr; stdout carries only the pipeline
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.template == STDIN && cli.values == STDIN {
        Cli::command()
            .error(
                clap::error::ErrorKind::ArgumentConflict,
                "--template and --values cannot both read stdin",
            )
            .exit();
    }

    if let Err(e) = run(&cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(e.exit_code());
    }
}

fn run(cli: &Cli) -> Result<(), TektoncError> {
    let globals = Scope::from_yaml_str(&read_text(&cli.values)?)?;
    let template_src = read_text(&cli.template)?;

    let compiler = Compiler::new().with_naming(cli.naming);
    let expanded = compiler.compile(&template_src, &globals)?;

    if cli.explain {
        eprint!("{}", explain_table(&expanded));
    }

    let out_text = serde_yaml::to_string(&expanded)?;
    match cli.out.as_deref() {
        Some(path) if path != STDIN => {
            fs::write(path, out_text).map_err(|e| TektoncError::io(path, e))?;
            info!(path, "wrote expanded pipeline");
        }
        _ => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(out_text.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|e| TektoncError::io("<stdout>", e))?;
        }
    }
    Ok(())
}

fn read_text(path: &str) -> Result<String, TektoncError> {
    if path == STDIN {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| TektoncError::io("<stdin>", e))?;
        return Ok(buf);
    }
    fs::read_to_string(path).map_err(|e| TektoncError::io(path, e))
}
