//! `xsan-layout` entrypoint: solve a platform's shadow-memory layout and
//! either print it or emit the generated header.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use layout_config::PlatformConfig;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing_appender::non_blocking::WorkerGuard;

/// Output mode selection (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputMode {
    Print,
    Header,
}

/// Solver tuning strategy (§4.5). Accepted but semantically a no-op in the
/// current constructive search; reserved for future tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum SolveMode {
    Default,
    Conservative,
    Aggressive,
}

/// CLI arguments (§4.2 "Command-line surface").
#[derive(Parser, Debug)]
#[command(name = "xsan-layout", version, about = "Shadow-memory layout allocator")]
struct Args {
    /// Target platform key, e.g. "x64_48" or "aarch64_48".
    #[arg(long, default_value = "x64_48")]
    platform: String,

    /// What to do with the solved layout.
    #[arg(long, value_enum, default_value = "print")]
    output: OutputMode,

    /// Reserved for future solver strategy selection; currently a no-op.
    #[arg(long, value_enum, default_value = "default")]
    mode: SolveMode,

    /// Directory the generated header is written into (--output header only).
    #[arg(long, default_value = "src/include/platforms")]
    outdir: PathBuf,

    /// Override the platform's alignment granularity. Accepts C-style
    /// integer literals (`0x...`, `0...`, or decimal).
    #[arg(long, value_parser = parse_c_int)]
    align: Option<u64>,

    /// Advisory cap on how many candidate solutions to consider; the
    /// first-fit search always stops at one, so this has no effect yet.
    #[arg(long)]
    max_solutions: Option<u32>,
}

fn parse_c_int(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let (digits, radix) = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        (hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        (&trimmed[1..], 8)
    } else {
        (trimmed, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("invalid integer literal \"{s}\": {e}"))
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let file_appender = tracing_appender::rolling::never(log_dir, "xsan-layout.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => self.log_guard = Some(guard),
            Err(_err) => {
                // Global subscriber already installed (e.g. under a test harness).
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn shell_quote_args() -> String {
    std::env::args()
        .map(|a| {
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("'{}'", a.replace('\'', "'\\''"))
            } else {
                a
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn load_platform(args: &Args) -> Result<PlatformConfig> {
    let platform = layout_config::lookup(&args.platform).with_context(|| {
        format!(
            "known platforms: {}",
            layout_config::KNOWN_PLATFORMS.join(", ")
        )
    })?;
    Ok(match args.align {
        Some(align) => platform.with_alignment_override(align),
        None => platform,
    })
}

fn run(args: &Args) -> Result<()> {
    tracing::debug!(target: "cli", mode = ?args.mode, "--mode is reserved, ignoring");
    if let Some(cap) = args.max_solutions {
        tracing::debug!(target: "cli", cap, "--max-solutions is advisory only, ignoring");
    }

    let platform = load_platform(args)?;
    tracing::info!(target: "cli", platform = platform.name, output = ?args.output, "solving layout");
    let model = layout_solver::solve(&platform)
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("platform \"{}\"", args.platform))?;

    match args.output {
        OutputMode::Print => {
            print!("{}", layout_emit::render_report(&model));
        }
        OutputMode::Header => {
            let cmdline = shell_quote_args();
            let path = layout_emit::write_header(&args.outdir, &model, &cmdline)?;
            tracing::info!(target: "cli", path = %path.display(), "header written");
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging()?;
    AppStartup::install_panic_hook();

    let args = Args::parse();
    run(&args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_octal_decimal_literals() {
        assert_eq!(parse_c_int("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_c_int("010").unwrap(), 8);
        assert_eq!(parse_c_int("4096").unwrap(), 4096);
        assert!(parse_c_int("not-a-number").is_err());
    }

    #[test]
    fn unknown_platform_is_an_error() {
        let args = Args {
            platform: "bogus".to_string(),
            output: OutputMode::Print,
            mode: SolveMode::Default,
            outdir: PathBuf::from("."),
            align: None,
            max_solutions: None,
        };
        assert!(load_platform(&args).is_err());
    }
}
