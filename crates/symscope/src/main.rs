use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use symscope_core::symbols::{FsImageSource, ImageDescriptor, LocalVariable, ModuleId, Storage, SymbolKind};
use symscope_core::{LoadReport, Session, SessionConfig};
use symscope_utils::{info, init_logging, init_logging_with_level, LogFormat, LogLevel};

/// Read STABS debug info from ELF images and follow a process's shared objects.
#[derive(Parser, Debug)]
#[command(name = "symscope")]
#[command(version)]
#[command(about = "Read STABS debug info from ELF images and follow a process's shared objects", long_about = None)]
struct Cli
{
    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format (pretty or json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,
    /// Skip merging the plain linker symbol tables
    #[arg(long, global = true, default_value_t = false)]
    no_linker_symbols: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Load one image and print what was found
    Load
    {
        /// Path to the ELF image
        path: PathBuf,
        /// Load bias (hex with 0x prefix, or decimal)
        #[arg(long, default_value = "0", value_parser = parse_u64)]
        bias: u64,
        /// List every symbol with its locals and line count
        #[arg(long, default_value_t = false)]
        symbols: bool,
        /// Print the type of each typed symbol
        #[arg(long, default_value_t = false)]
        types: bool,
    },
    /// Walk the link map of a running process (Linux)
    Attach
    {
        /// Process ID (PID) to inspect
        pid: u32,
        /// Load bias of the main executable (default: its lowest mapping)
        #[arg(long, value_parser = parse_u64)]
        exe_bias: Option<u64>,
    },
}

fn parse_u64(text: &str) -> Result<u64, String>
{
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("invalid number {text:?}: {err}"))
}

fn main()
{
    let cli = Cli::parse();

    let logging = match cli.log_level {
        Some(level) => init_logging_with_level(level, cli.log_format),
        None => init_logging(),
    };
    if let Err(e) = logging {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    let config = SessionConfig::from_env().with_linker_symbols(!cli.no_linker_symbols);
    let mut session = Session::new(config);

    let outcome = match cli.command {
        Commands::Load {
            path,
            bias,
            symbols,
            types,
        } => {
            run_load(&mut session, path, bias, symbols, types);
            Ok(())
        }
        Commands::Attach { pid, exe_bias } => run_attach(&mut session, pid, exe_bias),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_load(session: &mut Session, path: PathBuf, bias: u64, symbols: bool, types: bool)
{
    info!("Loading {}", path.display());
    let report = session.load_image(&ImageDescriptor::new(path, bias), &FsImageSource);
    print_module(session, &report);
    if symbols || types {
        print_symbols(session, report.module, symbols, types);
    }
}

fn print_module(session: &Session, report: &LoadReport)
{
    let Some(module) = session.store().module(report.module) else {
        return;
    };
    println!("{}", module.path().display());
    println!("  Kind: {:?}", module.kind());
    println!("  Bias: 0x{:x}", module.bias());
    println!("  Start: {}", module.start());
    println!("  Size: 0x{:x}", module.size());
    println!("  Status: {}", module.status());
    println!("  Stab entries: {}", report.stab_entries);
    println!(
        "  Linker symbols: {} added, {} annotated, {} resolved",
        report.linker.added, report.linker.annotated, report.linker.resolved
    );
    println!("  Sources: {}", module.sources().len());
    println!("  Symbols: {}", session.store().symbols_in(report.module).count());
    for diagnostic in module.diagnostics() {
        println!("  {:?}: {}", diagnostic.kind, diagnostic.message);
    }
}

fn print_symbols(session: &Session, module: ModuleId, with_bodies: bool, with_types: bool)
{
    let mut symbols: Vec<_> = session.store().symbols_in(module).map(|(_, symbol)| symbol).collect();
    symbols.sort_by_key(|symbol| symbol.address);

    for symbol in symbols {
        let kind = match symbol.kind {
            SymbolKind::Function => "fn",
            SymbolKind::Data => "data",
        };
        let size = symbol.size.map(|size| format!(" [{size}]")).unwrap_or_default();
        println!("{} {kind:<4} {}{size}", symbol.address, symbol.name.display_name());

        if with_types {
            if let Some(node) = session.symbol_type(symbol) {
                println!("      type: {}", node.describe());
            }
        }
        if with_bodies {
            if let Some(body) = &symbol.body {
                for local in &body.locals {
                    println!("      {}", describe_local(local));
                }
                if !body.lines.is_empty() {
                    println!("      {} line entries", body.lines.len());
                }
            }
        }
    }
}

fn describe_local(local: &LocalVariable) -> String
{
    let role = if local.is_parameter { "param" } else { "local" };
    match local.storage {
        Storage::FrameOffset(offset) => format!("{role} {} @ frame{offset:+}", local.name),
        Storage::Register(register) => format!("{role} {} @ reg{register}", local.name),
    }
}

#[cfg(target_os = "linux")]
fn run_attach(session: &mut Session, pid: u32, exe_bias: Option<u64>) -> symscope_core::Result<()>
{
    use symscope_core::platform::linux::ProcMemoryTarget;
    use symscope_core::ProcessId;

    info!("Inspecting process {pid}");
    let mut target = ProcMemoryTarget::open(ProcessId::from(pid))?;
    let exe = target.executable_path()?;
    let bias = match exe_bias {
        Some(bias) => bias,
        None => target.mapping_base(&exe)?.value(),
    };

    let report = session.load_executable(&ImageDescriptor::new(exe, bias), &FsImageSource);
    print_module(session, &report);

    let summary = session.attach_process(&mut target, &FsImageSource)?;
    println!(
        "\nLink map: {} entries visited, {} modules loaded",
        summary.visited,
        summary.loaded.len()
    );
    for id in &summary.loaded {
        if let Some(module) = session.store().module(*id) {
            println!("  0x{:016x} {} ({})", module.bias(), module.path().display(), module.status());
        }
    }
    println!("Tracker: {:?}", session.tracker().state());
    session.detach();
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run_attach(_session: &mut Session, _pid: u32, _exe_bias: Option<u64>) -> symscope_core::Result<()>
{
    Err(symscope_core::SymscopeError::Unsupported(
        "attach needs a Target backend; only Linux has one".to_string(),
    ))
}
