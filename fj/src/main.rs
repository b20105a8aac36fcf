//! Command-line front end for the FlipJump toolchain: assemble, run, or
//! both in one shot, per §6.

use clap::Parser;
use fjasm::debug_info::DebugInfo;
use fjcore::diag::{Files, StackArena};
use fjcore::expr::ExprArena;
use fjcore::loader::FsLoader;
use fjcore::macros::MacroRegistry;
use fjcore::preprocess::{preprocess, top_level_namespace, PreprocessConfig};
use fjcore::vm::{IoAddresses, StopReason, Vm, VmConfig};
use fjimage::ZlibCodec;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "fj", about = "Assembler and interpreter for the FlipJump instruction set")]
struct Args {
    /// Source file to assemble and run.
    source: Option<PathBuf>,

    /// Assemble only; write the resulting image to the path given by `-o`.
    #[arg(long = "asm", value_name = "SOURCE")]
    asm: Option<PathBuf>,

    /// Output image path, used with `--asm`.
    #[arg(short = 'o', value_name = "IMAGE")]
    output: Option<PathBuf>,

    /// Run a pre-assembled image instead of a source file.
    #[arg(long = "run", value_name = "IMAGE")]
    run: Option<PathBuf>,

    /// Address width in bits.
    #[arg(short = 'w', default_value_t = 64)]
    width: u32,

    /// Skip automatic inclusion of `stl.fj` from the working directory.
    #[arg(long = "no-stl")]
    no_stl: bool,

    /// Write debug info (label table + per-op macro stack) to this path.
    #[arg(short = 'd', value_name = "PATH")]
    debug_info: Option<PathBuf>,

    /// Trace ring-buffer length.
    #[arg(long = "debug-ops-list", default_value_t = 10)]
    debug_ops_list: usize,

    /// Exact-name breakpoints.
    #[arg(short = 'b', value_name = "NAME")]
    breakpoints: Vec<String>,

    /// Substring-match breakpoints.
    #[arg(short = 'B', value_name = "SUBSTR")]
    breakpoint_substrings: Vec<String>,
}

enum CliError {
    User(anyhow::Error),
    Runtime(anyhow::Error),
    Internal(anyhow::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::User(_) => 1,
            CliError::Runtime(_) => 2,
            CliError::Internal(_) => 3,
        }
    }

    fn message(&self) -> &anyhow::Error {
        match self {
            CliError::User(e) | CliError::Runtime(e) | CliError::Internal(e) => e,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err.message());
            ExitCode::from(err.exit_code())
        }
    }
}

fn try_main() -> Result<(), CliError> {
    let args = Args::parse();

    if let Some(image_path) = &args.run {
        return run_image(image_path, &args);
    }

    let source = args
        .asm
        .as_deref()
        .or(args.source.as_deref())
        .ok_or_else(|| CliError::User(anyhow::anyhow!("no source file given; pass a path or use --asm")))?;

    let program = assemble_source(source, args.no_stl, args.width).map_err(CliError::User)?;

    if let Some(debug_path) = &args.debug_info {
        write_debug_info(&program, debug_path).map_err(CliError::Internal)?;
    }

    if let Some(out_path) = &args.output {
        fjimage::write_file(out_path, &program.image, Some(&ZlibCodec))
            .map_err(|e| CliError::Internal(anyhow::Error::from(e)))?;
    }

    if args.asm.is_some() {
        return Ok(());
    }

    execute(&program, &args)
}

struct AssembledProgram {
    image: fjimage::Image,
    labels: fjasm::LabelTable,
    io_base: u128,
    op_stacks: std::collections::HashMap<u128, Option<fjcore::diag::StackFrameId>>,
    stack_arena: StackArena,
    files: Files,
}

fn assemble_source(source: &Path, no_stl: bool, width: u32) -> anyhow::Result<AssembledProgram> {
    let loader = FsLoader;
    let mut files = Files::new();
    let mut arena = ExprArena::new();

    let mut items = Vec::new();
    if !no_stl {
        let stl_path = PathBuf::from("stl.fj");
        if stl_path.exists() {
            let stl_file = fjcore::loader::load_and_resolve(&stl_path, &loader, &mut files, &mut arena)?;
            items.extend(stl_file.items);
        }
    }
    let main_file = fjcore::loader::load_and_resolve(source, &loader, &mut files, &mut arena)?;
    items.extend(main_file.items);
    let file = fjcore::ast::File { items };

    let mut registry = MacroRegistry::new();
    fjcore::macros::collect_macros(&file.items, &top_level_namespace(), &mut registry);

    let mut stack_arena = StackArena::new();
    let preproc_items = preprocess(&file, &registry, &mut arena, &mut stack_arena, PreprocessConfig::default())?;

    let output = fjasm::assemble(&preproc_items, &arena, width)?;

    log::info!(
        "assembled {} from {} (width={width})",
        source.display(),
        if no_stl { "source only" } else { "source + stl" }
    );

    Ok(AssembledProgram {
        image: output.image,
        labels: output.labels,
        io_base: output.io_base,
        op_stacks: output.op_stacks,
        stack_arena,
        files,
    })
}

fn write_debug_info(program: &AssembledProgram, path: &Path) -> anyhow::Result<()> {
    let info = DebugInfo::build(&program.labels, &program.op_stacks, &program.stack_arena, &program.files);
    let file = std::fs::File::create(path)?;
    info.write(&mut std::io::BufWriter::new(file))?;
    Ok(())
}

fn execute(program: &AssembledProgram, args: &Args) -> Result<(), CliError> {
    let memory = fjasm::load_into_memory(&program.image);
    let io = IoAddresses::new(program.io_base);
    let config = VmConfig {
        width: args.width,
        trace_len: args.debug_ops_list,
        ..VmConfig::default()
    };

    let stdout = std::io::stdout();
    let stdin = std::io::stdin();
    let mut vm = Vm::new(memory, 0, io, config, stdout.lock(), stdin.lock());

    for name in &args.breakpoints {
        if let Some(addr) = program.labels.get(&fjcore::diag::FqName::simple(name.clone())) {
            use num_traits::ToPrimitive;
            if let Some(addr) = addr.to_u128() {
                vm.add_breakpoint(addr, name.clone());
            }
        }
    }
    for substr in &args.breakpoint_substrings {
        vm.add_breakpoint_substring(substr.clone());
    }

    loop {
        match vm.run() {
            Ok(StopReason::Halted) => {
                log::info!("halted after {} steps", vm.step_count());
                return Ok(());
            }
            Ok(StopReason::Cancelled) => {
                return Err(CliError::Runtime(anyhow::anyhow!("execution cancelled")));
            }
            Ok(StopReason::Breakpoint) => {
                log::info!("breakpoint hit at ip={} (step {})", vm.ip(), vm.step_count());
                return Ok(());
            }
            Err(err) => return Err(CliError::Runtime(anyhow::Error::from(err))),
        }
    }
}

fn run_image(image_path: &Path, args: &Args) -> Result<(), CliError> {
    let image = fjimage::read_file(image_path, &ZlibCodec).map_err(|e| CliError::User(anyhow::Error::from(e)))?;
    image
        .expect_width(args.width)
        .map_err(|e| CliError::User(anyhow::Error::from(e)))?;

    let io_base = match &args.debug_info {
        Some(debug_path) => {
            let file = std::fs::File::open(debug_path).map_err(|e| CliError::User(anyhow::Error::from(e)))?;
            let info = DebugInfo::read(std::io::BufReader::new(file))
                .map_err(|e| CliError::User(anyhow::Error::from(e)))?;
            let raw = info
                .labels
                .get("IO")
                .ok_or_else(|| CliError::User(anyhow::anyhow!("debug info has no IO label")))?;
            raw.parse::<u128>()
                .map_err(|e| CliError::User(anyhow::Error::from(e)))?
        }
        None => {
            return Err(CliError::User(anyhow::anyhow!(
                "running a raw image requires -d <debug info> to recover the IO address"
            )))
        }
    };

    let memory = fjasm::load_into_memory(&image);
    let io = IoAddresses::new(io_base);
    let config = VmConfig {
        width: image.width,
        trace_len: args.debug_ops_list,
        ..VmConfig::default()
    };
    let stdout = std::io::stdout();
    let stdin = std::io::stdin();
    let mut vm = Vm::new(memory, 0, io, config, stdout.lock(), stdin.lock());

    for substr in &args.breakpoint_substrings {
        vm.add_breakpoint_substring(substr.clone());
    }

    match vm.run() {
        Ok(StopReason::Halted) => {
            log::info!("halted after {} steps", vm.step_count());
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(err) => Err(CliError::Runtime(anyhow::Error::from(err))),
    }
}
