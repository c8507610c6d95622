use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use hermes::binary::{self, MAGIC};
use hermes::vm::MONKEY_SIGNATURE;
use hermes::{Bytecode, MonkeyOperations, Session, Value, Vm};

#[derive(Parser)]
#[command(name = "hermes", version, about = "Monkey bytecode compiler and virtual machine")]
struct Cli {
    /// Increase log output (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and run a source file
    Run { file: PathBuf },
    /// Compile a source file to a program file
    Build {
        file: PathBuf,
        /// Output path (defaults to the input with an .hbc extension)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Run a compiled program file
    Exec { file: PathBuf },
    /// Print the instruction listing of a source or program file
    Disasm { file: PathBuf },
    /// Print the parsed program as JSON
    Ast { file: PathBuf },
    /// Read and evaluate lines from stdin
    Repl,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

/// A failure already formatted for the terminal.
struct Failure(String);

impl Failure {
    fn at(error: hermes::Error, source: &str, file: &Path) -> Self {
        Failure(error.render(source, Some(&file.display().to_string())))
    }

    fn plain(file: &Path, error: impl std::fmt::Display) -> Self {
        Failure(format!("error: {}: {}\n", file.display(), error))
    }
}

type CliResult = Result<(), Failure>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run { file } => run(&file),
        Command::Build { file, out } => build(&file, out),
        Command::Exec { file } => exec(&file),
        Command::Disasm { file } => disasm(&file),
        Command::Ast { file } => ast(&file),
        Command::Repl => repl(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure(message)) => {
            eprint!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn read_source(file: &Path) -> Result<String, Failure> {
    std::fs::read_to_string(file).map_err(|e| Failure::plain(file, e))
}

fn compile_file(file: &Path) -> Result<Bytecode, Failure> {
    let source = read_source(file)?;
    hermes::compile(&source).map_err(|e| Failure::at(e, &source, file))
}

fn execute(bytecode: Bytecode, file: &Path) -> CliResult {
    let mut vm = Vm::new(bytecode, MonkeyOperations);
    vm.run().map_err(|e| Failure::plain(file, e))?;
    match vm.last_popped() {
        Some(Value::Null) | None => {}
        Some(value) => println!("{}", value),
    }
    Ok(())
}

fn run(file: &Path) -> CliResult {
    let bytecode = compile_file(file)?;
    execute(bytecode, file)
}

fn build(file: &Path, out: Option<PathBuf>) -> CliResult {
    let bytecode = compile_file(file)?;
    let out = out.unwrap_or_else(|| file.with_extension("hbc"));
    binary::save(&out, &bytecode, MONKEY_SIGNATURE).map_err(|e| Failure::plain(&out, e))?;
    println!("wrote {}", out.display());
    Ok(())
}

fn exec(file: &Path) -> CliResult {
    let bytecode = binary::load(file, MONKEY_SIGNATURE).map_err(|e| Failure::plain(file, e))?;
    execute(bytecode, file)
}

/// Program files are recognised by their magic; anything else is compiled
/// as source first.
fn disasm(file: &Path) -> CliResult {
    let bytes = std::fs::read(file).map_err(|e| Failure::plain(file, e))?;
    let bytecode = if bytes.starts_with(&MAGIC) {
        binary::decode(&bytes, MONKEY_SIGNATURE).map_err(|e| Failure::plain(file, e))?
    } else {
        compile_file(file)?
    };

    print!("{}", bytecode.instructions);
    for (index, constant) in bytecode.constants.iter().enumerate() {
        if let Value::CompiledFunction(function) = constant {
            println!();
            println!(
                "fn constant {} (params {}, locals {}):",
                index, function.parameters, function.locals
            );
            print!("{}", function.instructions);
        }
    }
    Ok(())
}

fn ast(file: &Path) -> CliResult {
    let source = read_source(file)?;
    let program = hermes::parse(&source).map_err(|e| Failure::at(e, &source, file))?;
    let json = serde_json::to_string_pretty(&program).map_err(|e| Failure::plain(file, e))?;
    println!("{}", json);
    Ok(())
}

fn repl() -> CliResult {
    let stdin = std::io::stdin();
    let interactive = stdin.is_terminal();
    let mut session = Session::new();
    let mut stdout = std::io::stdout();
    let input = Path::new("<stdin>");

    loop {
        if interactive {
            print!(">> ");
            stdout.flush().map_err(|e| Failure::plain(input, e))?;
        }
        let mut line = String::new();
        let read = stdin.lock().read_line(&mut line).map_err(|e| Failure::plain(input, e))?;
        if read == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        match session.eval(&line) {
            Ok(Some(value)) => println!("{}", value),
            Ok(None) => {}
            Err(e) => eprint!("{}", e.render(&line, None)),
        }
    }
}
