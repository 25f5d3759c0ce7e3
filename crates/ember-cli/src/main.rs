use std::env;
use std::fs;
use std::process::ExitCode;

use ember::builtins::{debug, io, time};
use ember::{Engine, Package};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: ember <path>");
        return ExitCode::FAILURE;
    };

    let source = match read_file(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let name = std::path::Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("package");
    let mut package = Package::new(name);

    let mut engine = Engine::new(|message: &str| eprintln!("{message}"));
    register_builtins(&mut engine, &mut package);

    if engine.compile(&mut package, &source).is_err() {
        return ExitCode::FAILURE;
    }
    if !engine.execute_package(&mut package) {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn register_builtins(engine: &mut Engine, package: &mut Package) {
    let print = engine.make_native("io.print", io::print);
    engine.define_global(package, "io.print", print);
    let input = engine.make_native("io.input", io::input);
    engine.define_global(package, "io.input", input);

    let clock = engine.make_native("time.clock", time::clock);
    engine.define_global(package, "time.clock", clock);
    let sleep = engine.make_native("time.sleep", time::sleep);
    engine.define_global(package, "time.sleep", sleep);

    let assert = engine.make_native("debug.assert", debug::assert);
    engine.define_global(package, "debug.assert", assert);
    let print_assertion_results =
        engine.make_native("debug.printAssertionResults", debug::print_assertion_results);
    engine.define_global(package, "debug.printAssertionResults", print_assertion_results);
    let disassemble = engine.make_native("debug.disassemble", debug::disassemble);
    engine.define_global(package, "debug.disassemble", disassemble);
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) if !metadata.is_file() => return Err(format!("{file_path} is not a file")),
        Err(err) => return Err(format!("reading {file_path}: {err}")),
        Ok(_) => {}
    }
    fs::read_to_string(file_path).map_err(|err| format!("reading {file_path}: {err}"))
}
