use std::{env, process};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() {
    let args: Vec<String> = env::args().collect();

    let config = selsat::SolverConfig::new(&args).unwrap_or_else(|err| {
        eprintln!("Invalid arguments: {}", err);
        process::exit(1);
    });

    let result = config.run().unwrap_or_else(|err| {
        eprintln!("Problem while solving: {}", err);
        process::exit(1);
    });

    process::exit(result.exit_code());
}
