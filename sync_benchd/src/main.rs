//! # Sync Bench Daemon
//!
//! Main entry point for the synchronization server benchmark.

use std::env;
use std::process;
use sync_benchd::{BenchConfig, BenchRuntime, ExecutionMode};
use tracing::Level;

/// Options that affect the host rather than the run
struct CliOptions {
    config: BenchConfig,
    json: bool,
    log_level: Level,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let options = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(&args[0]);
        process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(options.log_level)
        .init();

    let mut runtime = BenchRuntime::new(options.config).unwrap_or_else(|e| {
        eprintln!("Failed to create runtime: {}", e);
        process::exit(1);
    });

    let summary = match runtime.run() {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    };

    if options.json {
        match summary.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize summary: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("run        {}", summary.run_id);
        println!("mode       {}", runtime.config().mode);
        println!("population {}", summary.population);
        println!("primitive  {}", summary.primitive);
        println!("strategy   {}", summary.reply_strategy);
        println!("occupancy  {}", summary.final_occupancy);
        for (label, count) in &summary.stats.requests {
            println!("  {:<10} {}", label, count);
        }
        println!("parks      {}", summary.stats.parks);
        println!("wakeups    {}", summary.stats.wakeups);
        println!("deferred   {}", summary.stats.token_deliveries);
        println!("violations {}", summary.stats.violations);
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value for {}", flag))
}

fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    // --config is applied first so that flags override the file.
    let mut config = match args.iter().position(|a| a == "--config" || a == "-c") {
        Some(pos) => {
            let path = args
                .get(pos + 1)
                .ok_or_else(|| "Missing value for --config".to_string())?;
            BenchConfig::load(path).map_err(|e| format!("Failed to load config: {}", e))?
        }
        None => BenchConfig::default(),
    };
    let mut json = false;
    let mut log_level = Level::WARN;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
            }
            "--population" | "-n" => {
                let value = next_value(args, &mut i, "--population")?;
                config.server.population = value
                    .parse()
                    .map_err(|_| format!("Invalid population value: {}", value))?;
            }
            "--primitive" | "-p" => {
                let value = next_value(args, &mut i, "--primitive")?;
                config.server.primitive = value.parse().map_err(|e| format!("{}", e))?;
            }
            "--strategy" | "-s" => {
                let value = next_value(args, &mut i, "--strategy")?;
                config.server.reply_strategy = value.parse().map_err(|e| format!("{}", e))?;
            }
            "--multicast" => {
                let value = next_value(args, &mut i, "--multicast")?;
                config.server.multicast = value.parse().map_err(|e| format!("{}", e))?;
            }
            "--buffer" | "-b" => {
                let value = next_value(args, &mut i, "--buffer")?;
                config.server.buffer_capacity = value
                    .parse()
                    .map_err(|_| format!("Invalid buffer value: {}", value))?;
            }
            "--workload" | "-w" => {
                let value = next_value(args, &mut i, "--workload")?;
                config.workload = value.parse()?;
            }
            "--iterations" | "-i" => {
                let value = next_value(args, &mut i, "--iterations")?;
                config.iterations = value
                    .parse()
                    .map_err(|_| format!("Invalid iterations value: {}", value))?;
            }
            "--mode" | "-m" => {
                let value = next_value(args, &mut i, "--mode")?;
                config.mode = value.parse()?;
            }
            "--threads" => {
                config.mode = ExecutionMode::Threaded;
            }
            "--audit" => {
                config.audit = true;
            }
            "--trace" => {
                config.server.trace_occupancy = true;
            }
            "--json" => {
                json = true;
            }
            "--verbose" | "-v" => {
                log_level = Level::DEBUG;
            }
            "--log-level" => {
                let value = next_value(args, &mut i, "--log-level")?;
                log_level = value
                    .parse()
                    .map_err(|_| format!("Invalid log level: {}", value))?;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    config.server.validate().map_err(|e| e.to_string())?;
    Ok(CliOptions {
        config,
        json,
        log_level,
    })
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>      JSON configuration file");
    eprintln!("  -n, --population <N>     Number of clients (default 6)");
    eprintln!("  -p, --primitive <KIND>   mutex (default), semaphore or condvar");
    eprintln!("  -s, --strategy <KIND>    fast (default), slow or saved");
    eprintln!("  --multicast <WHEN>       barrier (default) or initiator_wait");
    eprintln!("  -b, --buffer <N>         Bounded buffer capacity (default 1)");
    eprintln!("  -w, --workload <KIND>    producer_consumer (default) or hand_off");
    eprintln!("  -i, --iterations <N>     Requests per client (default 100)");
    eprintln!("  -m, --mode <MODE>        multiplexed (default) or threaded");
    eprintln!("  --threads                Same as --mode threaded");
    eprintln!("  --audit                  Keep the per-delivery audit trail");
    eprintln!("  --trace                  Record buffer occupancy changes");
    eprintln!("  --json                   Print the run summary as JSON");
    eprintln!("  -v, --verbose            Log at debug level");
    eprintln!("  --log-level <LEVEL>      error, warn, info, debug or trace");
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --primitive semaphore --workload hand_off", program);
    eprintln!("  {} --config bench.json --strategy saved --json", program);
    eprintln!("  {} --threads --primitive condvar -n 8", program);
}
