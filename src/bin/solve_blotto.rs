//! Blotto mean-field equilibrium solver binary.
//!
//! Usage:
//!   cargo run --release --bin solve_blotto -- [OPTIONS]
//!
//! Options:
//!   --config <FILE>      Game configuration JSON file (optional)
//!   --solver <FILE>      Solver configuration JSON file (optional)
//!   --iterations <N>     Max fixed-point iterations (default: 50)
//!   --eps <VALUE>        Convergence threshold (default: 0.01)
//!   --eta <VALUE>        Damping factor in (0, 1] (default: undamped)
//!   --seed <N>           Seed of the initial policy (default: 0)
//!   --agents <LIST>      Population sizes to benchmark, comma separated
//!   --output <FILE>      Output file (default: blotto_solution.json)

use std::env;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use log::error;
use rayon::prelude::*;

use mean_field_solver::games::blotto::{BlottoConfig, BlottoGame};
use mean_field_solver::mfg::{
    DeviationBenchmark, DeviationReport, EquilibriumSolver, MultinomialEnumerator, Result,
    SolverConfig,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let mut config_file: Option<String> = None;
    let mut solver_file: Option<String> = None;
    let mut iterations: Option<usize> = None;
    let mut eps: Option<f64> = None;
    let mut eta: Option<f64> = None;
    let mut seed: Option<u64> = None;
    let mut agents: Vec<usize> = Vec::new();
    let mut output_file = "blotto_solution.json".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_file = Some(args[i].clone());
                }
            }
            "--solver" => {
                i += 1;
                if i < args.len() {
                    solver_file = Some(args[i].clone());
                }
            }
            "--iterations" | "-i" => {
                i += 1;
                if i < args.len() {
                    iterations = args[i].parse().ok();
                }
            }
            "--eps" => {
                i += 1;
                if i < args.len() {
                    eps = args[i].parse().ok();
                }
            }
            "--eta" => {
                i += 1;
                if i < args.len() {
                    eta = args[i].parse().ok();
                }
            }
            "--seed" | "-s" => {
                i += 1;
                if i < args.len() {
                    seed = args[i].parse().ok();
                }
            }
            "--agents" | "-n" => {
                i += 1;
                if i < args.len() {
                    agents = args[i]
                        .split(',')
                        .filter_map(|n| n.trim().parse().ok())
                        .collect();
                }
            }
            "--output" | "-o" => {
                i += 1;
                if i < args.len() {
                    output_file = args[i].clone();
                }
            }
            "--help" | "-h" => {
                print_help();
                return;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                return;
            }
        }
        i += 1;
    }

    println!("=================================================");
    println!("  Blotto Mean Field Equilibrium Solver");
    println!("=================================================");
    println!();

    // Load or create the game
    let game_config = match &config_file {
        Some(path) => {
            println!("Loading game from: {}", path);
            match BlottoConfig::from_json_file(path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error loading game config: {}", e);
                    return;
                }
            }
        }
        None => {
            println!("Using default 5-node graph");
            BlottoConfig::default()
        }
    };
    let game = match BlottoGame::from_config(game_config) {
        Ok(game) => game,
        Err(e) => {
            eprintln!("Invalid game config: {}", e);
            return;
        }
    };

    // Setup solver configuration; command-line flags override the file
    let mut config = match &solver_file {
        Some(path) => match SolverConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading solver config: {}", e);
                return;
            }
        },
        None => SolverConfig::default(),
    };
    if let Some(n) = iterations {
        config = config.with_iterations(n);
    }
    if let Some(e) = eps {
        config = config.with_eps(e);
    }
    if let Some(e) = eta {
        config = config.with_damping(e);
    }
    if let Some(s) = seed {
        config = config.with_seed(s);
    }

    println!("Iterations: {}", config.n_ittr);
    println!("Eps: {}", config.eps);
    match config.damping {
        Some(e) => println!("Damping: {}", e),
        None => println!("Damping: none"),
    }
    println!("Seed: {}", config.seed);
    println!("Output: {}", output_file);
    println!();

    let solver = EquilibriumSolver::new(game, config);

    let progress = ProgressBar::new(solver.config().n_ittr as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} iterations | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let start_time = Instant::now();
    let result = solver.solve_with_callback(|diagnostics| {
        progress.set_message(format!(
            "diff mu {:.6} | diff nu {:.6}",
            diagnostics.diff_mu, diagnostics.diff_nu
        ));
        progress.inc(1);
    });

    let solution = match result {
        Ok(solution) => solution,
        Err(e) => {
            progress.abandon();
            error!("solve failed: {}", e);
            eprintln!("Error: {}", e);
            return;
        }
    };
    progress.finish_with_message(if solution.converged() {
        "converged"
    } else {
        "iteration budget exhausted"
    });

    println!();
    if solution.converged() {
        println!("Converged after {} iterations", solution.stats.iterations);
    } else {
        println!("Stopped after {} iterations", solution.stats.iterations);
    }
    if let (Some(diff_mu), Some(diff_nu)) = (solution.stats.diff_mu, solution.stats.diff_nu) {
        println!("Final difference: mu {:.6}, nu {:.6}", diff_mu, diff_nu);
    }
    println!("Total time: {:.2}s", start_time.elapsed().as_secs_f64());
    println!();

    // Export results
    println!("Exporting results to {}...", output_file);
    match solution.save_json(&output_file) {
        Ok(_) => println!("Results saved successfully!"),
        Err(e) => eprintln!("Error saving results: {}", e),
    }

    // Print the terminal distribution
    println!();
    println!("=== Terminal Distribution ===");
    if let Some(mu_tf) = solution.mu.last() {
        for (node, mass) in mu_tf.iter().enumerate() {
            println!("  node {}: {:.4}", node, mass);
        }
    }

    if agents.is_empty() {
        println!();
        println!("Done!");
        return;
    }

    // Benchmark every population size in parallel
    println!();
    println!("=== Deviation Benchmark ===");
    let reports: Vec<(usize, Result<DeviationReport>)> = agents
        .par_iter()
        .map(|&n| {
            let report = DeviationBenchmark::new(
                solver.env(),
                &solution.policy,
                n,
                &MultinomialEnumerator,
            )
            .and_then(|bench| bench.check(&solver.config().best_response));
            (n, report)
        })
        .collect();

    for (n, report) in reports {
        match report {
            Ok(report) => {
                println!(
                    "N = {:>4} | exploitability: {:>10.6} | suboptimal steps: {:>3} | optimal: {}",
                    n,
                    report.exploitability,
                    report.suboptimal_steps.len(),
                    report.remains_optimal()
                );
            }
            Err(e) => eprintln!("N = {:>4} | error: {}", n, e),
        }
    }

    println!();
    println!("Done!");
}

fn print_help() {
    println!("Blotto Mean Field Equilibrium Solver");
    println!();
    println!("Usage: solve_blotto [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>      Game configuration JSON file");
    println!("  --solver <FILE>          Solver configuration JSON file");
    println!("  -i, --iterations <N>     Max fixed-point iterations (default: 50)");
    println!("  --eps <VALUE>            Convergence threshold (default: 0.01)");
    println!("  --eta <VALUE>            Damping factor in (0, 1]");
    println!("  -s, --seed <N>           Seed of the initial policy (default: 0)");
    println!("  -n, --agents <LIST>      Population sizes to benchmark, e.g. 2,5,10");
    println!("  -o, --output <FILE>      Output file (default: blotto_solution.json)");
    println!("  -h, --help               Show this help");
    println!();
    println!("Examples:");
    println!("  # Solve the default graph with damping");
    println!("  solve_blotto --eta 0.5 --iterations 200");
    println!();
    println!("  # Check the equilibrium against small populations");
    println!("  solve_blotto --agents 2,5,10,20");
    println!();
    println!("  # Use custom config");
    println!("  solve_blotto --config configs/blotto_5node.json --solver configs/solver_damped.json");
}
