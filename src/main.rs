use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use oxyprobe::config::load_config_file;
use oxyprobe::{ProbeContext, ProbeLogger, ResultSink, run_module};

/// Run one probe module against one or more targets and print the samples.
#[derive(Debug, Parser)]
#[command(name = "oxyprobe", version, about)]
struct Args {
    /// Module name from the configuration catalog.
    module: String,

    /// Targets to probe, concurrently.
    #[arg(required = true)]
    targets: Vec<String>,

    /// Module catalog to load.
    #[arg(long, env = "CONFIG_FILE", default_value = "config.yml")]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Args {
        module: module_name,
        targets,
        config_file,
    } = Args::parse();

    log::info!("Loading modules from {}", config_file.display());
    let config = match load_config_file(&config_file) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Failed to load config: {}", oxyprobe::error::report(&err));
            return ExitCode::FAILURE;
        }
    };
    let module = match config.module(&module_name) {
        Ok(module) => Arc::new(module.clone()),
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut handles = vec![];
    for target in targets {
        let module = Arc::clone(&module);
        let module_name = module_name.clone();
        handles.push(tokio::spawn(async move {
            let ctx = ProbeContext::with_timeout(module.timeout);
            let logger = ProbeLogger::new(&module_name, &target);
            let mut sink = ResultSink::new();
            let success = run_module(&ctx, &target, &module, &mut sink, &logger).await;
            (target, success, sink)
        }));
    }

    let mut all_succeeded = true;
    for handle in handles {
        match handle.await {
            Ok((target, success, sink)) => {
                all_succeeded &= success;
                println!("# target={target}");
                for sample in sink.samples() {
                    println!("{sample}");
                }
            }
            Err(err) => {
                log::error!("Probe task failed: {}", err);
                all_succeeded = false;
            }
        }
    }

    if all_succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
