use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

mod cli;
mod config;
mod enrich;
mod foundry;
mod pipeline;
mod pool;
mod redact;
mod rows;

use cli::{Cli, Command, FoundryArgs, LocalArgs, TuningArgs};
use config::{GeminiEnv, PipelineEnv};
use enrich::{GeminiConfig, GeminiEnricher};
use foundry::{keepalive, FoundryClient};
use pipeline::{FoundryPlatform, FoundryRunParams};
use pool::FailurePolicy;

const EXIT_RUN_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    init_tracing();
    match Cli::parse().command {
        Command::Local(args) => run_local_command(&args),
        Command::Foundry(args) => run_foundry_command(&args),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_local_command(args: &LocalArgs) -> ExitCode {
    let pipe_env = match config::pipeline_env() {
        Ok(env) => env,
        Err(err) => return fail(EXIT_CONFIG, "config error", &err),
    };
    let gemini_env = match config::gemini_env() {
        Ok(env) => env,
        Err(err) => return fail(EXIT_CONFIG, "config error", &err),
    };
    let opts = match pool_options(&args.tuning, &pipe_env) {
        Ok(opts) => opts,
        Err(err) => return fail(EXIT_CONFIG, "config error", &err),
    };
    let enricher = match GeminiEnricher::new(gemini_config(&args.tuning, &gemini_env)) {
        Ok(enricher) => enricher,
        Err(err) => return fail(EXIT_CONFIG, "gemini config error", &err),
    };

    if let Err(err) = pipeline::run_local(&args.input, &args.output, &opts, &enricher) {
        return fail(EXIT_RUN_FAILED, "local run failed", &err);
    }
    ExitCode::SUCCESS
}

fn run_foundry_command(args: &FoundryArgs) -> ExitCode {
    let pipe_env = match config::pipeline_env() {
        Ok(env) => env,
        Err(err) => return fail(EXIT_CONFIG, "config error", &err),
    };
    let gemini_env = match config::gemini_env() {
        Ok(env) => env,
        Err(err) => return fail(EXIT_CONFIG, "config error", &err),
    };
    let opts = match pool_options(&args.tuning, &pipe_env) {
        Ok(opts) => opts,
        Err(err) => return fail(EXIT_CONFIG, "config error", &err),
    };
    let env = match foundry::load_env() {
        Ok(env) => env,
        Err(err) => return fail(EXIT_CONFIG, "foundry env error", &err),
    };

    // Some stacks consider a module responsive only while it drains the
    // runtime's injected job queue; poll and acknowledge in the background.
    let keep_alive = match keepalive::load_config_from_env() {
        Ok(Some(cfg)) => {
            thread::spawn(move || {
                let _ = keepalive::run_loop(&cfg, |_job| Ok(Vec::new()));
            });
            true
        }
        Ok(None) => false,
        Err(err) => return fail(EXIT_CONFIG, "compute module client config error", &err),
    };

    let enricher = match GeminiEnricher::new(gemini_config(&args.tuning, &gemini_env)) {
        Ok(enricher) => enricher,
        Err(err) => return fail(EXIT_CONFIG, "gemini config error", &err),
    };

    let client = match FoundryClient::new(
        &env.services.api_gateway,
        &env.services.stream_proxy,
        &env.token,
        &env.default_ca_path,
    ) {
        Ok(client) => client,
        Err(err) => return fail(EXIT_RUN_FAILED, "foundry run failed", &err),
    };
    let platform = FoundryPlatform::new(client);
    let params = FoundryRunParams {
        input_alias: &args.input_alias,
        output_alias: &args.output_alias,
        output_filename: &args.output_filename,
        output_write_mode: &args.output_write_mode,
    };
    if let Err(err) = pipeline::run_foundry(&platform, &env.aliases, &params, &opts, &enricher) {
        return fail(EXIT_RUN_FAILED, "foundry run failed", &err);
    }

    // Exiting restarts the container and would re-run the pipeline; when the
    // runtime injected its job endpoints, stay resident instead.
    if keep_alive {
        println!("foundry run complete; keeping module alive");
        loop {
            thread::park();
        }
    }
    ExitCode::SUCCESS
}

fn fail(code: u8, prefix: &str, err: &anyhow::Error) -> ExitCode {
    eprintln!("{prefix}: {}", redact::secrets(&format!("{err:#}")));
    ExitCode::from(code)
}

/// Flags win over environment defaults; backoff stays at the pool's
/// built-ins.
fn pool_options(tuning: &TuningArgs, env: &PipelineEnv) -> Result<pool::Options> {
    let request_timeout = match tuning.request_timeout.as_deref() {
        Some(raw) => config::parse_duration(raw)
            .with_context(|| format!("invalid --request-timeout {raw:?}"))?,
        None => env.request_timeout,
    };
    let fail_fast = tuning.fail_fast.unwrap_or(env.fail_fast);
    Ok(pool::Options {
        workers: tuning.workers.unwrap_or(env.workers),
        max_retries: tuning.max_retries.unwrap_or(env.max_retries),
        request_timeout,
        rate_limit_rps: tuning.rate_limit_rps.unwrap_or(env.rate_limit_rps),
        failure_policy: if fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::PartialOutput
        },
        ..pool::Options::default()
    })
}

fn gemini_config(tuning: &TuningArgs, env: &GeminiEnv) -> GeminiConfig {
    GeminiConfig {
        api_key: env.api_key.clone(),
        model: tuning
            .gemini_model
            .clone()
            .unwrap_or_else(|| env.model.clone()),
        base_url: tuning
            .gemini_base_url
            .clone()
            .unwrap_or_else(|| env.base_url.clone()),
        capture_audit: tuning.capture_audit.unwrap_or(env.capture_audit),
    }
}
