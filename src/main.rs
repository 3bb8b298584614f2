//! call-probe - scripted end-to-end phone call testing for voice agents
//!
//! Places real phone calls to a conversational voice agent, drives each call
//! with a simulated caller (persona + scenario), waits for the provider to
//! report the call complete, and scores the transcript against metrics.
//!
//! ## Usage
//!
//! ```bash
//! # Write an example config and test suite
//! call-probe config init --suite suite.yaml
//!
//! # Run every test case in the suite
//! call-probe run --suite suite.yaml
//!
//! # Run selected test cases with a shorter call limit
//! call-probe run --suite suite.yaml --test booking --time-limit 30
//!
//! # Show the latest report
//! call-probe results --format markdown
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod cli;
mod config;
mod correlation;
mod engine;
mod error;
mod evaluator;
mod executor;
mod gateway;
mod http;
mod models;
mod output;
mod results;
mod telephony;
mod utils;

use cli::Args;
use config::{AppConfig, EnvConfig, TestSuite, TunnelKind};
use engine::WsBridgeEngine;
use evaluator::ChatEvaluator;
use executor::{Collaborators, RunConfig, TestRunner};
use gateway::{LocalTunnel, NgrokTunnel, StaticTunnel, TunnelProvisioner};
use output::{OutputFormat, ResultFormatter};
use results::{ExportFormat, ReportFormat, ReportGenerator, ReportStore};
use telephony::{AgentApi, HttpAgentApi, TelephonyProvider, TwilioCredentials, TwilioProvider};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(LogLevel::from_verbose(
        args.verbose || env.verbose.unwrap_or(false),
    ));

    match args.command {
        cli::Command::Run(run_args) => run_suite(run_args, &env).await?,
        cli::Command::List(list_args) => list_tests(list_args)?,
        cli::Command::Results(results_args) => show_results(results_args)?,
        cli::Command::Config(config_args) => manage_config(config_args, &env)?,
    }

    Ok(())
}

fn load_config(path: Option<&str>, env: &EnvConfig) -> Result<AppConfig> {
    let mut config = match path.or(env.config_file.as_deref()) {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };
    config.apply_env(env);
    Ok(config)
}

fn report_store(config: &AppConfig) -> ReportStore {
    match &config.run.report_dir {
        Some(dir) => ReportStore::new(dir),
        None => ReportStore::default_dir(),
    }
}

fn build_tunnel(config: &AppConfig) -> Result<Box<dyn TunnelProvisioner>> {
    let tunnel = &config.tunnel;
    Ok(match tunnel.kind {
        TunnelKind::Local => Box::new(LocalTunnel::new(&tunnel.local_host)),
        TunnelKind::Static => {
            let url = tunnel
                .url
                .as_deref()
                .context("tunnel.url is required for a static tunnel")?;
            Box::new(StaticTunnel::new(url))
        }
        TunnelKind::Ngrok => Box::new(
            NgrokTunnel::new(tunnel.ngrok_auth_token.clone()).with_binary(&tunnel.ngrok_binary),
        ),
    })
}

fn build_runner(config: &AppConfig) -> Result<TestRunner> {
    let credentials = TwilioCredentials {
        account_sid: config.telephony.account_sid.clone(),
        auth_token: config.telephony.auth_token.clone(),
        phone_number: config.telephony.phone_number.clone(),
        phone_number_sid: config.telephony.phone_number_sid.clone(),
    };
    let telephony: Arc<dyn TelephonyProvider> = match &config.telephony.api_url {
        Some(url) => Arc::new(TwilioProvider::with_api_url(credentials, url)?),
        None => Arc::new(TwilioProvider::new(credentials)?),
    };

    let agent: Option<Arc<dyn AgentApi>> = match &config.agent.api_url {
        Some(url) => {
            let token = config.agent.auth_token.clone().unwrap_or_default();
            Some(Arc::new(HttpAgentApi::new(url, token)?))
        }
        None => None,
    };

    let engine = WsBridgeEngine::new(&config.engine.url)
        .with_connect_timeout(Duration::from_secs(config.engine.connect_timeout_secs))
        .with_hangup(Arc::clone(&telephony));

    let evaluator = ChatEvaluator::new(
        &config.evaluator.api_url,
        &config.evaluator.api_key,
        &config.evaluator.model,
    )?;

    let run_config = RunConfig {
        direction: config.agent.direction,
        agent_phone_number: config.agent.phone_number.clone(),
        originate_params: config.agent.originate_params.clone(),
        call_id_timeout: Duration::from_secs(config.run.call_id_timeout_secs),
        completion_grace: Duration::from_secs(config.run.completion_grace_secs),
        session_drain: Duration::from_secs(config.run.session_drain_secs),
        record_calls: config.telephony.record_calls,
        recording_wait: Duration::from_secs(config.run.recording_wait_secs),
    };

    Ok(TestRunner::new(
        run_config,
        config.gateway.clone(),
        Collaborators {
            telephony,
            agent,
            engine: Arc::new(engine),
            evaluator: Arc::new(evaluator),
            tunnel: build_tunnel(config)?,
        },
    ))
}

async fn run_suite(args: cli::RunArgs, env: &EnvConfig) -> Result<()> {
    let mut config = load_config(args.config.as_deref(), env)?;
    if let Some(secs) = args.time_limit {
        config.run.time_limit_secs = secs;
    }
    config.validate()?;
    config.check_ready()?;

    let suite = TestSuite::load(&args.suite)?;
    let test_cases = if args.tests.is_empty() {
        suite.resolve()?
    } else {
        suite.select(&args.tests)?
    };
    if test_cases.is_empty() {
        bail!("Test suite {} has no test cases to run", args.suite);
    }

    let format = OutputFormat::from_str(&args.format)
        .with_context(|| format!("Unknown output format: {}", args.format))?;

    let mut runner = build_runner(&config)?;
    for test_case in test_cases {
        runner.add_test_case(test_case)?;
    }

    info!(
        "Running {} test cases against {} ({}s per call)",
        runner.test_cases().len(),
        config.agent.direction,
        config.run.time_limit_secs
    );
    let outcome = runner.run_all(config.run.time_limit_secs).await;

    let saved = match &args.output {
        Some(path) => runner.save_report(Path::new(path))?,
        None => match runner.report() {
            Some(report) => report_store(&config).save(report)?,
            None => bail!("Run produced no report"),
        },
    };

    if let Some(report) = runner.report() {
        println!("{}", ResultFormatter::new(format).format_report(report));
    }
    println!("Report saved to {}", saved.display());

    if let Err(e) = outcome {
        if e.is_run_fatal() {
            error!("Run aborted before any call was placed: {}", e);
        } else {
            error!("Run failed: {}", e);
        }
        return Err(e.into());
    }
    Ok(())
}

fn list_tests(args: cli::ListArgs) -> Result<()> {
    let suite = TestSuite::load(&args.suite)?;
    let cases = suite.resolve()?;

    let title = if suite.name.is_empty() { &args.suite } else { &suite.name };
    println!("\n{} ({} test cases)\n", title, cases.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for (index, case) in cases.iter().enumerate() {
        if args.detailed {
            println!("\n  {:2}. {} [{}]", index + 1, case.name, case.id);
            println!("      Scenario: {}", case.scenario.name);
            println!("      Persona:  {}", case.persona.name);
            if case.metrics.is_empty() {
                println!("      Metrics:  (none)");
            } else {
                let names: Vec<_> = case.metrics.iter().map(|m| m.name.as_str()).collect();
                println!("      Metrics:  {}", names.join(", "));
            }
        } else {
            println!("  {:2}. {:30} [{}]", index + 1, case.name, case.id);
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    Ok(())
}

fn show_results(args: cli::ResultsArgs) -> Result<()> {
    let store = match &args.dir {
        Some(dir) => ReportStore::new(dir),
        None => ReportStore::default_dir(),
    };

    if let Some(run_id) = &args.delete {
        store.delete(run_id)?;
        println!("Deleted run {run_id}");
        return Ok(());
    }

    if args.list {
        let runs = store.list_runs()?;
        if runs.is_empty() {
            println!("No reports in {}", store.base_dir().display());
            return Ok(());
        }
        println!(
            "{:<22} {:<10} {:<20} {:>6} {:>9} {:>7}",
            "Run", "Status", "Started", "Tests", "Completed", "Pass"
        );
        for run in runs {
            println!(
                "{:<22} {:<10} {:<20} {:>6} {:>9} {:>6.1}%",
                run.id,
                format!("{:?}", run.status).to_lowercase(),
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.total_tests,
                run.completed,
                run.evaluation_pass_rate
            );
        }
        return Ok(());
    }

    let report = match &args.run {
        Some(id) => store.load(id)?,
        None => match store.latest()? {
            Some(report) => report,
            None => bail!("No reports in {}", store.base_dir().display()),
        },
    };

    if let Some(path) = &args.export {
        let path = PathBuf::from(path);
        let format = ExportFormat::from_extension(&path)
            .with_context(|| format!("Cannot infer export format from {}", path.display()))?;
        store.export(&report, &path, format)?;
        println!("Exported run {} to {}", report.id, path.display());
        return Ok(());
    }

    if let Some(format) = ReportFormat::from_str(&args.format) {
        println!("{}", ReportGenerator::render(&report, format));
    } else {
        let format = OutputFormat::from_str(&args.format)
            .with_context(|| format!("Unknown output format: {}", args.format))?;
        println!("{}", ResultFormatter::new(format).format_report(&report));
    }
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Show { config } => {
            let config = load_config(config.as_deref(), env)?;
            match AppConfig::find() {
                Some(path) => println!("# Loaded from {}", path.display()),
                None => println!("# No config file found; showing defaults"),
            }
            print!("{}", serde_yaml::to_string(&config.redacted())?);
            if let Err(e) = config.check_ready() {
                println!("\n# Not ready to run: {e}");
            }
        }
        cli::ConfigAction::Init {
            output,
            suite,
            force,
        } => {
            write_new(&output, force, |path| AppConfig::example().save(path))?;
            println!("Wrote example configuration to {output}");
            if let Some(suite) = suite {
                write_new(&suite, force, |path| TestSuite::example().save(path))?;
                println!("Wrote example test suite to {suite}");
            }
        }
        cli::ConfigAction::Env => {
            config::print_env_help();
            println!();
            env.print_summary();
        }
    }
    Ok(())
}

fn write_new(path: &str, force: bool, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    let path = Path::new(path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write(path)
}
