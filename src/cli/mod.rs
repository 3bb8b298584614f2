//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Scripted end-to-end phone call testing for voice agents
#[derive(Parser, Debug)]
#[command(name = "call-probe")]
#[command(version)]
#[command(about = "Place scripted phone calls to a voice agent and evaluate the conversations")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the test cases of a suite
    Run(RunArgs),

    /// List the test cases of a suite
    List(ListArgs),

    /// View stored run reports
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test suite file (YAML or JSON)
    #[arg(short, long, env = "CALL_PROBE_SUITE")]
    pub suite: String,

    /// Configuration file; standard locations are searched otherwise
    #[arg(short, long, env = "CALL_PROBE_CONFIG")]
    pub config: Option<String>,

    /// Run only these test case ids, in the order given
    #[arg(short, long = "test")]
    pub tests: Vec<String>,

    /// Maximum length of each call in seconds
    #[arg(long)]
    pub time_limit: Option<u64>,

    /// Write the JSON report here instead of the report store
    #[arg(short, long)]
    pub output: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, env = "CALL_PROBE_FORMAT", default_value = "table")]
    pub format: String,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Test suite file (YAML or JSON)
    #[arg(short, long, env = "CALL_PROBE_SUITE")]
    pub suite: String,

    /// Show scenario, persona and metrics of each test case
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Run id; the most recent run when omitted
    #[arg(short, long)]
    pub run: Option<String>,

    /// List stored runs instead of showing one
    #[arg(short, long)]
    pub list: bool,

    /// Output format (table, json, json-pretty, csv, summary, text, markdown)
    #[arg(short, long, env = "CALL_PROBE_FORMAT", default_value = "table")]
    pub format: String,

    /// Export the run to a file (.json or .csv)
    #[arg(short, long)]
    pub export: Option<String>,

    /// Delete a stored run
    #[arg(long, value_name = "RUN")]
    pub delete: Option<String>,

    /// Report directory; the data directory's store by default
    #[arg(long, env = "CALL_PROBE_REPORT_DIR")]
    pub dir: Option<String>,
}

/// Arguments for config management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the merged configuration with secrets masked
    Show {
        /// Configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "call-probe.yaml")]
        output: String,

        /// Also write an example test suite here
        #[arg(long)]
        suite: Option<String>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// List recognised environment variables
    Env,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = Args::parse_from([
            "call-probe",
            "run",
            "--suite",
            "suite.yaml",
            "--test",
            "booking",
            "--test",
            "reschedule",
            "--time-limit",
            "30",
            "-v",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.suite, "suite.yaml");
                assert_eq!(run.tests, ["booking", "reschedule"]);
                assert_eq!(run.time_limit, Some(30));
                assert_eq!(run.format, "table");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_init() {
        let args = Args::parse_from(["call-probe", "config", "init", "--suite", "suite.yaml"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { output, suite, force },
            }) => {
                assert_eq!(output, "call-probe.yaml");
                assert_eq!(suite.as_deref(), Some("suite.yaml"));
                assert!(!force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_results() {
        let args = Args::parse_from(["call-probe", "results", "--delete", "run_1", "--dir", "/tmp/r"]);
        match args.command {
            Command::Results(results) => {
                assert_eq!(results.delete.as_deref(), Some("run_1"));
                assert_eq!(results.dir.as_deref(), Some("/tmp/r"));
                assert!(results.run.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
