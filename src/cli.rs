use clap::Parser;
use std::time::Duration;

/// procpipe - run a command with piped stdio and a controlled lifecycle
///
/// The command's stdin, stdout and stderr are relayed through pipes.
/// Interrupts sent to procpipe are forwarded to the command, and an
/// optional timeout first asks the command to quit, then kills it.
#[derive(Parser, Debug)]
#[command(
    name = "procpipe",
    version,
    about = "Run a command with piped stdio and a controlled lifecycle",
    long_about = "Runs a command with its standard streams relayed through pipes.\n\
                  Ctrl-C is forwarded as a cooperative quit request, SIGTERM/SIGHUP as a kill.\n\
                  With --timeout the command is asked to quit when time runs out and\n\
                  killed if it is still running after the grace period."
)]
pub struct Cli {
    /// Stop the command after this many seconds
    #[arg(short = 't', long = "timeout", value_name = "seconds", env = "PROCPIPE_TIMEOUT")]
    pub timeout: Option<f64>,

    /// Seconds to wait between the quit request and the kill on timeout
    #[arg(
        short = 'g',
        long = "grace",
        value_name = "seconds",
        env = "PROCPIPE_GRACE",
        default_value_t = 2.0
    )]
    pub grace: f64,

    /// Close the command's stdin instead of forwarding ours
    #[arg(long = "no-stdin")]
    pub no_stdin: bool,

    /// Be verbose about what you're doing
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Command and its arguments to execute
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Validate the parsed arguments
    pub fn validate(&self) -> Result<(), crate::error::RunnerError> {
        use crate::error::RunnerError;

        if self.command.is_empty() {
            return Err(RunnerError::InvalidArguments(
                "No command specified".to_string(),
            ));
        }

        if let Some(timeout) = self.timeout {
            if timeout <= 0.0 || Duration::try_from_secs_f64(timeout).is_err() {
                return Err(RunnerError::InvalidArguments(format!(
                    "Timeout must be a positive number of seconds, got {}",
                    timeout
                )));
            }
        }

        if Duration::try_from_secs_f64(self.grace).is_err() {
            return Err(RunnerError::InvalidArguments(format!(
                "Grace period must be zero or more seconds, got {}",
                self.grace
            )));
        }

        Ok(())
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose > 0
    }

    pub fn verbosity_level(&self) -> u8 {
        self.verbose
    }

    /// Default log filter for the chosen verbosity, used when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Only meaningful after [`Cli::validate`] accepted the arguments
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn grace(&self) -> Duration {
        Duration::try_from_secs_f64(self.grace).unwrap_or_default()
    }
}
