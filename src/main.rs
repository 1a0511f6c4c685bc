use anyhow::Context;
use procpipe::cli::Cli;
use procpipe::error::{ReturnCode, RunnerError};
use procpipe::pipe::StdioChannelSet;
use procpipe::process::{self, ExitOutcome, ProcessHandle};
use procpipe::relay::Relay;
use procpipe::signal::{forward_to_child, setup_signal_handlers, Request, SignalFlags};
use procpipe::watchdog::Watchdog;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the main loop looks at signal flags and the watchdog
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output relays may linger once the child was forcibly stopped
const DRAIN_AFTER_STOP: Duration = Duration::from_secs(1);

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Cli::parse_args();
    init_tracing(args.log_filter());

    if let Err(e) = args.validate() {
        eprintln!("procpipe: {}", e);
        eprintln!("Use \"procpipe --help\" to get help");
        return e.exit_code();
    }

    let signal_flags = match setup_signal_handlers() {
        Ok(flags) => flags,
        Err(e) => {
            eprintln!("procpipe: Failed to setup signal handlers: {}", e);
            return e.exit_code();
        }
    };

    match run_program(&args, signal_flags) {
        Ok(outcome) => {
            info!(%outcome, "child finished");
            outcome.as_exit_code()
        }
        Err(e) => {
            eprintln!("procpipe: {:#}", e);
            e.downcast_ref::<RunnerError>()
                .map(RunnerError::exit_code)
                .unwrap_or(ReturnCode::RuntimeError.as_exit_code())
        }
    }
}

/// Log to stderr; `RUST_LOG` overrides the level picked with `-v`
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// How a supervised child ended
struct Finish {
    outcome: ExitOutcome,
    timed_out: Option<Duration>,
}

/// Launch the child and supervise it until it is reaped
///
/// Whatever goes wrong after the launch, the child is killed and reaped
/// before the error is returned.
fn run_program(args: &Cli, signal_flags: SignalFlags) -> anyhow::Result<ExitOutcome> {
    let (child, channels) = process::run(&args.command[..])
        .map_err(RunnerError::from)
        .with_context(|| format!("could not launch {}", args.command[0]))?;
    info!(pid = child.id(), command = ?args.command, "spawned child process");

    let (done_tx, done_rx) = mpsc::channel();
    let waiter = thread::Builder::new().name("waiter".into()).spawn(move || {
        let _ = done_tx.send(process::wait(child));
    });
    if let Err(e) = waiter {
        if forward_to_child(Request::Kill, &child).is_ok() {
            let _ = process::wait(child);
        }
        return Err(RunnerError::from(e)).context("could not start waiter thread");
    }

    let finish = match supervise(args, &child, channels, &done_rx, &signal_flags) {
        Ok(finish) => finish,
        Err(e) => {
            stop_after_failure(&child, &done_rx);
            return Err(e);
        }
    };

    if let Some(timeout) = finish.timed_out {
        debug!(outcome = %finish.outcome, "child stopped by the watchdog");
        return Err(RunnerError::TimedOut(timeout).into());
    }
    Ok(finish.outcome)
}

/// Relay the streams and race the waiter against signals and the watchdog
fn supervise(
    args: &Cli,
    child: &ProcessHandle,
    channels: StdioChannelSet,
    done_rx: &Receiver<ExitOutcome>,
    signal_flags: &SignalFlags,
) -> anyhow::Result<Finish> {
    let (mut stdin, stdout, stderr) = channels.into_parts();
    if args.no_stdin {
        stdin.close();
    } else {
        Relay::spawn_detached("stdin", io::stdin(), stdin)
            .map_err(RunnerError::from)
            .context("could not start stdin relay")?;
    }

    let mut relay = Relay::new();
    relay
        .spawn("stdout", stdout, io::stdout())
        .map_err(RunnerError::from)
        .context("could not start stdout relay")?;
    relay
        .spawn("stderr", stderr, io::stderr())
        .map_err(RunnerError::from)
        .context("could not start stderr relay")?;

    let started = Instant::now();
    let mut watchdog = args.timeout().map(|timeout| Watchdog::new(timeout, args.grace()));
    let mut stopped = false;

    let outcome = loop {
        match done_rx.recv_timeout(POLL_INTERVAL) {
            Ok(outcome) => break outcome,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RunnerError::RuntimeError(
                    "waiter thread ended without an exit status".into(),
                )
                .into());
            }
        }

        if let Some(request) = signal_flags.take_request() {
            debug!(?request, "termination request received");
            forward_to_child(request, child).map_err(RunnerError::from)?;
            stopped = true;
        }

        if let Some(dog) = watchdog.as_mut() {
            if let Some(step) = dog.poll(started.elapsed()) {
                warn!(pid = child.id(), ?step, "timeout of {:?} reached", dog.timeout());
                forward_to_child(step, child).map_err(RunnerError::from)?;
                stopped = true;
            }
        }
    };

    let lingering = relay.drain(stopped.then_some(DRAIN_AFTER_STOP));
    if lingering > 0 {
        warn!(lingering, "output still open after the child exited, not waiting for it");
    }

    Ok(Finish {
        outcome,
        timed_out: watchdog.filter(Watchdog::fired).map(|dog| dog.timeout()),
    })
}

/// Kill the child and wait for the waiter thread to reap it
fn stop_after_failure(child: &ProcessHandle, done_rx: &Receiver<ExitOutcome>) {
    if let Err(e) = forward_to_child(Request::Kill, child) {
        warn!(pid = child.id(), "could not stop child: {}", e);
        return;
    }
    match done_rx.recv() {
        Ok(outcome) => debug!(pid = child.id(), %outcome, "child reaped after failure"),
        Err(_) => warn!(pid = child.id(), "child could not be reaped"),
    }
}
