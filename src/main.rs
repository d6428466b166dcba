use std::ffi::OsString;
use std::io;
use std::os::fd::AsFd;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser};
use nix::sys::termios::{tcflush, FlushArg};

use hupmon::{proxy, status, trace, tty};

const EXIT_SUCCESS: u8 = 0;
const EXIT_INTERNAL_FAILURE: u8 = 1;
const EXIT_BAD_USAGE: u8 = 2;

/// `-h` belongs to hangup-detector mode, so clap's short help flag is
/// disabled and only `--help` prints usage.
#[derive(Parser, Debug)]
#[command(
    name = "hupmon",
    about = "Detect hangups on terminals without carrier-detect and bridge software flow control",
    disable_help_flag = true,
    args_override_self = true
)]
struct Cli {
    /// Query the terminal once, print its status, and exit
    #[arg(short = '1', overrides_with_all = ["flow_control_only", "hangup_detector"])]
    one_shot: bool,

    /// Mediate software flow control only; never probe the terminal
    #[arg(short = 'f', overrides_with_all = ["one_shot", "hangup_detector"])]
    flow_control_only: bool,

    /// Probe the terminal and hang up the command when it stops answering (default)
    #[arg(short = 'h', overrides_with_all = ["one_shot", "flow_control_only"])]
    hangup_detector: bool,

    /// Seconds to wait for a probe reply (minimum 0.01)
    #[arg(
        short = 'r',
        value_name = "SECONDS",
        default_value_t = 0.2,
        value_parser = parse_reply_timeout
    )]
    reply_timeout: f64,

    /// Seconds of terminal inactivity before a probe is sent (minimum 1)
    #[arg(
        short = 't',
        value_name = "SECONDS",
        default_value_t = 10.0,
        value_parser = parse_inactivity_timeout
    )]
    inactivity_timeout: f64,

    /// Print this usage information
    #[arg(long = "help", action = ArgAction::Help)]
    help: Option<bool>,

    /// Command to run and its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    OneShot,
    FlowControlOnly,
    HangupDetector,
}

fn parse_reply_timeout(text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.01 => Ok(value),
        _ => Err(format!(
            "{text}: invalid value; the minimum reply timeout must be greater than or equal to 10 ms (0.01)"
        )),
    }
}

fn parse_inactivity_timeout(text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 1.0 => Ok(value),
        _ => Err(format!(
            "{text}: invalid value; the activity timeout must be greater than or equal to 1 second"
        )),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    trace::init();
    ExitCode::from(run(cli))
}

fn run(cli: Cli) -> u8 {
    // getopt would stop at the first non-option and reject anything
    // unrecognized before it; clap collects leading unknown options into the
    // command vector instead, so reject them here.
    if let Some(first) = cli.command.first() {
        let text = first.to_string_lossy();
        if text.len() > 1 && text.starts_with('-') {
            eprintln!("hupmon: {text}: unrecognized option; try 'hupmon --help'");
            return EXIT_BAD_USAGE;
        }
    }

    let action = if cli.one_shot {
        Action::OneShot
    } else if cli.flow_control_only {
        Action::FlowControlOnly
    } else {
        Action::HangupDetector
    };

    let reply_timeout = Duration::from_secs_f64(cli.reply_timeout);
    let stdin = io::stdin();
    let stdout = io::stdout();

    match action {
        Action::OneShot => {
            if !tty::is_tty(&stdin) {
                eprintln!("hupmon: input is not a TTY");
                return EXIT_BAD_USAGE;
            }
            if !cli.command.is_empty() {
                eprintln!("hupmon: unexpected non-option arguments");
                return EXIT_BAD_USAGE;
            }

            match status::print_tty_status(stdin.as_fd(), reply_timeout) {
                Ok(()) => EXIT_SUCCESS,
                Err(err) => {
                    eprintln!("hupmon: write error: {err}");
                    EXIT_INTERNAL_FAILURE
                }
            }
        }
        Action::FlowControlOnly | Action::HangupDetector => {
            if !tty::is_tty(&stdin) || !tty::is_tty(&stdout) {
                eprintln!("hupmon: input and output must be attached to a TTY");
                return EXIT_BAD_USAGE;
            }
            if !tty::same_file(&stdin, &stdout) {
                eprintln!("hupmon: input and output must be attached to the same TTY");
                return EXIT_BAD_USAGE;
            }
            if cli.command.is_empty() {
                eprintln!("hupmon: no command specified");
                return EXIT_BAD_USAGE;
            }

            let tty_path = match tty::path(stdin.as_fd()) {
                Ok(path) => path,
                Err(err) => {
                    eprintln!("hupmon: unable to resolve the terminal path: {err}");
                    return EXIT_BAD_USAGE;
                }
            };

            let inactivity_timeout = match action {
                Action::FlowControlOnly => None,
                _ => Some(Duration::from_secs_f64(cli.inactivity_timeout)),
            };
            let options = proxy::WrapOptions {
                inactivity_timeout,
                reply_timeout,
            };

            let result = proxy::wrap(stdin.as_fd(), &cli.command, &tty_path, &options);

            // Anything still queued on the line belongs to a session that no
            // longer exists.
            let _ = tcflush(stdin.as_fd(), FlushArg::TCIOFLUSH);

            match result {
                Ok(code) if (0..=255).contains(&code) => code as u8,
                Ok(_) => EXIT_INTERNAL_FAILURE,
                Err(err) => {
                    eprintln!("hupmon: unable to execute command: {err}");
                    EXIT_INTERNAL_FAILURE
                }
            }
        }
    }
}
