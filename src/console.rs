//! Line-oriented command console.
//!
//! Parses one input line into a [`Command`]. Options follow argtable
//! conventions: `-c 11`, `-c11`, `--channel 11` and `--channel=11` are all
//! accepted.
//!
//! # Commands
//!
//! - `radio_init [-c ch] [-s none|above|below] [-b 20|40] [-m mac] [-r]`
//! - `radio_info`
//! - `tx_power [-d dbm]`
//! - `scan [-p]`
//! - `ping [-t sec] [-r hz] [-m mac]`
//! - `recv [-m mac] [-t sec]`
//! - `recv_stop`
//! - `msg_listen`
//! - `msg_send [-m mac] <text>`
//! - `restart`
//! - `help`

use crate::link::ProbeRequest;
use crate::radio::{Bandwidth, ConfigError, MacAddr, RadioParams, ScanMode, SecondaryChannel};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Console prompt.
pub const PROMPT: &str = "csi> ";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RadioInit { params: RadioParams, restart: bool },
    RadioInfo,
    /// Set (when given) and report max TX power.
    TxPower { dbm: Option<i8> },
    Scan { mode: ScanMode },
    Ping(ProbeRequest),
    Recv {
        filter: Option<MacAddr>,
        timeout: Option<Duration>,
    },
    RecvStop,
    MsgListen,
    MsgSend { dest: Option<MacAddr>, text: String },
    Restart,
    Help,
}

/// Console parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    /// Blank input line.
    Empty,
    UnknownCommand(String),
    UnknownOption { command: String, option: String },
    MissingValue { command: String, option: String },
    InvalidValue { option: String, value: String },
    UnexpectedArgument { command: String, arg: String },
    MissingArgument { command: String, arg: String },
    UnterminatedQuote,
    Config(ConfigError),
}

impl From<ConfigError> for ConsoleError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command"),
            Self::UnknownCommand(cmd) => {
                write!(f, "Unknown command: {}. Type 'help' for commands.", cmd)
            }
            Self::UnknownOption { command, option } => {
                write!(f, "{}: invalid option \"{}\"", command, option)
            }
            Self::MissingValue { command, option } => {
                write!(f, "{}: option \"{}\" requires an argument", command, option)
            }
            Self::InvalidValue { option, value } => {
                write!(f, "invalid argument \"{}\" to option {}", value, option)
            }
            Self::UnexpectedArgument { command, arg } => {
                write!(f, "{}: unexpected argument \"{}\"", command, arg)
            }
            Self::MissingArgument { command, arg } => {
                write!(f, "{}: missing {}", command, arg)
            }
            Self::UnterminatedQuote => write!(f, "unterminated quote"),
            Self::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConsoleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

/// Split a line into words, honoring double quotes.
fn tokenize(line: &str) -> Result<Vec<String>, ConsoleError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_quotes {
        return Err(ConsoleError::UnterminatedQuote);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// One accepted option of a command.
struct OptDef {
    short: char,
    long: &'static str,
    takes_value: bool,
}

const fn opt(short: char, long: &'static str) -> OptDef {
    OptDef {
        short,
        long,
        takes_value: true,
    }
}

const fn flag(short: char, long: &'static str) -> OptDef {
    OptDef {
        short,
        long,
        takes_value: false,
    }
}

/// Options and positionals of one command line.
struct Args {
    command: String,
    values: HashMap<&'static str, String>,
    flags: Vec<&'static str>,
    positionals: Vec<String>,
}

impl Args {
    fn parse(command: &str, tokens: &[String], defs: &[OptDef]) -> Result<Self, ConsoleError> {
        let mut args = Args {
            command: command.to_string(),
            values: HashMap::new(),
            flags: Vec::new(),
            positionals: Vec::new(),
        };
        let unknown = |option: &str| ConsoleError::UnknownOption {
            command: command.to_string(),
            option: option.to_string(),
        };

        let mut iter = tokens.iter();
        while let Some(token) = iter.next() {
            let (def, inline) = if let Some(long) = token.strip_prefix("--") {
                let (name, inline) = match long.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (long, None),
                };
                let def = defs
                    .iter()
                    .find(|s| s.long == name)
                    .ok_or_else(|| unknown(token))?;
                (def, inline)
            } else if let Some(short) = token.strip_prefix('-').filter(|s| !s.is_empty()) {
                let mut chars = short.chars();
                let c = chars.next().ok_or_else(|| unknown(token))?;
                let def = defs
                    .iter()
                    .find(|s| s.short == c)
                    .ok_or_else(|| unknown(token))?;
                let rest = chars.as_str();
                let inline = if rest.is_empty() {
                    None
                } else if def.takes_value {
                    Some(rest.to_string())
                } else {
                    return Err(unknown(token));
                };
                (def, inline)
            } else {
                args.positionals.push(token.clone());
                continue;
            };

            if !def.takes_value {
                if inline.is_some() {
                    return Err(unknown(token));
                }
                args.flags.push(def.long);
                continue;
            }

            let value = match inline {
                Some(value) => value,
                None => iter
                    .next()
                    .cloned()
                    .ok_or_else(|| ConsoleError::MissingValue {
                        command: command.to_string(),
                        option: format!("--{}", def.long),
                    })?,
            };
            args.values.insert(def.long, value);
        }

        Ok(args)
    }

    fn flag(&self, long: &str) -> bool {
        self.flags.iter().any(|f| *f == long)
    }

    fn value<T: FromStr>(&self, long: &'static str) -> Result<Option<T>, ConsoleError> {
        match self.values.get(long) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConsoleError::InvalidValue {
                    option: format!("--{}", long),
                    value: raw.clone(),
                }),
        }
    }

    /// Parse with a type whose own error is more specific.
    fn typed<T: FromStr<Err = ConfigError>>(
        &self,
        long: &'static str,
    ) -> Result<Option<T>, ConsoleError> {
        match self.values.get(long) {
            None => Ok(None),
            Some(raw) => Ok(Some(raw.parse()?)),
        }
    }

    fn no_positionals(&self) -> Result<(), ConsoleError> {
        match self.positionals.first() {
            Some(arg) => Err(ConsoleError::UnexpectedArgument {
                command: self.command.clone(),
                arg: arg.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Command {
    /// The console name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RadioInit { .. } => "radio_init",
            Self::RadioInfo => "radio_info",
            Self::TxPower { .. } => "tx_power",
            Self::Scan { .. } => "scan",
            Self::Ping(_) => "ping",
            Self::Recv { .. } => "recv",
            Self::RecvStop => "recv_stop",
            Self::MsgListen => "msg_listen",
            Self::MsgSend { .. } => "msg_send",
            Self::Restart => "restart",
            Self::Help => "help",
        }
    }

    /// Parse one console line.
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let tokens = tokenize(line)?;
        let Some((name, rest)) = tokens.split_first() else {
            return Err(ConsoleError::Empty);
        };
        let name = name.as_str();

        let command = match name {
            "radio_init" => {
                let args = Args::parse(
                    name,
                    rest,
                    &[
                        opt('c', "channel"),
                        opt('s', "secondary"),
                        opt('b', "bw"),
                        opt('m', "mac"),
                        flag('r', "restart"),
                    ],
                )?;
                args.no_positionals()?;
                let params = RadioParams {
                    channel: args.value::<u8>("channel")?,
                    secondary: args.typed::<SecondaryChannel>("secondary")?,
                    bandwidth: args.typed::<Bandwidth>("bw")?,
                    mac: args.typed::<MacAddr>("mac")?,
                };
                Command::RadioInit {
                    params,
                    restart: args.flag("restart"),
                }
            }
            "radio_info" => {
                Args::parse(name, rest, &[])?.no_positionals()?;
                Command::RadioInfo
            }
            "tx_power" => {
                let args = Args::parse(name, rest, &[opt('d', "dbm")])?;
                args.no_positionals()?;
                Command::TxPower {
                    dbm: args.value::<i8>("dbm")?,
                }
            }
            "scan" => {
                let args = Args::parse(name, rest, &[flag('p', "passive")])?;
                args.no_positionals()?;
                let mode = if args.flag("passive") {
                    ScanMode::Passive
                } else {
                    ScanMode::Active
                };
                Command::Scan { mode }
            }
            "ping" => {
                let args = Args::parse(
                    name,
                    rest,
                    &[opt('t', "timeout"), opt('r', "rate"), opt('m', "mac")],
                )?;
                args.no_positionals()?;
                let mut request = ProbeRequest::default();
                if let Some(secs) = args.value::<u64>("timeout")? {
                    request.duration = Duration::from_secs(secs);
                }
                if let Some(rate) = args.value::<u32>("rate")? {
                    request.rate_hz = rate;
                }
                if let Some(target) = args.typed::<MacAddr>("mac")? {
                    request.target = target;
                }
                Command::Ping(request)
            }
            "recv" => {
                let args = Args::parse(name, rest, &[opt('m', "mac"), opt('t', "timeout")])?;
                args.no_positionals()?;
                Command::Recv {
                    filter: args.typed::<MacAddr>("mac")?,
                    timeout: args.value::<u64>("timeout")?.map(Duration::from_secs),
                }
            }
            "recv_stop" => {
                Args::parse(name, rest, &[])?.no_positionals()?;
                Command::RecvStop
            }
            "msg_listen" => {
                Args::parse(name, rest, &[])?.no_positionals()?;
                Command::MsgListen
            }
            "msg_send" => {
                let args = Args::parse(name, rest, &[opt('m', "mac")])?;
                if args.positionals.is_empty() {
                    return Err(ConsoleError::MissingArgument {
                        command: name.to_string(),
                        arg: "<text>".to_string(),
                    });
                }
                Command::MsgSend {
                    dest: args.typed::<MacAddr>("mac")?,
                    text: args.positionals.join(" "),
                }
            }
            "restart" => {
                Args::parse(name, rest, &[])?.no_positionals()?;
                Command::Restart
            }
            "help" | "?" => Command::Help,
            other => return Err(ConsoleError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// Help text for available commands.
pub const HELP_TEXT: &str = r#"
Available commands:
  radio_init [-c <1..14>] [-s <none|above|below>] [-b <20|40>] [-m <mac>] [-r]
                       Init/configure Wi-Fi (-r forces a restart)
  radio_info           Show radio state
  tx_power [-d <dbm>]  Set/get max TX power
  scan [-p]            Scan for access points (-p passive)
  ping [-t <sec>] [-r <hz>] [-m <mac>]
                       Send CSI generation packets (default 10 s, 100 Hz, broadcast)
  recv [-m <mac>] [-t <sec>]
                       Start CSI capture (optional source filter and timeout)
  recv_stop            Stop CSI capture
  msg_listen           Print received text messages
  msg_send [-m <mac>] <text>
                       Send a text message (default broadcast)
  restart              Reboot the device
  help                 Show this help

Examples:
  radio_init -c 6 -s above -b 40
  recv --timeout=30 -m 1a:00:00:00:00:01
  ping -t 5
"#;
