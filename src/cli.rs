use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::*;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::ledger::Ledger;
use crate::outcome::Color;
use crate::settings::SettingsOverrides;
use crate::stats::StatsSnapshot;

#[derive(Parser, Debug)]
#[command(name = "roulette-ledger")]
#[command(version)]
#[command(about = "Per-chat roulette outcome ledger with windowed statistics")]
pub struct Args {
    /// TOML settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON document holding every chat
    #[arg(long, env = "DATA_FILE", global = true)]
    pub data_file: Option<PathBuf>,

    /// Window capacity for new chats
    #[arg(long, env = "DEFAULT_WINDOW", global = true)]
    pub default_window: Option<usize>,

    /// Log filter used when RUST_LOG is unset (e.g. info, debug)
    #[arg(long, env = "LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Keep everything in memory; nothing is written to disk
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long, env = "WEB_HOST")]
        host: Option<String>,
        #[arg(long, env = "WEB_PORT")]
        port: Option<u16>,
    },
    /// Record an outcome (0-36)
    Roll {
        #[arg(allow_hyphen_values = true)]
        chat: String,
        #[arg(allow_hyphen_values = true)]
        n: i64,
    },
    /// Undo the latest outcome
    Rollback {
        #[arg(allow_hyphen_values = true)]
        chat: String,
    },
    /// Clear the window, keeping the history
    Reset {
        #[arg(allow_hyphen_values = true)]
        chat: String,
    },
    /// Show statistics for a chat
    Stats {
        #[arg(allow_hyphen_values = true)]
        chat: String,
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },
    /// Show or update a chat's config
    Config {
        #[arg(allow_hyphen_values = true)]
        chat: String,
        /// key=value pairs, e.g. --set window_capacity=30
        #[arg(long = "set", value_parser = parse_key_value)]
        set: Vec<(String, Value)>,
    },
    /// Show a chat's history and window
    History {
        #[arg(allow_hyphen_values = true)]
        chat: String,
    },
    /// List known chats
    Chats,
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Args {
    /// Settings supplied by flags or environment.
    pub fn settings_overrides(&self) -> SettingsOverrides {
        let (host, port) = match &self.command {
            Command::Serve { host, port } => (host.clone(), *port),
            _ => (None, None),
        };
        SettingsOverrides {
            data_file: self.data_file.clone(),
            default_window: self.default_window,
            host,
            port,
            log_level: self.log_level.clone(),
        }
    }
}

/// Parse `key=value`; the value is read as JSON, falling back to a string.
pub fn parse_key_value(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let value = serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Run a one-shot command and return what should be printed.
///
/// `Serve` and `Completions` are handled by the binary.
pub fn run(command: &Command, ledger: &Ledger) -> Result<String> {
    match command {
        Command::Roll { chat, n } => {
            ledger.append_outcome(chat.as_str(), *n)?;
            Ok(render_stats(chat, &ledger.compute_stats(chat.as_str())?))
        }
        Command::Rollback { chat } => {
            let undone = ledger.rollback_last(chat.as_str())?;
            let head = match undone {
                Some(n) => format!("undid {}\n", paint(n)),
                None => "history is empty; nothing to undo\n".to_string(),
            };
            Ok(head + &render_stats(chat, &ledger.compute_stats(chat.as_str())?))
        }
        Command::Reset { chat } => {
            ledger.reset_window(chat.as_str())?;
            Ok(format!("window cleared for chat {chat}\n"))
        }
        Command::Stats { chat, json } => {
            let snapshot = ledger.compute_stats(chat.as_str())?;
            if *json {
                Ok(serde_json::to_string_pretty(&snapshot).unwrap_or_default() + "\n")
            } else {
                Ok(render_stats(chat, &snapshot))
            }
        }
        Command::Config { chat, set } => {
            let config = if set.is_empty() {
                ledger.get_config(chat.as_str())?
            } else {
                let partial: Map<String, Value> = set.iter().cloned().collect();
                ledger.set_config(chat.as_str(), &partial)?
            };
            Ok(serde_json::to_string_pretty(&config).unwrap_or_default() + "\n")
        }
        Command::History { chat } => {
            let record = ledger.record(chat.as_str())?;
            Ok(format!(
                "history ({}): {}\nwindow  ({}): {}\n",
                record.history.len(),
                paint_all(&record.history),
                record.window.len(),
                paint_all(&record.window),
            ))
        }
        Command::Chats => {
            let ids = ledger.chat_ids()?;
            Ok(ids.iter().map(|id| format!("{id}\n")).collect())
        }
        Command::Serve { .. } | Command::Completions { .. } => Ok(String::new()),
    }
}

fn paint(n: u8) -> ColoredString {
    let s = n.to_string();
    match Color::of(n) {
        Color::Green => s.bright_green().bold(),
        Color::Red => s.bright_red().bold(),
        Color::Black => s.white().on_black(),
    }
}

fn paint_all(outcomes: &[u8]) -> String {
    outcomes
        .iter()
        .map(|&n| paint(n).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable statistics block.
pub fn render_stats(chat: &str, s: &StatsSnapshot) -> String {
    let mut out = format!(
        "chat {} · {} (cap {}) · {} spins\n",
        chat, s.meta.source, s.meta.window_capacity, s.total
    );
    if s.is_empty() {
        out.push_str("no outcomes yet\n");
        return out;
    }
    let sample: Vec<u8> = s.sample().collect();
    out.push_str(&format!("numbers: {}\n", paint_all(&sample)));

    let (c, p) = (&s.counts, &s.percents);
    let row = |label: &str, count: usize, pct: f64| format!("{label:<8}{count:>4}  {pct:>5.1}%\n");
    out.push_str(&row("red", c.red, p.red));
    out.push_str(&row("black", c.black, p.black));
    out.push_str(&row("zero", c.zero, p.zero));
    out.push_str(&row("even", c.even, p.even));
    out.push_str(&row("odd", c.odd, p.odd));
    out.push_str(&row("low", c.low, p.low));
    out.push_str(&row("high", c.high, p.high));
    for (i, label) in ["1-12", "13-24", "25-36"].iter().enumerate() {
        out.push_str(&row(label, c.dozens[i], p.dozens[i]));
    }
    for (i, label) in ["row 1", "row 2", "row 3"].iter().enumerate() {
        out.push_str(&row(label, c.rows[i], p.rows[i]));
    }
    out.push_str(&format!("since last zero: {}\n", s.since_last_0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_config::ChatConfig;
    use crate::store::ChatStore;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_args_parse_roll() {
        let args = Args::parse_from(["rl", "roll", "42", "17"]);
        assert_eq!(
            args.command,
            Command::Roll {
                chat: "42".into(),
                n: 17
            }
        );
        assert!(!args.ephemeral);
    }

    #[test]
    fn test_args_parse_negative_chat_and_outcome() {
        let args = Args::parse_from(["rl", "roll", "-100123", "-1"]);
        assert_eq!(
            args.command,
            Command::Roll {
                chat: "-100123".into(),
                n: -1
            }
        );
    }

    #[test]
    fn test_args_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "rl",
            "stats",
            "c",
            "--json",
            "--data-file",
            "/tmp/x.json",
            "--default-window",
            "9",
        ]);
        let o = args.settings_overrides();
        assert_eq!(o.data_file, Some(PathBuf::from("/tmp/x.json")));
        assert_eq!(o.default_window, Some(9));
        assert_eq!(o.port, None);
    }

    #[test]
    fn test_args_serve_overrides() {
        let args = Args::parse_from(["rl", "serve", "--host", "127.0.0.1", "--port", "9001"]);
        let o = args.settings_overrides();
        assert_eq!(o.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(o.port, Some(9001));
    }

    #[test]
    fn test_args_config_set_pairs() {
        let args = Args::parse_from(["rl", "config", "c", "--set", "window_capacity=30", "--set", "use_zero=false"]);
        match args.command {
            Command::Config { set, .. } => {
                assert_eq!(set[0], ("window_capacity".to_string(), Value::from(30)));
                assert_eq!(set[1], ("use_zero".to_string(), Value::Bool(false)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("a=1").unwrap(), ("a".into(), Value::from(1)));
        assert_eq!(parse_key_value("a=x").unwrap(), ("a".into(), Value::String("x".into())));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=3").is_err());
    }

    #[test]
    fn test_run_roll_and_stats() {
        plain();
        let ledger = Ledger::new(ChatStore::in_memory().with_defaults(ChatConfig::with_capacity(3)));
        for n in [5, 0, 17] {
            run(&Command::Roll { chat: "c".into(), n }, &ledger).unwrap();
        }
        let out = run(&Command::Roll { chat: "c".into(), n: 22 }, &ledger).unwrap();
        assert!(out.contains("window (cap 3) · 3 spins"));
        assert!(out.contains("numbers: 0 17 22"));
        assert!(out.contains("since last zero: 2"));
    }

    #[test]
    fn test_run_stats_json() {
        let ledger = Ledger::in_memory();
        run(&Command::Roll { chat: "c".into(), n: 7 }, &ledger).unwrap();
        let out = run(&Command::Stats { chat: "c".into(), json: true }, &ledger).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["total"], 1);
        assert_eq!(v["numbers"][0]["color"], "red");
    }

    #[test]
    fn test_run_rollback_on_empty() {
        plain();
        let out = run(&Command::Rollback { chat: "c".into() }, &Ledger::in_memory()).unwrap();
        assert!(out.starts_with("history is empty"));
        assert!(out.contains("no outcomes yet"));
    }

    #[test]
    fn test_run_config_set_and_get() {
        let ledger = Ledger::in_memory();
        run(
            &Command::Config {
                chat: "c".into(),
                set: vec![("hist_tail".into(), Value::from(5))],
            },
            &ledger,
        )
        .unwrap();
        let out = run(&Command::Config { chat: "c".into(), set: vec![] }, &ledger).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["hist_tail"], 5);
    }

    #[test]
    fn test_run_invalid_roll_is_error() {
        assert!(run(&Command::Roll { chat: "c".into(), n: 40 }, &Ledger::in_memory()).is_err());
    }

    #[test]
    fn test_run_history_and_chats() {
        plain();
        let ledger = Ledger::in_memory();
        run(&Command::Roll { chat: "b".into(), n: 1 }, &ledger).unwrap();
        run(&Command::Roll { chat: "a".into(), n: 2 }, &ledger).unwrap();
        run(&Command::Reset { chat: "a".into() }, &ledger).unwrap();
        let hist = run(&Command::History { chat: "a".into() }, &ledger).unwrap();
        assert!(hist.contains("history (1): 2"));
        assert!(hist.contains("window  (0): "));
        assert_eq!(run(&Command::Chats, &ledger).unwrap(), "a\nb\n");
    }
}
