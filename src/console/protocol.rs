//! Line-based console protocol.
//!
//! One request line per connection, whitespace-separated words, verb
//! case-insensitive. Replies are plain text ending in a newline.

use crate::session::SessionSummary;

/// Help text sent with every usage reply.
pub const SYNTAX: &str = "\n\
list       - show active sessions\n\
kill [sid] - terminate session\n\
playback [sid] [filePath] - playback a file\n";

/// Commands accepted on the console socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Show active sessions
    List,
    /// Ask a session to terminate
    Kill { sid: String },
    /// Play a file into a session
    Playback { sid: String, path: String },
}

impl ConsoleCommand {
    /// Parse one request line. `None` means the usage reply is due.
    pub fn parse(line: &str) -> Option<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let (verb, args) = words.split_first()?;

        if verb.eq_ignore_ascii_case("list") {
            return args.is_empty().then_some(ConsoleCommand::List);
        }
        if verb.eq_ignore_ascii_case("kill") {
            return args.first().map(|sid| ConsoleCommand::Kill {
                sid: sid.to_string(),
            });
        }
        if verb.eq_ignore_ascii_case("playback") {
            return match args {
                [sid, path, ..] => Some(ConsoleCommand::Playback {
                    sid: sid.to_string(),
                    path: path.to_string(),
                }),
                _ => None,
            };
        }
        None
    }

    /// Request line for this command.
    pub fn to_line(&self) -> String {
        match self {
            ConsoleCommand::List => "list".to_string(),
            ConsoleCommand::Kill { sid } => format!("kill {sid}"),
            ConsoleCommand::Playback { sid, path } => format!("playback {sid} {path}"),
        }
    }
}

/// Console replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleReply {
    Sessions(Vec<SessionSummary>),
    Ok,
    NotFound,
    Usage,
}

impl ConsoleReply {
    /// Wire text of the reply.
    pub fn render(&self) -> String {
        match self {
            ConsoleReply::Sessions(sessions) => {
                let mut out = String::from("ivs-sessions: \n");
                for s in sessions {
                    out.push_str(&format!(
                        "{} [script:{} / caller-number: {} / called-number={} / start-ts={}]\n",
                        s.id, s.script_name, s.caller_number, s.called_number, s.start_ts
                    ));
                }
                out
            }
            ConsoleReply::Ok => "+OK\n".to_string(),
            ConsoleReply::NotFound => "-ERR: session not found\n".to_string(),
            ConsoleReply::Usage => format!("-USAGE: {SYNTAX}\n"),
        }
    }
}
