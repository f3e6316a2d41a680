//! Line commands read from the terminal.
//!
//! ```text
//! add <text>          add an item
//! edit <id> <text>    replace an item's text
//! toggle <id>         flip an item's completed flag
//! delete <id>         remove an item
//! show                print the list
//! ```

use std::str::FromStr;

use thiserror::Error;
use todo_core::{ItemId, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Add(String),
    Edit(ItemId, String),
    Toggle(ItemId),
    Delete(ItemId),
    Show,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid item ID: {0}")]
    InvalidId(#[from] todo_core::IdError),
}

/// Split off the first whitespace-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

impl FromStr for ClientCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (verb, rest) = split_word(line);
        match verb {
            "" => Err(CommandError::Empty),
            "add" => {
                if rest.is_empty() {
                    return Err(CommandError::Usage("add <text>"));
                }
                Ok(ClientCommand::Add(rest.to_string()))
            }
            "edit" => {
                let (id, text) = split_word(rest);
                if id.is_empty() || text.is_empty() {
                    return Err(CommandError::Usage("edit <id> <text>"));
                }
                Ok(ClientCommand::Edit(id.parse()?, text.to_string()))
            }
            "toggle" | "delete" => {
                let (id, extra) = split_word(rest);
                if id.is_empty() || !extra.is_empty() {
                    return Err(CommandError::Usage(if verb == "toggle" { "toggle <id>" } else { "delete <id>" }));
                }
                let id: ItemId = id.parse()?;
                Ok(if verb == "toggle" {
                    ClientCommand::Toggle(id)
                } else {
                    ClientCommand::Delete(id)
                })
            }
            "show" | "ls" => Ok(ClientCommand::Show),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Plain-text rendering of a list, one item per line.
pub fn render(snapshot: &Snapshot) -> String {
    let visibility = if snapshot.is_public { "public" } else { "private" };
    let mut out = format!("{} item(s), {}\n", snapshot.items.len(), visibility);
    for item in &snapshot.items {
        let mark = if item.completed { "x" } else { " " };
        out.push_str(&format!("[{}] {}  ({})\n", mark, item.text, item.id));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use todo_core::{ListItem, SessionId, Versionstamp};

    #[test]
    fn test_parse_commands() {
        assert_eq!("add buy milk".parse::<ClientCommand>(), Ok(ClientCommand::Add("buy milk".into())));
        assert_eq!(
            "edit  a   buy oat milk ".parse::<ClientCommand>(),
            Ok(ClientCommand::Edit("a".parse().unwrap(), "buy oat milk".into()))
        );
        assert_eq!("toggle a".parse::<ClientCommand>(), Ok(ClientCommand::Toggle("a".parse().unwrap())));
        assert_eq!("delete a".parse::<ClientCommand>(), Ok(ClientCommand::Delete("a".parse().unwrap())));
        assert_eq!("show".parse::<ClientCommand>(), Ok(ClientCommand::Show));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<ClientCommand>(), Err(CommandError::Empty));
        assert_eq!("add".parse::<ClientCommand>(), Err(CommandError::Usage("add <text>")));
        assert_eq!("edit a".parse::<ClientCommand>(), Err(CommandError::Usage("edit <id> <text>")));
        assert_eq!("toggle a b".parse::<ClientCommand>(), Err(CommandError::Usage("toggle <id>")));
        assert!(matches!("frobnicate".parse::<ClientCommand>(), Err(CommandError::Unknown(_))));
        let long_id = "x".repeat(200);
        assert!(matches!(
            format!("delete {}", long_id).parse::<ClientCommand>(),
            Err(CommandError::InvalidId(_))
        ));
    }

    #[test]
    fn test_render() {
        let snapshot = Snapshot {
            owner_id: SessionId::new("alice"),
            is_public: true,
            items: vec![ListItem {
                id: "a".parse().unwrap(),
                versionstamp: Versionstamp::from(3),
                text: "buy milk".into(),
                completed: true,
                created_at: 0,
                updated_at: 0,
            }],
        };
        assert_eq!(render(&snapshot), "1 item(s), public\n[x] buy milk  (a)\n");
    }
}
