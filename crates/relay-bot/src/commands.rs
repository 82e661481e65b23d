use thiserror::Error;

use relay_types::{ChatId, UserId};

/// A parsed bot command. Every command has an English name and a
/// Portuguese alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Groups,
    Status,
    AddGroup { id: ChatId, name: Option<String> },
    RemoveGroup(ChatId),
    SetOrigin(ChatId),
    AddAdmin(UserId),
    RemoveAdmin(UserId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("The {0} id must be a whole number.")]
    InvalidId(&'static str),
}

const ADD_GROUP_USAGE: &str = "/addgroup <group id> [name]";
const REMOVE_GROUP_USAGE: &str = "/removegroup <group id>";
const SET_ORIGIN_USAGE: &str = "/setorigin <group id>";
const ADD_ADMIN_USAGE: &str = "/addadmin <user id>";
const REMOVE_ADMIN_USAGE: &str = "/removeadmin <user id>";

impl Command {
    /// Parse a `/command` message.
    ///
    /// Returns `None` for unknown commands and for commands addressed to a
    /// different bot (`/help@other_bot`), which are silently ignored.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Result<Command, CommandError>> {
        let text = text.trim();
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        let head = head.strip_prefix('/')?;

        let name = match head.split_once('@') {
            Some((name, target)) => {
                if let Some(me) = bot_username {
                    if !target.eq_ignore_ascii_case(me) {
                        return None;
                    }
                }
                name
            }
            None => head,
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "help" | "ajuda" => Ok(Command::Help),
            "groups" | "grupos" => Ok(Command::Groups),
            "status" => Ok(Command::Status),
            "addgroup" | "adicionargrupo" => parse_add_group(rest),
            "removegroup" | "removergrupo" => {
                parse_id(rest, "group", REMOVE_GROUP_USAGE).map(|id| Command::RemoveGroup(ChatId(id)))
            }
            "setorigin" | "definirgrupoprincipal" => {
                parse_id(rest, "group", SET_ORIGIN_USAGE).map(|id| Command::SetOrigin(ChatId(id)))
            }
            "addadmin" | "adicionaradmin" => {
                parse_id(rest, "user", ADD_ADMIN_USAGE).map(|id| Command::AddAdmin(UserId(id)))
            }
            "removeadmin" | "removeradmin" => {
                parse_id(rest, "user", REMOVE_ADMIN_USAGE).map(|id| Command::RemoveAdmin(UserId(id)))
            }
            _ => return None,
        };
        Some(command)
    }

    /// Whether only administrators may run this command.
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::Start | Command::Help)
    }
}

fn parse_add_group(args: &str) -> Result<Command, CommandError> {
    let (id, name) = match args.split_once(char::is_whitespace) {
        Some((id, name)) => (id, Some(name.trim().to_string())),
        None => (args, None),
    };
    let id = parse_id(id, "group", ADD_GROUP_USAGE)?;
    Ok(Command::AddGroup {
        id: ChatId(id),
        name: name.filter(|n| !n.is_empty()),
    })
}

fn parse_id(args: &str, what: &'static str, usage: &'static str) -> Result<i64, CommandError> {
    let mut words = args.split_whitespace();
    let (Some(raw), None) = (words.next(), words.next()) else {
        return Err(CommandError::Usage(usage));
    };
    raw.parse().map_err(|_| CommandError::InvalidId(what))
}
