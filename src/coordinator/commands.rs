//! Names of the commands understood by the coordinator

use crate::error::{LobbyError, Result};
use std::fmt;
use std::str::FromStr;

/// Command carried by an inbound `command` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Register,
    Unregister,
    ChangeState,
    Report,
    GetLeaderboard,
    GetRatingList,
    Profile,
}

impl CommandKind {
    pub const ALL: [CommandKind; 7] = [
        CommandKind::Register,
        CommandKind::Unregister,
        CommandKind::ChangeState,
        CommandKind::Report,
        CommandKind::GetLeaderboard,
        CommandKind::GetRatingList,
        CommandKind::Profile,
    ];

    /// Wire name, also used as metrics label
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Register => "register",
            CommandKind::Unregister => "unregister",
            CommandKind::ChangeState => "changestate",
            CommandKind::Report => "report",
            CommandKind::GetLeaderboard => "getleaderboard",
            CommandKind::GetRatingList => "getratinglist",
            CommandKind::Profile => "profile",
        }
    }

    /// Whether the command mutates the game registry
    pub fn touches_registry(self) -> bool {
        matches!(
            self,
            CommandKind::Register | CommandKind::Unregister | CommandKind::ChangeState
        )
    }
}

impl FromStr for CommandKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| {
                LobbyError::MalformedCommand {
                    command: s.to_string(),
                    reason: "unknown command".to_string(),
                }
                .into()
            })
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
