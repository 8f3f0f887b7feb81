//! Nick <-> identity mapping of the clients present in the lobby room

use crate::types::{ClientId, PlayerId};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Clients currently present, keyed both ways
#[derive(Debug, Default, Clone)]
pub struct PresenceRoster {
    by_nick: BTreeMap<String, ClientId>,
    by_client: HashMap<ClientId, String>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a client joining under `nick`.
    ///
    /// A client that rejoins under another nick drops its old one, and a nick
    /// taken over by another client is released by the previous holder.
    pub fn join(&mut self, client: &str, nick: &str) {
        if let Some(old_nick) = self.by_client.remove(client) {
            self.by_nick.remove(&old_nick);
        }
        if let Some(previous) = self.by_nick.insert(nick.to_string(), client.to_string()) {
            if previous != client {
                debug!("Nick '{}' moved from {} to {}", nick, previous, client);
                self.by_client.remove(&previous);
            }
        }
        self.by_client.insert(client.to_string(), nick.to_string());
    }

    /// Remove a client, returning the nick it used
    pub fn leave(&mut self, client: &str) -> Option<String> {
        let nick = self.by_client.remove(client)?;
        self.by_nick.remove(&nick);
        Some(nick)
    }

    /// Map a visible name to a player identity, falling back to the name itself
    pub fn resolve(&self, name: &str) -> PlayerId {
        self.by_nick
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn nick_of(&self, client: &str) -> Option<&str> {
        self.by_client.get(client).map(String::as_str)
    }

    pub fn contains(&self, client: &str) -> bool {
        self.by_client.contains_key(client)
    }

    /// `(nick, identity)` pairs ordered by nick
    pub fn entries(&self) -> impl Iterator<Item = (&String, &ClientId)> {
        self.by_nick.iter()
    }

    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }
}
