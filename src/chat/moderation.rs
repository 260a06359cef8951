// Admin roster and IP ban list

use crate::chat::error::ChatError;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// A moderation action carried in `ADMIN` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Ban,
    Unban,
    GrantAdmin,
    RevokeAdmin,
}

impl Action {
    /// Name used on the wire
    pub fn as_wire(&self) -> &'static str {
        match self {
            Action::Ban => "BAN",
            Action::Unban => "UNBAN",
            Action::GrantAdmin => "ADD_ADMIN",
            Action::RevokeAdmin => "DEL_ADMIN",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for Action {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BAN" => Ok(Action::Ban),
            "UNBAN" => Ok(Action::Unban),
            "ADD_ADMIN" => Ok(Action::GrantAdmin),
            "DEL_ADMIN" => Ok(Action::RevokeAdmin),
            _ => Err(ChatError::UnknownAction(s.to_string())),
        }
    }
}

/// A ban/unban/op/deop request attributed to an issuer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModerationCommand {
    pub action: Action,
    /// Address for ban actions, principal name for admin actions
    pub target: String,
    /// Principal name of whoever issued it
    pub issuer: String,
}

impl ModerationCommand {
    pub fn new(action: Action, target: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            issuer: issuer.into(),
        }
    }
}

/// How a ban entry matches addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanPattern {
    /// Compared by string equality
    Exact,
    /// `a.b.c.d/n` or an IPv6 prefix
    Cidr(IpNet),
    /// `start-end`, inclusive, IPv4 only
    Range(Ipv4Addr, Ipv4Addr),
    /// Looked like a range but did not parse; matches nothing
    Invalid,
}

/// One entry of the ban set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEntry {
    pub address: String,
    pub is_range: bool,
    pub pattern: BanPattern,
}

impl BanEntry {
    /// Classify an address as exact, CIDR or dash range
    pub fn new(address: &str) -> Self {
        let address = address.trim().to_string();
        let is_range = address.contains('/') || address.contains('-');

        let pattern = if !is_range {
            BanPattern::Exact
        } else if address.contains('/') {
            address
                .parse::<IpNet>()
                .map(BanPattern::Cidr)
                .unwrap_or(BanPattern::Invalid)
        } else {
            parse_dash_range(&address).unwrap_or(BanPattern::Invalid)
        };

        Self {
            address,
            is_range,
            pattern,
        }
    }

    /// Whether this entry covers `ip`
    pub fn matches(&self, ip: &str, parsed: IpAddr) -> bool {
        match &self.pattern {
            BanPattern::Exact => self.address == ip,
            BanPattern::Cidr(net) => net.contains(&parsed),
            BanPattern::Range(start, end) => match parsed {
                IpAddr::V4(v4) => *start <= v4 && v4 <= *end,
                IpAddr::V6(v6) => v6
                    .to_ipv4_mapped()
                    .map(|v4| *start <= v4 && v4 <= *end)
                    .unwrap_or(false),
            },
            BanPattern::Invalid => false,
        }
    }
}

fn parse_dash_range(address: &str) -> Option<BanPattern> {
    let (start, end) = address.split_once('-')?;
    let start = start.trim().parse::<Ipv4Addr>().ok()?;
    let end = end.trim().parse::<Ipv4Addr>().ok()?;
    Some(BanPattern::Range(start, end))
}

/// Local view of who may moderate and who is banned.
///
/// Both collections are sets: applying the same command twice leaves the
/// state exactly as applying it once. Conflicting commands on the same key
/// resolve by application order (last applied wins).
#[derive(Debug, Clone, Default)]
pub struct ModerationState {
    admins: HashSet<String>,
    bans: BTreeMap<String, BanEntry>,
}

impl ModerationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the admin roster
    pub fn with_admins<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
            bans: BTreeMap::new(),
        }
    }

    pub fn is_admin(&self, name: &str) -> bool {
        self.admins.contains(name)
    }

    /// Check an address against exact and range bans.
    ///
    /// Empty or unparseable addresses are never banned.
    pub fn is_banned(&self, ip: &str) -> bool {
        let ip = ip.trim();
        if ip.is_empty() {
            return false;
        }
        let parsed = match ip.parse::<IpAddr>() {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        self.bans.values().any(|entry| entry.matches(ip, parsed))
    }

    pub fn admins(&self) -> impl Iterator<Item = &str> {
        self.admins.iter().map(String::as_str)
    }

    pub fn bans(&self) -> impl Iterator<Item = &BanEntry> {
        self.bans.values()
    }

    /// Apply a command without checking who issued it.
    ///
    /// Returns `true` if the state changed.
    pub fn apply(&mut self, command: &ModerationCommand) -> bool {
        let target = command.target.trim();
        match command.action {
            Action::Ban => {
                if self.bans.contains_key(target) {
                    return false;
                }
                self.bans.insert(target.to_string(), BanEntry::new(target));
                true
            }
            Action::Unban => self.bans.remove(target).is_some(),
            Action::GrantAdmin => self.admins.insert(target.to_string()),
            Action::RevokeAdmin => self.admins.remove(target),
        }
    }

    /// Apply a command only if its issuer is in the local admin set
    pub fn apply_authorized(&mut self, command: &ModerationCommand) -> Result<bool, ChatError> {
        if !self.is_admin(&command.issuer) {
            return Err(ChatError::NotAuthorized(command.issuer.clone()));
        }
        Ok(self.apply(command))
    }
}
