//! Cluster member values and peer-list parsing

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// One peer of the cluster.
///
/// Two members are equal when their addresses are equal. Metadata is carried
/// along but does not take part in identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawMember")]
pub struct Member {
    address: String,
    metadata: BTreeMap<String, String>,
}

/// Unvalidated wire form of a [`Member`].
#[derive(Deserialize)]
struct RawMember {
    address: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl TryFrom<RawMember> for Member {
    type Error = Error;

    fn try_from(raw: RawMember) -> Result<Self> {
        let address = raw.address.trim();
        validate_address(address)?;

        Ok(Self {
            address: address.to_string(),
            metadata: raw.metadata,
        })
    }
}

impl Member {
    /// Parse a single entry of the form `host:port` or `host:port?key=value&...`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedAddress`] if the part before `?` is not a
    /// `host:port` pair with a numeric port in `1..=65535`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (address, query) = match raw.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (raw, None),
        };

        validate_address(address)?;

        Ok(Self {
            address: address.to_string(),
            metadata: query.map(parse_metadata).unwrap_or_default(),
        })
    }

    /// Returns a copy of this member with `key` set to `value` in its metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `host:port` address of this member.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The host part of the address, brackets included for IPv6 literals.
    pub fn host(&self) -> &str {
        self.address
            .rsplit_once(':')
            .map_or(self.address.as_str(), |(host, _)| host)
    }

    /// The port part of the address.
    pub fn port(&self) -> u16 {
        self.address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or_default()
    }

    /// Metadata attached to this member.
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// Parse a single peer entry. Shorthand for [`Member::parse`].
///
/// # Errors
///
/// Returns [`Error::MalformedAddress`] when `raw` is not a valid `host:port`.
pub fn parse_address(raw: &str) -> Result<Member> {
    Member::parse(raw)
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl FromStr for Member {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn validate_address(address: &str) -> Result<()> {
    let malformed = |reason: &str| Error::MalformedAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| malformed("missing ':' separator"))?;

    if host.is_empty() {
        return Err(malformed("empty host"));
    }

    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("port is not numeric"));
    }

    if port.len() > 1 && port.starts_with('0') {
        return Err(malformed("port has leading zeros"));
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => return Err(malformed("port out of range 1..=65535")),
        Ok(_) => {}
    }

    if let Some(literal) = host.strip_prefix('[') {
        let literal = literal
            .strip_suffix(']')
            .ok_or_else(|| malformed("unterminated IPv6 literal"))?;
        literal
            .parse::<Ipv6Addr>()
            .map_err(|_| malformed("invalid IPv6 literal"))?;
    } else if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(malformed("invalid host"));
    }

    Ok(())
}

fn parse_metadata(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
            None => (pair.trim().to_string(), String::new()),
        })
        .collect()
}

/// A snapshot of discovered peers, keyed by address.
///
/// Equality compares both addresses and metadata, so a set whose members only
/// changed metadata is a different set. Serialized as a list of members.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(into = "Vec<Member>", from = "Vec<Member>")]
pub struct MemberSet {
    members: BTreeMap<String, Member>,
}

impl MemberSet {
    /// Create an empty member set.
    pub const fn new() -> Self {
        Self {
            members: BTreeMap::new(),
        }
    }

    /// Parse cluster-file content: one or more comma-separated entries per
    /// line, `#` starting a comment. Malformed entries are skipped with a
    /// warning.
    pub fn parse_lines(content: &str) -> Self {
        Self::collect_entries(content.lines().flat_map(|line| {
            let entry = match line.split_once('#') {
                Some((entry, _comment)) => entry,
                None => line,
            };
            entry.split(',')
        }))
    }

    /// Parse a static comma-separated address list. Malformed entries are
    /// skipped with a warning.
    pub fn parse_list(list: &str) -> Self {
        Self::collect_entries(list.split(','))
    }

    fn collect_entries<'a>(entries: impl Iterator<Item = &'a str>) -> Self {
        let mut set = Self::new();

        for entry in entries.map(str::trim).filter(|entry| !entry.is_empty()) {
            match Member::parse(entry) {
                Ok(member) => {
                    set.insert(member);
                }
                Err(e) => warn!("Skipping peer entry: {}", e),
            }
        }

        set
    }

    /// Insert a member, replacing any member with the same address.
    /// Returns `true` if the address was not present before.
    pub fn insert(&mut self, member: Member) -> bool {
        self.members
            .insert(member.address.clone(), member)
            .is_none()
    }

    /// Number of members in the set.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set holds no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether a member with this address is present.
    pub fn contains(&self, address: &str) -> bool {
        self.members.contains_key(address)
    }

    /// Look up a member by address.
    pub fn get(&self, address: &str) -> Option<&Member> {
        self.members.get(address)
    }

    /// Iterate over members in address order.
    pub fn iter(&self) -> MemberSetIter<'_> {
        MemberSetIter {
            inner: self.members.values(),
        }
    }

    /// The addresses in this set, in sorted order.
    pub fn addresses(&self) -> Vec<&str> {
        self.members.keys().map(String::as_str).collect()
    }
}

impl PartialEq for MemberSet {
    fn eq(&self, other: &Self) -> bool {
        self.members.len() == other.members.len()
            && self
                .members
                .iter()
                .zip(other.members.iter())
                .all(|((a, left), (b, right))| a == b && left.metadata == right.metadata)
    }
}

impl Eq for MemberSet {}

impl FromIterator<Member> for MemberSet {
    fn from_iter<I: IntoIterator<Item = Member>>(iter: I) -> Self {
        let mut set = Self::new();
        for member in iter {
            set.insert(member);
        }
        set
    }
}

impl From<Vec<Member>> for MemberSet {
    fn from(members: Vec<Member>) -> Self {
        members.into_iter().collect()
    }
}

impl From<MemberSet> for Vec<Member> {
    fn from(set: MemberSet) -> Self {
        set.members.into_values().collect()
    }
}

impl<'a> IntoIterator for &'a MemberSet {
    type Item = &'a Member;
    type IntoIter = MemberSetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for MemberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.addresses().join(", "))
    }
}

/// Iterator over the members of a [`MemberSet`].
#[derive(Debug)]
pub struct MemberSetIter<'a> {
    inner: btree_map::Values<'a, String, Member>,
}

impl<'a> Iterator for MemberSetIter<'a> {
    type Item = &'a Member;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
