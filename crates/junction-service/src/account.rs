use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_ACCOUNT_ID_LEN: usize = 64;

#[derive(Error, Debug, PartialEq)]
pub enum AccountIdError {
    #[error("account ids must be 1-64 characters")]
    InvalidLength,
    #[error("account ids may only contain ascii alphanumerics, '-' and '_'")]
    InvalidCharacter,
}

/// Stable identifier of a peer account.
///
/// Account ids are operator-assigned strings (`alice`, `lnd-peer-2`), unique
/// per node, and appear in persisted keys, so the charset is restricted to
/// ascii alphanumerics plus `-` and `_`.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(Arc<str>);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        if src.is_empty() || src.len() > MAX_ACCOUNT_ID_LEN {
            return Err(AccountIdError::InvalidLength);
        }
        if !src
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(AccountIdError::InvalidCharacter);
        }
        Ok(AccountId(Arc::from(src)))
    }
}

impl std::convert::TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(src: String) -> Result<Self, Self::Error> {
        AccountId::from_str(&src)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "AccountId({})", self.0)
    }
}

/// How this node relates to a peer for routing purposes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingRelation {
    Parent,
    Peer,
    Child,
}

impl RoutingRelation {
    /// Default selection weight when none is configured. Lower wins, so
    /// routes learned from children are preferred over peers over parents.
    pub fn default_weight(self) -> u32 {
        match self {
            RoutingRelation::Child => 100,
            RoutingRelation::Peer => 200,
            RoutingRelation::Parent => 300,
        }
    }
}

impl FromStr for RoutingRelation {
    type Err = ();

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        match src.to_lowercase().as_str() {
            "parent" => Ok(RoutingRelation::Parent),
            "peer" => Ok(RoutingRelation::Peer),
            "child" => Ok(RoutingRelation::Child),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RoutingRelation {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let as_str = match self {
            RoutingRelation::Parent => "parent",
            RoutingRelation::Peer => "peer",
            RoutingRelation::Child => "child",
        };
        formatter.write_str(as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_ids() {
        for id in &["alice", "lnd-peer-2", "UPSTREAM_1", "a"] {
            assert!(AccountId::from_str(id).is_ok(), "{}", id);
        }
    }

    #[test]
    fn rejects_bad_ids() {
        assert_eq!(
            AccountId::from_str("").unwrap_err(),
            AccountIdError::InvalidLength
        );
        assert_eq!(
            AccountId::from_str(&"a".repeat(65)).unwrap_err(),
            AccountIdError::InvalidLength
        );
        assert_eq!(
            AccountId::from_str("no spaces").unwrap_err(),
            AccountIdError::InvalidCharacter
        );
        assert_eq!(
            AccountId::from_str("no.dots").unwrap_err(),
            AccountIdError::InvalidCharacter
        );
    }

    #[test]
    fn serde_round_trip() {
        let id = AccountId::from_str("alice").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"alice\"");
        assert_eq!(serde_json::from_str::<AccountId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<AccountId>("\"bad id\"").is_err());
    }

    #[test]
    fn relation_parsing() {
        assert_eq!(
            RoutingRelation::from_str("Parent").unwrap(),
            RoutingRelation::Parent
        );
        assert_eq!(RoutingRelation::from_str("peer").unwrap(), RoutingRelation::Peer);
        assert!(RoutingRelation::from_str("sibling").is_err());
    }

    #[test]
    fn relation_weights_order_child_first() {
        assert!(
            RoutingRelation::Child.default_weight() < RoutingRelation::Peer.default_weight()
        );
        assert!(
            RoutingRelation::Peer.default_weight() < RoutingRelation::Parent.default_weight()
        );
    }
}
