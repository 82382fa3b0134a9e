//! Account existence checks.
//!
//! The router distinguishes "user is offline" from "user does not
//! exist" when no session is reachable; this trait is the seam to the
//! account store backing that decision.

use dashmap::DashSet;
use jid::BareJid;

pub trait AccountManagement: Send + Sync {
    fn account_exists(&self, jid: &BareJid) -> bool;
}

/// In-memory account set, for tests and embedded setups.
#[derive(Debug, Default)]
pub struct MemoryAccounts {
    accounts: DashSet<BareJid>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, jid: BareJid) {
        self.accounts.insert(jid);
    }

    pub fn remove(&self, jid: &BareJid) -> bool {
        self.accounts.remove(jid).is_some()
    }
}

impl AccountManagement for MemoryAccounts {
    fn account_exists(&self, jid: &BareJid) -> bool {
        self.accounts.contains(jid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn membership_follows_add_and_remove() {
        let accounts = MemoryAccounts::new();
        let alice = BareJid::from_str("alice@example.org").unwrap();

        assert!(!accounts.account_exists(&alice));
        accounts.add(alice.clone());
        assert!(accounts.account_exists(&alice));
        assert!(accounts.remove(&alice));
        assert!(!accounts.account_exists(&alice));
    }
}
