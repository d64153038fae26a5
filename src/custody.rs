//! In-memory NFT registry with protocol custody
//!
//! Stands in for the collateral NFT contracts: tracks who owns each token
//! and which tokens are locked by the protocol.

use crate::common::traits::{CollateralRegistry, CustodyError};
use crate::common::types::{Address, CollateralRef};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "holder", rename_all = "snake_case")]
pub enum Custodian {
    Account { owner: Address },
    Protocol { depositor: Address },
}

#[derive(Debug, Default)]
pub struct InMemoryCollateral {
    tokens: DashMap<CollateralRef, Custodian>,
}

impl InMemoryCollateral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token owned by `to`, replacing any previous record
    pub fn mint(&self, token: CollateralRef, to: Address) {
        self.tokens.insert(token, Custodian::Account { owner: to });
    }

    pub fn custodian(&self, token: &CollateralRef) -> Option<Custodian> {
        self.tokens.get(token).map(|entry| *entry)
    }

    pub fn export(&self) -> Vec<(CollateralRef, Custodian)> {
        self.tokens.iter().map(|entry| (*entry.key(), *entry.value())).collect()
    }

    pub fn import(&self, tokens: Vec<(CollateralRef, Custodian)>) {
        self.tokens.clear();
        for (token, custodian) in tokens {
            self.tokens.insert(token, custodian);
        }
    }
}

impl CollateralRegistry for InMemoryCollateral {
    fn owner_of(&self, token: &CollateralRef) -> Option<Address> {
        match self.custodian(token)? {
            Custodian::Account { owner } => Some(owner),
            Custodian::Protocol { .. } => None,
        }
    }

    fn lock(&self, token: &CollateralRef, from: Address) -> Result<(), CustodyError> {
        let mut entry = self
            .tokens
            .get_mut(token)
            .ok_or(CustodyError::UnknownToken(*token))?;
        match *entry {
            Custodian::Account { owner } if owner == from => {
                *entry = Custodian::Protocol { depositor: from };
                debug!(%token, %from, "Collateral locked");
                Ok(())
            }
            _ => Err(CustodyError::NotOwner {
                token: *token,
                caller: from,
            }),
        }
    }

    fn release(&self, token: &CollateralRef, to: Address) -> Result<(), CustodyError> {
        let mut entry = self
            .tokens
            .get_mut(token)
            .ok_or(CustodyError::UnknownToken(*token))?;
        match *entry {
            Custodian::Protocol { .. } => {
                *entry = Custodian::Account { owner: to };
                debug!(%token, %to, "Collateral released");
                Ok(())
            }
            Custodian::Account { .. } => Err(CustodyError::NotInCustody(*token)),
        }
    }

    fn in_custody(&self, token: &CollateralRef) -> bool {
        matches!(self.custodian(token), Some(Custodian::Protocol { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);

    fn token() -> CollateralRef {
        CollateralRef::new(Address::repeat_byte(0xc0), 7)
    }

    #[test]
    fn test_lock_and_release_move_ownership() {
        let registry = InMemoryCollateral::new();
        registry.mint(token(), ALICE);

        registry.lock(&token(), ALICE).unwrap();
        assert!(registry.in_custody(&token()));
        assert_eq!(registry.owner_of(&token()), None);

        registry.release(&token(), BOB).unwrap();
        assert_eq!(registry.owner_of(&token()), Some(BOB));
        assert!(!registry.in_custody(&token()));
    }

    #[test]
    fn test_only_the_owner_can_lock() {
        let registry = InMemoryCollateral::new();
        registry.mint(token(), ALICE);

        assert_eq!(
            registry.lock(&token(), BOB).unwrap_err(),
            CustodyError::NotOwner { token: token(), caller: BOB }
        );
        assert_eq!(
            registry.release(&token(), BOB).unwrap_err(),
            CustodyError::NotInCustody(token())
        );

        let unknown = CollateralRef::new(Address::ZERO, 1);
        assert!(matches!(
            registry.lock(&unknown, ALICE),
            Err(CustodyError::UnknownToken(_))
        ));
    }
}
