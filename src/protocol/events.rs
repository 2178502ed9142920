//! Protocol events for state change notifications.
//!
//! Events are emitted for all significant state changes in the protocol,
//! enabling clients to track activity and react accordingly.

use serde::{Deserialize, Serialize};

use crate::liquidation::recovery::SystemMode;
use crate::utils::crypto::{Address, VaultId};

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // Vault Events
    /// Vault was opened
    VaultOpened(VaultOpenedEvent),
    /// Collateral was added to a vault
    CollateralAdded(CollateralAddedEvent),
    /// Vault was closed by its owner
    VaultClosed(VaultClosedEvent),
    /// Vault was liquidated
    VaultLiquidated(VaultLiquidatedEvent),
    /// Collateral surplus was claimed
    SurplusClaimed(SurplusClaimedEvent),

    // Liquidation Events
    /// A liquidation call was committed
    Liquidation(LiquidationEvent),
    /// Debt was offset against the stability pool
    Offset(OffsetEvent),
    /// Debt and collateral were redistributed to open vaults
    Redistribution(RedistributionEvent),

    // Stability Pool Events
    /// A deposit changed
    DepositChanged(DepositChangedEvent),
    /// Gains were paid out to a depositor
    GainsWithdrawn(GainsWithdrawnEvent),
    /// Collateral gain was moved into a vault
    GainRedirected(GainRedirectedEvent),
    /// A front end registered
    FrontEndRegistered(FrontEndRegisteredEvent),
    /// A front end's stake changed
    FrontEndStakeChanged(FrontEndStakeChangedEvent),
}

impl ProtocolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::VaultOpened(_) => "VaultOpened",
            Self::CollateralAdded(_) => "CollateralAdded",
            Self::VaultClosed(_) => "VaultClosed",
            Self::VaultLiquidated(_) => "VaultLiquidated",
            Self::SurplusClaimed(_) => "SurplusClaimed",
            Self::Liquidation(_) => "Liquidation",
            Self::Offset(_) => "Offset",
            Self::Redistribution(_) => "Redistribution",
            Self::DepositChanged(_) => "DepositChanged",
            Self::GainsWithdrawn(_) => "GainsWithdrawn",
            Self::GainRedirected(_) => "GainRedirected",
            Self::FrontEndRegistered(_) => "FrontEndRegistered",
            Self::FrontEndStakeChanged(_) => "FrontEndStakeChanged",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::VaultOpened(e) => e.timestamp,
            Self::CollateralAdded(e) => e.timestamp,
            Self::VaultClosed(e) => e.timestamp,
            Self::VaultLiquidated(e) => e.timestamp,
            Self::SurplusClaimed(e) => e.timestamp,
            Self::Liquidation(e) => e.timestamp,
            Self::Offset(e) => e.timestamp,
            Self::Redistribution(e) => e.timestamp,
            Self::DepositChanged(e) => e.timestamp,
            Self::GainsWithdrawn(e) => e.timestamp,
            Self::GainRedirected(e) => e.timestamp,
            Self::FrontEndRegistered(e) => e.timestamp,
            Self::FrontEndStakeChanged(e) => e.timestamp,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Vault was opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultOpenedEvent {
    /// Vault ID
    pub vault_id: VaultId,
    /// Owner
    pub owner: Address,
    /// Collateral locked
    pub coll: u128,
    /// Debt including the gas compensation reserve
    pub debt: u128,
    /// Stake assigned
    pub stake: u128,
    /// ICR at opening
    pub icr: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Collateral was added to a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralAddedEvent {
    /// Vault ID
    pub vault_id: VaultId,
    /// Amount added
    pub amount: u128,
    /// New collateral
    pub new_coll: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Vault was closed by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultClosedEvent {
    /// Vault ID
    pub vault_id: VaultId,
    /// Owner
    pub owner: Address,
    /// Collateral returned
    pub coll_returned: u128,
    /// Debt repaid, including the gas reserve
    pub debt_repaid: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Vault was liquidated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultLiquidatedEvent {
    /// Vault ID
    pub vault_id: VaultId,
    /// Owner
    pub owner: Address,
    /// Entire debt at liquidation
    pub debt: u128,
    /// Entire collateral at liquidation
    pub coll: u128,
    /// ICR at liquidation
    pub icr: u128,
    /// Mode the vault was liquidated under
    pub mode: SystemMode,
    /// Collateral left claimable by the owner
    pub coll_surplus: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Collateral surplus was claimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurplusClaimedEvent {
    /// Former vault owner
    pub owner: Address,
    /// Collateral claimed
    pub amount: u128,
    /// Timestamp
    pub timestamp: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A liquidation call was committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    /// Caller
    pub liquidator: Address,
    /// Number of vaults liquidated
    pub vaults: u32,
    /// Debt offset against the pool
    pub debt_offset: u128,
    /// Collateral sent to the pool
    pub coll_to_pool: u128,
    /// Debt redistributed
    pub debt_redistributed: u128,
    /// Collateral redistributed
    pub coll_redistributed: u128,
    /// Collateral paid to the liquidator
    pub coll_gas_compensation: u128,
    /// Stablecoin paid to the liquidator
    pub debt_gas_compensation: u128,
    /// Price used
    pub price: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Debt was offset against the stability pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetEvent {
    /// Debt cancelled
    pub debt_offset: u128,
    /// Collateral gained per unit deposited
    pub coll_gain_per_unit: u128,
    /// Deposit lost per unit deposited
    pub loss_per_unit: u128,
    /// Product `P` after the offset
    pub p: u128,
    /// Scale after the offset
    pub scale: u64,
    /// Epoch after the offset
    pub epoch: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// Debt and collateral were redistributed to open vaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionEvent {
    /// Debt redistributed
    pub debt: u128,
    /// Collateral redistributed
    pub coll: u128,
    /// `L_debt` after the redistribution
    pub l_debt: u128,
    /// `L_coll` after the redistribution
    pub l_coll: u128,
    /// Timestamp
    pub timestamp: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A deposit changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositChangedEvent {
    /// Depositor
    pub depositor: Address,
    /// New recorded value, zero when closed
    pub new_deposit: u128,
    /// Front end tag
    pub front_end: Option<Address>,
    /// Timestamp
    pub timestamp: u64,
}

/// Gains were paid out to a depositor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainsWithdrawnEvent {
    /// Depositor
    pub depositor: Address,
    /// Collateral paid
    pub coll_gain: u128,
    /// Deposit consumed by liquidations since the last update
    pub deposit_loss: u128,
    /// Reward tokens paid
    pub reward_gain: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Collateral gain was moved into a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainRedirectedEvent {
    /// Depositor
    pub depositor: Address,
    /// Receiving vault
    pub vault_id: VaultId,
    /// Collateral moved
    pub coll_gain: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// A front end registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEndRegisteredEvent {
    /// Front end address
    pub front_end: Address,
    /// Kickback rate
    pub kickback_rate: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// A front end's stake changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEndStakeChangedEvent {
    /// Front end address
    pub front_end: Address,
    /// New stake
    pub new_stake: u128,
    /// Reward tokens paid to the front end
    pub reward_paid: u128,
    /// Timestamp
    pub timestamp: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered log of emitted events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event
    pub fn push(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }

    /// All events, oldest first
    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Events of one type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&ProtocolEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if no event was emitted
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove and return all events
    pub fn drain(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }

    /// Remove all events
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::ONE;

    fn opened(timestamp: u64) -> ProtocolEvent {
        let owner = Address::from_label("alice");
        ProtocolEvent::VaultOpened(VaultOpenedEvent {
            vault_id: VaultId::generate(&owner, 0),
            owner,
            coll: 10 * ONE,
            debt: 2_000 * ONE,
            stake: 10 * ONE,
            icr: 2 * ONE,
            timestamp,
        })
    }

    #[test]
    fn test_event_types() {
        let event = opened(1_234_567_890);
        assert_eq!(event.event_type(), "VaultOpened");
        assert_eq!(event.timestamp(), 1_234_567_890);
    }

    #[test]
    fn test_event_log() {
        let mut log = EventLog::new();
        assert!(log.is_empty());

        log.push(opened(1));
        log.push(ProtocolEvent::FrontEndRegistered(FrontEndRegisteredEvent {
            front_end: Address::from_label("fe"),
            kickback_rate: ONE / 2,
            timestamp: 2,
        }));
        assert_eq!(log.len(), 2);
        assert_eq!(log.filter_by_type("VaultOpened").len(), 1);
        assert_eq!(log.events().last().map(|e| e.timestamp()), Some(2));

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert!(log.is_empty());
    }
}
