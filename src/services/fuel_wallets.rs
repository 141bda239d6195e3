//! Prepaid fuel-credit wallets per owner
//!
//! Engine-owned ledger state: balances only ever change through
//! `top_up` and `charge`, and never go negative. A charge below the
//! configured threshold flags a low balance; wallets with auto-top-up
//! enabled are credited the configured amount instead of failing.

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::types::{Cents, UserId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// One owner's prepaid fuel balance
#[derive(Debug, Clone)]
pub struct FuelWallet {
    pub owner_id: UserId,
    pub balance_cents: Cents,
    pub total_purchased_cents: Cents,
    pub total_consumed_cents: Cents,
    pub auto_topup_enabled: bool,
}

/// Outcome of a successful charge
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub balance_cents: Cents,
    /// Balance ended below the configured threshold
    pub low_balance: bool,
    /// An automatic top-up ran to cover the charge
    pub auto_topped_up: bool,
}

/// All fuel wallets, keyed by owner
pub struct FuelWallets {
    wallets: RwLock<FxHashMap<UserId, FuelWallet>>,
    low_balance_threshold_cents: Cents,
    auto_topup_amount_cents: Cents,
}

impl FuelWallets {
    pub fn new(low_balance_threshold_cents: Cents, auto_topup_amount_cents: Cents) -> Self {
        Self {
            wallets: RwLock::new(FxHashMap::default()),
            low_balance_threshold_cents,
            auto_topup_amount_cents,
        }
    }

    /// Open a wallet for an owner; idempotent
    pub fn open(&self, owner_id: UserId) -> FuelWallet {
        let mut wallets = self.wallets.write();
        wallets
            .entry(owner_id)
            .or_insert_with(|| {
                debug!(owner_id = %owner_id, "fuel_wallet_opened");
                FuelWallet {
                    owner_id,
                    balance_cents: 0,
                    total_purchased_cents: 0,
                    total_consumed_cents: 0,
                    auto_topup_enabled: false,
                }
            })
            .clone()
    }

    /// Credit the wallet
    pub fn top_up(&self, owner_id: UserId, amount_cents: Cents) -> EngineResult<FuelWallet> {
        let mut wallets = self.wallets.write();
        let wallet =
            wallets.get_mut(&owner_id).ok_or(EngineError::WalletNotFound(owner_id))?;
        wallet.balance_cents += amount_cents;
        wallet.total_purchased_cents += amount_cents;

        info!(
            owner_id = %owner_id,
            amount_cents = %amount_cents,
            balance_cents = %wallet.balance_cents,
            "fuel_topped_up"
        );
        Ok(wallet.clone())
    }

    /// Charge the wallet for consumed fuel.
    ///
    /// Fails with `InsufficientFuel` (balance untouched) when the
    /// balance cannot cover the charge and auto-top-up is off.
    pub fn charge(&self, owner_id: UserId, amount_cents: Cents) -> EngineResult<ChargeOutcome> {
        let mut wallets = self.wallets.write();
        let wallet =
            wallets.get_mut(&owner_id).ok_or(EngineError::WalletNotFound(owner_id))?;

        let mut auto_topped_up = false;
        if wallet.balance_cents < amount_cents {
            if !wallet.auto_topup_enabled {
                return Err(EngineError::InsufficientFuel {
                    owner_id,
                    required_cents: amount_cents,
                    balance_cents: wallet.balance_cents,
                });
            }
            // Credit whole top-up units until the charge is covered
            while wallet.balance_cents < amount_cents {
                wallet.balance_cents += self.auto_topup_amount_cents;
                wallet.total_purchased_cents += self.auto_topup_amount_cents;
            }
            auto_topped_up = true;
            info!(
                owner_id = %owner_id,
                balance_cents = %wallet.balance_cents,
                "fuel_auto_topped_up"
            );
        }

        wallet.balance_cents -= amount_cents;
        wallet.total_consumed_cents += amount_cents;
        let low_balance = wallet.balance_cents < self.low_balance_threshold_cents;

        info!(
            owner_id = %owner_id,
            amount_cents = %amount_cents,
            balance_cents = %wallet.balance_cents,
            low_balance = %low_balance,
            "fuel_charged"
        );

        Ok(ChargeOutcome { balance_cents: wallet.balance_cents, low_balance, auto_topped_up })
    }

    pub fn set_auto_topup(&self, owner_id: UserId, enabled: bool) -> EngineResult<FuelWallet> {
        let mut wallets = self.wallets.write();
        let wallet =
            wallets.get_mut(&owner_id).ok_or(EngineError::WalletNotFound(owner_id))?;
        wallet.auto_topup_enabled = enabled;
        Ok(wallet.clone())
    }

    pub fn wallet(&self, owner_id: UserId) -> Option<FuelWallet> {
        self.wallets.read().get(&owner_id).cloned()
    }
}
