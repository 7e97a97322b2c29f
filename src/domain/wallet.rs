//! Wallet Ledger
//!
//! A wallet holds a customer's pre-funded balance. Every change to the
//! balance is described by an immutable `LedgerEntry` that snapshots the
//! balance before and after the change. The wallet never mutates its
//! balance directly: `prepare` validates an operation and returns the
//! entry, `apply` advances the wallet to the entry's `balance_after`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, Balance, DomainError};

text_enum! {
    pub enum WalletStatus {
        Active => "ACTIVE",
        Frozen => "FROZEN",
    }
}

text_enum! {
    pub enum WalletTransactionType {
        Deposit => "DEPOSIT",
        Withdrawal => "WITHDRAWAL",
        /// Paying an invoice from the wallet
        Purchase => "PURCHASE",
        /// Money returned for a wallet purchase
        Refund => "REFUND",
        /// Staff correction in either direction
        Adjustment => "ADJUSTMENT",
    }
}

text_enum! {
    pub enum Direction {
        Credit => "CREDIT",
        Debit => "DEBIT",
    }
}

impl WalletTransactionType {
    pub fn label_ar(&self) -> &'static str {
        match self {
            WalletTransactionType::Deposit => "إيداع",
            WalletTransactionType::Withdrawal => "سحب",
            WalletTransactionType::Purchase => "شراء",
            WalletTransactionType::Refund => "استرداد",
            WalletTransactionType::Adjustment => "تسوية",
        }
    }
}

/// A requested balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOperation {
    Deposit,
    Withdrawal,
    Purchase,
    Refund,
    /// Card top-up the provider already settled
    SettledTopUp,
    Adjustment(Direction),
}

impl LedgerOperation {
    pub fn kind(&self) -> WalletTransactionType {
        match self {
            LedgerOperation::Deposit | LedgerOperation::SettledTopUp => {
                WalletTransactionType::Deposit
            }
            LedgerOperation::Withdrawal => WalletTransactionType::Withdrawal,
            LedgerOperation::Purchase => WalletTransactionType::Purchase,
            LedgerOperation::Refund => WalletTransactionType::Refund,
            LedgerOperation::Adjustment(_) => WalletTransactionType::Adjustment,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            LedgerOperation::Deposit
            | LedgerOperation::Refund
            | LedgerOperation::SettledTopUp => Direction::Credit,
            LedgerOperation::Withdrawal | LedgerOperation::Purchase => Direction::Debit,
            LedgerOperation::Adjustment(direction) => *direction,
        }
    }

    /// Money the customer already paid is credited even while the wallet
    /// is frozen: refunds and provider-settled top-ups.
    fn allowed_when_frozen(&self) -> bool {
        matches!(self, LedgerOperation::Refund | LedgerOperation::SettledTopUp)
    }
}

/// One immutable ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub wallet_id: Uuid,
    /// 1-based position in the wallet's ledger
    pub sequence: i64,
    pub kind: WalletTransactionType,
    pub direction: Direction,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reference_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount with the sign of its direction
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }

    /// `balance_after == balance_before ± amount`
    pub fn is_balanced(&self) -> bool {
        self.balance_before + self.signed_amount() == self.balance_after
    }
}

/// Wallet aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    id: Uuid,
    customer_id: Uuid,
    currency: String,
    balance: Balance,
    status: WalletStatus,
    frozen_reason: Option<String>,
    /// Number of ledger entries applied; also the optimistic lock version
    version: i64,
}

impl Wallet {
    /// A fresh, empty wallet
    pub fn open(id: Uuid, customer_id: Uuid, currency: impl Into<String>) -> Self {
        Self {
            id,
            customer_id,
            currency: currency.into(),
            balance: Balance::zero(),
            status: WalletStatus::Active,
            frozen_reason: None,
            version: 0,
        }
    }

    /// Rebuild a wallet from its stored row
    pub fn from_db_state(
        id: Uuid,
        customer_id: Uuid,
        currency: String,
        balance: Decimal,
        status: WalletStatus,
        frozen_reason: Option<String>,
        version: i64,
    ) -> Result<Self, DomainError> {
        let balance = Balance::new(balance).map_err(|e| {
            DomainError::BusinessRuleViolation(format!("stored wallet balance invalid: {}", e))
        })?;

        Ok(Self {
            id,
            customer_id,
            currency,
            balance,
            status,
            frozen_reason,
            version,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn customer_id(&self) -> Uuid {
        self.customer_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn balance(&self) -> Decimal {
        self.balance.value()
    }

    pub fn status(&self) -> WalletStatus {
        self.status
    }

    pub fn frozen_reason(&self) -> Option<&str> {
        self.frozen_reason.as_deref()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Validate an operation and describe it as the next ledger entry.
    pub fn prepare(
        &self,
        operation: LedgerOperation,
        amount: &Amount,
        reference_id: Option<Uuid>,
        description: impl Into<String>,
    ) -> Result<LedgerEntry, DomainError> {
        if self.status == WalletStatus::Frozen && !operation.allowed_when_frozen() {
            return Err(DomainError::wallet_frozen(
                self.frozen_reason.clone().unwrap_or_default(),
            ));
        }

        let direction = operation.direction();
        let balance_after = match direction {
            Direction::Credit => self
                .balance
                .credit(amount)
                .map_err(|e| DomainError::InvalidAmount(e.to_string()))?,
            Direction::Debit => {
                if !self.balance.is_sufficient_for(amount) {
                    return Err(DomainError::insufficient_balance(
                        amount.value(),
                        self.balance.value(),
                    ));
                }
                self.balance
                    .debit(amount)
                    .map_err(|e| DomainError::InvalidAmount(e.to_string()))?
            }
        };

        Ok(LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: self.id,
            sequence: self.version + 1,
            kind: operation.kind(),
            direction,
            amount: amount.value(),
            balance_before: self.balance.value(),
            balance_after: balance_after.value(),
            reference_id,
            description: description.into(),
            created_at: Utc::now(),
        })
    }

    /// Advance the wallet past an entry produced by `prepare`
    pub fn apply(mut self, entry: &LedgerEntry) -> Self {
        self.balance = Balance::new(entry.balance_after).unwrap_or(self.balance);
        self.version = entry.sequence;
        self
    }

    pub fn freeze(&self, reason: impl Into<String>) -> Result<Self, DomainError> {
        if self.status == WalletStatus::Frozen {
            return Err(DomainError::BusinessRuleViolation(
                "wallet is already frozen".to_string(),
            ));
        }

        let mut wallet = self.clone();
        wallet.status = WalletStatus::Frozen;
        wallet.frozen_reason = Some(reason.into());
        Ok(wallet)
    }

    pub fn unfreeze(&self) -> Result<Self, DomainError> {
        if self.status == WalletStatus::Active {
            return Err(DomainError::BusinessRuleViolation(
                "wallet is not frozen".to_string(),
            ));
        }

        let mut wallet = self.clone();
        wallet.status = WalletStatus::Active;
        wallet.frozen_reason = None;
        Ok(wallet)
    }
}

/// What went wrong at the first bad ledger entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum LedgerProblem {
    /// `balance_before` doesn't continue from the previous entry
    BrokenChain { expected: Decimal, found: Decimal },
    /// `balance_after != balance_before ± amount`
    ArithmeticMismatch { expected: Decimal, found: Decimal },
    NegativeBalance { balance: Decimal },
    /// Sequence numbers are not 1, 2, 3, ...
    SequenceGap { expected: i64, found: i64 },
    /// Wallet balance differs from the last entry's `balance_after`
    HeadMismatch { ledger: Decimal, wallet: Decimal },
}

/// Result of replaying a wallet's ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerVerification {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub problem: Option<LedgerProblem>,
}

impl LedgerVerification {
    fn valid(entries_checked: u64) -> Self {
        Self {
            is_valid: true,
            entries_checked,
            first_invalid_entry: None,
            problem: None,
        }
    }

    fn invalid(entries_checked: u64, entry: Option<Uuid>, problem: LedgerProblem) -> Self {
        Self {
            is_valid: false,
            entries_checked,
            first_invalid_entry: entry,
            problem: Some(problem),
        }
    }
}

/// Replay `entries` (oldest first) and check every ledger invariant,
/// including that the wallet's stored balance matches the ledger head.
pub fn verify_ledger(entries: &[LedgerEntry], wallet_balance: Decimal) -> LedgerVerification {
    let mut running = Decimal::ZERO;

    for (index, entry) in entries.iter().enumerate() {
        let checked = index as u64 + 1;
        let expected_sequence = index as i64 + 1;

        if entry.sequence != expected_sequence {
            return LedgerVerification::invalid(
                checked,
                Some(entry.id),
                LedgerProblem::SequenceGap {
                    expected: expected_sequence,
                    found: entry.sequence,
                },
            );
        }

        if entry.balance_before != running {
            return LedgerVerification::invalid(
                checked,
                Some(entry.id),
                LedgerProblem::BrokenChain {
                    expected: running,
                    found: entry.balance_before,
                },
            );
        }

        if !entry.is_balanced() {
            return LedgerVerification::invalid(
                checked,
                Some(entry.id),
                LedgerProblem::ArithmeticMismatch {
                    expected: entry.balance_before + entry.signed_amount(),
                    found: entry.balance_after,
                },
            );
        }

        if entry.balance_after < Decimal::ZERO {
            return LedgerVerification::invalid(
                checked,
                Some(entry.id),
                LedgerProblem::NegativeBalance {
                    balance: entry.balance_after,
                },
            );
        }

        running = entry.balance_after;
    }

    if running != wallet_balance {
        return LedgerVerification::invalid(
            entries.len() as u64,
            entries.last().map(|e| e.id),
            LedgerProblem::HeadMismatch {
                ledger: running,
                wallet: wallet_balance,
            },
        );
    }

    LedgerVerification::valid(entries.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn funded_wallet(balance: Decimal) -> (Wallet, Vec<LedgerEntry>) {
        let wallet = Wallet::open(Uuid::new_v4(), Uuid::new_v4(), "EGP");
        let entry = wallet
            .prepare(LedgerOperation::Deposit, &amount(balance), None, "Initial deposit")
            .unwrap();
        let wallet = wallet.apply(&entry);
        (wallet, vec![entry])
    }

    #[test]
    fn test_deposit_snapshots_balances() {
        let (wallet, entries) = funded_wallet(dec!(250));

        let entry = &entries[0];
        assert_eq!(entry.balance_before, dec!(0));
        assert_eq!(entry.balance_after, dec!(250));
        assert_eq!(entry.direction, Direction::Credit);
        assert_eq!(entry.sequence, 1);
        assert_eq!(wallet.balance(), dec!(250));
        assert_eq!(wallet.version(), 1);
    }

    #[test]
    fn test_purchase_debits() {
        let (wallet, _) = funded_wallet(dec!(250));
        let entry = wallet
            .prepare(LedgerOperation::Purchase, &amount(dec!(100.50)), Some(Uuid::new_v4()), "INV-1")
            .unwrap();

        assert_eq!(entry.kind, WalletTransactionType::Purchase);
        assert_eq!(entry.balance_after, dec!(149.50));
        assert!(entry.is_balanced());
    }

    #[test]
    fn test_debit_beyond_balance_rejected() {
        let (wallet, _) = funded_wallet(dec!(50));
        let result = wallet.prepare(LedgerOperation::Withdrawal, &amount(dec!(50.01)), None, "ATM");

        assert_eq!(
            result,
            Err(DomainError::insufficient_balance(dec!(50.01), dec!(50)))
        );
    }

    #[test]
    fn test_exact_balance_debit() {
        let (wallet, _) = funded_wallet(dec!(50));
        let entry = wallet
            .prepare(LedgerOperation::Withdrawal, &amount(dec!(50)), None, "All out")
            .unwrap();
        assert_eq!(entry.balance_after, dec!(0));
    }

    #[test]
    fn test_adjustment_follows_direction() {
        let (wallet, _) = funded_wallet(dec!(10));

        let up = wallet
            .prepare(LedgerOperation::Adjustment(Direction::Credit), &amount(dec!(5)), None, "fix")
            .unwrap();
        assert_eq!(up.balance_after, dec!(15));

        let down = wallet
            .prepare(LedgerOperation::Adjustment(Direction::Debit), &amount(dec!(5)), None, "fix")
            .unwrap();
        assert_eq!(down.balance_after, dec!(5));
        assert_eq!(down.kind, WalletTransactionType::Adjustment);
    }

    #[test]
    fn test_frozen_wallet_only_accepts_owed_credits() {
        let (wallet, _) = funded_wallet(dec!(10));
        let frozen = wallet.freeze("Chargeback investigation").unwrap();

        let deposit = frozen.prepare(LedgerOperation::Deposit, &amount(dec!(1)), None, "x");
        assert!(matches!(deposit, Err(DomainError::WalletFrozen { .. })));

        let withdrawal = frozen.prepare(LedgerOperation::Withdrawal, &amount(dec!(1)), None, "x");
        assert!(matches!(withdrawal, Err(DomainError::WalletFrozen { .. })));

        let refund = frozen.prepare(LedgerOperation::Refund, &amount(dec!(1)), None, "x");
        assert!(refund.is_ok());

        let top_up = frozen
            .prepare(
                LedgerOperation::SettledTopUp,
                &amount(dec!(25)),
                Some(Uuid::new_v4()),
                "Card top-up",
            )
            .unwrap();
        assert_eq!(top_up.kind, WalletTransactionType::Deposit);
        assert_eq!(top_up.direction, Direction::Credit);
        assert_eq!(top_up.balance_after, dec!(35));

        let active = frozen.unfreeze().unwrap();
        assert_eq!(active.status(), WalletStatus::Active);
        assert!(active.unfreeze().is_err());
    }

    #[test]
    fn test_verify_ledger_accepts_consistent_history() {
        let (mut wallet, mut entries) = funded_wallet(dec!(100));
        for op in [LedgerOperation::Purchase, LedgerOperation::Refund, LedgerOperation::Withdrawal] {
            let entry = wallet.prepare(op, &amount(dec!(20)), None, "op").unwrap();
            wallet = wallet.apply(&entry);
            entries.push(entry);
        }

        let result = verify_ledger(&entries, wallet.balance());
        assert!(result.is_valid);
        assert_eq!(result.entries_checked, 4);
        assert_eq!(wallet.balance(), dec!(80));
    }

    #[test]
    fn test_verify_ledger_detects_broken_chain() {
        let (wallet, mut entries) = funded_wallet(dec!(100));
        let mut second = wallet
            .prepare(LedgerOperation::Withdrawal, &amount(dec!(10)), None, "op")
            .unwrap();
        second.balance_before = dec!(90);
        second.balance_after = dec!(80);
        entries.push(second.clone());

        let result = verify_ledger(&entries, dec!(80));
        assert!(!result.is_valid);
        assert_eq!(result.first_invalid_entry, Some(second.id));
        assert_eq!(
            result.problem,
            Some(LedgerProblem::BrokenChain {
                expected: dec!(100),
                found: dec!(90)
            })
        );
    }

    #[test]
    fn test_verify_ledger_detects_arithmetic_and_head_mismatch() {
        let (_, mut entries) = funded_wallet(dec!(100));
        entries[0].balance_after = dec!(101);
        let result = verify_ledger(&entries, dec!(101));
        assert!(matches!(
            result.problem,
            Some(LedgerProblem::ArithmeticMismatch { .. })
        ));

        let (_, entries) = funded_wallet(dec!(100));
        let result = verify_ledger(&entries, dec!(99));
        assert_eq!(
            result.problem,
            Some(LedgerProblem::HeadMismatch {
                ledger: dec!(100),
                wallet: dec!(99)
            })
        );
    }

    #[test]
    fn test_empty_ledger_requires_zero_balance() {
        assert!(verify_ledger(&[], dec!(0)).is_valid);
        assert!(!verify_ledger(&[], dec!(1)).is_valid);
    }
}
