//! Canonical entry pairs.
//!
//! Every money movement in the system posts one of the pairs below. Each
//! constructor produces exactly two entries; the debit side increases its
//! account, the credit side decreases its account. Callers resolve the
//! account ids first (user accounts lazily, system accounts by lookup) and
//! the [`LedgerService`] validates the result like any other transaction.
//!
//! | Operation | Debit (increases) | Credit (decreases) |
//! |---|---|---|
//! | Deposit | user `usdc_balance` | `system_buffer_usdc` |
//! | Withdrawal | `system_buffer_usdc` | user `usdc_balance` |
//! | USDC→USD conversion | `system_buffer_fiat` (USD) | `system_buffer_usdc` (USDC) |
//! | USD→USDC conversion | `system_buffer_usdc` (USDC) | `system_buffer_fiat` (USD) |
//! | Broker funding | `broker_operational` | `system_buffer_fiat` |
//! | Reserve for investment | `pending_investment` | user `usdc_balance` |
//! | Release reservation | user `usdc_balance` | `pending_investment` |
//! | Card spend | `system_buffer_fiat` | user `spending_balance` |
//!
//! [`LedgerService`]: crate::service::LedgerService

use common::{amount::Amount, currency::Currency, ids::AccountId};

use crate::entry::NewEntry;

/// User deposits `amount` USDC: user balance up, stablecoin buffer down.
pub fn deposit(
    user_usdc: AccountId,
    system_buffer_usdc: AccountId,
    amount: Amount,
) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(user_usdc, amount, Currency::Usdc)
            .describe("deposit: credit user balance"),
        NewEntry::credit(system_buffer_usdc, amount, Currency::Usdc)
            .describe("deposit: draw from USDC buffer"),
    ]
}

/// User withdraws `amount` USDC: stablecoin buffer up, user balance down.
pub fn withdrawal(
    system_buffer_usdc: AccountId,
    user_usdc: AccountId,
    amount: Amount,
) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(system_buffer_usdc, amount, Currency::Usdc)
            .describe("withdrawal: return to USDC buffer"),
        NewEntry::credit(user_usdc, amount, Currency::Usdc)
            .describe("withdrawal: debit user balance"),
    ]
}

/// A completed USDC→USD conversion. The amounts may diverge if the provider
/// reported a non-1:1 fill; each leg is posted in its own currency.
pub fn conversion_usdc_to_usd(
    system_buffer_fiat: AccountId,
    system_buffer_usdc: AccountId,
    usd_amount: Amount,
    usdc_amount: Amount,
) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(system_buffer_fiat, usd_amount, Currency::Usd)
            .describe("conversion: USD received"),
        NewEntry::credit(system_buffer_usdc, usdc_amount, Currency::Usdc)
            .describe("conversion: USDC sent"),
    ]
}

/// A completed USD→USDC conversion.
pub fn conversion_usd_to_usdc(
    system_buffer_usdc: AccountId,
    system_buffer_fiat: AccountId,
    usdc_amount: Amount,
    usd_amount: Amount,
) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(system_buffer_usdc, usdc_amount, Currency::Usdc)
            .describe("conversion: USDC received"),
        NewEntry::credit(system_buffer_fiat, usd_amount, Currency::Usd)
            .describe("conversion: USD sent"),
    ]
}

/// Moves settled fiat from the buffer into the brokerage's operational
/// account.
pub fn broker_funding(
    broker_operational: AccountId,
    system_buffer_fiat: AccountId,
    amount: Amount,
) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(broker_operational, amount, Currency::Usd)
            .describe("broker funding: credit operational account"),
        NewEntry::credit(system_buffer_fiat, amount, Currency::Usd)
            .describe("broker funding: draw from fiat buffer"),
    ]
}

/// Reserves `amount` of a user's USDC for a pending investment.
pub fn reserve_for_investment(
    pending_investment: AccountId,
    user_usdc: AccountId,
    amount: Amount,
) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(pending_investment, amount, Currency::Usdc)
            .describe("reserve: move into pending investment"),
        NewEntry::credit(user_usdc, amount, Currency::Usdc)
            .describe("reserve: debit user balance"),
    ]
}

/// Returns a reservation to the user's spendable balance.
pub fn release_reservation(
    user_usdc: AccountId,
    pending_investment: AccountId,
    amount: Amount,
) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(user_usdc, amount, Currency::Usdc)
            .describe("release: return to user balance"),
        NewEntry::credit(pending_investment, amount, Currency::Usdc)
            .describe("release: draw from pending investment"),
    ]
}

/// A card payment settled against the user's spending balance.
pub fn card_spend(
    system_buffer_fiat: AccountId,
    user_spending: AccountId,
    amount: Amount,
) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(system_buffer_fiat, amount, Currency::Usd)
            .describe("card spend: settle from fiat buffer"),
        NewEntry::credit(user_spending, amount, Currency::Usd)
            .describe("card spend: debit spending balance"),
    ]
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use crate::entry::EntryType;

    use super::*;

    fn amt(d: rust_decimal::Decimal) -> Amount {
        Amount::try_from_decimal(d).unwrap()
    }

    #[test]
    fn single_currency_pairs_balance() {
        let a = AccountId::generate();
        let b = AccountId::generate();
        let amount = amt(dec!(50.00));

        for entries in [
            deposit(a, b, amount),
            withdrawal(a, b, amount),
            broker_funding(a, b, amount),
            reserve_for_investment(a, b, amount),
            release_reservation(a, b, amount),
            card_spend(a, b, amount),
        ] {
            assert_eq!(entries.len(), 2);
            let debits: Amount = entries
                .iter()
                .filter(|e| e.entry_type == EntryType::Debit)
                .map(|e| e.amount)
                .sum();
            let credits: Amount = entries
                .iter()
                .filter(|e| e.entry_type == EntryType::Credit)
                .map(|e| e.amount)
                .sum();
            assert_eq!(debits, credits);
            assert_eq!(entries[0].currency, entries[1].currency);
        }
    }

    #[test]
    fn conversion_legs_carry_their_own_currency() {
        let fiat = AccountId::generate();
        let usdc = AccountId::generate();

        let entries =
            conversion_usdc_to_usd(fiat, usdc, amt(dec!(5990)), amt(dec!(6000)));
        assert_eq!(entries[0].entry_type, EntryType::Debit);
        assert_eq!(entries[0].currency, Currency::Usd);
        assert_eq!(entries[0].amount, amt(dec!(5990)));
        assert_eq!(entries[1].entry_type, EntryType::Credit);
        assert_eq!(entries[1].currency, Currency::Usdc);
        assert_eq!(entries[1].amount, amt(dec!(6000)));

        let entries =
            conversion_usd_to_usdc(usdc, fiat, amt(dec!(6000)), amt(dec!(6000)));
        assert_eq!(entries[0].currency, Currency::Usdc);
        assert_eq!(entries[1].currency, Currency::Usd);
    }
}
