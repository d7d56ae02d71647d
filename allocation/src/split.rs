use common::amount::Amount;
use rust_decimal::Decimal;

/// Splits a deposit between spending and stash by the spending ratio.
///
/// `spending = round_down(total * ratio_spending)` at two decimal places;
/// the remainder goes to stash by convention, so the two legs always sum to
/// exactly `total` and no dust is ever created.
pub fn split_deposit(
    total: Amount,
    ratio_spending: Decimal,
) -> (Amount, Amount) {
    let spending = (total * ratio_spending).round_down_dp(2);
    let stash = total - spending;
    (spending, stash)
}

#[cfg(test)]
mod test {
    use proptest::{prop_assert, prop_assert_eq, proptest};
    use rust_decimal_macros::dec;

    use super::*;

    fn amt(d: Decimal) -> Amount {
        Amount::try_from_decimal(d).unwrap()
    }

    #[test]
    fn seventy_thirty() {
        let (spending, stash) = split_deposit(amt(dec!(100.00)), dec!(0.30));
        assert_eq!(spending, amt(dec!(30.00)));
        assert_eq!(stash, amt(dec!(70.00)));
    }

    #[test]
    fn remainder_goes_to_stash() {
        // 33.335 truncates to 33.33; the 0.005 lands in stash.
        let (spending, stash) = split_deposit(amt(dec!(100.01)), dec!(0.3333));
        assert_eq!(spending, amt(dec!(33.33)));
        assert_eq!(stash, amt(dec!(66.68)));
    }

    #[test]
    fn extreme_ratios() {
        let total = amt(dec!(50.00));
        let (spending, stash) = split_deposit(total, dec!(0));
        assert_eq!(spending, Amount::ZERO);
        assert_eq!(stash, total);

        let (spending, stash) = split_deposit(total, dec!(1));
        assert_eq!(spending, total);
        assert_eq!(stash, Amount::ZERO);
    }

    #[test]
    fn legs_always_sum_to_total() {
        proptest!(|(cents in 0u64..10_000_000, bps in 0u32..=10_000)| {
            let total = amt(Decimal::new(cents as i64, 2));
            let ratio = Decimal::new(bps as i64, 4);
            let (spending, stash) = split_deposit(total, ratio);
            prop_assert_eq!(spending + stash, total);
            prop_assert!(spending <= total);
        });
    }
}
