use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::{AppResult, LedgerError};
use crate::ledger::models::{Balance, OrderNumber, UserId, Withdrawal};
use crate::ledger::LedgerStore;

/// Balance queries and withdrawal authorization
pub struct BalanceService {
    store: Arc<dyn LedgerStore>,
}

impl BalanceService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn balance(&self, user: UserId) -> AppResult<Balance> {
        self.store.balance(user).await
    }

    /// Debit `sum` against the order label `order`. The balance check and
    /// the insert happen atomically inside the store.
    pub async fn withdraw(&self, user: UserId, order: &str, sum: Decimal) -> AppResult<Withdrawal> {
        let order = OrderNumber::parse(order)?;
        if sum <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(sum.to_string()).into());
        }
        self.store.withdraw(user, order, sum).await
    }

    pub async fn withdrawals(&self, user: UserId) -> AppResult<Vec<Withdrawal>> {
        self.store.withdrawals_for(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::models::AccrualUpdate;
    use rust_decimal_macros::dec;

    const USER: UserId = UserId(7);

    async fn funded(amount: Decimal) -> (BalanceService, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let number = OrderNumber::parse("79927398713").unwrap();
        ledger.insert_order(USER, number).await.unwrap();
        ledger.apply_accrual(number, AccrualUpdate::processed(amount)).await.unwrap();
        let store: Arc<dyn LedgerStore> = ledger.clone();
        (BalanceService::new(store), ledger)
    }

    #[tokio::test]
    async fn test_withdraw_down_to_zero_then_insufficient() {
        let (service, _) = funded(dec!(500)).await;
        assert_eq!(service.balance(USER).await.unwrap().current, dec!(500));

        let withdrawal = service.withdraw(USER, "79927398713", dec!(500)).await.unwrap();
        assert_eq!(withdrawal.sum, dec!(500));

        let balance = service.balance(USER).await.unwrap();
        assert_eq!(balance.current, dec!(0));
        assert_eq!(balance.withdrawn, dec!(500));

        let err = service.withdraw(USER, "79927398713", dec!(1)).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::InsufficientFunds { .. })));
        assert_eq!(service.withdrawals(USER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_validates_before_store() {
        let (service, ledger) = funded(dec!(100)).await;
        let writes = ledger.writes();

        let err = service.withdraw(USER, "1234567812345678", dec!(10)).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::InvalidOrderNumber(_))));

        for sum in [dec!(0), dec!(-5)] {
            let err = service.withdraw(USER, "2377225624", sum).await.unwrap_err();
            assert!(matches!(err, AppError::Ledger(LedgerError::InvalidAmount(_))));
        }
        assert_eq!(ledger.writes(), writes);
    }

    #[tokio::test]
    async fn test_unprocessed_orders_do_not_count() {
        let ledger = Arc::new(MemoryLedger::new());
        let number = OrderNumber::parse("79927398713").unwrap();
        ledger.insert_order(USER, number).await.unwrap();
        ledger.apply_accrual(number, AccrualUpdate::processing()).await.unwrap();
        let service = BalanceService::new(ledger.clone());

        assert_eq!(service.balance(USER).await.unwrap(), Balance::default());
        assert!(service.withdraw(USER, "79927398713", dec!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let (service, _) = funded(dec!(100)).await;
        let service = Arc::new(service);

        let attempts = (0..10).map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.withdraw(USER, "79927398713", dec!(30)).await })
        });
        let committed = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(committed, 3);
        let balance = service.balance(USER).await.unwrap();
        assert_eq!(balance.current, dec!(10));
        assert_eq!(balance.withdrawn, dec!(90));
    }
}
