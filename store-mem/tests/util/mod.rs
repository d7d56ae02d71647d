//! Shared fixtures for the end-to-end store tests.

#![allow(dead_code)]

use std::sync::Arc;

use allocation::AllocationService;
use chain::{
    custodian::mock::MockCustodian, ChainConfig, ChainEngine, ChainName,
    ManagedWallet, TokenSymbol,
};
use common::{
    amount::Amount,
    ids::{UserId, WalletId},
    time::TimestampMs,
};
use ledger::{AccountType, LedgerService};
use rust_decimal::Decimal;
use store_mem::MemStore;
use treasury::{
    adapters::MockAdapter, BufferThreshold, ConversionProvider,
    ProviderStatus, ProviderType, TreasuryConfig, TreasuryEngine,
    TreasuryStore,
};

pub fn amt(value: &str) -> Amount {
    Amount::try_from_decimal(value.parse::<Decimal>().unwrap()).unwrap()
}

/// The full set of services wired over one shared [`MemStore`].
pub struct Harness {
    pub store: Arc<MemStore>,
    pub ledger: LedgerService<MemStore>,
    pub allocation: AllocationService<MemStore, MemStore>,
    pub chain: ChainEngine<MemStore, MemStore, MemStore, MockCustodian>,
    pub custodian: Arc<MockCustodian>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_chain_config(ChainConfig::default()).await
    }

    pub async fn with_chain_config(config: ChainConfig) -> Self {
        let store = Arc::new(MemStore::new());
        let ledger = LedgerService::new(store.clone());
        ledger.ensure_system_accounts().await.unwrap();

        let allocation =
            AllocationService::new(ledger.clone(), store.clone());
        let custodian = Arc::new(MockCustodian::new());
        let chain = ChainEngine::new(
            ledger.clone(),
            allocation.clone(),
            store.clone(),
            custodian.clone(),
            Arc::new(common::push::LogNotifier),
            config,
        );

        Self {
            store,
            ledger,
            allocation,
            chain,
            custodian,
        }
    }

    /// Sets a system account's balance directly (operator funding stand-in).
    pub async fn seed_system_balance(
        &self,
        account_type: AccountType,
        balance: Amount,
    ) {
        let account =
            self.ledger.get_system_account(account_type).await.unwrap();
        self.store.seed_account_balance(account.id, balance);
    }

    pub async fn system_balance(&self, account_type: AccountType) -> Amount {
        self.ledger
            .get_system_account(account_type)
            .await
            .unwrap()
            .balance
    }

    pub async fn user_balance(
        &self,
        user_id: UserId,
        account_type: AccountType,
    ) -> Amount {
        self.ledger
            .get_or_create_user_account(user_id, account_type)
            .await
            .unwrap()
            .balance
    }

    /// Registers a managed wallet for the user on the given chain.
    pub async fn add_wallet(
        &self,
        user_id: UserId,
        chain: &str,
        custodian_wallet_id: &str,
        address: &str,
    ) -> ManagedWallet {
        use chain::ChainStore;
        let wallet = ManagedWallet {
            id: WalletId::generate(),
            user_id,
            chain: ChainName::new(chain),
            custodian_wallet_id: custodian_wallet_id.to_owned(),
            address: address.to_owned(),
            created_at: TimestampMs::now(),
        };
        self.store.insert_wallet(wallet.clone()).await.unwrap();
        wallet
    }

    /// A treasury engine wired to a [`MockAdapter`], with the store's
    /// providers/thresholds as configured by the test.
    pub fn treasury(
        &self,
        adapter: Arc<MockAdapter>,
        config: TreasuryConfig,
    ) -> TreasuryEngine<MemStore, MemStore> {
        let mut adapters: std::collections::HashMap<
            ProviderType,
            Arc<dyn treasury::ProviderAdapter>,
        > = std::collections::HashMap::new();
        adapters.insert(ProviderType::Mock, adapter);
        TreasuryEngine::new(
            self.ledger.clone(),
            self.store.clone(),
            adapters,
            config,
        )
    }

    pub async fn add_provider(
        &self,
        name: &str,
        priority: u32,
        daily_limit: Amount,
    ) -> ConversionProvider {
        let now = TimestampMs::now();
        let provider = ConversionProvider {
            id: common::ids::ProviderId::generate(),
            name: name.to_owned(),
            provider_type: ProviderType::Mock,
            priority,
            status: ProviderStatus::Active,
            supports_usdc_to_usd: true,
            supports_usd_to_usdc: true,
            min_conversion_amount: Amount::from_u64(1),
            max_conversion_amount: Amount::from_u64(1_000_000),
            daily_volume_limit: daily_limit,
            daily_volume_used: Amount::ZERO,
            volume_day: now.utc_date(),
            success_count: 0,
            failure_count: 0,
            last_success_at: None,
            last_failure_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_provider(provider.clone()).await.unwrap();
        provider
    }

    pub async fn add_threshold(
        &self,
        account_type: AccountType,
        min: u64,
        target: u64,
        max: u64,
    ) {
        let threshold = BufferThreshold::new(
            account_type,
            Amount::from_u64(min),
            Amount::from_u64(target),
            Amount::from_u64(max),
            Amount::ZERO,
            TimestampMs::now(),
        )
        .unwrap();
        self.store.upsert_threshold(threshold).await.unwrap();
    }
}

pub fn usdc() -> TokenSymbol {
    TokenSymbol::usdc()
}
