use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Discount, Money};

/// Payment-gateway lookup. The engine never talks to the gateway itself;
/// it only asks whether a booking has a completed payment.
#[async_trait]
pub trait PaymentLookup: Send + Sync {
    async fn has_completed_payment(&self, booking_id: Ulid) -> bool;
}

/// Promotion-code resolver. Unknown codes resolve to `None`; the pricing
/// engine treats that as "no discount", never as an error.
#[async_trait]
pub trait PromoResolver: Send + Sync {
    async fn resolve(&self, code: &str) -> Option<Discount>;
}

/// In-memory payment ledger. Production deployments implement
/// `PaymentLookup` against the gateway's records; this one backs tests
/// and embedded setups.
#[derive(Default)]
pub struct LedgerPayments {
    paid: DashMap<Ulid, Money>,
}

impl LedgerPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_payment(&self, booking_id: Ulid, amount: Money) {
        self.paid.insert(booking_id, amount);
    }

    pub fn paid_amount(&self, booking_id: Ulid) -> Option<Money> {
        self.paid.get(&booking_id).map(|e| *e.value())
    }
}

#[async_trait]
impl PaymentLookup for LedgerPayments {
    async fn has_completed_payment(&self, booking_id: Ulid) -> bool {
        self.paid.contains_key(&booking_id)
    }
}

/// Fixed promotion table.
#[derive(Default)]
pub struct StaticPromos {
    codes: DashMap<String, Discount>,
}

impl StaticPromos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, code: impl Into<String>, discount: Discount) {
        self.codes.insert(code.into(), discount);
    }
}

#[async_trait]
impl PromoResolver for StaticPromos {
    async fn resolve(&self, code: &str) -> Option<Discount> {
        self.codes.get(code).map(|e| e.value().clone())
    }
}
