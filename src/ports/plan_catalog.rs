//! Read-only access to subscription plans.

use async_trait::async_trait;

use crate::domain::billing::{BillingCycle, Money};
use crate::domain::foundation::{DomainError, PlanId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub billing_cycle: BillingCycle,
    pub price: Money,
    /// Price id configured on the gateway for this plan.
    pub gateway_price_id: Option<String>,
}

#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn find_plan(&self, id: PlanId) -> Result<Option<Plan>, DomainError>;

    async fn find_plan_by_gateway_price(&self, price_id: &str) -> Result<Option<Plan>, DomainError>;
}
