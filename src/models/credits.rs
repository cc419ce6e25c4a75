use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::credit_transactions::TransactionKind;
use crate::entities::user_credits;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: i32,
    pub total_earned: i32,
    pub total_spent: i32,
}

impl From<user_credits::Model> for BalanceResponse {
    fn from(model: user_credits::Model) -> Self {
        Self {
            user_id: model.user_id,
            balance: model.balance,
            total_earned: model.total_earned,
            total_spent: model.total_spent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantCreditsRequest {
    pub user_id: Uuid,
    pub amount: i32,
    pub description: String,
    pub kind: Option<TransactionKind>,
}
