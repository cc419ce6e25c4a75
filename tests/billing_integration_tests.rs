mod common;

use hmac::{Hmac, Mac};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use sha2::Sha256;
use uuid::Uuid;

use agentstudio_backend::entities::credit_transactions::{self, TransactionKind};
use agentstudio_backend::entities::prelude::*;
use agentstudio_backend::errors::ServiceError;
use agentstudio_backend::services::billing::BillingService;
use agentstudio_backend::services::credits::{CreditsService, WELCOME_GRANT};
use agentstudio_backend::services::stripe::StripeClient;

use crate::common::{create_test_user, setup_test_db};

const WEBHOOK_SECRET: &str = "whsec_integration_test";

fn billing_service(db: &DatabaseConnection) -> BillingService {
    BillingService::new(
        db.clone(),
        CreditsService::new(db.clone()),
        StripeClient::new("sk_test_key".to_string(), WEBHOOK_SECRET.to_string()),
        "http://localhost:3000".to_string(),
    )
}

fn sign_payload(payload: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

/// Seed a settled purchase entry carrying a payment-intent id, the shape the
/// refund path looks up.
async fn seed_settled_purchase(
    db: &DatabaseConnection,
    credits: &CreditsService,
    user_id: Uuid,
    amount: i32,
    payment_intent: &str,
) {
    let balance = credits
        .add_credits(user_id, amount, "Purchased credits", TransactionKind::Purchase)
        .await
        .unwrap();

    let entry = CreditTransactions::find()
        .filter(credit_transactions::Column::UserId.eq(user_id))
        .filter(credit_transactions::Column::Kind.eq(TransactionKind::Purchase))
        .one(db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.balance_after, balance.balance);

    let mut active: credit_transactions::ActiveModel = entry.into();
    active.stripe_payment_intent_id = Set(Some(payment_intent.to_string()));
    active.update(db).await.unwrap();
}

/// A refund webhook revokes the purchased amount and restores the
/// pre-purchase balance; the duplicate refund event Stripe sends is a no-op.
#[tokio::test]
async fn refund_webhook_restores_balance_exactly_once() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let credits = CreditsService::new(db.clone());
    let billing = billing_service(&db);

    let user_id = create_test_user(&db).await;
    credits.ensure_user_credits(user_id).await.unwrap();

    let payment_intent = format!("pi_{}", Uuid::new_v4().simple());
    seed_settled_purchase(&db, &credits, user_id, 40, &payment_intent).await;

    let payload = serde_json::json!({
        "id": "evt_refund_1",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_1", "payment_intent": payment_intent } }
    })
    .to_string();

    billing
        .handle_webhook(payload.as_bytes(), &sign_payload(payload.as_bytes()))
        .await
        .unwrap();

    let balance = credits.get_user_credits(user_id).await.unwrap();
    assert_eq!(balance.balance, WELCOME_GRANT);

    // The follow-up charge.refund.updated event must not revoke again.
    let update_payload = serde_json::json!({
        "id": "evt_refund_2",
        "type": "charge.refund.updated",
        "data": { "object": { "id": "re_1", "payment_intent": payment_intent } }
    })
    .to_string();

    billing
        .handle_webhook(
            update_payload.as_bytes(),
            &sign_payload(update_payload.as_bytes()),
        )
        .await
        .unwrap();

    let balance = credits.get_user_credits(user_id).await.unwrap();
    assert_eq!(balance.balance, WELCOME_GRANT);

    let refund_entries = CreditTransactions::find()
        .filter(credit_transactions::Column::UserId.eq(user_id))
        .filter(credit_transactions::Column::Kind.eq(TransactionKind::Refund))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(refund_entries.len(), 1);
    assert_eq!(refund_entries[0].amount, -40);
    assert_eq!(
        refund_entries[0].stripe_payment_intent_id.as_deref(),
        Some(payment_intent.as_str())
    );
}

/// A refund for an unknown payment intent is acknowledged without touching
/// any balance.
#[tokio::test]
async fn refund_for_unknown_payment_intent_is_ignored() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let billing = billing_service(&db);

    let payload = serde_json::json!({
        "id": "evt_refund_3",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_2", "payment_intent": format!("pi_{}", Uuid::new_v4().simple()) } }
    })
    .to_string();

    billing
        .handle_webhook(payload.as_bytes(), &sign_payload(payload.as_bytes()))
        .await
        .unwrap();
}

/// A tampered payload is rejected closed before any state change.
#[tokio::test]
async fn unverified_webhook_is_rejected() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let billing = billing_service(&db);

    let payload = br#"{"id":"evt_bad","type":"charge.refunded","data":{"object":{}}}"#;
    let err = billing
        .handle_webhook(payload, "t=0,v1=deadbeef")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SignatureInvalid(_)));
}

/// Subscription lifecycle: created upserts an active row, deleted flips it to
/// canceled without removing it.
#[tokio::test]
async fn subscription_events_upsert_and_cancel() {
    use agentstudio_backend::entities::subscriptions::{self, SubscriptionStatus};
    use agentstudio_backend::entities::users;

    let Some(db) = setup_test_db().await else {
        return;
    };
    let billing = billing_service(&db);

    let user_id = create_test_user(&db).await;
    let customer_id = format!("cus_{}", Uuid::new_v4().simple());
    let user = Users::find_by_id(user_id).one(&db).await.unwrap().unwrap();
    let mut active: users::ActiveModel = user.into();
    active.stripe_customer_id = Set(Some(customer_id.clone()));
    active.update(&db).await.unwrap();

    let subscription_id = format!("sub_{}", Uuid::new_v4().simple());
    let created = serde_json::json!({
        "id": "evt_sub_1",
        "type": "customer.subscription.created",
        "data": { "object": {
            "id": subscription_id,
            "status": "active",
            "customer": customer_id,
            "current_period_start": 1_700_000_000,
            "current_period_end": 1_702_592_000,
            "items": { "data": [ { "price": { "id": "price_1", "product": "prod_1" } } ] }
        }}
    })
    .to_string();

    billing
        .handle_webhook(created.as_bytes(), &sign_payload(created.as_bytes()))
        .await
        .unwrap();

    let row = Subscriptions::find()
        .filter(subscriptions::Column::StripeSubscriptionId.eq(&subscription_id))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, SubscriptionStatus::Active);
    assert_eq!(row.user_id, user_id);
    assert_eq!(row.stripe_price_id.as_deref(), Some("price_1"));

    let deleted = serde_json::json!({
        "id": "evt_sub_2",
        "type": "customer.subscription.deleted",
        "data": { "object": {
            "id": subscription_id,
            "status": "canceled",
            "customer": customer_id,
            "current_period_start": null,
            "current_period_end": null,
            "items": { "data": [] }
        }}
    })
    .to_string();

    billing
        .handle_webhook(deleted.as_bytes(), &sign_payload(deleted.as_bytes()))
        .await
        .unwrap();

    let row = Subscriptions::find()
        .filter(subscriptions::Column::StripeSubscriptionId.eq(&subscription_id))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, SubscriptionStatus::Canceled);
}
