//! Billing reconciler
//!
//! Consumes verified Stripe webhook events and maps them onto ledger
//! operations: one-time credit purchases credit the balance and finalize the
//! provisional transaction written at checkout-session creation, refunds
//! revoke the purchased amount, and subscription lifecycle events upsert the
//! local subscription mirror. Webhook payloads pass through the redaction
//! policy before they reach the log stream.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use moka::future::Cache;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::entities::credit_transactions::{self, TransactionKind};
use crate::entities::prelude::*;
use crate::entities::subscriptions::{self, SubscriptionStatus};
use crate::entities::users;
use crate::errors::{Result, ServiceError};
use crate::services::credits::{apply_balance_change, lock_balance, CreditsService};
use crate::services::redact::RedactionPolicy;
use crate::services::stripe::{
    CheckoutSessionParams, StripeCharge, StripeCheckoutSession, StripeClient, StripeEvent,
    StripeInvoice, StripeProduct, StripeSubscription,
};

// Product catalog: Stripe product id -> credits granted on purchase.
const PRODUCT_CREDITS: &[(&str, i32)] = &[
    ("prod_T0Q0egYs4uRQIF", 100),
    ("prod_T0Q4ubm8cwuJFW", 260),
    ("prod_T0Q5vfk643vdUe", 525),
    ("prod_T0Q5DPrrdQ9RV7", 1075),
];

const PRODUCT_CACHE_CAPACITY: u64 = 100;
const PRODUCT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Credits granted for a known product id.
pub fn credits_for_product(product_id: &str) -> Option<i32> {
    PRODUCT_CREDITS
        .iter()
        .find(|(id, _)| *id == product_id)
        .map(|(_, credits)| *credits)
}

#[derive(Clone)]
pub struct BillingService {
    db: DatabaseConnection,
    credits: CreditsService,
    stripe: StripeClient,
    redaction: RedactionPolicy,
    product_cache: Cache<String, StripeProduct>,
    app_base_url: String,
}

impl BillingService {
    pub fn new(
        db: DatabaseConnection,
        credits: CreditsService,
        stripe: StripeClient,
        app_base_url: String,
    ) -> Self {
        Self {
            db,
            credits,
            stripe,
            redaction: RedactionPolicy::default(),
            product_cache: Cache::builder()
                .max_capacity(PRODUCT_CACHE_CAPACITY)
                .time_to_live(PRODUCT_CACHE_TTL)
                .build(),
            app_base_url,
        }
    }

    /// Create a one-time payment checkout session for a credit pack and write
    /// the provisional (amount 0) transaction that the completion webhook
    /// later finalizes.
    pub async fn create_credits_checkout(
        &self,
        user_id: Uuid,
        product_id: &str,
    ) -> Result<String> {
        let credits = credits_for_product(product_id).ok_or_else(|| {
            ServiceError::InvalidRequest(format!("Unknown credit product: {}", product_id))
        })?;

        let customer_id = self.ensure_stripe_customer(user_id).await?;

        let product = self.cached_product(product_id).await?;
        let price_id = product.default_price.clone().ok_or_else(|| {
            ServiceError::InvalidRequest(format!("Product {} has no default price", product_id))
        })?;

        let session = self
            .stripe
            .create_checkout_session(CheckoutSessionParams {
                mode: "payment",
                customer: customer_id,
                price: price_id.clone(),
                success_url: format!(
                    "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
                    self.app_base_url
                ),
                cancel_url: format!("{}/billing/cancel", self.app_base_url),
                metadata: vec![
                    ("userId".to_string(), user_id.to_string()),
                    ("productId".to_string(), product_id.to_string()),
                ],
            })
            .await?;

        let balance = self.credits.ensure_user_credits(user_id).await?;

        // Provisional entry: zero amount until the payment completes.
        credit_transactions::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            kind: Set(TransactionKind::Purchase),
            amount: Set(0),
            balance_after: Set(balance.balance),
            description: Set(Some(format!("Credit purchase pending ({} credits)", credits))),
            stripe_session_id: Set(Some(session.id.clone())),
            stripe_product_id: Set(Some(product_id.to_string())),
            stripe_price_id: Set(Some(price_id)),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            user_id = %user_id,
            product_id,
            session_id = %session.id,
            "Created credits checkout session"
        );

        session
            .url
            .ok_or_else(|| ServiceError::InvalidRequest("Checkout session has no URL".to_string()))
    }

    /// Create a subscription-mode checkout session.
    pub async fn create_subscription_checkout(
        &self,
        user_id: Uuid,
        price_id: &str,
    ) -> Result<String> {
        let customer_id = self.ensure_stripe_customer(user_id).await?;

        let session = self
            .stripe
            .create_checkout_session(CheckoutSessionParams {
                mode: "subscription",
                customer: customer_id,
                price: price_id.to_string(),
                success_url: format!(
                    "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
                    self.app_base_url
                ),
                cancel_url: format!("{}/billing/cancel", self.app_base_url),
                metadata: vec![("userId".to_string(), user_id.to_string())],
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            price_id,
            session_id = %session.id,
            "Created subscription checkout session"
        );

        session
            .url
            .ok_or_else(|| ServiceError::InvalidRequest("Checkout session has no URL".to_string()))
    }

    /// Verify the raw webhook payload and dispatch the event. Unrecognized
    /// event types are acknowledged without any state change.
    pub async fn handle_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        let event = self.stripe.verify_and_parse(payload, signature_header)?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Stripe webhook received"
        );
        tracing::debug!(
            object = %self.redaction.redact(&event.data.object),
            "Webhook payload"
        );

        match event.event_type.as_str() {
            "customer.subscription.created" | "customer.subscription.updated" => {
                let subscription: StripeSubscription = parse_object(&event, "subscription")?;
                self.upsert_subscription(subscription).await
            }
            "customer.subscription.deleted" => {
                let subscription: StripeSubscription = parse_object(&event, "subscription")?;
                self.cancel_subscription(&subscription.id).await
            }
            "invoice.payment_succeeded" => {
                let invoice: StripeInvoice = parse_object(&event, "invoice")?;
                if let Some(subscription_id) = invoice.subscription {
                    let subscription =
                        self.stripe.retrieve_subscription(&subscription_id).await?;
                    self.upsert_subscription(subscription).await
                } else {
                    Ok(())
                }
            }
            "checkout.session.completed" => {
                let session: StripeCheckoutSession = parse_object(&event, "checkout session")?;
                if session.mode == "payment" {
                    self.settle_credit_purchase(session).await
                } else {
                    // Subscription checkouts reconcile through the
                    // customer.subscription.* events.
                    Ok(())
                }
            }
            // refund.updated carries a Refund object, but the fields we need
            // (id, payment_intent) line up with the charge shape.
            "charge.refunded" | "charge.refund.updated" => {
                let charge: StripeCharge = parse_object(&event, "charge")?;
                self.reconcile_refund(charge).await
            }
            other => {
                tracing::debug!(event_type = other, "Ignoring unhandled webhook event");
                Ok(())
            }
        }
    }

    /// Finalize a completed one-time purchase: resolve the purchased product
    /// through the session's line items, credit the balance, and rewrite the
    /// provisional transaction with the final amount and correlation ids.
    async fn settle_credit_purchase(&self, session: StripeCheckoutSession) -> Result<()> {
        let line_items = self.stripe.list_checkout_line_items(&session.id).await?;
        let price = line_items
            .data
            .first()
            .and_then(|item| item.price.clone())
            .ok_or_else(|| {
                ServiceError::InvalidRequest(format!(
                    "Checkout session {} has no line items",
                    session.id
                ))
            })?;
        let product_id = price.product.clone().ok_or_else(|| {
            ServiceError::InvalidRequest(format!("Price {} has no product", price.id))
        })?;

        let credits = credits_for_product(&product_id).ok_or_else(|| {
            ServiceError::InvalidRequest(format!("Unknown credit product: {}", product_id))
        })?;

        let provisional = CreditTransactions::find()
            .filter(credit_transactions::Column::StripeSessionId.eq(&session.id))
            .filter(credit_transactions::Column::Kind.eq(TransactionKind::Purchase))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Provisional transaction for {}", session.id))
            })?;

        let user_id = provisional.user_id;

        // Balance update and provisional finalization commit together under
        // the same row lock the ledger uses, so balance_after stays replayable.
        let txn = self.db.begin().await?;

        let balance = lock_balance(&txn, user_id).await?;
        let updated = apply_balance_change(&txn, balance, credits, credits, 0).await?;

        let mut entry: credit_transactions::ActiveModel = provisional.into();
        entry.amount = Set(credits);
        entry.balance_after = Set(updated.balance);
        entry.description = Set(Some(format!("Purchased {} credits", credits)));
        entry.stripe_payment_intent_id = Set(session.payment_intent.clone());
        entry.stripe_invoice_id = Set(session.invoice.clone());
        // Re-stamped to the settlement point: the balance changes now, not at
        // checkout, and replaying entries by created_at must match.
        entry.created_at = Set(Utc::now().into());
        entry.updated_at = Set(Utc::now().into());
        entry.update(&txn).await?;

        txn.commit().await?;

        tracing::info!(
            user_id = %user_id,
            credits,
            product_id,
            session_id = %session.id,
            "Settled credit purchase"
        );
        Ok(())
    }

    /// Claw back the credits of a refunded purchase. The ledger does not
    /// clamp, so the balance may go negative if the credits were already
    /// spent.
    async fn reconcile_refund(&self, charge: StripeCharge) -> Result<()> {
        let Some(payment_intent) = charge.payment_intent else {
            tracing::warn!(charge_id = %charge.id, "Refunded charge has no payment intent");
            return Ok(());
        };

        let original = CreditTransactions::find()
            .filter(credit_transactions::Column::StripePaymentIntentId.eq(&payment_intent))
            .filter(credit_transactions::Column::Kind.eq(TransactionKind::Purchase))
            .one(&self.db)
            .await?;

        let Some(original) = original else {
            tracing::warn!(
                payment_intent = %payment_intent,
                "No purchase transaction found for refunded charge"
            );
            return Ok(());
        };

        if original.amount <= 0 {
            tracing::warn!(
                payment_intent = %payment_intent,
                "Refunded purchase was never settled; nothing to revoke"
            );
            return Ok(());
        }

        // A refund emits both charge.refunded and charge.refund.updated, so
        // the clawback is keyed on the payment intent: one revoke entry per
        // refunded purchase.
        let already_revoked = CreditTransactions::find()
            .filter(credit_transactions::Column::StripePaymentIntentId.eq(&payment_intent))
            .filter(credit_transactions::Column::Kind.eq(TransactionKind::Refund))
            .one(&self.db)
            .await?
            .is_some();
        if already_revoked {
            tracing::debug!(
                payment_intent = %payment_intent,
                "Refund already reconciled"
            );
            return Ok(());
        }

        let amount = original.amount;
        let user_id = original.user_id;

        // Same discipline as the ledger: lock, mutate, append, commit. No
        // clamp; the balance may go negative if the credits were spent.
        let txn = self.db.begin().await?;

        let balance = lock_balance(&txn, user_id).await?;
        let updated = apply_balance_change(&txn, balance, -amount, 0, 0).await?;

        credit_transactions::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            kind: Set(TransactionKind::Refund),
            amount: Set(-amount),
            balance_after: Set(updated.balance),
            description: Set(Some(format!("Refund for purchase {}", payment_intent))),
            stripe_payment_intent_id: Set(Some(payment_intent.clone())),
            stripe_charge_id: Set(Some(charge.id.clone())),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount,
            payment_intent = %payment_intent,
            "Reconciled refund"
        );
        Ok(())
    }

    /// Upsert the local subscription row keyed by the Stripe subscription id.
    async fn upsert_subscription(&self, subscription: StripeSubscription) -> Result<()> {
        let Some(user) = Users::find()
            .filter(users::Column::StripeCustomerId.eq(&subscription.customer))
            .one(&self.db)
            .await?
        else {
            tracing::warn!(
                customer = %subscription.customer,
                subscription_id = %subscription.id,
                "Subscription event for unknown customer"
            );
            return Ok(());
        };

        let status = SubscriptionStatus::from_stripe(&subscription.status);
        let price = subscription.items.data.first().map(|item| &item.price);
        let price_id = price.map(|p| p.id.clone());
        let product_id = price.and_then(|p| p.product.clone());
        let period_start = subscription
            .current_period_start
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .map(Into::into);
        let period_end = subscription
            .current_period_end
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .map(Into::into);

        let existing = Subscriptions::find()
            .filter(subscriptions::Column::StripeSubscriptionId.eq(&subscription.id))
            .one(&self.db)
            .await?;

        match existing {
            Some(row) => {
                let mut active: subscriptions::ActiveModel = row.into();
                active.status = Set(status.clone());
                active.stripe_price_id = Set(price_id);
                active.stripe_product_id = Set(product_id);
                active.current_period_start = Set(period_start);
                active.current_period_end = Set(period_end);
                active.updated_at = Set(Utc::now().into());
                active.update(&self.db).await?;
            }
            None => {
                subscriptions::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user.id),
                    stripe_subscription_id: Set(Some(subscription.id.clone())),
                    stripe_price_id: Set(price_id),
                    stripe_product_id: Set(product_id),
                    status: Set(status.clone()),
                    current_period_start: Set(period_start),
                    current_period_end: Set(period_end),
                    ..Default::default()
                }
                .insert(&self.db)
                .await?;
            }
        }

        tracing::info!(
            user_id = %user.id,
            subscription_id = %subscription.id,
            status = ?status,
            "Upserted subscription"
        );
        Ok(())
    }

    /// A deleted subscription is kept as a canceled row, never removed.
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let Some(row) = Subscriptions::find()
            .filter(subscriptions::Column::StripeSubscriptionId.eq(subscription_id))
            .one(&self.db)
            .await?
        else {
            tracing::warn!(subscription_id, "Delete event for unknown subscription");
            return Ok(());
        };

        let mut active: subscriptions::ActiveModel = row.into();
        active.status = Set(SubscriptionStatus::Canceled);
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;

        tracing::info!(subscription_id, "Canceled subscription");
        Ok(())
    }

    pub async fn user_subscriptions(&self, user_id: Uuid) -> Result<Vec<subscriptions::Model>> {
        let rows = Subscriptions::find()
            .filter(subscriptions::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Find or create the Stripe customer for a user and persist the mapping.
    async fn ensure_stripe_customer(&self, user_id: Uuid) -> Result<String> {
        let user = Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        if let Some(customer_id) = user.stripe_customer_id.clone() {
            return Ok(customer_id);
        }

        let customer = self.stripe.create_customer(&user.email).await?;

        let mut active: users::ActiveModel = user.into();
        active.stripe_customer_id = Set(Some(customer.id.clone()));
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;

        tracing::info!(user_id = %user_id, customer_id = %customer.id, "Created Stripe customer");
        Ok(customer.id)
    }

    async fn cached_product(&self, product_id: &str) -> Result<StripeProduct> {
        if let Some(product) = self.product_cache.get(product_id).await {
            return Ok(product);
        }
        let product = self.stripe.retrieve_product(product_id).await?;
        self.product_cache
            .insert(product_id.to_string(), product.clone())
            .await;
        Ok(product)
    }
}

fn parse_object<T: DeserializeOwned>(event: &StripeEvent, what: &str) -> Result<T> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        ServiceError::InvalidRequest(format!("Malformed {} in event {}: {}", what, event.id, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_table_maps_known_products() {
        assert_eq!(credits_for_product("prod_T0Q0egYs4uRQIF"), Some(100));
        assert_eq!(credits_for_product("prod_T0Q4ubm8cwuJFW"), Some(260));
        assert_eq!(credits_for_product("prod_T0Q5vfk643vdUe"), Some(525));
        assert_eq!(credits_for_product("prod_T0Q5DPrrdQ9RV7"), Some(1075));
    }

    #[test]
    fn unknown_products_grant_nothing() {
        assert_eq!(credits_for_product("prod_unknown"), None);
        assert_eq!(credits_for_product(""), None);
    }
}
