//! HandleBillingWebhookHandler - Verifies, deduplicates and applies
//! payment-processor webhook deliveries.
//!
//! Pipeline:
//! 1. Verify the signature (nothing unverified reaches the guard)
//! 2. Fast duplicate check against the processed-key set
//! 3. Classify; unhandled classes are recorded and acknowledged
//! 4. Resolve the user and enrich subscription checkouts from the processor
//! 5. Open the user's unit of work and claim the event id inside it
//! 6. Reconcile and commit rows, ledgers, history and the key together

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::billing::{
    reconcile, BillingError, BillingEvent, Catalog, Effect, SubscriptionTerms,
};
use crate::domain::foundation::{EventId, Timestamp, UserId};
use crate::domain::webhook::{
    classify, metadata_keys, period_from_unix, Classification, ClassifiedPayload,
    SubscriptionCheckoutPayload, SubscriptionPayload, WebhookVerifier,
};
use crate::ports::{
    BillingChange, CustomerRegistry, EntitlementStore, IdempotencyGuard, PaymentProvider,
};

/// Command carrying one raw delivery.
#[derive(Debug, Clone)]
pub struct HandleBillingWebhookCommand {
    /// Raw body, exactly as received; the signature covers these bytes.
    pub payload: Vec<u8>,
    pub signature: Option<String>,
}

/// How a delivery was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied { event_id: EventId, effect: Effect },
    Duplicate { event_id: EventId },
    Ignored { reason: String },
}

impl WebhookOutcome {
    pub fn kind(&self) -> WebhookOutcomeKind {
        match self {
            WebhookOutcome::Applied { .. } => WebhookOutcomeKind::Applied,
            WebhookOutcome::Duplicate { .. } => WebhookOutcomeKind::Duplicate,
            WebhookOutcome::Ignored { .. } => WebhookOutcomeKind::Ignored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcomeKind {
    Applied,
    Duplicate,
    Ignored,
}

/// Collaborators of the webhook pipeline.
pub struct HandleBillingWebhookHandler {
    verifier: Arc<WebhookVerifier>,
    guard: Arc<dyn IdempotencyGuard>,
    store: Arc<dyn EntitlementStore>,
    registry: Arc<dyn CustomerRegistry>,
    payment_provider: Arc<dyn PaymentProvider>,
    catalog: Arc<Catalog>,
}

impl HandleBillingWebhookHandler {
    pub fn new(
        verifier: Arc<WebhookVerifier>,
        guard: Arc<dyn IdempotencyGuard>,
        store: Arc<dyn EntitlementStore>,
        registry: Arc<dyn CustomerRegistry>,
        payment_provider: Arc<dyn PaymentProvider>,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            verifier,
            guard,
            store,
            registry,
            payment_provider,
            catalog,
        }
    }

    /// Processes one delivery.
    ///
    /// # Errors
    ///
    /// Retryable errors (`StorageConflict`, retryable upstream failures) mean
    /// nothing was written and the delivery should be retried. All others are
    /// final for this payload.
    pub async fn handle(
        &self,
        cmd: HandleBillingWebhookCommand,
    ) -> Result<WebhookOutcome, BillingError> {
        // 1. Verify signature and parse the envelope
        let event = self
            .verifier
            .verify(&cmd.payload, cmd.signature.as_deref())
            .map_err(|e| {
                tracing::warn!(error = %e, "Rejected webhook delivery");
                e
            })?;
        let event_id = event.event_id()?;

        // 2. Fast duplicate check; the claim inside the unit is authoritative
        if self.guard.is_processed(event_id.as_str()).await? {
            tracing::info!(event_id = %event_id, event_type = %event.event_type, "Duplicate webhook event");
            return Ok(WebhookOutcome::Duplicate { event_id });
        }

        // 3. Classify
        let classified = match classify(&event)? {
            Classification::Actionable(classified) => classified,
            Classification::Ignored { reason } => {
                return self.acknowledge_ignored(&event_id, reason).await;
            }
        };
        let class = classified.payload.class();

        // 4. Resolve user and build the handler input
        let Some((user_id, billing_event)) = self.prepare(classified.payload).await? else {
            tracing::warn!(
                event_id = %event_id,
                class = class.as_str(),
                "Webhook event cannot be attributed to a user"
            );
            return self
                .acknowledge_ignored(&event_id, "event cannot be attributed to a user".to_string())
                .await;
        };

        // 5-6. Apply atomically under the user's lock
        let effect = self
            .apply(&user_id, &event_id, &billing_event, classified.occurred_at)
            .await?;

        match effect {
            Some(effect) => {
                tracing::info!(
                    event_id = %event_id,
                    user_id = %user_id,
                    class = class.as_str(),
                    effect = ?effect,
                    "Webhook event applied"
                );
                Ok(WebhookOutcome::Applied { event_id, effect })
            }
            None => {
                tracing::info!(event_id = %event_id, user_id = %user_id, "Duplicate webhook event");
                Ok(WebhookOutcome::Duplicate { event_id })
            }
        }
    }

    /// Runs the reconciliation inside the user's unit of work. Returns
    /// `None` if another delivery of the same event committed first.
    async fn apply(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        billing_event: &BillingEvent,
        occurred_at: Timestamp,
    ) -> Result<Option<Effect>, BillingError> {
        let mut uow = self.store.begin(user_id).await.map_err(storage_failure(event_id))?;

        if !uow
            .admit(event_id.as_str())
            .await
            .map_err(storage_failure(event_id))?
        {
            return Ok(None);
        }

        let reconciled = reconcile(uow.state(), billing_event, occurred_at, &self.catalog)
            .map_err(|e| {
                tracing::error!(event_id = %event_id, user_id = %user_id, error = %e, "Webhook event rejected");
                e
            })?;

        uow.commit(BillingChange::new(reconciled.state, reconciled.history))
            .await
            .map_err(storage_failure(event_id))?;

        Ok(Some(reconciled.effect))
    }

    async fn acknowledge_ignored(
        &self,
        event_id: &EventId,
        reason: String,
    ) -> Result<WebhookOutcome, BillingError> {
        self.guard.admit(event_id.as_str()).await?;
        tracing::debug!(event_id = %event_id, reason = %reason, "Webhook event ignored");
        Ok(WebhookOutcome::Ignored { reason })
    }

    async fn prepare(
        &self,
        payload: ClassifiedPayload,
    ) -> Result<Option<(UserId, BillingEvent)>, BillingError> {
        match payload {
            ClassifiedPayload::CreditCheckout(p) => {
                self.catalog.package(&p.package_id)?;
                let user = self
                    .checkout_user(p.user_id, p.customer_id.as_deref())
                    .await?;
                let event = BillingEvent::CreditPurchase {
                    package_id: p.package_id,
                };
                Ok(Some((user, event)))
            }
            ClassifiedPayload::SubscriptionCheckout(p) => {
                let user = self
                    .checkout_user(p.user_id.clone(), p.customer_id.as_deref())
                    .await?;
                let terms = self.checkout_terms(p).await?;
                Ok(Some((user, BillingEvent::SubscriptionCheckout(terms))))
            }
            ClassifiedPayload::SubscriptionUpserted(p) => {
                Ok(self.subscription_user(&p).await?.map(|u| {
                    (u, BillingEvent::SubscriptionUpserted(p.terms))
                }))
            }
            ClassifiedPayload::SubscriptionCanceled(p) => {
                Ok(self.subscription_user(&p).await?.map(|u| {
                    (u, BillingEvent::SubscriptionCanceled(p.terms))
                }))
            }
        }
    }

    /// Checkout sessions are created by this service with the user stamped
    /// in, so one that cannot be attributed is rejected rather than ignored.
    async fn checkout_user(
        &self,
        from_metadata: Option<UserId>,
        customer_id: Option<&str>,
    ) -> Result<UserId, BillingError> {
        self.resolve_user(from_metadata, customer_id, None)
            .await?
            .ok_or(BillingError::MissingMetadata(metadata_keys::USER_ID))
    }

    async fn subscription_user(&self, p: &SubscriptionPayload) -> Result<Option<UserId>, BillingError> {
        self.resolve_user(
            p.user_id.clone(),
            p.customer_id.as_deref(),
            Some(&p.terms.subscription_id),
        )
        .await
    }

    /// Metadata first, then the customer registry, then the owner of an
    /// existing entitlement row.
    async fn resolve_user(
        &self,
        from_metadata: Option<UserId>,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> Result<Option<UserId>, BillingError> {
        if let Some(user) = from_metadata {
            return Ok(Some(user));
        }
        if let Some(customer_id) = customer_id {
            if let Some(user) = self.registry.find_user_by_customer(customer_id).await? {
                return Ok(Some(user));
            }
        }
        if let Some(subscription_id) = subscription_id {
            return Ok(self.store.find_user_by_subscription(subscription_id).await?);
        }
        Ok(None)
    }

    /// Completion events only reference the subscription; its price and
    /// period come from the processor.
    async fn checkout_terms(
        &self,
        p: SubscriptionCheckoutPayload,
    ) -> Result<SubscriptionTerms, BillingError> {
        let subscription = self
            .payment_provider
            .get_subscription(&p.subscription_id)
            .await?
            .ok_or_else(|| {
                BillingError::MalformedEvent(format!(
                    "subscription {} unknown to the payment processor",
                    p.subscription_id
                ))
            })?;

        Ok(SubscriptionTerms {
            price_id: subscription.price_id.or(p.price_id),
            provider_active: subscription.status.has_access(),
            period: period_from_unix(
                subscription.current_period_start,
                subscription.current_period_end,
            )?,
            cancel_at_period_end: subscription.cancel_at_period_end,
            subscription_id: p.subscription_id,
        })
    }
}

fn storage_failure(
    event_id: &EventId,
) -> impl Fn(crate::domain::foundation::DomainError) -> BillingError + '_ {
    move |e| {
        tracing::error!(event_id = %event_id, error = %e, "Storage failure while applying webhook");
        BillingError::from(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBillingStore, InMemoryCustomerRegistry};
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::domain::billing::{EntitlementStatus, PlanTier};
    use crate::domain::webhook::sign_payload;
    use crate::ports::PaymentError;
    use secrecy::SecretString;
    use serde_json::{json, Value};

    const SECRET: &str = "whsec_handler_test";
    const BASIC: &str = "price_1QSRCGIfIBf9ivekBp2fRf03";
    const PRO: &str = "price_1QSRGEIfIBf9iveko6Cj79JN";
    const STARTER: &str = "price_1QeLxDIfIBf9ivekXzPPzWdJ";
    const PERIOD: i64 = 2_592_000;

    // ════════════════════════════════════════════════════════════════════════════
    // Fixture
    // ════════════════════════════════════════════════════════════════════════════

    struct Fixture {
        handler: Arc<HandleBillingWebhookHandler>,
        store: InMemoryBillingStore,
        registry: Arc<InMemoryCustomerRegistry>,
        payment: MockPaymentProvider,
    }

    fn fixture() -> Fixture {
        let store = InMemoryBillingStore::new();
        let registry = Arc::new(InMemoryCustomerRegistry::new());
        let payment = MockPaymentProvider::new();
        let handler = HandleBillingWebhookHandler::new(
            Arc::new(WebhookVerifier::new(SecretString::new(SECRET.to_string()))),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            registry.clone(),
            Arc::new(payment.clone()),
            Arc::new(Catalog::standard(10).unwrap()),
        );
        Fixture {
            handler: Arc::new(handler),
            store,
            registry,
            payment,
        }
    }

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn signed(event: Value) -> HandleBillingWebhookCommand {
        let payload = serde_json::to_vec(&event).unwrap();
        let signature = sign_payload(SECRET, now(), &payload);
        HandleBillingWebhookCommand {
            payload,
            signature: Some(signature),
        }
    }

    fn envelope(id: &str, event_type: &str, object: Value) -> Value {
        json!({
            "id": id,
            "type": event_type,
            "created": now(),
            "livemode": false,
            "data": { "object": object }
        })
    }

    fn credit_checkout(id: &str, package: &str) -> Value {
        envelope(
            id,
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "mode": "payment",
                "metadata": { "user_id": "user-1", "package_id": package, "type": "credit_purchase" }
            }),
        )
    }

    fn subscription_event(id: &str, event_type: &str, sub: &str, price: &str, start: i64, metadata: Value) -> Value {
        envelope(
            id,
            event_type,
            json!({
                "id": sub,
                "customer": "cus_1",
                "status": "active",
                "current_period_start": start,
                "current_period_end": start + PERIOD,
                "metadata": metadata,
                "items": { "data": [{ "price": { "id": price } }] }
            }),
        )
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Verification and classification
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn missing_and_invalid_signatures_never_reach_the_guard() {
        let f = fixture();
        let mut cmd = signed(credit_checkout("evt_1", STARTER));

        cmd.signature = None;
        assert_eq!(
            f.handler.handle(cmd.clone()).await.unwrap_err(),
            BillingError::MissingSignature
        );

        cmd.signature = Some(sign_payload("whsec_wrong", now(), &cmd.payload));
        assert!(matches!(
            f.handler.handle(cmd).await.unwrap_err(),
            BillingError::InvalidSignature(_)
        ));
        assert_eq!(f.store.processed_count().await, 0);
    }

    #[tokio::test]
    async fn unhandled_event_types_are_ignored_and_recorded() {
        let f = fixture();
        let cmd = signed(envelope("evt_inv", "invoice.paid", json!({ "id": "in_1" })));

        let outcome = f.handler.handle(cmd.clone()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

        let again = f.handler.handle(cmd).await.unwrap();
        assert_eq!(again.kind(), WebhookOutcomeKind::Duplicate);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Credit checkout
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn credit_checkout_grants_credits_and_minutes_once() {
        let f = fixture();
        let cmd = signed(credit_checkout("evt_credit", STARTER));

        let outcome = f.handler.handle(cmd.clone()).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                event_id: EventId::new("evt_credit").unwrap(),
                effect: Effect::CreditsGranted {
                    credits: 105,
                    minutes: 10
                },
            }
        );

        let duplicate = f.handler.handle(cmd).await.unwrap();
        assert_eq!(duplicate.kind(), WebhookOutcomeKind::Duplicate);

        let state = f.store.load(&user()).await.unwrap();
        assert_eq!(state.credits.available_credits, 105);
        assert_eq!(state.minutes.available_minutes, 10);
        assert_eq!(state.minutes.total_minutes_used, 0);
    }

    #[tokio::test]
    async fn concurrent_duplicate_deliveries_apply_once() {
        let f = fixture();
        let cmd = signed(credit_checkout("evt_race", STARTER));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handler = f.handler.clone();
                let cmd = cmd.clone();
                tokio::spawn(async move { handler.handle(cmd).await })
            })
            .collect();

        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().kind() == WebhookOutcomeKind::Applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(f.store.load(&user()).await.unwrap().credits.available_credits, 105);
    }

    #[tokio::test]
    async fn unknown_package_is_fatal_and_not_recorded() {
        let f = fixture();
        let cmd = signed(credit_checkout("evt_bad", "price_unknown"));

        let err = f.handler.handle(cmd).await.unwrap_err();
        assert_eq!(err, BillingError::unknown_package("price_unknown"));
        assert!(!err.is_retryable());
        assert_eq!(f.store.processed_count().await, 0);
    }

    #[tokio::test]
    async fn checkout_without_user_is_rejected_for_missing_metadata() {
        let f = fixture();
        let mut event = credit_checkout("evt_anon", STARTER);
        event["data"]["object"]["metadata"] = json!({ "package_id": STARTER });
        event["data"]["object"]["customer"] = json!("cus_unregistered");

        let err = f.handler.handle(signed(event)).await.unwrap_err();
        assert_eq!(err, BillingError::MissingMetadata("user_id"));
        assert!(!err.is_retryable());
        assert_eq!(f.store.processed_count().await, 0);
    }

    #[tokio::test]
    async fn storage_failure_is_retryable_and_leaves_no_trace() {
        let f = fixture();
        let cmd = signed(credit_checkout("evt_retry", STARTER));
        f.store.fail_next_commits(1);

        let err = f.handler.handle(cmd.clone()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.store.processed_count().await, 0);
        assert_eq!(f.store.load(&user()).await.unwrap().credits.available_credits, 0);

        let outcome = f.handler.handle(cmd).await.unwrap();
        assert_eq!(outcome.kind(), WebhookOutcomeKind::Applied);
        assert_eq!(f.store.load(&user()).await.unwrap().credits.available_credits, 105);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Subscriptions
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn subscription_checkout_is_enriched_from_processor() {
        let f = fixture();
        let start = now() - 60;
        f.payment.add_subscription(MockPaymentProvider::active_subscription(
            "sub_basic", "cus_1", BASIC, start,
        ));
        let event = envelope(
            "evt_checkout",
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_basic",
                "mode": "subscription",
                "metadata": { "user_id": "user-1", "price_id": BASIC, "type": "subscription" }
            }),
        );

        let outcome = f.handler.handle(signed(event)).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                event_id: EventId::new("evt_checkout").unwrap(),
                effect: Effect::SubscriptionStarted {
                    tier: PlanTier::Basic
                },
            }
        );
        assert!(f.payment.was_called("get_subscription"));

        let snapshot = f.store.load(&user()).await.unwrap().snapshot();
        assert_eq!(snapshot.status, EntitlementStatus::Active);
        assert_eq!(snapshot.minutes.available_minutes, 10);
        assert_eq!(snapshot.credits.available_credits, 100);
    }

    #[tokio::test]
    async fn processor_outage_during_enrichment_is_retryable() {
        let f = fixture();
        f.payment
            .set_method_error("get_subscription", PaymentError::network("timeout"));
        let event = envelope(
            "evt_checkout",
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "subscription": "sub_basic",
                "metadata": { "user_id": "user-1" }
            }),
        );

        let err = f.handler.handle(signed(event)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.store.processed_count().await, 0);
    }

    #[tokio::test]
    async fn subscription_events_resolve_user_through_registry() {
        let f = fixture();
        f.registry.save_customer_id(&user(), "cus_1").await.unwrap();

        let event = subscription_event(
            "evt_created",
            "customer.subscription.created",
            "sub_pro",
            PRO,
            now() - 60,
            json!({}),
        );
        let outcome = f.handler.handle(signed(event)).await.unwrap();

        assert_eq!(outcome.kind(), WebhookOutcomeKind::Applied);
        let state = f.store.load(&user()).await.unwrap();
        assert_eq!(state.active().unwrap().tier, PlanTier::Pro);
    }

    #[tokio::test]
    async fn deletion_resolves_user_through_existing_row() {
        let f = fixture();
        let start = now() - 60;
        let created = subscription_event(
            "evt_1",
            "customer.subscription.created",
            "sub_basic",
            BASIC,
            start,
            json!({ "user_id": "user-1" }),
        );
        f.handler.handle(signed(created)).await.unwrap();

        let mut deleted = subscription_event(
            "evt_2",
            "customer.subscription.deleted",
            "sub_basic",
            BASIC,
            start,
            json!({}),
        );
        deleted["data"]["object"]["customer"] = json!("cus_unregistered");
        deleted["data"]["object"]["status"] = json!("canceled");

        let outcome = f.handler.handle(signed(deleted)).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                event_id: EventId::new("evt_2").unwrap(),
                effect: Effect::Canceled {
                    tier: PlanTier::Basic
                },
            }
        );
        assert_eq!(
            f.store.load(&user()).await.unwrap().snapshot().status,
            EntitlementStatus::Canceled
        );
    }

    #[tokio::test]
    async fn unattributable_subscription_event_is_ignored() {
        let f = fixture();
        let event = subscription_event(
            "evt_orphan",
            "customer.subscription.updated",
            "sub_orphan",
            BASIC,
            now() - 60,
            json!({}),
        );

        let outcome = f.handler.handle(signed(event)).await.unwrap();
        assert_eq!(outcome.kind(), WebhookOutcomeKind::Ignored);
        assert!(f.store.find_user_by_subscription("sub_orphan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_subscription_price_is_fatal() {
        let f = fixture();
        let event = subscription_event(
            "evt_bad_price",
            "customer.subscription.created",
            "sub_x",
            "price_unknown",
            now() - 60,
            json!({ "user_id": "user-1" }),
        );

        let err = f.handler.handle(signed(event)).await.unwrap_err();
        assert_eq!(err, BillingError::unknown_price("price_unknown"));
        assert!(f.store.load(&user()).await.unwrap().entitlements.is_empty());
        assert_eq!(f.store.processed_count().await, 0);
    }
}
