//! Auto-approval gate.
//!
//! Decides whether an action intent runs unattended. Checks run in a fixed
//! order and any refusal routes the action to a human:
//!
//! 1. intent exists, belongs to the caller and has not expired
//! 2. action type is allow-listed
//! 3. autonomy mode resolved by precedence
//! 4. policy over mode, risk and confidence
//! 5. reserve/publish with exactly one budget consumption
//!
//! Step 5 is a claim on the intent's reserve/publish row. Only the holder
//! of a fresh claim consumes budget; it then commits the claim, publishes
//! the approved signal and marks the row PUBLISHED. Anyone who finds a
//! committed claim re-publishes without touching the budget, and anyone who
//! finds an uncommitted claim waits for its holder.
//!
//! Each claim carries a random token. A holder that stalls past
//! `claim_stale_secs` can be displaced; its commit then matches nothing, so
//! it refunds the unit it consumed and looks at the row again.

pub mod autonomy;
pub mod policy;

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use actuator_core::config::GateConfig;
use actuator_core::events::{ApprovedActionSignal, DomainEvent};
use actuator_core::types::{
    ActionIntent, ActionIntentId, ApprovalSource, AutoExecStatus, Timestamp,
};
use actuator_storage::{AutoExecRepository, Database, IntentRepository};

use crate::budget::{BudgetLedger, BudgetRefusal, ConsumeOutcome};
use crate::error::GateError;
use crate::publisher::{ApprovalPublisher, AuditLog};
use crate::types::{GateOutcome, GateReason, GateRequest, HumanApprovalOutcome};

pub use autonomy::GovernanceResolver;
pub use policy::PolicyDecision;

/// What the caller holds after looking at the reserve/publish row.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Claim {
    AlreadyPublished,
    /// Cleared for publishing by an earlier evaluation.
    Committed,
    /// This caller holds an uncommitted reservation under the given token.
    Won(String),
    /// Someone else holds an uncommitted reservation.
    Pending,
}

/// How a won claim ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    /// Budget consumed and claim committed.
    Committed,
    /// Budget refused; the claim was released.
    Refused(BudgetRefusal),
    /// Another evaluation took the claim over first; the unit was refunded.
    Lost,
}

pub struct AutoApprovalGate {
    intents: IntentRepository,
    governance: GovernanceResolver,
    ledger: BudgetLedger,
    auto_exec: AutoExecRepository,
    publisher: Arc<dyn ApprovalPublisher>,
    audit: AuditLog,
    config: GateConfig,
    ttl_days: u32,
}

impl AutoApprovalGate {
    pub fn new(
        db: Arc<Database>,
        publisher: Arc<dyn ApprovalPublisher>,
        config: GateConfig,
        auto_exec_ttl_days: u32,
    ) -> Self {
        Self {
            intents: IntentRepository::new(Arc::clone(&db)),
            governance: GovernanceResolver::new(Arc::clone(&db)),
            ledger: BudgetLedger::new(Arc::clone(&db)),
            auto_exec: AutoExecRepository::new(Arc::clone(&db)),
            publisher,
            audit: AuditLog::new(db),
            config,
            ttl_days: auto_exec_ttl_days,
        }
    }

    pub async fn evaluate(&self, request: &GateRequest) -> Result<GateOutcome, GateError> {
        self.evaluate_at(request, Timestamp::now()).await
    }

    pub async fn evaluate_at(
        &self,
        request: &GateRequest,
        now: Timestamp,
    ) -> Result<GateOutcome, GateError> {
        let id = &request.action_intent_id;

        let Some(intent) = self.load_intent(request)? else {
            return Ok(self.require_approval(id, GateReason::IntentNotFound, now));
        };
        if intent.is_expired_at(now) {
            return Ok(self.require_approval(id, GateReason::IntentExpired, now));
        }
        if !self.governance.is_allowlisted(
            &intent.tenant_id,
            &intent.account_id,
            &intent.action_type,
        )? {
            return Ok(self.require_approval(id, GateReason::ActionTypeNotAllowlisted, now));
        }

        let mode =
            self.governance
                .resolve_mode(&intent.tenant_id, &intent.account_id, &intent.action_type)?;
        match policy::evaluate(mode, intent.risk_level, intent.confidence_score, &self.config) {
            PolicyDecision::AutoExecute => {}
            PolicyDecision::RequireApproval(reason) | PolicyDecision::Block(reason) => {
                return Ok(self.require_approval(id, reason, now));
            }
        }

        let signal = ApprovedActionSignal {
            action_intent_id: id.clone(),
            tenant_id: intent.tenant_id.clone(),
            account_id: intent.account_id.clone(),
            approval_source: ApprovalSource::Policy,
            auto_executed: true,
        };

        let already_published = loop {
            match self.acquire_claim(id, now).await? {
                Claim::AlreadyPublished => break true,
                Claim::Committed => break self.publish_and_mark(&signal, now).await?,
                Claim::Pending => return Err(GateError::ReservationInProgress(id.clone())),
                Claim::Won(token) => match self.settle_claim(&intent, &token, now)? {
                    Settlement::Committed => break self.publish_and_mark(&signal, now).await?,
                    Settlement::Refused(refusal) => {
                        info!(action_intent_id = %id, ?refusal, "Autonomy budget refused");
                        return Ok(self.require_approval(id, GateReason::BudgetExceeded, now));
                    }
                    Settlement::Lost => continue,
                },
            }
        };

        info!(
            action_intent_id = %id,
            action_type = %intent.action_type,
            already_published,
            "Action auto-approved"
        );
        self.audit.record(&DomainEvent::ActionAutoApproved {
            action_intent_id: id.clone(),
            action_type: intent.action_type.clone(),
            already_published,
            timestamp: now,
        });
        Ok(GateOutcome::auto_executed(id.clone(), already_published))
    }

    pub async fn publish_human_approval(
        &self,
        request: &GateRequest,
    ) -> Result<HumanApprovalOutcome, GateError> {
        self.publish_human_approval_at(request, Timestamp::now()).await
    }

    /// Publish an approval given by a person. Uses the same reserve/publish
    /// guard as the automatic path but never consumes autonomy budget.
    pub async fn publish_human_approval_at(
        &self,
        request: &GateRequest,
        now: Timestamp,
    ) -> Result<HumanApprovalOutcome, GateError> {
        let id = &request.action_intent_id;
        let intent = self
            .load_intent(request)?
            .ok_or_else(|| GateError::IntentNotFound(id.clone()))?;
        if intent.is_expired_at(now) {
            return Err(GateError::IntentExpired(id.clone()));
        }

        let signal = ApprovedActionSignal {
            action_intent_id: id.clone(),
            tenant_id: intent.tenant_id,
            account_id: intent.account_id,
            approval_source: ApprovalSource::Human,
            auto_executed: false,
        };

        let already_published = loop {
            match self.acquire_claim(id, now).await? {
                Claim::AlreadyPublished => break true,
                Claim::Committed => break self.publish_and_mark(&signal, now).await?,
                Claim::Won(token) => {
                    if self.auto_exec.commit(id, &token, now)? {
                        break self.publish_and_mark(&signal, now).await?;
                    }
                    warn!(action_intent_id = %id, "Reservation taken over before commit");
                }
                Claim::Pending => return Err(GateError::ReservationInProgress(id.clone())),
            }
        };

        if !already_published {
            info!(action_intent_id = %id, "Human approval published");
            self.audit.record(&DomainEvent::HumanApprovalPublished {
                action_intent_id: id.clone(),
                timestamp: now,
            });
        }
        Ok(HumanApprovalOutcome {
            action_intent_id: id.clone(),
            already_published,
        })
    }

    /// Load the intent, treating one owned by another tenant or account as
    /// missing.
    fn load_intent(&self, request: &GateRequest) -> Result<Option<ActionIntent>, GateError> {
        Ok(self
            .intents
            .find_by_id(&request.action_intent_id)?
            .filter(|i| i.tenant_id == request.tenant_id && i.account_id == request.account_id))
    }

    /// Look at the intent's reserve/publish row until this caller holds a
    /// claim or someone else has committed one.
    ///
    /// An uncommitted claim held elsewhere is polled for `claim_wait`, which
    /// outlasts the stale window, so a stalled holder is taken over rather
    /// than waited on forever. The stale check runs on `now` advanced by the
    /// time spent polling.
    async fn acquire_claim(&self, id: &ActionIntentId, now: Timestamp) -> Result<Claim, GateError> {
        let started = Instant::now();
        let stale_secs = self.config.claim_stale_secs as i64;

        loop {
            let current = now.plus_secs(started.elapsed().as_secs() as i64);
            match self.auto_exec.load(id, current)? {
                Some(row) if row.status == AutoExecStatus::Published => {
                    return Ok(Claim::AlreadyPublished)
                }
                Some(row) if row.committed => return Ok(Claim::Committed),
                Some(row) => {
                    let stale_before = current.plus_secs(-stale_secs);
                    let token = new_claim_token();
                    if row.updated_at <= stale_before
                        && self.auto_exec.take_over_stale(id, &token, stale_before, current)?
                    {
                        warn!(action_intent_id = %id, "Took over stale reservation");
                        return Ok(Claim::Won(token));
                    }
                }
                None => {
                    let token = new_claim_token();
                    let expires_at = current.plus_days(self.ttl_days);
                    if self.auto_exec.try_reserve(id, &token, current, expires_at)? {
                        return Ok(Claim::Won(token));
                    }
                    continue;
                }
            }
            if started.elapsed() >= self.config.claim_wait() {
                return Ok(Claim::Pending);
            }
            tokio::time::sleep(self.config.claim_poll_interval()).await;
        }
    }

    /// Consume one budget unit for a won claim and commit it.
    ///
    /// If the claim was taken over in the meantime the commit matches no
    /// row; the unit goes back to the ledger so the intent is charged once.
    fn settle_claim(
        &self,
        intent: &ActionIntent,
        token: &str,
        now: Timestamp,
    ) -> Result<Settlement, GateError> {
        let id = &intent.id;
        match self.ledger.try_consume_at(
            &intent.tenant_id,
            &intent.account_id,
            &intent.action_type,
            now,
        ) {
            Ok(ConsumeOutcome::Consumed) => {}
            Ok(ConsumeOutcome::NotConsumed(refusal)) => {
                self.auto_exec.release(id, token)?;
                return Ok(Settlement::Refused(refusal));
            }
            Err(e) => {
                if let Err(release_err) = self.auto_exec.release(id, token) {
                    warn!(action_intent_id = %id, error = %release_err, "Failed to release reservation");
                }
                return Err(e.into());
            }
        }

        match self.auto_exec.commit(id, token, now) {
            Ok(true) => Ok(Settlement::Committed),
            Ok(false) => {
                warn!(action_intent_id = %id, "Reservation taken over before commit, refunding budget");
                self.ledger.refund_at(
                    &intent.tenant_id,
                    &intent.account_id,
                    &intent.action_type,
                    now,
                )?;
                Ok(Settlement::Lost)
            }
            Err(e) => {
                if let Err(refund_err) = self.ledger.refund_at(
                    &intent.tenant_id,
                    &intent.account_id,
                    &intent.action_type,
                    now,
                ) {
                    warn!(action_intent_id = %id, error = %refund_err, "Failed to refund budget");
                }
                Err(e.into())
            }
        }
    }

    /// Publish the signal and mark the row PUBLISHED.
    ///
    /// Returns whether the signal had already been published. A publish
    /// failure leaves the claim committed so that a retry re-publishes.
    async fn publish_and_mark(
        &self,
        signal: &ApprovedActionSignal,
        now: Timestamp,
    ) -> Result<bool, GateError> {
        let created = self
            .publisher
            .publish(signal)
            .await
            .map_err(|e| GateError::Publish(e.to_string()))?;
        self.auto_exec.mark_published(&signal.action_intent_id, now)?;
        Ok(!created)
    }

    fn require_approval(
        &self,
        id: &ActionIntentId,
        reason: GateReason,
        now: Timestamp,
    ) -> GateOutcome {
        info!(action_intent_id = %id, reason = %reason, "Action requires approval");
        self.audit.record(&DomainEvent::ApprovalRequired {
            action_intent_id: id.clone(),
            reason: reason.to_string(),
            timestamp: now,
        });
        GateOutcome::require_approval(id.clone(), reason)
    }
}

fn new_claim_token() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use actuator_core::error::ActuatorError;
    use actuator_core::types::{AccountId, ActionType, AutonomyMode, RiskLevel, TenantId};
    use actuator_storage::{BudgetRepository, GovernanceRepository, OutboxRepository};

    use crate::publisher::OutboxPublisher;
    use crate::types::GateResult;

    const NOW: Timestamp = Timestamp(1_709_294_400);

    /// Fails the first `failures` publishes, then writes to the outbox.
    struct FlakyPublisher {
        failures: AtomicU32,
        inner: OutboxPublisher,
    }

    #[async_trait]
    impl ApprovalPublisher for FlakyPublisher {
        async fn publish(&self, signal: &ApprovedActionSignal) -> Result<bool, ActuatorError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ActuatorError::Storage("broker unavailable".to_string()));
            }
            self.inner.publish(signal).await
        }
    }

    struct Fixture {
        db: Arc<Database>,
        gate: AutoApprovalGate,
    }

    fn intent(id: &str) -> ActionIntent {
        ActionIntent {
            id: id.into(),
            tenant_id: "t1".into(),
            account_id: "a1".into(),
            action_type: "CREATE_NOTE".into(),
            risk_level: RiskLevel::Low,
            confidence_score: 0.8,
            expires_at: None,
            created_at: NOW,
        }
    }

    fn request(id: &str) -> GateRequest {
        GateRequest {
            action_intent_id: id.into(),
            tenant_id: "t1".into(),
            account_id: "a1".into(),
        }
    }

    fn fixture_with(publisher_failures: u32, daily_cap: u32) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let (t, a) = (TenantId::new("t1"), AccountId::new("a1"));
        let note = ActionType::new("CREATE_NOTE");

        let governance = GovernanceRepository::new(Arc::clone(&db));
        governance.set_allow_list(&t, None, &[note.clone()]).unwrap();
        governance
            .set_autonomy_mode(&t, None, None, AutonomyMode::AutoExecute)
            .unwrap();
        BudgetRepository::new(Arc::clone(&db))
            .set_daily_cap(&t, &a, daily_cap)
            .unwrap();
        IntentRepository::new(Arc::clone(&db))
            .save(&intent("ai-1"))
            .unwrap();

        let publisher = Arc::new(FlakyPublisher {
            failures: AtomicU32::new(publisher_failures),
            inner: OutboxPublisher::new(Arc::clone(&db)),
        });
        let gate = AutoApprovalGate::new(Arc::clone(&db), publisher, GateConfig::default(), 90);
        Fixture { db, gate }
    }

    fn fixture() -> Fixture {
        fixture_with(0, 5)
    }

    fn used_budget(db: &Arc<Database>) -> u32 {
        BudgetLedger::new(Arc::clone(db))
            .remaining_at(&"t1".into(), &"a1".into(), NOW)
            .unwrap()
            .used
    }

    #[tokio::test]
    async fn test_auto_executes_and_publishes_once() {
        let f = fixture();
        let first = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(first, GateOutcome::auto_executed("ai-1".into(), false));

        let second = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(second, GateOutcome::auto_executed("ai-1".into(), true));

        assert_eq!(used_budget(&f.db), 1);
        assert_eq!(OutboxRepository::new(Arc::clone(&f.db)).pending(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_intent() {
        let f = fixture();
        let out = f.gate.evaluate_at(&request("nope"), NOW).await.unwrap();
        assert_eq!(out.result, GateResult::RequireApproval);
        assert_eq!(out.reason, Some(GateReason::IntentNotFound));
    }

    #[tokio::test]
    async fn test_intent_of_other_account_is_not_found() {
        let f = fixture();
        let req = GateRequest {
            account_id: "a2".into(),
            ..request("ai-1")
        };
        let out = f.gate.evaluate_at(&req, NOW).await.unwrap();
        assert_eq!(out.reason, Some(GateReason::IntentNotFound));
    }

    #[tokio::test]
    async fn test_expired_intent() {
        let f = fixture();
        let mut expired = intent("ai-2");
        expired.expires_at = Some(NOW);
        IntentRepository::new(Arc::clone(&f.db)).save(&expired).unwrap();
        let out = f.gate.evaluate_at(&request("ai-2"), NOW).await.unwrap();
        assert_eq!(out.reason, Some(GateReason::IntentExpired));
    }

    #[tokio::test]
    async fn test_not_allowlisted() {
        let f = fixture();
        let mut other = intent("ai-2");
        other.action_type = "DELETE_ACCOUNT".into();
        IntentRepository::new(Arc::clone(&f.db)).save(&other).unwrap();
        let out = f.gate.evaluate_at(&request("ai-2"), NOW).await.unwrap();
        assert_eq!(out.reason, Some(GateReason::ActionTypeNotAllowlisted));
        assert_eq!(used_budget(&f.db), 0);
    }

    #[tokio::test]
    async fn test_disabled_mode_requires_approval() {
        let f = fixture();
        GovernanceRepository::new(Arc::clone(&f.db))
            .set_autonomy_mode(
                &"t1".into(),
                Some(&"a1".into()),
                None,
                AutonomyMode::Disabled,
            )
            .unwrap();
        let out = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(out.reason, Some(GateReason::AutonomyDisabled));
    }

    #[tokio::test]
    async fn test_low_confidence_requires_approval() {
        let f = fixture();
        let mut unsure = intent("ai-2");
        unsure.confidence_score = 0.5;
        IntentRepository::new(Arc::clone(&f.db)).save(&unsure).unwrap();
        let out = f.gate.evaluate_at(&request("ai-2"), NOW).await.unwrap();
        assert_eq!(out.reason, Some(GateReason::ConfidenceTooLow));
    }

    #[tokio::test]
    async fn test_budget_exceeded_releases_reservation() {
        let f = fixture_with(0, 0);
        let out = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(out.reason, Some(GateReason::BudgetExceeded));

        let row = AutoExecRepository::new(Arc::clone(&f.db))
            .load(&"ai-1".into(), NOW)
            .unwrap();
        assert!(row.is_none());

        // A person can still approve it.
        let human = f
            .gate
            .publish_human_approval_at(&request("ai-1"), NOW)
            .await
            .unwrap();
        assert!(!human.already_published);
    }

    #[tokio::test]
    async fn test_publish_failure_retry_does_not_consume_again() {
        let f = fixture_with(1, 5);
        let err = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap_err();
        assert!(matches!(err, GateError::Publish(_)));
        assert_eq!(used_budget(&f.db), 1);

        let retry = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(retry, GateOutcome::auto_executed("ai-1".into(), false));
        assert_eq!(used_budget(&f.db), 1);

        let row = AutoExecRepository::new(Arc::clone(&f.db))
            .load(&"ai-1".into(), NOW)
            .unwrap()
            .unwrap();
        assert_eq!(row.status, AutoExecStatus::Published);
    }

    #[tokio::test]
    async fn test_human_approval_skips_budget() {
        let f = fixture();
        let out = f
            .gate
            .publish_human_approval_at(&request("ai-1"), NOW)
            .await
            .unwrap();
        assert!(!out.already_published);
        assert_eq!(used_budget(&f.db), 0);

        let event = OutboxRepository::new(Arc::clone(&f.db))
            .find("action.approved:ai-1")
            .unwrap()
            .unwrap();
        assert_eq!(event.payload["approval_source"], "HUMAN");
        assert_eq!(event.payload["auto_executed"], false);

        // The automatic path now sees it as already published.
        let auto = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(auto, GateOutcome::auto_executed("ai-1".into(), true));
        assert_eq!(used_budget(&f.db), 0);
    }

    #[tokio::test]
    async fn test_human_approval_of_missing_intent_is_error() {
        let f = fixture();
        let err = f
            .gate
            .publish_human_approval_at(&request("nope"), NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::IntentNotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_uncommitted_claim_is_taken_over() {
        let f = fixture();
        // A previous evaluation reserved and died before consuming budget.
        AutoExecRepository::new(Arc::clone(&f.db))
            .try_reserve(&"ai-1".into(), "dead", NOW.plus_secs(-120), NOW.plus_days(90))
            .unwrap();
        let out = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(out, GateOutcome::auto_executed("ai-1".into(), false));
        assert_eq!(used_budget(&f.db), 1);
    }

    #[tokio::test]
    async fn test_displaced_holder_refunds_its_budget_unit() {
        let f = fixture();
        let auto_exec = AutoExecRepository::new(Arc::clone(&f.db));
        // Holder A reserved, then stalled past the stale window.
        auto_exec
            .try_reserve(&"ai-1".into(), "holder-a", NOW.plus_secs(-61), NOW.plus_days(90))
            .unwrap();

        // B takes the claim over and publishes.
        let out = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(out, GateOutcome::auto_executed("ai-1".into(), false));
        assert_eq!(used_budget(&f.db), 1);

        // A wakes up and tries to finish with its old token.
        let settled = f.gate.settle_claim(&intent("ai-1"), "holder-a", NOW).unwrap();
        assert_eq!(settled, Settlement::Lost);
        assert_eq!(used_budget(&f.db), 1);
        assert_eq!(OutboxRepository::new(Arc::clone(&f.db)).pending(10).unwrap().len(), 1);

        // A's re-evaluation sees the published row.
        let again = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(again, GateOutcome::auto_executed("ai-1".into(), true));
        assert_eq!(used_budget(&f.db), 1);
    }

    #[tokio::test]
    async fn test_waiting_evaluation_takes_over_stalled_claim() {
        let mut f = fixture();
        f.gate.config = GateConfig {
            claim_poll_ms: 50,
            claim_stale_secs: 1,
            ..GateConfig::default()
        };
        // A fresh claim whose holder never finishes.
        AutoExecRepository::new(Arc::clone(&f.db))
            .try_reserve(&"ai-1".into(), "stalled", NOW, NOW.plus_days(90))
            .unwrap();

        let out = f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        assert_eq!(out, GateOutcome::auto_executed("ai-1".into(), false));
        assert_eq!(used_budget(&f.db), 1);
    }

    #[tokio::test]
    async fn test_human_approval_waits_out_stalled_claim() {
        let mut f = fixture();
        f.gate.config = GateConfig {
            claim_poll_ms: 50,
            claim_stale_secs: 1,
            ..GateConfig::default()
        };
        AutoExecRepository::new(Arc::clone(&f.db))
            .try_reserve(&"ai-1".into(), "stalled", NOW, NOW.plus_days(90))
            .unwrap();

        let out = f
            .gate
            .publish_human_approval_at(&request("ai-1"), NOW)
            .await
            .unwrap();
        assert!(!out.already_published);
        assert_eq!(used_budget(&f.db), 0);
    }

    #[tokio::test]
    async fn test_decisions_are_audited() {
        let f = fixture();
        f.gate.evaluate_at(&request("nope"), NOW).await.unwrap();
        f.gate.evaluate_at(&request("ai-1"), NOW).await.unwrap();
        let audit = AuditLog::new(Arc::clone(&f.db));
        assert_eq!(audit.recent(Some("approval_required"), 10).unwrap().len(), 1);
        let approved = audit.recent(Some("action_auto_approved"), 10).unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].payload["action_type"], "CREATE_NOTE");
    }
}
