use crate::audit::AuditDispatcher;
use crate::catalog::mission_in;
use crate::clock::Clock;
use crate::database::LedgerStore;
use crate::errors::{Result, WalletEngineError};
use crate::models::{
    ActivityRecord, Actor, AuditAction, EntryType, LedgerEntry, Mission, MissionStatus,
    MissionSubmission, Originator, Posting, ReviewDecision, ReviewSubmissionRequest,
    SubmissionStatus, SubmitMissionRequest, UserRole,
};
use crate::mutator::BalanceMutator;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub submission: MissionSubmission,
    /// Present only when the submission was approved.
    pub reward: Option<LedgerEntry>,
}

pub struct MissionService {
    store: Arc<LedgerStore>,
    mutator: Arc<BalanceMutator>,
    clock: Arc<dyn Clock>,
    audit: AuditDispatcher,
}

impl MissionService {
    pub fn new(
        store: Arc<LedgerStore>,
        mutator: Arc<BalanceMutator>,
        clock: Arc<dyn Clock>,
        audit: AuditDispatcher,
    ) -> Self {
        Self {
            store,
            mutator,
            clock,
            audit,
        }
    }

    pub async fn submit_mission(
        &self,
        actor: &Actor,
        request: SubmitMissionRequest,
    ) -> Result<MissionSubmission> {
        actor.require_role(&[UserRole::Mahasiswa], "submit missions")?;
        if request.content.trim().is_empty() && request.file_url.is_none() {
            return Err(WalletEngineError::Validation(
                "submission needs content or a file".to_string(),
            ));
        }

        let now = self.clock.now();
        let mission = sqlx::query_as::<_, Mission>("SELECT * FROM missions WHERE id = $1")
            .bind(request.mission_id)
            .fetch_optional(self.store.pool())
            .await?
            .ok_or_else(|| WalletEngineError::not_found("mission", request.mission_id))?;
        if mission.status != MissionStatus::Active {
            return Err(WalletEngineError::InvalidState(format!(
                "mission {} is not active",
                mission.id
            )));
        }
        if let Some(deadline) = mission.deadline {
            if now > deadline {
                return Err(WalletEngineError::Expired(
                    "mission deadline has passed".to_string(),
                ));
            }
        }

        let submission = sqlx::query_as::<_, MissionSubmission>(
            r#"
            INSERT INTO mission_submissions (mission_id, student_id, content, file_url, status, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(mission.id)
        .bind(actor.user_id)
        .bind(&request.content)
        .bind(&request.file_url)
        .bind(SubmissionStatus::Pending)
        .bind(now)
        .fetch_one(self.store.pool())
        .await
        .map_err(|e| {
            WalletEngineError::on_unique_violation(e, || {
                WalletEngineError::DuplicateOperation(format!(
                    "mission {} already submitted",
                    mission.id
                ))
            })
        })?;

        info!(
            "Student {} submitted mission {} (submission {})",
            actor.user_id, mission.id, submission.id
        );
        Ok(submission)
    }

    /// Approves or rejects a pending submission. Approval credits the
    /// mission's points to the student in the same unit of work.
    pub async fn review_submission(
        &self,
        actor: &Actor,
        submission_id: i64,
        request: ReviewSubmissionRequest,
    ) -> Result<ReviewOutcome> {
        actor.require_role(&[UserRole::Dosen, UserRole::Admin], "review submissions")?;
        if let Some(score) = request.score {
            if score < 0 {
                return Err(WalletEngineError::Validation(
                    "score cannot be negative".to_string(),
                ));
            }
        }

        let now = self.clock.now();
        let mut uow = self.store.begin().await?;

        let reviewed = sqlx::query_as::<_, MissionSubmission>(
            r#"
            UPDATE mission_submissions
            SET status = $1, score = $2, review_note = $3, reviewed_by = $4, reviewed_at = $5
            WHERE id = $6 AND status = $7
            RETURNING *
            "#,
        )
        .bind(request.decision.status())
        .bind(request.score)
        .bind(&request.note)
        .bind(actor.user_id)
        .bind(now)
        .bind(submission_id)
        .bind(SubmissionStatus::Pending)
        .fetch_optional(uow.conn())
        .await?;

        let submission = match reviewed {
            Some(submission) => submission,
            None => {
                let exists: Option<i64> =
                    sqlx::query_scalar("SELECT id FROM mission_submissions WHERE id = $1")
                        .bind(submission_id)
                        .fetch_optional(uow.conn())
                        .await?;
                let err = match exists {
                    Some(_) => WalletEngineError::InvalidState(format!(
                        "submission {} has already been reviewed",
                        submission_id
                    )),
                    None => WalletEngineError::not_found("submission", submission_id),
                };
                warn!("Review rejected: {}", err);
                return Err(err);
            }
        };

        let reward = match request.decision {
            ReviewDecision::Rejected => None,
            ReviewDecision::Approved => {
                let mission = mission_in(&mut uow, submission.mission_id).await?;
                let wallet = self
                    .store
                    .wallet_for_user_in(&mut uow, submission.student_id)
                    .await?
                    .ok_or_else(|| {
                        WalletEngineError::not_found("wallet for user", submission.student_id)
                    })?;

                let posting = Posting::new(
                    EntryType::Mission,
                    format!("Reward for mission: {}", mission.title),
                )
                .with_reference(mission.id)
                .by(Originator::Dosen);

                Some(
                    self.mutator
                        .credit(&mut uow, wallet.id, mission.points, posting)
                        .await?,
                )
            }
        };

        uow.commit().await?;

        self.audit.record(ActivityRecord {
            actor_id: actor.user_id,
            action: AuditAction::ReviewSubmission,
            entity: "MISSION_SUBMISSION".to_string(),
            entity_id: submission.id,
            detail: format!(
                "Submission {} {}{}",
                submission.id,
                submission.status,
                reward
                    .as_ref()
                    .map(|entry| format!(", rewarded {} points", entry.amount))
                    .unwrap_or_default()
            ),
            created_at: now,
        });
        info!(
            "Submission {} {} by user {}",
            submission.id, submission.status, actor.user_id
        );

        Ok(ReviewOutcome { submission, reward })
    }

    pub async fn submissions_for_mission(&self, mission_id: i64) -> Result<Vec<MissionSubmission>> {
        let submissions = sqlx::query_as::<_, MissionSubmission>(
            "SELECT * FROM mission_submissions WHERE mission_id = $1 ORDER BY id ASC",
        )
        .bind(mission_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(submissions)
    }
}
