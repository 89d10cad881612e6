use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    api::signaling::{PublishedEvent, ServerEvent},
    config::CallsConfig,
    error::{AppError, AppResult},
    models::{
        derive_duration, Call, CallStatus, CallType, Conversation, ConversationMember,
        ParticipantSet, User,
    },
    services::jitsi::JitsiService,
    storage::redis::RedisClient,
};

#[derive(Debug, Deserialize)]
pub struct InitiateCall {
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(default)]
    pub is_recorded: bool,
}

#[derive(Debug, Deserialize)]
pub struct JoinOptions {
    #[serde(default = "default_true")]
    pub audio_enabled: bool,
    #[serde(default)]
    pub video_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Everything a client needs to enter the bridge room.
#[derive(Debug, Serialize)]
pub struct RoomJoin {
    pub room_id: String,
    pub room_url: String,
    pub token: Option<String>,
    pub moderator: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

/// Owns the call lifecycle state machine and room provisioning. Event
/// fan-out to participants goes over per-user Redis channels; connected
/// gateway sockets pick them up.
pub struct CallsService {
    db: PgPool,
    redis: RedisClient,
    jitsi: JitsiService,
    config: CallsConfig,
}

impl CallsService {
    pub fn new(db: PgPool, redis: RedisClient, jitsi: JitsiService, config: CallsConfig) -> Self {
        Self {
            db,
            redis,
            jitsi,
            config,
        }
    }

    /// Create a call in RINGING state and notify every invited participant.
    pub async fn initiate_call(&self, user_id: Uuid, req: InitiateCall) -> AppResult<Call> {
        let participants = self.resolve_participants(user_id, &req).await?;

        let room_id = self.jitsi.generate_room_id();
        let room_url = self.jitsi.room_url(&room_id);

        let call: Call = sqlx::query_as(
            r#"
            INSERT INTO calls
                (id, initiator_id, conversation_id, call_type, status, participants,
                 jitsi_room_id, jitsi_room_url, is_recorded, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '{}'::jsonb)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(req.conversation_id)
        .bind(req.call_type)
        .bind(CallStatus::Ringing)
        .bind(&participants)
        .bind(&room_id)
        .bind(&room_url)
        .bind(req.is_recorded)
        .fetch_one(&self.db)
        .await?;

        self.notify_except(
            &call,
            user_id,
            ServerEvent::CallIncoming { call: call.clone() },
        )
        .await;

        tracing::info!("Call {} initiated by {} ({} invited)", call.id, user_id, participants.len());
        Ok(call)
    }

    /// Join is idempotent and open to any authenticated user holding the
    /// call id; invited or not, the caller lands on the participant list.
    pub async fn join_call(
        &self,
        call_id: Uuid,
        user_id: Uuid,
        opts: JoinOptions,
    ) -> AppResult<(Call, RoomJoin)> {
        let call = self.get_call_row(call_id).await?;
        if call.status.is_terminal() {
            return Err(AppError::CallAlreadyEnded);
        }

        let call = self.admit_participant(call, user_id).await?;
        let room_join = self
            .room_join(&call, user_id, opts.audio_enabled, opts.video_enabled)
            .await?;
        Ok((call, room_join))
    }

    /// Accept an incoming call. Same transition as join, but restricted to
    /// invited participants and announced to the rest of the call.
    pub async fn accept_call(&self, call_id: Uuid, user_id: Uuid) -> AppResult<(Call, RoomJoin)> {
        let call = self.get_call_row(call_id).await?;
        if !call.has_standing(user_id) {
            return Err(AppError::NotParticipant);
        }
        if call.status.is_terminal() {
            return Err(AppError::CallAlreadyEnded);
        }

        let call = self.admit_participant(call, user_id).await?;
        self.notify_except(&call, user_id, ServerEvent::CallAccepted { call_id, user_id })
            .await;

        let room_join = self.room_join(&call, user_id, true, false).await?;
        Ok((call, room_join))
    }

    /// Decline a ringing call. Only invited participants other than the
    /// initiator can decline.
    pub async fn reject_call(&self, call_id: Uuid, user_id: Uuid) -> AppResult<Call> {
        let call = self.get_call_row(call_id).await?;
        if !call.has_standing(user_id) {
            return Err(AppError::NotParticipant);
        }
        if call.is_initiator(user_id) {
            return Err(AppError::BadRequest(
                "Initiator cannot reject their own call".to_string(),
            ));
        }
        ensure_pre_ongoing(call.status)?;

        let call: Call = sqlx::query_as(
            r#"
            UPDATE calls
            SET status = $2, ended_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(call_id)
        .bind(CallStatus::Declined)
        .fetch_one(&self.db)
        .await?;

        self.notify_except(&call, user_id, ServerEvent::CallRejected { call_id, user_id })
            .await;
        Ok(call)
    }

    /// Terminal from any non-terminal state. Duration is the client's value
    /// when supplied, otherwise derived from the recorded timestamps.
    pub async fn end_call(
        &self,
        call_id: Uuid,
        user_id: Uuid,
        duration: Option<i32>,
    ) -> AppResult<Call> {
        let call = self.get_call_row(call_id).await?;
        if !call.has_standing(user_id) {
            return Err(AppError::NotParticipant);
        }
        if call.status.is_terminal() {
            return Err(AppError::CallAlreadyEnded);
        }

        let ended_at = Utc::now();
        let duration = duration
            .map(|d| d.max(0))
            .or_else(|| call.started_at.map(|s| derive_duration(s, ended_at)));

        let call: Call = sqlx::query_as(
            r#"
            UPDATE calls
            SET status = $2, ended_at = $3, duration = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(call_id)
        .bind(CallStatus::Ended)
        .bind(ended_at)
        .bind(duration)
        .fetch_one(&self.db)
        .await?;

        self.notify_except(
            &call,
            user_id,
            ServerEvent::CallEnded {
                call_id,
                user_id,
                duration: call.duration,
            },
        )
        .await;
        Ok(call)
    }

    /// Advisory client path; the sweeper below is the authoritative one.
    pub async fn mark_missed(&self, call_id: Uuid, user_id: Uuid) -> AppResult<Call> {
        let call = self.get_call_row(call_id).await?;
        if !call.has_standing(user_id) {
            return Err(AppError::NotParticipant);
        }
        ensure_pre_ongoing(call.status)?;

        let call = self.transition_to_missed(call_id).await?;
        self.notify_all(&call, ServerEvent::CallMissed { call_id }).await;
        Ok(call)
    }

    /// Server-owned ring expiry: any call still pre-ongoing past the ring
    /// timeout is marked missed. Run periodically from a background task.
    pub async fn expire_stale_ringing(&self) -> AppResult<Vec<Call>> {
        let expired: Vec<Call> = sqlx::query_as(
            r#"
            UPDATE calls
            SET status = $1, ended_at = NOW(), updated_at = NOW()
            WHERE status IN ($2, $3)
              AND created_at < NOW() - make_interval(secs => $4)
            RETURNING *
            "#,
        )
        .bind(CallStatus::Missed)
        .bind(CallStatus::Initiated)
        .bind(CallStatus::Ringing)
        .bind(self.config.ring_timeout.as_secs_f64())
        .fetch_all(&self.db)
        .await?;

        for call in &expired {
            tracing::info!("Call {} expired after ring timeout", call.id);
            self.notify_all(call, ServerEvent::CallMissed { call_id: call.id })
                .await;
        }
        Ok(expired)
    }

    pub async fn get_call(&self, call_id: Uuid, user_id: Uuid) -> AppResult<Call> {
        let call = self.get_call_row(call_id).await?;
        if !call.has_standing(user_id) {
            return Err(AppError::NotParticipant);
        }
        Ok(call)
    }

    pub async fn list_calls(&self, user_id: Uuid, limit: i64, offset: i64) -> AppResult<Vec<Call>> {
        let calls: Vec<Call> = sqlx::query_as(
            r#"
            SELECT * FROM calls
            WHERE $1 = ANY(participants)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(calls)
    }

    pub async fn list_missed(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Call>> {
        let calls: Vec<Call> = sqlx::query_as(
            r#"
            SELECT * FROM calls
            WHERE $1 = ANY(participants) AND status = $2
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(CallStatus::Missed)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(calls)
    }

    /// Attach a recording produced by the bridge after the call ended.
    pub async fn attach_recording(
        &self,
        call_id: Uuid,
        user_id: Uuid,
        recording_url: &str,
        metadata: Option<serde_json::Value>,
    ) -> AppResult<Call> {
        let call = self.get_call_row(call_id).await?;
        if !call.has_standing(user_id) {
            return Err(AppError::NotParticipant);
        }

        let call: Call = sqlx::query_as(
            r#"
            UPDATE calls
            SET recording_url = $2,
                metadata = metadata || COALESCE($3, '{}'::jsonb),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(call_id)
        .bind(recording_url)
        .bind(metadata)
        .fetch_one(&self.db)
        .await?;

        self.notify_all(
            &call,
            ServerEvent::RecordingAvailable {
                call_id,
                recording_url: recording_url.to_string(),
            },
        )
        .await;
        Ok(call)
    }

    // Internal helpers

    async fn get_call_row(&self, call_id: Uuid) -> AppResult<Call> {
        let call: Option<Call> = sqlx::query_as("SELECT * FROM calls WHERE id = $1")
            .bind(call_id)
            .fetch_optional(&self.db)
            .await?;
        call.ok_or(AppError::CallNotFound)
    }

    async fn resolve_participants(
        &self,
        initiator_id: Uuid,
        req: &InitiateCall,
    ) -> AppResult<ParticipantSet> {
        if let Some(conversation_id) = req.conversation_id {
            let conversation: Option<Conversation> =
                sqlx::query_as("SELECT * FROM conversations WHERE id = $1")
                    .bind(conversation_id)
                    .fetch_optional(&self.db)
                    .await?;
            if conversation.is_none() {
                return Err(AppError::ConversationNotFound);
            }

            let members: Vec<ConversationMember> = sqlx::query_as(
                "SELECT * FROM conversation_members WHERE conversation_id = $1 ORDER BY joined_at",
            )
            .bind(conversation_id)
            .fetch_all(&self.db)
            .await?;

            return Ok(ParticipantSet::with_initiator(
                initiator_id,
                members.into_iter().map(|m| m.user_id),
            ));
        }

        if req.participant_ids.is_empty() {
            return Err(AppError::BadRequest(
                "Either conversation_id or participant_ids is required".to_string(),
            ));
        }

        Ok(ParticipantSet::with_initiator(
            initiator_id,
            req.participant_ids.iter().copied(),
        ))
    }

    /// Adds the user to the participant list if absent and flips a
    /// pre-ongoing call to ONGOING, stamping started_at once.
    async fn admit_participant(&self, call: Call, user_id: Uuid) -> AppResult<Call> {
        let mut participants = call.participants.clone();
        participants.insert(user_id);

        let next_status = if call.status.is_pre_ongoing() {
            CallStatus::Ongoing
        } else {
            call.status
        };

        let call: Call = sqlx::query_as(
            r#"
            UPDATE calls
            SET status = $2,
                participants = $3,
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(call.id)
        .bind(next_status)
        .bind(&participants)
        .fetch_one(&self.db)
        .await?;
        Ok(call)
    }

    async fn room_join(
        &self,
        call: &Call,
        user_id: Uuid,
        audio_enabled: bool,
        video_enabled: bool,
    ) -> AppResult<RoomJoin> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        let user = user.ok_or(AppError::UserNotFound)?;

        let moderator = call.is_initiator(user_id);
        let token =
            self.jitsi
                .room_token(&call.jitsi_room_id, user_id, &user.display_name, moderator)?;

        Ok(RoomJoin {
            room_id: call.jitsi_room_id.clone(),
            room_url: call.jitsi_room_url.clone(),
            token,
            moderator,
            audio_enabled,
            video_enabled,
        })
    }

    async fn transition_to_missed(&self, call_id: Uuid) -> AppResult<Call> {
        let call: Call = sqlx::query_as(
            r#"
            UPDATE calls
            SET status = $2, ended_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(call_id)
        .bind(CallStatus::Missed)
        .fetch_one(&self.db)
        .await?;
        Ok(call)
    }

    /// Delivery is best effort: a failed publish to one participant is
    /// logged and the rest still get the event.
    async fn notify_all(&self, call: &Call, event: ServerEvent) {
        self.notify(call.participants.iter(), event).await;
    }

    async fn notify_except(&self, call: &Call, skip_user_id: Uuid, event: ServerEvent) {
        self.notify(
            call.participants.iter().filter(|id| *id != skip_user_id),
            event,
        )
        .await;
    }

    async fn notify(&self, participants: impl Iterator<Item = Uuid>, event: ServerEvent) {
        // No origin: service-published events have no gateway socket of
        // their own, so every instance forwards them.
        let published = PublishedEvent {
            origin: None,
            event,
        };
        let msg = match serde_json::to_string(&published) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!("Failed to encode call event: {}", err);
                return;
            }
        };
        for participant_id in participants {
            if let Err(err) = self
                .redis
                .publish_event(&participant_id.to_string(), &msg)
                .await
            {
                tracing::warn!("Failed to notify {}: {}", participant_id, err);
            }
        }
    }
}

/// Guards transitions that only make sense before anyone picked up.
/// Terminal calls and in-progress calls fail with distinct errors.
fn ensure_pre_ongoing(status: CallStatus) -> AppResult<()> {
    if status.is_terminal() {
        return Err(AppError::CallAlreadyEnded);
    }
    if !status.is_pre_ongoing() {
        return Err(AppError::BadRequest(
            "Call is already in progress".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initiate_request_defaults() {
        let req: InitiateCall =
            serde_json::from_value(json!({ "type": "video", "participant_ids": [Uuid::new_v4()] }))
                .unwrap();
        assert_eq!(req.call_type, CallType::Video);
        assert!(!req.is_recorded);
        assert!(req.conversation_id.is_none());
        assert_eq!(req.participant_ids.len(), 1);
    }

    #[test]
    fn join_options_default_to_audio_only() {
        let opts: JoinOptions = serde_json::from_value(json!({})).unwrap();
        assert!(opts.audio_enabled);
        assert!(!opts.video_enabled);
    }

    #[test]
    fn pre_ongoing_guard_distinguishes_in_progress_from_ended() {
        assert!(ensure_pre_ongoing(CallStatus::Initiated).is_ok());
        assert!(ensure_pre_ongoing(CallStatus::Ringing).is_ok());
        assert!(matches!(
            ensure_pre_ongoing(CallStatus::Ongoing),
            Err(AppError::BadRequest(msg)) if msg == "Call is already in progress"
        ));
        for status in [CallStatus::Ended, CallStatus::Declined, CallStatus::Missed] {
            assert!(matches!(
                ensure_pre_ongoing(status),
                Err(AppError::CallAlreadyEnded)
            ));
        }
    }

    #[test]
    fn service_events_carry_no_origin_and_forward_everywhere() {
        let published = PublishedEvent {
            origin: None,
            event: ServerEvent::CallMissed {
                call_id: Uuid::new_v4(),
            },
        };
        assert!(published.should_forward(Uuid::new_v4()));

        let encoded = serde_json::to_string(&published).unwrap();
        let decoded: PublishedEvent = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.origin.is_none());
    }
}
