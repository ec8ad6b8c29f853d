//! Participant join/leave and host-moderation ops (kick/ban). Removal is
//! soft: mark inactive, keep the record around for the leaderboard and
//! audit trail rather than deleting it outright.

use super::AppState;
use crate::audit::AuditEvent;
use crate::error::{CoreError, CoreResult};
use crate::protocol::{LobbyParticipant, ServerMessage};
use crate::types::*;

impl AppState {
    /// Assemble the `lobby_state` roster (§6 "Events — server → client";
    /// received by big screen + participants). Built fresh on demand rather
    /// than cached, since the roster changes on every join/kick/ban.
    pub async fn lobby_state(&self, session_id: &str) -> Option<ServerMessage> {
        let session = self.get_session(session_id).await?;
        let participants: Vec<LobbyParticipant> = self
            .participants
            .read()
            .await
            .values()
            .filter(|p| p.session_id == session_id && p.is_active)
            .map(|p| LobbyParticipant { participant_id: p.id.clone(), nickname: p.nickname.clone() })
            .collect();
        Some(ServerMessage::LobbyState {
            session_id: session_id.to_string(),
            join_code: session.join_code,
            participant_count: session.participant_count,
            participants,
            allow_late_joiners: session.allow_late_joiners,
        })
    }

    /// A participant joins via join code. Create and register happen in one
    /// call; there is no separate anonymous-token pre-registration step.
    pub async fn join_session(&self, join_code: &str, nickname: String, ip: String) -> CoreResult<(Session, Participant)> {
        let session_id = self.session_id_for_join_code(join_code).await.ok_or(CoreError::SessionNotFound)?;
        let session = self.get_session(&session_id).await.ok_or(CoreError::SessionNotFound)?;

        if session.state == SessionState::Ended {
            return Err(CoreError::SessionEnded);
        }
        if session.banned_ips.contains(&ip) {
            return Err(CoreError::ParticipantBanned);
        }
        if session.state != SessionState::Lobby && !session.allow_late_joiners {
            return Err(CoreError::InvalidState);
        }

        let now = crate::now_ms();
        let mut participant = Participant::new(ulid::Ulid::new().to_string(), session_id.clone(), nickname.clone(), ip, now);
        // Late joiner spectator rule (§4.D [AMBIENT]): active=true, spectator
        // until the next begin-question routine runs.
        if session.state == SessionState::ActiveQuestion {
            participant.is_spectator = true;
        }
        self.participants.write().await.insert(participant.id.clone(), participant.clone());

        let updated = self
            .mutate_session(&session_id, |s| {
                s.active_participants.insert(participant.id.clone());
                s.participant_count += 1;
            })
            .await
            .ok_or(CoreError::SessionNotFound)?;

        if let Some(channels) = self.channels_for(&session_id).await {
            channels.broadcast_to_session(ServerMessage::ParticipantJoined {
                participant_id: participant.id.clone(),
                nickname: nickname.clone(),
                participant_count: updated.participant_count,
                timestamp: now,
            });
            // Big screen and participants also get the refreshed roster
            // (§4.C `lobby_state` receivers), not just the join event.
            if let Some(lobby_state) = self.lobby_state(&session_id).await {
                channels.publish_to_bigscreen(lobby_state.clone());
                channels.publish_to_participants(lobby_state);
            }
        }

        self.audit
            .record(
                AuditEvent::ParticipantJoined,
                Some(session_id.clone()),
                Some(participant.id.clone()),
                None,
                serde_json::json!({"nickname": nickname}),
            )
            .await;

        Ok((updated, participant))
    }

    /// All participants currently recorded for a session (§4.C `lobby_state`
    /// roster; unordered beyond insertion order of the underlying map).
    pub async fn list_participants(&self, session_id: &str) -> Vec<Participant> {
        self.participants.read().await.values().filter(|p| p.session_id == session_id).cloned().collect()
    }

    /// Record a client-reported focus-monitoring event (§6 `focus_lost` /
    /// `focus_regained`). Exam mode's `focusMonitoringEnabled` flag gates
    /// whether a proctoring UI surfaces these; the core itself only needs to
    /// keep the audit trail (§9 resolved Open Question: no dedicated wire
    /// event carries this onward, it is telemetry for the audit log).
    pub async fn record_focus_event(&self, session_id: &str, participant_id: &str, event: AuditEvent, details: serde_json::Value) {
        self.audit.record(event, Some(session_id.to_string()), Some(participant_id.to_string()), None, details).await;
    }

    /// Clear spectator status for all non-eliminated participants at a
    /// question boundary (§4.D [AMBIENT] late joiner spectator rule).
    pub(crate) async fn clear_spectator_status_for_session(&self, session_id: &str) {
        let mut participants = self.participants.write().await;
        for p in participants.values_mut() {
            if p.session_id == session_id && p.is_spectator && !p.is_eliminated {
                p.is_spectator = false;
            }
        }
    }

    async fn remove_participant(&self, session_id: &str, participant_id: &str, reason: String, banned: bool) -> CoreResult<()> {
        let mut participants = self.participants.write().await;
        let participant = participants.get_mut(participant_id).ok_or(CoreError::ParticipantNotFound)?;
        if participant.session_id != session_id {
            return Err(CoreError::ParticipantNotFound);
        }
        participant.is_active = false;
        if banned {
            participant.is_banned = true;
        }
        let ip = participant.ip.clone();
        drop(participants);

        self.mutate_session(session_id, |s| {
            s.active_participants.remove(participant_id);
            s.participant_count = s.participant_count.saturating_sub(1);
            if banned {
                s.banned_ips.insert(ip);
            }
        })
        .await;

        if let Some(channels) = self.channels_for(session_id).await {
            let message = if banned {
                ServerMessage::Banned { reason: reason.clone(), message: "You have been banned from this session".into(), timestamp: crate::now_ms() }
            } else {
                ServerMessage::Kicked { reason: reason.clone(), message: "You have been removed from this session".into(), timestamp: crate::now_ms() }
            };
            channels.publish_to_participant(&participant_id.to_string(), message).await;
            channels.broadcast_to_session(ServerMessage::ParticipantLeft { participant_id: participant_id.to_string(), reason });
            if let Some(lobby_state) = self.lobby_state(session_id).await {
                channels.publish_to_bigscreen(lobby_state.clone());
                channels.publish_to_participants(lobby_state);
            }
        }
        Ok(())
    }

    /// `kick_participant` (§4.D table).
    pub async fn kick_participant(&self, session_id: &str, host_id: &str, participant_id: &str, reason: String) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        if session.host_id != host_id {
            return Err(CoreError::InvalidRequest("caller is not this session's controller".into()));
        }
        self.remove_participant(session_id, participant_id, reason, false).await?;
        self.audit
            .record(AuditEvent::ParticipantKicked, Some(session_id.to_string()), Some(participant_id.to_string()), None, serde_json::json!({}))
            .await;
        Ok(())
    }

    /// `ban_participant` (§4.D table).
    pub async fn ban_participant(&self, session_id: &str, host_id: &str, participant_id: &str, reason: String) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        if session.host_id != host_id {
            return Err(CoreError::InvalidRequest("caller is not this session's controller".into()));
        }
        self.remove_participant(session_id, participant_id, reason, true).await?;
        self.audit
            .record(AuditEvent::ParticipantBanned, Some(session_id.to_string()), Some(participant_id.to_string()), None, serde_json::json!({}))
            .await;
        Ok(())
    }
}
