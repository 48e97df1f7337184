//! Lobby State Reducer

use tracing::{debug, warn};

use super::protocol::{Lobby, LobbyEvent, Participant, QueueSnapshot};

/// Apply an incoming event to the current lobby.
///
/// Total: events that don't apply (no lobby yet, unknown participant, stale
/// revision) leave the state untouched. Only `LobbyCreated` and `LobbyJoined`
/// can move the state from `None` to `Some`.
pub fn reduce(current: Option<Lobby>, event: &LobbyEvent) -> Option<Lobby> {
    match event {
        LobbyEvent::LobbyCreated(snapshot) | LobbyEvent::LobbyJoined(snapshot) => {
            Some(replace_lobby(current, snapshot))
        }

        LobbyEvent::ParticipantJoined(participant) => current.map(|mut lobby| {
            upsert_participant(&mut lobby, participant.clone());
            lobby
        }),

        LobbyEvent::ParticipantLeft(participant) => current.map(|mut lobby| {
            lobby.participants.retain(|p| p.id != participant.id);
            lobby
        }),

        LobbyEvent::QueueUpdated(snapshot) => match current {
            Some(mut lobby) => {
                replace_queue(&mut lobby, snapshot);
                Some(lobby)
            }
            None => {
                warn!("Queue update received before joining a lobby, ignoring");
                None
            }
        },

        LobbyEvent::Welcome { .. } | LobbyEvent::LobbyError(_) => current,
    }
}

/// Transient message carried by an event, if any
pub fn side_message(event: &LobbyEvent) -> Option<&str> {
    match event {
        LobbyEvent::LobbyError(message) => Some(message),
        _ => None,
    }
}

fn replace_lobby(current: Option<Lobby>, snapshot: &Lobby) -> Lobby {
    if let Some(held) = current {
        if held.id == snapshot.id && is_stale(held.revision, snapshot.revision) {
            warn!(
                "Dropping stale snapshot of lobby {} (revision {:?} < {:?})",
                snapshot.id, snapshot.revision, held.revision
            );
            return held;
        }
    }
    snapshot.clone()
}

fn upsert_participant(lobby: &mut Lobby, participant: Participant) {
    lobby.participants.retain(|p| p.id != participant.id);
    lobby.participants.push(participant);
}

fn replace_queue(lobby: &mut Lobby, snapshot: &QueueSnapshot) {
    if is_stale(lobby.revision, snapshot.revision) {
        warn!(
            "Dropping stale queue of lobby {} (revision {:?} < {:?})",
            lobby.id, snapshot.revision, lobby.revision
        );
        return;
    }

    debug!(
        "Queue of lobby {} replaced: {} -> {} tracks",
        lobby.id,
        lobby.queue.len(),
        snapshot.queue.len()
    );
    lobby.queue = snapshot.queue.clone();
    if snapshot.revision.is_some() {
        lobby.revision = snapshot.revision;
    }
}

/// A snapshot is stale only when both sides are versioned and it goes backwards
fn is_stale(held: Option<u64>, incoming: Option<u64>) -> bool {
    matches!((held, incoming), (Some(held), Some(incoming)) if incoming < held)
}
