use uuid::Uuid;
use webrtc_pubsub_protocol::SessionId;

/// Returns a new random session id, to be shared with the peer out of band.
#[must_use]
pub fn get_random_session_id() -> SessionId {
    SessionId::new(Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_session_ids_differ() {
        assert_ne!(get_random_session_id(), get_random_session_id());
    }
}
