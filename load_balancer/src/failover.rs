use std::time::Duration;

/// Number of times a failed request is sent again to the same backend server before giving up on
/// it.
pub const MAX_RETRIES: u32 = 3;

/// Number of times a request may fail over to another backend server.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause before sending a failed request again to the same backend server.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Progress of one inbound request through the backend servers. A new value is produced at every
/// step, the current one is never modified in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttemptState {
    /// Retries against the current backend server since the last failover.
    retries: u32,

    /// Failovers performed so far.
    attempts: u32,
}

/// What to do after a request failed on a backend server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failover {
    /// Wait for the backoff and send the request to the same backend server.
    RetrySame(AttemptState),

    /// Take the backend server out of the rotation and pick another one.
    NextPeer(AttemptState),
}

impl AttemptState {
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once the request has failed over more than MAX_ATTEMPTS times.
    pub fn exhausted(&self) -> bool {
        self.attempts > MAX_ATTEMPTS
    }

    /// Decides the next step after the request failed on its current backend server.
    pub fn on_failure(self) -> Failover {
        if self.retries < MAX_RETRIES {
            Failover::RetrySame(Self {
                retries: self.retries + 1,
                ..self
            })
        } else {
            Failover::NextPeer(Self {
                retries: 0,
                attempts: self.attempts + 1,
            })
        }
    }
}
