//! Topic naming convention.
//!
//! All topics are rooted at `{station}/radios/{radio}/cat`:
//!
//! | Suffix | Direction |
//! |---|---|
//! | `/setstate`, `/ping`, `/capsreq` | inbound |
//! | `/state`, `/caps`, `/pong`, `/log` | outbound |
//! | `/status` | outbound, retained |

/// Every topic the bridge publishes to or subscribes on for one radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub base: String,
    pub set_state: String,
    pub ping: String,
    pub caps_req: String,
    pub state: String,
    pub caps: String,
    pub pong: String,
    pub status: String,
    pub log: String,
}

impl TopicSet {
    pub fn new(station: &str, radio: &str) -> Self {
        let base = format!("{station}/radios/{radio}/cat");
        let topic = |suffix: &str| format!("{base}/{suffix}");
        Self {
            set_state: topic("setstate"),
            ping: topic("ping"),
            caps_req: topic("capsreq"),
            state: topic("state"),
            caps: topic("caps"),
            pong: topic("pong"),
            status: topic("status"),
            log: topic("log"),
            base,
        }
    }

    /// The inbound topics the transport must subscribe to.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.set_state.clone(),
            self.ping.clone(),
            self.caps_req.clone(),
        ]
    }
}
