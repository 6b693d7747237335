//! Pusher endpoints: `POST /pushers/set` and `GET /pushers`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use vx_core::constants::{MAX_PUSH_TAG_LEN, PUSH_TAG_PREFIX};
use vx_core::error::VxResult;

use crate::client::ApiClient;

/// Pusher `data` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PusherData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A pusher as listed by the home server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pusher {
    pub pushkey: String,
    #[serde(default)]
    pub kind: Option<String>,
    pub app_id: String,
    #[serde(default)]
    pub app_display_name: String,
    #[serde(default)]
    pub device_display_name: String,
    #[serde(default)]
    pub profile_tag: Option<String>,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub data: PusherData,
}

#[derive(Debug, Deserialize)]
struct PushersResponse {
    #[serde(default)]
    pushers: Vec<Pusher>,
}

/// Parameters of one HTTP pusher for this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpPusher {
    pub pushkey: String,
    pub app_id: String,
    pub profile_tag: String,
    pub lang: String,
    pub app_display_name: String,
    pub device_display_name: String,
    pub url: String,
    /// Keep pushers other apps or sessions registered with the same key.
    pub append: bool,
    /// Ask the gateway to relay only event ids, never content.
    pub event_id_only: bool,
}

impl HttpPusher {
    pub const EVENT_ID_ONLY: &'static str = "event_id_only";

    /// Request body for `pushers/set`. A `None` kind deletes the pusher.
    pub fn to_body(&self, kind: Option<&str>) -> Value {
        let data = PusherData {
            url: Some(self.url.clone()),
            format: self.event_id_only.then(|| Self::EVENT_ID_ONLY.to_string()),
        };
        json!({
            "pushkey": self.pushkey,
            "kind": kind,
            "app_id": self.app_id,
            "app_display_name": self.app_display_name,
            "device_display_name": self.device_display_name,
            "profile_tag": self.profile_tag,
            "lang": self.lang,
            "data": data,
            "append": self.append,
        })
    }
}

/// Pusher operations against one session's home server.
#[async_trait]
pub trait PusherApi: Send + Sync {
    /// Owner of the session.
    fn user_id(&self) -> &str;

    async fn add_http_pusher(&self, pusher: &HttpPusher) -> VxResult<()>;

    /// Remove a pusher. A missing pusher surfaces as `VxError::NotFound`.
    async fn remove_http_pusher(&self, pusher: &HttpPusher) -> VxResult<()>;

    async fn get_pushers(&self) -> VxResult<Vec<Pusher>>;
}

#[async_trait]
impl PusherApi for ApiClient {
    fn user_id(&self) -> &str {
        self.session_user_id()
    }

    async fn add_http_pusher(&self, pusher: &HttpPusher) -> VxResult<()> {
        self.post("/pushers/set", &pusher.to_body(Some("http"))).await?;
        info!("pusher set for {} (append={})", self.session_user_id(), pusher.append);
        Ok(())
    }

    async fn remove_http_pusher(&self, pusher: &HttpPusher) -> VxResult<()> {
        self.post("/pushers/set", &pusher.to_body(None)).await?;
        info!("pusher removed for {}", self.session_user_id());
        Ok(())
    }

    async fn get_pushers(&self) -> VxResult<Vec<Pusher>> {
        let resp: PushersResponse = self.get_json("/pushers").await?;
        debug!("{} lists {} pushers", self.session_user_id(), resp.pushers.len());
        Ok(resp.pushers)
    }
}

/// `String.hashCode()` over UTF-16 code units, as stored tags were produced with it.
fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Per-session pusher profile tag.
///
/// `mobile_<|hash(user_id)|>`, re-hashed when it would exceed the length bound.
pub fn push_tag(user_id: &str) -> String {
    let tag = format!("{PUSH_TAG_PREFIX}_{}", string_hash(user_id).wrapping_abs());
    if tag.len() > MAX_PUSH_TAG_LEN {
        string_hash(&tag).wrapping_abs().to_string()
    } else {
        tag
    }
}
