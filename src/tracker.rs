use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use time::OffsetDateTime;
use tracing::warn;

use crate::config::Config;
use crate::store::PresenceStore;
use crate::throttle::ThrottleMap;

/// Anything resolvable to a presence id. Primitive ids pass through; richer
/// user types implement the accessor themselves. `None` means the caller has
/// no identity and every tracker operation becomes a no-op or `false`.
pub trait UserId {
    fn user_id(&self) -> Option<String>;
}

macro_rules! impl_user_id_for_int {
    ($($t:ty),*) => {
        $(impl UserId for $t {
            fn user_id(&self) -> Option<String> {
                Some(self.to_string())
            }
        })*
    };
}

impl_user_id_for_int!(u32, u64, i32, i64, usize);

impl UserId for str {
    fn user_id(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl UserId for String {
    fn user_id(&self) -> Option<String> {
        self.as_str().user_id()
    }
}

impl<T: UserId> UserId for Option<T> {
    fn user_id(&self) -> Option<String> {
        self.as_ref().and_then(UserId::user_id)
    }
}

impl<T: UserId + ?Sized> UserId for &T {
    fn user_id(&self) -> Option<String> {
        (**self).user_id()
    }
}

/// Records and queries who is online. One presence key per user lives in the
/// store; this type owns the in-process throttle map for its lifetime.
///
/// Every method absorbs store faults: presence is auxiliary and must never
/// fail the request it rides on.
pub struct Tracker {
    store: Arc<dyn PresenceStore>,
    throttle: ThrottleMap,
    namespace: String,
    ttl: Duration,
}

impl Tracker {
    pub fn new(config: &Config, store: Arc<dyn PresenceStore>) -> Self {
        Self {
            store,
            throttle: ThrottleMap::new(config.throttle()),
            namespace: config.namespace.clone(),
            ttl: config.ttl(),
        }
    }

    /// Mark `user` online, refreshing the key's TTL. Skipped entirely while
    /// the user is throttled. The throttle entry only advances after a
    /// successful write, so a transient store outage self-heals on the next
    /// call instead of going quiet for a full window.
    pub async fn track<U: UserId + ?Sized>(&self, user: &U) {
        let Some(uid) = user.user_id() else { return };
        if self.throttle.is_throttled(&uid) {
            return;
        }
        let key = self.presence_key(&uid);
        let now = OffsetDateTime::now_utc().unix_timestamp().to_string();
        match self.store.set_with_expiry(&key, &now, self.ttl).await {
            Ok(()) => self.throttle.mark_written(&uid),
            Err(err) => warn!("presence write failed for {uid}: {err}"),
        }
    }

    /// Mark `user` offline right away. The delete is best-effort; if it is
    /// lost, the TTL still converges the key to gone. Clearing the throttle
    /// lets the user reappear on their very next heartbeat.
    pub async fn offline<U: UserId + ?Sized>(&self, user: &U) {
        let Some(uid) = user.user_id() else { return };
        if let Err(err) = self.store.delete(&self.presence_key(&uid)).await {
            warn!("presence delete failed for {uid}: {err}");
        }
        self.throttle.clear(&uid);
    }

    /// Whether the presence key currently exists. An unreachable store reads
    /// as offline rather than erroring.
    pub async fn online<U: UserId + ?Sized>(&self, user: &U) -> bool {
        let Some(uid) = user.user_id() else {
            return false;
        };
        match self.store.exists(&self.presence_key(&uid)).await {
            Ok(found) => found,
            Err(err) => {
                warn!("presence lookup failed for {uid}: {err}");
                false
            }
        }
    }

    /// Lazy stream of online user ids, in unspecified scan order. Lets large
    /// fleets be consumed incrementally.
    pub fn user_id_stream(&self) -> BoxStream<'static, String> {
        let prefix = format!("{}:", self.namespace);
        let strip = prefix.clone();
        self.store
            .scan_prefix(&prefix)
            .filter_map(move |key| {
                let id = key.strip_prefix(strip.as_str()).map(str::to_string);
                async move { id }
            })
            .boxed()
    }

    pub async fn user_ids(&self) -> Vec<String> {
        self.user_id_stream().collect().await
    }

    pub async fn count(&self) -> usize {
        self.user_id_stream().count().await
    }

    /// Resolve the online ids to full records via a caller-supplied loader.
    /// The tracker's only contribution is the id list.
    pub async fn users<T, F, Fut>(&self, loader: F) -> T
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = T>,
    {
        loader(self.user_ids().await).await
    }

    fn presence_key(&self, uid: &str) -> String {
        format!("{}:{}", self.namespace, uid)
    }
}
