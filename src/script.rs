//! Renders the browser heartbeat script from configuration. The script's
//! behavior mirrors `heartbeat::HeartbeatMachine` transition for transition:
//! heartbeats go out as keep-alive fetches, the final offline signal as a
//! beacon that survives page teardown.

/// Placeholder-based template. The host page may also render this server-side
/// to inject a framework anti-forgery token; we default it to empty.
const TEMPLATE: &str = r#"(function() {
  'use strict';
  var heartbeatUrl = '__HEARTBEAT_URL__';
  var offlineUrl = '__OFFLINE_URL__';
  var csrfToken = '__CSRF_TOKEN__';
  var heartbeatInterval = __INTERVAL_MS__;
  var heartbeatTimer = null;
  var isPageVisible = true;
  var isNavigating = false;

  function isVisible() {
    if (typeof document.hidden !== 'undefined') {
      return !document.hidden;
    }
    return true;
  }

  function tokenBody() {
    var form = new FormData();
    if (csrfToken) {
      form.append('authenticity_token', csrfToken);
    }
    return form;
  }

  function sendHeartbeat() {
    if (!isPageVisible || isNavigating) return;
    fetch(heartbeatUrl, {
      method: 'POST',
      body: tokenBody(),
      credentials: 'same-origin',
      keepalive: true
    }).catch(function() {});
  }

  function markOffline() {
    if (isNavigating) return;
    if (navigator.sendBeacon) {
      navigator.sendBeacon(offlineUrl, tokenBody());
    } else {
      fetch(offlineUrl, {
        method: 'POST',
        body: tokenBody(),
        credentials: 'same-origin',
        keepalive: true
      }).catch(function() {});
    }
  }

  function startHeartbeat() {
    stopHeartbeat();
    heartbeatTimer = setInterval(sendHeartbeat, heartbeatInterval);
  }

  function stopHeartbeat() {
    if (heartbeatTimer) {
      clearInterval(heartbeatTimer);
      heartbeatTimer = null;
    }
  }

  function goActive() {
    isPageVisible = true;
    sendHeartbeat();
    startHeartbeat();
  }

  function goHidden() {
    isPageVisible = false;
    stopHeartbeat();
    markOffline();
  }

  document.addEventListener('visibilitychange', function() {
    if (isVisible()) {
      goActive();
    } else {
      goHidden();
    }
  });

  window.addEventListener('focus', function() {
    if (!isPageVisible) goActive();
  });

  window.addEventListener('blur', function() {
    if (isPageVisible) goHidden();
  });

  document.addEventListener('click', function(e) {
    var link = e.target.closest('a');
    if (link && link.href && !link.target) {
      isNavigating = true;
    }
  }, true);

  window.addEventListener('pagehide', function() {
    stopHeartbeat();
    markOffline();
  });

  window.addEventListener('pageshow', function() {
    setTimeout(function() {
      isNavigating = false;
      if (isVisible()) {
        goActive();
      }
    }, 100);
  });

  if (isVisible()) {
    goActive();
  } else {
    isPageVisible = false;
  }
})();
"#;

/// Substitute endpoint URLs, interval and token into the template.
pub fn render(heartbeat_url: &str, offline_url: &str, interval_ms: u64, csrf_token: &str) -> String {
    TEMPLATE
        .replace("__HEARTBEAT_URL__", heartbeat_url)
        .replace("__OFFLINE_URL__", offline_url)
        .replace("__INTERVAL_MS__", &interval_ms.to_string())
        .replace("__CSRF_TOKEN__", csrf_token)
}
