//! File system watching helpers with per-platform timings.

use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;

/// How long to wait around file system operations on the current platform.
pub struct PlatformTimeouts {
    /// Time for a write to turn into a watcher event.
    pub fs_event_propagation: Duration,
    /// Time for a freshly started watcher to register its directories.
    pub watcher_setup: Duration,
    /// Upper bound for a reload to be reported after a change.
    pub reload_notification_timeout: Duration,
}

impl PlatformTimeouts {
    pub fn for_current_platform() -> Self {
        #[cfg(target_os = "macos")]
        {
            Self {
                fs_event_propagation: Duration::from_millis(100),
                watcher_setup: Duration::from_millis(300),
                reload_notification_timeout: Duration::from_secs(5),
            }
        }

        #[cfg(target_os = "linux")]
        {
            Self {
                fs_event_propagation: Duration::from_millis(50),
                watcher_setup: Duration::from_millis(100),
                reload_notification_timeout: Duration::from_secs(3),
            }
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Self {
                fs_event_propagation: Duration::from_millis(200),
                watcher_setup: Duration::from_millis(300),
                reload_notification_timeout: Duration::from_secs(5),
            }
        }
    }
}

/// Writes `content` to `path` and gives the watcher time to see it.
pub async fn platform_aware_write<P: AsRef<Path>>(
    path: P,
    content: &str,
    timeouts: &PlatformTimeouts,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    fs::write(path, content).await?;

    #[cfg(target_os = "macos")]
    {
        if let Ok(file) = std::fs::OpenOptions::new().write(true).open(path) {
            let _ = file.sync_all();
        }
    }

    tokio::time::sleep(timeouts.fs_event_propagation).await;
    Ok(())
}

pub async fn wait_for_watcher_ready(timeouts: &PlatformTimeouts) {
    tokio::time::sleep(timeouts.watcher_setup).await;
}

/// Waits for the next reload outcome on `receiver`.
pub async fn wait_for_reload_notification<T>(
    receiver: &mut mpsc::Receiver<T>,
    timeouts: &PlatformTimeouts,
) -> Result<T, &'static str> {
    match tokio::time::timeout(timeouts.reload_notification_timeout, receiver.recv()).await {
        Ok(Some(notification)) => Ok(notification),
        Ok(None) => Err("Notification channel was closed"),
        Err(_) => Err("Timeout waiting for reload notification"),
    }
}

/// Drains reload outcomes until one satisfies `accept`, so that events from
/// a single save that produced several notifications do not confuse a test.
pub async fn wait_for_reload_matching<T, F>(
    receiver: &mut mpsc::Receiver<T>,
    timeouts: &PlatformTimeouts,
    mut accept: F,
) -> Result<T, &'static str>
where
    F: FnMut(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeouts.reload_notification_timeout;
    loop {
        match tokio::time::timeout_at(deadline, receiver.recv()).await {
            Ok(Some(notification)) if accept(&notification) => return Ok(notification),
            Ok(Some(_)) => continue,
            Ok(None) => return Err("Notification channel was closed"),
            Err(_) => return Err("Timeout waiting for reload notification"),
        }
    }
}

/// Replaces `path` through a rename, so the watcher never reads a half
/// written file.
pub async fn atomic_write<P: AsRef<Path>>(
    path: P,
    content: &str,
    timeouts: &PlatformTimeouts,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    let staging = path.with_extension("staging");
    fs::write(&staging, content).await?;
    fs::rename(&staging, path).await?;
    tokio::time::sleep(timeouts.fs_event_propagation).await;
    Ok(())
}
