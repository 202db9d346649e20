use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

/// 由其他執行緒送往 MDI 的請求。 / Request marshalled to the thread owning the MDI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdiCommand {
    Show {
        id: String,
        activate: bool,
        /// Exportable datasource key.
        datasource: Option<String>,
    },
    Close {
        id: String,
        user_initiated: bool,
    },
    SetDatasource {
        id: String,
        datasource: String,
    },
    Forget {
        id: String,
    },
    /// Runs an interim save immediately.
    Flush,
}

/// 可跨執行緒傳遞的 MDI 代理。 / Cloneable, `Send` handle that queues commands.
///
/// Commands run in submission order on the next [`crate::Mdi::tick`].
#[derive(Debug, Clone)]
pub struct MdiHandle {
    tx: Sender<MdiCommand>,
}

impl MdiHandle {
    pub(crate) fn new(tx: Sender<MdiCommand>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the MDI has been dropped.
    pub fn send(&self, command: MdiCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn show(&self, id: impl Into<String>) -> bool {
        self.send(MdiCommand::Show {
            id: id.into(),
            activate: true,
            datasource: None,
        })
    }

    pub fn show_in_background(&self, id: impl Into<String>, datasource: Option<String>) -> bool {
        self.send(MdiCommand::Show {
            id: id.into(),
            activate: false,
            datasource,
        })
    }

    pub fn close(&self, id: impl Into<String>) -> bool {
        self.send(MdiCommand::Close {
            id: id.into(),
            user_initiated: true,
        })
    }
}

const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// 初始載入完成的閘門。 / Gate other threads wait on until the initial load finished.
#[derive(Debug, Clone)]
pub struct LoadGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
    timeout: Duration,
}

impl Default for LoadGate {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_LOAD_TIMEOUT)
    }
}

impl LoadGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate whose [`LoadGate::wait_default`] blocks for at most `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for the configured load timeout.
    pub fn wait_default(&self) -> bool {
        self.wait(self.timeout)
    }

    pub(crate) fn open(&self) {
        let (lock, condvar) = &*self.inner;
        if let Ok(mut loaded) = lock.lock() {
            *loaded = true;
            condvar.notify_all();
        }
    }

    pub fn is_open(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().map(|loaded| *loaded).unwrap_or(false)
    }

    /// 等待載入完成；逾時回傳 `false`。 / Blocks until loaded, returning `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let Ok(mut loaded) = lock.lock() else {
            return false;
        };
        while !*loaded {
            let now = Instant::now();
            if now >= deadline {
                warn!(timeout_ms = timeout.as_millis() as u64, "timed out waiting for MDI load");
                return false;
            }
            match condvar.wait_timeout(loaded, deadline - now) {
                Ok((guard, _)) => loaded = guard,
                Err(_) => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn wait_returns_once_opened_from_another_thread() {
        let gate = LoadGate::new();
        let opener = gate.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            opener.open();
        });
        assert!(gate.wait(Duration::from_secs(5)));
        worker.join().unwrap();
        assert!(gate.is_open());
    }

    #[test]
    fn wait_times_out_when_never_opened() {
        let gate = LoadGate::new();
        assert!(!gate.wait(Duration::from_millis(10)));
    }

    #[test]
    fn default_wait_uses_configured_timeout() {
        let gate = LoadGate::with_timeout(Duration::from_millis(15));
        assert_eq!(gate.clone().timeout(), Duration::from_millis(15));
        let started = Instant::now();
        assert!(!gate.wait_default());
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn handle_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let handle = MdiHandle::new(tx);
        assert!(handle.show("library"));
        assert_eq!(
            rx.try_recv().unwrap(),
            MdiCommand::Show {
                id: "library".into(),
                activate: true,
                datasource: None
            }
        );
        drop(rx);
        assert!(!handle.close("library"));
    }
}
