use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

pub const ALARM_NAME: &str = "poll-unread";

/// Named recurring timers.
pub trait AlarmScheduler: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    /// Create `name`, replacing any alarm with the same name.
    fn create(&self, name: &str, period: Duration);
}

struct AlarmHandle {
    period: Duration,
    // dropping the sender stops the alarm thread
    _stop: Sender<()>,
}

/// One thread per alarm; each tick sends the alarm name down a channel.
pub struct ThreadAlarms {
    ticks: Sender<String>,
    alarms: Mutex<HashMap<String, AlarmHandle>>,
}

impl ThreadAlarms {
    pub fn new() -> (Self, Receiver<String>) {
        let (ticks, rx) = mpsc::channel();
        (
            Self {
                ticks,
                alarms: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    pub fn period(&self, name: &str) -> Option<Duration> {
        self.alarms.lock().ok()?.get(name).map(|a| a.period)
    }
}

impl AlarmScheduler for ThreadAlarms {
    fn exists(&self, name: &str) -> bool {
        self.alarms
            .lock()
            .map(|m| m.contains_key(name))
            .unwrap_or(false)
    }

    fn create(&self, name: &str, period: Duration) {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let ticks = self.ticks.clone();
        let alarm_name = name.to_string();

        thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if ticks.send(alarm_name.clone()).is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        });

        log::info!("Alarm {name} every {}s", period.as_secs());
        if let Ok(mut m) = self.alarms.lock() {
            m.insert(
                name.to_string(),
                AlarmHandle {
                    period,
                    _stop: stop_tx,
                },
            );
        }
    }
}
