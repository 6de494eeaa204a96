//! The per-app bounded log FIFO (spec.md §4.5).

use std::collections::VecDeque;
use std::sync::Mutex;

use apphost_protocol::{LogLevel, LogMessageDto};
use serde_json::Value;

use crate::bus::{EventBus, ListenerId};
use crate::format::format_message;

pub const DEFAULT_MAX_LEN: usize = 20;

#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    Log(LogMessageDto),
    Overflow(LogMessageDto),
    Clear(Vec<LogMessageDto>),
}

/// A bounded FIFO of formatted log messages with event fan-out.
///
/// `push` never blocks: exceeding `max_len` emits the oldest message on the
/// `overflow` key before evicting it, then the new message is emitted on
/// `log`. This ordering is the invariant in spec.md §5(iii): "`overflow` for
/// message M precedes any `log` for M's successor."
pub struct Console {
    queue: Mutex<VecDeque<LogMessageDto>>,
    max_len: usize,
    bus: EventBus<ConsoleEvent>,
}

impl Console {
    pub fn new(max_len: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(max_len)),
            max_len,
            bus: EventBus::new(),
        }
    }

    pub fn on(&self, key: &str, f: impl Fn(&ConsoleEvent) + Send + Sync + 'static) -> ListenerId {
        self.bus.on(key, f)
    }

    pub fn off(&self, key: &str, id: ListenerId) {
        self.bus.off(key, id);
    }

    fn push_message(&self, level: LogLevel, args: Vec<Value>) -> LogMessageDto {
        let html = format_message(&args);
        let message = LogMessageDto {
            level,
            message: args,
            error: matches!(level, LogLevel::Error),
            html,
            uuid: uuid::Uuid::new_v4().to_string(),
        };

        let evicted = {
            let mut queue = self.queue.lock().expect("console mutex poisoned");
            let evicted = if queue.len() >= self.max_len {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(message.clone());
            evicted
        };

        if let Some(evicted) = evicted {
            self.bus.emit("overflow", &ConsoleEvent::Overflow(evicted));
        }
        self.bus.emit("log", &ConsoleEvent::Log(message.clone()));
        message
    }

    pub fn log(&self, args: Vec<Value>) -> LogMessageDto {
        self.push_message(LogLevel::Log, args)
    }

    pub fn info(&self, args: Vec<Value>) -> LogMessageDto {
        self.push_message(LogLevel::Info, args)
    }

    pub fn warn(&self, args: Vec<Value>) -> LogMessageDto {
        self.push_message(LogLevel::Warn, args)
    }

    pub fn error(&self, args: Vec<Value>) -> LogMessageDto {
        self.push_message(LogLevel::Error, args)
    }

    /// Drop all buffered messages, emitting a `clear` event carrying the
    /// snapshot that was removed.
    pub fn clear(&self) {
        let snapshot: Vec<LogMessageDto> = {
            let mut queue = self.queue.lock().expect("console mutex poisoned");
            queue.drain(..).collect()
        };
        self.bus.emit("clear", &ConsoleEvent::Clear(snapshot));
    }

    /// Snapshot of the current backlog, oldest first.
    pub fn backlog(&self) -> Vec<LogMessageDto> {
        self.queue
            .lock()
            .expect("console mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("console mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn fifo_bound_is_enforced_and_overflow_precedes_successor_log() {
        let console = Console::new(2);
        let events: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let e1 = events.clone();
        let e2 = events.clone();
        console.on("overflow", move |ev| {
            if let ConsoleEvent::Overflow(m) = ev {
                e1.lock().unwrap().push(format!("overflow:{}", m.uuid));
            }
        });
        console.on("log", move |ev| {
            if let ConsoleEvent::Log(m) = ev {
                e2.lock().unwrap().push(format!("log:{}", m.uuid));
            }
        });

        let m1 = console.log(vec![json!("one")]);
        let m2 = console.log(vec![json!("two")]);
        let m3 = console.log(vec![json!("three")]);

        assert_eq!(console.len(), 2);
        let backlog = console.backlog();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].uuid, m2.uuid);
        assert_eq!(backlog[1].uuid, m3.uuid);

        let seen = events.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                format!("log:{}", m1.uuid),
                format!("log:{}", m2.uuid),
                format!("overflow:{}", m1.uuid),
                format!("log:{}", m3.uuid),
            ]
        );
    }

    #[test]
    fn clear_emits_snapshot_and_empties_queue() {
        let console = Console::new(5);
        console.log(vec![json!("a")]);
        console.log(vec![json!("b")]);

        let captured: Arc<StdMutex<Option<Vec<LogMessageDto>>>> = Arc::new(StdMutex::new(None));
        let captured2 = captured.clone();
        console.on("clear", move |ev| {
            if let ConsoleEvent::Clear(snapshot) = ev {
                *captured2.lock().unwrap() = Some(snapshot.clone());
            }
        });

        console.clear();
        assert!(console.is_empty());
        assert_eq!(captured.lock().unwrap().as_ref().unwrap().len(), 2);
    }

    #[test]
    fn uuids_are_unique_per_message() {
        let console = Console::new(10);
        let m1 = console.log(vec![json!("a")]);
        let m2 = console.log(vec![json!("b")]);
        assert_ne!(m1.uuid, m2.uuid);
    }

    #[test]
    fn error_level_sets_error_flag() {
        let console = Console::new(10);
        let m = console.error(vec![json!("boom")]);
        assert!(m.error);
        assert_eq!(m.level, LogLevel::Error);
    }
}
