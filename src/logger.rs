//! Operator-facing message log.
//!
//! Every rejected operation leaves exactly one `Error` entry here; informational entries record
//! what reached the server. Entries are mirrored to `tracing` so `RUST_LOG` sees the same
//! stream. Observers registered with [`AdminLogger::subscribe`] are told about new messages
//! and about changes to the pending action log.

use std::io::Write;

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Error,
}

impl MessageKind {
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Info => "INFO",
            MessageKind::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub kind: MessageKind,
    pub text: String,
    pub at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    MessageLogged(MessageKind),
    ActionsChanged,
    ActionsCleared,
}

pub type Observer = Box<dyn Fn(&LogEvent) + Send + Sync>;

#[derive(Default)]
pub struct AdminLogger {
    entries: Mutex<Vec<LogEntry>>,
    observers: RwLock<Vec<Observer>>,
}

impl std::fmt::Debug for AdminLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminLogger")
            .field("entries", &self.entries.lock().len())
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl AdminLogger {
    pub fn new() -> Self { Self::default() }

    pub fn info(&self, text: impl Into<String>) { self.push(MessageKind::Info, text.into()); }

    pub fn error(&self, text: impl Into<String>) { self.push(MessageKind::Error, text.into()); }

    fn push(&self, kind: MessageKind, text: String) {
        match kind {
            MessageKind::Info => info!(target: "mongoadmin::log", "{}", text),
            MessageKind::Error => error!(target: "mongoadmin::log", "{}", text),
        }
        self.entries.lock().push(LogEntry { kind, text, at: Local::now() });
        self.notify(LogEvent::MessageLogged(kind));
    }

    pub fn entries(&self) -> Vec<LogEntry> { self.entries.lock().clone() }

    pub fn entries_of(&self, kind: MessageKind) -> Vec<LogEntry> {
        self.entries.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    pub fn error_count(&self) -> usize { self.entries.lock().iter().filter(|e| e.kind == MessageKind::Error).count() }

    pub fn len(&self) -> usize { self.entries.lock().len() }

    pub fn is_empty(&self) -> bool { self.entries.lock().is_empty() }

    pub fn last(&self) -> Option<LogEntry> { self.entries.lock().last().cloned() }

    pub fn clear(&self) { self.entries.lock().clear(); }

    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&LogEvent) + Send + Sync + 'static,
    {
        self.observers.write().push(Box::new(observer));
    }

    pub fn notify(&self, event: LogEvent) {
        for observer in self.observers.read().iter() {
            observer(&event);
        }
    }

    /// Write `[HH:MM:SS] KIND text` lines, optionally restricted to one kind.
    pub fn print<W: Write>(&self, out: &mut W, only: Option<MessageKind>) -> std::io::Result<()> {
        for e in self.entries.lock().iter().filter(|e| only.map_or(true, |k| k == e.kind)) {
            writeln!(out, "[{}] {:<5} {}", e.at.format("%H:%M:%S"), e.kind.label(), e.text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn records_and_filters_by_kind() {
        let log = AdminLogger::new();
        log.info("connected");
        log.error("user 'bob' does not exist");
        log.info("synchronized");
        assert_eq!(log.len(), 3);
        assert_eq!(log.error_count(), 1);
        assert_eq!(log.entries_of(MessageKind::Info).len(), 2);
        assert_eq!(log.last().unwrap().text, "synchronized");
    }

    #[test]
    fn observers_see_each_event() {
        let log = AdminLogger::new();
        let messages = Arc::new(AtomicUsize::new(0));
        let actions = Arc::new(AtomicUsize::new(0));
        let (m, a) = (messages.clone(), actions.clone());
        log.subscribe(move |ev| match ev {
            LogEvent::MessageLogged(_) => { m.fetch_add(1, Ordering::SeqCst); }
            LogEvent::ActionsChanged | LogEvent::ActionsCleared => { a.fetch_add(1, Ordering::SeqCst); }
        });
        log.error("boom");
        log.notify(LogEvent::ActionsChanged);
        log.notify(LogEvent::ActionsCleared);
        assert_eq!(messages.load(Ordering::SeqCst), 1);
        assert_eq!(actions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn print_writes_one_line_per_entry() {
        let log = AdminLogger::new();
        log.info("a");
        log.error("b");
        let mut buf = Vec::new();
        log.print(&mut buf, None).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().ends_with("ERROR b"));

        let mut only_err = Vec::new();
        log.print(&mut only_err, Some(MessageKind::Error)).unwrap();
        assert_eq!(String::from_utf8(only_err).unwrap().lines().count(), 1);
    }
}
