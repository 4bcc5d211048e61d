//! Канал диагностики.
//!
//! Все стадии конвейера (парсер, линкер, оптимизатор) сообщают о
//! предупреждениях и ошибках через [`DiagnosticSink`]. Конвейер
//! прерывается только на фатальных ошибках стадий, а не на сообщениях
//! уровня warning/info/debug.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Уровень важности сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Fatal,
    InternalError,
    Error,
    Warning,
    Info,
    Debug,
}

impl Severity {
    /// Фатальный класс: прерывает работу движка проходов.
    pub fn is_fatal_class(self) -> bool {
        matches!(self, Severity::Fatal | Severity::InternalError)
    }

    /// Ошибка любого уровня (включая фатальные).
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Severity::Fatal | Severity::InternalError | Severity::Error
        )
    }

    fn log_level(self) -> log::Level {
        match self {
            Severity::Fatal | Severity::InternalError | Severity::Error => log::Level::Error,
            Severity::Warning => log::Level::Warn,
            Severity::Info => log::Level::Info,
            Severity::Debug => log::Level::Debug,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Fatal => "fatal",
            Severity::InternalError => "internal error",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Одно диагностическое сообщение `(severity, source, line, message)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Источник: имя файла или модуля байткода.
    pub source: String,
    /// Строка в источнике (для байткода: индекс инструкции).
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        source: impl Into<String>,
        line: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            source: source.into(),
            line,
            message: message.into(),
        }
    }

    pub fn error(source: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, source, line, message)
    }

    pub fn warning(source: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, source, line, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}+{}: {}",
            self.severity, self.source, self.line, self.message
        )
    }
}

/// Получатель диагностических сообщений.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &mut S {
    fn report(&mut self, diagnostic: Diagnostic) {
        (**self).report(diagnostic);
    }
}

/// Упорядоченный журнал сообщений.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity.is_error())
    }

    /// Первая ошибка в журнале.
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.entries.iter().find(|d| d.severity.is_error())
    }

    /// Переслать все записи в другой получатель.
    pub fn forward_to(&self, sink: &mut dyn DiagnosticSink) {
        for entry in &self.entries {
            sink.report(entry.clone());
        }
    }

    /// Текст журнала в формате "info log": по строке на сообщение.
    pub fn info_log(&self) -> String {
        self.entries
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DiagnosticSink for DiagnosticLog {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }
}

/// Получатель, пересылающий сообщения в `log` с уровнем по важности.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        log::log!(diagnostic.severity.log_level(), "{}", diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_names() {
        assert_eq!(Severity::InternalError.to_string(), "internal error");
        assert_eq!(Severity::Debug.to_string(), "debug");
        assert!(Severity::Fatal.is_fatal_class());
        assert!(!Severity::Error.is_fatal_class());
        assert!(Severity::Error.is_error());
        assert!(!Severity::Warning.is_error());
    }

    #[test]
    fn test_log_collects_in_order() {
        let mut log = DiagnosticLog::new();
        log.report(Diagnostic::warning("a.frag", 1, "first"));
        log.report(Diagnostic::error("a.frag", 2, "second"));
        log.report(Diagnostic::error("a.frag", 3, "third"));

        assert_eq!(log.len(), 3);
        assert!(log.has_errors());
        assert_eq!(log.first_error().unwrap().message, "second");
        assert_eq!(
            log.info_log().lines().next().unwrap(),
            "[warning] a.frag+1: first"
        );
    }

    #[test]
    fn test_forwarding_through_reference() {
        let mut log = DiagnosticLog::new();
        fn push(mut sink: impl DiagnosticSink) {
            sink.report(Diagnostic::new(Severity::Info, "m", 0, "x"));
        }
        push(&mut log);
        push(&mut log);
        assert_eq!(log.len(), 2);
    }
}
