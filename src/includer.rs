//! Разрешение директив `#include`.
//!
//! Includer: чистый коллаборатор поиска: по имени заголовка и пути
//! включающего файла возвращает текст заголовка или «не найдено».
//! Ошибки ввода-вывода уходят в канал диагностики и превращаются в
//! «не найдено», парсер никогда не получает исключение.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::diagnostic::{Diagnostic, DiagnosticSink};

/// Содержимое найденного заголовка.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeResult {
    /// Имя заголовка, как оно записано в директиве.
    pub header_name: String,
    /// Разрешённый путь к файлу.
    pub path: PathBuf,
    /// Байты файла.
    pub data: Vec<u8>,
}

impl IncludeResult {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Текст заголовка (некорректный UTF-8 заменяется).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Интерфейс поиска заголовков.
pub trait Includer {
    /// `#include <name>`: поиск по настроенным каталогам по порядку.
    fn include_system(
        &mut self,
        header_name: &str,
        includer_name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> Option<IncludeResult>;

    /// `#include "name"`: поиск относительно каталога включающего файла.
    fn include_local(
        &mut self,
        header_name: &str,
        includer_name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> Option<IncludeResult>;

    /// Освободить результат после того, как парсер его прочитал.
    fn release(&mut self, result: IncludeResult) {
        drop(result);
    }
}

// === Файловая система ===

/// Includer поверх файловой системы.
#[derive(Debug, Clone, Default)]
pub struct FileIncluder {
    search_dirs: Vec<PathBuf>,
}

impl FileIncluder {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    fn read(header_name: &str, path: &Path) -> std::io::Result<IncludeResult> {
        let data = fs::read(path)?;
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(IncludeResult {
            header_name: header_name.to_string(),
            path,
            data,
        })
    }
}

impl Includer for FileIncluder {
    fn include_system(
        &mut self,
        header_name: &str,
        includer_name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> Option<IncludeResult> {
        for dir in &self.search_dirs {
            let path = dir.join(header_name);
            let Ok(info) = fs::metadata(&path) else {
                continue;
            };
            if !info.is_file() || info.len() == 0 {
                continue;
            }
            match Self::read(header_name, &path) {
                Ok(result) => {
                    log::trace!("include <{}> -> {}", header_name, result.path.display());
                    return Some(result);
                }
                Err(e) => sink.report(Diagnostic::error(
                    includer_name,
                    0,
                    format!("{}: {}", path.display(), e),
                )),
            }
        }
        None
    }

    fn include_local(
        &mut self,
        header_name: &str,
        includer_name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> Option<IncludeResult> {
        let base = Path::new(includer_name)
            .parent()
            .unwrap_or_else(|| Path::new(""));
        let path = base.join(header_name);

        let info = match fs::metadata(&path) {
            Ok(info) => info,
            Err(_) => {
                sink.report(Diagnostic::error(
                    includer_name,
                    0,
                    format!("failed to retrieve file statistics for {}", path.display()),
                ));
                return None;
            }
        };
        if !info.is_file() || info.len() == 0 {
            sink.report(Diagnostic::error(
                includer_name,
                0,
                format!("{} is not a valid file", path.display()),
            ));
            return None;
        }

        match Self::read(header_name, &path) {
            Ok(result) => {
                log::trace!("include \"{}\" -> {}", header_name, result.path.display());
                Some(result)
            }
            Err(e) => {
                sink.report(Diagnostic::error(includer_name, 0, e.to_string()));
                None
            }
        }
    }
}

// === Память ===

/// Includer над таблицами в памяти (хосты без файловой системы, тесты).
#[derive(Debug, Clone, Default)]
pub struct MemoryIncluder {
    system: Vec<(PathBuf, HashMap<String, String>)>,
    local: HashMap<PathBuf, String>,
}

impl MemoryIncluder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить файл, доступный по относительному пути.
    pub fn add_file(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> &mut Self {
        self.local.insert(path.into(), text.into());
        self
    }

    /// Добавить заголовок в системный каталог `dir` (каталоги упорядочены).
    pub fn add_system(
        &mut self,
        dir: impl Into<PathBuf>,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> &mut Self {
        let dir = dir.into();
        match self.system.iter_mut().find(|(d, _)| *d == dir) {
            Some((_, files)) => {
                files.insert(name.into(), text.into());
            }
            None => {
                let mut files = HashMap::new();
                files.insert(name.into(), text.into());
                self.system.push((dir, files));
            }
        }
        self
    }
}

impl Includer for MemoryIncluder {
    fn include_system(
        &mut self,
        header_name: &str,
        _includer_name: &str,
        _sink: &mut dyn DiagnosticSink,
    ) -> Option<IncludeResult> {
        self.system.iter().find_map(|(dir, files)| {
            files
                .get(header_name)
                .filter(|text| !text.is_empty())
                .map(|text| IncludeResult {
                    header_name: header_name.to_string(),
                    path: dir.join(header_name),
                    data: text.as_bytes().to_vec(),
                })
        })
    }

    fn include_local(
        &mut self,
        header_name: &str,
        includer_name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> Option<IncludeResult> {
        let base = Path::new(includer_name)
            .parent()
            .unwrap_or_else(|| Path::new(""));
        let path = base.join(header_name);
        match self.local.get(&path).filter(|text| !text.is_empty()) {
            Some(text) => Some(IncludeResult {
                header_name: header_name.to_string(),
                path,
                data: text.as_bytes().to_vec(),
            }),
            None => {
                sink.report(Diagnostic::error(
                    includer_name,
                    0,
                    format!("{} is not a valid file", path.display()),
                ));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticLog;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_local_include_relative_to_includer() {
        let dir = tempdir().unwrap();
        let header = dir.path().join("common.sh");
        File::create(&header)
            .unwrap()
            .write_all(b"float k = 1.0;")
            .unwrap();
        let main = dir.path().join("main.frag");

        let mut includer = FileIncluder::default();
        let mut log = DiagnosticLog::new();
        let result = includer
            .include_local("common.sh", main.to_str().unwrap(), &mut log)
            .unwrap();

        assert_eq!(result.header_name, "common.sh");
        assert_eq!(result.len(), 14);
        assert_eq!(result.text(), "float k = 1.0;");
        assert!(log.is_empty());
    }

    #[test]
    fn test_system_include_first_match_wins() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        File::create(second.path().join("lib.sh"))
            .unwrap()
            .write_all(b"second")
            .unwrap();
        File::create(first.path().join("lib.sh"))
            .unwrap()
            .write_all(b"first")
            .unwrap();

        let mut includer =
            FileIncluder::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let mut log = DiagnosticLog::new();
        let result = includer.include_system("lib.sh", "x.frag", &mut log).unwrap();
        assert_eq!(result.text(), "first");
    }

    #[test]
    fn test_system_include_skips_empty_files() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        File::create(first.path().join("lib.sh")).unwrap();
        File::create(second.path().join("lib.sh"))
            .unwrap()
            .write_all(b"second")
            .unwrap();

        let mut includer =
            FileIncluder::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let mut log = DiagnosticLog::new();
        let result = includer.include_system("lib.sh", "x.frag", &mut log).unwrap();
        assert_eq!(result.text(), "second");
    }

    #[test]
    fn test_local_missing_reports_diagnostic() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.frag");
        let mut includer = FileIncluder::default();
        let mut log = DiagnosticLog::new();

        let result = includer.include_local("missing.sh", main.to_str().unwrap(), &mut log);
        assert!(result.is_none());
        assert!(log.has_errors());
        assert!(log.entries()[0]
            .message
            .contains("failed to retrieve file statistics"));
    }

    #[test]
    fn test_memory_includer() {
        let mut includer = MemoryIncluder::new();
        includer
            .add_file("shaders/common.sh", "local")
            .add_system("sys", "common.sh", "system");
        let mut log = DiagnosticLog::new();

        let local = includer
            .include_local("common.sh", "shaders/main.frag", &mut log)
            .unwrap();
        assert_eq!(local.text(), "local");
        let system = includer
            .include_system("common.sh", "shaders/main.frag", &mut log)
            .unwrap();
        assert_eq!(system.text(), "system");
    }
}
