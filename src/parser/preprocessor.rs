//! Препроцессор: комментарии, директивы, макросы и `#include`.
//!
//! Результат: плоский текст для лексера плюс [`LineMap`], которая по
//! байтовому смещению восстанавливает исходный файл и строку.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::error::ParseError;
use super::lexer::Lexer;
use super::token::Token;
use crate::diagnostic::{Diagnostic, DiagnosticSink};
use crate::error::{ShaderError, ShaderResult};
use crate::includer::Includer;

/// Версия входного языка по умолчанию (нет `#version`).
pub const DEFAULT_VERSION: u32 = 100;

/// Максимальная глубина вложенности `#include`.
pub const MAX_INCLUDE_DEPTH: usize = 32;

const ES_VERSIONS: [u32; 4] = [100, 300, 310, 320];
const DESKTOP_VERSIONS: [u32; 13] = [
    110, 120, 130, 140, 150, 330, 400, 410, 420, 430, 440, 450, 460,
];
const KNOWN_EXTENSIONS: [&str; 7] = [
    "GL_GOOGLE_include_directive",
    "GL_GOOGLE_cpp_style_line_directive",
    "GL_OES_standard_derivatives",
    "GL_EXT_shader_texture_lod",
    "GL_EXT_shadow_samplers",
    "GL_ARB_shader_texture_lod",
    "GL_EXT_texture_array",
];

// === Карта строк ===

/// Соответствие строк развёрнутого текста исходным `(файл, строка)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    files: Vec<String>,
    /// Смещение начала каждой выходной строки.
    starts: Vec<usize>,
    /// `(индекс файла, строка)` для каждой выходной строки.
    origins: Vec<(usize, u32)>,
}

impl LineMap {
    fn file_index(&mut self, name: &str) -> usize {
        match self.files.iter().position(|f| f == name) {
            Some(index) => index,
            None => {
                self.files.push(name.to_string());
                self.files.len() - 1
            }
        }
    }

    fn push_line(&mut self, offset: usize, file: usize, line: u32) {
        self.starts.push(offset);
        self.origins.push((file, line));
    }

    /// Исходные файл и строка для байтового смещения.
    pub fn locate(&self, offset: usize) -> (&str, u32) {
        let index = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(0) => return (self.files.first().map_or("", String::as_str), 0),
            Err(i) => i - 1,
        };
        let (file, line) = self.origins[index];
        (self.files.get(file).map_or("", String::as_str), line)
    }

    /// Привязать ошибку со Span к файлу и строке.
    pub fn locate_error(&self, error: ParseError) -> ParseError {
        match error {
            ParseError::Located { .. } => error,
            other => {
                let (file, line) = self.locate(other.span().start);
                ParseError::at(file, line, other.to_string())
            }
        }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }
}

// === Результат ===

/// Директива `#extension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub name: String,
    pub behavior: String,
}

/// Развёрнутый исходный текст.
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    pub text: String,
    pub line_map: LineMap,
    pub version: u32,
    pub es: bool,
    pub extensions: Vec<Extension>,
}

// === Препроцессор ===

#[derive(Debug, Clone, Copy)]
struct Conditional {
    /// Текущая ветка активна.
    active: bool,
    /// Одна из веток уже была выбрана.
    taken: bool,
    /// Внешний контекст активен.
    parent_active: bool,
    seen_else: bool,
}

/// Препроцессор одного исходника.
pub struct Preprocessor<'a> {
    includer: &'a mut dyn Includer,
    sink: &'a mut dyn DiagnosticSink,
    macros: HashMap<String, String>,
    conditionals: Vec<Conditional>,
    once: HashSet<PathBuf>,
    output: Preprocessed,
    version_seen: bool,
    code_seen: bool,
    depth: usize,
}

impl<'a> Preprocessor<'a> {
    pub fn new(includer: &'a mut dyn Includer, sink: &'a mut dyn DiagnosticSink) -> Self {
        let mut macros = HashMap::new();
        macros.insert("GL_ES".to_string(), "1".to_string());
        Self {
            includer,
            sink,
            macros,
            conditionals: Vec::new(),
            once: HashSet::new(),
            output: Preprocessed {
                version: DEFAULT_VERSION,
                es: true,
                ..Preprocessed::default()
            },
            version_seen: false,
            code_seen: false,
            depth: 0,
        }
    }

    /// Развернуть преамбулу и исходный текст файла `file`.
    pub fn run(mut self, preamble: &str, source: &str, file: &str) -> ShaderResult<Preprocessed> {
        self.process_file("<preamble>", preamble, None)?;
        self.code_seen = false;
        self.process_file(file, source, None)?;
        if !self.conditionals.is_empty() {
            let line = source.lines().count() as u32;
            return Err(ParseError::at(file, line, "missing #endif").into());
        }
        log::trace!(
            "preprocessed {}: {} lines, version {}{}",
            file,
            self.output.line_map.line_count(),
            self.output.version,
            if self.output.es { " es" } else { "" }
        );
        Ok(self.output)
    }

    fn is_active(&self) -> bool {
        self.conditionals.last().map_or(true, |c| c.active)
    }

    fn process_file(&mut self, file: &str, text: &str, path: Option<PathBuf>) -> ShaderResult<()> {
        let file_index = self.output.line_map.file_index(file);
        let depth = self.conditionals.len();

        for (line, content) in clean_lines(text) {
            let trimmed = content.trim();
            if let Some(directive) = trimmed.strip_prefix('#') {
                self.directive(directive.trim(), file, line, path.as_ref())?;
                continue;
            }
            if !self.is_active() || trimmed.is_empty() {
                continue;
            }
            if file != "<preamble>" {
                self.code_seen = true;
            }
            let expanded = self.expand_line(&content, line);
            let offset = self.output.text.len();
            self.output.line_map.push_line(offset, file_index, line);
            self.output.text.push_str(&expanded);
            self.output.text.push('\n');
        }

        if self.conditionals.len() != depth {
            let line = text.lines().count() as u32;
            return Err(ParseError::at(file, line, "unterminated conditional directive").into());
        }
        Ok(())
    }

    fn directive(
        &mut self,
        directive: &str,
        file: &str,
        line: u32,
        path: Option<&PathBuf>,
    ) -> ShaderResult<()> {
        let (name, rest) = match directive.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
            Some(i) => (&directive[..i], directive[i..].trim()),
            None => (directive, ""),
        };
        let error = |message: String| -> ShaderError { ParseError::at(file, line, message).into() };

        // Условные директивы обрабатываются и в неактивных ветках.
        match name {
            "ifdef" | "ifndef" => {
                let macro_name = first_word(rest);
                if macro_name.is_empty() {
                    return Err(error(format!("#{} : missing macro name", name)));
                }
                let defined = self.macros.contains_key(macro_name);
                self.push_conditional(if name == "ifdef" { defined } else { !defined });
                return Ok(());
            }
            "if" => {
                let value = if self.is_active() {
                    self.evaluate(rest, line).map_err(error)? != 0
                } else {
                    false
                };
                self.push_conditional(value);
                return Ok(());
            }
            "elif" => {
                let parent_active = match self.conditionals.last() {
                    Some(c) if c.seen_else => return Err(error("#elif after #else".to_string())),
                    Some(c) => c.parent_active && !c.taken,
                    None => return Err(error("#elif without #if".to_string())),
                };
                let value = parent_active && self.evaluate(rest, line).map_err(error)? != 0;
                if let Some(c) = self.conditionals.last_mut() {
                    c.active = value;
                    c.taken |= value;
                }
                return Ok(());
            }
            "else" => {
                return match self.conditionals.last_mut() {
                    Some(c) if c.seen_else => Err(error("#else after #else".to_string())),
                    Some(c) => {
                        c.active = c.parent_active && !c.taken;
                        c.taken = true;
                        c.seen_else = true;
                        Ok(())
                    }
                    None => Err(error("#else without #if".to_string())),
                };
            }
            "endif" => {
                return match self.conditionals.pop() {
                    Some(_) => Ok(()),
                    None => Err(error("#endif without #if".to_string())),
                };
            }
            _ => {}
        }

        if !self.is_active() {
            return Ok(());
        }

        match name {
            "" | "line" => Ok(()),
            "version" => self.version(rest, file).map_err(error),
            "extension" => {
                let (ext, behavior) = match rest.split_once(':') {
                    Some((ext, behavior)) => (ext.trim(), behavior.trim()),
                    None => return Err(error("#extension : expected ':'".to_string())),
                };
                if !matches!(behavior, "require" | "enable" | "warn" | "disable") {
                    return Err(error(format!(
                        "#extension : unknown extension behavior '{}'",
                        behavior
                    )));
                }
                if !KNOWN_EXTENSIONS.contains(&ext) {
                    if behavior == "require" {
                        return Err(error(format!("'{}' : extension not supported", ext)));
                    }
                    self.sink.report(Diagnostic::warning(
                        file,
                        line,
                        format!("'{}' : extension not supported", ext),
                    ));
                }
                self.output.extensions.push(Extension {
                    name: ext.to_string(),
                    behavior: behavior.to_string(),
                });
                Ok(())
            }
            "define" => self.define(rest).map_err(error),
            "undef" => {
                let macro_name = first_word(rest);
                if macro_name.starts_with("GL_") || macro_name.starts_with("__") {
                    return Err(error(format!(
                        "'{}' : predefined names can't be undefined",
                        macro_name
                    )));
                }
                self.macros.remove(macro_name);
                Ok(())
            }
            "include" => self.include(rest, file, line),
            "pragma" => {
                if first_word(rest) == "once" {
                    if let Some(path) = path {
                        self.once.insert(path.clone());
                    }
                }
                Ok(())
            }
            "error" => Err(error(format!("#error {}", rest))),
            other => Err(error(format!("'#{}' : invalid directive", other))),
        }
    }

    fn push_conditional(&mut self, value: bool) {
        let parent_active = self.is_active();
        self.conditionals.push(Conditional {
            active: parent_active && value,
            taken: value,
            parent_active,
            seen_else: false,
        });
    }

    fn version(&mut self, rest: &str, file: &str) -> Result<(), String> {
        if self.version_seen || self.code_seen || file == "<preamble>" || self.depth > 0 {
            return Err("#version must occur first in the shader".to_string());
        }
        let mut words = rest.split_whitespace();
        let number: u32 = words
            .next()
            .and_then(|w| w.parse().ok())
            .ok_or_else(|| "#version : bad version number".to_string())?;
        let profile = words.next();

        let es = match profile {
            Some("es") => {
                if !ES_VERSIONS.contains(&number) {
                    return Err(format!("{} es : version not supported", number));
                }
                true
            }
            Some("core") | Some("compatibility") | None => {
                if number == 100 {
                    true
                } else if DESKTOP_VERSIONS.contains(&number) {
                    false
                } else if ES_VERSIONS.contains(&number) {
                    return Err(format!("{} : versions 300, 310, and 320 require 'es'", number));
                } else {
                    return Err(format!("{} : version number not supported", number));
                }
            }
            Some(other) => return Err(format!("'{}' : bad profile name", other)),
        };

        self.version_seen = true;
        self.output.version = number;
        self.output.es = es;
        if es {
            self.macros.insert("GL_ES".to_string(), "1".to_string());
        } else {
            self.macros.remove("GL_ES");
        }
        Ok(())
    }

    fn define(&mut self, rest: &str) -> Result<(), String> {
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let (name, body) = rest.split_at(end);
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err("#define : bad macro name".to_string());
        }
        if body.starts_with('(') {
            return Err(format!("'{}' : function-like macros are not supported", name));
        }
        if name.starts_with("GL_") || name.starts_with("__") {
            return Err(format!("'{}' : predefined names can't be (re)defined", name));
        }
        let body = body.trim().to_string();
        match self.macros.get(name) {
            Some(existing) if *existing != body => {
                Err(format!("'{}' : macro redefined with a different substitution", name))
            }
            _ => {
                self.macros.insert(name.to_string(), body);
                Ok(())
            }
        }
    }

    fn include(&mut self, rest: &str, file: &str, line: u32) -> ShaderResult<()> {
        let (header, local) = if let Some(inner) = rest.strip_prefix('"') {
            match inner.find('"') {
                Some(end) => (&inner[..end], true),
                None => return Err(ParseError::at(file, line, "#include : missing '\"'").into()),
            }
        } else if let Some(inner) = rest.strip_prefix('<') {
            match inner.find('>') {
                Some(end) => (&inner[..end], false),
                None => return Err(ParseError::at(file, line, "#include : missing '>'").into()),
            }
        } else {
            return Err(ParseError::at(file, line, "#include : expected header name").into());
        };

        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(ParseError::at(
                file,
                line,
                format!("#include : nesting deeper than {} levels", MAX_INCLUDE_DEPTH),
            )
            .into());
        }

        let found = if local {
            match self.includer.include_local(header, file, self.sink) {
                Some(result) => Some(result),
                None => self.includer.include_system(header, file, self.sink),
            }
        } else {
            self.includer.include_system(header, file, self.sink)
        };
        let Some(result) = found else {
            return Err(ShaderError::IncludeNotFound {
                name: header.to_string(),
                from: file.to_string(),
                line,
            });
        };

        if self.once.contains(&result.path) {
            self.includer.release(result);
            return Ok(());
        }

        let text = result.text();
        let path = result.path.clone();
        let name = path.display().to_string();
        self.includer.release(result);

        self.depth += 1;
        let outcome = self.process_file(&name, &text, Some(path));
        self.depth -= 1;
        outcome
    }

    // === Макросы ===

    fn expand_line(&self, line: &str, line_no: u32) -> String {
        let mut active = Vec::new();
        self.expand_text(line, line_no, &mut active)
    }

    fn expand_text(&self, text: &str, line_no: u32, active: &mut Vec<String>) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(c) = rest.chars().next() {
            if c.is_ascii_alphabetic() || c == '_' {
                let end = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                let word = &rest[..end];
                out.push_str(&self.expand_word(word, line_no, active));
                rest = &rest[end..];
            } else if c.is_ascii_digit() || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) {
                // pp-number: цифры вместе с суффиксами и экспонентой
                let mut end = 1;
                let bytes = rest.as_bytes();
                while end < bytes.len() {
                    let b = bytes[end];
                    let sign = (b == b'+' || b == b'-') && matches!(bytes[end - 1], b'e' | b'E');
                    if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || sign {
                        end += 1;
                    } else {
                        break;
                    }
                }
                out.push_str(&rest[..end]);
                rest = &rest[end..];
            } else {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
        out
    }

    fn expand_word(&self, word: &str, line_no: u32, active: &mut Vec<String>) -> String {
        match word {
            "__LINE__" => return line_no.to_string(),
            "__VERSION__" => return self.output.version.to_string(),
            _ => {}
        }
        match self.macros.get(word) {
            Some(body) if !active.iter().any(|a| a == word) => {
                active.push(word.to_string());
                let expanded = self.expand_text(body, line_no, active);
                active.pop();
                expanded
            }
            _ => word.to_string(),
        }
    }

    // === #if ===

    fn evaluate(&self, expression: &str, line_no: u32) -> Result<i64, String> {
        let resolved = self.resolve_defined(expression)?;
        let expanded = self.expand_line(&resolved, line_no);
        let tokens = Lexer::new(&expanded)
            .tokenize()
            .map_err(|e| format!("#if : {}", e))?
            .into_iter()
            .map(|t| match t.value {
                // После подстановки оставшиеся идентификаторы равны 0.
                Token::Ident(_) => Token::IntLit(0),
                other => other,
            })
            .collect::<Vec<_>>();
        let mut eval = ConditionEval { tokens, pos: 0 };
        let value = eval.expression(0)?;
        if eval.peek() != &Token::Eof {
            return Err(format!("#if : unexpected '{}'", eval.peek()));
        }
        Ok(value)
    }

    /// Заменить `defined X` / `defined(X)` на 1 или 0 до подстановки макросов.
    fn resolve_defined(&self, expression: &str) -> Result<String, String> {
        let mut out = String::new();
        let mut rest = expression;
        while let Some(pos) = find_word(rest, "defined") {
            out.push_str(&rest[..pos]);
            let mut after = rest[pos + "defined".len()..].trim_start();
            let parenthesized = after.starts_with('(');
            if parenthesized {
                after = after[1..].trim_start();
            }
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            let name = &after[..end];
            if name.is_empty() {
                return Err("#if : 'defined' expects a macro name".to_string());
            }
            after = &after[end..];
            if parenthesized {
                after = after
                    .trim_start()
                    .strip_prefix(')')
                    .ok_or_else(|| "#if : missing ')' after 'defined'".to_string())?;
            }
            let defined = self.macros.contains_key(name) || name == "__VERSION__" || name == "__LINE__";
            out.push_str(if defined { " 1 " } else { " 0 " });
            rest = after;
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Вычислитель целочисленных выражений `#if`.
struct ConditionEval {
    tokens: Vec<Token>,
    pos: usize,
}

impl ConditionEval {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn binary_level(token: &Token) -> Option<u8> {
        let level = match token {
            Token::OrOr => 1,
            Token::AndAnd => 2,
            Token::Pipe => 3,
            Token::Caret => 4,
            Token::Amp => 5,
            Token::EqEq | Token::NotEq => 6,
            Token::Lt | Token::Gt | Token::Le | Token::Ge => 7,
            Token::Shl | Token::Shr => 8,
            Token::Plus | Token::Minus => 9,
            Token::Star | Token::Slash | Token::Percent => 10,
            _ => return None,
        };
        Some(level)
    }

    fn expression(&mut self, min_level: u8) -> Result<i64, String> {
        let mut lhs = self.unary()?;
        while let Some(level) = Self::binary_level(self.peek()) {
            if level <= min_level {
                break;
            }
            let op = self.advance();
            let rhs = self.expression(level)?;
            lhs = match op {
                Token::OrOr => ((lhs != 0) || (rhs != 0)) as i64,
                Token::AndAnd => ((lhs != 0) && (rhs != 0)) as i64,
                Token::Pipe => lhs | rhs,
                Token::Caret => lhs ^ rhs,
                Token::Amp => lhs & rhs,
                Token::EqEq => (lhs == rhs) as i64,
                Token::NotEq => (lhs != rhs) as i64,
                Token::Lt => (lhs < rhs) as i64,
                Token::Gt => (lhs > rhs) as i64,
                Token::Le => (lhs <= rhs) as i64,
                Token::Ge => (lhs >= rhs) as i64,
                Token::Shl => lhs.wrapping_shl(rhs as u32),
                Token::Shr => lhs.wrapping_shr(rhs as u32),
                Token::Plus => lhs.wrapping_add(rhs),
                Token::Minus => lhs.wrapping_sub(rhs),
                Token::Star => lhs.wrapping_mul(rhs),
                Token::Slash | Token::Percent if rhs == 0 => {
                    return Err("#if : division by zero".to_string())
                }
                Token::Slash => lhs.wrapping_div(rhs),
                _ => lhs.wrapping_rem(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.unary_inner())
    }

    fn unary_inner(&mut self) -> Result<i64, String> {
        match self.advance() {
            Token::Bang => Ok((self.unary()? == 0) as i64),
            Token::Minus => Ok(self.unary()?.wrapping_neg()),
            Token::Plus => self.unary(),
            Token::Tilde => Ok(!self.unary()?),
            Token::IntLit(n) | Token::UintLit(n) => Ok(n as i64),
            Token::BoolLit(b) => Ok(b as i64),
            Token::LParen => {
                let value = self.expression(0)?;
                match self.advance() {
                    Token::RParen => Ok(value),
                    other => Err(format!("#if : expected ')', found '{}'", other)),
                }
            }
            Token::Eof => Err("#if : unexpected end of expression".to_string()),
            other => Err(format!("#if : unexpected '{}'", other)),
        }
    }
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// Позиция отдельного слова `word` в тексте.
fn find_word(text: &str, word: &str) -> Option<usize> {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut from = 0;
    while let Some(found) = text[from..].find(word) {
        let start = from + found;
        let end = start + word.len();
        let before_ok = !text[..start].ends_with(is_ident);
        let after_ok = !text[end..].starts_with(is_ident);
        if before_ok && after_ok {
            return Some(start);
        }
        from = end;
    }
    None
}

/// Убрать комментарии и склеить строки с `\` в конце.
///
/// Возвращает логические строки с номером строки, где каждая начинается.
fn clean_lines(text: &str) -> Vec<(u32, String)> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start_line = 1u32;
    let mut line = 1u32;
    let mut in_block = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_block {
            match c {
                '*' if chars.peek() == Some(&'/') => {
                    chars.next();
                    in_block = false;
                    current.push(' ');
                }
                '\n' => {
                    line += 1;
                    lines.push((start_line, std::mem::take(&mut current)));
                    start_line = line;
                }
                _ => {}
            }
            continue;
        }

        match c {
            '\\' if matches!(chars.peek(), Some('\n') | Some('\r')) => {
                if chars.next() == Some('\r') && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                line += 1;
            }
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|c| *c != '\n') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block = true;
            }
            '\n' => {
                line += 1;
                lines.push((start_line, std::mem::take(&mut current)));
                start_line = line;
            }
            '\r' => {}
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        lines.push((start_line, current));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticLog;
    use crate::includer::MemoryIncluder;

    fn run(source: &str) -> ShaderResult<Preprocessed> {
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        Preprocessor::new(&mut includer, &mut log).run("", source, "test.frag")
    }

    #[test]
    fn test_comments_and_continuations() {
        let out = run("float a; // tail\n/* block\n comment */ float b;\nfloat \\\nc;\n").unwrap();
        assert_eq!(out.text, "float a; \n  float b;\nfloat c;\n");
        assert_eq!(out.line_map.locate(0), ("test.frag", 1));
        let b = out.text.find('b').unwrap();
        assert_eq!(out.line_map.locate(b), ("test.frag", 3));
        let c = out.text.find('c').unwrap();
        assert_eq!(out.line_map.locate(c), ("test.frag", 4));
    }

    #[test]
    fn test_version_and_default() {
        let out = run("void main(){}").unwrap();
        assert_eq!(out.version, 100);
        assert!(out.es);

        let out = run("#version 300 es\nvoid main(){}").unwrap();
        assert_eq!((out.version, out.es), (300, true));

        let out = run("#version 330 core\n#ifdef GL_ES\nbroken\n#endif\n").unwrap();
        assert_eq!((out.version, out.es), (330, false));
        assert!(out.text.is_empty());

        assert!(run("#version 300\n").is_err());
        assert!(run("float x;\n#version 330\n").is_err());
    }

    #[test]
    fn test_macros_and_conditionals() {
        let source = "#define N 4\n#define TWICE (N * 2)\n#if TWICE == 8 && defined(N)\nint a[TWICE];\n#elif 1\nint b;\n#else\nint c;\n#endif\n";
        let out = run(source).unwrap();
        assert_eq!(out.text, "int a[(4 * 2)];\n");

        let out = run("#ifndef X\nint x;\n#else\nint y;\n#endif\n").unwrap();
        assert_eq!(out.text, "int x;\n");

        let out = run("#if 0\n#if 1\nint z;\n#endif\n#else\nint w;\n#endif\n").unwrap();
        assert_eq!(out.text, "int w;\n");
    }

    #[test]
    fn test_self_referencing_macro_terminates() {
        let out = run("#define A A + 1\nint x = A;\n").unwrap();
        assert_eq!(out.text, "int x = A + 1;\n");
    }

    #[test]
    fn test_numbers_not_expanded() {
        let out = run("#define e 7\nfloat x = 1e3 + e;\n").unwrap();
        assert_eq!(out.text, "float x = 1e3 + 7;\n");
    }

    #[test]
    fn test_directive_errors() {
        let err = run("#define F(x) x\n").unwrap_err();
        assert!(err.to_string().contains("function-like"));
        let err = run("\n#error stop here\n").unwrap_err();
        assert!(err.to_string().contains("test.frag:2: #error stop here"));
        assert!(run("#if 1\nint x;\n").is_err());
        assert!(run("#endif\n").is_err());
        assert!(run("#bogus\n").is_err());
    }

    #[test]
    fn test_deeply_nested_condition() {
        let depth = 100_000;
        let nested = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        let out = run(&format!("#if {}\nint x;\n#endif\n", nested)).unwrap();
        assert_eq!(out.text, "int x;\n");

        let unbalanced = format!("#if {}1\nint x;\n#endif\n", "(".repeat(depth));
        let err = run(&unbalanced).unwrap_err();
        assert!(matches!(err, ShaderError::Parse(_)), "{}", err);
    }

    #[test]
    fn test_include_local_and_once() {
        let mut includer = MemoryIncluder::new();
        includer.add_file("dir/common.sh", "#pragma once\nfloat shared;\n");
        let mut log = DiagnosticLog::new();
        let out = Preprocessor::new(&mut includer, &mut log)
            .run(
                "",
                "#include \"common.sh\"\n#include \"common.sh\"\nvoid main(){}\n",
                "dir/main.frag",
            )
            .unwrap();
        assert_eq!(out.text, "float shared;\nvoid main(){}\n");
        let (file, line) = out.line_map.locate(0);
        assert!(file.ends_with("common.sh"));
        assert_eq!(line, 2);
    }

    #[test]
    fn test_missing_include() {
        let err = run("#include <nowhere.sh>\n").unwrap_err();
        assert!(matches!(
            err,
            ShaderError::IncludeNotFound { ref name, line: 1, .. } if name == "nowhere.sh"
        ));
    }

    #[test]
    fn test_preamble_extension() {
        let mut includer = MemoryIncluder::new();
        let mut log = DiagnosticLog::new();
        let out = Preprocessor::new(&mut includer, &mut log)
            .run(
                "#extension GL_GOOGLE_include_directive : require\n",
                "#version 310 es\nvoid main(){}",
                "a.comp",
            )
            .unwrap();
        assert_eq!(out.extensions.len(), 1);
        assert_eq!(out.extensions[0].name, "GL_GOOGLE_include_directive");
        assert_eq!(out.version, 310);
    }
}
