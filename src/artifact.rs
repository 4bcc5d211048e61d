//! Бинарный артефакт: таблица uniform и сгенерированный текст.
//!
//! ```text
//! u16 count
//! count * { u8 nameLen, name, u8 type, u32 count, regIndex, regCount,
//!           texComponent, texDimension }
//! u32 srcLen, src, u8 0
//! ```
//!
//! Все числа little-endian. Артефакт сначала собирается в буфер целиком,
//! поэтому ошибка ввода-вывода не оставляет частично записанных данных.

use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ShaderError, ShaderResult};
use crate::reflect::{UniformDescriptor, UniformTable, UniformType};

/// Результат успешной компиляции.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub uniforms: UniformTable,
    pub source: String,
}

fn invalid_input(message: String) -> ShaderError {
    ShaderError::SerializationIo(io::Error::new(io::ErrorKind::InvalidInput, message))
}

fn invalid_data(message: impl Into<String>) -> ShaderError {
    ShaderError::SerializationIo(io::Error::new(io::ErrorKind::InvalidData, message.into()))
}

impl CompiledArtifact {
    pub fn new(uniforms: UniformTable, source: String) -> Self {
        Self { uniforms, source }
    }

    /// Закодировать артефакт.
    pub fn to_bytes(&self) -> ShaderResult<Vec<u8>> {
        let count = u16::try_from(self.uniforms.len()).map_err(|_| {
            invalid_input(format!("{} uniforms do not fit the table", self.uniforms.len()))
        })?;
        let source_len = u32::try_from(self.source.len())
            .map_err(|_| invalid_input("emitted source is too large".to_string()))?;

        let mut out = Vec::with_capacity(2 + self.source.len() + 5 + self.uniforms.len() * 32);
        out.write_u16::<LittleEndian>(count)?;
        for uniform in self.uniforms.iter() {
            write_uniform(&mut out, uniform)?;
        }
        out.write_u32::<LittleEndian>(source_len)?;
        out.extend_from_slice(self.source.as_bytes());
        out.write_u8(0)?;
        Ok(out)
    }

    /// Записать артефакт одним вызовом `write_all`.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> ShaderResult<()> {
        let bytes = self.to_bytes()?;
        sink.write_all(&bytes)?;
        sink.flush()?;
        Ok(())
    }

    /// Записать во временный файл рядом с `path` и атомарно переименовать.
    pub fn write_to_path(&self, path: &Path) -> ShaderResult<()> {
        let bytes = self.to_bytes()?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.persist(path).map_err(|e| ShaderError::SerializationIo(e.error))?;
        log::debug!("wrote artifact {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Разобрать артефакт; лишние или недостающие байты: ошибка.
    pub fn read_from(bytes: &[u8]) -> ShaderResult<Self> {
        let truncated = |_: io::Error| invalid_data("artifact is truncated");
        let mut cursor = Cursor::new(bytes);

        let count = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let mut uniforms = UniformTable::new();
        for _ in 0..count {
            uniforms.push(read_uniform(&mut cursor)?);
        }

        let source_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let mut source = vec![0u8; source_len];
        cursor.read_exact(&mut source).map_err(truncated)?;
        let source =
            String::from_utf8(source).map_err(|_| invalid_data("emitted source is not UTF-8"))?;

        if cursor.read_u8().map_err(truncated)? != 0 {
            return Err(invalid_data("missing trailing zero byte"));
        }
        if cursor.position() as usize != bytes.len() {
            return Err(invalid_data(format!(
                "{} unexpected bytes after the artifact",
                bytes.len() - cursor.position() as usize
            )));
        }
        Ok(Self { uniforms, source })
    }
}

fn write_uniform(out: &mut Vec<u8>, uniform: &UniformDescriptor) -> ShaderResult<()> {
    let name_len = u8::try_from(uniform.name.len()).map_err(|_| {
        invalid_input(format!(
            "uniform name '{}' is longer than 255 bytes",
            uniform.name
        ))
    })?;
    out.write_u8(name_len)?;
    out.extend_from_slice(uniform.name.as_bytes());
    out.write_u8(uniform.ty.code())?;
    for value in [
        uniform.count,
        uniform.reg_index,
        uniform.reg_count,
        uniform.tex_component,
        uniform.tex_dimension,
    ] {
        out.write_u32::<LittleEndian>(value)?;
    }
    Ok(())
}

fn read_uniform(cursor: &mut Cursor<&[u8]>) -> ShaderResult<UniformDescriptor> {
    let truncated = |_: io::Error| invalid_data("artifact is truncated");
    let name_len = cursor.read_u8().map_err(truncated)?;
    let mut name = vec![0u8; name_len as usize];
    cursor.read_exact(&mut name).map_err(truncated)?;
    let name = String::from_utf8(name).map_err(|_| invalid_data("uniform name is not UTF-8"))?;

    let code = cursor.read_u8().map_err(truncated)?;
    let ty = UniformType::from_code(code)
        .ok_or_else(|| invalid_data(format!("unknown uniform type {}", code)))?;
    let mut fields = [0u32; 5];
    for field in &mut fields {
        *field = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    }
    let [count, reg_index, reg_count, tex_component, tex_dimension] = fields;
    Ok(UniformDescriptor {
        name,
        ty,
        count,
        reg_index,
        reg_count,
        tex_component,
        tex_dimension,
    })
}
