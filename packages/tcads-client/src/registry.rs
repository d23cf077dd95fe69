//! Symbol / Type Registry (C4): caches the PLC's symbol and type tables and
//! resolves dotted/bracketed paths to `(index_group, index_offset, size)`
//! tuples, plus a dynamic [`Value`] codec for the type table's primitives.
//!
//! The wire format for `GetSymbolUploadInfo`/`UploadSymbols`/`UploadTypes` is
//! sparsely specified upstream. The entry layouts parsed by
//! [`parse_symbol_upload_info`], [`parse_symbol_table`], and
//! [`parse_type_table`] follow the length-prefixed, NUL-terminated
//! strings-with-explicit-lengths shape described for these commands; the
//! exact field widths and the recursive type-entry shape are this client's
//! own resolution of an open question, recorded in `DESIGN.md`. Symbols
//! reporting index group [`index_group::HANDLE_ONLY_SENTINEL`] have no raw
//! address and are resolved through the handle-mode fallback in
//! [`crate::client::Client`] instead.

use crate::error::{ResolveError, ValueError};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tcads_core::ads::{IndexGroup, IndexOffset};

/// Reserved index groups used outside of symbol-resolved reads/writes.
pub mod index_group {
    pub const SYMBOL_HANDLE_BY_NAME: u32 = 0xF003;
    pub const READ_WRITE_SYMBOL_VALUE_BY_HANDLE: u32 = 0xF005;
    pub const RELEASE_SYMBOL_HANDLE: u32 = 0xF006;
    pub const SYMBOL_UPLOAD: u32 = 0xF00B;
    pub const SYMBOL_UPLOAD_INFO: u32 = 0xF00F;
    pub const TYPE_UPLOAD: u32 = 0xF00E;

    /// The index group an uploaded symbol entry reports when it has no raw
    /// `(group, offset)` address exposed (§4.4's "handle mode fallback").
    /// This client treats index group `0` in an `UploadSymbols` entry as
    /// that sentinel; see DESIGN.md.
    pub const HANDLE_ONLY_SENTINEL: u32 = 0;
}

/// The primitive/composite class a [`TypeInfo`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTypeTag {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Real32,
    Real64,
    String,
    WString,
    Time,
    TimeOfDay,
    Date,
    DateAndTime,
    Struct,
    Array,
}

impl DataTypeTag {
    fn from_wire(tag: u32) -> Self {
        match tag {
            0 => Self::Bool,
            1 => Self::Int8,
            2 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::UInt8,
            6 => Self::UInt16,
            7 => Self::UInt32,
            8 => Self::UInt64,
            9 => Self::Real32,
            10 => Self::Real64,
            11 => Self::String,
            12 => Self::WString,
            13 => Self::Time,
            14 => Self::TimeOfDay,
            15 => Self::Date,
            16 => Self::DateAndTime,
            17 => Self::Struct,
            _ => Self::Array,
        }
    }
}

/// A small little-endian cursor over a byte slice, used by the
/// `GetSymbolUploadInfo`/`UploadSymbols`/`UploadTypes` parsers below.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ValueError> {
        if self.bytes.len() - self.pos < n {
            return Err(ValueError::ShortBuffer {
                expected: self.pos + n,
                got: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, ValueError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, ValueError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, ValueError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// Reads a `len`-character, NUL-terminated, Windows-1252 string
    /// (`len + 1` bytes on the wire).
    fn nul_terminated_string(&mut self, len: usize) -> Result<String, ValueError> {
        let raw = self.take(len + 1)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&raw[..end]);
        Ok(decoded.into_owned())
    }
}

/// The fixed-size response to `GetSymbolUploadInfo` (index group
/// [`index_group::SYMBOL_UPLOAD_INFO`]), announcing the size of the
/// `UploadSymbols`/`UploadTypes` payloads to request next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolUploadInfo {
    pub symbol_count: u32,
    pub symbol_data_length: u32,
    pub type_count: u32,
    pub type_data_length: u32,
}

/// Parses the 16-byte informative prefix of the 24-byte
/// `GetSymbolUploadInfo` response. The trailing 8 bytes are reserved and
/// unused by this client.
pub fn parse_symbol_upload_info(bytes: &[u8]) -> Result<SymbolUploadInfo, ValueError> {
    let mut cursor = Cursor::new(bytes);
    Ok(SymbolUploadInfo {
        symbol_count: cursor.u32()?,
        symbol_data_length: cursor.u32()?,
        type_count: cursor.u32()?,
        type_data_length: cursor.u32()?,
    })
}

/// One not-yet-cross-referenced entry from an `UploadSymbols` response.
#[derive(Debug, Clone)]
struct RawSymbol {
    name: String,
    index_group: u32,
    index_offset: u32,
    size: u32,
    type_name: String,
    comment: String,
    data_type: DataTypeTag,
}

/// Parses the `UploadSymbols` payload (index group
/// [`index_group::SYMBOL_UPLOAD`]) into entries, each:
/// `entry_length, index_group, index_offset, size, data_type, flags` (6 `u32`s),
/// then `name_len, type_name_len, comment_len` (3 `u16`s), then the three
/// NUL-terminated strings in that order. `entry_length` (the whole entry,
/// including the fixed header) is used to seek to the next entry, so any
/// slack between the variable-length fields and the declared length is
/// tolerated.
fn parse_symbol_entries(bytes: &[u8]) -> Result<Vec<RawSymbol>, ValueError> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos + 4 <= bytes.len() {
        let entry_start = pos;
        let mut cursor = Cursor::new(&bytes[pos..]);
        let entry_length = cursor.u32()? as usize;
        if entry_length < 4 || entry_start + entry_length > bytes.len() {
            return Err(ValueError::ShortBuffer {
                expected: entry_start + entry_length.max(4),
                got: bytes.len(),
            });
        }

        let index_group = cursor.u32()?;
        let index_offset = cursor.u32()?;
        let size = cursor.u32()?;
        let data_type = DataTypeTag::from_wire(cursor.u32()?);
        let _flags = cursor.u32()?;
        let name_len = cursor.u16()? as usize;
        let type_name_len = cursor.u16()? as usize;
        let comment_len = cursor.u16()? as usize;
        let name = cursor.nul_terminated_string(name_len)?;
        let type_name = cursor.nul_terminated_string(type_name_len)?;
        let comment = cursor.nul_terminated_string(comment_len)?;

        out.push(RawSymbol {
            name,
            index_group,
            index_offset,
            size,
            type_name,
            comment,
            data_type,
        });
        pos = entry_start + entry_length;
    }

    Ok(out)
}

/// One not-yet-cross-referenced field of an `UploadTypes` entry.
#[derive(Debug, Clone)]
struct RawField {
    name: String,
    offset: u32,
    size: u32,
    data_type: DataTypeTag,
    type_name: String,
}

/// One not-yet-cross-referenced entry from an `UploadTypes` response.
#[derive(Debug, Clone)]
struct RawType {
    name: String,
    size: u32,
    data_type: DataTypeTag,
    array_bounds: Vec<(i32, i32)>,
    /// For array entries, the element type's name (resolved recursively
    /// against the rest of the table). Unused otherwise.
    element_type_name: String,
    fields: Vec<RawField>,
}

/// Parses the `UploadTypes` payload (index group
/// [`index_group::TYPE_UPLOAD`]). The layout mirrors [`parse_symbol_entries`]
/// but nests a field list for structs and carries array bounds for arrays;
/// struct fields and array elements reference other entries in this same
/// table by name rather than inlining them, so nested structs resolve via
/// [`resolve_types`]'s recursive lookup.
fn parse_type_entries(bytes: &[u8]) -> Result<Vec<RawType>, ValueError> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos + 4 <= bytes.len() {
        let entry_start = pos;
        let mut cursor = Cursor::new(&bytes[pos..]);
        let entry_length = cursor.u32()? as usize;
        if entry_length < 4 || entry_start + entry_length > bytes.len() {
            return Err(ValueError::ShortBuffer {
                expected: entry_start + entry_length.max(4),
                got: bytes.len(),
            });
        }

        let size = cursor.u32()?;
        let data_type = DataTypeTag::from_wire(cursor.u32()?);
        let dim_count = cursor.u32()? as usize;
        let mut array_bounds = Vec::with_capacity(dim_count);
        for _ in 0..dim_count {
            let lo = cursor.i32()?;
            let hi = cursor.i32()?;
            array_bounds.push((lo, hi));
        }
        let field_count = cursor.u32()? as usize;
        let name_len = cursor.u16()? as usize;
        let type_name_len = cursor.u16()? as usize;
        let name = cursor.nul_terminated_string(name_len)?;
        let element_type_name = cursor.nul_terminated_string(type_name_len)?;

        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let offset = cursor.u32()?;
            let field_size = cursor.u32()?;
            let field_data_type = DataTypeTag::from_wire(cursor.u32()?);
            let field_name_len = cursor.u16()? as usize;
            let field_type_name_len = cursor.u16()? as usize;
            let field_name = cursor.nul_terminated_string(field_name_len)?;
            let field_type_name = cursor.nul_terminated_string(field_type_name_len)?;
            fields.push(RawField {
                name: field_name,
                offset,
                size: field_size,
                data_type: field_data_type,
                type_name: field_type_name,
            });
        }

        out.push(RawType {
            name,
            size,
            data_type,
            array_bounds,
            element_type_name,
            fields,
        });
        pos = entry_start + entry_length;
    }

    Ok(out)
}

fn resolve_type(
    name: &str,
    raw: &HashMap<String, RawType>,
    cache: &mut HashMap<String, TypeInfo>,
) -> TypeInfo {
    if let Some(cached) = cache.get(name) {
        return cached.clone();
    }

    // Referenced by name but never itself uploaded as a type entry (e.g. a
    // PLC built-in primitive): treat as opaque, sized by the reference site.
    let Some(entry) = raw.get(name) else {
        return TypeInfo {
            name: name.to_string(),
            base_type: DataTypeTag::UInt8,
            size: 0,
            element_type: None,
            array_bounds: Vec::new(),
            fields: Vec::new(),
        };
    };

    let built = match entry.data_type {
        DataTypeTag::Struct => {
            let fields = entry
                .fields
                .iter()
                .map(|f| FieldInfo {
                    name: f.name.clone(),
                    offset: f.offset,
                    type_info: resolve_field_type(f, raw, cache),
                })
                .collect();
            TypeInfo {
                name: entry.name.clone(),
                base_type: DataTypeTag::Struct,
                size: entry.size,
                element_type: None,
                array_bounds: Vec::new(),
                fields,
            }
        }
        DataTypeTag::Array => {
            let element = resolve_type(&entry.element_type_name, raw, cache);
            TypeInfo {
                name: entry.name.clone(),
                base_type: DataTypeTag::Array,
                size: entry.size,
                element_type: Some(Box::new(element)),
                array_bounds: entry.array_bounds.clone(),
                fields: Vec::new(),
            }
        }
        primitive => TypeInfo {
            name: entry.name.clone(),
            base_type: primitive,
            size: entry.size,
            element_type: None,
            array_bounds: Vec::new(),
            fields: Vec::new(),
        },
    };

    cache.insert(name.to_string(), built.clone());
    built
}

fn resolve_field_type(
    field: &RawField,
    raw: &HashMap<String, RawType>,
    cache: &mut HashMap<String, TypeInfo>,
) -> TypeInfo {
    match field.data_type {
        DataTypeTag::Struct | DataTypeTag::Array => resolve_type(&field.type_name, raw, cache),
        primitive => TypeInfo {
            name: field.type_name.clone(),
            base_type: primitive,
            size: field.size,
            element_type: None,
            array_bounds: Vec::new(),
            fields: Vec::new(),
        },
    }
}

/// Parses an `UploadTypes` payload into a name-keyed, fully recursive
/// [`TypeInfo`] table.
pub fn parse_type_table(bytes: &[u8]) -> Result<HashMap<String, TypeInfo>, ValueError> {
    let entries = parse_type_entries(bytes)?;
    let raw: HashMap<String, RawType> = entries.into_iter().map(|t| (t.name.clone(), t)).collect();

    let mut cache = HashMap::new();
    for name in raw.keys() {
        if !cache.contains_key(name) {
            resolve_type(name, &raw, &mut cache);
        }
    }
    Ok(cache)
}

/// Parses an `UploadSymbols` payload and cross-references each entry's
/// declared type name against `types` (from [`parse_type_table`]) to build
/// fully recursive [`Symbol`]s ready for [`SymbolRegistry::load`].
///
/// A symbol whose type name isn't present in `types` (a bare primitive,
/// which the PLC doesn't emit its own type-table entry for) falls back to a
/// flat [`TypeInfo`] built from the symbol entry's own `size`/`data_type`.
pub fn parse_symbol_table(
    bytes: &[u8],
    types: &HashMap<String, TypeInfo>,
) -> Result<Vec<Symbol>, ValueError> {
    let raw = parse_symbol_entries(bytes)?;
    Ok(raw
        .into_iter()
        .map(|s| {
            let type_info = types.get(&s.type_name).cloned().unwrap_or(TypeInfo {
                name: s.type_name.clone(),
                base_type: s.data_type,
                size: s.size,
                element_type: None,
                array_bounds: Vec::new(),
                fields: Vec::new(),
            });
            Symbol {
                name: s.name,
                index_group: s.index_group,
                index_offset: s.index_offset,
                size: s.size,
                type_name: s.type_name,
                comment: s.comment,
                type_info,
            }
        })
        .collect())
}

/// One field of a struct [`TypeInfo`], at a fixed byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub offset: u32,
    pub type_info: TypeInfo,
}

/// A resolved, possibly-recursive type description.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub name: String,
    pub base_type: DataTypeTag,
    pub size: u32,
    pub element_type: Option<Box<TypeInfo>>,
    pub array_bounds: Vec<(i32, i32)>,
    pub fields: Vec<FieldInfo>,
}

impl TypeInfo {
    pub fn is_struct(&self) -> bool {
        self.base_type == DataTypeTag::Struct
    }

    pub fn is_array(&self) -> bool {
        self.base_type == DataTypeTag::Array
    }

    fn primitive(name: &str, base_type: DataTypeTag, size: u32) -> Self {
        Self {
            name: name.to_string(),
            base_type,
            size,
            element_type: None,
            array_bounds: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn bool_() -> Self {
        Self::primitive("BOOL", DataTypeTag::Bool, 1)
    }
    pub fn int16() -> Self {
        Self::primitive("INT", DataTypeTag::Int16, 2)
    }
    pub fn uint16() -> Self {
        Self::primitive("UINT", DataTypeTag::UInt16, 2)
    }
    pub fn real32() -> Self {
        Self::primitive("REAL", DataTypeTag::Real32, 4)
    }
    pub fn string(len: u32) -> Self {
        Self::primitive("STRING", DataTypeTag::String, len)
    }
    pub fn time() -> Self {
        Self::primitive("TIME", DataTypeTag::Time, 4)
    }
}

/// A resolved PLC variable: name, raw address, and its type.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub index_group: IndexGroup,
    pub index_offset: IndexOffset,
    pub size: u32,
    pub type_name: String,
    pub comment: String,
    pub type_info: TypeInfo,
}

/// A dynamic value decoded from, or destined for, PLC memory.
///
/// Kept as an explicit tagged sum rather than a single catch-all so callers
/// who know their shape ahead of time use the statically-typed
/// [`crate::client::Client`] helpers instead of matching on this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    String(String),
    WString(String),
    Time(Duration),
    TimeOfDay(Duration),
    Date(NaiveDate),
    DateAndTime(DateTime<Utc>),
    Struct(Vec<(String, Value)>),
    Array(Vec<Value>),
}

/// Decodes `bytes` according to `type_info`, per the value-decoder table of §4.4.
pub fn parse(bytes: &[u8], type_info: &TypeInfo) -> Result<Value, ValueError> {
    let need = type_info.size as usize;
    if bytes.len() < need {
        return Err(ValueError::ShortBuffer {
            expected: need,
            got: bytes.len(),
        });
    }
    let bytes = &bytes[..need];

    Ok(match type_info.base_type {
        DataTypeTag::Bool => Value::Bool(bytes[0] != 0),
        DataTypeTag::Int8 => Value::Int8(bytes[0] as i8),
        DataTypeTag::Int16 => Value::Int16(i16::from_le_bytes(bytes.try_into().unwrap())),
        DataTypeTag::Int32 => Value::Int32(i32::from_le_bytes(bytes.try_into().unwrap())),
        DataTypeTag::Int64 => Value::Int64(i64::from_le_bytes(bytes.try_into().unwrap())),
        DataTypeTag::UInt8 => Value::UInt8(bytes[0]),
        DataTypeTag::UInt16 => Value::UInt16(u16::from_le_bytes(bytes.try_into().unwrap())),
        DataTypeTag::UInt32 => Value::UInt32(u32::from_le_bytes(bytes.try_into().unwrap())),
        DataTypeTag::UInt64 => Value::UInt64(u64::from_le_bytes(bytes.try_into().unwrap())),
        DataTypeTag::Real32 => Value::Real32(f32::from_le_bytes(bytes.try_into().unwrap())),
        DataTypeTag::Real64 => Value::Real64(f64::from_le_bytes(bytes.try_into().unwrap())),
        DataTypeTag::String => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes[..end]);
            Value::String(decoded.into_owned())
        }
        DataTypeTag::WString => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            Value::WString(String::from_utf16_lossy(&units))
        }
        DataTypeTag::Time => {
            Value::Time(Duration::from_millis(u32::from_le_bytes(bytes.try_into().unwrap()) as u64))
        }
        DataTypeTag::TimeOfDay => Value::TimeOfDay(Duration::from_millis(
            u32::from_le_bytes(bytes.try_into().unwrap()) as u64,
        )),
        DataTypeTag::Date => {
            let secs = u32::from_le_bytes(bytes.try_into().unwrap()) as i64;
            Value::Date(
                DateTime::<Utc>::from(std::time::UNIX_EPOCH + Duration::from_secs(secs as u64))
                    .date_naive(),
            )
        }
        DataTypeTag::DateAndTime => {
            let secs = u32::from_le_bytes(bytes.try_into().unwrap()) as i64;
            Value::DateAndTime(
                Utc.timestamp_opt(secs, 0)
                    .single()
                    .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap()),
            )
        }
        DataTypeTag::Struct => {
            let mut fields = Vec::with_capacity(type_info.fields.len());
            for field in &type_info.fields {
                let start = field.offset as usize;
                let end = start + field.type_info.size as usize;
                if end > bytes.len() {
                    return Err(ValueError::ShortBuffer {
                        expected: end,
                        got: bytes.len(),
                    });
                }
                fields.push((field.name.clone(), parse(&bytes[start..end], &field.type_info)?));
            }
            Value::Struct(fields)
        }
        DataTypeTag::Array => {
            let element = type_info
                .element_type
                .as_deref()
                .ok_or_else(|| ValueError::TypeMismatch {
                    type_name: type_info.name.clone(),
                })?;
            let count = array_element_count(type_info);
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                let start = i * element.size as usize;
                let end = start + element.size as usize;
                items.push(parse(&bytes[start..end], element)?);
            }
            Value::Array(items)
        }
    })
}

/// Encodes `value` against `type_info`, the inverse of [`parse`].
pub fn encode(value: &Value, type_info: &TypeInfo) -> Result<Vec<u8>, ValueError> {
    let mismatch = || ValueError::TypeMismatch {
        type_name: type_info.name.clone(),
    };

    Ok(match (value, type_info.base_type) {
        (Value::Bool(b), DataTypeTag::Bool) => vec![*b as u8],
        (Value::Int8(v), DataTypeTag::Int8) => vec![*v as u8],
        (Value::Int16(v), DataTypeTag::Int16) => v.to_le_bytes().to_vec(),
        (Value::Int32(v), DataTypeTag::Int32) => v.to_le_bytes().to_vec(),
        (Value::Int64(v), DataTypeTag::Int64) => v.to_le_bytes().to_vec(),
        (Value::UInt8(v), DataTypeTag::UInt8) => vec![*v],
        (Value::UInt16(v), DataTypeTag::UInt16) => v.to_le_bytes().to_vec(),
        (Value::UInt32(v), DataTypeTag::UInt32) => v.to_le_bytes().to_vec(),
        (Value::UInt64(v), DataTypeTag::UInt64) => v.to_le_bytes().to_vec(),
        (Value::Real32(v), DataTypeTag::Real32) => v.to_le_bytes().to_vec(),
        (Value::Real64(v), DataTypeTag::Real64) => v.to_le_bytes().to_vec(),
        (Value::String(s), DataTypeTag::String) => {
            let (encoded, _, had_errors) = encoding_rs::WINDOWS_1252.encode(s);
            if had_errors {
                return Err(ValueError::InvalidEncoding);
            }
            let cap = type_info.size as usize;
            if encoded.len() + 1 > cap {
                return Err(ValueError::ShortBuffer {
                    expected: encoded.len() + 1,
                    got: cap,
                });
            }
            let mut buf = vec![0u8; cap];
            buf[..encoded.len()].copy_from_slice(&encoded);
            buf
        }
        (Value::WString(s), DataTypeTag::WString) => {
            let cap = type_info.size as usize;
            let mut buf = vec![0u8; cap];
            let mut offset = 0;
            for unit in s.encode_utf16() {
                if offset + 2 > cap.saturating_sub(2) {
                    break;
                }
                buf[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
                offset += 2;
            }
            buf
        }
        (Value::Time(d), DataTypeTag::Time) | (Value::TimeOfDay(d), DataTypeTag::TimeOfDay) => {
            (d.as_millis() as u32).to_le_bytes().to_vec()
        }
        (Value::Date(date), DataTypeTag::Date) => {
            let dt = date.and_hms_opt(0, 0, 0).ok_or_else(mismatch)?.and_utc();
            (dt.timestamp() as u32).to_le_bytes().to_vec()
        }
        (Value::DateAndTime(dt), DataTypeTag::DateAndTime) => {
            (dt.timestamp() as u32).to_le_bytes().to_vec()
        }
        (Value::Struct(fields), DataTypeTag::Struct) => {
            let mut buf = vec![0u8; type_info.size as usize];
            for field in &type_info.fields {
                let Some((_, v)) = fields.iter().find(|(name, _)| name == &field.name) else {
                    continue;
                };
                let encoded = encode(v, &field.type_info)?;
                let start = field.offset as usize;
                buf[start..start + encoded.len()].copy_from_slice(&encoded);
            }
            buf
        }
        (Value::Array(items), DataTypeTag::Array) => {
            let element = type_info.element_type.as_deref().ok_or_else(mismatch)?;
            let mut buf = Vec::with_capacity(type_info.size as usize);
            for item in items {
                buf.extend(encode(item, element)?);
            }
            buf
        }
        _ => return Err(mismatch()),
    })
}

fn array_element_count(type_info: &TypeInfo) -> usize {
    type_info
        .array_bounds
        .iter()
        .map(|&(lo, hi)| (hi - lo + 1).max(0) as usize)
        .product()
}

/// One step of a tokenized symbol path: a field access or a (possibly
/// multi-dimensional) array index.
#[derive(Debug, Clone, PartialEq)]
enum Accessor {
    Field(String),
    Index(Vec<i32>),
}

fn tokenize(path: &str) -> Result<(String, Vec<Accessor>), ResolveError> {
    let mut head_end = path.len();
    for (i, c) in path.char_indices() {
        if c == '.' || c == '[' {
            head_end = i;
            break;
        }
    }
    let head = path[..head_end].to_string();
    let mut accessors = Vec::new();
    let rest = &path[head_end..];

    let mut iter = rest.char_indices().peekable();
    while let Some(&(i, c)) = iter.peek() {
        match c {
            '.' => {
                iter.next();
                let start = i + 1;
                let mut end = rest.len();
                for (j, c2) in rest[start..].char_indices() {
                    if c2 == '.' || c2 == '[' {
                        end = start + j;
                        break;
                    }
                }
                accessors.push(Accessor::Field(rest[start..end].to_string()));
                while iter.peek().map(|&(k, _)| k < end).unwrap_or(false) {
                    iter.next();
                }
            }
            '[' => {
                iter.next();
                let start = i + 1;
                let mut end = rest.len();
                for (j, c2) in rest[start..].char_indices() {
                    if c2 == ']' {
                        end = start + j;
                        break;
                    }
                }
                let indices: Result<Vec<i32>, _> = rest[start..end]
                    .split(',')
                    .map(|s| s.trim().parse::<i32>())
                    .collect();
                let indices = indices.map_err(|_| ResolveError::FieldNotFound {
                    type_name: head.clone(),
                    field: rest[start..end].to_string(),
                })?;
                accessors.push(Accessor::Index(indices));
                while iter.peek().map(|&(k, _)| k <= end).unwrap_or(false) {
                    iter.next();
                }
            }
            _ => {
                iter.next();
            }
        }
    }

    Ok((head, accessors))
}

/// Caches the PLC's symbol table and resolves dotted/bracketed paths.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    symbols: HashMap<String, Symbol>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cache wholesale, e.g. after `UploadSymbols` or `RefreshSymbols`.
    pub fn load(&mut self, symbols: Vec<Symbol>) {
        self.symbols = symbols.into_iter().map(|s| (s.name.clone(), s)).collect();
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Resolves `path` per the algorithm of §4.4: `(index_group, index_offset, size, type)`.
    pub fn resolve(&self, path: &str) -> Result<(IndexGroup, IndexOffset, u32, TypeInfo), ResolveError> {
        let (head, accessors) = tokenize(path)?;
        let symbol = self
            .symbols
            .get(&head)
            .ok_or_else(|| ResolveError::SymbolNotFound(head.clone()))?;

        let mut cur_type = symbol.type_info.clone();
        let mut cur_offset = symbol.index_offset;

        for accessor in accessors {
            match accessor {
                Accessor::Field(field_name) => {
                    if !cur_type.is_struct() {
                        return Err(ResolveError::NotAStruct {
                            type_name: cur_type.name.clone(),
                        });
                    }
                    let field = cur_type
                        .fields
                        .iter()
                        .find(|f| f.name == field_name)
                        .ok_or_else(|| ResolveError::FieldNotFound {
                            type_name: cur_type.name.clone(),
                            field: field_name.clone(),
                        })?;
                    cur_offset += field.offset;
                    cur_type = field.type_info.clone();
                }
                Accessor::Index(indices) => {
                    if !cur_type.is_array() {
                        return Err(ResolveError::NotAnArray {
                            type_name: cur_type.name.clone(),
                        });
                    }
                    if indices.len() != cur_type.array_bounds.len() {
                        return Err(ResolveError::WrongIndexCount {
                            expected: cur_type.array_bounds.len(),
                            got: indices.len(),
                        });
                    }
                    let element = cur_type
                        .element_type
                        .clone()
                        .ok_or_else(|| ResolveError::NotAnArray {
                            type_name: cur_type.name.clone(),
                        })?;

                    let mut linear = 0i64;
                    for (d, (&idx, &(lo, hi))) in
                        indices.iter().zip(cur_type.array_bounds.iter()).enumerate()
                    {
                        if idx < lo || idx > hi {
                            return Err(ResolveError::IndexOutOfRange {
                                dimension: d,
                                index: idx,
                                lo,
                                hi,
                            });
                        }
                        let extent_after: i64 = cur_type.array_bounds[d + 1..]
                            .iter()
                            .map(|&(lo2, hi2)| (hi2 - lo2 + 1) as i64)
                            .product();
                        linear += (idx - lo) as i64 * extent_after;
                    }

                    cur_offset += (linear as u32) * element.size;
                    cur_type = *element;
                }
            }
        }

        let size = cur_type.size;
        Ok((symbol.index_group, cur_offset, size, cur_type))
    }
}
