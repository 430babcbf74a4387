// Incremental PLY reader
// Bytes arrive in arbitrary chunks. The reader buffers the header until end_header, then
// decodes only whole records per push and carries the remainder forward. Properties that
// were not requested are still walked (to keep record alignment) but never stored.

use std::collections::HashSet;
use std::io::{ErrorKind, Read};

use tracing::{debug, trace};

use crate::error::PlyError;

/// Upper bound on header size before we give up looking for end_header
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

const END_HEADER: &[u8] = b"end_header";

/// Per-column reservation ceiling; declared counts are untrusted
const MAX_PREALLOC: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlyFormat::Ascii => "ascii",
            PlyFormat::BinaryLittleEndian => "binary_little_endian",
            PlyFormat::BinaryBigEndian => "binary_big_endian",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "ascii" => Some(PlyFormat::Ascii),
            "binary_little_endian" => Some(PlyFormat::BinaryLittleEndian),
            "binary_big_endian" => Some(PlyFormat::BinaryBigEndian),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl ScalarType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "char" | "int8" => Some(Self::Char),
            "uchar" | "uint8" => Some(Self::UChar),
            "short" | "int16" => Some(Self::Short),
            "ushort" | "uint16" => Some(Self::UShort),
            "int" | "int32" => Some(Self::Int),
            "uint" | "uint32" => Some(Self::UInt),
            "float" | "float32" => Some(Self::Float),
            "double" | "float64" => Some(Self::Double),
            _ => None,
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            ScalarType::Char | ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
            ScalarType::Double => 8,
        }
    }
}

/// Decode one scalar from exactly `size_bytes()` bytes
fn read_scalar(b: &[u8], ty: ScalarType, little: bool) -> f64 {
    macro_rules! num {
        ($t:ty, $n:literal) => {{
            let mut arr = [0u8; $n];
            arr.copy_from_slice(&b[..$n]);
            if little {
                <$t>::from_le_bytes(arr) as f64
            } else {
                <$t>::from_be_bytes(arr) as f64
            }
        }};
    }
    match ty {
        ScalarType::Char => b[0] as i8 as f64,
        ScalarType::UChar => b[0] as f64,
        ScalarType::Short => num!(i16, 2),
        ScalarType::UShort => num!(u16, 2),
        ScalarType::Int => num!(i32, 4),
        ScalarType::UInt => num!(u32, 4),
        ScalarType::Float => num!(f32, 4),
        ScalarType::Double => num!(f64, 8),
    }
}

/// Typed backing array for one property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyStorage {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl PropertyStorage {
    fn with_capacity(ty: ScalarType, capacity: usize) -> Self {
        match ty {
            ScalarType::Char => Self::I8(Vec::with_capacity(capacity)),
            ScalarType::UChar => Self::U8(Vec::with_capacity(capacity)),
            ScalarType::Short => Self::I16(Vec::with_capacity(capacity)),
            ScalarType::UShort => Self::U16(Vec::with_capacity(capacity)),
            ScalarType::Int => Self::I32(Vec::with_capacity(capacity)),
            ScalarType::UInt => Self::U32(Vec::with_capacity(capacity)),
            ScalarType::Float => Self::F32(Vec::with_capacity(capacity)),
            ScalarType::Double => Self::F64(Vec::with_capacity(capacity)),
        }
    }

    fn push_binary(&mut self, b: &[u8], little: bool) {
        macro_rules! push {
            ($v:expr, $t:ty, $n:literal) => {{
                let mut arr = [0u8; $n];
                arr.copy_from_slice(&b[..$n]);
                $v.push(if little {
                    <$t>::from_le_bytes(arr)
                } else {
                    <$t>::from_be_bytes(arr)
                });
            }};
        }
        match self {
            Self::I8(v) => v.push(b[0] as i8),
            Self::U8(v) => v.push(b[0]),
            Self::I16(v) => push!(v, i16, 2),
            Self::U16(v) => push!(v, u16, 2),
            Self::I32(v) => push!(v, i32, 4),
            Self::U32(v) => push!(v, u32, 4),
            Self::F32(v) => push!(v, f32, 4),
            Self::F64(v) => push!(v, f64, 8),
        }
    }

    /// Returns false when the token does not parse as this type
    fn push_ascii(&mut self, token: &str) -> bool {
        macro_rules! push {
            ($v:expr) => {
                match token.parse() {
                    Ok(x) => {
                        $v.push(x);
                        true
                    }
                    Err(_) => false,
                }
            };
        }
        match self {
            Self::I8(v) => push!(v),
            Self::U8(v) => push!(v),
            Self::I16(v) => push!(v),
            Self::U16(v) => push!(v),
            Self::I32(v) => push!(v),
            Self::U32(v) => push!(v),
            Self::F32(v) => push!(v),
            Self::F64(v) => push!(v),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_f64(&self, i: usize) -> Option<f64> {
        match self {
            Self::I8(v) => v.get(i).map(|&x| x as f64),
            Self::U8(v) => v.get(i).map(|&x| x as f64),
            Self::I16(v) => v.get(i).map(|&x| x as f64),
            Self::U16(v) => v.get(i).map(|&x| x as f64),
            Self::I32(v) => v.get(i).map(|&x| x as f64),
            Self::U32(v) => v.get(i).map(|&x| x as f64),
            Self::F32(v) => v.get(i).map(|&x| x as f64),
            Self::F64(v) => v.get(i).copied(),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Widen or narrow every value to f32
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Self::F32(v) => v.clone(),
            _ => (0..self.len())
                .map(|i| self.get_f64(i).unwrap_or_default() as f32)
                .collect(),
        }
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::I8(_) => ScalarType::Char,
            Self::U8(_) => ScalarType::UChar,
            Self::I16(_) => ScalarType::Short,
            Self::U16(_) => ScalarType::UShort,
            Self::I32(_) => ScalarType::Int,
            Self::U32(_) => ScalarType::UInt,
            Self::F32(_) => ScalarType::Float,
            Self::F64(_) => ScalarType::Double,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    /// Variable-length list; walked for alignment, never stored
    List { count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlyProperty {
    pub name: String,
    pub kind: PropertyKind,
    /// Present only for requested scalar properties
    pub storage: Option<PropertyStorage>,
}

/// A named record group with its declared count and ordered properties
#[derive(Debug, Clone, PartialEq)]
pub struct PlyElement {
    pub name: String,
    pub count: usize,
    pub properties: Vec<PlyProperty>,
}

impl PlyElement {
    pub fn property(&self, name: &str) -> Option<&PlyProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Backing array of a stored property
    pub fn storage(&self, name: &str) -> Option<&PropertyStorage> {
        self.property(name).and_then(|p| p.storage.as_ref())
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    Body,
    Done,
}

/// Resumable PLY parser
pub struct PlyReader {
    wanted: Option<HashSet<String>>,
    buffer: Vec<u8>,
    stage: Stage,
    format: PlyFormat,
    elements: Vec<PlyElement>,
    /// Index of the element currently being filled
    element: usize,
    /// Records already decoded for the current element
    record: usize,
}

impl Default for PlyReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PlyReader {
    /// Reader that stores every scalar property
    pub fn new() -> Self {
        Self {
            wanted: None,
            buffer: Vec::new(),
            stage: Stage::Header,
            format: PlyFormat::BinaryLittleEndian,
            elements: Vec::new(),
            element: 0,
            record: 0,
        }
    }

    /// Reader that only allocates storage for the named properties
    pub fn with_properties<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            wanted: Some(names.iter().map(|n| n.as_ref().to_string()).collect()),
            ..Self::new()
        }
    }

    /// Format declared in the header, once parsed
    pub fn format(&self) -> Option<PlyFormat> {
        (self.stage != Stage::Header).then_some(self.format)
    }

    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Feed the next chunk of the stream
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), PlyError> {
        if self.stage == Stage::Done {
            return Ok(());
        }
        self.buffer.extend_from_slice(chunk);

        if self.stage == Stage::Header {
            let min = self.buffer.len().min(3);
            if self.buffer[..min] != b"ply"[..min] {
                return Err(PlyError::MissingMagic);
            }
            let Some(header_end) = find_header_end(&self.buffer) else {
                if self.buffer.len() > MAX_HEADER_BYTES {
                    return Err(PlyError::HeaderTooLarge {
                        limit: MAX_HEADER_BYTES,
                    });
                }
                return Ok(());
            };
            self.parse_header(header_end)?;
            self.buffer.drain(..header_end);
            self.stage = Stage::Body;
        }

        self.consume_body(false)
    }

    /// Signal end of stream and hand back the parsed elements
    pub fn finish(mut self) -> Result<Vec<PlyElement>, PlyError> {
        match self.stage {
            Stage::Header => Err(PlyError::MissingEndHeader),
            Stage::Body => {
                self.consume_body(true)?;
                if self.stage == Stage::Done {
                    return Ok(self.elements);
                }
                let el = &self.elements[self.element];
                Err(PlyError::UnexpectedEof {
                    element: el.name.clone(),
                    expected: el.count,
                    read: self.record,
                })
            }
            Stage::Done => Ok(self.elements),
        }
    }

    fn parse_header(&mut self, header_end: usize) -> Result<(), PlyError> {
        let text = std::str::from_utf8(&self.buffer[..header_end]).map_err(|_| {
            PlyError::InvalidHeader {
                line: 0,
                reason: "header is not valid utf-8".to_string(),
            }
        })?;

        let mut lines = text.lines().map(str::trim).enumerate();
        match lines.next() {
            Some((_, "ply")) => {}
            _ => return Err(PlyError::MissingMagic),
        }

        let invalid = |line: usize, reason: &str| PlyError::InvalidHeader {
            line: line + 1,
            reason: reason.to_string(),
        };

        let mut format = None;
        let mut elements: Vec<PlyElement> = Vec::new();

        for (n, line) in lines {
            let mut it = line.split_whitespace();
            let Some(tag) = it.next() else {
                continue;
            };
            match tag {
                "comment" | "obj_info" => {}
                "end_header" => break,
                "format" => {
                    let name = it.next().ok_or_else(|| invalid(n, "missing format name"))?;
                    let f = PlyFormat::parse(name)
                        .ok_or_else(|| PlyError::UnsupportedFormat(name.to_string()))?;
                    format = Some(f);
                }
                "element" => {
                    let name = it.next().ok_or_else(|| invalid(n, "missing element name"))?;
                    let count = it
                        .next()
                        .and_then(|c| c.parse::<usize>().ok())
                        .ok_or_else(|| invalid(n, "bad element count"))?;
                    elements.push(PlyElement {
                        name: name.to_string(),
                        count,
                        properties: Vec::new(),
                    });
                }
                "property" => {
                    let el = elements
                        .last_mut()
                        .ok_or_else(|| invalid(n, "property before element"))?;
                    let t = it.next().ok_or_else(|| invalid(n, "missing property type"))?;
                    let (kind, name) = if t == "list" {
                        let count = it
                            .next()
                            .and_then(ScalarType::parse)
                            .ok_or_else(|| invalid(n, "bad list count type"))?;
                        let item = it
                            .next()
                            .and_then(ScalarType::parse)
                            .ok_or_else(|| invalid(n, "bad list item type"))?;
                        let name = it.next().ok_or_else(|| invalid(n, "missing list name"))?;
                        (PropertyKind::List { count, item }, name)
                    } else {
                        let ty = ScalarType::parse(t)
                            .ok_or_else(|| invalid(n, &format!("unknown type \"{t}\"")))?;
                        let name = it.next().ok_or_else(|| invalid(n, "missing property name"))?;
                        (PropertyKind::Scalar(ty), name)
                    };
                    let storage = match kind {
                        PropertyKind::Scalar(ty) if self.is_wanted(name) => Some(
                            PropertyStorage::with_capacity(ty, el.count.min(MAX_PREALLOC)),
                        ),
                        _ => None,
                    };
                    el.properties.push(PlyProperty {
                        name: name.to_string(),
                        kind,
                        storage,
                    });
                }
                other => return Err(invalid(n, &format!("unknown directive \"{other}\""))),
            }
        }

        self.format = format.ok_or_else(|| PlyError::InvalidHeader {
            line: 0,
            reason: "missing format line".to_string(),
        })?;
        debug!(
            "PLY header: {} with elements [{}]",
            self.format.as_str(),
            elements
                .iter()
                .map(|e| format!("{}({})", e.name, e.count))
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.elements = elements;
        Ok(())
    }

    fn is_wanted(&self, name: &str) -> bool {
        self.wanted.as_ref().map_or(true, |w| w.contains(name))
    }

    /// Decode every whole record currently buffered. `eof` lets an unterminated
    /// trailing ASCII line count as a record.
    fn consume_body(&mut self, eof: bool) -> Result<(), PlyError> {
        let consumed = match self.format {
            PlyFormat::Ascii => self.consume_ascii(eof)?,
            PlyFormat::BinaryLittleEndian => self.consume_binary(true),
            PlyFormat::BinaryBigEndian => self.consume_binary(false),
        };
        self.buffer.drain(..consumed);
        self.skip_finished_elements();
        if self.stage == Stage::Done {
            self.buffer = Vec::new();
        }
        Ok(())
    }

    fn skip_finished_elements(&mut self) {
        while self.element < self.elements.len() && self.record >= self.elements[self.element].count
        {
            self.element += 1;
            self.record = 0;
        }
        if self.element >= self.elements.len() && self.stage != Stage::Done {
            self.stage = Stage::Done;
            trace!("PLY body complete");
        }
    }

    fn consume_binary(&mut self, little: bool) -> usize {
        let mut pos = 0;
        loop {
            self.skip_finished_elements();
            if self.stage == Stage::Done {
                return pos;
            }
            let el = &mut self.elements[self.element];
            let Some(len) = binary_record_len(&el.properties, &self.buffer[pos..], little) else {
                return pos;
            };
            decode_binary_record(&mut el.properties, &self.buffer[pos..pos + len], little);
            pos += len;
            self.record += 1;
        }
    }

    fn consume_ascii(&mut self, eof: bool) -> Result<usize, PlyError> {
        let mut pos = 0;
        loop {
            self.skip_finished_elements();
            if self.stage == Stage::Done {
                return Ok(pos);
            }
            let rest = &self.buffer[pos..];
            let (line, advance) = match rest.iter().position(|&b| b == b'\n') {
                Some(nl) => (&rest[..nl], nl + 1),
                None if eof && !rest.is_empty() => (rest, rest.len()),
                None => return Ok(pos),
            };
            let line = std::str::from_utf8(line).map_err(|_| PlyError::InvalidValue {
                element: self.elements[self.element].name.clone(),
                property: String::new(),
                token: "<non-utf8>".to_string(),
            })?;
            pos += advance;
            if line.trim().is_empty() {
                continue;
            }
            let el = &mut self.elements[self.element];
            decode_ascii_record(&el.name, &mut el.properties, line)?;
            self.record += 1;
        }
    }
}

/// Locate the first byte after the end_header line. Only a whole line matches, so
/// `end_header` inside a comment does not end the header.
fn find_header_end(bytes: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(i) = bytes[from..]
        .windows(END_HEADER.len())
        .position(|w| w == END_HEADER)
    {
        let start = from + i;
        let k = start + END_HEADER.len();
        if start > 0 && bytes[start - 1] != b'\n' {
            from = start + 1;
            continue;
        }
        match bytes.get(k) {
            Some(b'\n') => return Some(k + 1),
            Some(b'\r') if bytes.get(k + 1) == Some(&b'\n') => return Some(k + 2),
            // need more bytes to see the terminator
            None => return None,
            Some(b'\r') if k + 1 == bytes.len() => return None,
            _ => from = k,
        }
    }
    None
}

/// Size of the next record, or None when it is not fully buffered
fn binary_record_len(props: &[PlyProperty], bytes: &[u8], little: bool) -> Option<usize> {
    let mut len = 0;
    for p in props {
        match p.kind {
            PropertyKind::Scalar(ty) => len += ty.size_bytes(),
            PropertyKind::List { count, item } => {
                let end = len + count.size_bytes();
                if end > bytes.len() {
                    return None;
                }
                let n = read_scalar(&bytes[len..end], count, little).max(0.0) as usize;
                len = end.saturating_add(n.saturating_mul(item.size_bytes()));
            }
        }
    }
    (len <= bytes.len()).then_some(len)
}

fn decode_binary_record(props: &mut [PlyProperty], bytes: &[u8], little: bool) {
    let mut off = 0;
    for p in props.iter_mut() {
        match p.kind {
            PropertyKind::Scalar(ty) => {
                let size = ty.size_bytes();
                if let Some(storage) = p.storage.as_mut() {
                    storage.push_binary(&bytes[off..off + size], little);
                }
                off += size;
            }
            PropertyKind::List { count, item } => {
                let end = off + count.size_bytes();
                let n = read_scalar(&bytes[off..end], count, little).max(0.0) as usize;
                off = end.saturating_add(n.saturating_mul(item.size_bytes()));
            }
        }
    }
}

fn decode_ascii_record(
    element: &str,
    props: &mut [PlyProperty],
    line: &str,
) -> Result<(), PlyError> {
    let mut tokens = line.split_whitespace();
    for p in props.iter_mut() {
        let mut next = || {
            tokens.next().ok_or_else(|| PlyError::InvalidValue {
                element: element.to_string(),
                property: p.name.clone(),
                token: "<missing>".to_string(),
            })
        };
        match p.kind {
            PropertyKind::Scalar(_) => {
                let token = next()?;
                if let Some(storage) = p.storage.as_mut() {
                    if !storage.push_ascii(token) {
                        return Err(PlyError::InvalidValue {
                            element: element.to_string(),
                            property: p.name.clone(),
                            token: token.to_string(),
                        });
                    }
                }
            }
            PropertyKind::List { .. } => {
                let token = next()?;
                let n: usize = token.parse().map_err(|_| PlyError::InvalidValue {
                    element: element.to_string(),
                    property: p.name.clone(),
                    token: token.to_string(),
                })?;
                for _ in 0..n {
                    next()?;
                }
            }
        }
    }
    Ok(())
}

/// Drive a PlyReader from any byte source using fixed-size reads
pub fn read_ply<R: Read>(
    mut source: R,
    wanted: Option<&[&str]>,
    chunk_size: usize,
) -> Result<Vec<PlyElement>, PlyError> {
    let mut reader = match wanted {
        Some(names) => PlyReader::with_properties(names),
        None => PlyReader::new(),
    };
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        reader.push(&chunk[..n])?;
        if reader.is_complete() {
            break;
        }
    }
    reader.finish()
}
