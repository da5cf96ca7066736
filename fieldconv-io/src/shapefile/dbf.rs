//! dBASE III 属性表。每条记录以 1 字节删除标记开头（`*` 表示已删除），
//! 该标记不计入字段表。字符字段写出为 UTF-8。

use chrono::{Datelike, Local};
use fieldconv_core::feature::{AttributeValue, FieldDescriptor, FieldKind};

use crate::IoError;
use crate::text::{DBF_ENCODINGS, decode_with};

pub const NAME_FIELD_LENGTH: u8 = 254;

const VERSION: u8 = 0x03;
const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const MAX_NAME_BYTES: usize = 10;

#[derive(Debug)]
pub(super) struct DbfRow {
    pub deleted: bool,
    pub values: Vec<AttributeValue>,
}

#[derive(Debug)]
pub(super) struct DbfTable {
    pub fields: Vec<FieldDescriptor>,
    pub records: Vec<DbfRow>,
}

fn read_u16_le(bytes: &[u8], offset: usize) -> usize {
    usize::from(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]))
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let is_pad = |b: &u8| *b == b' ' || *b == 0;
    let start = bytes.iter().position(|b| !is_pad(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_pad(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}

pub(super) fn decode_dbf(bytes: &[u8]) -> Result<DbfTable, String> {
    if bytes.len() < HEADER_LEN {
        return Err(format!("dBASE header needs {HEADER_LEN} bytes, found {}", bytes.len()));
    }
    let record_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let header_len = read_u16_le(bytes, 8);
    let record_len = read_u16_le(bytes, 10);
    if header_len > bytes.len() {
        return Err(format!("header length {header_len} exceeds file size {}", bytes.len()));
    }

    let mut fields = Vec::new();
    let mut offset = HEADER_LEN;
    while offset + DESCRIPTOR_LEN <= header_len && bytes[offset] != HEADER_TERMINATOR {
        let descriptor = &bytes[offset..offset + DESCRIPTOR_LEN];
        let name_end = descriptor[..11].iter().position(|b| *b == 0).unwrap_or(11);
        fields.push(FieldDescriptor {
            name: String::from_utf8_lossy(&descriptor[..name_end]).trim().to_string(),
            // 备注等不支持的类型按字符读取。
            kind: FieldKind::from_code(descriptor[11].to_ascii_uppercase())
                .unwrap_or(FieldKind::Character),
            length: descriptor[16],
            decimals: descriptor[17],
        });
        offset += DESCRIPTOR_LEN;
    }

    let needed = 1 + fields.iter().map(|f| usize::from(f.length)).sum::<usize>();
    if record_len < needed {
        return Err(format!("record length {record_len} is shorter than the {needed} bytes its fields need"));
    }

    let fits = record_count
        .checked_mul(record_len)
        .and_then(|len| len.checked_add(header_len))
        .is_some_and(|end| end <= bytes.len());
    if !fits {
        return Err(format!(
            "header claims {record_count} record(s) of {record_len} bytes but the file has {} bytes",
            bytes.len()
        ));
    }
    let mut records = Vec::with_capacity(record_count);
    for index in 0..record_count {
        let start = header_len + index * record_len;
        let raw = bytes
            .get(start..start + record_len)
            .ok_or_else(|| format!("truncated at record {}", index + 1))?;
        let mut pos = 1;
        let mut values = Vec::with_capacity(fields.len());
        for field in &fields {
            let width = usize::from(field.length);
            values.push(decode_value(field.kind, &raw[pos..pos + width]));
            pos += width;
        }
        records.push(DbfRow {
            deleted: raw[0] == b'*',
            values,
        });
    }

    Ok(DbfTable { fields, records })
}

fn decode_value(kind: FieldKind, cell: &[u8]) -> AttributeValue {
    let trimmed = trim_padding(cell);
    match kind {
        FieldKind::Character => AttributeValue::Character(
            decode_with(trimmed, &DBF_ENCODINGS)
                .map(|decoded| decoded.text)
                .unwrap_or_else(|| String::from_utf8_lossy(trimmed).into_owned()),
        ),
        FieldKind::Numeric | FieldKind::Float => {
            let text = String::from_utf8_lossy(trimmed);
            AttributeValue::Numeric(if text.starts_with('*') {
                None
            } else {
                text.parse::<f64>().ok()
            })
        }
        FieldKind::Logical => AttributeValue::Logical(match trimmed.first() {
            Some(b'T' | b't' | b'Y' | b'y') => Some(true),
            Some(b'F' | b'f' | b'N' | b'n') => Some(false),
            _ => None,
        }),
        FieldKind::Date => AttributeValue::Date(String::from_utf8_lossy(trimmed).into_owned()),
    }
}

fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn format_number(value: f64, decimals: u8) -> String {
    format!("{:.*}", usize::from(decimals), value)
}

fn invalid(field: &FieldDescriptor, message: impl Into<String>) -> IoError {
    IoError::InvalidAttribute {
        field: field.name.clone(),
        message: message.into(),
    }
}

fn encode_cell(field: &FieldDescriptor, value: &AttributeValue) -> Result<Vec<u8>, IoError> {
    let width = usize::from(field.length);
    let mut cell = match field.kind {
        FieldKind::Character | FieldKind::Date => {
            let text = match value {
                AttributeValue::Character(text) | AttributeValue::Date(text) => text.clone(),
                AttributeValue::Numeric(Some(number)) if number.fract() == 0.0 => format_number(*number, 0),
                AttributeValue::Numeric(Some(number)) => number.to_string(),
                AttributeValue::Numeric(None) | AttributeValue::Logical(None) => String::new(),
                AttributeValue::Logical(Some(flag)) => (if *flag { "T" } else { "F" }).to_string(),
            };
            truncate_utf8(&text, width).as_bytes().to_vec()
        }
        FieldKind::Numeric | FieldKind::Float => {
            let number = match value {
                AttributeValue::Numeric(number) => *number,
                AttributeValue::Logical(flag) => flag.map(|flag| if flag { 1.0 } else { 0.0 }),
                AttributeValue::Character(text) | AttributeValue::Date(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        None
                    } else {
                        Some(text.parse::<f64>().map_err(|_| {
                            invalid(field, format!("`{text}` is not a number"))
                        })?)
                    }
                }
            };
            match number.filter(|number| number.is_finite()) {
                None => Vec::new(),
                Some(number) => {
                    let text = format_number(number, field.decimals);
                    if text.len() > width {
                        return Err(invalid(
                            field,
                            format!("{text} does not fit in {width} characters"),
                        ));
                    }
                    let mut cell = vec![b' '; width - text.len()];
                    cell.extend_from_slice(text.as_bytes());
                    cell
                }
            }
        }
        FieldKind::Logical => {
            let flag = match value {
                AttributeValue::Logical(flag) => *flag,
                AttributeValue::Numeric(number) => number.map(|number| number != 0.0),
                AttributeValue::Character(text) | AttributeValue::Date(text) => {
                    match text.trim().chars().next() {
                        Some('T' | 't' | 'Y' | 'y' | '1') => Some(true),
                        Some('F' | 'f' | 'N' | 'n' | '0') => Some(false),
                        _ => None,
                    }
                }
            };
            let code = match flag {
                Some(true) => b'T',
                Some(false) => b'F',
                None => b'?',
            };
            vec![code]
        }
    };
    cell.truncate(width);
    cell.resize(width, b' ');
    Ok(cell)
}

pub(super) fn encode_dbf(
    fields: &[FieldDescriptor],
    rows: &[&[AttributeValue]],
) -> Result<Vec<u8>, IoError> {
    let header_len = u16::try_from(HEADER_LEN + DESCRIPTOR_LEN * fields.len() + 1)
        .map_err(|_| IoError::InvalidAttribute {
            field: String::new(),
            message: format!("{} fields do not fit in a dBASE header", fields.len()),
        })?;
    let record_len = u16::try_from(1 + fields.iter().map(|f| usize::from(f.length)).sum::<usize>())
        .map_err(|_| IoError::InvalidAttribute {
            field: String::new(),
            message: "record is longer than 65535 bytes".to_string(),
        })?;
    let record_count = u32::try_from(rows.len()).map_err(|_| IoError::InvalidAttribute {
        field: String::new(),
        message: format!("{} records exceed the dBASE limit", rows.len()),
    })?;

    let mut out = Vec::with_capacity(usize::from(header_len) + rows.len() * usize::from(record_len) + 1);
    let (year, month, day) = today();
    out.extend_from_slice(&[VERSION, year, month, day]);
    out.extend_from_slice(&record_count.to_le_bytes());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&record_len.to_le_bytes());
    out.extend_from_slice(&[0u8; 20]);

    for field in fields {
        if field.name.is_empty() {
            return Err(invalid(field, "field name is empty"));
        }
        let mut name = truncate_utf8(&field.name, MAX_NAME_BYTES).as_bytes().to_vec();
        name.resize(11, 0);
        out.extend_from_slice(&name);
        out.push(field.kind.code());
        out.extend_from_slice(&[0u8; 4]);
        out.push(field.length);
        out.push(field.decimals);
        out.extend_from_slice(&[0u8; 14]);
    }
    out.push(HEADER_TERMINATOR);

    for row in rows {
        out.push(b' ');
        for (index, field) in fields.iter().enumerate() {
            let value = row
                .get(index)
                .cloned()
                .unwrap_or_else(|| AttributeValue::empty_for(field.kind));
            out.extend_from_slice(&encode_cell(field, &value)?);
        }
    }
    out.push(END_OF_FILE);
    Ok(out)
}

/// 头部日期：年份自 1900 起算。
fn today() -> (u8, u8, u8) {
    let date = Local::now().date_naive();
    let years = u8::try_from((date.year() - 1900).clamp(0, 255)).unwrap_or(u8::MAX);
    // 月、日分别不超过 12 与 31。
    (years, date.month() as u8, date.day() as u8)
}
