//! Prepared statement (binary protocol) encoding and row decoding

use bytes::{BufMut, BytesMut};

use super::column::{ColumnType, Field};
use super::reader::{put_lenenc_bytes, PayloadReader};
use super::value::Value;

/// Flag marking a bound parameter type as unsigned
const PARAM_UNSIGNED: u8 = 0x80;
/// CURSOR_TYPE_NO_CURSOR
const NO_CURSOR: u8 = 0x00;

/// Response to COM_STMT_PREPARE
#[derive(Debug, Clone, Copy)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

impl StmtPrepareOk {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut reader = PayloadReader::new(payload);
        if reader.u8()? != 0x00 {
            return None;
        }
        let statement_id = reader.u32_le()?;
        let num_columns = reader.u16_le()?;
        let num_params = reader.u16_le()?;
        // Filler
        reader.skip(1)?;
        let warnings = reader.u16_le().unwrap_or(0);
        Some(Self {
            statement_id,
            num_columns,
            num_params,
            warnings,
        })
    }
}

/// Encode the COM_STMT_EXECUTE body (everything after the command byte)
pub fn encode_execute(statement_id: u32, params: &[Value]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32_le(statement_id);
    buf.put_u8(NO_CURSOR);
    // Iteration count, always 1
    buf.put_u32_le(1);

    if params.is_empty() {
        return buf;
    }

    let mut null_bitmap = vec![0u8; params.len().div_ceil(8)];
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            null_bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    buf.extend_from_slice(&null_bitmap);

    // New params bound
    buf.put_u8(1);
    for param in params {
        let (column_type, flag) = param_type(param);
        buf.put_u8(column_type as u8);
        buf.put_u8(flag);
    }

    for param in params {
        match param {
            Value::Null => {}
            Value::Int(v) => buf.put_i64_le(*v),
            Value::UInt(v) => buf.put_u64_le(*v),
            Value::Float(v) => buf.put_f32_le(*v),
            Value::Double(v) => buf.put_f64_le(*v),
            Value::Bytes(v) => put_lenenc_bytes(&mut buf, v),
        }
    }
    buf
}

fn param_type(value: &Value) -> (ColumnType, u8) {
    match value {
        Value::Null => (ColumnType::Null, 0),
        Value::Int(_) => (ColumnType::LongLong, 0),
        Value::UInt(_) => (ColumnType::LongLong, PARAM_UNSIGNED),
        Value::Float(_) => (ColumnType::Float, 0),
        Value::Double(_) => (ColumnType::Double, 0),
        Value::Bytes(_) => (ColumnType::VarString, 0),
    }
}

/// Decode a text-protocol result row
pub fn decode_text_row(payload: &[u8], column_count: usize) -> Option<Vec<Value>> {
    let mut reader = PayloadReader::new(payload);
    let mut row = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        let value = match reader.lenenc_nullable()? {
            Some(bytes) => Value::Bytes(bytes.to_vec()),
            None => Value::Null,
        };
        row.push(value);
    }
    Some(row)
}

/// Decode a binary-protocol result row
pub fn decode_binary_row(payload: &[u8], fields: &[Field]) -> Option<Vec<Value>> {
    let mut reader = PayloadReader::new(payload);
    if reader.u8()? != 0x00 {
        return None;
    }

    // The row NULL bitmap is offset by two bits
    let null_bitmap = reader.take((fields.len() + 7 + 2) / 8)?;
    let is_null = |i: usize| {
        let bit = i + 2;
        null_bitmap[bit / 8] & (1 << (bit % 8)) != 0
    };

    let mut row = Vec::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        if is_null(i) {
            row.push(Value::Null);
            continue;
        }
        row.push(decode_binary_value(&mut reader, field)?);
    }
    Some(row)
}

fn decode_binary_value(reader: &mut PayloadReader<'_>, field: &Field) -> Option<Value> {
    let unsigned = field.is_unsigned();
    let value = match field.column_type {
        ColumnType::Null => Value::Null,
        ColumnType::Tiny => {
            let v = reader.u8()?;
            if unsigned {
                Value::UInt(v as u64)
            } else {
                Value::Int(v as i8 as i64)
            }
        }
        ColumnType::Short | ColumnType::Year => {
            let v = reader.u16_le()?;
            if unsigned {
                Value::UInt(v as u64)
            } else {
                Value::Int(v as i16 as i64)
            }
        }
        ColumnType::Long | ColumnType::Int24 => {
            let v = reader.u32_le()?;
            if unsigned {
                Value::UInt(v as u64)
            } else {
                Value::Int(v as i32 as i64)
            }
        }
        ColumnType::LongLong => {
            let v = reader.u64_le()?;
            if unsigned {
                Value::UInt(v)
            } else {
                Value::Int(v as i64)
            }
        }
        ColumnType::Float => Value::Float(f32::from_bits(reader.u32_le()?)),
        ColumnType::Double => Value::Double(f64::from_bits(reader.u64_le()?)),
        ColumnType::Date | ColumnType::DateTime | ColumnType::Timestamp => {
            let len = reader.u8()? as usize;
            let raw = reader.take(len)?;
            Value::Bytes(format_datetime(raw, field.column_type == ColumnType::Date)?.into_bytes())
        }
        ColumnType::Time => {
            let len = reader.u8()? as usize;
            let raw = reader.take(len)?;
            Value::Bytes(format_time(raw)?.into_bytes())
        }
        _ => Value::Bytes(reader.lenenc_bytes()?.to_vec()),
    };
    Some(value)
}

fn format_datetime(raw: &[u8], date_only: bool) -> Option<String> {
    let mut reader = PayloadReader::new(raw);
    let (year, month, day) = if raw.len() >= 4 {
        (reader.u16_le()?, reader.u8()?, reader.u8()?)
    } else {
        (0, 0, 0)
    };
    if date_only {
        return Some(format!("{:04}-{:02}-{:02}", year, month, day));
    }
    let (hour, minute, second) = if raw.len() >= 7 {
        (reader.u8()?, reader.u8()?, reader.u8()?)
    } else {
        (0, 0, 0)
    };
    let mut text = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, month, day, hour, minute, second
    );
    if raw.len() >= 11 {
        text.push_str(&format!(".{:06}", reader.u32_le()?));
    }
    Some(text)
}

fn format_time(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        return Some("00:00:00".to_string());
    }
    let mut reader = PayloadReader::new(raw);
    let negative = reader.u8()? == 1;
    let days = reader.u32_le()?;
    let hour = reader.u8()?;
    let minute = reader.u8()?;
    let second = reader.u8()?;
    let hours = days as u64 * 24 + hour as u64;
    let mut text = format!(
        "{}{:02}:{:02}:{:02}",
        if negative { "-" } else { "" },
        hours,
        minute,
        second
    );
    if raw.len() >= 12 {
        text.push_str(&format!(".{:06}", reader.u32_le()?));
    }
    Some(text)
}
