//! Column definitions (ColumnDefinition41)

use serde::Serialize;

use super::reader::PayloadReader;

/// Column flag: value is unsigned
pub const UNSIGNED_FLAG: u16 = 0x0020;

/// MySQL column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0a,
    Time = 0x0b,
    DateTime = 0x0c,
    Year = 0x0d,
    VarChar = 0x0f,
    Bit = 0x10,
    Json = 0xf5,
    NewDecimal = 0xf6,
    Enum = 0xf7,
    Set = 0xf8,
    TinyBlob = 0xf9,
    MediumBlob = 0xfa,
    LongBlob = 0xfb,
    Blob = 0xfc,
    VarString = 0xfd,
    String = 0xfe,
    Geometry = 0xff,
}

impl From<u8> for ColumnType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ColumnType::Decimal,
            0x01 => ColumnType::Tiny,
            0x02 => ColumnType::Short,
            0x03 => ColumnType::Long,
            0x04 => ColumnType::Float,
            0x05 => ColumnType::Double,
            0x06 => ColumnType::Null,
            0x07 => ColumnType::Timestamp,
            0x08 => ColumnType::LongLong,
            0x09 => ColumnType::Int24,
            0x0a => ColumnType::Date,
            0x0b => ColumnType::Time,
            0x0c => ColumnType::DateTime,
            0x0d => ColumnType::Year,
            0x0f => ColumnType::VarChar,
            0x10 => ColumnType::Bit,
            0xf5 => ColumnType::Json,
            0xf6 => ColumnType::NewDecimal,
            0xf7 => ColumnType::Enum,
            0xf8 => ColumnType::Set,
            0xf9 => ColumnType::TinyBlob,
            0xfa => ColumnType::MediumBlob,
            0xfb => ColumnType::LongBlob,
            0xfc => ColumnType::Blob,
            0xfd => ColumnType::VarString,
            0xfe => ColumnType::String,
            // Anything newer is carried as a length-encoded string
            _ => ColumnType::VarString,
        }
    }
}

/// A column definition returned by a result set or COM_FIELD_LIST
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: u16,
    pub decimals: u8,
    /// Only present in COM_FIELD_LIST responses
    pub default_value: Option<Vec<u8>>,
}

impl Field {
    /// Parse a ColumnDefinition41 payload
    ///
    /// `with_default` is set for COM_FIELD_LIST responses, which append the
    /// column default value after the fixed fields.
    pub fn parse(payload: &[u8], with_default: bool) -> Option<Self> {
        let mut reader = PayloadReader::new(payload);
        let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();

        // Catalog is always "def"
        reader.lenenc_bytes()?;
        let schema = text(reader.lenenc_bytes()?);
        let table = text(reader.lenenc_bytes()?);
        let org_table = text(reader.lenenc_bytes()?);
        let name = text(reader.lenenc_bytes()?);
        let org_name = text(reader.lenenc_bytes()?);

        // Length of the fixed-length fields, always 0x0c
        reader.lenenc_int()?;
        let charset = reader.u16_le()?;
        let column_length = reader.u32_le()?;
        let column_type = ColumnType::from(reader.u8()?);
        let flags = reader.u16_le()?;
        let decimals = reader.u8()?;
        // Filler
        reader.skip(2)?;

        let default_value = if with_default && !reader.is_empty() {
            reader.lenenc_nullable()?.map(<[u8]>::to_vec)
        } else {
            None
        };

        Some(Self {
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
            default_value,
        })
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags & UNSIGNED_FLAG != 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::reader::put_lenenc_bytes;
    use bytes::{BufMut, BytesMut};

    pub(crate) fn column_payload(name: &str, column_type: ColumnType, flags: u16) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for part in ["def", "shop", "orders", "orders", name, name] {
            put_lenenc_bytes(&mut buf, part.as_bytes());
        }
        buf.put_u8(0x0c);
        buf.put_u16_le(33);
        buf.put_u32_le(255);
        buf.put_u8(column_type as u8);
        buf.put_u16_le(flags);
        buf.put_u8(0);
        buf.put_u16_le(0);
        buf.to_vec()
    }

    #[test]
    fn test_parse_column_definition() {
        let payload = column_payload("amount", ColumnType::LongLong, UNSIGNED_FLAG);
        let field = Field::parse(&payload, false).unwrap();
        assert_eq!(field.schema, "shop");
        assert_eq!(field.table, "orders");
        assert_eq!(field.name, "amount");
        assert_eq!(field.column_type, ColumnType::LongLong);
        assert!(field.is_unsigned());
        assert_eq!(field.default_value, None);
    }

    #[test]
    fn test_parse_field_list_default() {
        let mut payload = column_payload("status", ColumnType::VarString, 0);
        put_lenenc_bytes(&mut payload, b"new");
        let field = Field::parse(&payload, true).unwrap();
        assert_eq!(field.default_value.as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_truncated_definition_is_rejected() {
        let payload = column_payload("id", ColumnType::Long, 0);
        assert!(Field::parse(&payload[..payload.len() - 4], false).is_none());
    }
}
