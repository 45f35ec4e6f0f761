use chrono::{DateTime, Utc};
use prost::bytes;

use crate::types::{Cell, TableRow};

/// Timestamp layout accepted by BigQuery for `TIMESTAMP` columns sent as strings.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// A [`TableRow`] encoded as a protobuf message for the Storage Write API.
///
/// Field numbers follow the column order, starting at 1, matching the descriptor built
/// by [`crate::bigquery::BigQueryClient::table_descriptor`]. Null cells are omitted.
#[derive(Debug, Default)]
pub struct BigQueryTableRow(pub TableRow);

impl prost::Message for BigQueryTableRow {
    fn encode_raw(&self, buf: &mut impl bytes::BufMut)
    where
        Self: Sized,
    {
        for (tag, cell) in (1..).zip(self.0.values()) {
            cell_encode_prost(cell, tag, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), prost::DecodeError>
    where
        Self: Sized,
    {
        // Rows are only ever written.
        prost::encoding::skip_field(wire_type, tag, buf, ctx)
    }

    fn encoded_len(&self) -> usize {
        (1..)
            .zip(self.0.values())
            .map(|(tag, cell)| cell_encode_len_prost(cell, tag))
            .sum()
    }

    fn clear(&mut self) {
        self.0 = TableRow::default();
    }
}

pub fn cell_encode_prost(cell: &Cell, tag: u32, buf: &mut impl bytes::BufMut) {
    match cell {
        Cell::Null => {}
        Cell::Bool(b) => prost::encoding::bool::encode(tag, b, buf),
        Cell::String(s) => prost::encoding::string::encode(tag, s, buf),
        Cell::I64(i) => prost::encoding::int64::encode(tag, i, buf),
        Cell::F64(f) => prost::encoding::double::encode(tag, f, buf),
        Cell::Timestamp(t) => prost::encoding::string::encode(tag, &format_timestamp(t), buf),
    }
}

pub fn cell_encode_len_prost(cell: &Cell, tag: u32) -> usize {
    match cell {
        Cell::Null => 0,
        Cell::Bool(b) => prost::encoding::bool::encoded_len(tag, b),
        Cell::String(s) => prost::encoding::string::encoded_len(tag, s),
        Cell::I64(i) => prost::encoding::int64::encoded_len(tag, i),
        Cell::F64(f) => prost::encoding::double::encoded_len(tag, f),
        Cell::Timestamp(t) => prost::encoding::string::encoded_len(tag, &format_timestamp(t)),
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use prost::Message;

    #[test]
    fn encoded_len_matches_encoding_and_skips_nulls() {
        let row = BigQueryTableRow(TableRow::new(vec![
            Cell::String("abc".to_string()),
            Cell::Null,
            Cell::I64(-5),
            Cell::F64(2.5),
            Cell::Bool(true),
            Cell::Timestamp(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        ]));

        let encoded = row.encode_to_vec();

        assert_eq!(encoded.len(), row.encoded_len());
        // Field 1 is a length-delimited string.
        assert_eq!(&encoded[..5], &[0x0a, 3, b'a', b'b', b'c']);
        // Field 2 is absent, so field 3 follows directly.
        assert_eq!(encoded[5], 3 << 3);
    }

    #[test]
    fn timestamps_use_offset_layout() {
        let timestamp = Utc.with_ymd_and_hms(2025, 3, 10, 12, 30, 0).unwrap();

        assert_eq!(format_timestamp(&timestamp), "2025-03-10 12:30:00+00:00");
    }
}
