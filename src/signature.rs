//! Signatures: a per-table probabilistic summary of the
//! serial-type shapes observed across a table's history, used by the carver
//! (`carver.rs`) to validate candidate records recovered from unallocated
//! space.

use std::collections::{HashMap, HashSet};

use crate::record::Record;
use crate::schema::{Affinity, TableDefinition};

/// The recommended and complete serial-type sets for one schema column,
/// derived once from its declared affinity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumnSignature {
    pub affinity: Affinity,
    pub recommended: HashSet<i64>,
    pub complete: HashSet<i64>,
}

impl SchemaColumnSignature {
    pub fn for_affinity(affinity: Affinity) -> Self {
        let (recommended, complete): (&[i64], &[i64]) = match affinity {
            Affinity::Integer => (&[1, 2, 3, 4, 5, 6, 8, 9], &FULL_SET),
            Affinity::Real => (&[1, 2, 3, 4, 5, 6, 7, 8, 9], &FULL_SET),
            Affinity::Numeric => (&[1, 2, 3, 4, 5, 6, 7, 8, 9], &FULL_SET),
            Affinity::Text => (&[-2], &[-2, -1, 0]),
            Affinity::Blob => (&[-1], &FULL_SET),
        };
        SchemaColumnSignature {
            affinity,
            recommended: recommended.iter().copied().collect(),
            complete: complete.iter().copied().collect(),
        }
    }
}

/// `{-2, -1, 0, 1..9}`, the "complete" set shared by every affinity except
/// TEXT.
const FULL_SET: [i64; 11] = [-2, -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9];

/// One observed row shape: how many times it occurred and its share of the
/// distinct shapes seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowSignature {
    pub count: u32,
    pub probability: f64,
}

/// One table-column's observed serial types, transposed out of the row
/// signatures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSignature {
    pub serial_types: HashMap<i64, f64>,
    pub variable_length_types_seen: HashSet<i64>,
}

/// A table's full probabilistic summary across its observed history.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub schema_column_signatures: Vec<SchemaColumnSignature>,
    pub table_row_signatures: HashMap<Vec<i64>, RowSignature>,
    pub table_column_signatures: Vec<ColumnSignature>,
    pub column_breakdown: HashMap<usize, (u32, f64)>,
    pub altered_columns: bool,
    pub unique_records: u32,
}

/// Builds a `Signature` from a table's declared columns and every row ever
/// observed in its history. `rows` is the full multiset of
/// records seen across all versions, including duplicates across commits —
/// the aggregation counts occurrences, not distinct rows.
pub fn build_signature(table: &TableDefinition, rows: &[&Record]) -> Signature {
    let schema_column_signatures =
        table.columns.iter().map(|c| SchemaColumnSignature::for_affinity(c.affinity)).collect();

    let mut raw_counts: HashMap<Vec<i64>, u32> = HashMap::new();
    let mut ncols_counts: HashMap<usize, u32> = HashMap::new();
    for record in rows {
        let sig = record.serial_type_signature();
        ncols_counts.entry(sig.len()).and_modify(|c| *c += 1).or_insert(1);
        raw_counts.entry(sig).and_modify(|c| *c += 1).or_insert(1);
    }

    let unique_records = raw_counts.len() as u32;
    let table_row_signatures = raw_counts
        .iter()
        .map(|(sig, &count)| {
            let probability = if unique_records == 0 { 0.0 } else { count as f64 / unique_records as f64 };
            (sig.clone(), RowSignature { count, probability })
        })
        .collect();

    let max_ncols = raw_counts.keys().map(|s| s.len()).max().unwrap_or(0);
    let mut column_counts: Vec<HashMap<i64, u32>> = vec![HashMap::new(); max_ncols];
    let mut variable_length_seen: Vec<HashSet<i64>> = vec![HashSet::new(); max_ncols];
    for (sig, &count) in &raw_counts {
        for (col_idx, &serial_type) in sig.iter().enumerate() {
            *column_counts[col_idx].entry(serial_type).or_insert(0) += count;
            if serial_type == -1 || serial_type == -2 {
                variable_length_seen[col_idx].insert(serial_type);
            }
        }
    }
    let table_column_signatures = column_counts
        .into_iter()
        .zip(variable_length_seen)
        .map(|(counts, variable_length_types_seen)| {
            let total: u32 = counts.values().sum();
            let serial_types = counts
                .into_iter()
                .map(|(st, count)| {
                    let p = if total == 0 { 0.0 } else { count as f64 / total as f64 };
                    (st, p)
                })
                .collect();
            ColumnSignature { serial_types, variable_length_types_seen }
        })
        .collect();

    let total_rows: u32 = ncols_counts.values().sum();
    let column_breakdown = ncols_counts
        .into_iter()
        .map(|(ncols, count)| {
            let probability = if total_rows == 0 { 0.0 } else { count as f64 / total_rows as f64 };
            (ncols, (count, probability))
        })
        .collect::<HashMap<_, _>>();
    let altered_columns = column_breakdown.len() > 1;

    Signature {
        schema_column_signatures,
        table_row_signatures,
        table_column_signatures,
        column_breakdown,
        altered_columns,
        unique_records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{decode_record, Record};
    use pretty_assertions::assert_eq;

    fn int_record(values: &[i64]) -> Record {
        let mut header_tail = Vec::new();
        for &v in values {
            header_tail.push(if v == 0 { 8 } else { 1 });
        }
        let size_varint_width = 1usize;
        let total = size_varint_width + header_tail.len();
        let mut buf = vec![total as u8];
        buf.extend(header_tail);
        for &v in values {
            if v != 0 {
                buf.push(v as u8);
            }
        }
        decode_record(&buf).unwrap()
    }

    fn table_def(ncols: usize) -> TableDefinition {
        use crate::schema::ColumnDefinition;
        TableDefinition {
            table_name: "t".to_string(),
            columns: (0..ncols)
                .map(|i| ColumnDefinition { name: format!("c{i}"), declared_type: Some("INTEGER".into()), affinity: Affinity::Integer })
                .collect(),
            without_rowid: false,
        }
    }

    #[test]
    fn schema_column_signature_matches_spec_table_for_text() {
        let sig = SchemaColumnSignature::for_affinity(Affinity::Text);
        assert_eq!(sig.recommended, [-2].into_iter().collect());
        assert_eq!(sig.complete, [-2, -1, 0].into_iter().collect());
    }

    #[test]
    fn schema_column_signature_matches_spec_table_for_integer() {
        let sig = SchemaColumnSignature::for_affinity(Affinity::Integer);
        assert_eq!(sig.recommended, [1, 2, 3, 4, 5, 6, 8, 9].into_iter().collect());
        assert_eq!(sig.complete.len(), 11);
    }

    #[test]
    fn single_shape_history_has_no_altered_columns() {
        let def = table_def(2);
        let r1 = int_record(&[1, 2]);
        let r2 = int_record(&[3, 4]);
        let rows: Vec<&Record> = vec![&r1, &r2];
        let signature = build_signature(&def, &rows);
        assert!(!signature.altered_columns);
        assert_eq!(signature.column_breakdown.len(), 1);
        assert_eq!(signature.unique_records, 2);
    }

    #[test]
    fn detects_altered_columns_across_differing_row_shapes() {
        let def = table_def(2);
        let r1 = int_record(&[1, 2]);
        let r2 = int_record(&[3]);
        let rows: Vec<&Record> = vec![&r1, &r2];
        let signature = build_signature(&def, &rows);
        assert!(signature.altered_columns);
        assert_eq!(signature.column_breakdown.len(), 2);
    }
}
