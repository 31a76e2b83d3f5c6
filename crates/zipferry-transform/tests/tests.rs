use std::io::{BufReader, Cursor};

use regex::Regex;
use zipferry_transform::{CsvOptions, CsvTransformer, Error, RecordReader};

#[test]
fn appended_column_carries_iso_timestamp() {
    let transformer = CsvTransformer::default();
    let outcome = transformer
        .transform(Cursor::new("name,age,city\nJohn,25,New York"), "people.csv")
        .unwrap();

    let output = String::from_utf8(outcome.output.unwrap()).unwrap();
    let mut records = RecordReader::new(output.as_bytes());
    let header = records.next_record().unwrap().unwrap();
    let row = records.next_record().unwrap().unwrap();
    assert!(records.next_record().unwrap().is_none());

    assert_eq!(header, vec!["name", "age", "city", "_processed"]);
    assert_eq!(row.len(), header.len());
    assert_eq!(&row[..3], &["John", "25", "New York"]);

    let stamp = Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z$").unwrap();
    assert!(stamp.is_match(&row[3]), "{}", row[3]);
}

#[test]
fn every_row_shares_one_timestamp() {
    let mut input = String::from("id,value\n");
    for i in 0..500 {
        input.push_str(&format!("{i},{}\n", i * 3));
    }

    // Small buffer so records straddle refills.
    let reader = BufReader::with_capacity(7, Cursor::new(input.into_bytes()));
    let outcome = CsvTransformer::default().transform(reader, "big.csv").unwrap();
    assert_eq!(outcome.rows_processed, 500);

    let output = outcome.output.unwrap();
    let mut records = RecordReader::new(&output[..]);
    records.next_record().unwrap();
    let mut stamps = Vec::new();
    while let Some(record) = records.next_record().unwrap() {
        assert_eq!(record.len(), 3);
        stamps.push(record[2].clone());
    }
    stamps.dedup();
    assert_eq!(stamps.len(), 1);
}

#[test]
fn empty_stream_is_no_output_not_error() {
    let outcome = CsvTransformer::default().transform(Cursor::new(""), "empty.csv").unwrap();
    assert!(!outcome.processed);
    assert!(outcome.output.is_none());
}

#[test]
fn invalid_utf8_without_skip_is_malformed() {
    let transformer = CsvTransformer::new(CsvOptions::default().skip_malformed(false));
    let err = transformer
        .transform(Cursor::new(b"id\n\xc3\x28\n".to_vec()), "latin.csv")
        .unwrap_err();
    let Error::Malformed { filename, .. } = err;
    assert_eq!(filename, "latin.csv");
}
