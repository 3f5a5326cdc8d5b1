//! Incremental CSV batching.
//!
//! Reads delimited records from a byte stream one at a time — the file is
//! never buffered whole — and groups them into fixed-size batches for bulk
//! store operations. Header matching is case-insensitive (headers are
//! lowercased once, up front). Blank rows are skipped silently; rows that
//! fail to parse fire the error callback and are skipped.

use std::io::Read;

use anyhow::Result;
use serde::de::DeserializeOwned;

/// A parsed record tagged with the caller's existence classification.
#[derive(Debug)]
pub struct Classified<T> {
    pub record: T,
    pub is_new: bool,
}

/// Drive the full stream through batches of `batch_size`.
///
/// `on_batch` receives every full batch and, at end-of-stream, the final
/// partial (possibly empty) batch; returning an error from it aborts the
/// run. `on_progress` fires whenever the cumulative processed count crosses
/// a multiple of `batch_size`; malformed rows count as processed, blank
/// rows do not. Returns the total processed count.
pub fn process<R, T, N, B, P, E>(
    source: R,
    delimiter: u8,
    batch_size: usize,
    mut is_new: N,
    mut on_batch: B,
    mut on_progress: P,
    mut on_error: E,
) -> Result<u64>
where
    R: Read,
    T: DeserializeOwned,
    N: FnMut(&T) -> bool,
    B: FnMut(Vec<Classified<T>>) -> Result<()>,
    P: FnMut(u64),
    E: FnMut(String),
{
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(source);

    // Header line is parsed once; lowercase it so serde field matching is
    // case-insensitive regardless of how the upload spells the columns.
    let headers: csv::StringRecord = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let mut batch: Vec<Classified<T>> = Vec::with_capacity(batch_size.min(4096));
    let mut total: u64 = 0;
    let mut record = csv::StringRecord::new();

    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                if record.iter().all(|field| field.trim().is_empty()) {
                    continue;
                }
                total += 1;
                match record.deserialize::<T>(Some(&headers)) {
                    Ok(row) => {
                        let fresh = is_new(&row);
                        batch.push(Classified {
                            record: row,
                            is_new: fresh,
                        });
                    }
                    Err(err) => {
                        let line = record.position().map(|p| p.line()).unwrap_or_default();
                        on_error(format!("line {line}: {err}"));
                    }
                }
                if total % batch_size as u64 == 0 {
                    on_progress(total);
                }
            }
            Err(err) => {
                total += 1;
                on_error(err.to_string());
            }
        }

        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size.min(4096)));
            on_batch(full)?;
        }
    }

    // Final partial batch, even when empty, so the sink observes the end.
    on_batch(batch)?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use uuid::Uuid;

    #[derive(Debug, serde::Deserialize)]
    struct Row {
        contactguid: Uuid,
        #[serde(default)]
        contactemail: Option<String>,
    }

    fn run(
        csv_text: &str,
        batch_size: usize,
    ) -> (Vec<Vec<Classified<Row>>>, Vec<u64>, Vec<String>, u64) {
        let mut batches = Vec::new();
        let mut progress = Vec::new();
        let mut errors = Vec::new();
        let total = process::<_, Row, _, _, _, _>(
            Cursor::new(csv_text.to_string()),
            b',',
            batch_size,
            |_| true,
            |batch| {
                batches.push(batch);
                Ok(())
            },
            |n| progress.push(n),
            |e| errors.push(e),
        )
        .unwrap();
        (batches, progress, errors, total)
    }

    fn csv_with_rows(count: usize) -> String {
        let mut text = String::from("ContactGUID,ContactEmail\n");
        for i in 0..count {
            text.push_str(&format!("{},user{}@example.com\n", Uuid::new_v4(), i));
        }
        text
    }

    #[test]
    fn five_rows_batch_two_yields_sizes_2_2_1() {
        let (batches, _, errors, total) = run(&csv_with_rows(5), 2);
        assert!(errors.is_empty());
        assert_eq!(total, 5);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn exact_multiple_yields_trailing_empty_batch() {
        let (batches, _, _, total) = run(&csv_with_rows(4), 2);
        assert_eq!(total, 4);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 0]);
    }

    #[test]
    fn one_more_row_than_batch_size_yields_two_batches() {
        let (batches, _, _, _) = run(&csv_with_rows(4), 3);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[test]
    fn header_only_input_yields_single_empty_batch() {
        let (batches, progress, errors, total) = run("ContactGUID,ContactEmail\n", 10);
        assert_eq!(total, 0);
        assert!(progress.is_empty());
        assert!(errors.is_empty());
        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_empty());
    }

    #[test]
    fn header_matching_is_case_insensitive() {
        let guid = Uuid::new_v4();
        let text = format!("CONTACTGUID,ContactEmail\n{guid},a@b.cz\n");
        let (batches, _, errors, _) = run(&text, 10);
        assert!(errors.is_empty());
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].record.contactguid, guid);
    }

    #[test]
    fn blank_lines_are_skipped_without_counting() {
        let guid = Uuid::new_v4();
        let text = format!("ContactGUID,ContactEmail\n\n   \n{guid},a@b.cz\n,,\n");
        let (batches, _, errors, total) = run(&text, 10);
        assert!(errors.is_empty());
        assert_eq!(total, 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn malformed_row_fires_error_and_is_skipped() {
        let guid = Uuid::new_v4();
        let text = format!("ContactGUID,ContactEmail\nnot-a-guid,x@y.cz\n{guid},a@b.cz\n");
        let (batches, _, errors, total) = run(&text, 10);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("line 2"));
        assert_eq!(total, 2, "malformed rows still count as processed");
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].record.contactguid, guid);
    }

    #[test]
    fn progress_fires_at_each_batch_boundary() {
        let (_, progress, _, _) = run(&csv_with_rows(5), 2);
        assert_eq!(progress, vec![2, 4]);
    }

    #[test]
    fn classification_reflects_predicate() {
        let known = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let text = format!("ContactGUID,ContactEmail\n{known},k@b.cz\n{fresh},f@b.cz\n");
        let mut batches = Vec::new();
        process::<_, Row, _, _, _, _>(
            Cursor::new(text),
            b',',
            10,
            |row| row.contactguid != known,
            |batch| {
                batches.push(batch);
                Ok(())
            },
            |_| {},
            |_| {},
        )
        .unwrap();
        let flags: Vec<bool> = batches[0].iter().map(|c| c.is_new).collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn semicolon_delimiter_is_honored() {
        let guid = Uuid::new_v4();
        let text = format!("ContactGUID;ContactEmail\n{guid};a@b.cz\n");
        let mut batches = Vec::new();
        process::<_, Row, _, _, _, _>(
            Cursor::new(text),
            b';',
            10,
            |_| true,
            |batch| {
                batches.push(batch);
                Ok(())
            },
            |_| {},
            |_| {},
        )
        .unwrap();
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].record.contactguid, guid);
    }
}
