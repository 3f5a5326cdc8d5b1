//! Sample contact CSV generation for exercising the importer.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::types::ContactRecord;

const FIRST_NAMES: &[&str] = &[
    "Anna", "Marek", "Petra", "Jakub", "Eva", "Tomas", "Lucie", "Martin", "Hana", "Ondrej",
    "Clara", "Daniel", "Sofie", "Filip", "Marie", "Adam",
];

const LAST_NAMES: &[&str] = &[
    "Novak", "Svoboda", "Dvorak", "Cerny", "Prochazka", "Kucera", "Vesely", "Horak", "Nemec",
    "Marek", "Pokorny", "Kral",
];

const STREETS: &[&str] = &[
    "Oak Street", "Main Street", "Hill Road", "Park Avenue", "River Lane", "Garden Way",
    "Station Road", "Mill Lane",
];

/// Produce `count` random but plausible contact records. Created
/// timestamps fall within a fixed window so generated files are stable in
/// shape across runs.
pub fn generate_contacts(count: usize) -> Vec<ContactRecord> {
    let mut rng = rand::thread_rng();

    let window_start = Utc.with_ymd_and_hms(2023, 1, 1, 1, 1, 1).unwrap();
    let window_end = Utc.with_ymd_and_hms(2023, 8, 1, 1, 1, 1).unwrap();
    let window_secs = (window_end - window_start).num_seconds();

    (0..count)
        .map(|_| {
            let first = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
            let last = LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())];
            let middle = if rng.gen_bool(0.3) {
                Some(FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())].to_string())
            } else {
                None
            };
            let email = format!(
                "{}.{}{}@example.com",
                first.to_lowercase(),
                last.to_lowercase(),
                rng.gen_range(1..10_000)
            );
            let address = format!(
                "{} {}",
                rng.gen_range(1..200),
                STREETS[rng.gen_range(0..STREETS.len())]
            );
            let created = window_start + Duration::seconds(rng.gen_range(0..window_secs));

            ContactRecord {
                contact_guid: Uuid::new_v4(),
                contact_created: Some(created),
                first_name: Some(first.to_string()),
                middle_name: middle,
                last_name: Some(last.to_string()),
                email: Some(email),
                address_line: Some(address),
                age: Some(rng.gen_range(18..=64)),
            }
        })
        .collect()
}

/// Write records as CSV, headers included.
pub fn write_csv<W: Write>(records: &[ContactRecord], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Entry point for the `generate` CLI subcommand.
pub fn write_contacts_csv(count: usize, output: Option<&Path>) -> Result<()> {
    let records = generate_contacts(count);
    match output {
        Some(path) => write_csv(&records, std::fs::File::create(path)?)?,
        None => write_csv(&records, std::io::stdout().lock())?,
    }
    Ok(())
}
