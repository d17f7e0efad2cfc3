//! Record normalization
//!
//! Turns a [`RawRecord`] into the storage-ready [`NormalizedRow`] by
//! unbinding its CPE 2.3 name. References pass through untouched.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cpe_common::cpe::WellFormedName;
use cpe_common::{CpeError, NormalizedRow};

use crate::stream::RawRecord;

/// Counts reported by the normalizer stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeSummary {
    pub normalized: u64,
    /// Records dropped because their identifier did not decode
    pub rejected: u64,
}

/// Decode one record; a bad identifier rejects the whole record
pub fn normalize(record: RawRecord) -> Result<NormalizedRow, CpeError> {
    let name = WellFormedName::unbind_formatted_string(&record.cpe23_name)?;
    Ok(NormalizedRow::new(record.title, &name, record.references))
}

/// Run [`normalize`] as its own stage between two bounded queues
///
/// Records whose identifier fails to decode are logged and dropped; the run
/// goes on.
pub fn spawn_normalizer(
    mut records: mpsc::Receiver<RawRecord>,
    capacity: usize,
) -> (mpsc::Receiver<NormalizedRow>, JoinHandle<NormalizeSummary>) {
    let (tx, rx) = mpsc::channel(capacity);

    let handle = tokio::spawn(async move {
        let mut summary = NormalizeSummary::default();

        while let Some(record) = records.recv().await {
            let name = record.cpe23_name.clone();
            match normalize(record) {
                Ok(row) => {
                    if tx.send(row).await.is_err() {
                        debug!("Row queue closed, stopping normalizer");
                        break;
                    }
                    summary.normalized += 1;
                },
                Err(err) => {
                    summary.rejected += 1;
                    warn!(cpe23 = %name, error = %err, "Skipping record with invalid identifier");
                },
            }
        }

        info!(
            normalized = summary.normalized,
            rejected = summary.rejected,
            "Normalizer finished"
        );
        summary
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpe_common::cpe::ANY;
    use cpe_common::{Reference, SCHEMA_VERSION};

    fn record(title: &str, name: &str, references: Vec<Reference>) -> RawRecord {
        RawRecord {
            title: title.to_string(),
            references,
            cpe23_name: name.to_string(),
        }
    }

    #[test]
    fn test_normalize_acme_widget() {
        let row = normalize(record(
            "Acme Widget 1.0",
            "cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*",
            Vec::new(),
        ))
        .unwrap();

        assert_eq!(row.schema_version, SCHEMA_VERSION);
        assert_eq!(row.category, "a");
        assert_eq!(row.vendor, "acme");
        assert_eq!(row.product, "widget");
        assert_eq!(row.version, "1.0");
        for value in [
            &row.update,
            &row.edition,
            &row.language,
            &row.sw_edition,
            &row.target_sw,
            &row.target_hw,
            &row.other,
        ] {
            assert_eq!(value, ANY);
        }
    }

    #[test]
    fn test_title_and_references_carried_over_in_order() {
        let references = vec![
            Reference::new("Vendor", "https://acme.example"),
            Reference::new("Advisory", "not even a url"),
            Reference::new("", "https://acme.example/empty-kind"),
        ];

        let row = normalize(record("  Spaced  Title ", "cpe:2.3:o:acme:os", references.clone())).unwrap();

        assert_eq!(row.title, "  Spaced  Title ");
        assert_eq!(row.references, references);
    }

    #[test]
    fn test_invalid_identifier_is_rejected() {
        let err = normalize(record("Legacy", "cpe:/a:acme:widget", Vec::new())).unwrap_err();
        assert!(matches!(err, CpeError::MissingPrefix(_)));
    }

    #[tokio::test]
    async fn test_stage_drops_rejected_records_and_keeps_order() {
        let (tx, rx) = mpsc::channel(8);
        let (mut rows, handle) = spawn_normalizer(rx, 2);

        tokio::spawn(async move {
            for (title, name) in [
                ("first", "cpe:2.3:a:v:first"),
                ("broken", "cpe:2.3:z:v:broken"),
                ("second", "cpe:2.3:a:v:second"),
                ("third", "cpe:2.3:h:v:third"),
            ] {
                tx.send(record(title, name, Vec::new())).await.unwrap();
            }
        });

        let mut titles = Vec::new();
        while let Some(row) = rows.recv().await {
            titles.push(row.title);
        }

        assert_eq!(titles, vec!["first", "second", "third"]);
        assert_eq!(
            handle.await.unwrap(),
            NormalizeSummary {
                normalized: 3,
                rejected: 1
            }
        );
    }
}
