use crate::cli::CommandLineArgs;
use crate::dataset::{Column, ColumnKind, Dataset, Row, Schema, Timestamp, Value};
use crate::error::RetrievalError;
use crate::object_store::{ObjectInfo, ObjectStore};

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 2023-01-01T00:00:00Z in milliseconds.
pub(crate) const T0: i64 = 1_672_531_200_000;
pub(crate) const HOUR: i64 = 3_600_000;
pub(crate) const DAY: i64 = 24 * HOUR;

/// A small extract in the layout of the ONS hourly generation files. Rows are deliberately out of
/// order and one generation value is blank.
pub(crate) const ONS_CSV: &str = "\
din_instante;nom_subsistema;nom_tipocombustivel;nom_usina;val_geracao
2023-01-01 01:00:00;NORDESTE;Eólica;USINA EOLICA A;12,0
2023-01-01 00:00:00;NORDESTE;Eólica;USINA EOLICA A;10,5
2023-01-01 00:00:00;SUDESTE;Fotovoltaica;USINA SOLAR B;
2023-01-01 01:00:00;SUDESTE;Fotovoltaica;USINA SOLAR B;3,25
2023-01-02 00:00:00;NORDESTE;Eólica;USINA EOLICA A;8
2023-01-02 00:00:00;SUDESTE;Fotovoltaica;USINA SOLAR B;0
";

/// A single numeric column `wind` with timestamp column `t` at 1, 2 and 3 ms.
pub(crate) fn wind_dataset() -> Dataset {
    let schema = Schema::new("t", vec![Column::new("wind", ColumnKind::Number)]).unwrap();
    let rows = [(1, 10.0), (2, 12.0), (3, 9.0)]
        .into_iter()
        .map(|(t, wind)| Row::new(Timestamp(t), vec![Value::Number(wind)]))
        .collect();
    Dataset::new(schema, rows).unwrap()
}

/// The dataset [ONS_CSV] loads to.
pub(crate) fn generation_dataset() -> Dataset {
    let schema = Schema::new(
        "din_instante",
        vec![
            Column::new("nom_subsistema", ColumnKind::Category),
            Column::new("nom_tipocombustivel", ColumnKind::Category),
            Column::new("nom_usina", ColumnKind::Category),
            Column::new("val_geracao", ColumnKind::Number),
        ],
    )
    .unwrap();
    let wind = |t: i64, value: f64| {
        Row::new(
            Timestamp(t),
            vec![
                Value::Category("NORDESTE".to_string()),
                Value::Category("Eólica".to_string()),
                Value::Category("USINA EOLICA A".to_string()),
                Value::Number(value),
            ],
        )
    };
    let solar = |t: i64, value: Value| {
        Row::new(
            Timestamp(t),
            vec![
                Value::Category("SUDESTE".to_string()),
                Value::Category("Fotovoltaica".to_string()),
                Value::Category("USINA SOLAR B".to_string()),
                value,
            ],
        )
    };
    let rows = vec![
        wind(T0, 10.5),
        solar(T0, Value::Missing),
        wind(T0 + HOUR, 12.0),
        solar(T0 + HOUR, Value::Number(3.25)),
        wind(T0 + DAY, 8.0),
        solar(T0 + DAY, Value::Number(0.0)),
    ];
    Dataset::new(schema, rows).unwrap()
}

/// Command line arguments with all defaults, plus any extra flags.
pub(crate) fn test_args(extra: &[&str]) -> CommandLineArgs {
    CommandLineArgs::try_parse_from(std::iter::once("ons-energy-viz").chain(extra.iter().copied()))
        .unwrap()
}

/// An in-memory [ObjectStore] that counts retrievals.
#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: BTreeMap<String, Bytes>,
    /// Every retrieval fails with this error when set
    failure: Option<fn(&str) -> RetrievalError>,
    gets: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn with_object(mut self, key: &str, data: impl Into<Bytes>) -> Self {
        self.objects.insert(key.to_string(), data.into());
        self
    }

    pub(crate) fn failing(failure: fn(&str) -> RetrievalError) -> Self {
        MemoryStore {
            failure: Some(failure),
            ..Default::default()
        }
    }

    /// Number of calls to [ObjectStore::get].
    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Bytes, RetrievalError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failure {
            return Err(failure(key));
        }
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| RetrievalError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, RetrievalError> {
        if let Some(failure) = self.failure {
            return Err(failure(prefix));
        }
        Ok(self
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| ObjectInfo {
                key: key.clone(),
                size: data.len() as u64,
                last_modified: None,
            })
            .collect())
    }
}
