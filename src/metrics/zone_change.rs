//! Commuter rail stations whose fare zone changed between years.

use std::collections::{BTreeMap, BTreeSet};

use crate::clean::{CleaningReport, drop_incomplete};
use crate::error::PipelineError;
use crate::metrics::{Metric, MetricOutput, MetricTable};
use crate::pipeline::Snapshot;
use crate::season::{Period, Season};
use crate::table::{TableName, Value};

pub const NO_ZONE: &str = "No Zone";

/// Within a year, later seasons in this order overwrite earlier ones.
fn processing_rank(season: Season) -> u8 {
    match season {
        Season::Spring => 0,
        Season::Summer => 1,
        Season::Fall => 2,
        Season::Winter => 3,
    }
}

/// (stop_name, zone_id) of every commuter rail station, in table order.
pub type Stations = Vec<(String, String)>;

/// Whether a station's zones across consecutive years ever differ. A
/// missing year never equals anything, including another missing year.
pub fn zone_changed(zones: &[Option<&str>]) -> bool {
    zones.windows(2).any(|w| match (w[0], w[1]) {
        (Some(a), Some(b)) => a != b,
        _ => true,
    })
}

pub struct ZoneChange;

impl Metric for ZoneChange {
    type Slice = Stations;

    const TABLES: &'static [TableName] = &[TableName::Stops];

    fn prepare(&self, snapshot: &Snapshot, cleaning: &mut CleaningReport) -> Result<Stations, PipelineError> {
        let stops = drop_incomplete(
            snapshot.table(TableName::Stops)?,
            &["stop_name", "zone_id", "location_type"],
            cleaning,
        )?;
        let name = stops.require("stop_name")?;
        let zone = stops.require("zone_id")?;
        let kind = stops.require("location_type")?;

        let stations: Stations = stops
            .rows()
            .iter()
            .filter(|row| row[kind].as_i64() == Some(1))
            .filter_map(|row| {
                let zone_id = row[zone].to_string();
                zone_id
                    .trim()
                    .starts_with("CR")
                    .then(|| (row[name].to_string().trim().to_string(), zone_id.trim().to_string()))
            })
            .collect();
        cleaning.record("stops", "keep commuter rail stations", stops.len(), stations.len());
        Ok(stations)
    }

    fn compute(&self, mut slices: Vec<(Period, Stations)>, _: &mut CleaningReport) -> Result<MetricOutput, PipelineError> {
        slices.sort_by_key(|(p, _)| (p.year, processing_rank(p.season)));

        let mut by_year: BTreeMap<i32, BTreeMap<String, String>> = BTreeMap::new();
        for (period, stations) in slices {
            let year = by_year.entry(period.year).or_default();
            for (stop_name, zone_id) in stations {
                year.insert(stop_name, zone_id);
            }
        }

        let years: Vec<i32> = by_year.keys().copied().collect();
        let names: BTreeSet<&String> = by_year.values().flat_map(|s| s.keys()).collect();

        let mut metric = MetricTable::new(
            "Fare zone changes by station",
            "q3",
            &["stop_name", "year", "zone_id"],
            None,
        );
        for name in names {
            let zones: Vec<Option<&str>> = years
                .iter()
                .map(|y| by_year[y].get(name).map(String::as_str))
                .collect();
            if !zone_changed(&zones) {
                continue;
            }
            for (year, &zone) in years.iter().zip(&zones) {
                metric.push(
                    vec![
                        Value::text(name.as_str()),
                        Value::Int(*year as i64),
                        Value::text(zone.unwrap_or(NO_ZONE)),
                    ],
                    None,
                );
            }
        }
        Ok(metric.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_table;

    fn stations(rows: &[(&str, &str)]) -> Stations {
        rows.iter().map(|(n, z)| (n.to_string(), z.to_string())).collect()
    }

    #[test]
    fn test_zone_changed() {
        assert!(!zone_changed(&[Some("CR-zone-1"), Some("CR-zone-1")]));
        assert!(zone_changed(&[Some("CR-zone-1"), Some("CR-zone-2")]));
        assert!(zone_changed(&[Some("CR-zone-1"), None]));
        assert!(!zone_changed(&[Some("CR-zone-1")]));
    }

    #[test]
    fn test_prepare_filters_stations() {
        let stops = parse_table(
            "stops",
            b"stop_id,stop_name,zone_id,location_type\n\
              place-a,Ayer,CR-zone-7,1\n\
              a-1,Ayer,CR-zone-7,0\n\
              place-b,Back Bay,RapidTransit,1\n\
              place-c,Canton,,1\n",
        )
        .unwrap();
        let mut s = Snapshot::new(Period::new(2023, Season::Fall));
        s.insert(TableName::Stops, stops.into());
        let got = ZoneChange.prepare(&s, &mut CleaningReport::default()).unwrap();
        assert_eq!(got, stations(&[("Ayer", "CR-zone-7")]));
    }

    #[test]
    fn test_winter_overrides_within_year_and_missing_years_reported() {
        let out = ZoneChange
            .compute(
                vec![
                    (Period::new(2023, Season::Winter), stations(&[("Ayer", "CR-zone-8")])),
                    (
                        Period::new(2023, Season::Spring),
                        stations(&[("Ayer", "CR-zone-7"), ("Canton", "CR-zone-3")]),
                    ),
                    (
                        Period::new(2024, Season::Spring),
                        stations(&[("Ayer", "CR-zone-8"), ("Lowell", "CR-zone-6")]),
                    ),
                ],
                &mut CleaningReport::default(),
            )
            .unwrap();

        let rows: Vec<Vec<String>> = out
            .metric
            .table
            .rows()
            .iter()
            .map(|r| r.iter().map(|v| v.to_string()).collect())
            .collect();
        // Ayer ends 2023 in zone 8 (winter wins) and stays there, so it is unchanged.
        assert_eq!(
            rows,
            vec![
                vec!["Canton", "2023", "CR-zone-3"],
                vec!["Canton", "2024", "No Zone"],
                vec!["Lowell", "2023", "No Zone"],
                vec!["Lowell", "2024", "CR-zone-6"],
            ]
        );
    }
}
