//! Fare amount per commuter rail route.
//!
//! Fare products are joined to fare leg rules and then to routes through
//! the shared `network_id`. Only one-way fares out of zone 1A are kept,
//! and for each line only the destination zone named in the
//! [`ZoneMapping`].

use std::collections::{BTreeMap, HashMap};

use crate::clean::{CleaningReport, checked_join, clean_table, commuter_rail_routes};
use crate::error::PipelineError;
use crate::metrics::utility::key_of;
use crate::metrics::{Metric, MetricOutput, MetricTable};
use crate::pipeline::Snapshot;
use crate::season::Period;
use crate::table::{JoinKind, TableName, Value};

const FARE_NETWORKS: [&str; 2] = ["COMMUTER_RAIL", "CAPE_FLYER"];
const ORIGIN_AREA: &str = "area_commuter_rail_zone_1a";

const DEFAULT_ZONES: [(&str, &str); 13] = [
    ("line-CapeFlyer", "area_cf_zone_hyannis"),
    ("line-Fairmount", "area_commuter_rail_zone_2"),
    ("line-Fitchburg", "area_commuter_rail_zone_8"),
    ("line-Worcester", "area_commuter_rail_zone_8"),
    ("line-Franklin", "area_commuter_rail_zone_6"),
    ("line-Greenbush", "area_commuter_rail_zone_6"),
    ("line-Haverhill", "area_commuter_rail_zone_7"),
    ("line-Kingston", "area_commuter_rail_zone_8"),
    ("line-Lowell", "area_commuter_rail_zone_6"),
    ("line-Middleborough", "area_commuter_rail_zone_8"),
    ("line-Needham", "area_commuter_rail_zone_2"),
    ("line-Newburyport", "area_commuter_rail_zone_8"),
    ("line-Providence", "area_commuter_rail_zone_10"),
];

/// Maps line ids to the destination fare area priced for that line.
///
/// Stored as a plain JSON object on disk:
/// ```json
/// {
///   "line-Lowell": "area_commuter_rail_zone_6",
///   "line-Needham": "area_commuter_rail_zone_2"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneMapping {
    entries: HashMap<String, String>,
}

impl Default for ZoneMapping {
    fn default() -> Self {
        Self {
            entries: DEFAULT_ZONES
                .iter()
                .map(|(line, area)| (line.to_string(), area.to_string()))
                .collect(),
        }
    }
}

impl ZoneMapping {
    /// Loads the mapping from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        let entries: HashMap<String, String> = serde_json::from_str(&content)?;
        Ok(Self { entries })
    }

    /// Returns the destination area for `line_id`, if one is configured.
    pub fn get(&self, line_id: &str) -> Option<&str> {
        self.entries.get(line_id.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lines without an entry accept any destination area.
    fn accepts(&self, line_id: &str, to_area: &str) -> bool {
        self.get(line_id).is_none_or(|area| area == to_area)
    }
}

pub struct Fares {
    pub zones: ZoneMapping,
}

impl Metric for Fares {
    type Slice = BTreeMap<String, f64>;

    const TABLES: &'static [TableName] = &[TableName::FareProducts, TableName::FareLegRules, TableName::Routes];

    fn prepare(&self, snapshot: &Snapshot, cleaning: &mut CleaningReport) -> Result<BTreeMap<String, f64>, PipelineError> {
        let products = clean_table(
            snapshot.table(TableName::FareProducts)?,
            &["fare_product_id", "amount"],
            cleaning,
        )?
        .select(&["fare_product_id", "amount"])?;
        let leg_columns = ["fare_product_id", "network_id", "from_area_id", "to_area_id"];
        let rules = clean_table(snapshot.table(TableName::FareLegRules)?, &leg_columns, cleaning)?
            .select(&leg_columns)?;

        let fares = checked_join(&products, &rules, "fare_product_id", JoinKind::Inner)?;
        let network = fares.require("network_id")?;
        let from_area = fares.require("from_area_id")?;
        let before = fares.len();
        let fares = fares.filter(|row| {
            FARE_NETWORKS.contains(&key_of(&row[network]).as_str())
                && row[from_area].as_str() == Some(ORIGIN_AREA)
        });
        cleaning.record("fare_leg_rules", "keep commuter rail fares from zone 1A", before, fares.len());

        let routes = commuter_rail_routes(snapshot.table(TableName::Routes)?, cleaning)?;
        let routes = clean_table(&routes, &["network_id", "line_id"], cleaning)?
            .select(&["route_id", "network_id", "line_id"])?;

        let priced = checked_join(&fares, &routes, "network_id", JoinKind::Inner)?;
        let route = priced.require("route_id")?;
        let line = priced.require("line_id")?;
        let to_area = priced.require("to_area_id")?;
        let amount = priced.require("amount")?;

        let mut best: BTreeMap<String, f64> = BTreeMap::new();
        for row in priced.rows() {
            let (Some(line_id), Some(area), Some(value)) =
                (row[line].as_str(), row[to_area].as_str(), row[amount].as_f64())
            else {
                continue;
            };
            if !self.zones.accepts(line_id, area) {
                continue;
            }
            let entry = best.entry(key_of(&row[route])).or_insert(value);
            *entry = entry.max(value);
        }
        Ok(best)
    }

    /// Highest amount per route across every snapshot, most expensive first.
    fn compute(
        &self,
        slices: Vec<(Period, BTreeMap<String, f64>)>,
        _: &mut CleaningReport,
    ) -> Result<MetricOutput, PipelineError> {
        let mut best: BTreeMap<String, f64> = BTreeMap::new();
        for (_, amounts) in slices {
            for (route, value) in amounts {
                let entry = best.entry(route).or_insert(value);
                *entry = entry.max(value);
            }
        }

        let mut rows: Vec<(String, f64)> = best.into_iter().collect();
        rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut metric = MetricTable::new("Fare amount per route", "q4", &["route_id"], Some("amount"));
        for (route, value) in rows {
            metric.push(vec![Value::text(route)], Some(Value::Float(value)));
        }
        Ok(metric.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_table;
    use crate::season::Season;
    use std::env;
    use std::fs;

    fn snapshot() -> Snapshot {
        let products = parse_table(
            "fare_products",
            b"fare_product_id,fare_product_name,amount,currency\n\
              zone_2,Zone 2,6.75,USD\nzone_6,Zone 6,9.75,USD\nzone_8,Zone 8,11.00,USD\n",
        )
        .unwrap();
        let rules = parse_table(
            "fare_leg_rules",
            b"leg_group_id,network_id,from_area_id,to_area_id,fare_product_id\n\
              g,commuter_rail,area_commuter_rail_zone_1a,area_commuter_rail_zone_2,zone_2\n\
              g,commuter_rail,area_commuter_rail_zone_1a,area_commuter_rail_zone_6,zone_6\n\
              g,commuter_rail,area_commuter_rail_zone_1a,area_commuter_rail_zone_8,zone_8\n\
              g,commuter_rail,area_commuter_rail_zone_3,area_commuter_rail_zone_8,zone_2\n\
              g,rapid_transit,area_commuter_rail_zone_1a,area_commuter_rail_zone_8,zone_8\n",
        )
        .unwrap();
        let routes = parse_table(
            "routes",
            b"route_id,route_desc,network_id,line_id\n\
              CR-Lowell,Commuter Rail,commuter_rail,line-Lowell\n\
              CR-Needham,Commuter Rail,commuter_rail,line-Needham\n\
              CR-Foxboro,Commuter Rail,commuter_rail,line-Foxboro\n\
              Red,Rapid Transit,rapid_transit,line-Red\n",
        )
        .unwrap();
        let mut s = Snapshot::new(Period::new(2024, Season::Spring));
        s.insert(TableName::FareProducts, products.into());
        s.insert(TableName::FareLegRules, rules.into());
        s.insert(TableName::Routes, routes.into());
        s
    }

    #[test]
    fn test_mapped_lines_use_their_zone() {
        let fares = Fares {
            zones: ZoneMapping::default(),
        };
        let amounts = fares.prepare(&snapshot(), &mut CleaningReport::default()).unwrap();
        assert_eq!(amounts["CR-LOWELL"], 9.75);
        assert_eq!(amounts["CR-NEEDHAM"], 6.75);
        // unmapped lines take the highest fare on offer
        assert_eq!(amounts["CR-FOXBORO"], 11.0);
        assert!(!amounts.contains_key("RED"));
    }

    #[test]
    fn test_compute_keeps_max_and_sorts() {
        let fares = Fares {
            zones: ZoneMapping::default(),
        };
        let out = fares
            .compute(
                vec![
                    (
                        Period::new(2023, Season::Fall),
                        BTreeMap::from([("CR-LOWELL".to_string(), 9.25), ("CR-NEEDHAM".to_string(), 6.75)]),
                    ),
                    (
                        Period::new(2024, Season::Spring),
                        BTreeMap::from([("CR-LOWELL".to_string(), 9.75)]),
                    ),
                ],
                &mut CleaningReport::default(),
            )
            .unwrap();
        let rows = out.metric.table.rows();
        assert_eq!(rows[0], vec![Value::text("CR-LOWELL"), Value::Float(9.75)]);
        assert_eq!(rows[1], vec![Value::text("CR-NEEDHAM"), Value::Float(6.75)]);
    }

    #[test]
    fn test_zone_mapping_load() {
        let path = format!("{}/cr_feed_metrics_zones.json", env::temp_dir().display());
        fs::write(&path, r#"{"line-Lowell": "area_commuter_rail_zone_5"}"#).unwrap();

        let zones = ZoneMapping::load(&path).unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones.get("line-Lowell"), Some("area_commuter_rail_zone_5"));
        assert_eq!(ZoneMapping::default().len(), 13);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_zone_mapping_load_rejects_bad_json() {
        let path = format!("{}/cr_feed_metrics_zones_bad.json", env::temp_dir().display());
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(ZoneMapping::load(&path), Err(PipelineError::Json(_))));
        fs::remove_file(&path).unwrap();
    }
}
