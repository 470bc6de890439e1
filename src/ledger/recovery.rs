use crate::catalog::{CategoryKey, CategoryRegistry};
use crate::ledger::model::{ActivityLogEntry, AppData, CategoryStats, UserInfo};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repair {
    UnreadableRecord,
    UserInfoReset,
    ActivityLogReset,
    DroppedEntries(usize),
    DuplicateDates(usize),
    CategoryNamesFilled(usize),
    StatsRecomputed,
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repair::UnreadableRecord => f.write_str("record was not a JSON object; started fresh"),
            Repair::UserInfoReset => f.write_str("userInfo was malformed; reset"),
            Repair::ActivityLogReset => f.write_str("activityLog was not a list; reset to empty"),
            Repair::DroppedEntries(count) => write!(f, "dropped {count} malformed log entries"),
            Repair::DuplicateDates(count) => write!(f, "collapsed {count} duplicate-date entries"),
            Repair::CategoryNamesFilled(count) => {
                write!(f, "filled {count} missing category names")
            }
            Repair::StatsRecomputed => f.write_str("categoryStats recomputed from activityLog"),
        }
    }
}

#[derive(Debug)]
pub struct Recovered {
    pub data: AppData,
    pub repairs: Vec<Repair>,
}

/// Decodes a stored record field by field. A malformed field is reset to its
/// empty form instead of discarding the whole record.
pub fn decode_app_data(raw: &str, registry: &CategoryRegistry) -> Recovered {
    let object = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(object)) => object,
        _ => {
            return Recovered {
                data: AppData::default(),
                repairs: vec![Repair::UnreadableRecord],
            };
        }
    };

    let mut repairs = Vec::new();

    let version = object
        .get("version")
        .and_then(Value::as_u64)
        .and_then(|version| u32::try_from(version).ok())
        .unwrap_or(0);

    let user_info = match object.get("userInfo") {
        None | Some(Value::Null) => UserInfo::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|_| {
            repairs.push(Repair::UserInfoReset);
            UserInfo::default()
        }),
    };

    let mut activity_log = match object.get("activityLog") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let entries = items
                .iter()
                .filter_map(|item| serde_json::from_value::<ActivityLogEntry>(item.clone()).ok())
                .collect::<Vec<_>>();

            let dropped = items.len() - entries.len();
            if dropped > 0 {
                repairs.push(Repair::DroppedEntries(dropped));
            }
            entries
        }
        Some(_) => {
            repairs.push(Repair::ActivityLogReset);
            Vec::new()
        }
    };

    let mut unnamed = 0;
    for entry in activity_log
        .iter_mut()
        .filter(|entry| entry.category_name.trim().is_empty())
    {
        entry.category_name = registry.display_name(entry.category_key).to_string();
        unnamed += 1;
    }
    if unnamed > 0 {
        repairs.push(Repair::CategoryNamesFilled(unnamed));
    }

    let before_dedup = activity_log.len();
    let mut seen = HashSet::new();
    activity_log.retain(|entry| seen.insert(entry.date));
    if activity_log.len() < before_dedup {
        repairs.push(Repair::DuplicateDates(before_dedup - activity_log.len()));
    }
    activity_log.sort_by(|left, right| right.date.cmp(&left.date));

    let expected = CategoryStats::from_log(&activity_log);
    let category_stats = match object.get("categoryStats") {
        Some(Value::Object(map)) => decode_stats(map).filter(|stats| stats.matches(&expected)),
        None | Some(Value::Null) => Some(CategoryStats::default()).filter(|_| activity_log.is_empty()),
        Some(_) => None,
    }
    .unwrap_or_else(|| {
        repairs.push(Repair::StatsRecomputed);
        expected
    });

    Recovered {
        data: AppData {
            version,
            user_info,
            activity_log,
            category_stats,
        },
        repairs,
    }
}

fn decode_stats(map: &Map<String, Value>) -> Option<CategoryStats> {
    map.iter().try_fold(CategoryStats::default(), |mut stats, (key, value)| {
        let key = CategoryKey::parse(key)?;
        let count = value.as_u64().and_then(|count| u32::try_from(count).ok())?;
        stats.set(key, count);
        Some(stats)
    })
}

#[cfg(test)]
mod tests {
    use super::{Repair, decode_app_data};
    use crate::catalog::{CategoryKey, CategoryRegistry};
    use serde_json::json;

    fn registry() -> CategoryRegistry {
        CategoryRegistry::builtin()
    }

    #[test]
    fn activity_log_object_is_reset_to_empty() {
        let raw = json!({
            "userInfo": {"birthDate": "19900101"},
            "activityLog": {"date": "2024-06-01", "categoryKey": "health"},
            "categoryStats": {"health": 1}
        })
        .to_string();

        let recovered = decode_app_data(&raw, &registry());

        assert!(recovered.data.activity_log.is_empty());
        assert_eq!(recovered.data.category_stats.get(CategoryKey::Health), 0);
        assert_eq!(
            recovered.data.user_info.birth_date.as_deref(),
            Some("19900101")
        );
        assert!(recovered.repairs.contains(&Repair::ActivityLogReset));
        assert!(recovered.repairs.contains(&Repair::StatsRecomputed));
    }

    #[test]
    fn legacy_record_without_version_is_accepted_as_is() {
        let raw = json!({
            "userInfo": {"id": "7", "name": "민지", "provider": "kakao"},
            "activityLog": [
                {"date": "2024-06-01", "categoryKey": "quiz", "categoryName": "퀴즈형 학습",
                 "content": {"question": "q", "options": ["a"], "answer": "a", "explanation": "e", "type": "multiple-choice"}},
                {"date": "2024-06-02", "categoryKey": "fortune", "categoryName": "오늘의 운세",
                 "content": {"text": "행운"}}
            ],
            "categoryStats": {"quiz": 1, "fortune": 1, "health": 0}
        })
        .to_string();

        let recovered = decode_app_data(&raw, &registry());

        assert!(recovered.repairs.is_empty());
        assert_eq!(recovered.data.version, 0);
        let dates = recovered
            .data
            .activity_log
            .iter()
            .map(|entry| entry.date.to_string())
            .collect::<Vec<_>>();
        assert_eq!(dates, vec!["2024-06-02", "2024-06-01"]);
    }

    #[test]
    fn malformed_entries_are_dropped_and_stats_follow() {
        let raw = json!({
            "activityLog": [
                {"date": "2024-06-01", "categoryKey": "fortune", "categoryName": "", "content": {"text": "행운"}},
                {"date": "not-a-date", "categoryKey": "fortune", "content": {"text": "x"}},
                {"date": "2024-06-02", "categoryKey": "language", "content": {}}
            ],
            "categoryStats": {"fortune": 2}
        })
        .to_string();

        let recovered = decode_app_data(&raw, &registry());

        assert_eq!(recovered.data.activity_log.len(), 1);
        assert_eq!(recovered.data.activity_log[0].category_name, "오늘의 운세");
        assert_eq!(recovered.data.category_stats.get(CategoryKey::Fortune), 1);
        assert!(recovered.repairs.contains(&Repair::DroppedEntries(2)));
        assert!(recovered.repairs.contains(&Repair::CategoryNamesFilled(1)));
        assert!(recovered.repairs.contains(&Repair::StatsRecomputed));
    }

    #[test]
    fn duplicate_dates_keep_first_entry() {
        let raw = json!({
            "activityLog": [
                {"date": "2024-06-01", "categoryKey": "fortune", "categoryName": "a", "content": {"text": "first"}},
                {"date": "2024-06-01", "categoryKey": "economics", "categoryName": "b", "content": {"term": "t", "description": "d"}}
            ],
            "categoryStats": {"fortune": 1, "economics": 1}
        })
        .to_string();

        let recovered = decode_app_data(&raw, &registry());

        assert_eq!(recovered.data.activity_log.len(), 1);
        assert_eq!(
            recovered.data.activity_log[0].category_key,
            CategoryKey::Fortune
        );
        assert_eq!(recovered.data.category_stats.get(CategoryKey::Economics), 0);
        assert!(recovered.repairs.contains(&Repair::DuplicateDates(1)));
    }

    #[test]
    fn non_object_record_starts_fresh() {
        let recovered = decode_app_data("[1,2,3]", &registry());

        assert_eq!(recovered.repairs, vec![Repair::UnreadableRecord]);
        assert!(recovered.data.activity_log.is_empty());
    }
}
