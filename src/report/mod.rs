use crate::catalog::{CategoryKey, CategoryRegistry};
use crate::ledger::model::{ActivityLogEntry, AppData, CategoryStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const HISTORY_PAGE_SIZE: usize = 7;
const RECENT_ENTRIES: usize = 5;
const WEEKDAY_HEADERS: [&str; 7] = ["일", "월", "화", "수", "목", "금", "토"];

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub page: usize,
    pub total_pages: usize,
    pub total_entries: usize,
    pub entries: Vec<ActivityLogEntry>,
}

/// One-based page of the newest-first log. Out-of-range pages are clamped.
pub fn history_page(log: &[ActivityLogEntry], page: usize) -> HistoryPage {
    let total_pages = log.len().div_ceil(HISTORY_PAGE_SIZE).max(1);
    let page = page.clamp(1, total_pages);

    let entries = log
        .iter()
        .skip((page - 1) * HISTORY_PAGE_SIZE)
        .take(HISTORY_PAGE_SIZE)
        .cloned()
        .collect();

    HistoryPage {
        page,
        total_pages,
        total_entries: log.len(),
        entries,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub day: u32,
    pub date: NaiveDate,
    pub category_key: Option<CategoryKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthCalendar {
    pub year: i32,
    pub month: u32,
    /// Blank cells before the 1st in a Sunday-first week.
    pub leading_blanks: u32,
    pub completed_days: usize,
    pub days: Vec<CalendarDay>,
}

pub fn parse_month(raw: &str) -> Result<(i32, u32)> {
    let first = NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .with_context(|| format!("Invalid month format: {raw}. Example: 2024-06"))?;

    Ok((first.year(), first.month()))
}

pub fn month_calendar(log: &[ActivityLogEntry], year: i32, month: u32) -> Result<MonthCalendar> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .with_context(|| format!("Invalid month: {year}-{month:02}"))?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .with_context(|| format!("Month out of range: {year}-{month:02}"))?;

    let completed = log
        .iter()
        .filter(|entry| entry.date >= first && entry.date < next_month)
        .map(|entry| (entry.date, entry.category_key))
        .collect::<BTreeMap<_, _>>();

    let days = first
        .iter_days()
        .take_while(|date| *date < next_month)
        .map(|date| CalendarDay {
            day: date.day(),
            date,
            category_key: completed.get(&date).copied(),
        })
        .collect::<Vec<_>>();

    Ok(MonthCalendar {
        year,
        month,
        leading_blanks: first.weekday().num_days_from_sunday(),
        completed_days: completed.len(),
        days,
    })
}

/// Plain-text month grid. Completed days carry a `*`.
pub fn render_calendar(calendar: &MonthCalendar) -> String {
    let mut cells = (0..calendar.leading_blanks)
        .map(|_| "   ".to_string())
        .collect::<Vec<_>>();
    cells.extend(calendar.days.iter().map(|day| {
        let mark = if day.category_key.is_some() { '*' } else { ' ' };
        format!("{:>2}{mark}", day.day)
    }));

    let rows = cells
        .chunks(7)
        .map(|week| week.join(" ").trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n");

    let header = WEEKDAY_HEADERS
        .iter()
        .map(|name| format!("{name} "))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "{}년 {}월 (완료 {}일)\n{}\n{}",
        calendar.year,
        calendar.month,
        calendar.completed_days,
        header.trim_end(),
        rows
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedCategory {
    pub rank: usize,
    pub key: CategoryKey,
    pub name: String,
    pub count: u32,
}

/// Categories with at least one completion, most completed first.
pub fn ranked_stats(stats: &CategoryStats, registry: &CategoryRegistry) -> Vec<RankedCategory> {
    let mut counted = stats
        .iter()
        .filter(|(_, count)| *count > 0)
        .collect::<Vec<_>>();
    counted.sort_by(|left, right| right.1.cmp(&left.1).then(left.0.cmp(&right.0)));

    counted
        .into_iter()
        .enumerate()
        .map(|(index, (key, count))| RankedCategory {
            rank: index + 1,
            key,
            name: registry.display_name(key).to_string(),
            count,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct MyPageSummary {
    pub date: String,
    pub generated_at: String,
    pub user_name: Option<String>,
    pub birth_date: Option<String>,
    pub total_completions: u32,
    pub current_streak: u32,
    pub today: Option<ActivityLogEntry>,
    pub ranking: Vec<RankedCategory>,
    pub recent: Vec<ActivityLogEntry>,
}

#[derive(Debug)]
pub struct SavedExport {
    pub markdown_path: PathBuf,
    pub json_path: PathBuf,
}

pub fn build_summary(data: &AppData, registry: &CategoryRegistry, today: NaiveDate) -> MyPageSummary {
    let generated_at: DateTime<Utc> = Utc::now();

    MyPageSummary {
        date: today.format("%Y-%m-%d").to_string(),
        generated_at: generated_at.to_rfc3339(),
        user_name: data.user_info.name.clone(),
        birth_date: data.user_info.birth_date.clone(),
        total_completions: data.category_stats.total(),
        current_streak: current_streak(&data.activity_log, today),
        today: data
            .activity_log
            .iter()
            .find(|entry| entry.date == today)
            .cloned(),
        ranking: ranked_stats(&data.category_stats, registry),
        recent: data
            .activity_log
            .iter()
            .take(RECENT_ENTRIES)
            .cloned()
            .collect(),
    }
}

/// Consecutive completed days ending today, or yesterday when today is
/// still open.
pub fn current_streak(log: &[ActivityLogEntry], today: NaiveDate) -> u32 {
    let dates = log.iter().map(|entry| entry.date).collect::<HashSet<_>>();
    let start = if dates.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    std::iter::successors(Some(start), |date| date.pred_opt())
        .take_while(|date| dates.contains(date))
        .count() as u32
}

pub fn render_markdown(summary: &MyPageSummary) -> String {
    let today_line = summary
        .today
        .as_ref()
        .map(|entry| format!("{} - {}", entry.category_name, entry.content.headline()))
        .unwrap_or_else(|| "아직 완료하지 않았습니다".to_string());

    let ranking_rows = if summary.ranking.is_empty() {
        "- 아직 완료한 챌린지가 없습니다".to_string()
    } else {
        summary
            .ranking
            .iter()
            .map(|ranked| format!("| {} | {} | {} |", ranked.rank, ranked.name, ranked.count))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let recent_rows = if summary.recent.is_empty() {
        "- 기록 없음".to_string()
    } else {
        summary
            .recent
            .iter()
            .map(|entry| {
                format!(
                    "- {} · {} · {}",
                    entry.date.format("%Y-%m-%d"),
                    entry.category_name,
                    entry.content.headline()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "# 오늘의 챌린지 - 마이페이지 ({})\n\n## 요약\n- 사용자: {}\n- 생년월일: {}\n- 총 완료: {}회\n- 연속 달성: {}일\n- 오늘의 챌린지: {}\n\n## 카테고리 순위\n| 순위 | 카테고리 | 완료 |\n|------|----------|------|\n{}\n\n## 최근 기록\n{}\n",
        summary.date,
        summary.user_name.as_deref().unwrap_or("-"),
        summary.birth_date.as_deref().unwrap_or("미등록"),
        summary.total_completions,
        summary.current_streak,
        today_line,
        ranking_rows,
        recent_rows
    )
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    summary: &'a MyPageSummary,
    data: &'a AppData,
}

pub fn save_export_files(
    summary: &MyPageSummary,
    data: &AppData,
    export_dir: &Path,
) -> Result<SavedExport> {
    fs::create_dir_all(export_dir).with_context(|| {
        format!(
            "Failed to create export directory: {}",
            export_dir.display()
        )
    })?;

    let stem = format!("mypage-{}", summary.date);
    let markdown_path = export_dir.join(format!("{stem}.md"));
    let json_path = export_dir.join(format!("{stem}.json"));

    fs::write(&markdown_path, render_markdown(summary)).with_context(|| {
        format!(
            "Failed to write Markdown export: {}",
            markdown_path.display()
        )
    })?;

    let json = serde_json::to_string_pretty(&ExportDocument { summary, data })
        .context("Failed to serialize export JSON")?;
    fs::write(&json_path, json)
        .with_context(|| format!("Failed to write JSON export: {}", json_path.display()))?;

    Ok(SavedExport {
        markdown_path,
        json_path,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        build_summary, current_streak, history_page, month_calendar, parse_month, ranked_stats,
        render_calendar, render_markdown, save_export_files,
    };
    use crate::catalog::content::{ChallengeContent, EconomicsContent, FortuneContent};
    use crate::catalog::{CategoryKey, CategoryRegistry};
    use crate::ledger::model::{ActivityLogEntry, AppData, CategoryStats};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(on: NaiveDate, key: CategoryKey) -> ActivityLogEntry {
        let content = match key {
            CategoryKey::Economics => ChallengeContent::Economics(EconomicsContent {
                term: "ETF".to_string(),
                description: "상장지수펀드".to_string(),
            }),
            _ => ChallengeContent::Fortune(FortuneContent {
                text: "좋은 하루".to_string(),
            }),
        };

        ActivityLogEntry {
            date: on,
            category_key: content.category(),
            category_name: CategoryRegistry::builtin()
                .display_name(content.category())
                .to_string(),
            content,
        }
    }

    fn log_of_days(days: u32) -> Vec<ActivityLogEntry> {
        (1..=days)
            .rev()
            .map(|day| entry(date(2024, 6, day), CategoryKey::Fortune))
            .collect()
    }

    #[test]
    fn history_pages_hold_seven_entries() {
        let log = log_of_days(16);

        let first = history_page(&log, 1);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.entries.len(), 7);
        assert_eq!(first.entries[0].date, date(2024, 6, 16));

        let last = history_page(&log, 3);
        assert_eq!(last.entries.len(), 2);

        let clamped = history_page(&log, 99);
        assert_eq!(clamped.page, 3);
        assert_eq!(history_page(&[], 1).total_pages, 1);
    }

    #[test]
    fn calendar_marks_completed_days() {
        let log = vec![
            entry(date(2024, 7, 1), CategoryKey::Fortune),
            entry(date(2024, 6, 30), CategoryKey::Economics),
            entry(date(2024, 6, 2), CategoryKey::Fortune),
        ];

        let calendar = month_calendar(&log, 2024, 6).unwrap();
        assert_eq!(calendar.days.len(), 30);
        assert_eq!(calendar.leading_blanks, 6);
        assert_eq!(calendar.completed_days, 2);
        assert_eq!(calendar.days[29].category_key, Some(CategoryKey::Economics));
        assert_eq!(calendar.days[0].category_key, None);

        let rendered = render_calendar(&calendar);
        assert!(rendered.starts_with("2024년 6월 (완료 2일)"));
        assert!(rendered.contains(" 2*"));
    }

    #[test]
    fn december_calendar_has_31_days() {
        let calendar = month_calendar(&[], 2024, 12).unwrap();
        assert_eq!(calendar.days.len(), 31);
        assert!(month_calendar(&[], 2024, 13).is_err());
    }

    #[test]
    fn month_parsing() {
        assert_eq!(parse_month("2024-06").unwrap(), (2024, 6));
        assert!(parse_month("2024/06").is_err());
        assert!(parse_month("2024-13").is_err());
    }

    #[test]
    fn ranking_skips_zero_counts() {
        let mut stats = CategoryStats::default();
        stats.set(CategoryKey::Quiz, 0);
        stats.set(CategoryKey::Economics, 3);
        stats.set(CategoryKey::Fortune, 3);
        stats.set(CategoryKey::Health, 5);

        let ranking = ranked_stats(&stats, &CategoryRegistry::builtin());
        let keys = ranking.iter().map(|ranked| ranked.key).collect::<Vec<_>>();

        assert_eq!(
            keys,
            vec![CategoryKey::Health, CategoryKey::Fortune, CategoryKey::Economics]
        );
        assert_eq!(ranking[0].rank, 1);
        assert_eq!(ranking[0].name, "건강 (스트레칭)");
    }

    #[test]
    fn streak_counts_back_from_yesterday_when_today_is_open() {
        let log = vec![
            entry(date(2024, 6, 9), CategoryKey::Fortune),
            entry(date(2024, 6, 8), CategoryKey::Fortune),
            entry(date(2024, 6, 6), CategoryKey::Fortune),
        ];

        assert_eq!(current_streak(&log, date(2024, 6, 10)), 2);
        assert_eq!(current_streak(&log, date(2024, 6, 9)), 2);
        assert_eq!(current_streak(&log, date(2024, 6, 12)), 0);
    }

    #[test]
    fn export_writes_markdown_and_json() {
        let log = log_of_days(3);
        let data = AppData {
            category_stats: CategoryStats::from_log(&log),
            activity_log: log,
            ..AppData::default()
        };
        let registry = CategoryRegistry::builtin();
        let summary = build_summary(&data, &registry, date(2024, 6, 3));
        assert_eq!(summary.current_streak, 3);
        assert!(render_markdown(&summary).contains("총 완료: 3회"));

        let dir = tempfile::tempdir().unwrap();
        let saved = save_export_files(&summary, &data, dir.path()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(saved.json_path).unwrap()).unwrap();
        assert_eq!(json["data"]["activityLog"].as_array().unwrap().len(), 3);
        assert!(saved.markdown_path.ends_with("mypage-2024-06-03.md"));
    }
}
