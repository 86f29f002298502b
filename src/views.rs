use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::models::{Category, Task, PERSONAL_CATEGORY_ID, WORK_CATEGORY_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskFilter {
    #[default]
    All,
    Personal,
    Work,
    Completed,
}

impl std::str::FromStr for TaskFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "all" => Ok(TaskFilter::All),
            "personal" => Ok(TaskFilter::Personal),
            "work" => Ok(TaskFilter::Work),
            "completed" => Ok(TaskFilter::Completed),
            other => Err(format!("unknown filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredTask {
    pub category_id: String,
    pub project_id: String,
    pub project_name: String,
    pub task: Task,
}

// Remote-seeded categories carry server ids, so the built-in ones are also matched by name.
fn is_category(category: &Category, id: &str) -> bool {
    category.id == id || category.name.eq_ignore_ascii_case(id)
}

/// Tasks in tree order. `All`, `Personal` and `Work` show open tasks only.
pub fn filter_tasks(tree: &[Category], filter: TaskFilter) -> Vec<FilteredTask> {
    let mut out = Vec::new();
    for category in tree {
        let category_matches = match filter {
            TaskFilter::Personal => is_category(category, PERSONAL_CATEGORY_ID),
            TaskFilter::Work => is_category(category, WORK_CATEGORY_ID),
            TaskFilter::All | TaskFilter::Completed => true,
        };
        if !category_matches {
            continue;
        }
        for project in &category.projects {
            for task in &project.tasks {
                let wanted = match filter {
                    TaskFilter::Completed => task.completed,
                    _ => !task.completed,
                };
                if wanted {
                    out.push(FilteredTask {
                        category_id: category.id.clone(),
                        project_id: project.id.clone(),
                        project_name: project.name.clone(),
                        task: task.clone(),
                    });
                }
            }
        }
    }
    out
}

pub fn open_task_count(tree: &[Category]) -> usize {
    tree.iter()
        .flat_map(|c| &c.projects)
        .flat_map(|p| &p.tasks)
        .filter(|t| !t.completed)
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryPeriod {
    Week,
    Month,
    Year,
}

impl std::str::FromStr for SummaryPeriod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "week" => Ok(SummaryPeriod::Week),
            "month" => Ok(SummaryPeriod::Month),
            "year" => Ok(SummaryPeriod::Year),
            other => Err(format!("unknown period: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryGroup {
    pub project_name: String,
    pub tasks: Vec<Task>,
}

/// Half-open `[start, end)` bounds of the calendar period containing `now`, in `now`'s zone.
/// Weeks start on Monday.
pub fn period_bounds<Tz: TimeZone>(
    period: SummaryPeriod,
    now: &DateTime<Tz>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    let (start, end) = match period {
        SummaryPeriod::Week => {
            let start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            (start, start + Duration::days(7))
        }
        SummaryPeriod::Month => {
            let start = today.with_day(1).unwrap_or(today);
            let end = if start.month() == 12 {
                NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
            };
            (start, end.unwrap_or(start + Duration::days(31)))
        }
        SummaryPeriod::Year => {
            let start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);
            let end = NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
                .unwrap_or(start + Duration::days(366));
            (start, end)
        }
    };
    let zone = now.timezone();
    (local_midnight(&zone, start), local_midnight(&zone, end))
}

fn local_midnight<Tz: TimeZone>(zone: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match zone.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST jump; the first hour that exists is close enough.
        None => zone
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| midnight.and_utc()),
    }
}

/// Completed tasks last updated inside the current period, grouped by project name.
/// Groups come in name order; tasks inside a group newest first.
pub fn completed_summary<Tz: TimeZone>(
    tree: &[Category],
    period: SummaryPeriod,
    now: &DateTime<Tz>,
) -> Vec<SummaryGroup> {
    let (start, end) = period_bounds(period, now);
    let mut groups: BTreeMap<String, Vec<Task>> = BTreeMap::new();
    for project in tree.iter().flat_map(|c| &c.projects) {
        for task in &project.tasks {
            if task.completed && task.updated_at >= start && task.updated_at < end {
                groups
                    .entry(project.name.clone())
                    .or_default()
                    .push(task.clone());
            }
        }
    }
    groups
        .into_iter()
        .map(|(project_name, mut tasks)| {
            tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            SummaryGroup {
                project_name,
                tasks,
            }
        })
        .collect()
}
