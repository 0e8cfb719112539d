use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One schedulable lesson, already flattened out of its document and
/// ordered by (grade, lesson sequence).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingInput {
    pub lesson_id: String,
    pub lesson_number: i64,
    pub title: String,
    pub grade: i64,
    pub volume: i64,
    pub is_major_work: bool,
    pub estimated_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingRequest {
    pub grade_range: Vec<i64>,
    pub total_days: i64,
    pub major_work_focus_percent: i64,
    pub target_population: String,
    pub include_prerequisites: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingLesson {
    pub lesson_id: String,
    pub lesson_number: i64,
    pub title: String,
    pub grade: i64,
    pub volume: i64,
    pub is_major_work: bool,
    pub estimated_days: i64,
    pub sequence_number: i64,
    pub total_days_at_this_point: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub grade: i64,
    pub lesson_count: i64,
    pub days: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingSummary {
    pub total_lessons: i64,
    pub total_days_used: i64,
    pub total_days_requested: i64,
    pub major_work_days: i64,
    pub achieved_major_work_percent: f64,
    pub target_major_work_percent: i64,
    pub by_grade: Vec<GradeSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingGuide {
    pub lessons: Vec<PacingLesson>,
    pub summary: PacingSummary,
}

fn population_days(base: i64, target_population: &str) -> i64 {
    let base = base.max(1) as f64;
    let scaled = match target_population {
        "accelerated" => (base * 0.75).ceil(),
        "scaffolded" => (base * 1.25).ceil(),
        "remedial" => (base * 1.5).ceil(),
        _ => base,
    };
    (scaled as i64).max(1)
}

/// Greedy first-fit allocation in curriculum order. Walks the lessons as
/// given (grade ascending, then sequence), stops at the first lesson that
/// would blow the day budget, and reports the achieved major-work
/// percentage next to the requested target. It never reorders or
/// backtracks to chase the target percentage.
pub fn build_pacing_guide(lessons: Vec<PacingInput>, request: &PacingRequest) -> PacingGuide {
    let mut selected: Vec<PacingLesson> = Vec::new();
    let mut used_days: i64 = 0;
    let mut major_work_days: i64 = 0;

    for lesson in lessons {
        let mut days = population_days(lesson.estimated_days, &request.target_population);
        if request.include_prerequisites {
            days += 1;
        }
        if used_days + days > request.total_days {
            break;
        }
        used_days += days;
        if lesson.is_major_work {
            major_work_days += days;
        }
        selected.push(PacingLesson {
            lesson_id: lesson.lesson_id,
            lesson_number: lesson.lesson_number,
            title: lesson.title,
            grade: lesson.grade,
            volume: lesson.volume,
            is_major_work: lesson.is_major_work,
            estimated_days: days,
            sequence_number: selected.len() as i64 + 1,
            total_days_at_this_point: used_days,
        });
    }

    let achieved = if used_days > 0 {
        100.0 * major_work_days as f64 / used_days as f64
    } else {
        0.0
    };

    let mut by_grade: BTreeMap<i64, GradeSummary> = BTreeMap::new();
    for lesson in &selected {
        let entry = by_grade.entry(lesson.grade).or_insert(GradeSummary {
            grade: lesson.grade,
            lesson_count: 0,
            days: 0,
        });
        entry.lesson_count += 1;
        entry.days += lesson.estimated_days;
    }

    let summary = PacingSummary {
        total_lessons: selected.len() as i64,
        total_days_used: used_days,
        total_days_requested: request.total_days,
        major_work_days,
        achieved_major_work_percent: achieved,
        target_major_work_percent: request.major_work_focus_percent,
        by_grade: by_grade.into_values().collect(),
    };

    PacingGuide {
        lessons: selected,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(n: i64, grade: i64, days: i64, major: bool) -> PacingInput {
        PacingInput {
            lesson_id: format!("g{}-l{}", grade, n),
            lesson_number: n,
            title: format!("Lesson {}", n),
            grade,
            volume: 1,
            is_major_work: major,
            estimated_days: days,
        }
    }

    fn request(total_days: i64) -> PacingRequest {
        PacingRequest {
            grade_range: vec![7],
            total_days,
            major_work_focus_percent: 70,
            target_population: "standard".to_string(),
            include_prerequisites: false,
        }
    }

    #[test]
    fn budget_is_never_exceeded() {
        let lessons = vec![
            lesson(1, 7, 3, true),
            lesson(2, 7, 4, true),
            lesson(3, 7, 5, false),
        ];
        let guide = build_pacing_guide(lessons, &request(8));
        assert_eq!(guide.lessons.len(), 2);
        assert_eq!(guide.summary.total_days_used, 7);
        assert!(guide.summary.total_days_used <= 8);
    }

    #[test]
    fn allocation_stops_at_first_overflow_without_reordering() {
        // Lesson 2 overflows; lesson 3 would fit but first-fit-in-order
        // never looks past the stop point.
        let lessons = vec![
            lesson(1, 7, 3, true),
            lesson(2, 7, 10, true),
            lesson(3, 7, 1, false),
        ];
        let guide = build_pacing_guide(lessons, &request(5));
        assert_eq!(guide.lessons.len(), 1);
        assert_eq!(guide.lessons[0].lesson_number, 1);
    }

    #[test]
    fn more_days_never_select_fewer_lessons() {
        let lessons: Vec<PacingInput> = (1..=10).map(|n| lesson(n, 7, 3, n % 2 == 0)).collect();
        let mut previous = 0;
        for total in [0, 3, 7, 12, 20, 30, 100] {
            let guide = build_pacing_guide(lessons.clone(), &request(total));
            assert!(guide.lessons.len() >= previous, "regressed at budget {}", total);
            previous = guide.lessons.len();
        }
    }

    #[test]
    fn empty_input_yields_empty_guide_not_error() {
        let guide = build_pacing_guide(Vec::new(), &request(160));
        assert!(guide.lessons.is_empty());
        assert_eq!(guide.summary.total_lessons, 0);
        assert_eq!(guide.summary.total_days_used, 0);
        assert_eq!(guide.summary.achieved_major_work_percent, 0.0);
    }

    #[test]
    fn achieved_percentage_is_reported_not_enforced() {
        let lessons = vec![lesson(1, 7, 4, true), lesson(2, 7, 4, false)];
        let guide = build_pacing_guide(lessons, &request(8));
        assert_eq!(guide.summary.major_work_days, 4);
        assert!((guide.summary.achieved_major_work_percent - 50.0).abs() < 1e-9);
        assert_eq!(guide.summary.target_major_work_percent, 70);
    }

    #[test]
    fn sequence_and_cumulative_days_are_assigned_in_order() {
        let lessons = vec![lesson(1, 7, 2, true), lesson(2, 7, 3, true)];
        let guide = build_pacing_guide(lessons, &request(10));
        assert_eq!(guide.lessons[0].sequence_number, 1);
        assert_eq!(guide.lessons[0].total_days_at_this_point, 2);
        assert_eq!(guide.lessons[1].sequence_number, 2);
        assert_eq!(guide.lessons[1].total_days_at_this_point, 5);
    }

    #[test]
    fn accelerated_population_compresses_days() {
        let lessons = vec![lesson(1, 7, 4, true)];
        let mut req = request(10);
        req.target_population = "accelerated".to_string();
        let guide = build_pacing_guide(lessons, &req);
        assert_eq!(guide.lessons[0].estimated_days, 3);
    }

    #[test]
    fn prerequisite_support_adds_a_review_day_per_lesson() {
        let lessons = vec![lesson(1, 7, 2, true), lesson(2, 7, 2, true)];
        let mut req = request(10);
        req.include_prerequisites = true;
        let guide = build_pacing_guide(lessons, &req);
        assert_eq!(guide.summary.total_days_used, 6);
    }

    #[test]
    fn grade_summary_is_a_post_pass_reduction() {
        let lessons = vec![
            lesson(1, 7, 2, true),
            lesson(2, 7, 2, false),
            lesson(1, 8, 3, true),
        ];
        let guide = build_pacing_guide(lessons, &request(20));
        assert_eq!(guide.summary.by_grade.len(), 2);
        assert_eq!(guide.summary.by_grade[0].grade, 7);
        assert_eq!(guide.summary.by_grade[0].lesson_count, 2);
        assert_eq!(guide.summary.by_grade[0].days, 4);
        assert_eq!(guide.summary.by_grade[1].days, 3);
    }
}
