use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One page of upstream OCR output. Immutable input; `lesson_indicators`
/// carries table-of-contents style entries detected on the page, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub page_number: i64,
    #[serde(default)]
    pub text_preview: String,
    #[serde(default)]
    pub lesson_indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonBoundary {
    pub lesson_number: i64,
    pub title: String,
    pub start_page: i64,
    pub end_page: i64,
    pub session_count: i64,
    pub is_major_work: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub lessons: Vec<LessonBoundary>,
    pub warnings: Vec<String>,
}

struct Patterns {
    // "LESSON 12 Solve Problems Involving Percents" in page body text.
    // The title runs until a pipe, a SESSION marker, or end of line.
    preview: Regex,
    // ToC-style indicator with a trailing page reference, dot leaders
    // tolerated: "LESSON 1 Solve Problems . . . 15"
    indicator: Regex,
    session: Regex,
    major_work: Regex,
}

impl Patterns {
    fn new() -> Self {
        Self {
            preview: Regex::new(
                r"(?i)LESSON\s+(\d+)\s+([^|\r\n]+?)(?:\s*\|\s*SESSION\b|\s+SESSION\s+\d|\s*$|\r|\n)",
            )
            .expect("preview pattern"),
            indicator: Regex::new(r"(?i)LESSON\s+(\d+)\s+(.+?)[\s.·]*\s(\d+)\s*$")
                .expect("indicator pattern"),
            session: Regex::new(r"(?i)SESSION\s+(\d+)").expect("session pattern"),
            major_work: Regex::new(r"(?i)\bmajor work\b").expect("major work pattern"),
        }
    }
}

struct Accumulator {
    lesson_number: i64,
    title: String,
    start_page: i64,
    max_session: i64,
    major_work: bool,
}

/// Scan an ordered page corpus once and assign `[start_page, end_page]`
/// ranges. Best effort over noisy OCR text: pages matching nothing leave
/// the state unchanged, and duplicate lesson numbers are reported as
/// warnings rather than resolved here.
pub fn extract_lesson_boundaries(pages: &[PageRecord], last_page: i64) -> Extraction {
    let patterns = Patterns::new();
    let mut lessons: Vec<LessonBoundary> = Vec::new();
    let mut current: Option<Accumulator> = None;

    for page in pages {
        // Indicator matches outrank a body-text match on the same page:
        // they encode the authoritative start pages. A contents page can
        // carry several entries; each one closes the previous lesson.
        let mut opened = false;
        for indicator in &page.lesson_indicators {
            if let Some(caps) = patterns.indicator.captures(indicator) {
                let number: i64 = match caps[1].parse() {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let start: i64 = match caps[3].parse() {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let title = clean_title(&caps[2]);
                if title.is_empty() {
                    continue;
                }
                close_current(&mut lessons, current.take(), start - 1);
                current = Some(Accumulator {
                    lesson_number: number,
                    title,
                    start_page: start,
                    max_session: 0,
                    major_work: false,
                });
                opened = true;
            }
        }

        if !opened {
            if let Some(caps) = patterns.preview.captures(&page.text_preview) {
                if let Ok(number) = caps[1].parse::<i64>() {
                    let title = clean_title(&caps[2]);
                    let already_open = current
                        .as_ref()
                        .map(|acc| acc.lesson_number == number)
                        .unwrap_or(false);
                    if !title.is_empty() && !already_open {
                        close_current(&mut lessons, current.take(), page.page_number - 1);
                        current = Some(Accumulator {
                            lesson_number: number,
                            title,
                            start_page: page.page_number,
                            max_session: 0,
                            major_work: false,
                        });
                    }
                }
            }
        }

        if let Some(acc) = current.as_mut() {
            for caps in patterns.session.captures_iter(&page.text_preview) {
                if let Ok(n) = caps[1].parse::<i64>() {
                    if n > acc.max_session {
                        acc.max_session = n;
                    }
                }
            }
            if patterns.major_work.is_match(&page.text_preview) {
                acc.major_work = true;
            }
        }
    }

    close_current(&mut lessons, current.take(), last_page);

    let warnings = duplicate_warnings(&lessons);
    Extraction { lessons, warnings }
}

fn close_current(lessons: &mut Vec<LessonBoundary>, acc: Option<Accumulator>, end_page: i64) {
    let Some(acc) = acc else {
        return;
    };
    let end_page = end_page.max(acc.start_page);
    lessons.push(LessonBoundary {
        lesson_number: acc.lesson_number,
        title: acc.title,
        start_page: acc.start_page,
        end_page,
        session_count: if acc.max_session > 0 { acc.max_session } else { 1 },
        is_major_work: acc.major_work,
    });
}

fn clean_title(raw: &str) -> String {
    // Strip dot leaders and copyright fragments the OCR step leaves behind.
    let mut title = raw.trim().trim_matches(|c| c == '.' || c == '·').trim().to_string();
    if let Some(idx) = title.find('©') {
        title.truncate(idx);
    }
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn duplicate_warnings(lessons: &[LessonBoundary]) -> Vec<String> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for lesson in lessons {
        *counts.entry(lesson.lesson_number).or_insert(0) += 1;
    }
    let mut dups: Vec<i64> = counts
        .into_iter()
        .filter(|(_, c)| *c > 1)
        .map(|(n, _)| n)
        .collect();
    dups.sort_unstable();
    dups.into_iter()
        .map(|n| format!("duplicate lesson number {} detected; review boundaries", n))
        .collect()
}
