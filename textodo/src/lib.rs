//! Plain-text TODO lists embedded in ordinary text documents.
//!
//! A TODO line is a one-line task record:
//! `<marker> <desc>[ <duration>][ +<spent>][ <points>c][ <=<due>][ ##<annotations>]`.
//! The core stays pure: every operation takes the lines it works on plus an explicit
//! `now`, and returns new text for the caller to write back.

pub mod core {
    use chrono::{NaiveDateTime, NaiveTime, Weekday};
    use serde::{Deserialize, Serialize};
    use serde_with::skip_serializing_none;

    /* ------------------------------ Constants ------------------------------ */

    /// Day letters in Monday..Sunday order. Sunday is `N`.
    pub const DAY_LETTERS: [char; 7] = ['M', 'T', 'W', 'R', 'F', 'S', 'N'];

    pub const PENDING_MARKER: char = '*';

    /// Start of the trailing annotation comment.
    pub const ANNOTATION_MARKER: &str = "##";

    /// Column the annotation comment is padded to.
    pub const ANNOTATION_COLUMN: usize = 65;

    /// Upper bound on lines scanned in either direction when locating a region.
    pub const MAX_LINES_IN_TODOS: usize = 1000;

    pub const MINUTES_PER_DAY: i64 = 24 * 60;

    /// Priority given to pending lines whose due date has passed.
    pub const ELAPSED_PRIORITY: f64 = f64::MAX;

    /* ------------------------------ Entities ------------------------------ */

    /// One parsed TODO line. A value object: the text is the durable state.
    #[skip_serializing_none]
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct Todo {
        /// Weekday the task was completed on; `None` while pending.
        pub done_on: Option<Weekday>,

        /// Description with every recognized token removed.
        pub desc: String,

        /// Estimated effort in minutes.
        pub duration: Option<f64>,

        /// Deadline, pinned to the last second of its day.
        pub due_date: Option<NaiveDateTime>,

        /// Calendar days from `now` to `due_date`, computed at parse time.
        pub days_left: Option<i64>,

        /// Live timer start. Only hour and minute are meaningful.
        pub start: Option<NaiveTime>,

        /// Effort logged so far, in minutes.
        pub spent_minutes: Option<f64>,

        /// Coins attached to the task (`115c`).
        pub points: Option<f64>,
    }

    impl Todo {
        pub fn pending(desc: impl Into<String>) -> Self {
            Self {
                desc: desc.into(),
                ..Self::default()
            }
        }

        pub fn is_done(&self) -> bool {
            self.done_on.is_some()
        }

        /// -1 while pending, otherwise 0 (Monday) ..= 6 (Sunday).
        pub fn day_number(&self) -> i8 {
            self.done_on
                .map_or(-1, |day| day.num_days_from_monday() as i8)
        }

        pub fn is_elapsed(&self) -> bool {
            matches!(self.days_left, Some(days) if days < 1)
        }

        pub fn has_completion_rate(&self) -> bool {
            self.duration.is_some() && self.days_left.is_some()
        }

        /// Minutes per day needed to finish before the due date.
        pub fn completion_rate(&self) -> Option<f64> {
            match (self.duration, self.days_left) {
                (Some(minutes), Some(days)) => Some(minutes / days as f64),
                _ => None,
            }
        }

        /// Coins earned per hour of estimated effort.
        pub fn points_rate(&self) -> Option<f64> {
            match (self.points, self.duration) {
                (Some(points), Some(minutes)) if minutes > 0.0 => Some(points / (minutes / 60.0)),
                _ => None,
            }
        }

        /// Sort key for pending lines; higher sorts first.
        pub fn priority(&self) -> f64 {
            match self.completion_rate() {
                None => -1.0,
                Some(_) if self.is_elapsed() => ELAPSED_PRIORITY,
                Some(rate) => rate,
            }
        }
    }

    pub fn weekday_for_letter(letter: char) -> Option<Weekday> {
        match letter {
            'M' => Some(Weekday::Mon),
            'T' => Some(Weekday::Tue),
            'W' => Some(Weekday::Wed),
            'R' => Some(Weekday::Thu),
            'F' => Some(Weekday::Fri),
            'S' => Some(Weekday::Sat),
            'N' => Some(Weekday::Sun),
            _ => None,
        }
    }

    pub fn letter_for_weekday(day: Weekday) -> char {
        DAY_LETTERS[day.num_days_from_monday() as usize]
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum TodoError {
        #[error("not a TODO line")]
        NotATodoLine,
        #[error("no TODOs header found around the cursor")]
        NoRegionFound,
        #[error("line {line} is out of range (document has {len} lines)")]
        LineOutOfRange { line: usize, len: usize },
    }

}

pub mod parser {
    //! Line grammar built on `nom`.
    //!
    //! Parsing strategy:
    //! - The two-character marker decides whether a line is a TODO at all.
    //! - Everything after `##` is the annotation comment; only a live timer (`@H:MM`)
    //!   is read back from it, the rest is recomputed on render.
    //! - The remaining text is split on single spaces and each word is tried against
    //!   the token grammar. The first match per field is extracted; everything else,
    //!   including malformed tokens, stays in the description.

    use crate::core::*;
    use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::tag,
        character::complete::{anychar, char, digit1, space0},
        combinator::{all_consuming, map, map_opt, map_res, opt, recognize, rest, value},
        error::VerboseError,
        sequence::{pair, preceded, separated_pair, terminated, tuple},
    };

    /* ------------------------ Public entry points ------------------------ */

    /// True when the line starts with a day letter or `*` followed by a space.
    pub fn is_todo_line(line: &str) -> bool {
        marker(line).is_ok()
    }

    pub fn is_pending_todo_line(line: &str) -> bool {
        line.starts_with("* ")
    }

    /// True for `TODOs`, `TODOs:` and either of those followed by an annotation comment.
    pub fn is_header_line(line: &str) -> bool {
        header(line).is_ok()
    }

    pub fn is_blank_line(line: &str) -> bool {
        line.trim().is_empty()
    }

    /// Parse one line. `None` means the line is not a TODO line; there is no partial result.
    pub fn parse_todo(line: &str, now: NaiveDateTime) -> Option<Todo> {
        let (body, done_on) = marker(line).ok()?;
        let (text, comment) = split_comment(body);

        let mut todo = Todo {
            done_on,
            ..Todo::default()
        };

        let mut kept: Vec<&str> = Vec::new();
        for word in text.split(' ') {
            if !absorb_token(&mut todo, word, now) {
                kept.push(word);
            }
        }
        todo.desc = kept.join(" ").trim_end().to_string();

        if let (None, Some(comment)) = (todo.start, comment) {
            todo.start = comment.split_whitespace().find_map(start_time);
        }

        Some(todo)
    }

    /* ------------------------------- Utils ------------------------------- */

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Token {
        Duration(f64),
        Spent(f64),
        Points(f64),
        Due { month: u32, day: u32 },
        Start(NaiveTime),
    }

    fn split_comment(body: &str) -> (&str, Option<&str>) {
        match body.find(ANNOTATION_MARKER) {
            Some(idx) => (
                body[..idx].trim_end(),
                Some(&body[idx + ANNOTATION_MARKER.len()..]),
            ),
            None => (body, None),
        }
    }

    /// Store `word` in the first empty matching field. Returns false when the word
    /// stays part of the description.
    fn absorb_token(todo: &mut Todo, word: &str, now: NaiveDateTime) -> bool {
        let Some(parsed) = token(word) else {
            return false;
        };
        match parsed {
            Token::Duration(minutes) if todo.duration.is_none() => {
                todo.duration = Some(minutes);
            }
            Token::Spent(minutes) if todo.spent_minutes.is_none() => {
                todo.spent_minutes = Some(minutes);
            }
            Token::Points(points) if todo.points.is_none() => {
                todo.points = Some(points);
            }
            Token::Due { month, day } if todo.due_date.is_none() => {
                let Some(date) = NaiveDate::from_ymd_opt(now.year(), month, day) else {
                    return false;
                };
                let Some(due) = date.and_hms_opt(23, 59, 59) else {
                    return false;
                };
                todo.due_date = Some(due);
                todo.days_left = Some((date - now.date()).num_days());
            }
            Token::Start(time) if todo.start.is_none() => {
                todo.start = Some(time);
            }
            _ => return false,
        }
        true
    }

    fn start_time(word: &str) -> Option<NaiveTime> {
        match token(word) {
            Some(Token::Start(time)) => Some(time),
            _ => None,
        }
    }

    fn token(word: &str) -> Option<Token> {
        all_consuming(alt((
            spent_token,
            due_token,
            start_token,
            duration_token,
            points_token,
        )))(word)
        .ok()
        .map(|(_, token)| token)
    }

    /* ------------------------------- Grammar ------------------------------- */

    fn marker(i: &str) -> PResult<'_, Option<chrono::Weekday>> {
        terminated(
            alt((
                value(None, char(PENDING_MARKER)),
                map_opt(anychar, |c| weekday_for_letter(c).map(Some)),
            )),
            char(' '),
        )(i)
    }

    fn header(i: &str) -> PResult<'_, ()> {
        value(
            (),
            all_consuming(tuple((
                tag("TODOs"),
                opt(char(':')),
                opt(preceded(space0, preceded(tag(ANNOTATION_MARKER), rest))),
            ))),
        )(i)
    }

    fn number(i: &str) -> PResult<'_, f64> {
        map_res(
            recognize(pair(digit1, opt(pair(char('.'), digit1)))),
            |s: &str| s.parse::<f64>(),
        )(i)
    }

    fn uint(i: &str) -> PResult<'_, u32> {
        map_res(digit1, |s: &str| s.parse::<u32>())(i)
    }

    fn duration_token(i: &str) -> PResult<'_, Token> {
        map(
            pair(
                number,
                alt((
                    value(60.0, alt((tag("hrs"), tag("hr")))),
                    value(1.0, tag("m")),
                )),
            ),
            |(n, scale)| Token::Duration(n * scale),
        )(i)
    }

    fn spent_token(i: &str) -> PResult<'_, Token> {
        map(
            preceded(
                char('+'),
                pair(number, alt((value(60.0, tag("hr")), value(1.0, tag("m"))))),
            ),
            |(n, scale)| Token::Spent(n * scale),
        )(i)
    }

    fn points_token(i: &str) -> PResult<'_, Token> {
        map(terminated(number, char('c')), Token::Points)(i)
    }

    fn due_token(i: &str) -> PResult<'_, Token> {
        map(
            preceded(tag("<="), separated_pair(uint, char('/'), uint)),
            |(month, day)| Token::Due { month, day },
        )(i)
    }

    fn start_token(i: &str) -> PResult<'_, Token> {
        map_opt(
            preceded(char('@'), separated_pair(uint, char(':'), uint)),
            |(hour, minute)| NaiveTime::from_hms_opt(hour, minute, 0).map(Token::Start),
        )(i)
    }

}

pub mod format {
    //! Canonical rendering. `format_todo` is the inverse of `parse_todo` for any
    //! canonical line.

    use crate::core::*;
    use chrono::{Datelike, Timelike};

    /// `90m` and up (and exactly `60m`) render as hours, everything else as whole minutes.
    pub fn format_minutes(minutes: f64) -> String {
        if minutes >= 90.0 || minutes == 60.0 {
            format!("{}hr", trim_decimals(format!("{:.2}", minutes / 60.0)))
        } else {
            format!("{}m", minutes.round())
        }
    }

    pub fn format_points(points: f64) -> String {
        format!("{}c", trim_decimals(format!("{:.2}", points)))
    }

    fn trim_decimals(s: String) -> String {
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }

    /// Drop the `##` comment and any whitespace before it.
    pub fn strip_annotations(line: &str) -> &str {
        match line.find(ANNOTATION_MARKER) {
            Some(idx) => line[..idx].trim_end(),
            None => line,
        }
    }

    /// Replace the line's comment with `annotations`, aligned at the annotation column.
    pub fn format_annotations<S: AsRef<str>>(line: &str, annotations: &[S]) -> String {
        let joined = annotations
            .iter()
            .map(|a| a.as_ref())
            .collect::<Vec<&str>>()
            .join(" ");
        format!(
            "{:<width$} {}{}",
            strip_annotations(line),
            ANNOTATION_MARKER,
            joined,
            width = ANNOTATION_COLUMN
        )
    }

    /// Append `field`, separated by a space unless it is the first thing after the marker.
    fn push_field(line: &mut String, field: &str) {
        if line.len() > MARKER_LEN {
            line.push(' ');
        }
        line.push_str(field);
    }

    const MARKER_LEN: usize = 2;

    pub fn format_todo(todo: &Todo) -> String {
        let mut line = String::new();
        match todo.done_on {
            Some(day) => line.push(letter_for_weekday(day)),
            None => line.push(PENDING_MARKER),
        }
        line.push(' ');
        line.push_str(&todo.desc);

        if let Some(minutes) = todo.duration {
            push_field(&mut line, &format_minutes(minutes));
        }
        if let Some(minutes) = todo.spent_minutes {
            push_field(&mut line, &format!("+{}", format_minutes(minutes)));
        }
        if let Some(points) = todo.points {
            push_field(&mut line, &format_points(points));
        }
        if let Some(due) = todo.due_date {
            push_field(&mut line, &format!("<={}/{}", due.month(), due.day()));
        }

        // Done lines carry no annotations.
        if todo.is_done() {
            return line;
        }

        let mut annotations = Vec::new();
        if let Some(start) = todo.start {
            annotations.push(format!("@{}:{:02}", start.hour(), start.minute()));
        }
        if todo.is_elapsed() {
            annotations.push("ELAPSED!".to_string());
        } else if let Some(rate) = todo.completion_rate() {
            annotations.push(format!("{}/d", format_minutes(rate)));
        }
        if let Some(rate) = todo.points_rate() {
            annotations.push(format!("{}/hr", format_points(rate.round())));
        }

        if annotations.is_empty() {
            line
        } else {
            format_annotations(&line, &annotations)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_todo;
        use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};

        fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap()
        }

        fn pad(line: &str, annotations: &str) -> String {
            format!("{:<65} ##{}", line, annotations)
        }

        #[test]
        fn minutes_and_hours() {
            assert_eq!(format_minutes(30.0), "30m");
            assert_eq!(format_minutes(60.0), "1hr");
            assert_eq!(format_minutes(75.0), "75m");
            assert_eq!(format_minutes(89.0), "89m");
            assert_eq!(format_minutes(90.0), "1.5hr");
            assert_eq!(format_minutes(120.0), "2hr");
            assert_eq!(format_minutes(150.0), "2.5hr");
            assert_eq!(format_minutes(100.0), "1.67hr");
            assert_eq!(format_minutes(9.5), "10m");
            assert_eq!(format_minutes(0.0), "0m");
        }

        #[test]
        fn points_drop_trailing_zeros() {
            assert_eq!(format_points(115.0), "115c");
            assert_eq!(format_points(2.5), "2.5c");
        }

        #[test]
        fn strip_is_idempotent() {
            let line = "* task 30m    ##@9:00 6m/d";
            let once = strip_annotations(line);
            assert_eq!(once, "* task 30m");
            assert_eq!(strip_annotations(once), once);
            assert_eq!(strip_annotations("* plain"), "* plain");
        }

        #[test]
        fn annotations_align_at_column() {
            let out = format_annotations("TODOs:   ##old", &["∑: 36m/d"]);
            assert_eq!(out, pad("TODOs:", "∑: 36m/d"));
            assert_eq!(out.find("##"), Some(ANNOTATION_COLUMN + 1));
        }

        #[test]
        fn done_lines_have_no_annotations() {
            let mut todo = Todo::pending("Buy milk");
            todo.done_on = Some(Weekday::Fri);
            todo.duration = Some(20.0);
            todo.start = NaiveTime::from_hms_opt(9, 5, 0);
            assert_eq!(format_todo(&todo), "F Buy milk 20m");
        }

        #[test]
        fn elapsed_replaces_rate() {
            let now = at(2024, 10, 2, 9, 0);
            let todo = parse_todo("* Pay rent 30m <=10/1", now).unwrap();
            assert_eq!(format_todo(&todo), pad("* Pay rent 30m <=10/1", "ELAPSED!"));
            let today = parse_todo("* Pay rent <=10/2", now).unwrap();
            assert_eq!(format_todo(&today), pad("* Pay rent <=10/2", "ELAPSED!"));
        }

        #[test]
        fn canonical_lines_round_trip() {
            let now = at(2024, 10, 2, 9, 0);
            let lines = [
                "* This is a basic TODO".to_string(),
                "M This is a TODO with a duration 30m".to_string(),
                "M This is a TODO with a due date <=12/31".to_string(),
                "S Weekend chores 2.5hr +45m".to_string(),
                "* 30m".to_string(),
                "T +15m".to_string(),
                pad("* 1hr <=10/3", "1hr/d"),
                pad("* Write report 45m +20m <=10/7", "9m/d"),
                pad("* Write report 45m +20m <=10/7", "@8:05 9m/d"),
                pad("* Timed without estimate", "@23:50"),
                pad("* Overdue 1hr <=9/30", "ELAPSED!"),
                pad("* Paid work 2hr 30c", "15c/hr"),
            ];
            for line in &lines {
                let todo = parse_todo(line, now).expect("todo");
                assert_eq!(&format_todo(&todo), line);
            }
        }

        #[test]
        fn long_lines_keep_a_single_space_before_comment() {
            let now = at(2024, 12, 24, 8, 56);
            let line = "* This is a TODO with all bells and whistles 76m +2hr 115c <=12/31 ##@8:56 11m/d 91c/hr";
            let todo = parse_todo(line, now).expect("todo");
            assert_eq!(format_todo(&todo), line);
        }
    }
}

pub mod region {
    //! Region boundary detection and reorganization.
    //!
    //! A region starts at a `TODOs` header and runs over TODO and blank lines.
    //! Reorganizing drops blank lines, keeps unknown lines first, sorts pending
    //! lines by priority and groups done lines by weekday.

    use crate::core::*;
    use crate::format::{format_annotations, format_minutes, format_todo};
    use crate::parser::{is_blank_line, is_header_line, is_todo_line, parse_todo};
    use chrono::NaiveDateTime;
    use std::ops::Range;

    /// Lines of a region sorted into the three groups the organizer works with.
    #[derive(Debug, Default)]
    pub struct Classified<'a> {
        /// Header and any other non-TODO lines, in original order.
        pub unknown: Vec<&'a str>,
        pub pending: Vec<Todo>,
        /// Done lines bucketed Monday..Sunday, raw text in original order.
        pub done: [Vec<&'a str>; 7],
    }

    /// Locate the region containing `cursor`. The range excludes trailing blank lines.
    pub fn find_region<S: AsRef<str>>(lines: &[S], cursor: usize) -> Result<Range<usize>, TodoError> {
        if cursor >= lines.len() {
            return Err(TodoError::LineOutOfRange {
                line: cursor,
                len: lines.len(),
            });
        }

        let mut start = cursor;
        let mut scanned = 0;
        loop {
            let line = lines[start].as_ref();
            if is_header_line(line) {
                break;
            }
            let inside = is_todo_line(line) || is_blank_line(line);
            if !inside || start == 0 || scanned >= MAX_LINES_IN_TODOS {
                return Err(TodoError::NoRegionFound);
            }
            start -= 1;
            scanned += 1;
        }

        let mut end = start + 1;
        while end < lines.len() && end - start <= MAX_LINES_IN_TODOS {
            let line = lines[end].as_ref();
            if !(is_todo_line(line) || is_blank_line(line)) {
                break;
            }
            end += 1;
        }
        while end > start + 1 && is_blank_line(lines[end - 1].as_ref()) {
            end -= 1;
        }

        Ok(start..end)
    }

    pub fn classify<S: AsRef<str>>(lines: &[S], now: NaiveDateTime) -> Classified<'_> {
        let mut out = Classified::default();
        for line in lines {
            let line = line.as_ref();
            if is_blank_line(line) {
                continue;
            }
            match parse_todo(line, now) {
                None => out.unknown.push(line),
                Some(todo) => match todo.done_on {
                    None => out.pending.push(todo),
                    Some(day) => out.done[day.num_days_from_monday() as usize].push(line),
                },
            }
        }
        out
    }

    /// Summary over every pending line: `∑: ELAPSED!` or the summed daily rate.
    pub fn summary(pending: &[Todo]) -> String {
        if pending.iter().any(Todo::is_elapsed) {
            return "∑: ELAPSED!".to_string();
        }
        let total: f64 = pending.iter().filter_map(Todo::completion_rate).sum();
        format!("∑: {}/d", format_minutes(total))
    }

    /// Reorder a region: unknown lines (the first carrying the summary), pending
    /// lines by descending priority, then done lines Monday through Sunday.
    pub fn organize_region<S: AsRef<str>>(lines: &[S], now: NaiveDateTime) -> Vec<String> {
        let Classified {
            unknown,
            mut pending,
            done,
        } = classify(lines, now);

        // Stable, so equal priorities keep their original order.
        pending.sort_by(|a, b| b.priority().total_cmp(&a.priority()));

        let mut out = Vec::with_capacity(lines.len());
        for (idx, line) in unknown.iter().enumerate() {
            if idx == 0 {
                out.push(format_annotations(line, &[summary(&pending)]));
            } else {
                out.push(line.to_string());
            }
        }
        out.extend(pending.iter().map(format_todo));
        out.extend(done.iter().flatten().map(|line| line.to_string()));
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::NaiveDate;

        fn oct(d: u32) -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2024, 10, d)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()
        }

        fn pad(line: &str, annotations: &str) -> String {
            format!("{:<65} ##{}", line, annotations)
        }

        #[test]
        fn finds_region_around_cursor() {
            let doc = [
                "notes", "", "TODOs:", "* a", "", "T b", "", "prose",
            ];
            assert_eq!(find_region(&doc, 3), Ok(2..6));
            assert_eq!(find_region(&doc, 2), Ok(2..6));
            assert_eq!(find_region(&doc, 4), Ok(2..6));
            assert_eq!(find_region(&doc, 7), Err(TodoError::NoRegionFound));
            assert_eq!(find_region(&doc, 1), Err(TodoError::NoRegionFound));
            assert_eq!(
                find_region(&doc, 8),
                Err(TodoError::LineOutOfRange { line: 8, len: 8 })
            );
        }

        #[test]
        fn header_alone_is_a_region() {
            let doc = ["TODOs", "", ""];
            assert_eq!(find_region(&doc, 0), Ok(0..1));
            assert_eq!(find_region(&doc, 2), Ok(0..1));
        }

        #[test]
        fn scenario_sorts_by_rate_with_summary() {
            let lines = ["TODOs:", "* A 60m <=10/7", "* B 120m <=10/7"];
            let out = organize_region(&lines, oct(2));
            assert_eq!(
                out,
                vec![
                    pad("TODOs:", "∑: 36m/d"),
                    pad("* B 2hr <=10/7", "24m/d"),
                    pad("* A 1hr <=10/7", "12m/d"),
                ]
            );
        }

        #[test]
        fn elapsed_first_unrated_last() {
            let lines = [
                "TODOs:",
                "* no estimate",
                "* one 60m <=10/3",
                "* three 180m <=10/3",
                "* late 30m <=10/1",
                "* two 120m <=10/3",
            ];
            let out = organize_region(&lines, oct(2));
            assert_eq!(
                out,
                vec![
                    pad("TODOs:", "∑: ELAPSED!"),
                    pad("* late 30m <=10/1", "ELAPSED!"),
                    pad("* three 3hr <=10/3", "3hr/d"),
                    pad("* two 2hr <=10/3", "2hr/d"),
                    pad("* one 1hr <=10/3", "1hr/d"),
                    "* no estimate".to_string(),
                ]
            );
        }

        #[test]
        fn done_lines_bucket_by_weekday() {
            let lines = [
                "TODOs:",
                "W wednesday",
                "",
                "T tuesday one",
                "* pending",
                "N sunday",
                "T tuesday two  ##kept as is",
                "M monday",
            ];
            let out = organize_region(&lines, oct(2));
            assert_eq!(
                out,
                vec![
                    pad("TODOs:", "∑: 0m/d"),
                    "* pending".to_string(),
                    "M monday".to_string(),
                    "T tuesday one".to_string(),
                    "T tuesday two  ##kept as is".to_string(),
                    "W wednesday".to_string(),
                    "N sunday".to_string(),
                ]
            );
        }

        #[test]
        fn unknown_lines_stay_first_in_order() {
            let lines = ["TODOs:  ##∑: 5m/d", "* task", "stray note"];
            let out = organize_region(&lines, oct(2));
            assert_eq!(
                out,
                vec![
                    pad("TODOs:", "∑: 0m/d"),
                    "stray note".to_string(),
                    "* task".to_string(),
                ]
            );
        }

        #[test]
        fn equal_priorities_keep_input_order() {
            let lines = ["TODOs:", "* z", "* x 60m <=10/7", "* w", "* y 60m <=10/7"];
            let out = organize_region(&lines, oct(2));
            assert_eq!(
                out,
                vec![
                    pad("TODOs:", "∑: 24m/d"),
                    pad("* x 1hr <=10/7", "12m/d"),
                    pad("* y 1hr <=10/7", "12m/d"),
                    "* z".to_string(),
                    "* w".to_string(),
                ]
            );
        }

        #[test]
        fn region_scan_stops_after_limit() {
            let mut doc = vec!["TODOs:".to_string()];
            doc.extend((0..1100).map(|n| format!("* task {n}")));

            assert_eq!(find_region(&doc, 0), Ok(0..MAX_LINES_IN_TODOS + 1));
            assert_eq!(find_region(&doc, 1000), Ok(0..MAX_LINES_IN_TODOS + 1));
            assert_eq!(find_region(&doc, 1001), Err(TodoError::NoRegionFound));
            assert_eq!(find_region(&doc, 1050), Err(TodoError::NoRegionFound));
        }

        #[test]
        fn no_unknown_lines_means_no_summary() {
            let lines = ["* b 30m <=10/3", "* a 60m <=10/3"];
            let out = organize_region(&lines, oct(2));
            assert_eq!(
                out,
                vec![pad("* a 1hr <=10/3", "1hr/d"), pad("* b 30m <=10/3", "30m/d")]
            );
        }
    }
}

pub mod commands {
    //! Single-line and region-wide mutations, plus the `Command` dispatcher the
    //! caller drives with a document, a cursor and `now`.

    use crate::core::*;
    use crate::format::format_todo;
    use crate::parser::{is_pending_todo_line, is_todo_line, parse_todo};
    use crate::region::{find_region, organize_region};
    use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike, Weekday};

    /* ------------------------------ Mark done ------------------------------ */

    /// Toggle a line between pending and done on `today`. Returns the new text and
    /// whether the line is now done. `now` is still needed to recompute the
    /// annotations of a line that goes back to pending.
    pub fn mark_done(
        line: &str,
        today: Weekday,
        now: NaiveDateTime,
    ) -> Result<(String, bool), TodoError> {
        let mut todo = parse_todo(line, now).ok_or(TodoError::NotATodoLine)?;
        let marked = if todo.is_done() {
            todo.done_on = None;
            false
        } else {
            todo.done_on = Some(today);
            true
        };
        Ok((format_todo(&todo), marked))
    }

    /* -------------------------------- Timing -------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Timing {
        pub lines: Vec<String>,
        /// Indexes (into `lines`) of lines that started timing in this call.
        pub started: Vec<usize>,
    }

    fn minutes_of_day(time: NaiveTime) -> i64 {
        i64::from(time.hour()) * 60 + i64::from(time.minute())
    }

    /// Stop every running timer in the region, logging its time as spent, then
    /// start `active` when `starting` and it is a pending TODO line.
    pub fn apply_timing<S: AsRef<str>>(
        lines: &[S],
        now: NaiveDateTime,
        active: Option<usize>,
        starting: bool,
    ) -> Timing {
        let clock = now.time();
        let mut out = Vec::with_capacity(lines.len());
        let mut started = Vec::new();

        for (idx, raw) in lines.iter().enumerate() {
            let raw = raw.as_ref();
            let Some(mut todo) = parse_todo(raw, now) else {
                out.push(raw.to_string());
                continue;
            };

            if let Some(start) = todo.start.take() {
                let elapsed =
                    (minutes_of_day(clock) - minutes_of_day(start)).rem_euclid(MINUTES_PER_DAY);
                todo.spent_minutes = Some(todo.spent_minutes.unwrap_or(0.0) + elapsed as f64);
            }

            if starting && active == Some(idx) && !todo.is_done() {
                todo.start = NaiveTime::from_hms_opt(clock.hour(), clock.minute(), 0);
                started.push(idx);
            }

            out.push(format_todo(&todo));
        }

        Timing {
            lines: out,
            started,
        }
    }

    /* -------------------------------- Archive -------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Archive {
        /// Header and other non-TODO lines plus the done lines; stays in place.
        pub archived: Vec<String>,
        /// Header and other non-TODO lines plus the pending lines; the fresh list.
        pub carried: Vec<String>,
    }

    pub fn archive_region<S: AsRef<str>>(lines: &[S]) -> Archive {
        let mut archived = Vec::new();
        let mut carried = Vec::new();
        for line in lines {
            let line = line.as_ref();
            if !is_todo_line(line) {
                archived.push(line.to_string());
                carried.push(line.to_string());
            } else if is_pending_todo_line(line) {
                carried.push(line.to_string());
            } else {
                archived.push(line.to_string());
            }
        }
        Archive { archived, carried }
    }

    /* ------------------------------- Dispatch ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Command {
        MarkDone,
        Archive,
        StartTiming,
        StopTiming,
        Sort,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Status {
        MarkedDone,
        UnmarkedDone,
        Archived { done: usize },
        TimingStarted,
        TimingStopped,
        Sorted { pending: usize },
    }

    /// The whole document after a command, plus what happened.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Outcome {
        pub lines: Vec<String>,
        pub status: Status,
        /// Document line indexes that began timing.
        pub timing: Vec<usize>,
    }

    /// Run `command` against `document` with the cursor on line `cursor` (0-based).
    ///
    /// Archive places the carried list directly above the archived region,
    /// separated by one blank line.
    pub fn run_command<S: AsRef<str>>(
        command: Command,
        document: &[S],
        cursor: usize,
        now: NaiveDateTime,
    ) -> Result<Outcome, TodoError> {
        let mut lines: Vec<String> = document.iter().map(|l| l.as_ref().to_string()).collect();

        if let Command::MarkDone = command {
            let current = lines.get(cursor).ok_or(TodoError::LineOutOfRange {
                line: cursor,
                len: lines.len(),
            })?;
            let (text, marked) = mark_done(current, now.weekday(), now)?;
            lines[cursor] = text;
            let status = if marked {
                Status::MarkedDone
            } else {
                Status::UnmarkedDone
            };
            return Ok(Outcome {
                lines,
                status,
                timing: vec![],
            });
        }

        let range = find_region(&lines, cursor)?;
        let region = &lines[range.clone()];

        let (replacement, status, timing) = match command {
            Command::Sort => {
                let pending = region.iter().filter(|l| is_pending_todo_line(l)).count();
                (
                    organize_region(region, now),
                    Status::Sorted { pending },
                    vec![],
                )
            }
            Command::Archive => {
                let Archive { archived, carried } = archive_region(region);
                let done = region
                    .iter()
                    .filter(|l| is_todo_line(l) && !is_pending_todo_line(l))
                    .count();
                let mut replacement = carried;
                replacement.push(String::new());
                replacement.extend(archived);
                (replacement, Status::Archived { done }, vec![])
            }
            Command::StartTiming | Command::StopTiming => {
                let starting = command == Command::StartTiming;
                let Timing { lines: timed, started } =
                    apply_timing(region, now, Some(cursor - range.start), starting);
                let status = if starting {
                    Status::TimingStarted
                } else {
                    Status::TimingStopped
                };
                let started = started.into_iter().map(|idx| idx + range.start).collect();
                (timed, status, started)
            }
            Command::MarkDone => unreachable!("handled above"),
        };

        lines.splice(range, replacement);
        Ok(Outcome {
            lines,
            status,
            timing,
        })
    }

}

pub use commands::{Command, Outcome, Status, apply_timing, archive_region, mark_done, run_command};
pub use crate::core::{Todo, TodoError};
pub use format::{format_annotations, format_minutes, format_todo, strip_annotations};
pub use parser::{is_header_line, is_pending_todo_line, is_todo_line, parse_todo};
pub use region::{find_region, organize_region};
