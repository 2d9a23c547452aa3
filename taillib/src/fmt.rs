//! Rendering of job output: per-job colors and the runner's line decorations.

use crate::actors::manager::WORKFLOW;
use crate::events::OutputItem;
use crate::types::JobName;
use crossterm::style::{Color, Stylize};
use std::collections::HashMap;

const WHEEL: [Color; 5] = [
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
];
const WORKFLOW_COLOR: Color = Color::White;
const WIDTH: usize = 80;
// group header decoration around the title: "⎯⎯  " and "  "
const GROUP_DECORATION: usize = 6;

const COMMAND: &str = "[command]";
const GROUP: &str = "##[group]";
const ENDGROUP: &str = "##[endgroup]";
const ERROR: &str = "##[error]";
const CONCLUSION: &str = "##[conclusion]";

/// Hands out colors round-robin, one per job name.
#[derive(Debug, Default)]
pub struct Palette {
    assigned: HashMap<JobName, Color>,
    next: usize,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_for(&mut self, job_name: &str) -> Color {
        if job_name == WORKFLOW {
            return WORKFLOW_COLOR;
        }
        if let Some(color) = self.assigned.get(job_name) {
            return *color;
        }
        let color = WHEEL[self.next];
        self.next = (self.next + 1) % WHEEL.len();
        self.assigned.insert(job_name.to_string(), color);
        color
    }
}

fn separator(job_name: &str, shorten_by: usize) -> String {
    let prefix = format!("remote: [{}]: ", job_name).chars().count();
    "⎯".repeat(WIDTH.saturating_sub(prefix + shorten_by))
}

/// Expand one raw log line into the lines to print, without the job prefix.
pub fn decorate_line(line: &str, job_name: &str, color: Color) -> Vec<String> {
    if line.is_empty() {
        return vec![String::new()];
    }
    if let Some(command) = line.strip_prefix(COMMAND) {
        return vec![format!("$ {}", command).with(Color::White).to_string()];
    }
    if let Some(title) = line.strip_prefix(GROUP) {
        let sep = separator(job_name, title.chars().count() + GROUP_DECORATION);
        return vec![
            String::new(),
            format!(
                "{}  {}  {}",
                "⎯⎯".with(color),
                title.with(color).bold(),
                sep.with(color)
            ),
        ];
    }
    if line.starts_with(ENDGROUP) {
        return vec![separator(job_name, 0).with(color).to_string(), String::new()];
    }
    if let Some(message) = line.strip_prefix(ERROR) {
        return vec![
            String::new(),
            format!("Error: {}", message).with(Color::Red).bold().to_string(),
            String::new(),
        ];
    }
    if let Some(conclusion) = line.strip_prefix(CONCLUSION) {
        let conclusion = conclusion.to_lowercase();
        let verdict = match conclusion.as_str() {
            "success" => Color::DarkGreen,
            "failure" => Color::DarkRed,
            _ => Color::DarkYellow,
        };
        return vec![
            String::new(),
            format!("Conclusion: {}", conclusion.to_uppercase())
                .with(verdict)
                .bold()
                .to_string(),
            String::new(),
        ];
    }
    vec![line.with(color).to_string()]
}

/// Collapse runs of empty lines into a single one.
pub fn remove_consecutive_empty(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.is_empty() && out.last().map_or(false, String::is_empty) {
            continue;
        }
        out.push(line);
    }
    out
}

/// Every printable line of `item`, prefixed with its colored job name.
pub fn render(item: &OutputItem, color: Color) -> Vec<String> {
    let prefix = format!("[{}]:", item.job_name).with(color).to_string();
    let lines = item
        .lines
        .iter()
        .flat_map(|line| decorate_line(line, &item.job_name, color))
        .collect();
    remove_consecutive_empty(lines)
        .into_iter()
        .map(|line| format!("{} {}", prefix, line))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use regex::Regex;

    pub fn strip_ansi(text: &str) -> String {
        Regex::new(r"\x1b\[[0-9;]*m")
            .unwrap()
            .replace_all(text, "")
            .into_owned()
    }

    fn plain(job: &str, lines: &[&str]) -> Vec<String> {
        let item = OutputItem::new(job, lines.iter().map(|l| l.to_string()).collect());
        render(&item, Color::Green)
            .iter()
            .map(|line| strip_ansi(line))
            .collect()
    }

    #[test]
    fn palette_wraps_around() {
        let mut palette = Palette::new();
        let colors: Vec<_> = ["a", "b", "c", "d", "e", "f", "a"]
            .iter()
            .map(|job| palette.color_for(job))
            .collect();
        assert_eq!(&colors[..5], &WHEEL[..]);
        assert_eq!(colors[5], WHEEL[0]);
        assert_eq!(colors[6], WHEEL[0]);
        assert_eq!(palette.color_for(WORKFLOW), Color::White);
        // the workflow doesn't use up a slot
        assert_eq!(palette.color_for("g"), WHEEL[1]);
    }

    #[test]
    fn plain_lines_get_prefixed() {
        assert_eq!(
            plain("build", &["hello", "", "", "", "world"]),
            vec!["[build]: hello", "[build]: ", "[build]: world"]
        );
    }

    #[test]
    fn groups() {
        let lines = plain("build", &["##[group]Run tests", "ok", "##[endgroup]"]);
        // 80 - len("remote: [build]: ") - len("Run tests") - 6
        let open = format!("[build]: ⎯⎯  Run tests  {}", "⎯".repeat(48));
        let close = format!("[build]: {}", "⎯".repeat(63));
        assert_eq!(
            lines,
            vec![
                "[build]: ".to_string(),
                open,
                "[build]: ok".to_string(),
                close,
                "[build]: ".to_string(),
            ]
        );
    }

    #[test]
    fn long_group_titles_do_not_underflow() {
        let title = "x".repeat(200);
        let lines = plain("build", &[&format!("##[group]{}", title)]);
        assert_eq!(lines[1], format!("[build]: ⎯⎯  {}  ", title));
    }

    #[test]
    fn commands_errors_and_conclusions() {
        assert_eq!(
            plain("j", &["[command]/bin/true", "##[error]boom", "##[conclusion]Success"]),
            vec![
                "[j]: $ /bin/true",
                "[j]: ",
                "[j]: Error: boom",
                "[j]: ",
                "[j]: Conclusion: SUCCESS",
                "[j]: ",
            ]
        );
    }

    #[test]
    fn collapses_empty_runs() {
        let lines = vec!["", "", "a", "", "", "", "b", ""]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            remove_consecutive_empty(lines),
            vec!["", "a", "", "b", ""]
        );
    }
}
