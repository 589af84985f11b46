use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_storage;
use crate::lifecycle::{DeletionRisk, ToggleEdge, VisibleTask};
use crate::recurrence::Classification;
use crate::task::{Interaction, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    timezone: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, timezone: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, timezone })
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_task_table(&self, tasks: &[VisibleTask]) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        let rows = tasks
            .iter()
            .enumerate()
            .map(|(idx, entry)| self.row(idx + 1, entry))
            .collect();
        write_table(out, table_headers(), rows)
    }

    fn row(&self, position: usize, entry: &VisibleTask) -> Vec<String> {
        let state = match entry.classification {
            Classification::Active => self.paint("todo", "33"),
            Classification::CompletedFresh => self.paint("done", "32"),
            Classification::CompletedStale => self.paint("again", "36"),
        };

        let recurrence = entry.task.recurrence.to_string();
        let tally = if entry.task.recurrence.is_recurring() {
            entry.task.completion_count.to_string()
        } else {
            String::new()
        };
        let resets = entry
            .resets_at
            .map(|at| self.local(at))
            .unwrap_or_default();

        let mut text = entry.task.text.clone();
        if entry.task.interaction == Interaction::Hold {
            text.push_str(" [hold]");
        }
        if entry.task.duration_goal > 0 {
            text.push_str(&format!(" ({}m)", entry.task.duration_goal));
        }

        vec![
            self.paint(&position.to_string(), "33"),
            state,
            recurrence,
            tally,
            resets,
            text,
        ]
    }

    #[tracing::instrument(skip(self, entry), fields(id = %entry.id))]
    pub fn print_task_info(&self, entry: &VisibleTask) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let task = &entry.task;

        writeln!(out, "id           {}", entry.id)?;
        writeln!(out, "uuid         {}", task.uuid)?;
        writeln!(out, "state        {}", classification_label(entry.classification))?;
        writeln!(out, "text         {}", task.text)?;
        writeln!(out, "recurrence   {}", task.recurrence)?;
        writeln!(out, "interaction  {}", task.interaction)?;
        writeln!(out, "goal         {}m", task.duration_goal)?;
        writeln!(out, "tally        {}", task.completion_count)?;
        writeln!(out, "entry        {}", format_storage(task.entry))?;
        writeln!(out, "modified     {}", format_storage(task.modified))?;

        if let Some(done) = task.last_completed_at {
            writeln!(out, "completed    {}", self.local(done))?;
        }
        if let Some(resets) = entry.resets_at {
            writeln!(out, "resets       {}", self.local(resets))?;
        }
        for (key, value) in &task.extra {
            writeln!(out, "{key:<12} {value}")?;
        }

        Ok(())
    }

    pub fn print_toggle(&self, edge: ToggleEdge, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        match edge {
            ToggleEdge::Completed if task.recurrence.is_recurring() => writeln!(
                out,
                "Completed '{}' ({} so far).",
                task.text, task.completion_count
            )?,
            ToggleEdge::Completed => writeln!(out, "Completed '{}'.", task.text)?,
            ToggleEdge::Undone => writeln!(out, "Marked '{}' as not done.", task.text)?,
        }
        Ok(())
    }

    pub fn print_deletion_warning(&self, text: &str, risk: DeletionRisk) -> anyhow::Result<()> {
        if let DeletionRisk::StreakAtRisk { count } = risk {
            let mut err = io::stderr().lock();
            writeln!(
                err,
                "'{text}' has been completed {count} times; deleting it loses that history.",
            )?;
            writeln!(err, "Re-run with --confirm to delete anyway.")?;
        }
        Ok(())
    }

    fn local(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn table_headers() -> Vec<String> {
    ["#", "State", "Recur", "Tally", "Resets", "Text"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn classification_label(classification: Classification) -> &'static str {
    match classification {
        Classification::Active => "active",
        Classification::CompletedFresh => "completed",
        Classification::CompletedStale => "active (new cycle)",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{strip_ansi, write_table};

    #[test]
    fn table_pads_by_visible_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["#".into(), "Text".into()],
            vec![
                vec!["\x1b[33m1\x1b[0m".into(), "Meditate".into()],
                vec!["12".into(), "早起き".into()],
            ],
        )
        .expect("write table");

        let rendered = strip_ansi(&String::from_utf8(buf).expect("utf8"));
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "#  Text     ");
        assert_eq!(lines[1], "-- -------- ");
        assert_eq!(lines[2], "1  Meditate ");
        assert_eq!(lines[3], "12 早起き   ");
    }
}
