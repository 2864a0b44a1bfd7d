use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Local, NaiveDate};
use unicode_width::UnicodeWidthStr;

use crate::category::Category;
use crate::config::Config;
use crate::identity::Session;
use crate::task::{Priority, Status, Task};
use crate::view::{TaskStats, resolve_visual};

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip_all, fields(count = tasks.len()))]
    pub fn print_task_table(
        &mut self,
        tasks: &[&Task],
        categories: &[Category],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "", "Due", "Pri", "Category", "Title", "Steps"]
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = self.paint(&short_id(task), "33");

            let mut flags = String::new();
            if task.is_pinned {
                flags.push('^');
            }
            if task.is_favorite {
                flags.push('*');
            }
            if task.status == Status::InProgress {
                flags.push('>');
            }

            let due = task.due_date.format("%Y-%m-%d").to_string();
            let due = if task.due_date < today && !task.is_completed() {
                self.paint(&due, "31")
            } else {
                due
            };

            let visual = resolve_visual(task, categories);
            let category = format!("{} [{}]", task.category, visual.icon);

            let steps = if task.sub_tasks.is_empty() {
                String::new()
            } else {
                format!("{}/{}", task.completed_subtasks(), task.sub_tasks.len())
            };

            rows.push(vec![
                id,
                flags,
                due,
                priority_label(task.priority).to_string(),
                category,
                task.title.clone(),
                steps,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(id = %task.id))]
    pub fn print_task_info(&mut self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "status      {:?}", task.status)?;
        writeln!(out, "priority    {}", priority_label(task.priority))?;
        writeln!(out, "category    {}", task.category)?;
        if let Some(description) = &task.description {
            writeln!(out, "description {description}")?;
        }
        writeln!(out, "due         {}", task.due_date.format("%Y-%m-%d"))?;
        if let Some(reminder) = task.reminder_at {
            writeln!(
                out,
                "reminder    {}",
                reminder.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            )?;
        }
        writeln!(out, "recurrence  {:?}", task.recurrence)?;
        writeln!(out, "pinned      {}", task.is_pinned)?;
        writeln!(out, "favorite    {}", task.is_favorite)?;
        for (idx, sub) in task.sub_tasks.iter().enumerate() {
            let mark = if sub.is_completed { "x" } else { " " };
            writeln!(out, "  {}. [{mark}] {}", idx + 1, sub.title)?;
        }
        writeln!(out, "created     {}", task.created_at.to_rfc3339())?;
        writeln!(out, "updated     {}", task.updated_at.to_rfc3339())?;
        Ok(())
    }

    pub fn print_stats(&mut self, stats: &TaskStats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "active      {}", stats.active_total)?;
        writeln!(out, "pending     {}", stats.pending)?;
        writeln!(out, "favorites   {}", stats.favorites)?;
        writeln!(out, "completed   {}", stats.completed)?;
        let bar = progress_bar(stats.percentage, 20);
        writeln!(out, "progress    {} {}%", self.paint(&bar, "32"), stats.percentage)?;
        Ok(())
    }

    pub fn print_categories(&mut self, categories: &[Category], tasks: &[Task]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "Name", "Color", "Icon", "Tasks"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let rows = categories
            .iter()
            .map(|c| {
                let count = tasks.iter().filter(|t| t.category == c.name).count();
                vec![
                    c.id.clone(),
                    c.name.clone(),
                    c.color.clone(),
                    c.icon.clone().unwrap_or_default(),
                    count.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    pub fn print_session(&mut self, session: &Session) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "user        {}", session.username)?;
        writeln!(out, "level       {} ({} xp)", session.level, session.xp)?;
        writeln!(
            out,
            "last login  {}",
            session.last_login.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        )?;
        if let Some(email) = &session.email {
            writeln!(out, "email       {email}")?;
        }
        if let Some(phone) = &session.phone {
            writeln!(out, "phone       {phone}")?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(task: &Task) -> String {
    task.id.to_string().chars().take(SHORT_ID_LEN).collect()
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "L",
        Priority::Medium => "M",
        Priority::High => "H",
        Priority::Urgent => "U",
    }
}

fn progress_bar(percentage: u8, width: usize) -> String {
    let filled = usize::from(percentage.min(100)) * width / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
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
