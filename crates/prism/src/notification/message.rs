//! Plain-text e-mail rendering.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::model::{Classification, Insight, Report, Role, Task};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

impl EmailMessage {
    pub fn new(subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: Vec::new(),
            subject: subject.into(),
            text: text.into(),
        }
    }

    pub fn addressed_to(mut self, to: Vec<String>) -> Self {
        self.to = to;
        self
    }
}

/// An attachment (or a whole e-mail) turned away at intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub reason: String,
}

impl Rejection {
    pub fn new(file_name: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.map(str::to_string),
            reason: reason.into(),
        }
    }
}

fn write_task(out: &mut String, task: &Task) {
    let _ = writeln!(out, "- [P{}] {}", task.priority, task.title);
    let _ = writeln!(
        out,
        "  Due {} | ~{:.1}h | potential value ${:.2}",
        task.due_date, task.estimated_hours, task.potential_value
    );
    if !task.description.is_empty() && task.description != task.title {
        let _ = writeln!(out, "  {}", task.description);
    }
}

fn write_header(out: &mut String, report: &Report, classification: Option<&Classification>) {
    let _ = writeln!(out, "Document: {}", report.filename);
    if let Some(c) = classification {
        let _ = writeln!(out, "Type: {} (confidence {:.0}%)", c.document_type, c.confidence * 100.0);
        if let Some(property) = &c.property_name {
            let _ = writeln!(out, "Property: {}", property);
        }
        if let Some(period) = &c.report_period {
            let _ = writeln!(out, "Period: {}", period);
        }
    }
    out.push('\n');
}

/// Tasks assigned to one role for a processed report.
pub fn role_summary(
    role: Role,
    report: &Report,
    classification: Option<&Classification>,
    insight: &Insight,
    tasks: &[Task],
) -> EmailMessage {
    let mut text = String::new();
    let _ = writeln!(text, "Hello {} team,\n", role.display_name());
    write_header(&mut text, report, classification);
    let _ = writeln!(text, "Summary:\n{}\n", insight.summary);

    if tasks.is_empty() {
        text.push_str("No tasks were assigned to your team for this document.\n");
    } else {
        let _ = writeln!(text, "Your tasks ({}):", tasks.len());
        for task in tasks {
            write_task(&mut text, task);
        }
    }

    let subject = format!(
        "[Prism] {} task(s) for {}: {}",
        tasks.len(),
        role.display_name(),
        report.filename
    );
    EmailMessage::new(subject, text)
}

/// Receipt for the sender of an e-mailed report.
pub fn confirmation(
    report: &Report,
    classification: Option<&Classification>,
    insight: &Insight,
    task_count: usize,
) -> EmailMessage {
    let mut text = String::new();
    text.push_str("Your report has been processed.\n\n");
    write_header(&mut text, report, classification);
    let _ = writeln!(text, "Summary:\n{}\n", insight.summary);
    let _ = writeln!(text, "{} follow-up task(s) were created for your team.", task_count);
    let _ = writeln!(text, "\nReference: {}", report.id);

    EmailMessage::new(format!("Report processed: {}", report.filename), text)
}

/// Terminal failure notice for the sender.
pub fn failure_notice(report: &Report) -> EmailMessage {
    let mut text = String::new();
    let _ = writeln!(text, "We could not process {}.\n", report.filename);
    if let Some(error) = &report.error_message {
        let _ = writeln!(text, "Reason: {}\n", error);
    }
    text.push_str(
        "The file has been set aside for manual review. You can also check that it \
         opens correctly and send it again as CSV, XLSX or TXT.\n",
    );
    let _ = writeln!(text, "\nReference: {}", report.id);

    EmailMessage::new(format!("Could not process: {}", report.filename), text)
}

/// Reply to an inbound e-mail whose attachments were not accepted.
pub fn rejection(original_subject: Option<&str>, rejections: &[Rejection], accepted: usize) -> EmailMessage {
    let mut text = String::new();
    if accepted > 0 {
        let _ = writeln!(
            text,
            "{} attachment(s) were accepted, but some could not be processed:\n",
            accepted
        );
    } else {
        text.push_str("We could not accept your e-mail for processing:\n\n");
    }
    for r in rejections {
        match &r.file_name {
            Some(name) => {
                let _ = writeln!(text, "- {}: {}", name, r.reason);
            }
            None => {
                let _ = writeln!(text, "- {}", r.reason);
            }
        }
    }
    text.push_str("\nSupported files are CSV, XLSX, XLS, TXT and PDF.\n");

    let subject = match original_subject.filter(|s| !s.trim().is_empty()) {
        Some(s) => format!("Re: {}", s.trim()),
        None => "Your report could not be processed".to_string(),
    };
    EmailMessage::new(subject, text)
}
