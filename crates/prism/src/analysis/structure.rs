//! Type-specific structuring of extracted rows.
//!
//! Every function here is pure: the same table and document type always
//! produce the same buckets, so a retried job recomputes identical totals.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::extractor::{CellValue, Table};
use crate::model::DocumentType;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredData {
    Financial(FinancialSummary),
    RentRoll(RentRollSummary),
    Lease(LeaseSummary),
    Maintenance(MaintenanceSummary),
    Passthrough(PassthroughSummary),
}

impl StructuredData {
    /// Revenue usable as a base for percentage estimates.
    pub fn revenue_base(&self) -> Option<f64> {
        match self {
            StructuredData::Financial(f) if f.total_revenue > 0.0 => Some(f.total_revenue),
            StructuredData::RentRoll(r) if r.total_rent > 0.0 => Some(r.total_rent * 12.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    pub total_revenue: f64,
    pub total_expenses: f64,
    /// Net operating income: revenue minus expenses.
    pub noi: f64,
    pub revenue: Vec<LineItem>,
    pub expenses: Vec<LineItem>,
    /// Columns summed into each line's amount.
    pub amount_columns: Vec<String>,
    pub uncategorized_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RentRollSummary {
    pub total_units: usize,
    pub occupied: usize,
    pub vacant: usize,
    /// `occupied / total_units`, 0 for an empty roll.
    pub occupancy_rate: f64,
    /// Scheduled rent of occupied units.
    pub total_rent: f64,
    pub average_rent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaseTerm {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSummary {
    pub dates: Vec<LeaseTerm>,
    pub financial_terms: Vec<LeaseTerm>,
    pub other_clauses: Vec<LeaseTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    pub total_orders: usize,
    pub open: usize,
    pub closed: usize,
    pub total_cost: f64,
    /// `closed / total_orders`, 0 when there are no orders.
    pub completion_rate: f64,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassthroughSummary {
    pub row_count: usize,
    pub columns: Vec<String>,
    pub text_chars: usize,
}

pub fn structure(table: &Table, text: Option<&str>, document_type: DocumentType) -> StructuredData {
    match document_type {
        DocumentType::Financial => StructuredData::Financial(financial(table)),
        DocumentType::RentRoll => StructuredData::RentRoll(rent_roll(table)),
        DocumentType::Lease => StructuredData::Lease(lease(table, text)),
        DocumentType::Maintenance => StructuredData::Maintenance(maintenance(table)),
        DocumentType::Other => StructuredData::Passthrough(PassthroughSummary {
            row_count: table.rows.len(),
            columns: table.headers.clone(),
            text_chars: text.map(|t| t.chars().count()).unwrap_or(0),
        }),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn is_account_header(h: &str) -> bool {
    h.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| matches!(word, "account" | "acct" | "code" | "gl"))
}

fn is_numeric_column(table: &Table, idx: usize) -> bool {
    let (numbers, filled) = table.rows.iter().fold((0usize, 0usize), |(n, f), row| {
        match &row[idx] {
            c if c.is_empty() => (n, f),
            CellValue::Number(_) => (n + 1, f + 1),
            _ => (n, f + 1),
        }
    });
    filled > 0 && numbers * 2 > filled
}

enum Bucket {
    Revenue,
    Expense,
}

/// Chart-of-accounts convention: 4xxx income, 5xxx-9xxx expense.
fn bucket_for_account(account: &str) -> Option<Bucket> {
    let digits: String = account.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 3 {
        return None;
    }
    match digits.chars().next() {
        Some('4') => Some(Bucket::Revenue),
        Some('5'..='9') => Some(Bucket::Expense),
        _ => None,
    }
}

fn bucket_for_label(label: &str) -> Option<Bucket> {
    let label = label.to_lowercase();
    if contains_any(&label, &["income", "revenue"]) {
        Some(Bucket::Revenue)
    } else if contains_any(
        &label,
        &[
            "expense", "repair", "maintenance", "utilit", "tax", "insurance", "payroll",
            "salar", "management", "cost", "supplies", "legal", "marketing", "landscap",
        ],
    ) {
        Some(Bucket::Expense)
    } else if contains_any(&label, &["rent", "fee", "reimburse", "parking", "laundry"]) {
        Some(Bucket::Revenue)
    } else {
        None
    }
}

fn financial(table: &Table) -> FinancialSummary {
    let mut summary = FinancialSummary::default();
    if table.is_empty() {
        return summary;
    }

    let account_col = table.column_index(is_account_header);
    let label_col = table
        .column_index(|h| {
            contains_any(h, &["description", "name", "item", "category", "line"]) && !is_account_header(h)
        })
        .or_else(|| {
            (0..table.width()).find(|&i| Some(i) != account_col && !is_numeric_column(table, i))
        });

    let excluded = |i: usize| Some(i) == account_col || Some(i) == label_col;
    let amount_cols: Vec<usize> = match table
        .column_index(|h| contains_any(h, &["total", "amount", "balance", "actual"]))
        .filter(|&i| !excluded(i))
    {
        Some(total) => vec![total],
        None => (0..table.width())
            .filter(|&i| !excluded(i) && is_numeric_column(table, i))
            .collect(),
    };
    summary.amount_columns = amount_cols.iter().map(|&i| table.headers[i].clone()).collect();

    for row in &table.rows {
        let label = label_col.map(|i| row[i].as_text()).unwrap_or_default();
        let account = account_col
            .map(|i| row[i].as_text())
            .filter(|a| !a.trim().is_empty());

        if label.to_lowercase().contains("total") {
            continue;
        }

        let amounts: Vec<f64> = amount_cols.iter().filter_map(|&i| row[i].as_number()).collect();
        if amounts.is_empty() {
            continue;
        }
        let amount: f64 = amounts.iter().sum();

        let bucket = account
            .as_deref()
            .and_then(bucket_for_account)
            .or_else(|| bucket_for_label(&label));

        let item = LineItem {
            label,
            account,
            amount,
        };
        match bucket {
            Some(Bucket::Revenue) => {
                summary.total_revenue += amount;
                summary.revenue.push(item);
            }
            Some(Bucket::Expense) => {
                summary.total_expenses += amount.abs();
                summary.expenses.push(item);
            }
            None => summary.uncategorized_rows += 1,
        }
    }

    summary.noi = summary.total_revenue - summary.total_expenses;
    summary
}

fn is_vacant_text(value: &str) -> bool {
    let value = value.to_lowercase();
    contains_any(&value, &["vacant", "vacancy", "available", "empty", "unoccupied"])
}

fn rent_roll(table: &Table) -> RentRollSummary {
    let mut summary = RentRollSummary::default();
    let status_col = table.column_index(|h| contains_any(h, &["status", "occupancy", "vacan"]));
    let tenant_col = table.column_index(|h| contains_any(h, &["tenant", "resident", "lessee", "occupant"]));
    let rent_col = table
        .column_index(|h| h.contains("rent") && !contains_any(h, &["status", "date", "roll"]))
        .or_else(|| table.column_index(|h| h.contains("amount")));

    for row in &table.rows {
        let vacant = match (status_col, tenant_col) {
            (Some(i), _) => is_vacant_text(&row[i].as_text()),
            (None, Some(i)) => row[i].is_empty() || is_vacant_text(&row[i].as_text()),
            (None, None) => false,
        };
        summary.total_units += 1;
        if vacant {
            summary.vacant += 1;
        } else {
            summary.occupied += 1;
            if let Some(rent) = rent_col.and_then(|i| row[i].as_number()) {
                summary.total_rent += rent;
            }
        }
    }

    if summary.total_units > 0 {
        summary.occupancy_rate = summary.occupied as f64 / summary.total_units as f64;
    }
    if summary.occupied > 0 {
        summary.average_rent = summary.total_rent / summary.occupied as f64;
    }
    summary
}

fn lease(table: &Table, text: Option<&str>) -> LeaseSummary {
    let mut terms: Vec<LeaseTerm> = Vec::new();

    if table.width() >= 2 && table.headers.first().map(String::as_str) != Some("line") {
        for row in &table.rows {
            terms.push(LeaseTerm {
                label: row[0].as_text(),
                value: row[1..]
                    .iter()
                    .filter(|c| !c.is_empty())
                    .map(CellValue::as_text)
                    .collect::<Vec<_>>()
                    .join(" "),
            });
        }
    } else if let Some(text) = text {
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let term = match line.split_once(':') {
                Some((label, value)) => LeaseTerm {
                    label: label.trim().to_string(),
                    value: value.trim().to_string(),
                },
                None => LeaseTerm {
                    label: "clause".to_string(),
                    value: line.to_string(),
                },
            };
            terms.push(term);
        }
    }

    let mut summary = LeaseSummary::default();
    for term in terms {
        let haystack = format!("{} {}", term.label, term.value).to_lowercase();
        if contains_any(
            &haystack,
            &["date", "commence", "expir", "term", "renewal", "notice", "option to"],
        ) {
            summary.dates.push(term);
        } else if haystack.contains('$')
            || contains_any(
                &haystack,
                &["rent", "deposit", "fee", "escalat", "cam", "payment", "increase"],
            )
        {
            summary.financial_terms.push(term);
        } else {
            summary.other_clauses.push(term);
        }
    }
    summary
}

fn is_closed_text(value: &str) -> bool {
    let value = value.to_lowercase();
    contains_any(&value, &["complete", "closed", "done", "resolved", "finished"])
}

fn maintenance(table: &Table) -> MaintenanceSummary {
    let mut summary = MaintenanceSummary::default();
    let status_col = table.column_index(|h| h.contains("status") || h.contains("state"));
    let completed_col = table.column_index(|h| contains_any(h, &["completed", "closed date", "date closed"]));
    let cost_col = table.column_index(|h| contains_any(h, &["cost", "amount", "total", "price", "invoice"]));
    let category_col = table.column_index(|h| contains_any(h, &["category", "type", "trade"]));

    for row in &table.rows {
        summary.total_orders += 1;
        let closed = match (status_col, completed_col) {
            (Some(i), _) => is_closed_text(&row[i].as_text()),
            (None, Some(i)) => !row[i].is_empty(),
            (None, None) => false,
        };
        if closed {
            summary.closed += 1;
        } else {
            summary.open += 1;
        }
        if let Some(cost) = cost_col.and_then(|i| row[i].as_number()) {
            summary.total_cost += cost.abs();
        }
        if let Some(i) = category_col {
            let category = row[i].as_text().trim().to_lowercase();
            let key = if category.is_empty() { "uncategorized".to_string() } else { category };
            *summary.by_category.entry(key).or_insert(0) += 1;
        }
    }

    if summary.total_orders > 0 {
        summary.completion_rate = summary.closed as f64 / summary.total_orders as f64;
    }
    summary
}
