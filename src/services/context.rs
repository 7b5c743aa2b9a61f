//! Prompt assembly for the question-answering call.
//!
//! The dataset summary is bounded: at most [`PREVIEW_ROWS`] sample rows,
//! [`TOP_VALUES`] values per non-numeric column and [`HISTORY_TURNS`] prior turns.

use crate::error::AppError;
use crate::models::{ChatTurn, TOP_VALUES};
use crate::services::stats::{self, round2, PREVIEW_ROWS};
use crate::services::table::{format_number, Column, Table};

pub const HISTORY_TURNS: usize = 6;

/// A system prompt plus the user/assistant turns to send after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub turns: Vec<ChatTurn>,
}

pub fn build_context(table: &Table, question: &str, history: &[ChatTurn]) -> Result<Prompt, AppError> {
    let system = render_system_prompt(table)?;

    let skip = history.len().saturating_sub(HISTORY_TURNS);
    let mut turns: Vec<ChatTurn> = history[skip..].to_vec();
    turns.push(ChatTurn::user(question));

    Ok(Prompt { system, turns })
}

pub fn render_system_prompt(table: &Table) -> Result<String, AppError> {
    let column_details = table
        .columns()
        .iter()
        .map(column_line)
        .collect::<Vec<_>>()
        .join("\n");
    let sample = serde_json::to_string_pretty(&table.head(PREVIEW_ROWS))?;
    let columns = serde_json::to_string(&table.column_names())?;

    Ok(format!(
        "You are a data analyst assistant. The user has uploaded a CSV dataset and is asking questions about it.

Dataset info:
- Rows: {rows}
- Columns: {columns}

Column details:
{column_details}

Sample rows:
{sample}

Answer the user's question based on this data. Be concise and specific.
Use actual numbers from the data. If asked for comparisons or rankings, give exact values.
Format numbers nicely (e.g. $1,234.56 for currency, commas for large numbers).
Keep answers to 2-4 sentences unless a list is clearly better.",
        rows = table.row_count(),
    ))
}

fn column_line(column: &Column) -> String {
    match column.numeric_values() {
        Some(values) => match stats::numeric_summary(values) {
            Some(summary) => {
                let integral = column.is_integral();
                format!(
                    "- {} (numeric): min={}, max={}, mean={}, sum={}",
                    column.name(),
                    format_number(summary.min, integral),
                    format_number(summary.max, integral),
                    format_number(round2(summary.mean), false),
                    format_number(round2(summary.sum), false),
                )
            }
            None => format!("- {} (numeric): no values", column.name()),
        },
        None => {
            let counts = stats::value_counts(column);
            let top = counts
                .iter()
                .take(TOP_VALUES)
                .map(|v| format!("{}: {}", quote(&v.value), v.count))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "- {} ({}): {} unique values, top: {{{}}}",
                column.name(),
                column.column_type(),
                counts.len(),
                top
            )
        }
    }
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TurnRole;
    use crate::services::csv_ingest::parse_csv;

    fn sales() -> Table {
        parse_csv(
            b"date,product,revenue\n\
              2024-01-01,apple,10\n\
              2024-01-01,pear,\n\
              2024-01-02,apple,5\n\
              2024-01-03,fig,2\n\
              2024-01-04,kiwi,1\n\
              2024-01-05,plum,3\n\
              2024-01-06,lime,4\n",
        )
        .unwrap()
    }

    fn history(n: usize) -> Vec<ChatTurn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatTurn::user(format!("q{}", i))
                } else {
                    ChatTurn::assistant(format!("a{}", i))
                }
            })
            .collect()
    }

    #[test]
    fn keeps_only_the_six_most_recent_turns() {
        let prompt = build_context(&sales(), "what now?", &history(10)).unwrap();

        let contents: Vec<&str> = prompt.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q4", "a5", "q6", "a7", "q8", "a9", "what now?"]);
        assert_eq!(prompt.turns.last().unwrap().role, TurnRole::User);
    }

    #[test]
    fn short_history_is_kept_whole() {
        let prompt = build_context(&sales(), "hi", &history(2)).unwrap();
        assert_eq!(prompt.turns.len(), 3);

        let prompt = build_context(&sales(), "hi", &[]).unwrap();
        assert_eq!(prompt.turns, vec![ChatTurn::user("hi")]);
    }

    #[test]
    fn summary_describes_every_column() {
        let system = render_system_prompt(&sales()).unwrap();

        assert!(system.contains("- Rows: 7"));
        assert!(system.contains(r#"- Columns: ["date","product","revenue"]"#));
        assert!(system.contains("- revenue (numeric): min=1, max=10, mean=4.17, sum=25.0"));
        assert!(system.contains(
            r#"- product (categorical): 6 unique values, top: {"apple": 2, "pear": 1, "fig": 1, "kiwi": 1, "plum": 1}"#
        ));
        assert!(system.contains("- date (datetime): 6 unique values"));
    }

    #[test]
    fn sample_rows_are_bounded_and_nulls_are_blank() {
        let system = render_system_prompt(&sales()).unwrap();

        assert!(system.contains(r#""revenue": """#));
        assert!(system.contains(r#""product": "kiwi""#));
        assert!(!system.contains(r#""product": "plum""#));
    }

    #[test]
    fn categorical_summary_ignores_nulls() {
        let table = parse_csv(b"region\neast\n\nNA\neast\nwest\n").unwrap();
        let system = render_system_prompt(&table).unwrap();

        assert!(system.contains(r#"- region (categorical): 2 unique values, top: {"east": 2, "west": 1}"#));
    }
}
