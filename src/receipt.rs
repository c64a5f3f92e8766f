//! Receipt
//!
//! Terminal rendering of an optimisation result: one row per application step, then a
//! summary of what the plan saves.

use std::{fmt::Write, io};

use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;
use tabled::{
    builder::Builder,
    grid::config::HorizontalLine,
    settings::{
        Alignment, Color, Style, Theme,
        object::{Columns, Rows},
    },
};
use thiserror::Error;

use crate::{
    engine::OptimizationResult,
    offers::OfferKey,
    sequence::ApplicationStep,
};

/// Errors that can occur when rendering a receipt.
#[derive(Debug, Error)]
pub enum ReceiptError {
    /// A step refers to an offer missing from the result.
    #[error("Missing offer")]
    MissingOffer(OfferKey),

    /// IO error
    #[error("IO error")]
    IO,
}

/// Printable plan for an [`OptimizationResult`].
#[derive(Debug, Clone, Copy)]
pub struct PlanReceipt<'r, 'a> {
    result: &'r OptimizationResult<'a>,
}

impl<'r, 'a> PlanReceipt<'r, 'a> {
    /// Wrap a result for rendering.
    pub fn new(result: &'r OptimizationResult<'a>) -> Self {
        Self { result }
    }

    /// The wrapped result.
    pub fn result(&self) -> &'r OptimizationResult<'a> {
        self.result
    }

    /// Write the step table, summary and notes to `out`.
    ///
    /// # Errors
    ///
    /// Returns a [`ReceiptError`] if a step's offer is missing or writing fails.
    pub fn write_to(&self, mut out: impl io::Write) -> Result<(), ReceiptError> {
        let mut builder = Builder::default();
        let mut color_ops: SmallVec<[(usize, usize, Color); 16]> = SmallVec::new();

        builder.push_record(["", "Offer", "Action", "Savings", "Price", "Check"]);

        let running_prices = self.result.breakdown.steps.iter().map(|step| step.price_after);

        for (row, (step, price)) in self
            .result
            .application_sequence
            .steps
            .iter()
            .zip(running_prices)
            .enumerate()
        {
            self.push_step(&mut builder, step, price)?;

            let row = row + 1; // header is row 0

            if step.skipped {
                color_ops.push((row, 3, color_dark_grey()));
            } else if step.expected_savings.to_minor_units() > 0 {
                color_ops.push((row, 3, Color::FG_GREEN));
            }

            color_ops.push((row, 5, color_dark_grey()));
        }

        write_step_table(&mut out, builder, color_ops)?;
        write_summary(&mut out, self.result)?;
        write_notes(&mut out, self.result)
    }

    fn push_step(
        &self,
        builder: &mut Builder,
        step: &ApplicationStep<'_>,
        price: Money<'_, Currency>,
    ) -> Result<(), ReceiptError> {
        let offer = self
            .result
            .offers
            .get(step.offer)
            .ok_or(ReceiptError::MissingOffer(step.offer))?;

        let savings = if step.skipped {
            "skipped".to_string()
        } else if offer.kind.reduces_price() || step.expected_savings.to_minor_units() == 0 {
            format!("-{}", step.expected_savings)
        } else {
            format!("({}) {}", offer.kind, step.expected_savings)
        };

        builder.push_record([
            format!("#{:<2}", step.position),
            step.offer_id.clone(),
            step.action.to_string(),
            savings,
            format!("{price}"),
            step.verification.to_string(),
        ]);

        Ok(())
    }
}

fn write_step_table(
    out: &mut impl io::Write,
    builder: Builder,
    color_ops: SmallVec<[(usize, usize, Color); 16]>,
) -> Result<(), ReceiptError> {
    let mut table = builder.build();
    let mut theme = Theme::from(Style::modern_rounded());

    theme.remove_horizontal_lines();
    theme.insert_horizontal_line(
        1,
        HorizontalLine::new(Some('─'), Some('┼'), Some('├'), Some('┤')),
    );

    table.with(theme);
    table.modify(Rows::first(), Color::BOLD);
    table.modify(Columns::new(3..5), Alignment::right());

    for (row, col, color) in color_ops {
        table.modify((row, col), color);
    }

    let table_str = colorize_borders(&table.to_string());

    writeln!(out, "\n{table_str}").map_err(|_err| ReceiptError::IO)
}

fn write_summary(
    out: &mut impl io::Write,
    result: &OptimizationResult<'_>,
) -> Result<(), ReceiptError> {
    let breakdown = &result.breakdown;
    let seconds = result.application_sequence.estimated_seconds();

    let lines = [
        (" Base price:".to_string(), format!("{}  ", breakdown.base_price)),
        (
            " \x1b[1mFinal price:\x1b[0m".to_string(),
            format!("\x1b[1m{}\x1b[0m  ", breakdown.final_price),
        ),
        (
            " Savings:".to_string(),
            format!(
                "({:.2}%) {}  ",
                breakdown.effective_discount_percent.round_dp(2),
                breakdown.immediate_savings
            ),
        ),
        (" Cashback:".to_string(), format!("{}  ", breakdown.deferred_credit)),
        (" Time:".to_string(), format!("~{seconds}s  ")),
    ];

    let label_width = lines
        .iter()
        .map(|(label, _)| visible_width(label))
        .max()
        .unwrap_or_default();

    let value_width = lines
        .iter()
        .map(|(_, value)| visible_width(value))
        .max()
        .unwrap_or_default();

    for (label, value) in &lines {
        let label_pad = label_width.saturating_sub(visible_width(label));
        let value_pad = value_width.saturating_sub(visible_width(value));

        writeln!(
            out,
            "{:>label_pad$}{label}  {}{value}",
            "",
            " ".repeat(value_pad)
        )
        .map_err(|_err| ReceiptError::IO)?;
    }

    writeln!(out).map_err(|_err| ReceiptError::IO)
}

fn write_notes(
    out: &mut impl io::Write,
    result: &OptimizationResult<'_>,
) -> Result<(), ReceiptError> {
    let risks = &result.application_sequence.risk_factors;

    if result.warnings.is_empty() && risks.is_empty() && result.dropped.is_empty() {
        return Ok(());
    }

    writeln!(out, " \x1b[1mNotes ({}):\x1b[0m", result.outcome).map_err(|_err| ReceiptError::IO)?;

    for warning in &result.warnings {
        writeln!(out, "  ! {warning}").map_err(|_err| ReceiptError::IO)?;
    }

    for risk in risks {
        let offer_id = result
            .offers
            .get(risk.offer())
            .map_or("<unknown>", |offer| offer.id.as_str());

        writeln!(out, "  ? {offer_id}: {risk}").map_err(|_err| ReceiptError::IO)?;
    }

    for dropped in &result.dropped {
        writeln!(out, "  - {}: {}", dropped.identifier, dropped.reason)
            .map_err(|_err| ReceiptError::IO)?;
    }

    writeln!(out).map_err(|_err| ReceiptError::IO)
}

/// Wraps runs of box-drawing characters (U+2500..U+257F) in dark grey.
fn colorize_borders(table: &str) -> String {
    let mut out = String::with_capacity(table.len() + 256);
    let mut in_run = false;

    for ch in table.chars() {
        let box_char = ('\u{2500}'..='\u{257F}').contains(&ch);

        if box_char != in_run {
            _ = out.write_str(if box_char { "\x1b[90m" } else { "\x1b[0m" });
            in_run = box_char;
        }

        out.push(ch);
    }

    if in_run {
        _ = out.write_str("\x1b[0m");
    }

    out
}

/// Width of `s` ignoring ANSI escapes.
fn visible_width(s: &str) -> usize {
    let mut width = 0usize;
    let mut in_escape = false;

    for ch in s.chars() {
        if in_escape {
            in_escape = !ch.is_ascii_alphabetic();
        } else if ch == '\x1b' {
            in_escape = true;
        } else {
            width += 1;
        }
    }

    width
}

fn color_dark_grey() -> Color {
    Color::new("\x1b[90m", "\x1b[0m")
}
