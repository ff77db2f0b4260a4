use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use curbside_core::{EstimationRun, ReplicateResult, ResultsTable, StateSpaceSummary, Termination};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Console,
    Json,
    Markdown,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    summary: &'a StateSpaceSummary,
    replicates: Vec<JsonReplicate>,
}

#[derive(Serialize)]
struct JsonReplicate {
    replicate: usize,
    seed: u64,
    moments: usize,
    objective: f64,
    converged: bool,
    termination: Termination,
    iterations: usize,
    evaluations: usize,
    unknown_states: u64,
    uncovered_trucks: u64,
    estimates: Vec<JsonEstimate>,
}

#[derive(Serialize)]
struct JsonEstimate {
    parameter: String,
    value: Option<f64>,
}

fn json_replicate(rep: &ReplicateResult, table: &ResultsTable, row: usize) -> JsonReplicate {
    let estimates = table
        .parameters
        .iter()
        .zip(&table.rows[row].values)
        .map(|(name, value)| JsonEstimate {
            parameter: name.clone(),
            value: *value,
        })
        .collect();
    JsonReplicate {
        replicate: rep.replicate,
        seed: rep.seed,
        moments: rep.samples.len(),
        objective: rep.result.objective,
        converged: rep.result.converged,
        termination: rep.result.termination,
        iterations: rep.result.iterations,
        evaluations: rep.result.evaluations,
        unknown_states: rep.stats.unknown_states,
        uncovered_trucks: rep.stats.uncovered_trucks,
        estimates,
    }
}

pub fn write_summary<W: Write + ?Sized>(out: &mut W, summary: &StateSpaceSummary) -> Result<()> {
    writeln!(out, "{}", "📐 State Space".bright_yellow().bold())?;
    writeln!(out, "{}", "-".repeat(30).yellow())?;
    writeln!(
        out,
        "Trucks: {}   Locations: {}   State variables: {}",
        summary.trucks, summary.locations, summary.state_variables
    )?;
    writeln!(
        out,
        "Observations: {}   Distinct states: {}   Starting points: {}",
        summary.observations, summary.distinct_states, summary.starting_points
    )?;
    writeln!(
        out,
        "Probability entries: {}   Degenerate pairs: {}",
        summary.probability_entries, summary.degenerate_pairs
    )?;
    let panel = &summary.panel;
    if panel.unknown_trucks > 0 || summary.dropped_weeks > 0 {
        writeln!(
            out,
            "{} {} unknown-truck rows skipped, {} weeks ({} records) without a following week",
            "⚠️ ".yellow(),
            panel.unknown_trucks,
            summary.dropped_weeks,
            summary.dropped_records
        )?;
    }
    Ok(())
}

pub fn generate_console_report<W: Write + ?Sized>(
    out: &mut W,
    run: &EstimationRun,
    duration: Duration,
) -> Result<()> {
    write_summary(out, &run.summary)?;
    writeln!(out)?;
    writeln!(out, "{}", "📊 Estimation Results".bright_cyan().bold())?;
    writeln!(out, "{}", "======================".cyan())?;

    let total = run.replicates.len();
    let converged = run.replicates.iter().filter(|r| r.result.converged).count();
    writeln!(out, "Replicates: {total}")?;
    writeln!(out, "Converged: {}", converged.to_string().green())?;
    writeln!(out, "Not converged: {}", (total - converged).to_string().red())?;
    writeln!(out, "Total time: {duration:?}")?;
    writeln!(out)?;

    for (row, rep) in run.replicates.iter().enumerate() {
        let status = if rep.result.converged {
            "✅ CONVERGED".green()
        } else {
            "❌ NOT CONVERGED".red()
        };
        writeln!(out, "{} replicate {}", status, rep.replicate.to_string().bold())?;
        writeln!(
            out,
            "   Moments: {}   Objective: {:.6}   Iterations: {}",
            rep.samples.len(),
            rep.result.objective,
            rep.result.iterations
        )?;
        if rep.stats.unknown_states > 0 || rep.stats.uncovered_trucks > 0 {
            writeln!(
                out,
                "   Uniform fallbacks: {} unknown states, {} uncovered trucks",
                rep.stats.unknown_states, rep.stats.uncovered_trucks
            )?;
        }
        for (name, value) in run.table.parameters.iter().zip(&run.table.rows[row].values) {
            if let Some(value) = value {
                writeln!(out, "     {name:24} {value:>12.6}")?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn generate_json_report<W: Write + ?Sized>(out: &mut W, run: &EstimationRun) -> Result<()> {
    let report = JsonReport {
        generated_at: Utc::now().to_rfc3339(),
        summary: &run.summary,
        replicates: run
            .replicates
            .iter()
            .enumerate()
            .map(|(row, rep)| json_replicate(rep, &run.table, row))
            .collect(),
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

pub fn generate_markdown_report<W: Write + ?Sized>(out: &mut W, run: &EstimationRun) -> Result<()> {
    writeln!(out, "# Curbside Estimation Results\n")?;
    writeln!(out, "_Generated {}_\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;

    let summary = &run.summary;
    writeln!(out, "## State space\n")?;
    writeln!(out, "- **Trucks**: {}", summary.trucks)?;
    writeln!(out, "- **Locations**: {}", summary.locations)?;
    writeln!(out, "- **Observations**: {}", summary.observations)?;
    writeln!(out, "- **Distinct states**: {}", summary.distinct_states)?;
    writeln!(out, "- **Degenerate pairs**: {}\n", summary.degenerate_pairs)?;

    let total = run.replicates.len();
    let converged = run.replicates.iter().filter(|r| r.result.converged).count();
    #[allow(clippy::cast_precision_loss)]
    let rate = if total == 0 {
        0.0
    } else {
        converged as f64 / total as f64 * 100.0
    };
    writeln!(out, "## Estimates\n")?;
    writeln!(out, "Converged replicates: {converged}/{total} ({rate:.1}%)\n")?;

    let header = run.table.header();
    writeln!(out, "| replicate | {} |", header.join(" | "))?;
    writeln!(out, "|---|{}", "---|".repeat(header.len()))?;
    for (rep, cells) in run.replicates.iter().zip(run.table.records()) {
        writeln!(out, "| {} | {} |", rep.replicate, cells.join(" | "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use curbside_core::{LocationSet, OptimizationResult, Parameter, SamplerStats};

    fn run() -> EstimationRun {
        let locations = LocationSet::new(&["A"], "Other").unwrap();
        let replicates = vec![ReplicateResult {
            replicate: 0,
            seed: 42,
            samples: Vec::new(),
            result: OptimizationResult {
                parameters: vec![Parameter::Intercept, Parameter::Location(locations.other())],
                values: vec![1.5, -0.25],
                objective: 0.0,
                converged: true,
                termination: Termination::Converged,
                iterations: 12,
                evaluations: 30,
            },
            stats: SamplerStats {
                unknown_states: 3,
                uncovered_trucks: 0,
            },
        }];
        let table = ResultsTable::new(&locations, &replicates);
        EstimationRun {
            summary: StateSpaceSummary {
                trucks: 2,
                locations: 2,
                ..StateSpaceSummary::default()
            },
            replicates,
            table,
        }
    }

    #[test]
    fn json_report_lists_estimates_and_fallbacks() {
        let mut out = Vec::new();
        generate_json_report(&mut out, &run()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let rep = &value["replicates"][0];
        assert_eq!(rep["seed"], 42);
        assert_eq!(rep["unknown_states"], 3);
        assert_eq!(rep["termination"], "Converged");
        let estimates = rep["estimates"].as_array().unwrap();
        assert_eq!(estimates[0]["parameter"], "intercept");
        assert_eq!(estimates[0]["value"], 1.5);
        assert!(
            estimates
                .iter()
                .any(|e| e["parameter"] == "monday" && e["value"].is_null())
        );
        assert!(value["generated_at"].is_string());
    }

    #[test]
    fn markdown_report_renders_results_table() {
        let mut out = Vec::new();
        generate_markdown_report(&mut out, &run()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("# Curbside Estimation Results"));
        assert!(text.contains("Converged replicates: 1/1 (100.0%)"));
        assert!(text.contains("| replicate | intercept |"));
        assert!(text.contains("| True |"));
    }

    #[test]
    fn console_report_shows_only_fitted_parameters() {
        colored::control::set_override(false);
        let mut out = Vec::new();
        generate_console_report(&mut out, &run(), Duration::from_millis(5)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("✅ CONVERGED replicate 0"));
        assert!(text.contains("3 unknown states"));
        assert!(text.contains("intercept"));
        assert!(!text.contains("monday"));
    }
}
